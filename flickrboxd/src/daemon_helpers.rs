fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

pub fn credentials_from_env() -> anyhow::Result<Credentials> {
    let api_key = std::env::var("FLICKR_API_KEY").context("FLICKR_API_KEY is not set")?;
    let api_secret = std::env::var("FLICKR_API_SECRET").context("FLICKR_API_SECRET is not set")?;
    let auth_token = std::env::var("FLICKR_AUTH_TOKEN").context("FLICKR_AUTH_TOKEN is not set")?;
    Ok(Credentials::new(api_key, api_secret, auth_token))
}

// Never resolves when the watcher is disabled, so its select! branch stays idle.
async fn next_local_event(
    rx: &mut Option<mpsc::UnboundedReceiver<LocalEvent>>,
) -> Option<LocalEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn log_resolution(resolution: &TicketResolution) {
    match resolution {
        TicketResolution::Attached(outcome) => info!(outcome = ?outcome, "ticketed upload attached"),
        TicketResolution::AttachFailed {
            collection,
            item,
            error,
        } => warn!(collection = %collection, photo = %item.id, error = %error, "photo left outside its collection"),
        TicketResolution::UploadFailed { collection, title } => {
            warn!(collection = %collection, title = %title, "upload was rejected")
        }
        TicketResolution::StillPending(ticket) | TicketResolution::Unknown(ticket) => {
            info!(ticket = %ticket, "ticket ignored")
        }
    }
}
