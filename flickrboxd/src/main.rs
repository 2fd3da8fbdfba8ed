use std::path::PathBuf;

use clap::{ArgAction, Parser};
use flickrboxd::daemon::{DaemonConfig, DaemonRuntime};
use flickrboxd::sync::engine::UploadMode;
use tracing_subscriber::EnvFilter;

/// Keeps a local directory tree and your Flickr photosets in sync.
#[derive(Debug, Parser)]
#[command(name = "flickrboxd", version)]
struct Cli {
    /// Directory mirrored to Flickr (overrides FLICKRBOX_SYNC_DIR)
    #[arg(long, value_name = "DIR")]
    sync_dir: Option<PathBuf>,

    /// "sync" waits for photo ids, "async" polls upload tickets
    #[arg(long, value_name = "MODE")]
    upload_mode: Option<UploadMode>,

    /// Reconcile once, wait for pending uploads, then exit
    #[arg(long)]
    once: bool,

    /// Do not watch the sync directory for changes
    #[arg(long)]
    no_watch: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn apply(&self, config: &mut DaemonConfig) {
        if let Some(dir) = &self.sync_dir {
            config.sync_root = dir.clone();
        }
        if let Some(mode) = self.upload_mode {
            config.upload_mode = mode;
        }
        if self.no_watch {
            config.enable_local_watcher = false;
        }
        config.once = self.once;
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = DaemonConfig::from_env()?;
    cli.apply(&mut config);
    let daemon = DaemonRuntime::bootstrap(config).await?;
    daemon.run().await?;
    Ok(())
}
