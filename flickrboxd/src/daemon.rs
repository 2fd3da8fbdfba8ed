use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use flickr_core::{Credentials, FlickrClient};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::sync::engine::{SyncEngine, TicketResolution, UploadMode};
use crate::sync::local_watcher::{LocalEvent, start_notify_watcher};
use crate::sync::snapshot::fetch_registry;
use crate::sync::tickets::{DEFAULT_POLL_INTERVAL, spawn_ticket_poller};

const DEFAULT_SYNC_DIR_NAME: &str = "FlickrBox";

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub sync_root: PathBuf,
    pub upload_mode: UploadMode,
    pub ticket_poll_interval: Duration,
    pub enable_local_watcher: bool,
    /// Reconcile, wait for outstanding tickets, then exit.
    pub once: bool,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let sync_root = std::env::var("FLICKRBOX_SYNC_DIR")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|| home.join(DEFAULT_SYNC_DIR_NAME));
        let upload_mode = match std::env::var("FLICKRBOX_UPLOAD_MODE") {
            Ok(value) => value
                .parse()
                .context("FLICKRBOX_UPLOAD_MODE is invalid")?,
            Err(_) => UploadMode::default(),
        };
        let ticket_poll_interval = Duration::from_millis(read_u64_env(
            "FLICKRBOX_TICKET_POLL_MS",
            DEFAULT_POLL_INTERVAL.as_millis() as u64,
        ));
        let enable_local_watcher = read_bool_env("FLICKRBOX_ENABLE_WATCHER", true);

        Ok(Self {
            sync_root,
            upload_mode,
            ticket_poll_interval,
            enable_local_watcher,
            once: false,
        })
    }
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    client: FlickrClient,
    engine: SyncEngine,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        let credentials = credentials_from_env()?;
        let client = FlickrClient::new(credentials).context("failed to build Flickr client")?;
        Self::connect(config, client).await
    }

    /// Verifies the credentials and loads the remote library.
    pub async fn connect(config: DaemonConfig, client: FlickrClient) -> anyhow::Result<Self> {
        let user = match client.test_login().await {
            Ok(user) => user,
            Err(err) => {
                let reason = if err.is_auth_failure() {
                    "Flickr rejected the credentials, check FLICKR_API_KEY, FLICKR_API_SECRET and FLICKR_AUTH_TOKEN"
                } else {
                    "Flickr authentication failed"
                };
                return Err(anyhow::Error::new(err).context(reason));
            }
        };
        info!(user = %user.username, id = %user.id, "authenticated");

        tokio::fs::create_dir_all(&config.sync_root)
            .await
            .with_context(|| format!("failed to create sync root at {:?}", config.sync_root))?;
        let registry = fetch_registry(&client)
            .await
            .context("failed to fetch remote collections")?;
        let engine = SyncEngine::new(
            client.clone(),
            registry,
            config.sync_root.clone(),
            config.upload_mode,
        );
        Ok(Self {
            config,
            client,
            engine,
        })
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub async fn run(mut self) -> anyhow::Result<SyncEngine> {
        info!(
            sync_root = %self.config.sync_root.display(),
            upload_mode = %self.config.upload_mode,
            local_watcher = self.config.enable_local_watcher,
            once = self.config.once,
            "started"
        );

        let poller = spawn_ticket_poller(self.client.clone(), self.config.ticket_poll_interval);
        let mut resolved = poller.resolved;
        self.engine.attach_ticket_intake(poller.intake);

        self.engine
            .run_pass()
            .await
            .context("reconciliation pass failed")?;

        if self.config.once {
            self.engine.close_ticket_intake();
            while let Some(status) = resolved.recv().await {
                log_resolution(&self.engine.apply_ticket_status(status).await);
            }
            poller.handle.await.context("ticket poller panicked")?;
            return Ok(self.engine);
        }

        let (watcher, mut local_rx) = if self.config.enable_local_watcher {
            let (watcher, rx) = start_notify_watcher(&self.config.sync_root)
                .context("failed to start file watcher")?;
            (Some(watcher), Some(rx))
        } else {
            (None, None)
        };
        let _watcher = watcher;

        loop {
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    res.context("failed waiting for shutdown signal")?;
                    info!("shutdown requested");
                    break;
                }
                Some(status) = resolved.recv() => {
                    log_resolution(&self.engine.apply_ticket_status(status).await);
                }
                Some(event) = next_local_event(&mut local_rx) => {
                    info!(event = ?event, "local event");
                    if let Err(err) = self.engine.handle_local_event(event).await {
                        warn!(error = %err, "local event failed");
                    }
                }
            }
        }

        poller.handle.abort();
        Ok(self.engine)
    }
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
