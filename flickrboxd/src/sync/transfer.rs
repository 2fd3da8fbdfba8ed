use std::{
    io,
    path::{Path, PathBuf},
};

use futures_util::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use url::Url;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

/// Moves photo bytes between the sync root and the photo hosts.
#[derive(Clone, Default)]
pub struct TransferClient {
    http: Client,
}

impl TransferClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Streams `href` into `target` through a sibling `.partial` file.
    pub async fn download_to_path(&self, href: &str, target: &Path) -> Result<(), TransferError> {
        let url = Url::parse(href)?;
        let response = self.http.get(url).send().await?.error_for_status()?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(target);
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;

        tokio::fs::rename(partial, target).await?;
        Ok(())
    }

    /// Opens `source` as a streaming request body and reports its length.
    pub async fn file_body(&self, source: &Path) -> Result<(reqwest::Body, u64), TransferError> {
        let file = tokio::fs::File::open(source).await?;
        let length = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        Ok((body, length))
    }
}

fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}
