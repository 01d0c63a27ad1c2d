//! REST collaborators: account balance and result download
//!
//! Both use the same bearer credential as the MCP session. Downloads follow
//! redirects, have no overall timeout and are never retried.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use xcat_core::{Result, XcatError};

use crate::auth;

const BALANCE_TIMEOUT_SECS: u64 = 30;

/// Destination for the task result artifact
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Stream `url` into `dest`, overwriting it; returns the bytes written
    async fn download(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// Authenticated HTTP client for the non-MCP endpoints
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
}

impl RestClient {
    pub fn new(api_key: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .default_headers(auth::bearer_headers(api_key)?)
            .build()
            .map_err(|e| XcatError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    /// Fetch the account view (`GET /api/v1/me`), used for display only
    pub async fn me(&self, me_url: &str) -> Result<Value> {
        let response = self
            .http
            .get(me_url)
            .timeout(Duration::from_secs(BALANCE_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| XcatError::Transport(format!("Balance request failed: {}", e)))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| XcatError::Transport(format!("Failed to read balance response: {}", e)))?;
        Ok(body_to_value(status, &text))
    }
}

#[async_trait]
impl ArtifactFetcher for RestClient {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        tracing::info!("Downloading result to {}", dest.display());

        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| XcatError::Transport(format!("Download failed: {}", e)))?;

        let partial = partial_path(dest);
        let written = match write_stream(response, &partial).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };
        tokio::fs::rename(&partial, dest).await?;

        tracing::info!("Saved {} bytes to {}", written, dest.display());
        Ok(written)
    }
}

async fn write_stream(response: reqwest::Response, path: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| XcatError::Transport(format!("Download interrupted: {}", e)))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// JSON body, or `{"_status", "_text"}` when the body is not JSON
fn body_to_value(status: u16, text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| json!({ "_status": status, "_text": text }))
}
