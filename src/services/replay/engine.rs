use super::collaborators::ReplayEngine;
use super::types::ReplayWindow;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Client for the detection service's blocking replay endpoint.
#[derive(Debug, Clone)]
pub struct HttpReplayEngine {
    http: Client,
    base_url: String,
}

impl HttpReplayEngine {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build replay engine HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn replay_url(&self, function_id: i64) -> String {
        format!("{}/api/detection-job/{}/replay", self.base_url, function_id)
    }
}

#[async_trait]
impl ReplayEngine for HttpReplayEngine {
    async fn backfill_synchronous(&self, function_id: i64, window: ReplayWindow, force: bool) -> Result<()> {
        let url = self.replay_url(function_id);
        let response = self
            .http
            .post(&url)
            .query(&[
                ("start", window.start_ms.to_string()),
                ("end", window.end_ms.to_string()),
                ("force", force.to_string()),
            ])
            .send()
            .await
            .with_context(|| format!("replay request to {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "replay of function {function_id} over {window} returned {status}: {}",
                body.trim()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_url_ignores_trailing_slash() {
        let engine = HttpReplayEngine::new("http://detector:1426/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            engine.replay_url(42),
            "http://detector:1426/api/detection-job/42/replay"
        );
    }

    #[tokio::test]
    async fn unreachable_engine_is_an_error() {
        let listener = match std::net::TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => listener,
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                // Sandbox environments can block binding attempts.
                return;
            }
            Err(err) => panic!("bind failed: {err}"),
        };
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let engine = HttpReplayEngine::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();
        let result = engine
            .backfill_synchronous(42, ReplayWindow::new(0, 1_000), true)
            .await;
        assert!(result.is_err());
    }
}
