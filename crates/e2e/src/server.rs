//! Application readiness - health checking the app under test before a run

use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{E2eError, E2eResult};

/// The externally running application under test
#[derive(Debug, Clone)]
pub struct AppServer {
    base_url: String,
    health_path: String,
}

impl AppServer {
    pub fn new(base_url: impl Into<String>, health_path: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            health_path: health_path.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn health_url(&self) -> String {
        format!("{}{}", self.base_url, self.health_path)
    }

    /// Wait for the application to respond to health checks
    pub async fn wait_until_ready(&self, timeout_duration: Duration) -> E2eResult<()> {
        let health_url = self.health_url();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        let start = Instant::now();
        let mut attempts = 0;

        while start.elapsed() < timeout_duration {
            attempts += 1;

            match client.get(&health_url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!("Application is ready at {}", self.base_url);
                    return Ok(());
                }
                Ok(resp) => {
                    warn!("Health check returned {}", resp.status());
                }
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for application at {}...", self.base_url);
                    }
                    // Connection refused is expected while the app is starting
                    if !e.is_connect() {
                        warn!("Health check error: {}", e);
                    }
                }
            }

            sleep(Duration::from_millis(250)).await;
        }

        Err(E2eError::ServerHealthCheck(attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_url_joins_without_double_slash() {
        let app = AppServer::new("http://127.0.0.1:8080/", "/api/healthcheck");
        assert_eq!(app.base_url(), "http://127.0.0.1:8080");
        assert_eq!(app.health_url(), "http://127.0.0.1:8080/api/healthcheck");
    }

    #[tokio::test]
    async fn unreachable_app_times_out() {
        // Port 9 (discard) is never served locally
        let app = AppServer::new("http://127.0.0.1:9", "/api/healthcheck");
        let err = app
            .wait_until_ready(Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, E2eError::ServerHealthCheck(n) if n >= 1));
    }
}
