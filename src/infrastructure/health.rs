//! HTTP connectivity probe
//!
//! Issues a GET against the target store's health endpoint before each write
//! attempt. Any transport error or non-2xx status counts as unhealthy.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::store::HealthProbe;

pub struct HttpHealthProbe {
    client: Client,
    url: String,
}

impl HttpHealthProbe {
    /// Create a probe; `None` if the HTTP client cannot be built
    pub fn new(url: impl Into<String>, timeout: Duration) -> Option<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .ok()?;

        Some(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn is_healthy(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!("Health check {} returned {}", self.url, response.status());
                false
            }
            Err(e) => {
                debug!("Health check {} failed: {}", self.url, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unhealthy() {
        // port 9 (discard) on localhost is closed on test machines
        let probe = HttpHealthProbe::new("http://127.0.0.1:9/health", Duration::from_millis(200))
            .expect("client builds");
        assert_eq!(probe.url(), "http://127.0.0.1:9/health");
        assert!(!probe.is_healthy().await);
    }
}
