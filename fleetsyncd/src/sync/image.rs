use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Confirms that a referenced image or document is still reachable before
/// its URL is mirrored. Any failure degrades to `None`.
#[derive(Clone)]
pub struct ImageUrlValidator {
    http: Client,
    timeout: Duration,
}

impl ImageUrlValidator {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_CHECK_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            http: Client::new(),
            timeout,
        }
    }

    pub async fn validate(&self, url: Option<&str>) -> Option<String> {
        let url = url.map(str::trim).filter(|url| !url.is_empty())?;
        match self.http.head(url).timeout(self.timeout).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(url, "image url reachable");
                Some(url.to_string())
            }
            Ok(response) => {
                warn!(url, status = %response.status(), "image url check failed; dropping url");
                None
            }
            Err(err) => {
                warn!(url, error = %err, "image url unreachable; dropping url");
                None
            }
        }
    }
}

impl Default for ImageUrlValidator {
    fn default() -> Self {
        Self::new()
    }
}
