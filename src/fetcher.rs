//! HTTP GET with bounded exponential-backoff retry.

use std::time::Duration;

use tracing::{debug, error};

use crate::error::{BridgeError, Result};
use crate::scrubber::scrub_text;

const MIN_WAIT: Duration = Duration::from_millis(100);
const MAX_WAIT_CAP: Duration = Duration::from_secs(5);

/// Fetches URLs from the device with retries and a hard per-attempt
/// timeout. Attempt 0 fires immediately; attempt n waits
/// `min(2^n * min_wait, max_wait)` first.
pub struct RetryingFetcher {
    client: reqwest::Client,
    timeout: Duration,
    min_wait: Duration,
    max_wait: Duration,
}

impl RetryingFetcher {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            min_wait: MIN_WAIT,
            max_wait: MAX_WAIT_CAP.min(timeout),
        }
    }

    /// Fetches `url`, retrying up to `retries` extra attempts. Returns the
    /// response body, or the last failure once attempts are exhausted.
    /// Never panics; callers decide whether exhaustion is fatal.
    pub async fn fetch(&self, url: &str, retries: u32) -> Result<String> {
        let mut try_n: u32 = 0;
        loop {
            if try_n > 0 {
                let wait = self.backoff(try_n);
                debug!(%url, ?wait, "waiting to retry");
                tokio::time::sleep(wait).await;
            }

            match self.attempt(url).await {
                Ok(body) => return Ok(body),
                Err(err) if try_n >= retries => {
                    if retries > 0 {
                        error!(%url, %err, retries = try_n, "giving up after retries");
                    } else {
                        error!(%url, %err, "request failed");
                    }
                    return Err(err);
                }
                Err(err) => {
                    debug!(%url, %err, "request failed, will retry");
                    try_n += 1;
                }
            }
        }
    }

    fn backoff(&self, try_n: u32) -> Duration {
        let factor = 2u32.saturating_pow(try_n);
        self.min_wait.saturating_mul(factor).min(self.max_wait)
    }

    async fn attempt(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).timeout(self.timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Network(format!("HTTP {status} from {url}")));
        }
        let body = response.text().await?;
        debug!(%url, body = %scrub_text(&body), "raw response");
        Ok(body)
    }
}
