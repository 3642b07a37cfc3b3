use std::time::{Duration, Instant};

use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use interfaces::{FeedFetcher, FetchError};
use reqwest::{header, Client, Response};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::types::{FetchConfig, Result};

const ICLOUD_BROKEN_OFFSET: &str = "TZOFFSETFROM:+5328";
const ICLOUD_FIXED_OFFSET: &str = "TZOFFSETFROM:+0053";

/// HTTP retrieval of iCalendar feeds.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self { client, config })
    }

    fn backoff(&self) -> ExponentialBackoff<backoff::SystemClock> {
        ExponentialBackoff {
            current_interval: Duration::from_secs(self.config.retry_delay_seconds),
            initial_interval: Duration::from_secs(self.config.retry_delay_seconds),
            max_interval: Duration::from_secs(self.config.retry_delay_seconds * 32),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(self.config.retry_delay_seconds * 60)),
            ..Default::default()
        }
    }

    async fn fetch_text(&self, url: &str) -> std::result::Result<String, FetchError> {
        let start_time = Instant::now();
        let mut backoff = self.backoff();
        let mut attempt = 0;

        loop {
            let error = match self.client.get(url).send().await {
                Ok(response) if response.status().is_success() => {
                    let text = self.read_body(url, response).await?;
                    info!(
                        url,
                        bytes = text.len(),
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Fetched feed"
                    );
                    return Ok(text);
                }
                Ok(response) => {
                    let status = response.status();
                    let error = FetchError::Status {
                        url: url.to_string(),
                        status: status.as_u16(),
                    };
                    // Client errors will not go away on retry.
                    if !status.is_server_error() {
                        return Err(error);
                    }
                    error
                }
                Err(e) => FetchError::Transport {
                    url: url.to_string(),
                    message: e.to_string(),
                },
            };

            if attempt < self.config.max_retries {
                if let Some(delay) = backoff.next_backoff() {
                    attempt += 1;
                    warn!("Attempt {} failed for {}, retrying in {:?}: {}", attempt, url, delay, error);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }

            error!("Failed to fetch feed after {} attempts: {}", attempt + 1, url);
            return Err(error);
        }
    }

    async fn read_body(&self, url: &str, response: Response) -> std::result::Result<String, FetchError> {
        let limit = self.config.max_feed_size_mb * 1024 * 1024;
        let too_large = || FetchError::TooLarge {
            url: url.to_string(),
            limit_mb: self.config.max_feed_size_mb,
        };

        if let Some(length) = response.content_length() {
            if length as usize > limit {
                return Err(too_large());
            }
        }

        let charset = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(charset_of)
            .map(str::to_ascii_lowercase);

        let bytes = response.bytes().await.map_err(|e| FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        if bytes.len() > limit {
            return Err(too_large());
        }

        Ok(decode(&bytes, charset.as_deref()))
    }
}

#[async_trait]
impl FeedFetcher for Fetcher {
    async fn fetch(&self, url: &str, icloud: bool) -> std::result::Result<String, FetchError> {
        Url::parse(url).map_err(|e| FetchError::Transport {
            url: url.to_string(),
            message: format!("invalid URL: {e}"),
        })?;

        debug!(url, icloud, "Fetching feed");
        let text = self.fetch_text(url).await?;
        Ok(normalize_feed(&text, icloud))
    }
}

fn charset_of(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
    })
}

/// UTF-8 unless the server declared Latin-1; invalid sequences are replaced.
fn decode(bytes: &[u8], charset: Option<&str>) -> String {
    match charset {
        Some("iso-8859-1") | Some("latin1") | Some("latin-1") => {
            bytes.iter().map(|&b| char::from(b)).collect()
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Strips carriage returns and, for iCloud feeds, repairs the broken
/// timezone offset iCloud emits.
pub fn normalize_feed(text: &str, icloud: bool) -> String {
    let text = text.replace('\r', "");
    if icloud {
        text.replace(ICLOUD_BROKEN_OFFSET, ICLOUD_FIXED_OFFSET)
    } else {
        text
    }
}
