use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info};

use crate::{error::FetchError, month::MonthKey};

/// Default spacing between two outbound page fetches.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);

/// Membership page URL; `{month}` is replaced with the canonical month token.
pub const DEFAULT_SOURCE_URL: &str = "https://www.humblebundle.com/membership/{month}";

/// Process-wide single-permit gate that spaces out fetches by a cooldown.
///
/// Waiters queue in arrival order on the gate's mutex. The gate is shared by
/// `Arc`; construct one per process and hand it to every fetcher.
#[derive(Debug)]
pub struct RateLimiter {
    cooldown: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Gate that has never been passed.
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last: Mutex::new(None),
        }
    }

    /// Minimum spacing between two acquisitions.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Wait until `cooldown` has passed since the previous acquisition, then
    /// record the current instant and release the gate.
    ///
    /// Returns the recorded instant.
    pub async fn acquire(&self) -> Instant {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.cooldown {
                let wait = self.cooldown - elapsed;
                debug!("fetch cooldown: waiting {}ms", wait.as_millis());
                tokio::time::sleep(wait).await;
            }
        }
        let now = Instant::now();
        *last = Some(now);
        now
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

/// Something that can produce the raw membership page for a month.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Raw page body for `month`.
    async fn fetch_page(&self, month: &MonthKey) -> Result<String, FetchError>;
}

#[async_trait]
impl<T: PageSource + ?Sized> PageSource for Arc<T> {
    async fn fetch_page(&self, month: &MonthKey) -> Result<String, FetchError> {
        (**self).fetch_page(month).await
    }
}

/// Fetches membership pages over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPageSource {
    client: reqwest::Client,
    url_template: String,
}

impl HttpPageSource {
    /// Client with the crate user agent and the transport's default timeouts.
    pub fn new(url_template: impl Into<String>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("offertrack/", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self::with_client(client, url_template))
    }

    /// Source using a caller-built client.
    pub fn with_client(client: reqwest::Client, url_template: impl Into<String>) -> Self {
        Self {
            client,
            url_template: url_template.into(),
        }
    }

    /// Page URL for `month`.
    pub fn url_for(&self, month: &MonthKey) -> String {
        self.url_template.replace("{month}", &month.to_string())
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch_page(&self, month: &MonthKey) -> Result<String, FetchError> {
        let url = self.url_for(month);
        info!("fetching offer page {url}");
        let wrap = |source: reqwest::Error| FetchError::Http {
            url: url.clone(),
            source,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(wrap)?;
        response.text().await.map_err(wrap)
    }
}

/// A [`PageSource`] behind a shared [`RateLimiter`].
pub struct RateLimitedFetcher<S> {
    limiter: Arc<RateLimiter>,
    source: S,
}

impl<S: PageSource> RateLimitedFetcher<S> {
    /// Fetcher sharing `limiter` with every other fetcher built from it.
    pub fn new(limiter: Arc<RateLimiter>, source: S) -> Self {
        Self { limiter, source }
    }

    /// The shared gate.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Acquire the gate, then fetch the page for `month`.
    pub async fn fetch(&self, month: &MonthKey) -> Result<String, FetchError> {
        self.limiter.acquire().await;
        self.source.fetch_page(month).await
    }
}
