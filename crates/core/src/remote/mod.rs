//! Rate-limited scraping of the monthly offer page.

/// Cooldown gate and page sources.
pub mod fetcher;
/// Embedded payload extraction.
pub mod parser;

pub use fetcher::{HttpPageSource, PageSource, RateLimitedFetcher, RateLimiter};
pub use parser::{OfferPageParser, PAYLOAD_MARKER};
