#![warn(clippy::all, missing_docs)]

//! Core domain logic for offertrack.
//!
//! This crate hosts the month model, the page scraper, the tiered cache,
//! the year-partitioned store and the retrieval pipeline that ties them
//! together. The command line frontend only wires configuration into these
//! pieces.

pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod month;
pub mod pipeline;
pub mod remote;
pub mod store;

pub use cache::{CachePolicy, TieredCache};
pub use config::{AppConfig, StoreKind};
pub use error::{FetchError, MonthKeyError, ParseError, PipelineError, StoreError};
pub use models::{DetailLevel, GameCollection, GameRecord, Origin, UserRating};
pub use month::{DateRange, MonthKey};
pub use pipeline::RetrievalPipeline;
pub use remote::{HttpPageSource, OfferPageParser, PageSource, RateLimitedFetcher, RateLimiter};
pub use store::{
    BulkReport, DocumentStore, JsonFileDocumentStore, MemoryDocumentStore, Partition,
    RestDocumentStore, StoredGame, YearPartitionedStore,
};
