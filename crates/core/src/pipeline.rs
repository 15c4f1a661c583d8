//! Month resolution: cache, then durable store, then the remote page.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    cache::TieredCache,
    error::PipelineError,
    models::{DetailLevel, GameCollection, Origin},
    month::{DateRange, MonthKey},
    remote::{OfferPageParser, PageSource, RateLimitedFetcher},
    store::{DocumentStore, YearPartitionedStore},
};

/// Prefix of month-level cache keys.
pub const OFFER_KEY_PREFIX: &str = "offer:";

/// Cache key for `month`.
pub fn offer_key(month: &MonthKey) -> String {
    format!("{OFFER_KEY_PREFIX}{month}")
}

/// Resolves the games offered in a month through three tiers.
///
/// 1. The in-process cache, keyed by [`offer_key`]. A hit touches nothing else.
/// 2. The year-partitioned store. A hit is returned as-is and is **not**
///    copied into the cache, so the next request for that month reads the
///    store again.
/// 3. The remote page, behind the shared rate limiter. Every scraped record is
///    stamped with the requested month, written to the store one by one, and
///    the assembled collection is cached.
///
/// Concurrent misses for the same month are not merged: each one waits its
/// turn at the limiter and scrapes independently, and the last cache write
/// wins.
pub struct RetrievalPipeline<D, S> {
    cache: TieredCache<GameCollection>,
    store: Arc<YearPartitionedStore<D>>,
    fetcher: RateLimitedFetcher<S>,
}

impl<D, S> RetrievalPipeline<D, S>
where
    D: DocumentStore,
    S: PageSource,
{
    /// Pipeline over a month-level cache, a store and a rate-limited fetcher.
    pub fn new(
        cache: TieredCache<GameCollection>,
        store: Arc<YearPartitionedStore<D>>,
        fetcher: RateLimitedFetcher<S>,
    ) -> Self {
        Self {
            cache,
            store,
            fetcher,
        }
    }

    /// Month-level cache.
    pub fn cache(&self) -> &TieredCache<GameCollection> {
        &self.cache
    }

    /// Durable tier.
    pub fn store(&self) -> &Arc<YearPartitionedStore<D>> {
        &self.store
    }

    /// Games offered in `month`.
    ///
    /// A page that cannot be decoded yields an empty collection with origin
    /// [`Origin::Unavailable`]; it is neither stored nor cached, so a later
    /// call retries the scrape. Fetch and store failures are returned as
    /// errors.
    pub async fn resolve(
        &self,
        month: &MonthKey,
        detail: DetailLevel,
    ) -> Result<GameCollection, PipelineError> {
        let key = offer_key(month);
        if let Some(mut cached) = self.cache.get(&key) {
            debug!("cache hit for {month}");
            cached.origin = Origin::Cache;
            return Ok(cached);
        }

        let stored = self.store.get_by_month(month).await?;
        if !stored.is_empty() {
            debug!("store hit for {month}: {} games", stored.len());
            return Ok(GameCollection::new(Origin::Store, stored));
        }

        let page = self.fetcher.fetch(month).await?;
        let mut games = match OfferPageParser::parse(&page, detail) {
            Ok(games) => games,
            Err(err) => {
                warn!("Could not extract offers for {month}: {err}");
                return Ok(GameCollection::unavailable(
                    month,
                    format!("offers for {month} are unavailable: {err}"),
                ));
            }
        };

        let bundle_date = month.to_string();
        for game in &mut games {
            game.bundle_date = bundle_date.clone();
            self.store.add(game).await?;
        }
        info!("scraped {} games for {month}", games.len());

        let collection = if games.is_empty() {
            GameCollection::new(Origin::Remote, games)
                .with_message(format!("no games listed for {month}"))
        } else {
            GameCollection::new(Origin::Remote, games)
        };
        self.cache.set(key, collection.clone());
        Ok(collection)
    }

    /// Resolve every month of `range` in ascending order and concatenate the
    /// results. Duplicates across months are kept.
    ///
    /// A range whose start is after its end touches no tier and comes back
    /// as an empty [`Origin::Empty`] collection with an explanatory message.
    pub async fn resolve_range(
        &self,
        range: &DateRange,
        detail: DetailLevel,
    ) -> Result<GameCollection, PipelineError> {
        let mut combined: Option<GameCollection> = None;
        for month in range {
            let collection = self.resolve(&month, detail).await?;
            match combined.as_mut() {
                Some(combined) => combined.append(collection),
                None => combined = Some(collection),
            }
        }
        Ok(combined.unwrap_or_else(|| {
            GameCollection::new(Origin::Empty, Vec::new()).with_message(format!(
                "empty range: {} is after {}",
                range.start(),
                range.end()
            ))
        }))
    }

    /// Drop the cached collection for `month`.
    pub fn invalidate(&self, month: &MonthKey) -> bool {
        self.cache.remove(&offer_key(month))
    }
}
