//! Durable, year-partitioned game storage.
//!
//! Records live at `gamesByYear/<year>/<id>`, where `<year>` is derived from
//! the record's own `bundle_date` (or `unknown` when it names no year). All
//! path construction happens here; callers only ever see years, ids and
//! records.

/// Path-addressable document backends.
pub mod document;

use std::{
    cmp::Reverse,
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

use parking_lot::Mutex;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    cache::TieredCache,
    error::StoreError,
    models::GameRecord,
    month::{year_of, DateRange, MonthKey},
};

pub use document::{DocumentStore, JsonFileDocumentStore, MemoryDocumentStore, RestDocumentStore};

/// Root collection of the year-partitioned layout.
pub const COLLECTION: &str = "gamesByYear";
/// Flat collection used before records were partitioned by year.
pub const LEGACY_COLLECTION: &str = "games";
/// Partition key for records whose `bundle_date` names no year.
pub const UNKNOWN_PARTITION: &str = "unknown";

/// Year bucket a record is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Partition {
    /// A four digit calendar year.
    Year(u16),
    /// No year could be derived.
    Unknown,
}

impl Partition {
    /// Partition owning a record with this `bundle_date`.
    pub fn of_bundle_date(bundle_date: &str) -> Self {
        year_of(bundle_date).map(Partition::Year).unwrap_or(Partition::Unknown)
    }

    /// Partition owning `record`.
    pub fn of(record: &GameRecord) -> Self {
        Self::of_bundle_date(&record.bundle_date)
    }

    /// Inverse of `Display`; `None` for keys that are neither a year nor `unknown`.
    pub fn from_key(key: &str) -> Option<Self> {
        if key == UNKNOWN_PARTITION {
            return Some(Partition::Unknown);
        }
        crate::month::parse_year(key).ok().map(Partition::Year)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partition::Year(year) => write!(f, "{year:04}"),
            Partition::Unknown => f.write_str(UNKNOWN_PARTITION),
        }
    }
}

/// A record together with its storage key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredGame {
    /// Key under the partition.
    pub id: String,
    /// Partition key, a year or `unknown`.
    pub partition: String,
    /// Stored payload.
    #[serde(flatten)]
    pub record: GameRecord,
}

/// Outcome of [`YearPartitionedStore::add_many`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkReport {
    /// Generated ids, in input order.
    pub ids: Vec<String>,
    /// Number of created records per partition.
    pub distribution_by_year: BTreeMap<String, usize>,
    /// Input records ignored for lacking a title.
    pub skipped: usize,
}

/// Decoded partition: record id to record.
pub type PartitionMap = Arc<BTreeMap<String, GameRecord>>;

/// Typed facade over a [`DocumentStore`] laid out by year.
///
/// Whole partitions read through [`YearPartitionedStore::get_by_year`] are
/// memoised in a [`TieredCache`] keyed by the literal year; every write drops
/// the memoised copy of the partition it touched. A read that overlaps a
/// write to its partition is returned but not memoised.
pub struct YearPartitionedStore<D> {
    documents: D,
    partition_cache: TieredCache<PartitionMap>,
    generations: Mutex<HashMap<Partition, u64>>,
}

impl<D: DocumentStore> YearPartitionedStore<D> {
    /// Store over `documents`, memoising partitions in `partition_cache`.
    pub fn new(documents: D, partition_cache: TieredCache<PartitionMap>) -> Self {
        Self {
            documents,
            partition_cache,
            generations: Mutex::new(HashMap::new()),
        }
    }

    fn generation(&self, partition: Partition) -> u64 {
        self.generations.lock().get(&partition).copied().unwrap_or(0)
    }

    fn invalidate(&self, partition: Partition) {
        let mut generations = self.generations.lock();
        *generations.entry(partition).or_default() += 1;
        self.partition_cache.remove(&partition.to_string());
    }

    /// Underlying document backend.
    pub fn documents(&self) -> &D {
        &self.documents
    }

    fn partition_path(partition: Partition) -> String {
        format!("{COLLECTION}/{partition}")
    }

    fn record_path(partition: Partition, id: &str) -> String {
        format!("{COLLECTION}/{partition}/{id}")
    }

    fn encode(operation: &'static str, path: &str, record: &GameRecord) -> Result<Value, StoreError> {
        serde_json::to_value(record).map_err(|err| StoreError::new(operation, path, err))
    }

    /// Store `record` under the partition derived from its `bundle_date`.
    pub async fn add(&self, record: &GameRecord) -> Result<String, StoreError> {
        let partition = Partition::of(record);
        let path = Self::partition_path(partition);
        let value = Self::encode("add", &path, record)?;
        let id = self.documents.push(&path, value).await?;
        self.invalidate(partition);
        debug!("stored \"{}\" at {path}/{id}", record.title);
        Ok(id)
    }

    /// Add every titled record, one write each. A failure part-way through
    /// leaves the earlier writes committed.
    pub async fn add_many(&self, records: &[GameRecord]) -> Result<BulkReport, StoreError> {
        let mut report = BulkReport::default();
        for record in records {
            if !record.is_valid() {
                report.skipped += 1;
                continue;
            }
            let id = self.add(record).await?;
            report.ids.push(id);
            *report
                .distribution_by_year
                .entry(Partition::of(record).to_string())
                .or_default() += 1;
        }
        info!(
            "bulk add stored {} records ({} skipped)",
            report.ids.len(),
            report.skipped
        );
        Ok(report)
    }

    async fn read_partition(&self, partition: Partition) -> Result<PartitionMap, StoreError> {
        let key = partition.to_string();
        if let Some(cached) = self.partition_cache.get(&key) {
            return Ok(cached);
        }

        let started = self.generation(partition);
        let path = Self::partition_path(partition);
        let records = match self.documents.read(&path).await? {
            Some(value) => decode_partition(&path, value),
            None => BTreeMap::new(),
        };
        let records = Arc::new(records);

        let generations = self.generations.lock();
        if generations.get(&partition).copied().unwrap_or(0) == started {
            self.partition_cache.set(key, Arc::clone(&records));
        } else {
            debug!("partition {partition} changed during read; not memoising");
        }
        Ok(records)
    }

    /// Every record stored in `partition`.
    pub async fn get_partition(&self, partition: Partition) -> Result<Vec<GameRecord>, StoreError> {
        Ok(self.read_partition(partition).await?.values().cloned().collect())
    }

    /// Every record stored for `year`.
    pub async fn get_by_year(&self, year: u16) -> Result<Vec<GameRecord>, StoreError> {
        self.get_partition(Partition::Year(year)).await
    }

    /// Records of several years, newest first.
    pub async fn get_by_years(&self, years: &[u16]) -> Result<Vec<GameRecord>, StoreError> {
        let mut games = Vec::new();
        for year in years {
            games.extend(self.get_by_year(*year).await?);
        }
        sort_newest_first(&mut games);
        Ok(games)
    }

    /// Records offered in `month`.
    pub async fn get_by_month(&self, month: &MonthKey) -> Result<Vec<GameRecord>, StoreError> {
        let games = self.get_by_year(month.year()).await?;
        Ok(games
            .into_iter()
            .filter(|game| crate::month::month_of(&game.bundle_date) == Some(month.month()))
            .collect())
    }

    /// Records whose month ordinal falls inside `range`, newest first.
    pub async fn get_by_range(&self, range: &DateRange) -> Result<Vec<GameRecord>, StoreError> {
        let mut games = Vec::new();
        for year in range.years() {
            games.extend(
                self.get_by_year(year)
                    .await?
                    .into_iter()
                    .filter(|game| {
                        game.ordinal()
                            .map(|ordinal| range.contains_ordinal(ordinal))
                            .unwrap_or(false)
                    }),
            );
        }
        sort_newest_first(&mut games);
        Ok(games)
    }

    /// Every stored record across all partitions, newest first.
    pub async fn get_all(&self) -> Result<Vec<GameRecord>, StoreError> {
        let mut games: Vec<GameRecord> = self
            .read_tree()
            .await?
            .into_values()
            .flat_map(BTreeMap::into_values)
            .collect();
        sort_newest_first(&mut games);
        Ok(games)
    }

    /// Read `id` from a known partition.
    pub async fn get_in(&self, id: &str, partition: Partition) -> Result<Option<StoredGame>, StoreError> {
        let path = Self::record_path(partition, id);
        let Some(value) = self.documents.read(&path).await? else {
            return Ok(None);
        };
        let record: GameRecord =
            serde_json::from_value(value).map_err(|err| StoreError::new("get", &path, err))?;
        Ok(record.is_valid().then(|| StoredGame {
            id: id.to_string(),
            partition: partition.to_string(),
            record,
        }))
    }

    /// Look a record up by id, scanning partitions newest year first.
    pub async fn get(&self, id: &str) -> Result<Option<StoredGame>, StoreError> {
        for partition in self.partitions().await? {
            if let Some(found) = self.get_in(id, partition).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Overwrite `id` under the partition derived from the given record.
    ///
    /// The record is not moved: if its `bundle_date` now names a different
    /// year than the one it was stored under, the old copy stays where it was.
    pub async fn update(&self, id: &str, record: &GameRecord) -> Result<(), StoreError> {
        let partition = Partition::of(record);
        let path = Self::record_path(partition, id);
        let value = Self::encode("update", &path, record)?;
        self.documents.put(&path, value).await?;
        self.invalidate(partition);
        debug!("updated {path}");
        Ok(())
    }

    /// Delete `id` from a known partition.
    pub async fn delete_in(&self, id: &str, partition: Partition) -> Result<bool, StoreError> {
        let removed = self
            .documents
            .delete(&Self::record_path(partition, id))
            .await?;
        if removed {
            self.invalidate(partition);
        }
        Ok(removed)
    }

    /// Delete `id` from `year` directly.
    pub async fn delete_in_year(&self, id: &str, year: u16) -> Result<bool, StoreError> {
        self.delete_in(id, Partition::Year(year)).await
    }

    /// Drop a whole partition.
    pub async fn delete_partition(&self, partition: Partition) -> Result<bool, StoreError> {
        let removed = self
            .documents
            .delete(&Self::partition_path(partition))
            .await?;
        self.invalidate(partition);
        if removed {
            warn!("deleted partition {partition}");
        }
        Ok(removed)
    }

    /// Delete `id` without knowing its partition: try each partition until
    /// one reports a deletion.
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        for partition in self.partitions().await? {
            if self.delete_in(id, partition).await? {
                info!("deleted {id} from partition {partition}");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Every partition currently holding records: years newest first, then
    /// `unknown`.
    pub async fn partitions(&self) -> Result<Vec<Partition>, StoreError> {
        let Some(Value::Object(tree)) = self.documents.read(COLLECTION).await? else {
            return Ok(Vec::new());
        };
        let mut partitions: Vec<Partition> = tree
            .keys()
            .filter_map(|key| Partition::from_key(key))
            .collect();
        partitions.sort_by_key(|partition| match partition {
            Partition::Year(year) => (0, Reverse(*year)),
            Partition::Unknown => (1, Reverse(0)),
        });
        Ok(partitions)
    }

    /// Four digit years with stored records, newest first.
    pub async fn available_years(&self) -> Result<Vec<u16>, StoreError> {
        Ok(self
            .partitions()
            .await?
            .into_iter()
            .filter_map(|partition| match partition {
                Partition::Year(year) => Some(year),
                Partition::Unknown => None,
            })
            .collect())
    }

    /// Distinct months with stored records, newest first.
    pub async fn available_periods(&self) -> Result<Vec<MonthKey>, StoreError> {
        let mut periods = Vec::new();
        for year in self.available_years().await? {
            periods.extend(
                self.get_by_year(year)
                    .await?
                    .iter()
                    .filter_map(GameRecord::month_key)
                    .filter(|key| key.year() == year),
            );
        }
        periods.sort_by_key(|key| Reverse(*key));
        periods.dedup();
        Ok(periods)
    }

    /// Number of records per partition key, `unknown` included.
    pub async fn count_by_year(&self) -> Result<BTreeMap<String, usize>, StoreError> {
        Ok(self
            .read_tree()
            .await?
            .into_iter()
            .map(|(key, records)| (key, records.len()))
            .collect())
    }

    /// Copy every record of the flat legacy collection into its year
    /// partition. The legacy collection is left in place.
    pub async fn migrate_legacy(&self) -> Result<usize, StoreError> {
        let Some(value) = self.documents.read(LEGACY_COLLECTION).await? else {
            return Ok(0);
        };
        let legacy = decode_partition(LEGACY_COLLECTION, value);
        for record in legacy.values() {
            self.add(record).await?;
        }
        info!("migrated {} legacy records into {COLLECTION}", legacy.len());
        Ok(legacy.len())
    }

    async fn read_tree(&self) -> Result<BTreeMap<String, BTreeMap<String, GameRecord>>, StoreError> {
        let Some(Value::Object(tree)) = self.documents.read(COLLECTION).await? else {
            return Ok(BTreeMap::new());
        };
        Ok(tree
            .into_iter()
            .map(|(key, value)| {
                let records = decode_partition(&format!("{COLLECTION}/{key}"), value);
                (key, records)
            })
            .collect())
    }
}

/// Decode a `{id: record}` object, skipping entries that do not decode.
fn decode_partition(path: &str, value: Value) -> BTreeMap<String, GameRecord> {
    let Value::Object(entries) = value else {
        warn!("Ignoring non-object partition at {path}");
        return BTreeMap::new();
    };
    entries
        .into_iter()
        .filter_map(|(id, entry)| match serde_json::from_value::<GameRecord>(entry) {
            Ok(record) => Some((id, record)),
            Err(err) => {
                warn!("Skipping {path}/{id}: {err}");
                None
            }
        })
        .collect()
}

/// Newest first by month ordinal; records without a derivable month go last,
/// ordered by their raw token.
fn sort_newest_first(games: &mut [GameRecord]) {
    games.sort_by_cached_key(|game| (Reverse(game.ordinal()), Reverse(game.bundle_date.clone())));
}
