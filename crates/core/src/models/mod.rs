//! Shared domain models.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::month::MonthKey;

/// A single game offered in a monthly bundle.
///
/// Optional fields are omitted when serialised, so a record read back from the
/// store keeps absent details absent instead of turning them into zeros.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRecord {
    /// Display title. Records without one are ignored.
    #[serde(default)]
    pub title: String,
    /// Cover image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Month token the record was offered in, e.g. `september-2024`.
    #[serde(default)]
    pub bundle_date: String,
    /// Store blurb.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Suggested retail price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    /// Supported platforms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platforms: Option<Vec<String>>,
    /// Genre tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genres: Option<Vec<String>>,
    /// First credited developer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub developer: Option<String>,
    /// Aggregated review data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_rating: Option<UserRating>,
}

/// Review aggregate attached to fully detailed records.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRating {
    /// Share of positive reviews, 0.0 to 1.0 as published.
    #[serde(default)]
    pub steam_percent: f64,
    /// Review summary such as "Very Positive".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_text: Option<String>,
    /// Number of reviews.
    #[serde(default)]
    pub steam_count: u64,
}

impl GameRecord {
    /// Title-and-image record, as produced by the short extraction mode.
    pub fn short(title: impl Into<String>, image: Option<String>) -> Self {
        Self {
            title: title.into(),
            image,
            ..Self::default()
        }
    }

    /// A record is usable only with a non-blank title.
    pub fn is_valid(&self) -> bool {
        !self.title.trim().is_empty()
    }

    /// Month derived from `bundle_date`, if it names one.
    pub fn month_key(&self) -> Option<MonthKey> {
        MonthKey::from_bundle_date(&self.bundle_date)
    }

    /// Chronological ordinal of `bundle_date`.
    pub fn ordinal(&self) -> Option<u32> {
        self.month_key().map(|key| key.ordinal())
    }
}

/// How much of each game entry the page parser keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    /// Title and image only.
    #[default]
    Short,
    /// Every field the page publishes.
    Full,
}

impl FromStr for DetailLevel {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "short" => Ok(Self::Short),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown detail level `{other}` (expected short or full)")),
        }
    }
}

/// Which tier answered a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// In-process cache.
    Cache,
    /// Durable year-partitioned store.
    Store,
    /// Freshly scraped from the source page.
    Remote,
    /// The source page could not be decoded; the collection is empty because
    /// of a failure, not because nothing was offered.
    Unavailable,
    /// A range whose months were answered by different tiers.
    Mixed,
    /// No month was requested, so no tier was consulted.
    Empty,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Origin::Cache => "cache",
            Origin::Store => "store",
            Origin::Remote => "remote",
            Origin::Unavailable => "unavailable",
            Origin::Mixed => "mixed",
            Origin::Empty => "empty",
        };
        f.write_str(label)
    }
}

/// Result of resolving one month or a range of months.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameCollection {
    /// Human readable note; empty when there is nothing to report.
    pub message: String,
    /// Games in retrieval order.
    pub games: Vec<GameRecord>,
    /// Tier that produced the games.
    pub origin: Origin,
    /// Months whose source page could not be decoded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unavailable: Vec<String>,
}

impl GameCollection {
    /// Collection of `games` answered by `origin`, without a message.
    pub fn new(origin: Origin, games: Vec<GameRecord>) -> Self {
        Self {
            message: String::new(),
            games,
            origin,
            unavailable: Vec::new(),
        }
    }

    /// Empty collection recording that `month` could not be scraped.
    pub fn unavailable(month: &MonthKey, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            games: Vec::new(),
            origin: Origin::Unavailable,
            unavailable: vec![month.to_string()],
        }
    }

    /// Replace the message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Number of games.
    pub fn len(&self) -> usize {
        self.games.len()
    }

    /// True when there are no games.
    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }

    /// Append another month's result, keeping duplicates.
    pub fn append(&mut self, other: GameCollection) {
        if self.origin != other.origin {
            self.origin = Origin::Mixed;
        }
        if !other.message.is_empty() {
            if !self.message.is_empty() {
                self.message.push_str("; ");
            }
            self.message.push_str(&other.message);
        }
        self.games.extend(other.games);
        self.unavailable.extend(other.unavailable);
    }
}
