//! `month-YYYY` tokens, chronological ordinals and inclusive month ranges.

use std::{fmt, ops::RangeInclusive, str::FromStr};

use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::MonthKeyError;

const MONTHS: [(&str, &str); 12] = [
    ("january", "jan"),
    ("february", "feb"),
    ("march", "mar"),
    ("april", "apr"),
    ("may", "may"),
    ("june", "jun"),
    ("july", "jul"),
    ("august", "aug"),
    ("september", "sep"),
    ("october", "oct"),
    ("november", "nov"),
    ("december", "dec"),
];

const MIN_YEAR: u16 = 1000;
const MAX_YEAR: u16 = 9999;

static YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})\b").expect("invalid year regex"));

/// One calendar month, displayed canonically as `september-2024`.
///
/// Field order makes the derived `Ord` chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthKey {
    year: u16,
    month: u8,
}

impl MonthKey {
    /// Build a key from a year and a 1-based month number.
    pub fn new(year: u16, month: u8) -> Option<Self> {
        ((1..=12).contains(&month) && (MIN_YEAR..=MAX_YEAR).contains(&year))
            .then_some(Self { year, month })
    }

    /// Month containing the current UTC date.
    pub fn current() -> Self {
        let today = Utc::now().date_naive();
        Self {
            year: today.year() as u16,
            month: today.month() as u8,
        }
    }

    /// Calendar year.
    pub fn year(&self) -> u16 {
        self.year
    }

    /// Month number, 1 through 12.
    pub fn month(&self) -> u8 {
        self.month
    }

    /// Full lowercase month name.
    pub fn month_name(&self) -> &'static str {
        MONTHS[usize::from(self.month - 1)].0
    }

    /// `year * 100 + month`, e.g. `202409`.
    pub fn ordinal(&self) -> u32 {
        u32::from(self.year) * 100 + u32::from(self.month)
    }

    /// The following calendar month, rolling into January of the next year.
    pub fn succ(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// The month `months` calendar months before this one, saturating at
    /// `january-1000`.
    pub fn months_before(&self, months: u32) -> Self {
        let earliest = i64::from(MIN_YEAR) * 12;
        let index = (i64::from(self.year) * 12 + i64::from(self.month) - 1) - i64::from(months);
        let index = index.max(earliest);
        Self {
            year: (index / 12) as u16,
            month: (index % 12 + 1) as u8,
        }
    }

    /// Ascending, inclusive sequence of months from `start` to `end`.
    ///
    /// Empty when `start` is after `end`.
    pub fn iterate(start: MonthKey, end: MonthKey) -> Months {
        DateRange::new(start, end).iter()
    }

    /// Best-effort month derivation from a stored `bundle_date`.
    ///
    /// Unlike [`MonthKey::from_str`] this accepts anything that contains a
    /// month name and a standalone four digit year, which is what stored
    /// records are matched against.
    pub fn from_bundle_date(bundle_date: &str) -> Option<Self> {
        let year = year_of(bundle_date)?;
        let month = month_of(bundle_date)?;
        Self::new(year, month)
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:04}", self.month_name(), self.year)
    }
}

impl FromStr for MonthKey {
    type Err = MonthKeyError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let lower = input.trim().to_lowercase();
        let (name, year) = lower
            .split_once('-')
            .filter(|(_, year)| !year.contains('-'))
            .ok_or_else(|| MonthKeyError::Format(input.to_string()))?;

        let year = parse_year(year.trim())?;
        let month =
            month_number(name.trim()).ok_or_else(|| MonthKeyError::UnknownMonth(name.to_string()))?;
        Ok(Self { year, month })
    }
}

/// Validate a bare year string: exactly four ASCII digits.
pub fn parse_year(input: &str) -> Result<u16, MonthKeyError> {
    if input.len() != 4 || !input.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MonthKeyError::InvalidYear(input.to_string()));
    }
    input
        .parse()
        .map_err(|_| MonthKeyError::InvalidYear(input.to_string()))
}

/// Month number for an exact full name or abbreviation (case-sensitive, lowercase).
fn month_number(name: &str) -> Option<u8> {
    MONTHS
        .iter()
        .position(|(full, short)| name == *full || name == *short)
        .map(|index| index as u8 + 1)
}

/// First standalone four digit run in `bundle_date`.
pub fn year_of(bundle_date: &str) -> Option<u16> {
    YEAR_RE
        .captures(bundle_date)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Month mentioned anywhere in `bundle_date`; full names win over abbreviations.
pub fn month_of(bundle_date: &str) -> Option<u8> {
    let lower = bundle_date.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }
    MONTHS
        .iter()
        .position(|(full, _)| lower.contains(full))
        .or_else(|| MONTHS.iter().position(|(_, short)| lower.contains(short)))
        .map(|index| index as u8 + 1)
}

/// Inclusive span of months.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: MonthKey,
    end: MonthKey,
}

impl DateRange {
    /// Range from `start` to `end`, both inclusive.
    pub fn new(start: MonthKey, end: MonthKey) -> Self {
        Self { start, end }
    }

    /// Parse both ends, failing on the first invalid token.
    pub fn parse(start: &str, end: &str) -> Result<Self, MonthKeyError> {
        Ok(Self::new(start.parse()?, end.parse()?))
    }

    /// From `months` months ago through the current month, both inclusive.
    pub fn recent(months: u32) -> Self {
        let end = MonthKey::current();
        Self::new(end.months_before(months), end)
    }

    /// First month.
    pub fn start(&self) -> MonthKey {
        self.start
    }

    /// Last month.
    pub fn end(&self) -> MonthKey {
        self.end
    }

    /// True when `start` is after `end`.
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    /// Ordinal containment check.
    pub fn contains_ordinal(&self, ordinal: u32) -> bool {
        (self.start.ordinal()..=self.end.ordinal()).contains(&ordinal)
    }

    /// Every year the range touches.
    pub fn years(&self) -> RangeInclusive<u16> {
        if self.is_empty() {
            return RangeInclusive::new(1, 0);
        }
        self.start.year..=self.end.year
    }

    /// Ascending months of the range.
    pub fn iter(&self) -> Months {
        Months {
            next: (!self.is_empty()).then_some(self.start),
            end: self.end,
        }
    }
}

impl IntoIterator for DateRange {
    type Item = MonthKey;
    type IntoIter = Months;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for &DateRange {
    type Item = MonthKey;
    type IntoIter = Months;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`DateRange`].
#[derive(Debug, Clone)]
pub struct Months {
    next: Option<MonthKey>,
    end: MonthKey,
}

impl Iterator for Months {
    type Item = MonthKey;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = (current < self.end).then(|| current.succ());
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(token: &str) -> MonthKey {
        token.parse().expect("valid month token")
    }

    #[test]
    fn parses_full_names_and_abbreviations() {
        assert_eq!(key("September-2024"), MonthKey::new(2024, 9).unwrap());
        assert_eq!(key("sep-2024"), MonthKey::new(2024, 9).unwrap());
        assert_eq!(key("  MAY-2023 "), MonthKey::new(2023, 5).unwrap());
        assert_eq!(key("dec-1999").to_string(), "december-1999");
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(matches!(
            "september2024".parse::<MonthKey>(),
            Err(MonthKeyError::Format(_))
        ));
        assert!(matches!(
            "sept-2024".parse::<MonthKey>(),
            Err(MonthKeyError::UnknownMonth(_))
        ));
        assert!(matches!(
            "june-24".parse::<MonthKey>(),
            Err(MonthKeyError::InvalidYear(_))
        ));
        assert!(matches!(
            "june-2024-01".parse::<MonthKey>(),
            Err(MonthKeyError::Format(_))
        ));
        assert!(parse_year("20x4").is_err());
        assert_eq!(parse_year("2024"), Ok(2024));
    }

    #[test]
    fn ordinal_orders_across_years() {
        assert_eq!(key("september-2024").ordinal(), 202409);
        assert!(key("december-2023").ordinal() < key("january-2024").ordinal());
        assert!(key("december-2023") < key("january-2024"));
    }

    #[test]
    fn iterates_inclusively_across_year_boundary() {
        let months: Vec<String> = MonthKey::iterate(key("november-2024"), key("february-2025"))
            .map(|m| m.to_string())
            .collect();
        assert_eq!(
            months,
            vec!["november-2024", "december-2024", "january-2025", "february-2025"]
        );
    }

    #[test]
    fn reversed_range_is_empty() {
        let range = DateRange::parse("march-2024", "june-2023").unwrap();
        assert!(range.is_empty());
        assert_eq!(range.iter().count(), 0);
        assert_eq!(range.years().count(), 0);

        let single = DateRange::parse("june-2023", "jun-2023").unwrap();
        assert_eq!(single.iter().count(), 1);
    }

    #[test]
    fn derives_year_and_month_from_bundle_dates() {
        assert_eq!(year_of("march-2024"), Some(2024));
        assert_eq!(year_of("unknown"), None);
        assert_eq!(year_of("12345"), None);
        assert_eq!(month_of("june-2023"), Some(6));
        assert_eq!(month_of("Jun 2023"), Some(6));
        assert_eq!(month_of(""), None);
        assert_eq!(
            MonthKey::from_bundle_date("october-2022"),
            MonthKey::new(2022, 10)
        );
    }

    #[test]
    fn steps_backwards_over_year_boundary() {
        assert_eq!(key("february-2025").months_before(3), key("november-2024"));
        assert_eq!(key("february-2025").months_before(0), key("february-2025"));
    }

    #[test]
    fn stepping_back_stops_at_the_earliest_year() {
        let earliest = key("january-1000");
        assert_eq!(key("march-1000").months_before(5), earliest);
        assert_eq!(key("december-9999").months_before(u32::MAX), earliest);
        assert_eq!(earliest.months_before(1).to_string(), "january-1000");
    }

    #[test]
    fn recent_range_ends_this_month() {
        let range = DateRange::recent(6);
        assert_eq!(range.end(), MonthKey::current());
        assert_eq!(range.iter().count(), 7);
        assert!(!DateRange::recent(0).is_empty());
    }
}
