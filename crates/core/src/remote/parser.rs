use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::{
    error::ParseError,
    models::{DetailLevel, GameRecord, UserRating},
};

/// Substring of the id attribute on the script element holding the payload.
pub const PAYLOAD_MARKER: &str = "webpack-monthly-product-data";

const GAME_DATA_POINTER: &str = "/contentChoiceOptions/contentChoiceData/game_data";
const GAME_DATA_PATH: &str = "contentChoiceOptions.contentChoiceData.game_data";

static SCRIPT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b([^>]*)>(.*?)</script\s*>").expect("invalid script regex")
});

static ID_ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:^|\s)id\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("invalid id attribute regex")
});

/// Extracts game records from the JSON payload embedded in a membership page.
pub struct OfferPageParser;

impl OfferPageParser {
    /// Parse every game entry in `raw_html`.
    ///
    /// Exactly one script element must carry [`PAYLOAD_MARKER`] in its id.
    /// Individual fields fall back to their defaults on their own, so one
    /// malformed entry never aborts its siblings; entries without a title
    /// are skipped.
    pub fn parse(raw_html: &str, detail: DetailLevel) -> Result<Vec<GameRecord>, ParseError> {
        let payload = extract_payload(raw_html)?;
        let document: Value = serde_json::from_str(payload.trim())?;

        let entries: Vec<&Value> = match document.pointer(GAME_DATA_POINTER) {
            Some(Value::Object(map)) => map.values().collect(),
            Some(Value::Array(items)) => items.iter().collect(),
            _ => return Err(ParseError::MissingGameData(GAME_DATA_PATH)),
        };

        let mut games = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            let record = match detail {
                DetailLevel::Short => short_record(entry),
                DetailLevel::Full => full_record(entry),
            };
            if record.is_valid() {
                games.push(record);
            } else {
                warn!("Skipping game entry {index}: missing title");
            }
        }

        Ok(games)
    }
}

fn extract_payload(html: &str) -> Result<&str, ParseError> {
    let mut payloads = SCRIPT_RE
        .captures_iter(html)
        .filter(|caps| {
            caps.get(1)
                .and_then(|attrs| script_id(attrs.as_str()))
                .map(|id| id.contains(PAYLOAD_MARKER))
                .unwrap_or(false)
        })
        .filter_map(|caps| caps.get(2).map(|body| body.as_str()));

    let first = payloads.next().ok_or(ParseError::MissingPayload {
        marker: PAYLOAD_MARKER,
    })?;
    let others = payloads.count();
    if others > 0 {
        return Err(ParseError::AmbiguousPayload {
            marker: PAYLOAD_MARKER,
            count: others + 1,
        });
    }
    Ok(first)
}

fn script_id(attrs: &str) -> Option<&str> {
    ID_ATTR_RE
        .captures(attrs)
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)))
        .map(|m| m.as_str())
}

fn short_record(entry: &Value) -> GameRecord {
    GameRecord::short(text(entry, "title").unwrap_or_default(), text(entry, "image"))
}

fn full_record(entry: &Value) -> GameRecord {
    let rating = entry.get("user_rating");
    let steam_percent = rating
        .and_then(|rating| {
            rating.get("steam_percent|decimal").or_else(|| {
                rating
                    .get("steam_percent")
                    .map(|percent| percent.get("decimal").unwrap_or(percent))
            })
        })
        .and_then(number);
    let price = entry
        .get("msrp|money")
        .or_else(|| entry.get("msrp").and_then(|msrp| msrp.get("money")))
        .and_then(|money| money.get("amount"))
        .and_then(number);

    GameRecord {
        title: text(entry, "title").unwrap_or_default(),
        image: text(entry, "image"),
        bundle_date: String::new(),
        description: text(entry, "description"),
        price: Some(price.unwrap_or(0.0)),
        platforms: Some(string_list(entry.get("platforms"))),
        genres: Some(string_list(entry.get("genres"))),
        developer: entry
            .get("developers")
            .and_then(Value::as_array)
            .and_then(|developers| developers.first())
            .and_then(value_to_string),
        user_rating: Some(UserRating {
            steam_percent: steam_percent.unwrap_or(0.0),
            review_text: rating.and_then(|rating| text(rating, "review_text")),
            steam_count: rating
                .and_then(|rating| rating.get("steam_count"))
                .and_then(count)
                .unwrap_or(0),
        }),
    }
}

fn text(entry: &Value, key: &str) -> Option<String> {
    entry.get(key).and_then(value_to_string)
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(num) => Some(num.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(num) => num.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(num) => num
            .as_u64()
            .or_else(|| num.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(value_to_string).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page(payload: &Value) -> String {
        format!(
            r#"<html><head>
<script type="text/javascript" src="/static/app.js"></script>
<script id="webpack-monthly-product-data" type="application/json">
{payload}
</script>
</head><body><div id="webpack-monthly-product-data-decoy"></div></body></html>"#
        )
    }

    fn payload(games: Value) -> Value {
        json!({
            "contentChoiceOptions": {
                "contentChoiceData": { "game_data": games }
            }
        })
    }

    #[test]
    fn parses_full_records() -> Result<(), ParseError> {
        let html = page(&payload(json!({
            "outerwilds": {
                "title": "Outer Wilds",
                "image": "https://img.example/ow.jpg",
                "description": "A solar system in a time loop.",
                "msrp|money": { "amount": 24.99, "currency": "USD" },
                "platforms": ["windows"],
                "genres": ["Adventure", "Exploration"],
                "developers": ["Mobius Digital", "Annapurna"],
                "user_rating": {
                    "steam_percent|decimal": 0.95,
                    "review_text": "Overwhelmingly Positive",
                    "steam_count": 48211
                }
            }
        })));

        let games = OfferPageParser::parse(&html, DetailLevel::Full)?;
        assert_eq!(games.len(), 1);
        let game = &games[0];
        assert_eq!(game.title, "Outer Wilds");
        assert_eq!(game.image.as_deref(), Some("https://img.example/ow.jpg"));
        assert_eq!(game.price, Some(24.99));
        assert_eq!(game.platforms.as_deref(), Some(&["windows".to_string()][..]));
        assert_eq!(game.genres.as_ref().map(Vec::len), Some(2));
        assert_eq!(game.developer.as_deref(), Some("Mobius Digital"));
        let rating = game.user_rating.as_ref().expect("rating present");
        assert_eq!(rating.steam_percent, 0.95);
        assert_eq!(rating.review_text.as_deref(), Some("Overwhelmingly Positive"));
        assert_eq!(rating.steam_count, 48211);
        assert!(game.bundle_date.is_empty());
        Ok(())
    }

    #[test]
    fn nested_field_paths_are_accepted() -> Result<(), ParseError> {
        let html = page(&payload(json!({
            "a": {
                "title": "Nested",
                "msrp": { "money": { "amount": "19.99" } },
                "user_rating": { "steam_percent": { "decimal": 0.8 }, "steam_count": "12" }
            }
        })));
        let games = OfferPageParser::parse(&html, DetailLevel::Full)?;
        assert_eq!(games[0].price, Some(19.99));
        let rating = games[0].user_rating.as_ref().expect("rating present");
        assert_eq!(rating.steam_percent, 0.8);
        assert_eq!(rating.steam_count, 12);
        Ok(())
    }

    #[test]
    fn missing_fields_degrade_independently() -> Result<(), ParseError> {
        let html = page(&payload(json!({
            "a": { "title": "Bare" },
            "b": { "title": "No developers", "developers": [], "platforms": "windows" },
            "c": { "image": "https://img.example/untitled.png" }
        })));

        let games = OfferPageParser::parse(&html, DetailLevel::Full)?;
        assert_eq!(games.len(), 2, "untitled entry is skipped");

        let bare = &games[0];
        assert_eq!(bare.platforms, Some(Vec::new()));
        assert_eq!(bare.genres, Some(Vec::new()));
        assert_eq!(bare.price, Some(0.0));
        assert_eq!(bare.developer, None);
        let rating = bare.user_rating.as_ref().expect("rating defaults");
        assert_eq!(rating.steam_percent, 0.0);
        assert_eq!(rating.steam_count, 0);
        assert_eq!(rating.review_text, None);

        assert_eq!(games[1].developer, None);
        assert_eq!(games[1].platforms, Some(Vec::new()));
        Ok(())
    }

    #[test]
    fn short_format_keeps_title_and_image_only() -> Result<(), ParseError> {
        let html = page(&payload(json!({
            "a": { "title": "Short", "image": "i.png", "genres": ["RPG"] }
        })));
        let games = OfferPageParser::parse(&html, DetailLevel::Short)?;
        assert_eq!(games, vec![GameRecord::short("Short", Some("i.png".into()))]);
        Ok(())
    }

    #[test]
    fn empty_game_data_is_not_an_error() -> Result<(), ParseError> {
        let html = page(&payload(json!({})));
        assert!(OfferPageParser::parse(&html, DetailLevel::Full)?.is_empty());
        Ok(())
    }

    #[test]
    fn payload_node_must_be_unique() {
        let missing = "<html><script id=\"other\">{}</script></html>";
        assert!(matches!(
            OfferPageParser::parse(missing, DetailLevel::Short),
            Err(ParseError::MissingPayload { .. })
        ));

        let body = payload(json!({}));
        let twice = format!(
            "<script id='webpack-monthly-product-data'>{body}</script>\
             <script id=\"x-webpack-monthly-product-data\">{body}</script>"
        );
        assert!(matches!(
            OfferPageParser::parse(&twice, DetailLevel::Short),
            Err(ParseError::AmbiguousPayload { count: 2, .. })
        ));
    }

    #[test]
    fn missing_game_data_path_is_an_error() {
        let html = page(&json!({ "contentChoiceOptions": {} }));
        assert!(matches!(
            OfferPageParser::parse(&html, DetailLevel::Full),
            Err(ParseError::MissingGameData(_))
        ));

        let broken = "<script id=\"webpack-monthly-product-data\">{not json</script>";
        assert!(matches!(
            OfferPageParser::parse(broken, DetailLevel::Full),
            Err(ParseError::InvalidJson(_))
        ));
    }
}
