use crate::models::{ContentItem, MediaType};
use crate::sources::{AdapterResult, ApiRecord, RawRecord, ScrapedRecord};
use regex::Regex;
use reqwest::Url;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::OnceLock;

const NOT_AVAILABLE: &str = "N/A";

fn year_regex() -> &'static Regex {
    static YEAR: OnceLock<Regex> = OnceLock::new();
    YEAR.get_or_init(|| Regex::new(r"^\s*(\d{4})(?:$|[^\d])").unwrap())
}

/// Maps adapter records onto [`ContentItem`]s
#[derive(Debug, Clone)]
pub struct Normalizer {
    image_prefix: String,
}

impl Normalizer {
    pub fn new(image_prefix: impl Into<String>) -> Self {
        Self {
            image_prefix: image_prefix.into(),
        }
    }

    pub fn image_prefix(&self) -> &str {
        &self.image_prefix
    }

    /// Normalize one adapter result, keeping source order.
    ///
    /// Records without a usable id are dropped, as are repeats of an
    /// identity already seen on the page.
    pub fn normalize(&self, result: AdapterResult) -> Vec<ContentItem> {
        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(result.records.len());
        let mut dropped = 0;

        for record in result.records {
            let item = match record {
                RawRecord::Api(record) => self.from_api(record, result.media_type),
                RawRecord::Scraped(record) => self.from_scraped(record, result.media_type),
            };
            match item {
                Some(item) if seen.insert(item.identity()) => items.push(item),
                _ => dropped += 1,
            }
        }

        if dropped > 0 {
            log::debug!("Dropped {} records without a usable identity", dropped);
        }
        items
    }

    fn from_api(&self, record: ApiRecord, fallback: MediaType) -> Option<ContentItem> {
        let id = record.id.as_ref().and_then(api_id)?;
        let media_type = record
            .media_type
            .as_deref()
            .and_then(MediaType::from_label)
            .unwrap_or(fallback);

        let title = non_empty(record.title)
            .or_else(|| non_empty(record.name))
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());

        let date = non_empty(record.release_date).or_else(|| non_empty(record.first_air_date));

        Some(ContentItem::new(
            id,
            title,
            leading_year(date.as_deref()),
            self.poster_url(record.poster_path.as_deref()),
            media_type,
        ))
    }

    fn from_scraped(&self, record: ScrapedRecord, media_type: MediaType) -> Option<ContentItem> {
        let id = record
            .id_hint
            .as_deref()
            .and_then(|hint| hint.trim().parse::<i64>().ok())
            .or_else(|| link_id(&record.link))?;

        let title = non_empty(Some(record.title)).unwrap_or_else(|| NOT_AVAILABLE.to_string());

        Some(ContentItem::new(
            id,
            title,
            leading_year(record.year.as_deref()),
            self.poster_url(record.poster.as_deref()),
            media_type,
        ))
    }

    /// Absolute URLs pass through; anything else is appended to the prefix
    pub fn poster_url(&self, path: Option<&str>) -> Option<String> {
        let path = path.map(str::trim).filter(|p| !p.is_empty())?;
        if path.starts_with("http://") || path.starts_with("https://") {
            Some(path.to_string())
        } else {
            Some(format!("{}{}", self.image_prefix, path))
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Upstream ids arrive as numbers, occasionally as numeric strings
fn api_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Leading four-digit year of a date-like string
pub fn leading_year(date: Option<&str>) -> String {
    date.and_then(|d| year_regex().captures(d))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// Numeric id embedded in an item link, searching path segments from the
/// last one back. `/movie/550-fight-club` gives 550.
pub fn link_id(link: &str) -> Option<i64> {
    let path = match Url::parse(link) {
        Ok(url) => url.path().to_string(),
        Err(_) => link.split(['?', '#']).next().unwrap_or_default().to_string(),
    };

    path.split('/')
        .rev()
        .filter(|segment| !segment.is_empty())
        .find_map(|segment| {
            let digits: String = segment.chars().take_while(char::is_ascii_digit).collect();
            if digits.is_empty() {
                None
            } else {
                digits.parse().ok()
            }
        })
}
