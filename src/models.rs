use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Tv,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Tv => "tv",
        }
    }

    /// Parse the `media_type` labels used by the upstream API
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "movie" | "movies" => Some(MediaType::Movie),
            "tv" | "show" | "series" => Some(MediaType::Tv),
            _ => None,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A catalog entry as served to the client.
///
/// Only the normalizer builds these; fields are read through accessors so an
/// item cannot change after construction.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ContentItem {
    id: i64,
    title: String,
    year: String,
    poster_url: Option<String>,
    media_type: MediaType,
}

impl ContentItem {
    pub fn new(
        id: i64,
        title: String,
        year: String,
        poster_url: Option<String>,
        media_type: MediaType,
    ) -> Self {
        Self {
            id,
            title,
            year,
            poster_url,
            media_type,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn year(&self) -> &str {
        &self.year
    }

    pub fn poster_url(&self) -> Option<&str> {
        self.poster_url.as_deref()
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    /// Items are the same title when media type and id match
    pub fn identity(&self) -> (MediaType, i64) {
        (self.media_type, self.id)
    }
}

/// Cache key for one page of one category
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub category: String,
    pub page: u32,
}

impl CacheKey {
    pub fn new(category: impl Into<String>, page: u32) -> Self {
        Self {
            category: category.into(),
            page,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.page)
    }
}
