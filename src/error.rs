//! Error taxonomy for the acquisition pipeline.
//!
//! Every error is `Clone` because a single in-flight load hands the same
//! outcome to every request waiting on that key.

/// A single stealth patch could not be installed. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShimError {
    #[error("{0} is not configurable")]
    NotConfigurable(String),

    #[error("{0} is not available in this environment")]
    Missing(String),

    #[error("patch {0} panicked")]
    Panicked(String),
}

/// The scrape adapter could not produce usable output
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquisitionError {
    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Page markup did not match the expected structure: {0}")]
    SchemaMismatch(String),

    #[error("Browser session error: {0}")]
    Session(String),
}

impl AcquisitionError {
    pub fn kind(&self) -> &'static str {
        match self {
            AcquisitionError::Timeout(_) => "timeout",
            AcquisitionError::SchemaMismatch(_) => "schema_mismatch",
            AcquisitionError::Session(_) => "session",
        }
    }
}

/// The upstream metadata API failed or answered with an unexpected shape
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("Upstream responded with status {0}")]
    BadStatus(u16),

    #[error("Malformed upstream payload: {0}")]
    MalformedPayload(String),

    #[error("Upstream request failed: {0}")]
    Transport(String),
}

impl UpstreamError {
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::BadStatus(_) => "bad_status",
            UpstreamError::MalformedPayload(_) => "malformed_payload",
            UpstreamError::Transport(_) => "transport",
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        UpstreamError::Transport(e.to_string())
    }
}

/// Anything that can go wrong while loading a page for the router
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Loader task failed: {0}")]
    Internal(String),
}

impl SourceError {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Acquisition(e) => e.kind(),
            SourceError::Upstream(e) => e.kind(),
            SourceError::UnknownCategory(_) => "unknown_category",
            SourceError::Internal(_) => "internal",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
