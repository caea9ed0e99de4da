/// Metrics for catalog sources
///
/// Tracks success rates, error kinds and response times for each category

use crate::error::SourceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMetrics {
    pub source_name: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub average_response_time_ms: f64,
    pub total_response_time_ms: u64,
    pub items_served: u64,
    /// Failures by error kind, e.g. `timeout` or `bad_status`
    pub errors_by_kind: BTreeMap<String, u64>,
}

impl SourceMetrics {
    pub fn new(source_name: String) -> Self {
        Self {
            source_name,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            last_success: None,
            last_failure: None,
            last_error: None,
            average_response_time_ms: 0.0,
            total_response_time_ms: 0,
            items_served: 0,
            errors_by_kind: BTreeMap::new(),
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.successful_requests as f64 / self.total_requests as f64) * 100.0
        }
    }

    pub fn record_success(&mut self, response_time: Duration, items: usize) {
        self.total_requests += 1;
        self.successful_requests += 1;
        self.items_served += items as u64;
        self.last_success = Some(Utc::now());

        let response_ms = response_time.as_millis() as u64;
        self.total_response_time_ms += response_ms;
        self.average_response_time_ms =
            self.total_response_time_ms as f64 / self.successful_requests as f64;
    }

    pub fn record_failure(&mut self, error: &SourceError) {
        self.total_requests += 1;
        self.failed_requests += 1;
        self.last_failure = Some(Utc::now());
        self.last_error = Some(error.to_string());
        *self
            .errors_by_kind
            .entry(error.kind().to_string())
            .or_insert(0) += 1;
    }
}

/// Per-category metrics shared by all handlers
#[derive(Clone, Default)]
pub struct MetricsTracker {
    metrics: Arc<Mutex<HashMap<String, SourceMetrics>>>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SourceMetrics>> {
        self.metrics.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_success(&self, source_name: &str, response_time: Duration, items: usize) {
        let mut metrics = self.lock();
        let source_metrics = metrics
            .entry(source_name.to_string())
            .or_insert_with(|| SourceMetrics::new(source_name.to_string()));
        source_metrics.record_success(response_time, items);

        log::info!(
            "[{}] Loaded {} items in {}ms - Success rate: {:.2}%",
            source_name,
            items,
            response_time.as_millis(),
            source_metrics.success_rate()
        );
    }

    pub fn record_failure(&self, source_name: &str, error: &SourceError) {
        let mut metrics = self.lock();
        let source_metrics = metrics
            .entry(source_name.to_string())
            .or_insert_with(|| SourceMetrics::new(source_name.to_string()));
        source_metrics.record_failure(error);

        log::warn!(
            "[{}] Failure ({}) - Success rate: {:.2}%",
            source_name,
            error.kind(),
            source_metrics.success_rate()
        );
    }

    pub fn get_metrics(&self, source_name: &str) -> Option<SourceMetrics> {
        self.lock().get(source_name).cloned()
    }

    /// All sources, ordered by name
    pub fn get_all_metrics(&self) -> Vec<SourceMetrics> {
        let mut all: Vec<_> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| a.source_name.cmp(&b.source_name));
        all
    }
}
