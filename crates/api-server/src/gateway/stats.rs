//! Per-connection delivery counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone)]
struct LastFailure {
    at: DateTime<Utc>,
    reason: String,
}

/// Outcome counters for sends made on behalf of broadcasts.
///
/// Counters only grow. The last failure time and reason are updated as one
/// unit under a lock.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    total_sent: AtomicU64,
    failed_deliveries: AtomicU64,
    last_failure: Mutex<Option<LastFailure>>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatsSnapshot {
    pub total_sent: u64,
    pub failed_deliveries: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_reason: Option<String>,
}

impl DeliveryStats {
    pub fn record_success(&self) {
        self.total_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, reason: impl Into<String>) {
        self.failed_deliveries.fetch_add(1, Ordering::Relaxed);
        let mut last = self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *last = Some(LastFailure {
            at: Utc::now(),
            reason: reason.into(),
        });
    }

    pub fn total_sent(&self) -> u64 {
        self.total_sent.load(Ordering::Relaxed)
    }

    pub fn failed_deliveries(&self) -> u64 {
        self.failed_deliveries.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> DeliveryStatsSnapshot {
        let last = self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        DeliveryStatsSnapshot {
            total_sent: self.total_sent(),
            failed_deliveries: self.failed_deliveries(),
            last_failure_time: last.as_ref().map(|failure| failure.at),
            last_failure_reason: last.map(|failure| failure.reason),
        }
    }
}
