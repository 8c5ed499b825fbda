//! Reply delivery tracking
//!
//! Every dispatch produces a [`DeliveryRecord`] listing each attempt, the
//! route it took and how it ended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delivery status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Not attempted yet
    Pending,
    /// Delivered successfully
    Delivered,
    /// Failed, another attempt follows
    Retrying,
    /// Failed permanently
    Failed,
    /// Nothing was sent (e.g. no reply token on a failure path)
    Skipped,
}

/// Provider endpoint used for an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryRoute {
    /// Reply API, addressed by reply token
    Reply,
    /// Push API, addressed by user, group or room id
    Push,
}

/// Single delivery attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    /// Attempt number across all routes (0-indexed)
    pub attempt_number: u32,
    pub route: DeliveryRoute,
    pub status: DeliveryStatus,
    /// HTTP status code (if any)
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Delivery record for one reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: String,
    /// Push target
    pub destination: String,
    pub status: DeliveryStatus,
    pub attempts: Vec<DeliveryAttempt>,
    /// Whether the push API was used because the reply token was rejected
    pub fell_back: bool,
    /// Final error, if delivery failed
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DeliveryRecord {
    pub fn new(destination: &str) -> Self {
        Self {
            id: format!("dlv_{}", uuid::Uuid::new_v4().simple()),
            destination: destination.to_string(),
            status: DeliveryStatus::Pending,
            attempts: Vec::new(),
            fell_back: false,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Record for a reply that was deliberately not sent
    pub fn skipped(destination: &str, reason: &str) -> Self {
        let mut record = Self::new(destination);
        record.status = DeliveryStatus::Skipped;
        record.error = Some(reason.to_string());
        record.completed_at = Some(Utc::now());
        record
    }

    pub(crate) fn complete(&mut self, status: DeliveryStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.completed_at = Some(Utc::now());
    }

    /// Get total duration across all attempts
    pub fn total_duration_ms(&self) -> u64 {
        self.attempts.iter().map(|a| a.duration_ms).sum()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_success(&self) -> bool {
        self.status == DeliveryStatus::Delivered
    }

    /// Route of the last attempt
    pub fn final_route(&self) -> Option<DeliveryRoute> {
        self.attempts.last().map(|a| a.route)
    }

    pub fn last_attempt(&self) -> Option<&DeliveryAttempt> {
        self.attempts.last()
    }
}

/// Retry configuration for reply dispatch
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries per route after the first attempt
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
    /// Jitter factor (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// No waiting between attempts
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    /// Calculate delay before a given retry (1-indexed)
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(retry as i32 - 1);

        // Apply jitter
        let jitter = if self.jitter_factor > 0.0 {
            let range = base_delay * self.jitter_factor;
            (rand::random::<f64>() - 0.5) * 2.0 * range
        } else {
            0.0
        };

        let delay_ms = (base_delay + jitter)
            .min(self.max_delay.as_millis() as f64)
            .max(0.0);
        Duration::from_millis(delay_ms as u64)
    }
}
