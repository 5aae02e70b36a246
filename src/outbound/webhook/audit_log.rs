//! # Delivery Audit Log
//!
//! One immutable row per HTTP attempt. Rows are only ever appended; the
//! management surface reads them back newest-first.
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

/// Longest response body kept on an audit row, in bytes.
pub const MAX_STORED_RESPONSE_BYTES: usize = 2048;

/// Error type for audit store operations
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Audit store unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// DeliveryAttempt
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub subscription_id: Uuid,
    /// Groups the attempts of one delivery session
    pub session_id: Uuid,
    pub event: String,
    /// Envelope snapshot exactly as it was signed
    pub payload: Value,
    /// 1-based attempt number within the session
    pub attempt: u32,
    /// 0 when no HTTP response was received
    pub status_code: u16,
    pub response_body: Option<String>,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl DeliveryAttempt {
    /// Create a new attempt row with a generated id and the current UTC time.
    pub fn new(
        subscription_id: Uuid,
        session_id: Uuid,
        event: impl Into<String>,
        payload: Value,
        attempt: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscription_id,
            session_id,
            event: event.into(),
            payload,
            attempt,
            status_code: 0,
            response_body: None,
            duration_ms: 0,
            success: false,
            error: None,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Record the HTTP outcome. The body is truncated to
    /// [`MAX_STORED_RESPONSE_BYTES`] on a char boundary.
    pub fn with_response(mut self, status_code: u16, body: Option<String>) -> Self {
        self.status_code = status_code;
        self.success = (200..300).contains(&status_code);
        self.response_body = body.map(|b| truncate(b, MAX_STORED_RESPONSE_BYTES));
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

pub(crate) fn truncate(mut text: String, max_bytes: usize) -> String {
    if text.len() > max_bytes {
        let mut cut = max_bytes;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

// ============================================================================
// AuditQuery
// ============================================================================

/// Filter criteria for querying stored attempts.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub subscription_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub event: Option<String>,
    /// Maximum number of rows to return.
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn for_subscription(subscription_id: Uuid) -> Self {
        Self {
            subscription_id: Some(subscription_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, attempt: &DeliveryAttempt) -> bool {
        if let Some(id) = self.subscription_id
            && attempt.subscription_id != id
        {
            return false;
        }
        if let Some(id) = self.session_id
            && attempt.session_id != id
        {
            return false;
        }
        if let Some(ref event) = self.event
            && &attempt.event != event
        {
            return false;
        }
        true
    }
}

// ============================================================================
// AuditStore trait
// ============================================================================

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append a new row. Rows are never modified afterwards.
    async fn append(&self, attempt: &DeliveryAttempt) -> Result<(), AuditError>;

    /// Rows matching `filter`, newest first.
    async fn query(&self, filter: &AuditQuery) -> Result<Vec<DeliveryAttempt>, AuditError>;

    /// Return the total number of stored rows.
    async fn count(&self) -> Result<usize, AuditError>;

    /// The latest `limit` attempts for one subscription, newest first.
    async fn recent_deliveries(
        &self,
        subscription_id: Uuid,
        limit: usize,
    ) -> Result<Vec<DeliveryAttempt>, AuditError> {
        let mut filter = AuditQuery::for_subscription(subscription_id);
        filter.limit = Some(limit);
        self.query(&filter).await
    }
}

// ============================================================================
// InMemoryAuditStore
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct InMemoryAuditStore {
    attempts: Arc<Mutex<Vec<DeliveryAttempt>>>,
}

impl InMemoryAuditStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<DeliveryAttempt>>, AuditError> {
        self.attempts
            .lock()
            .map_err(|e| AuditError::Unavailable(format!("InMemoryAuditStore lock poisoned: {e}")))
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, attempt: &DeliveryAttempt) -> Result<(), AuditError> {
        self.lock()?.push(attempt.clone());
        Ok(())
    }

    async fn query(&self, filter: &AuditQuery) -> Result<Vec<DeliveryAttempt>, AuditError> {
        let attempts = self.lock()?;

        // Appended in time order, so reverse insertion order is newest first.
        let matching = attempts.iter().rev().filter(|a| filter.matches(a)).cloned();
        let results = match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        };
        Ok(results)
    }

    async fn count(&self) -> Result<usize, AuditError> {
        Ok(self.lock()?.len())
    }
}
