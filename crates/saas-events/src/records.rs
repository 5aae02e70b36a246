//! Plain domain records handed to the webhook notification helpers.
//!
//! Producers pass their records as-is; the dispatcher decides which fields
//! leave the process. Fields such as password hashes, processor references
//! or ledger accounts are carried here only because the owning modules hold
//! them, and are never copied into an envelope.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// A settled, failed or refunded charge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: Uuid,
    pub account_id: Uuid,
    pub customer_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub method: String,
    pub card_last4: Option<String>,
    pub processor_reference: String,
    pub failure_reason: Option<String>,
    pub refunded_amount_cents: Option<i64>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A customer's recurring plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BillingSubscription {
    pub id: Uuid,
    pub account_id: Uuid,
    pub customer_id: Uuid,
    pub plan_id: String,
    pub status: String,
    #[serde(with = "time::serde::rfc3339")]
    pub current_period_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub current_period_end: OffsetDateTime,
    pub cancel_reason: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cancelled_at: Option<OffsetDateTime>,
    pub internal_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub account_id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
    pub password_hash: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A ledger movement (charge, refund, payout, tax adjustment).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: Uuid,
    pub account_id: Uuid,
    pub kind: String,
    pub amount_cents: i64,
    pub tax_cents: i64,
    pub currency: String,
    pub reference: Option<String>,
    pub ledger_account: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contract {
    pub id: Uuid,
    pub account_id: Uuid,
    pub customer_id: Uuid,
    pub title: String,
    pub value_cents: i64,
    pub currency: String,
    pub signed_by: String,
    #[serde(with = "time::serde::rfc3339")]
    pub signed_at: OffsetDateTime,
    pub document_url: String,
}
