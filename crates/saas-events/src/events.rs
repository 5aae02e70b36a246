use serde::{Deserialize, Serialize};

/// Name of a webhook-visible domain event, in `entity.verb` form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct EventName(pub String);

impl EventName {
    pub const PAYMENT_COMPLETED: &str = "payment.completed";
    pub const PAYMENT_FAILED: &str = "payment.failed";
    pub const PAYMENT_REFUNDED: &str = "payment.refunded";
    pub const SUBSCRIPTION_CREATED: &str = "subscription.created";
    pub const SUBSCRIPTION_RENEWED: &str = "subscription.renewed";
    pub const SUBSCRIPTION_CANCELLED: &str = "subscription.cancelled";
    pub const USER_CREATED: &str = "user.created";
    pub const USER_DELETED: &str = "user.deleted";
    pub const TRANSACTION_CREATED: &str = "transaction.created";
    pub const CONTRACT_SIGNED: &str = "contract.signed";

    /// Synthetic event sent by operator-triggered test deliveries.
    pub const WEBHOOK_TEST: &str = "webhook.test";

    /// Every event a subscription may register for.
    pub const CATALOG: [&str; 10] = [
        Self::PAYMENT_COMPLETED,
        Self::PAYMENT_FAILED,
        Self::PAYMENT_REFUNDED,
        Self::SUBSCRIPTION_CREATED,
        Self::SUBSCRIPTION_RENEWED,
        Self::SUBSCRIPTION_CANCELLED,
        Self::USER_CREATED,
        Self::USER_DELETED,
        Self::TRANSACTION_CREATED,
        Self::CONTRACT_SIGNED,
    ];

    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the name belongs to the published catalog.
    pub fn is_known(name: &str) -> bool {
        Self::CATALOG.contains(&name)
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EventName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
