use std::collections::BTreeSet;

use rand::RngCore;
use reqwest::Url;
use reqwest::header::{HeaderName, HeaderValue};
use saas_events::EventName;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::retry_strategy::RetryPolicy;

/// Headers the delivery engine sets itself. Subscriptions may not override them.
pub const MANAGED_HEADERS: [&str; 8] = [
    "content-type",
    "content-length",
    "host",
    "user-agent",
    "x-webhook-signature",
    "x-webhook-event",
    "x-webhook-attempt",
    "x-webhook-delivery",
];

const GENERATED_SECRET_PREFIX: &str = "whsec_";

/// Lifecycle status of a subscription.
///
/// `Disabled` is terminal: it is what a delete leaves behind so that audit
/// rows still resolve to a subscription.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    #[default]
    Active,
    Disabled,
}

/// Extra header sent with every delivery (e.g. an `Authorization` token).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthHeader {
    pub name: String,

    /// Write-only, like the signing secret. Absent when read back from the
    /// API, so registration rejects an empty value.
    #[serde(skip_serializing, default)]
    pub value: String,
}

impl AuthHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Delivery counters, updated once per finished delivery session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
}

impl DeliveryStats {
    pub fn record(&mut self, success: bool) {
        self.total += 1;
        if success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Webhook subscription configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookSubscription {
    pub id: Uuid,

    /// Owning tenant account
    pub account_id: String,

    pub name: String,

    pub url: String,

    #[serde(skip_serializing, default)]
    pub secret: String,

    pub events: BTreeSet<String>,

    pub enabled: bool,

    pub status: SubscriptionStatus,

    pub retry_policy: RetryPolicy,

    pub max_retries: u32,

    pub timeout_seconds: u64,

    pub verify_ssl: bool,

    pub auth_headers: Vec<AuthHeader>,

    pub delivery_stats: DeliveryStats,

    #[serde(with = "time::serde::rfc3339::option", default)]
    pub last_delivery_at: Option<OffsetDateTime>,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl WebhookSubscription {
    /// Create a new webhook subscription with default delivery settings
    pub fn new(
        account_id: impl Into<String>,
        url: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            account_id: account_id.into(),
            name: String::new(),
            url: url.into(),
            secret: secret.into(),
            events: BTreeSet::new(),
            enabled: true,
            status: SubscriptionStatus::Active,
            retry_policy: RetryPolicy::default(),
            max_retries: SubscriptionDefaults::default().max_retries,
            timeout_seconds: SubscriptionDefaults::default().timeout_seconds,
            verify_ssl: true,
            auth_headers: Vec::new(),
            delivery_stats: DeliveryStats::default(),
            last_delivery_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Subscribe to specific event names
    pub fn subscribe_to<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events = events.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set maximum delivery attempts per session
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_verify_ssl(mut self, verify_ssl: bool) -> Self {
        self.verify_ssl = verify_ssl;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth_headers.push(AuthHeader::new(name, value));
        self
    }

    /// Active and switched on
    pub fn is_deliverable(&self) -> bool {
        self.enabled && self.status == SubscriptionStatus::Active
    }

    /// Check if this subscription should receive a given event
    pub fn matches_event(&self, event: &str) -> bool {
        self.is_deliverable() && self.events.contains(event)
    }

    /// Disable this subscription
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Enable this subscription
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Check every registration-time rule.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_url(&self.url)?;

        if self.secret.trim().is_empty() {
            return Err(ValidationError::MissingSecret);
        }

        if self.events.is_empty() {
            return Err(ValidationError::NoEvents);
        }
        if let Some(unknown) = self.events.iter().find(|e| !EventName::is_known(e)) {
            return Err(ValidationError::UnknownEvent(unknown.clone()));
        }

        if self.max_retries == 0 {
            return Err(ValidationError::ZeroRetries);
        }
        if self.timeout_seconds == 0 {
            return Err(ValidationError::ZeroTimeout);
        }

        for header in &self.auth_headers {
            validate_header(header)?;
        }

        Ok(())
    }
}

/// Registration-time validation failures
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("url is required")]
    MissingUrl,

    #[error("url must be an absolute http(s) URL: {0}")]
    InvalidUrl(String),

    #[error("secret is required")]
    MissingSecret,

    #[error("at least one event must be subscribed")]
    NoEvents,

    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("max_retries must be at least 1")]
    ZeroRetries,

    #[error("timeout_seconds must be at least 1")]
    ZeroTimeout,

    #[error("header {0} is set by the delivery engine and cannot be overridden")]
    ReservedHeader(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("header {0} has no value")]
    MissingHeaderValue(String),
}

fn validate_url(url: &str) -> Result<(), ValidationError> {
    if url.trim().is_empty() {
        return Err(ValidationError::MissingUrl);
    }

    let parsed = Url::parse(url).map_err(|_| ValidationError::InvalidUrl(url.to_string()))?;
    let scheme_ok = matches!(parsed.scheme(), "http" | "https");
    if !scheme_ok || parsed.host_str().is_none() {
        return Err(ValidationError::InvalidUrl(url.to_string()));
    }

    Ok(())
}

fn validate_header(header: &AuthHeader) -> Result<(), ValidationError> {
    let name = HeaderName::from_bytes(header.name.as_bytes())
        .map_err(|_| ValidationError::InvalidHeader(header.name.clone()))?;

    if MANAGED_HEADERS.contains(&name.as_str()) {
        return Err(ValidationError::ReservedHeader(header.name.clone()));
    }

    if header.value.trim().is_empty() {
        return Err(ValidationError::MissingHeaderValue(header.name.clone()));
    }

    HeaderValue::from_str(&header.value)
        .map_err(|_| ValidationError::InvalidHeader(header.name.clone()))?;

    Ok(())
}

/// Generate a random signing secret (`whsec_` + 64 hex digits).
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{GENERATED_SECRET_PREFIX}{}", hex::encode(bytes))
}

/// Values used when a registration leaves delivery settings unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionDefaults {
    pub max_retries: u32,
    pub timeout_seconds: u64,
    pub retry_policy: RetryPolicy,
}

impl Default for SubscriptionDefaults {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout_seconds: 10,
            retry_policy: RetryPolicy::Exponential,
        }
    }
}

/// Registration request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewSubscription {
    pub name: Option<String>,
    pub url: Option<String>,
    pub secret: Option<String>,
    pub events: Vec<String>,
    pub enabled: Option<bool>,
    pub retry_policy: Option<RetryPolicy>,
    pub max_retries: Option<u32>,
    pub timeout_seconds: Option<u64>,
    pub verify_ssl: Option<bool>,
    pub auth_headers: Vec<AuthHeader>,
}

impl NewSubscription {
    /// Build (but do not validate) a subscription owned by `account_id`.
    pub fn into_subscription(
        self,
        account_id: impl Into<String>,
        defaults: &SubscriptionDefaults,
    ) -> WebhookSubscription {
        let mut subscription = WebhookSubscription::new(
            account_id,
            self.url.unwrap_or_default(),
            self.secret.unwrap_or_default(),
        )
        .subscribe_to(self.events)
        .with_retry_policy(self.retry_policy.unwrap_or(defaults.retry_policy))
        .with_max_retries(self.max_retries.unwrap_or(defaults.max_retries))
        .with_timeout_seconds(self.timeout_seconds.unwrap_or(defaults.timeout_seconds))
        .with_verify_ssl(self.verify_ssl.unwrap_or(true));

        subscription.name = self.name.unwrap_or_default();
        subscription.enabled = self.enabled.unwrap_or(true);
        subscription.auth_headers = self.auth_headers;
        subscription
    }
}

/// Partial configuration update. Stats and the secret are never touched here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
    pub enabled: Option<bool>,
    pub retry_policy: Option<RetryPolicy>,
    pub max_retries: Option<u32>,
    pub timeout_seconds: Option<u64>,
    pub verify_ssl: Option<bool>,
    pub auth_headers: Option<Vec<AuthHeader>>,
}

impl SubscriptionUpdate {
    pub fn apply(self, subscription: &mut WebhookSubscription) {
        if let Some(name) = self.name {
            subscription.name = name;
        }
        if let Some(url) = self.url {
            subscription.url = url;
        }
        if let Some(events) = self.events {
            subscription.events = events.into_iter().collect();
        }
        if let Some(enabled) = self.enabled {
            subscription.enabled = enabled;
        }
        if let Some(policy) = self.retry_policy {
            subscription.retry_policy = policy;
        }
        if let Some(max_retries) = self.max_retries {
            subscription.max_retries = max_retries;
        }
        if let Some(timeout) = self.timeout_seconds {
            subscription.timeout_seconds = timeout;
        }
        if let Some(verify_ssl) = self.verify_ssl {
            subscription.verify_ssl = verify_ssl;
        }
        if let Some(headers) = self.auth_headers {
            subscription.auth_headers = headers;
        }
    }
}
