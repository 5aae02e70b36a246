// Outbound webhook delivery
//
// Leaves first:
//   hmac_signer, retry_strategy, subscription, audit_log, http_client
//   registry         – subscriptions indexed by event name, delivery stats
//   delivery_service – per-subscription delivery session (sign, POST, retry, audit)
//   dispatcher       – fans one event out to every matching subscription

pub mod audit_log;
pub mod delivery_service;
pub mod dispatcher;
pub mod hmac_signer;
pub mod http_client;
pub mod registry;
pub mod retry_strategy;
pub mod subscription;

// Re-export commonly used types
pub use audit_log::{AuditError, AuditQuery, AuditStore, DeliveryAttempt, InMemoryAuditStore};
pub use delivery_service::{DeliveryEngine, DeliveryResult};
pub use dispatcher::{DispatchOutcome, DispatchSummary, EventDispatcher};
pub use hmac_signer::{
    HmacSigner, SignatureError, SignedPayload, canonical_json, format_signature_header,
    parse_signature_header,
};
pub use http_client::{HttpClientError, WebhookHttpClient};
pub use registry::{RegistryError, WebhookRegistry};
pub use retry_strategy::{RetryPolicy, RetryStrategy};
pub use subscription::{
    AuthHeader, DeliveryStats, NewSubscription, SubscriptionDefaults, SubscriptionStatus,
    SubscriptionUpdate, ValidationError, WebhookSubscription,
};
