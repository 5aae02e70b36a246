use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use saas_events::EventEnvelope;
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::audit_log::{AuditStore, DeliveryAttempt};
use super::hmac_signer::{HmacSigner, format_signature_header};
use super::http_client::{WebhookHttpClient, WebhookRequest};
use super::registry::WebhookRegistry;
use super::retry_strategy::RetryStrategy;
use super::subscription::WebhookSubscription;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const EVENT_HEADER: &str = "x-webhook-event";
pub const ATTEMPT_HEADER: &str = "x-webhook-attempt";
pub const DELIVERY_HEADER: &str = "x-webhook-delivery";

/// Outcome of one delivery session, as reported to the caller.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeliveryResult {
    pub success: bool,
    /// Status of the last attempt, 0 if it got no HTTP response
    pub status_code: u16,
    /// Duration of the last attempt
    pub duration_ms: u64,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub response_body: Option<String>,
}

/// Result of a single HTTP attempt.
struct AttemptOutcome {
    status_code: u16,
    response_body: Option<String>,
    duration_ms: u64,
    error: Option<String>,
}

impl AttemptOutcome {
    fn failed(error: String, duration_ms: u64) -> Self {
        Self {
            status_code: 0,
            response_body: None,
            duration_ms,
            error: Some(error),
        }
    }

    fn is_success(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.status_code)
    }
}

/// Runs one delivery session per (subscription, envelope) pair:
/// sign, POST, audit, back off and retry until a 2xx or the attempt
/// budget is spent, then count the outcome once.
///
/// The engine never fails: every problem ends up in the returned
/// [`DeliveryResult`], the audit rows and the logs.
pub struct DeliveryEngine {
    registry: Arc<WebhookRegistry>,

    audit_store: Arc<dyn AuditStore>,

    /// HTTP client reused across all requests.
    http_client: Arc<WebhookHttpClient>,
}

impl DeliveryEngine {
    pub fn new(
        registry: Arc<WebhookRegistry>,
        audit_store: Arc<dyn AuditStore>,
        http_client: Arc<WebhookHttpClient>,
    ) -> Self {
        Self {
            registry,
            audit_store,
            http_client,
        }
    }

    /// Deliver `envelope` to `subscription`.
    ///
    /// Test deliveries make exactly one attempt and leave neither audit rows
    /// nor stats behind.
    pub async fn deliver(
        &self,
        subscription: &WebhookSubscription,
        envelope: &EventEnvelope,
        is_test: bool,
    ) -> DeliveryResult {
        let session_id = Uuid::new_v4();
        let strategy = if is_test {
            RetryStrategy::single_attempt()
        } else {
            RetryStrategy::new(subscription.retry_policy, subscription.max_retries)
        };
        let snapshot = envelope.to_value().unwrap_or_else(|e| {
            warn!(
                subscription_id = %subscription.id,
                event = %envelope.event,
                error = %e,
                "Failed to snapshot envelope for the audit log"
            );
            Value::Null
        });

        debug!(
            subscription_id = %subscription.id,
            event = %envelope.event,
            session_id = %session_id,
            max_attempts = strategy.max_attempts(),
            is_test,
            "Starting delivery session"
        );

        let mut attempt = 1;
        loop {
            let outcome = self
                .attempt(subscription, envelope, session_id, attempt)
                .await;
            let success = outcome.is_success();

            if !is_test {
                self.record_attempt(subscription, envelope, &snapshot, session_id, attempt, &outcome)
                    .await;
            }

            if success {
                info!(
                    subscription_id = %subscription.id,
                    event = %envelope.event,
                    attempt,
                    status_code = outcome.status_code,
                    duration_ms = outcome.duration_ms,
                    "Webhook delivered successfully"
                );
                return self.finish(subscription, is_test, attempt, outcome).await;
            }

            let Some(delay) = strategy.next_delay(attempt) else {
                error!(
                    subscription_id = %subscription.id,
                    event = %envelope.event,
                    attempts = attempt,
                    status_code = outcome.status_code,
                    error = outcome.error.as_deref().unwrap_or_default(),
                    "Webhook delivery exhausted all attempts"
                );
                return self.finish(subscription, is_test, attempt, outcome).await;
            };

            warn!(
                subscription_id = %subscription.id,
                event = %envelope.event,
                attempt,
                max_attempts = strategy.max_attempts(),
                status_code = outcome.status_code,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = outcome.error.as_deref().unwrap_or_default(),
                "Webhook delivery failed, will retry"
            );

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    // ------------------------------------------------------------------
    // Single attempt
    // ------------------------------------------------------------------

    async fn attempt(
        &self,
        subscription: &WebhookSubscription,
        envelope: &EventEnvelope,
        session_id: Uuid,
        attempt: u32,
    ) -> AttemptOutcome {
        // Re-read on every attempt so a rotation applies to pending retries.
        let secret = match self.registry.current_secret(subscription.id).await {
            Ok(secret) => secret,
            Err(e) => {
                warn!(
                    subscription_id = %subscription.id,
                    error = %e,
                    "Current secret unavailable, signing with the dispatched snapshot"
                );
                subscription.secret.clone()
            }
        };

        let signed = match HmacSigner::new(secret).sign(envelope) {
            Ok(signed) => signed,
            Err(e) => return AttemptOutcome::failed(e.to_string(), 0),
        };

        let headers = match build_headers(
            subscription,
            envelope.event.as_str(),
            &signed.signature,
            session_id,
            attempt,
        ) {
            Ok(headers) => headers,
            Err(e) => return AttemptOutcome::failed(e, 0),
        };

        let request = WebhookRequest {
            url: subscription.url.clone(),
            headers,
            body: signed.body,
            timeout: Duration::from_secs(subscription.timeout_seconds),
            verify_tls: subscription.verify_ssl,
        };

        let start = Instant::now();
        match self.http_client.send(request).await {
            Ok(response) => {
                let error = (!response.is_success())
                    .then(|| format!("Endpoint responded with status {}", response.status_code));
                AttemptOutcome {
                    status_code: response.status_code,
                    response_body: Some(response.body),
                    duration_ms: response.duration_ms,
                    error,
                }
            }
            // Timeouts and transport errors still cost the time spent waiting.
            Err(e) => AttemptOutcome::failed(
                e.to_string(),
                u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            ),
        }
    }

    async fn record_attempt(
        &self,
        subscription: &WebhookSubscription,
        envelope: &EventEnvelope,
        snapshot: &Value,
        session_id: Uuid,
        attempt: u32,
        outcome: &AttemptOutcome,
    ) {
        let mut row = DeliveryAttempt::new(
            subscription.id,
            session_id,
            envelope.event.as_str(),
            snapshot.clone(),
            attempt,
        )
        .with_response(outcome.status_code, outcome.response_body.clone())
        .with_duration_ms(outcome.duration_ms);
        if let Some(error) = &outcome.error {
            row = row.with_error(error.clone());
        }

        if let Err(e) = self.audit_store.append(&row).await {
            error!(
                subscription_id = %subscription.id,
                attempt,
                error = %e,
                "Failed to write delivery audit row"
            );
        }
    }

    async fn finish(
        &self,
        subscription: &WebhookSubscription,
        is_test: bool,
        attempts: u32,
        outcome: AttemptOutcome,
    ) -> DeliveryResult {
        let success = outcome.is_success();

        if !is_test
            && let Err(e) = self
                .registry
                .record_delivery(subscription.id, success, OffsetDateTime::now_utc())
                .await
        {
            warn!(
                subscription_id = %subscription.id,
                error = %e,
                "Failed to update delivery stats"
            );
        }

        DeliveryResult {
            success,
            status_code: outcome.status_code,
            duration_ms: outcome.duration_ms,
            attempts,
            last_error: outcome.error,
            response_body: outcome.response_body,
        }
    }
}

/// Engine-managed headers first, then the subscription's own.
fn build_headers(
    subscription: &WebhookSubscription,
    event: &str,
    signature: &str,
    session_id: Uuid,
    attempt: u32,
) -> Result<HeaderMap, String> {
    let value = |v: &str| HeaderValue::from_str(v).map_err(|e| format!("Invalid header value: {e}"));

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        HeaderName::from_static(SIGNATURE_HEADER),
        value(&format_signature_header(signature))?,
    );
    headers.insert(HeaderName::from_static(EVENT_HEADER), value(event)?);
    headers.insert(HeaderName::from_static(ATTEMPT_HEADER), value(&attempt.to_string())?);
    headers.insert(
        HeaderName::from_static(DELIVERY_HEADER),
        value(&session_id.to_string())?,
    );

    for custom in &subscription.auth_headers {
        let Ok(name) = HeaderName::from_bytes(custom.name.as_bytes()) else {
            warn!(
                subscription_id = %subscription.id,
                header = %custom.name,
                "Skipping invalid custom header"
            );
            continue;
        };
        if headers.contains_key(&name) {
            continue;
        }
        headers.append(name, value(&custom.value)?);
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::webhook::audit_log::InMemoryAuditStore;
    use crate::outbound::webhook::retry_strategy::RetryPolicy;
    use saas_events::EventName;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        registry: Arc<WebhookRegistry>,
        audit: Arc<InMemoryAuditStore>,
        engine: DeliveryEngine,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(WebhookRegistry::default());
        let audit = Arc::new(InMemoryAuditStore::new());
        let http_client =
            Arc::new(WebhookHttpClient::new("SaasBackend-Webhooks/test", 1024).expect("client"));
        let engine = DeliveryEngine::new(registry.clone(), audit.clone(), http_client);
        Fixture {
            registry,
            audit,
            engine,
        }
    }

    async fn register(fx: &Fixture, url: String, max_retries: u32) -> WebhookSubscription {
        let subscription = WebhookSubscription::new("acct-1", url, "engine-secret")
            .subscribe_to([EventName::PAYMENT_COMPLETED])
            .with_max_retries(max_retries)
            .with_timeout_seconds(2)
            .with_header("Authorization", "Bearer token-1");
        fx.registry.insert(subscription).await.expect("register")
    }

    fn envelope() -> EventEnvelope {
        EventEnvelope::new(
            EventName::PAYMENT_COMPLETED,
            json!({"paymentId": "pay_1", "amount": 4200}),
            Some("user-1".to_string()),
        )
    }

    #[test]
    fn headers_include_managed_and_custom_values() {
        let subscription = WebhookSubscription::new("acct", "https://x.example", "s")
            .with_header("X-Tenant", "t-1")
            .with_header("X-Webhook-Event", "spoofed");
        let session = Uuid::new_v4();

        let headers =
            build_headers(&subscription, "user.created", "abc", session, 2).expect("headers");

        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(headers[SIGNATURE_HEADER], "sha256=abc");
        assert_eq!(headers[EVENT_HEADER], "user.created");
        assert_eq!(headers[ATTEMPT_HEADER], "2");
        assert_eq!(headers[DELIVERY_HEADER], session.to_string().as_str());
        assert_eq!(headers["x-tenant"], "t-1");
        assert_eq!(headers.get_all(EVENT_HEADER).iter().count(), 1);
    }

    #[tokio::test]
    async fn successful_delivery_is_signed_audited_and_counted() {
        let fx = fixture();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("x-webhook-event", "payment.completed"))
            .and(header("x-webhook-attempt", "1"))
            .and(header("authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;
        let subscription = register(&fx, format!("{}/hook", server.uri()), 3).await;

        let result = fx.engine.deliver(&subscription, &envelope(), false).await;

        assert!(result.success);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.status_code, 200);
        assert_eq!(result.response_body.as_deref(), Some("ok"));

        let requests = server.received_requests().await.expect("recording enabled");
        let signature = requests[0]
            .headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("sha256="))
            .expect("signature header");
        assert!(HmacSigner::new("engine-secret").verify(&requests[0].body, signature));

        let rows = fx.audit.recent_deliveries(subscription.id, 10).await.expect("audit");
        assert_eq!(rows.len(), 1);
        assert!(rows[0].success);
        assert_eq!(rows[0].payload["event"], "payment.completed");

        let stats = fx.registry.get(subscription.id).await.expect("sub").delivery_stats;
        assert_eq!((stats.total, stats.successful, stats.failed), (1, 1, 0));
    }

    #[tokio::test]
    async fn client_errors_are_retried_like_any_failure() {
        let fx = fixture();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad"))
            .expect(2)
            .mount(&server)
            .await;
        let subscription = register(&fx, server.uri(), 2).await;

        let result = fx.engine.deliver(&subscription, &envelope(), false).await;

        assert!(!result.success);
        assert_eq!(result.attempts, 2);
        assert_eq!(result.status_code, 400);
        assert!(result.last_error.is_some());

        let rows = fx.audit.recent_deliveries(subscription.id, 10).await.expect("audit");
        let numbers: Vec<u32> = rows.iter().rev().map(|r| r.attempt).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(rows[0].session_id, rows[1].session_id);

        let stats = fx.registry.get(subscription.id).await.expect("sub").delivery_stats;
        assert_eq!((stats.total, stats.successful, stats.failed), (1, 0, 1));
    }

    #[tokio::test]
    async fn rotated_secret_applies_to_later_attempts() {
        let fx = fixture();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let subscription = register(&fx, server.uri(), 1).await;

        fx.registry
            .rotate_secret(subscription.id, Some("rotated".to_string()))
            .await
            .expect("rotate");
        // Stale snapshot still carries the old secret.
        let result = fx.engine.deliver(&subscription, &envelope(), false).await;
        assert!(result.success);

        let requests = server.received_requests().await.expect("recording enabled");
        let signature = requests[0]
            .headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("sha256="))
            .expect("signature header");
        assert!(HmacSigner::new("rotated").verify(&requests[0].body, signature));
    }

    #[tokio::test]
    async fn test_delivery_leaves_no_trace() {
        let fx = fixture();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        let subscription = register(&fx, server.uri(), 5).await;

        let result = fx.engine.deliver(&subscription, &envelope(), true).await;

        assert!(!result.success);
        assert_eq!(result.attempts, 1);
        assert_eq!(fx.audit.count().await.expect("count"), 0);
        let stats = fx.registry.get(subscription.id).await.expect("sub").delivery_stats;
        assert_eq!(stats.total, 0);
    }

    #[tokio::test]
    async fn transport_failure_records_status_zero() {
        let fx = fixture();
        let subscription = register(&fx, "http://127.0.0.1:1/hook".to_string(), 1).await;

        let result = fx.engine.deliver(&subscription, &envelope(), false).await;

        assert!(!result.success);
        assert_eq!(result.status_code, 0);
        let rows = fx.audit.recent_deliveries(subscription.id, 10).await.expect("audit");
        assert_eq!(rows[0].status_code, 0);
        assert!(rows[0].error.is_some());
    }

    #[tokio::test]
    async fn unregistered_subscription_signs_with_its_own_secret() {
        let fx = fixture();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        let subscription = WebhookSubscription::new("acct-1", server.uri(), "snapshot-secret")
            .subscribe_to([EventName::PAYMENT_COMPLETED]);

        let result = fx.engine.deliver(&subscription, &envelope(), true).await;
        assert!(result.success);

        let requests = server.received_requests().await.expect("recording enabled");
        let signature = requests[0]
            .headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| crate::outbound::webhook::hmac_signer::parse_signature_header(v).ok())
            .expect("signature header");
        assert!(HmacSigner::new("snapshot-secret").verify(&requests[0].body, &signature));
    }

    #[tokio::test]
    async fn timed_out_attempt_records_time_spent_waiting() {
        let fx = fixture();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;
        let subscription = fx
            .registry
            .insert(
                WebhookSubscription::new("acct-1", server.uri(), "s")
                    .subscribe_to([EventName::PAYMENT_COMPLETED])
                    .with_max_retries(1)
                    .with_timeout_seconds(1),
            )
            .await
            .expect("register");

        let result = fx.engine.deliver(&subscription, &envelope(), false).await;

        assert!(!result.success);
        assert_eq!(result.status_code, 0);
        assert!(result.duration_ms >= 900, "duration {}", result.duration_ms);
        let rows = fx.audit.recent_deliveries(subscription.id, 10).await.expect("audit");
        assert_eq!(rows.len(), 1);
        assert!(rows[0].duration_ms >= 900, "duration {}", rows[0].duration_ms);
        assert_eq!(rows[0].duration_ms, result.duration_ms);
    }

    #[tokio::test]
    async fn linear_policy_is_used_for_retries() {
        let fx = fixture();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let subscription = fx
            .registry
            .insert(
                WebhookSubscription::new("acct-1", server.uri(), "s")
                    .subscribe_to([EventName::PAYMENT_COMPLETED])
                    .with_retry_policy(RetryPolicy::Linear)
                    .with_max_retries(2),
            )
            .await
            .expect("register");

        let started = std::time::Instant::now();
        let result = fx.engine.deliver(&subscription, &envelope(), false).await;

        assert_eq!(result.attempts, 2);
        assert!(started.elapsed() >= Duration::from_millis(4_900));
    }
}
