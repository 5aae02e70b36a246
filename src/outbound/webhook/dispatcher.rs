use std::sync::Arc;

use saas_events::{
    BillingSubscription, Contract, EventEnvelope, EventName, Payment, Transaction, User,
};
use serde::Serialize;
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::delivery_service::{DeliveryEngine, DeliveryResult};
use super::registry::{RegistryError, WebhookRegistry};
use super::subscription::SubscriptionStatus;

/// Aggregated outcome of every session started by one dispatch.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DispatchSummary {
    pub event: String,
    pub delivered: usize,
    pub failed: usize,
    /// Sessions whose task panicked or was cancelled
    pub aborted: usize,
}

/// Returned immediately by [`EventDispatcher::dispatch`].
#[derive(Debug)]
pub struct DispatchOutcome {
    pub matched_subscribers: usize,

    /// Resolves once every session has finished. Dropping it detaches the
    /// sessions; they keep running.
    pub completion: Option<JoinHandle<DispatchSummary>>,
}

impl DispatchOutcome {
    fn empty() -> Self {
        Self {
            matched_subscribers: 0,
            completion: None,
        }
    }

    /// Wait for every session. `None` when nothing was dispatched or the
    /// supervisor itself was cancelled.
    pub async fn wait(self) -> Option<DispatchSummary> {
        self.completion?.await.ok()
    }
}

/// Entry point for domain code: turns an event into one independent
/// delivery session per matching subscription.
///
/// Must be called from inside a tokio runtime.
pub struct EventDispatcher {
    registry: Arc<WebhookRegistry>,
    engine: Arc<DeliveryEngine>,
}

impl EventDispatcher {
    pub fn new(registry: Arc<WebhookRegistry>, engine: Arc<DeliveryEngine>) -> Self {
        Self { registry, engine }
    }

    /// Fan `event` out to every enabled subscriber and return without waiting
    /// for any delivery. Failures never reach the caller.
    pub async fn dispatch(
        &self,
        event: &str,
        data: Value,
        actor_id: Option<&str>,
    ) -> DispatchOutcome {
        let subscribers = self.registry.lookup_subscribers(event).await;
        if subscribers.is_empty() {
            debug!(event = %event, "No webhook subscribers for event");
            return DispatchOutcome::empty();
        }

        let envelope = Arc::new(EventEnvelope::new(
            event,
            data,
            actor_id.map(str::to_string),
        ));
        let matched_subscribers = subscribers.len();

        let mut sessions = JoinSet::new();
        for subscription in subscribers {
            let engine = Arc::clone(&self.engine);
            let envelope = Arc::clone(&envelope);
            sessions.spawn(async move {
                let result = engine.deliver(&subscription, &envelope, false).await;
                (subscription.id, result)
            });
        }

        info!(
            event = %event,
            subscribers = matched_subscribers,
            "Webhook event dispatched"
        );

        let completion = tokio::spawn(supervise(event.to_string(), sessions));
        DispatchOutcome {
            matched_subscribers,
            completion: Some(completion),
        }
    }

    /// Send a `webhook.test` envelope to one subscription and wait for the
    /// single attempt. Leaves no audit rows and does not touch stats.
    pub async fn send_test(&self, subscription_id: Uuid) -> Result<DeliveryResult, RegistryError> {
        let subscription = self.registry.get(subscription_id).await?;
        if subscription.status != SubscriptionStatus::Active {
            return Err(RegistryError::NotFound(subscription_id));
        }

        let envelope = EventEnvelope::new(
            EventName::WEBHOOK_TEST,
            json!({
                "subscriptionId": subscription.id,
                "message": "This is a test webhook delivery",
            }),
            None,
        );

        Ok(self.engine.deliver(&subscription, &envelope, true).await)
    }

    // ------------------------------------------------------------------
    // Typed notification helpers
    // ------------------------------------------------------------------

    pub async fn payment_completed(&self, payment: &Payment, actor_id: Option<&str>) -> DispatchOutcome {
        let data = json!({
            "paymentId": payment.id,
            "accountId": payment.account_id,
            "customerId": payment.customer_id,
            "amountCents": payment.amount_cents,
            "currency": payment.currency,
            "method": payment.method,
            "cardLast4": payment.card_last4,
            "createdAt": rfc3339(payment.created_at),
        });
        self.dispatch(EventName::PAYMENT_COMPLETED, data, actor_id).await
    }

    pub async fn payment_failed(&self, payment: &Payment, actor_id: Option<&str>) -> DispatchOutcome {
        let data = json!({
            "paymentId": payment.id,
            "accountId": payment.account_id,
            "customerId": payment.customer_id,
            "amountCents": payment.amount_cents,
            "currency": payment.currency,
            "method": payment.method,
            "failureReason": payment.failure_reason,
        });
        self.dispatch(EventName::PAYMENT_FAILED, data, actor_id).await
    }

    pub async fn payment_refunded(&self, payment: &Payment, actor_id: Option<&str>) -> DispatchOutcome {
        let data = json!({
            "paymentId": payment.id,
            "accountId": payment.account_id,
            "customerId": payment.customer_id,
            "amountCents": payment.amount_cents,
            "refundedAmountCents": payment.refunded_amount_cents.unwrap_or(payment.amount_cents),
            "currency": payment.currency,
        });
        self.dispatch(EventName::PAYMENT_REFUNDED, data, actor_id).await
    }

    pub async fn subscription_created(
        &self,
        subscription: &BillingSubscription,
        actor_id: Option<&str>,
    ) -> DispatchOutcome {
        let data = billing_period_data(subscription);
        self.dispatch(EventName::SUBSCRIPTION_CREATED, data, actor_id).await
    }

    pub async fn subscription_renewed(
        &self,
        subscription: &BillingSubscription,
        actor_id: Option<&str>,
    ) -> DispatchOutcome {
        let data = billing_period_data(subscription);
        self.dispatch(EventName::SUBSCRIPTION_RENEWED, data, actor_id).await
    }

    pub async fn subscription_cancelled(
        &self,
        subscription: &BillingSubscription,
        actor_id: Option<&str>,
    ) -> DispatchOutcome {
        let data = json!({
            "subscriptionId": subscription.id,
            "accountId": subscription.account_id,
            "customerId": subscription.customer_id,
            "planId": subscription.plan_id,
            "cancelReason": subscription.cancel_reason,
            "cancelledAt": subscription.cancelled_at.map(rfc3339),
        });
        self.dispatch(EventName::SUBSCRIPTION_CANCELLED, data, actor_id).await
    }

    pub async fn user_created(&self, user: &User, actor_id: Option<&str>) -> DispatchOutcome {
        let data = json!({
            "userId": user.id,
            "accountId": user.account_id,
            "email": user.email,
            "name": user.name,
            "role": user.role,
        });
        self.dispatch(EventName::USER_CREATED, data, actor_id).await
    }

    pub async fn user_deleted(&self, user: &User, actor_id: Option<&str>) -> DispatchOutcome {
        let data = json!({
            "userId": user.id,
            "accountId": user.account_id,
            "email": user.email,
        });
        self.dispatch(EventName::USER_DELETED, data, actor_id).await
    }

    pub async fn transaction_created(
        &self,
        transaction: &Transaction,
        actor_id: Option<&str>,
    ) -> DispatchOutcome {
        let data = json!({
            "transactionId": transaction.id,
            "accountId": transaction.account_id,
            "kind": transaction.kind,
            "amountCents": transaction.amount_cents,
            "taxCents": transaction.tax_cents,
            "currency": transaction.currency,
            "reference": transaction.reference,
        });
        self.dispatch(EventName::TRANSACTION_CREATED, data, actor_id).await
    }

    pub async fn contract_signed(&self, contract: &Contract, actor_id: Option<&str>) -> DispatchOutcome {
        let data = json!({
            "contractId": contract.id,
            "accountId": contract.account_id,
            "customerId": contract.customer_id,
            "title": contract.title,
            "valueCents": contract.value_cents,
            "currency": contract.currency,
            "signedBy": contract.signed_by,
            "signedAt": rfc3339(contract.signed_at),
        });
        self.dispatch(EventName::CONTRACT_SIGNED, data, actor_id).await
    }
}

/// Drain the session set, log every failure and return the totals.
async fn supervise(
    event: String,
    mut sessions: JoinSet<(Uuid, DeliveryResult)>,
) -> DispatchSummary {
    let mut summary = DispatchSummary {
        event,
        ..Default::default()
    };

    while let Some(joined) = sessions.join_next().await {
        match joined {
            Ok((_, result)) if result.success => summary.delivered += 1,
            Ok((subscription_id, result)) => {
                summary.failed += 1;
                warn!(
                    subscription_id = %subscription_id,
                    event = %summary.event,
                    attempts = result.attempts,
                    error = result.last_error.as_deref().unwrap_or_default(),
                    "Webhook delivery session failed"
                );
            }
            Err(e) => {
                summary.aborted += 1;
                error!(event = %summary.event, error = %e, "Webhook delivery task aborted");
            }
        }
    }

    info!(
        event = %summary.event,
        delivered = summary.delivered,
        failed = summary.failed,
        aborted = summary.aborted,
        "Webhook dispatch finished"
    );
    summary
}

fn billing_period_data(subscription: &BillingSubscription) -> Value {
    json!({
        "subscriptionId": subscription.id,
        "accountId": subscription.account_id,
        "customerId": subscription.customer_id,
        "planId": subscription.plan_id,
        "status": subscription.status,
        "currentPeriodStart": rfc3339(subscription.current_period_start),
        "currentPeriodEnd": rfc3339(subscription.current_period_end),
    })
}

fn rfc3339(ts: OffsetDateTime) -> Value {
    ts.format(&Rfc3339).map(Value::String).unwrap_or(Value::Null)
}
