use std::collections::{BTreeSet, HashMap};

use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::subscription::{
    NewSubscription, SubscriptionDefaults, SubscriptionStatus, SubscriptionUpdate,
    ValidationError, WebhookSubscription, generate_secret,
};

/// Error type for registry operations
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Webhook subscription not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid subscription: {0}")]
    Validation(#[from] ValidationError),
}

#[derive(Default)]
struct RegistryState {
    subscriptions: HashMap<Uuid, WebhookSubscription>,

    /// event name -> ids of non-deleted subscriptions listening for it
    index: HashMap<String, BTreeSet<Uuid>>,
}

impl RegistryState {
    fn index_insert(&mut self, subscription: &WebhookSubscription) {
        for event in &subscription.events {
            self.index
                .entry(event.clone())
                .or_default()
                .insert(subscription.id);
        }
    }

    fn index_remove(&mut self, subscription: &WebhookSubscription) {
        for event in &subscription.events {
            if let Some(ids) = self.index.get_mut(event) {
                ids.remove(&subscription.id);
                if ids.is_empty() {
                    self.index.remove(event);
                }
            }
        }
    }

    /// Mutable access to a subscription that has not been deleted.
    fn live_mut(&mut self, id: Uuid) -> Result<&mut WebhookSubscription, RegistryError> {
        self.subscriptions
            .get_mut(&id)
            .filter(|s| s.status == SubscriptionStatus::Active)
            .ok_or(RegistryError::NotFound(id))
    }
}

/// Store of webhook subscriptions, indexed by event name for fast fan-out.
///
/// All mutations, including delivery stats updates, happen under a single
/// write lock, so concurrent session completions and admin edits never
/// overwrite each other.
pub struct WebhookRegistry {
    state: RwLock<RegistryState>,
    defaults: SubscriptionDefaults,
}

impl WebhookRegistry {
    pub fn new(defaults: SubscriptionDefaults) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            defaults,
        }
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// All enabled, active subscriptions registered for `event`.
    pub async fn lookup_subscribers(&self, event: &str) -> Vec<WebhookSubscription> {
        let state = self.state.read().await;
        let Some(ids) = state.index.get(event) else {
            return Vec::new();
        };

        ids.iter()
            .filter_map(|id| state.subscriptions.get(id))
            .filter(|s| s.matches_event(event))
            .cloned()
            .collect()
    }

    /// Fetch a subscription by id. Deleted subscriptions are still returned
    /// (with `Disabled` status) so their delivery history stays resolvable.
    pub async fn get(&self, id: Uuid) -> Result<WebhookSubscription, RegistryError> {
        self.state
            .read()
            .await
            .subscriptions
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))
    }

    /// Non-deleted subscriptions owned by `account_id`, oldest first.
    pub async fn list(&self, account_id: &str) -> Vec<WebhookSubscription> {
        let state = self.state.read().await;
        let mut subscriptions: Vec<_> = state
            .subscriptions
            .values()
            .filter(|s| s.account_id == account_id && s.status == SubscriptionStatus::Active)
            .cloned()
            .collect();
        subscriptions.sort_by_key(|s| (s.created_at, s.id));
        subscriptions
    }

    /// Secret to sign the next attempt with.
    pub async fn current_secret(&self, id: Uuid) -> Result<String, RegistryError> {
        self.state
            .read()
            .await
            .subscriptions
            .get(&id)
            .map(|s| s.secret.clone())
            .ok_or(RegistryError::NotFound(id))
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    pub async fn register(
        &self,
        account_id: &str,
        request: NewSubscription,
    ) -> Result<WebhookSubscription, RegistryError> {
        let subscription = request.into_subscription(account_id, &self.defaults);
        self.insert(subscription).await
    }

    /// Validate and store a fully built subscription.
    pub async fn insert(
        &self,
        subscription: WebhookSubscription,
    ) -> Result<WebhookSubscription, RegistryError> {
        subscription.validate()?;

        let mut state = self.state.write().await;
        state.index_insert(&subscription);
        state
            .subscriptions
            .insert(subscription.id, subscription.clone());

        info!(
            subscription_id = %subscription.id,
            account_id = %subscription.account_id,
            events = subscription.events.len(),
            "Webhook subscription registered"
        );
        Ok(subscription)
    }

    pub async fn update(
        &self,
        id: Uuid,
        update: SubscriptionUpdate,
    ) -> Result<WebhookSubscription, RegistryError> {
        let mut state = self.state.write().await;
        let current = state.live_mut(id)?.clone();

        let mut candidate = current.clone();
        update.apply(&mut candidate);
        candidate.validate()?;
        candidate.updated_at = OffsetDateTime::now_utc();

        state.index_remove(&current);
        state.index_insert(&candidate);
        state.subscriptions.insert(id, candidate.clone());

        debug!(subscription_id = %id, "Webhook subscription updated");
        Ok(candidate)
    }

    /// Replace the signing secret and return it. A random one is generated
    /// when `secret` is `None`.
    pub async fn rotate_secret(
        &self,
        id: Uuid,
        secret: Option<String>,
    ) -> Result<String, RegistryError> {
        let secret = match secret {
            Some(s) if s.trim().is_empty() => return Err(ValidationError::MissingSecret.into()),
            Some(s) => s,
            None => generate_secret(),
        };

        let mut state = self.state.write().await;
        let subscription = state.live_mut(id)?;
        subscription.secret = secret.clone();
        subscription.updated_at = OffsetDateTime::now_utc();

        info!(subscription_id = %id, "Webhook secret rotated");
        Ok(secret)
    }

    pub async fn set_enabled(
        &self,
        id: Uuid,
        enabled: bool,
    ) -> Result<WebhookSubscription, RegistryError> {
        let mut state = self.state.write().await;
        let subscription = state.live_mut(id)?;
        if enabled {
            subscription.enable();
        } else {
            subscription.disable();
        }
        subscription.updated_at = OffsetDateTime::now_utc();

        info!(subscription_id = %id, enabled, "Webhook subscription toggled");
        Ok(subscription.clone())
    }

    /// Soft delete: the record stays for audit resolution but never matches again.
    pub async fn delete(&self, id: Uuid) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        let subscription = state.live_mut(id)?;
        subscription.status = SubscriptionStatus::Disabled;
        subscription.disable();
        subscription.updated_at = OffsetDateTime::now_utc();
        let removed = subscription.clone();
        state.index_remove(&removed);

        info!(subscription_id = %id, "Webhook subscription deleted");
        Ok(())
    }

    /// Count one finished delivery session.
    pub async fn record_delivery(
        &self,
        id: Uuid,
        success: bool,
        at: OffsetDateTime,
    ) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        let subscription = state
            .subscriptions
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?;

        subscription.delivery_stats.record(success);
        subscription.last_delivery_at = Some(at);
        Ok(())
    }
}

impl Default for WebhookRegistry {
    fn default() -> Self {
        Self::new(SubscriptionDefaults::default())
    }
}
