#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use saas_backend::config::Config;
use saas_backend::domain::ports::RoleAllowList;
use saas_backend::outbound::webhook::{
    InMemoryAuditStore, SubscriptionDefaults, WebhookHttpClient, WebhookRegistry,
    WebhookSubscription,
};
use saas_backend::server::{AppState, Server};

pub const MANAGER_ROLE: &str = "admin";

/// Components of a test application, with the concrete audit store exposed
/// for assertions.
pub struct TestApp {
    pub state: AppState,
    pub audit: Arc<InMemoryAuditStore>,
}

impl TestApp {
    pub fn new() -> Self {
        let audit = Arc::new(InMemoryAuditStore::new());
        let http_client = WebhookHttpClient::new("SaasBackend-Webhooks/test", 1024)
            .expect("Failed to build HTTP client");
        let state = AppState::new(
            Arc::new(WebhookRegistry::new(SubscriptionDefaults::default())),
            audit.clone(),
            Arc::new(RoleAllowList::new([MANAGER_ROLE])),
            Arc::new(http_client),
        );
        Self { state, audit }
    }

    /// Register a subscription directly, bypassing the HTTP surface.
    pub async fn subscribe(&self, subscription: WebhookSubscription) -> WebhookSubscription {
        self.state
            .registry
            .insert(subscription)
            .await
            .expect("Failed to register subscription")
    }
}

pub async fn spawn_server() -> String {
    let config = {
        let mut config =
            Config::load_with_sources(Some(HashMap::new())).expect("Failed to load config");
        config.server.host = "localhost".to_string();
        config.server.port = 0;
        config
    };

    let server = Server::new(&config).await.expect("Failed to start server");

    let port = server.port();
    tokio::spawn(server.run());

    format!("http://{}:{}", config.server.host, port)
}
