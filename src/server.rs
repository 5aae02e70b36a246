mod handlers;
pub mod responses;

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::domain::ports::{AccessControl, RoleAllowList};
use crate::outbound::webhook::{
    AuditStore, DeliveryEngine, EventDispatcher, InMemoryAuditStore, WebhookHttpClient,
    WebhookRegistry,
};
use crate::server::handlers::health::health_check;
use crate::server::handlers::webhooks;
use axum::http::Method;
use axum::{
    Router,
    routing::{get, post},
};
use color_eyre::eyre::{Context, Result};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use handlers::webhooks::{ACCOUNT_HEADER, ROLE_HEADER, RotateSecretResponse};

#[derive(Clone)]
/// The global application state shared between all request handlers.
pub struct AppState {
    pub registry: Arc<WebhookRegistry>,
    pub dispatcher: Arc<EventDispatcher>,
    pub audit_store: Arc<dyn AuditStore>,
    pub access_control: Arc<dyn AccessControl>,
}

impl AppState {
    /// Wire the webhook components from configuration, with an in-memory
    /// audit store and the configured role allow-list.
    pub fn from_config(config: &Config) -> Result<Self> {
        let http_client = WebhookHttpClient::new(
            &config.webhooks.user_agent,
            config.webhooks.response_body_limit,
        )
        .wrap_err("Failed to build webhook HTTP client")?;

        let registry = Arc::new(WebhookRegistry::new(
            config.webhooks.subscription_defaults(),
        ));
        let audit_store: Arc<dyn AuditStore> = Arc::new(InMemoryAuditStore::new());
        let access_control: Arc<dyn AccessControl> =
            Arc::new(RoleAllowList::new(&config.webhooks.manager_roles));

        Ok(Self::new(
            registry,
            audit_store,
            access_control,
            Arc::new(http_client),
        ))
    }

    pub fn new(
        registry: Arc<WebhookRegistry>,
        audit_store: Arc<dyn AuditStore>,
        access_control: Arc<dyn AccessControl>,
        http_client: Arc<WebhookHttpClient>,
    ) -> Self {
        let engine = Arc::new(DeliveryEngine::new(
            Arc::clone(&registry),
            Arc::clone(&audit_store),
            http_client,
        ));
        let dispatcher = Arc::new(EventDispatcher::new(Arc::clone(&registry), engine));

        Self {
            registry,
            dispatcher,
            audit_store,
            access_control,
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &'_ axum::extract::Request<_>| {
            let uri = request.uri().to_string();
            tracing::info_span!("request", method = %request.method(), uri)
        });

    let cors_layer = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ]);

    Router::new()
        .route("/health", get(health_check))
        .route(
            "/webhooks",
            post(webhooks::create_subscription).get(webhooks::list_subscriptions),
        )
        .route(
            "/webhooks/{id}",
            get(webhooks::get_subscription)
                .patch(webhooks::update_subscription)
                .delete(webhooks::delete_subscription),
        )
        .route("/webhooks/{id}/rotate-secret", post(webhooks::rotate_secret))
        .route("/webhooks/{id}/toggle", post(webhooks::toggle_subscription))
        .route("/webhooks/{id}/test", post(webhooks::test_subscription))
        .route("/webhooks/{id}/deliveries", get(webhooks::list_deliveries))
        .layer(cors_layer)
        .layer(trace_layer)
        .with_state(state)
}

pub struct Server {
    router: Router,
    listener: TcpListener,
    port: u16,
}

impl Server {
    /// Creates a new HTTP server with components wired from `config`.
    pub async fn new(config: &Config) -> Result<Self> {
        let state = AppState::from_config(config)?;
        Self::with_state(config, state).await
    }

    /// Creates a new HTTP server around an existing application state.
    pub async fn with_state(config: &Config, state: AppState) -> Result<Self> {
        let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))
            .await
            .wrap_err_with(|| format!("Failed to bind to port {}", config.server.port))?;
        let port = listener
            .local_addr()
            .wrap_err("Failed to read bound address")?
            .port();

        Ok(Self {
            router: router(state),
            listener,
            port,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Runs the HTTP server.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Server listening on {}", self.listener.local_addr()?);
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }
}
