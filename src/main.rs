use saas_backend::config::Config;
use saas_backend::server::{AppState, Server};
use saas_backend::telemetry;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    telemetry::init_tracing();

    // Load configuration
    let config = Config::load()?;
    tracing::info!("Loaded configuration: {:?}", config);

    tracing::warn!(
        "Webhook deliveries run in-process without a durable queue; \
         sessions still in flight or waiting to retry are lost on shutdown"
    );

    // Domain modules receive `state.dispatcher` to emit events
    let state = AppState::from_config(&config)?;

    // Create and run server
    let server = Server::with_state(&config, state).await?;
    server.run().await
}
