//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the REST API server on its own over the in-memory reference
//! backend.
//!
//! ## Intended use
//! Useful for development and debugging when you only want the REST server
//! (with OpenAPI/Swagger UI). The workspace's main `caregate-run` binary is
//! the normal entry point.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("CAREGATE_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    tracing::info!("-- Starting CareGate REST API on {}", addr);

    api_rest::serve(&addr, api_rest::AppState::in_memory()).await
}
