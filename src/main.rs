//! Workspace entry point.
//!
//! Wires the in-memory reference backend behind the portal core and serves
//! the REST surface. The managed backend (identity, relational storage,
//! object storage, realtime feed) is consumed through the contracts in
//! `caregate_core::backend`; swapping the memory implementations for real
//! ones is a wiring change here, not a core change.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("caregate_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("CAREGATE_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    tracing::info!("-- Starting CareGate on {}", addr);

    api_rest::serve(&addr, api_rest::AppState::in_memory()).await
}
