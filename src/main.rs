//! Entry point for the Payroll Engine binary.
//!
//! Running this binary starts an HTTP server exposing the payroll API
//! over an in-memory store.  Settings are read from the environment
//! (and from a `.env` file when present); see [`EngineConfig`].
//! Logging is controlled through `RUST_LOG`.

use payroll_engine::config::EngineConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "payroll_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::from_env()?;
    tracing::info!(
        bind_addr = %config.bind_addr,
        employee_query_cap = config.employee_query_cap,
        max_request_employees = config.max_request_employees,
        "Starting payroll engine"
    );
    payroll_engine::api::serve(config).await
}
