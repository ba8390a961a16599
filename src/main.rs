use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

use picart::config::SessionConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let config = SessionConfig::from_env();
    info!(
        target: "picart",
        "picart starting: RUST_LOG='{}', http_port={}, api_base_url='{}', logout_cooldown_ms={}",
        rust_log, config.http_port, config.api_base_url, config.logout_cooldown_ms
    );

    picart::server::run_with_port(config).await
}
