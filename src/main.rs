use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let http_port: u16 = std::env::var("GAMESHELF_HTTP_PORT")
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(5000);
    info!(
        target: "gameshelf",
        "gameshelf dev backend starting: RUST_LOG='{}', http_port={}",
        rust_log, http_port
    );

    gameshelf::server::run_with_port(http_port).await
}
