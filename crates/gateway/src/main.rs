use polreg_gateway::config::{GatewayConfig, StartupError};
use polreg_gateway::http;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(err) = run().await {
        eprintln!("STARTUP_ERROR {}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), StartupError> {
    let config = GatewayConfig::load()?;
    let app = http::router(config.clone()).await?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .map_err(|err| StartupError {
            code: "ERR_BIND_FAILED",
            message: format!("failed to bind {}: {}", config.bind_addr, err),
        })?;

    tracing::info!(
        bind_addr = %config.bind_addr,
        app = %config.app_name,
        auth_enabled = config.api_key.is_some(),
        "policy registry listening"
    );

    axum::serve(listener, app).await.map_err(|err| StartupError {
        code: "ERR_SERVER_FAILED",
        message: err.to_string(),
    })
}
