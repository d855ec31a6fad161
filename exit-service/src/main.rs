use exit_service::config::ExitConfig;
use exit_service::services::init_metrics;
use exit_service::startup::Application;
use service_core::observability::{init_tracing, metrics::install_recorder};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = ExitConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    // Both registries must exist before the first request is served.
    init_metrics();
    install_recorder();

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!("Failed to build application: {}", e);
        std::io::Error::other(format!("Startup error: {}", e))
    })?;

    app.run_until_stopped().await
}
