use einvoice_service::{config::Config, Application};
use service_core::config::{env_or, load_dotenv};
use service_core::observability::{init_metrics, init_tracing, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    let log_format: LogFormat = env_or("LOG_FORMAT", "json").parse().unwrap_or_default();
    init_tracing(
        "einvoice-service",
        &env_or("LOG_LEVEL", "info,einvoice_service=debug"),
        log_format,
    );
    init_metrics();

    let config = Config::from_env()?;
    let application = Application::build(config).await?;
    application.run_until_stopped().await?;

    Ok(())
}
