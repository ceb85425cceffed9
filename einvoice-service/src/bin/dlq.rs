use clap::Parser;
use einvoice_service::adapters::build_adapter;
use einvoice_service::cli::{run_list, run_retry, Cli, Command};
use einvoice_service::config::Config;
use einvoice_service::stores::DlqStore;
use einvoice_service::AppState;
use service_core::config::{env_or, load_dotenv};
use service_core::observability::{init_tracing, LogFormat};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = Config::from_env()?;
    // Locks per write; no guard is held across an await.
    let mut stdout = std::io::stdout();

    match cli.command {
        Command::List(args) => {
            let dlq = DlqStore::new(&config.storage.dlq_path);
            let count = run_list(&dlq, &args, &mut stdout).await?;
            tracing::debug!(count, "DLQ listed");
            Ok(ExitCode::SUCCESS)
        }
        Command::Retry(args) => {
            let adapter = build_adapter(&config.ap)?;
            let state = AppState::build(config, adapter, CancellationToken::new()).await?;
            let summary = run_retry(&state, &args, &mut stdout).await?;
            tracing::info!(
                selected = summary.selected,
                delivered = summary.delivered,
                failed = summary.failed,
                "DLQ retry finished"
            );
            Ok(if summary.failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            })
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    load_dotenv();
    init_tracing("einvoice-dlq", &env_or("LOG_LEVEL", "warn"), LogFormat::Pretty);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("einvoice-dlq: {e:#}");
            ExitCode::from(1)
        }
    }
}
