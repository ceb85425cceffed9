//! Operator commands for the dead-letter queue.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::io::Write;

use crate::models::DlqItem;
use crate::startup::AppState;
use crate::stores::DlqStore;

#[derive(Parser, Debug)]
#[command(name = "einvoice-dlq", version, about = "Inspect and retry dead-lettered invoice deliveries")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print dead-lettered deliveries, oldest first.
    List(ListArgs),
    /// Re-send dead-lettered deliveries and drop the ones that succeed.
    Retry(RetryArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    #[arg(long)]
    pub tenant: Option<String>,
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct RetryArgs {
    #[arg(long)]
    pub tenant: Option<String>,
    /// Only these DLQ ids. Repeatable.
    #[arg(long = "id")]
    pub ids: Vec<String>,
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
    /// Ignore `--limit` and retry every matching item.
    #[arg(long)]
    pub all: bool,
    #[arg(long)]
    pub dry_run: bool,
}

impl Default for RetryArgs {
    fn default() -> Self {
        Self {
            tenant: None,
            ids: Vec::new(),
            limit: 10,
            all: false,
            dry_run: false,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetrySummary {
    pub selected: usize,
    pub delivered: usize,
    pub failed: usize,
}

fn describe(item: &DlqItem) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}",
        item.id,
        item.ts.to_rfc3339(),
        item.tenant,
        item.invoice_id,
        item.error
    )
}

pub async fn run_list(dlq: &DlqStore, args: &ListArgs, out: &mut impl Write) -> anyhow::Result<usize> {
    let items = dlq
        .list(args.tenant.as_deref(), args.limit)
        .await
        .context("failed to read DLQ")?;
    for item in &items {
        writeln!(out, "{}", describe(item))?;
    }
    Ok(items.len())
}

pub async fn run_retry(
    state: &AppState,
    args: &RetryArgs,
    out: &mut impl Write,
) -> anyhow::Result<RetrySummary> {
    let mut items = state
        .dlq
        .list(args.tenant.as_deref(), None)
        .await
        .context("failed to read DLQ")?;
    if !args.ids.is_empty() {
        items.retain(|item| args.ids.contains(&item.id));
    }
    if !args.all {
        items.truncate(args.limit);
    }

    let mut summary = RetrySummary {
        selected: items.len(),
        ..RetrySummary::default()
    };
    let mut delivered_ids = Vec::new();

    for item in &items {
        if args.dry_run {
            writeln!(out, "would retry\t{}", describe(item))?;
            continue;
        }
        match state.submissions.redeliver(item).await {
            Ok(report) => {
                summary.delivered += 1;
                delivered_ids.push(item.id.clone());
                writeln!(
                    out,
                    "delivered\t{}\t{}\tprovider={}\tstatus={}",
                    item.id, item.invoice_id, report.outcome.provider_id, report.outcome.status
                )?;
            }
            Err(e) => {
                summary.failed += 1;
                tracing::warn!(dlq_id = %item.id, invoice_id = %item.invoice_id, error = %e, "DLQ retry failed");
                writeln!(out, "failed\t{}\t{}\t{}", item.id, item.invoice_id, e)?;
            }
        }
    }

    if !delivered_ids.is_empty() {
        state
            .dlq
            .remove(&delivered_ids)
            .await
            .context("failed to clear retried DLQ entries")?;
    }
    Ok(summary)
}
