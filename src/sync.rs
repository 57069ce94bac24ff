use std::fmt::Write as _;
use std::time::Instant;

use anyhow::{bail, Result};
use clap::Args;
use dialoguer::console;
use serde_json::json;

use crate::args::BaseArgs;
use crate::context::Session;
use crate::layers::{self, LayerKind, LayerReport};
use crate::ui::{or_dash, print_command_status, report_table, with_spinner, CommandStatus};
use crate::utils::counted;

#[derive(Debug, Clone, Args)]
pub struct SyncArgs {
    /// Layer to synchronize (repeatable). Defaults to every configured layer.
    #[arg(long = "layer", value_enum)]
    pub layers: Vec<LayerKind>,

    /// Print every block, not just failed ones
    #[arg(long)]
    pub blocks: bool,
}

pub async fn run(base: BaseArgs, args: SyncArgs) -> Result<()> {
    let session = Session::open(&base)?;
    let configs = session.settings.layers(&args.layers)?;
    let ctx = session.sync_context()?;

    let started = Instant::now();
    let reports = with_spinner(
        "Synchronizing river levels...",
        layers::sync_layers(&ctx, &configs),
    )
    .await;
    let elapsed = started.elapsed();

    if base.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "elapsed_ms": elapsed.as_millis() as u64,
                "layers": reports,
            }))?
        );
    } else {
        print!("{}", render_reports(&reports, args.blocks)?);
        for report in &reports {
            print_command_status(
                CommandStatus::from_success(report.is_success()),
                &summary_line(report),
            );
        }
    }

    let failed: Vec<&str> = reports
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.layer.as_str())
        .collect();
    if !failed.is_empty() {
        bail!("synchronization failed for {}", failed.join(", "));
    }
    Ok(())
}

fn summary_line(report: &LayerReport) -> String {
    if let Some(error) = &report.error {
        return format!(
            "{}: failed during {}: {}",
            report.layer.as_str(),
            error.stage,
            error.message
        );
    }
    let blocks = report.blocks.len();
    let failed = report.failed_blocks();
    let mut line = format!(
        "{}: updated {} of {} in {}",
        report.layer.as_str(),
        report.updated(),
        counted(report.object_ids, "feature"),
        counted(blocks, "block"),
    );
    if failed > 0 {
        line.push_str(&format!(" ({failed} failed)"));
    }
    line
}

fn render_reports(reports: &[LayerReport], all_blocks: bool) -> Result<String> {
    let mut output = String::new();

    let mut table = report_table(&[
        "Layer",
        "Features",
        "Blocks",
        "Submitted",
        "Updated",
        "Skipped",
        "Failed",
    ]);
    for report in reports {
        table.add_row(vec![
            report.layer.as_str().to_string(),
            report.object_ids.to_string(),
            report.blocks.len().to_string(),
            report.submitted().to_string(),
            report.updated().to_string(),
            report.skipped().to_string(),
            report.failed_blocks().to_string(),
        ]);
    }
    writeln!(output, "{table}\n")?;

    for report in reports {
        let shown: Vec<_> = report
            .blocks
            .iter()
            .filter(|b| all_blocks || b.error.is_some())
            .collect();
        if shown.is_empty() {
            continue;
        }
        writeln!(
            output,
            "{} {}",
            console::style(report.layer.as_str()).bold(),
            console::style(&report.url).dim()
        )?;
        let mut blocks = report_table(&["Block", "First OBJECTID", "Ids", "Updated", "Status"]);
        for block in shown {
            let status = match &block.error {
                Some(error) => format!("{}: {}", error.stage, error.message),
                None => "ok".to_string(),
            };
            blocks.add_row(vec![
                block.index.to_string(),
                or_dash(block.first_object_id),
                block.object_ids.to_string(),
                or_dash(block.result.as_ref().map(|r| r.updated)),
                status,
            ]);
        }
        writeln!(output, "{blocks}\n")?;
    }

    Ok(output)
}
