//! `keel reconcile [--dry-run] [--json]`

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use keel_lifecycle::{ReconcileReport, Reconciler};

use super::{print_envelope, Services};

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Report what would be repaired without changing anything.
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long)]
    pub json: bool,
}

impl ReconcileArgs {
    pub async fn run(self) -> Result<()> {
        let services = Services::load()?;
        let reconciler =
            Reconciler::from_config(services.store.clone(), services.repos.clone(), &services.config);
        let report = reconciler
            .sweep(self.dry_run)
            .await
            .context("reconcile sweep failed")?;

        if self.json {
            return print_envelope(&report);
        }
        print_report(&report);

        if report.failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "{} reconcile action(s) failed",
                report.failures.len()
            ))
        }
    }
}

fn print_report(report: &ReconcileReport) {
    if report.is_clean() {
        println!("{} Store and repositories agree.", "✓".green().bold());
        return;
    }

    let verb = if report.dry_run { "would" } else { "did" };
    let sections: [(&str, Vec<String>); 4] = [
        (
            "discard staged project",
            report.discarded_staged.iter().map(ToString::to_string).collect(),
        ),
        (
            "finish delete of",
            report.finished_deletes.iter().map(ToString::to_string).collect(),
        ),
        ("remove orphan repository", report.removed_orphans.clone()),
        (
            "re-provision repository for",
            report.reprovisioned.iter().map(ToString::to_string).collect(),
        ),
    ];
    for (action, items) in &sections {
        for item in items {
            println!("{} {verb} {action} {item}", "■".yellow().bold());
        }
    }
    for failure in &report.failures {
        println!(
            "{} {} {} failed: {}",
            "■".red().bold(),
            failure.action,
            failure.path,
            failure.error
        );
    }
}
