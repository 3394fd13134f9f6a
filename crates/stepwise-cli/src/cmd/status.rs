use anyhow::Context;
use std::path::Path;
use stepwise_core::project::{Project, Session};

use crate::output::{print_json, print_table, short_time};

pub fn run(root: &Path, database: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let project = Project::load(root, database).context("failed to load project")?;
    let session = Session::open(&project).context("failed to open project")?;
    let report = session.runner().status().context("failed to read status")?;

    if json {
        return print_json(&report);
    }

    if report.units.is_empty() {
        println!(
            "No units found in {}.",
            project.config().migrations_dir.display()
        );
    } else {
        let rows = report
            .units
            .iter()
            .map(|u| {
                vec![
                    u.identifier.clone(),
                    u.state.to_string(),
                    u.applied_at.as_ref().map(short_time).unwrap_or_else(|| "-".to_string()),
                    if u.reversible { "yes" } else { "no" }.to_string(),
                ]
            })
            .collect();
        print_table(&["UNIT", "STATE", "APPLIED AT", "REVERSIBLE"], rows);
        println!(
            "\n{} applied, {} pending",
            report.applied_count(),
            report.pending_count()
        );
    }

    for entry in &report.orphaned {
        println!(
            "warning: ledger entry '{}' (applied {}) has no matching unit file",
            entry.identifier,
            short_time(&entry.applied_at)
        );
    }
    Ok(())
}
