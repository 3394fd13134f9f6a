use anyhow::Context;
use serde::Serialize;
use std::path::Path;
use stepwise_core::project::{Project, Session};
use stepwise_core::RunEvent;

use crate::output::print_json;

#[derive(Serialize, Default)]
struct ApplySummary {
    applied: Vec<String>,
    skipped: Vec<String>,
    failed: Option<String>,
}

pub fn run(root: &Path, database: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let project = Project::load(root, database).context("failed to load project")?;
    let session = Session::open(&project).context("failed to open project")?;
    let runner = session.runner();

    let mut summary = ApplySummary::default();
    let result = runner.apply_with(|event| match event {
        RunEvent::Started { identifier } => {
            if !json {
                println!("Applying {identifier}...");
            }
        }
        RunEvent::Applied { identifier, .. } => {
            if !json {
                println!("  applied {identifier}");
            }
            summary.applied.push(identifier.to_string());
        }
        RunEvent::Skipped { identifier } => {
            if !json {
                println!("  skipped {identifier} (recorded by another runner)");
            }
            summary.skipped.push(identifier.to_string());
        }
        RunEvent::Failed { identifier, .. } => {
            if !json {
                println!("  failed  {identifier}");
            }
            summary.failed = Some(identifier.to_string());
        }
    });

    if json {
        print_json(&summary)?;
    } else if result.is_ok() {
        if summary.applied.is_empty() && summary.skipped.is_empty() {
            println!("Nothing to apply.");
        } else {
            println!("\n{} unit(s) applied.", summary.applied.len());
        }
    }

    result.context("apply stopped")?;
    Ok(())
}
