use anyhow::Context;
use serde::Serialize;
use std::path::Path;
use stepwise_core::project::{Project, Session};

use crate::output::print_json;

#[derive(Serialize)]
struct RollbackResult<'a> {
    rolled_back: &'a str,
    applied_at: chrono::DateTime<chrono::Utc>,
}

pub fn run(root: &Path, database: Option<&Path>, identifier: &str, json: bool) -> anyhow::Result<()> {
    let project = Project::load(root, database).context("failed to load project")?;
    let session = Session::open(&project).context("failed to open project")?;

    let entry = session
        .runner()
        .rollback(identifier)
        .with_context(|| format!("failed to roll back '{identifier}'"))?;

    if json {
        print_json(&RollbackResult {
            rolled_back: &entry.identifier,
            applied_at: entry.applied_at,
        })?;
    } else {
        println!("Rolled back {}", entry.identifier);
    }
    Ok(())
}
