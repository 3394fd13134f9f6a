use anyhow::Context;
use clap::Subcommand;
use serde::Serialize;
use std::path::Path;
use stepwise_core::project::Project;
use stepwise_core::store::Filter;

use crate::output::{print_json, print_table};

#[derive(Subcommand)]
pub enum StoreSubcommand {
    /// List collections with their document counts and indexes
    Collections,
    /// Print the documents of one collection
    Find {
        collection: String,
        /// Equality filter as a JSON object, e.g. '{"status":"active"}'
        #[arg(long)]
        filter: Option<String>,
    },
}

#[derive(Serialize)]
struct CollectionSummary {
    name: String,
    documents: usize,
    indexes: Vec<String>,
}

pub fn run(
    root: &Path,
    database: Option<&Path>,
    subcommand: StoreSubcommand,
    json: bool,
) -> anyhow::Result<()> {
    let project = Project::load(root, database).context("failed to load project")?;
    let store = project.open_store().context("failed to open store")?;
    let docs = store.documents();

    match subcommand {
        StoreSubcommand::Collections => {
            let mut summaries = Vec::new();
            for name in docs.collections()? {
                let documents = docs.count(&name, &Filter::all())?;
                let indexes = docs.indexes(&name)?.into_iter().map(|i| i.name).collect();
                summaries.push(CollectionSummary {
                    name,
                    documents,
                    indexes,
                });
            }
            if json {
                return print_json(&summaries);
            }
            if summaries.is_empty() {
                println!("No collections.");
                return Ok(());
            }
            let rows = summaries
                .into_iter()
                .map(|s| vec![s.name, s.documents.to_string(), s.indexes.join(", ")])
                .collect();
            print_table(&["COLLECTION", "DOCUMENTS", "INDEXES"], rows);
        }
        StoreSubcommand::Find { collection, filter } => {
            let filter = match filter {
                Some(raw) => serde_json::from_str::<Filter>(&raw)
                    .with_context(|| format!("invalid filter: {raw}"))?,
                None => Filter::all(),
            };
            let found = docs
                .find(&collection, &filter)
                .with_context(|| format!("failed to read '{collection}'"))?;
            if json {
                return print_json(&found);
            }
            for doc in &found {
                println!("{}", serde_json::to_string(doc)?);
            }
        }
    }
    Ok(())
}
