mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, store::StoreSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "stepwise",
    about = "Apply ordered change units to a document store exactly once",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from stepwise.yaml or .git/)
    #[arg(long, global = true, env = "STEPWISE_ROOT")]
    root: Option<PathBuf>,

    /// Store database file, overriding stepwise.yaml
    #[arg(long, global = true, env = "STEPWISE_DATABASE")]
    database: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write stepwise.yaml and create the migrations directory
    Init,

    /// Apply every pending unit in order
    Apply,

    /// Undo one applied unit
    Rollback {
        /// Unit identifier, e.g. 002_add_event_status
        identifier: String,
    },

    /// Show which units are applied and which are pending
    Status,

    /// Inspect and validate stepwise.yaml
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Read-only views of the document store
    Store {
        #[command(subcommand)]
        subcommand: StoreSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let database = cli.database.as_deref();

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Apply => cmd::apply::run(&root, database, cli.json),
        Commands::Rollback { identifier } => {
            cmd::rollback::run(&root, database, &identifier, cli.json)
        }
        Commands::Status => cmd::status::run(&root, database, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::Store { subcommand } => cmd::store::run(&root, database, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
