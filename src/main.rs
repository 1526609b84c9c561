use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use trust_import::{
    ImportConfig, ImportOutcome, ImportSource, Importer, ParserRegistry, SqliteLedger,
};

/// Import bank statement exports into a local ledger
#[derive(Parser, Debug)]
#[command(name = "trust-import")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true, env = "TRUST_IMPORT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import one file into the SQLite ledger
    Import {
        file: PathBuf,

        /// Ledger database
        #[arg(long, default_value = "transactions.db", env = "TRUST_IMPORT_DB")]
        db: PathBuf,

        /// Target account (overrides the config file)
        #[arg(short, long)]
        account: Option<String>,

        /// Print one JSON object per outcome
        #[arg(long)]
        json: bool,
    },

    /// List registered formats in detection order
    Formats,
}

fn main() -> Result<ExitCode> {
    // Logs go to stderr so --json output stays clean
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ImportConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => ImportConfig::default(),
    };

    match args.command {
        Command::Import {
            file,
            db,
            account,
            json,
        } => {
            if let Some(account) = account {
                config.account = account;
            }
            run_import(config, &file, &db, json)
        }
        Command::Formats => {
            config.validate()?;
            for parser in ParserRegistry::standard(&config).iter() {
                println!("{:<12} {} (v{})", parser.id(), parser.label(), parser.version());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_import(config: ImportConfig, file: &Path, db: &Path, json: bool) -> Result<ExitCode> {
    let ledger = Arc::new(SqliteLedger::open(db)?);
    info!(db = %db.display(), account = %config.account, "ledger opened");

    let importer = Importer::new(config, ledger.clone()).context("Invalid configuration")?;
    let source = ImportSource::from_path(file)
        .with_context(|| format!("Failed to open {}", file.display()))?;

    let mut exit = ExitCode::SUCCESS;
    for outcome in importer.start_import(source) {
        if json {
            println!("{}", serde_json::to_string(&outcome)?);
        } else {
            print_outcome(&outcome);
        }
        if matches!(outcome, ImportOutcome::Failed { .. }) {
            exit = ExitCode::FAILURE;
        }
    }

    if !json {
        println!("Ledger contains {} records", ledger.count()?);
    }
    Ok(exit)
}

fn print_outcome(outcome: &ImportOutcome) {
    match outcome {
        ImportOutcome::Progress { total: None, .. } => {}
        ImportOutcome::Completed { summary } | ImportOutcome::Failed { summary, .. } => {
            println!("{}", outcome);
            for line in &summary.log {
                println!("  {}", line);
            }
        }
        _ => println!("{}", outcome),
    }
}
