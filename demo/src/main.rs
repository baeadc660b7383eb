//! rowguard demo CLI
//!
//! Runs the document filtering scenarios, or compiles a policy engine
//! compile response into a diagnostic rendering and a SQL predicate.
//!
//! Usage:
//!   cargo run -p demo -- run-all
//!   cargo run -p demo -- read
//!   cargo run -p demo -- translate demo/fixtures/compile_response.json

mod scenarios;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rowguard_contracts::error::{RowguardError, RowguardResult};
use rowguard_core::{translate, Compiled, DebugTranslator};
use rowguard_data::{MetadataCache, SqlTranslator};
use rowguard_rego::parse_compile_response;

use scenarios::Document;

// ── CLI definition ────────────────────────────────────────────────────────────

/// rowguard: compile policy decisions into row filters.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "rowguard policy filtering demo",
    long_about = "Runs rowguard scenarios showing how partial policy evaluation\n\
                  becomes a WHERE predicate, a denial, or no filter at all."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every scenario in sequence.
    RunAll,
    /// Read filtering for members, guests, and skipped scopes.
    Read,
    /// Update checks on the record's delta.
    Update,
    /// Create checks and delete grants.
    CreateDelete,
    /// Translate a compile response (JSON) against the demo Document model.
    Translate {
        /// Path to the compile response.
        file: PathBuf,
        /// Render identifiers without quotes.
        #[arg(long)]
        no_quote: bool,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Set RUST_LOG=debug to follow every filter state transition.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let result = MetadataCache::global()
        .register::<Document>()
        .and_then(|()| match cli.command {
            Command::RunAll => run_all(),
            Command::Read => scenarios::run_read(),
            Command::Update => scenarios::run_update(),
            Command::CreateDelete => scenarios::run_create_delete(),
            Command::Translate { file, no_quote } => run_translate(&file, !no_quote),
        });

    if let Err(e) = result {
        eprintln!("Demo error: {}", e);
        std::process::exit(1);
    }
}

fn run_all() -> RowguardResult<()> {
    scenarios::run_read()?;
    scenarios::run_update()?;
    scenarios::run_create_delete()?;
    Ok(())
}

fn run_translate(file: &Path, quote: bool) -> RowguardResult<()> {
    let text = std::fs::read_to_string(file).map_err(|e| RowguardError::ConfigError {
        reason: format!("failed to read '{}': {}", file.display(), e),
    })?;
    let formula = parse_compile_response(&text)?;
    println!("formula : {formula}");

    match DebugTranslator::new().render(&formula) {
        Ok(rendered) => println!("debug   : {rendered}"),
        Err(e) => println!("debug   : error: {e}"),
    }

    let metadata = MetadataCache::global().resolve::<Document>()?;
    let translator = SqlTranslator::new(&metadata).quote_identifiers(quote);
    match translate(&formula, &translator) {
        Ok(Compiled::Unrestricted) => println!("sql     : (no predicate)"),
        Ok(Compiled::Predicate(predicate)) => {
            let (sql, params) = predicate.to_sql();
            println!("sql     : {sql}");
            let params: Vec<String> = params.iter().map(ToString::to_string).collect();
            println!("params  : [{}]", params.join(", "));
        }
        Err(e) if e.is_deny() => println!("sql     : FALSE ({e})"),
        Err(e) => return Err(e),
    }
    Ok(())
}
