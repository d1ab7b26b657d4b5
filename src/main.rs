#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use sessionkeeper::config::MAX_DURATION_SECS;
use sessionkeeper::providers::{sqlite, ProviderRegistry, SqliteProviderConfig};
use sessionkeeper::{Provider, SessionConfig};

/// `sessionkeeper` - inspect and maintain session backends.
#[derive(Parser, Debug)]
#[command(name = "sessionkeeper")]
#[command(version)]
#[command(about = "Inspect and maintain session backends.", long_about = None)]
struct Cli {
    /// Session config file (TOML with a `[session]` table)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load, validate and print the effective session config
    #[command(long_about = "\
Load, validate and print the effective session config.

Reads --config when given (defaults otherwise), applies SESSIONKEEPER_* \
environment overrides, fills in defaults and validates the result.

Examples:
  sessionkeeper check-config
  sessionkeeper --config session.toml check-config")]
    CheckConfig,

    /// Count session records in a sqlite database
    Count {
        /// Path to the sqlite database
        #[arg(long)]
        db: PathBuf,

        /// Session table name
        #[arg(long, default_value = sqlite::DEFAULT_TABLE_NAME)]
        table: String,
    },

    /// Run one expiry sweep over a sqlite database
    #[command(long_about = "\
Run one expiry sweep over a sqlite database.

Deletes every record whose last activity is older than the session \
lifetime. The lifetime comes from --lifetime, else from the config. \
The database must already exist.

Examples:
  sessionkeeper sweep --db sessions.db
  sessionkeeper sweep --db sessions.db --lifetime 3600")]
    Sweep {
        /// Path to the sqlite database
        #[arg(long)]
        db: PathBuf,

        /// Session table name
        #[arg(long, default_value = sqlite::DEFAULT_TABLE_NAME)]
        table: String,

        /// Session lifetime in seconds
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..=MAX_DURATION_SECS))]
        lifetime: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::CheckConfig => {
            println!("sessionkeeper {}", sessionkeeper::VERSION);
            println!("{config:#?}");
            Ok(())
        }

        Commands::Count { db, table } => {
            let provider = open_sqlite(&db, &table, config.session_lifetime_secs).await?;
            let count = provider.count().await?;
            println!("{count}");
            Ok(())
        }

        Commands::Sweep {
            db,
            table,
            lifetime,
        } => {
            let lifetime = lifetime.unwrap_or(config.session_lifetime_secs);
            let provider = open_sqlite(&db, &table, lifetime).await?;
            let removed = provider.gc().await?;
            info!(removed, lifetime_secs = lifetime, "Sweep finished");
            println!("{removed}");
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    let mut config = match path {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    config.apply_env_overrides();
    config.normalize();
    config.validate()?;
    Ok(config)
}

async fn open_sqlite(
    db: &Path,
    table: &str,
    lifetime_secs: i64,
) -> Result<std::sync::Arc<dyn Provider>> {
    let registry = ProviderRegistry::with_builtin_providers()?;
    let provider = registry
        .lookup(sqlite::PROVIDER_NAME)
        .context("sqlite provider is not registered")?;
    let provider_config = SqliteProviderConfig::new(db)
        .with_table_name(table)
        .create_if_missing(false);
    provider
        .init(lifetime_secs, &provider_config)
        .await
        .with_context(|| format!("failed to open {}", db.display()))?;
    Ok(provider)
}
