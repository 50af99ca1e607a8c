//! The `sylva` command line: run queries and manage collections of a
//! database directory.

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use sylva_store::{Database, DatabaseConfig};
use tracing::debug;
use tracing_subscriber::EnvFilter;

pub mod commands {
    pub mod index;
    pub mod ls;
    pub mod query;
    pub mod serialize;
    pub mod store;
}
pub mod util;

#[cfg(test)]
pub(crate) mod test_support;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "sylva", version, about = "Query and manage a sylva XML database")]
pub struct Cli {
    /// Database settings file (TOML).
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Data directory; overrides the one in the settings file.
    #[arg(short = 'd', long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// More log output; repeat for more detail. `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluate an XQuery expression.
    Query(commands::query::QueryArgs),
    /// Store files as documents or binary resources.
    Store(commands::store::StoreArgs),
    /// List a collection.
    Ls(commands::ls::LsArgs),
    /// Print a stored document.
    Serialize(commands::serialize::SerializeArgs),
    /// Show or change the index configuration of a collection.
    Index(commands::index::IndexArgs),
}

impl Cli {
    fn log_filter(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    /// Settings file (if any) with command line overrides applied.
    pub fn database_config(&self) -> anyhow::Result<DatabaseConfig> {
        let mut config = match &self.config {
            Some(path) => DatabaseConfig::load(path)
                .with_context(|| format!("reading settings from {}", path.display()))?,
            None => DatabaseConfig::default(),
        };
        if let Some(dir) = &self.data_dir {
            config.data_dir = Some(dir.clone());
        }
        Ok(config)
    }
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    // A second init (tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Run one command against an opened database and return what it prints.
pub fn execute(db: &Database, command: &Command) -> anyhow::Result<String> {
    match command {
        Command::Query(args) => commands::query::run(db, args),
        Command::Store(args) => commands::store::run(db, args),
        Command::Ls(args) => commands::ls::run(db, args),
        Command::Serialize(args) => commands::serialize::run(db, args),
        Command::Index(args) => commands::index::run(db, args),
    }
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_filter());
    let config = cli.database_config()?;
    if config.data_dir.is_none() {
        debug!("no data directory configured; changes will not be kept");
    }
    let db = Database::open(config).context("opening the database")?;
    let output = execute(&db, &cli.command)?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(&["sylva", "ls"], "warn")]
    #[case(&["sylva", "-v", "ls"], "info")]
    #[case(&["sylva", "ls", "-vv"], "debug")]
    #[case(&["sylva", "-vvvv", "ls"], "trace")]
    #[case(&["sylva", "-q", "ls"], "error")]
    fn verbosity_maps_to_a_filter(#[case] argv: &[&str], #[case] expected: &str) {
        let cli = Cli::try_parse_from(argv).expect("parse");
        assert_eq!(cli.log_filter(), expected);
    }

    #[rstest]
    fn data_dir_flag_overrides_the_settings_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = dir.path().join("sylva.toml");
        std::fs::write(&settings, "data_dir = \"/nowhere\"\nlock_timeout_ms = 5\n").expect("write");
        let cli = Cli::try_parse_from([
            "sylva",
            "--config",
            settings.to_str().expect("utf-8"),
            "-d",
            "/elsewhere",
            "ls",
        ])
        .expect("parse");
        let config = cli.database_config().expect("config");
        assert_eq!(config.data_dir, Some(PathBuf::from("/elsewhere")));
        assert_eq!(config.lock_timeout_ms, 5);
    }

    #[rstest]
    fn missing_settings_file_names_the_path() {
        let cli = Cli::try_parse_from(["sylva", "--config", "/no/such/sylva.toml", "ls"]).expect("parse");
        let err = cli.database_config().unwrap_err();
        assert!(format!("{err:#}").contains("/no/such/sylva.toml"));
    }
}
