//! SQL Server to Excel export tool.
//!
//! Runs the named queries of a YAML job file against one SQL Server database
//! and writes a workbook with one sheet per query plus a `Documentation`
//! sheet built from the column catalog.
//!
//! # Security Guarantees
//! - Only the configured queries and catalog lookups are executed
//! - Passwords are read from the environment or a hidden prompt, never argv
//! - No credentials are written to logs or error messages

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tdsexport_core::{
    DataSource, ExportEngine, ExportError, JobConfig, MssqlSource, Result, ThemePreference,
    WorkbookWriter, close_after,
    discovery::{self, DatabaseEntry},
    logging::{LogFormat, init_logging},
    security::{AuthPreference, ResolverInputs, select_resolver},
};
use tracing::{error, info, warn};
use zeroize::Zeroizing;

const PASSWORD_ENV: &str = "TDSEXPORT_PASSWORD";
const ACCESS_TOKEN_ENV: &str = "TDSEXPORT_ACCESS_TOKEN";

#[derive(Parser)]
#[command(name = "tdsexport")]
#[command(about = "Export SQL Server queries to a documented Excel workbook")]
#[command(version)]
#[command(long_about = "
tdsexport - SQL Server query export

Runs the named queries of a job file and writes one worksheet per query,
plus a Documentation sheet listing every exported field with its type,
nullability and catalog description.

AUTHENTICATION:
- auto: integrated (Windows) or SQL login (elsewhere)
- sql: username from --user/TDSEXPORT_USER, password from TDSEXPORT_PASSWORD
  or an interactive prompt
- aad-token: access token from TDSEXPORT_ACCESS_TOKEN

EXIT STATUS:
  0 success, 2 configuration, 3 authentication, 4 connection,
  5 query, 6 write
")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run every query in the job file and write the workbook
    Export(ExportArgs),
    /// Search the database catalog for databases matching a term
    Discover(DiscoverArgs),
    /// Connect and run a trivial query
    Test(ConnectArgs),
    /// Parse and validate a job file without connecting
    CheckConfig(ConfigArgs),
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Job file
    #[arg(short, long, value_name = "FILE", help = "YAML job file")]
    pub config: PathBuf,
}

#[derive(Args)]
pub struct ConnectArgs {
    #[command(flatten)]
    pub job: ConfigArgs,

    #[arg(long, help = "Server override (host, host,port or host\\instance)")]
    pub server: Option<String>,

    #[arg(long, help = "Database override")]
    pub database: Option<String>,

    #[arg(long, env = "TDSEXPORT_USER", help = "SQL login name")]
    pub user: Option<String>,

    #[arg(long, value_enum, help = "Authentication mode override")]
    pub auth: Option<AuthArg>,

    /// Fail instead of prompting for missing credentials
    #[arg(long, help = "Never prompt for credentials")]
    pub no_prompt: bool,
}

#[derive(Args)]
pub struct ExportArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,

    #[arg(short, long, value_name = "FILE", help = "Workbook path (overrides the job file)")]
    pub output: Option<PathBuf>,

    #[arg(long, value_enum, help = "Workbook theme (overrides the job file)")]
    pub theme: Option<ThemeArg>,
}

#[derive(Args)]
pub struct DiscoverArgs {
    /// Search term; matched anywhere in the database name
    pub term: String,

    #[command(flatten)]
    pub connect: ConnectArgs,

    #[arg(long, help = "Print matches as JSON")]
    pub json: bool,
}

#[derive(Args)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true, help = "Suppress all output except errors")]
    pub quiet: bool,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value = "text",
        help = "Log record format"
    )]
    pub log_format: LogFormatArg,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum AuthArg {
    Auto,
    Integrated,
    Sql,
    AadToken,
}

impl From<AuthArg> for AuthPreference {
    fn from(arg: AuthArg) -> Self {
        match arg {
            AuthArg::Auto => AuthPreference::Auto,
            AuthArg::Integrated => AuthPreference::Integrated,
            AuthArg::Sql => AuthPreference::SqlLogin,
            AuthArg::AadToken => AuthPreference::AccessToken,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ThemeArg {
    Auto,
    Light,
    Dark,
}

impl From<ThemeArg> for ThemePreference {
    fn from(arg: ThemeArg) -> Self {
        match arg {
            ThemeArg::Auto => ThemePreference::Auto,
            ThemeArg::Light => ThemePreference::Light,
            ThemeArg::Dark => ThemePreference::Dark,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(
        cli.global.verbose,
        cli.global.quiet,
        cli.global.log_format.into(),
    ) {
        eprintln!("Error: {}", e);
        return ExitCode::from(1);
    }

    let outcome = match &cli.command {
        Command::Export(args) => export(args).await,
        Command::Discover(args) => discover(args).await,
        Command::Test(args) => test_connection(args).await,
        Command::CheckConfig(args) => check_config(&args.config),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let stage = e.stage();
            error!("{} failed: {}", stage, e);
            eprintln!("Error ({} stage): {}", stage, e);
            ExitCode::from(u8::try_from(stage.exit_code()).unwrap_or(1))
        }
    }
}

/// Loads the job file and applies command-line connection overrides.
fn load_job(args: &ConnectArgs) -> Result<JobConfig> {
    let mut config = JobConfig::load(&args.job.config)?;

    if let Some(server) = &args.server {
        config.connection.server = Some(server.clone());
    }
    if let Some(database) = &args.database {
        config.connection.database = Some(database.clone());
    }
    if let Some(user) = &args.user {
        config.connection.username = Some(user.clone());
    }
    if let Some(auth) = args.auth {
        config.connection.auth = auth.into();
    }

    config.validate()?;
    Ok(config)
}

/// Resolves credentials and opens the session described by `config`.
async fn open_source(config: &JobConfig, args: &ConnectArgs) -> Result<MssqlSource> {
    let resolved = config.connection.resolve_target()?;

    let inputs = resolved.merge_inputs(ResolverInputs {
        username: None,
        password: secret_from_env(PASSWORD_ENV),
        access_token: secret_from_env(ACCESS_TOKEN_ENV),
        interactive: !args.no_prompt && std::io::stdin().is_terminal(),
    });

    let resolver = select_resolver(config.connection.auth, resolved.target, inputs);
    info!("Resolving credentials with {}", resolver.name());
    let descriptor = resolver.resolve()?;

    MssqlSource::connect(&descriptor, &config.connection.session_options()).await
}

fn secret_from_env(name: &str) -> Option<Zeroizing<String>> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.is_empty())
        .map(Zeroizing::new)
}

async fn export(args: &ExportArgs) -> Result<()> {
    let config = load_job(&args.connect)?;
    let queries = config.require_queries()?;
    let output = config.output_path(args.output.as_deref())?;
    let theme = args.theme.map_or(config.theme, Into::into).resolve();
    let engine = ExportEngine::new(config.cleaning.compile()?);

    info!("Exporting {} queries to {}", queries.len(), output.display());

    let mut source = open_source(&config, &args.connect).await?;
    let job = engine.export(&mut source, queries, &output).await?;

    WorkbookWriter::new(theme).write(&job, &output)?;

    info!("✓ Export completed");
    println!("Export completed successfully");
    println!("Output: {}", job.output_path().display());
    println!("Sheets: {}", job.datasets().len());
    println!("Fields: {}", job.field_count());
    println!("Rows: {}", job.row_count());
    println!("Generated: {}", job.generated_at().to_rfc3339());
    Ok(())
}

async fn discover(args: &DiscoverArgs) -> Result<()> {
    let config = load_job(&args.connect)?;

    let mut source = open_source(&config, &args.connect).await?;
    let outcome = discovery::search(&mut source, &config.catalog, &args.term).await;
    let entries = close_after(&mut source, outcome).await?;

    info!("Found {} matching databases", entries.len());
    if args.json {
        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| ExportError::query_failed("discovery", e))?;
        println!("{}", json);
    } else {
        print_entries(&entries);
    }
    Ok(())
}

fn print_entries(entries: &[DatabaseEntry]) {
    if entries.is_empty() {
        println!("No matching databases");
        return;
    }
    let desc_w = entries
        .iter()
        .map(|e| e.description.chars().count())
        .fold("Description".len(), usize::max);
    let db_w = entries
        .iter()
        .map(|e| e.database.chars().count())
        .fold("Database".len(), usize::max);

    println!("{:<desc_w$}  {:<db_w$}  Server", "Description", "Database");
    for entry in entries {
        println!(
            "{:<desc_w$}  {:<db_w$}  {}",
            entry.description, entry.database, entry.server
        );
    }
}

async fn test_connection(args: &ConnectArgs) -> Result<()> {
    let config = load_job(args)?;
    info!("Testing connection to {}", config.connection);

    let mut source = open_source(&config, args).await?;
    let outcome = source
        .query("SELECT 1", &[])
        .await
        .map_err(|e| ExportError::query_failed("connection test", e));
    close_after(&mut source, outcome).await?;

    info!("✓ Connection test successful");
    println!("Connection successful");
    Ok(())
}

fn check_config(path: &Path) -> Result<()> {
    let config = JobConfig::load(path)?;

    if config.queries.is_empty() {
        warn!("Job file defines no queries; only discover and test can use it");
    }

    println!("Configuration is valid");
    println!("Connection: {}", config.connection);
    println!("Queries: {}", config.queries.len());
    for query in &config.queries {
        println!("  - {}", query.name);
    }
    if let Some(output) = &config.output {
        println!("Output: {}", output.display());
    }
    Ok(())
}
