//! xcheck - cross-validated field extraction CLI
//!
//! ## Commands
//!
//! - `run`: extract schema fields from a document with every credentialed
//!   provider (or a recorded run) and report the consensus
//! - `schema`: validate a schema file and print its fields

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, Level};

use xcheck_clients::{http_registry, ClientSettings};
use xcheck_core::fakes::Recording;
use xcheck_core::ingest::{load_document, load_schema};
use xcheck_core::obs::RunSpan;
use xcheck_core::reporting::{
    render_summary_md, write_report_csv, write_report_json, write_summary_md, ReportArtifact,
};
use xcheck_core::telemetry::init_tracing;
use xcheck_core::{
    ClientRegistry, EngineConfig, Orchestrator, Provider, ProviderCredentials, Schema,
    VerifiedReport,
};

#[derive(Parser)]
#[command(name = "xcheck")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Cross-validated report extraction across three model providers", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract every schema field from a document and score agreement
    Run(RunArgs),

    /// Validate a schema file (XLSX, CSV or JSON) and print its fields
    Schema {
        /// Path to the schema file
        path: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Report to verify: a PDF, or a UTF-8 or CP949 text file
    #[arg(short, long)]
    document: PathBuf,

    /// Schema file (XLSX, CSV or JSON)
    #[arg(short, long)]
    schema: PathBuf,

    /// TOML file with `[engine]` and `[clients]` tables
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Replay agent results from a recording instead of calling providers
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Save this run's agent results as a recording
    #[arg(long)]
    save_recording: Option<PathBuf>,

    /// Write the JSON report artifact
    #[arg(long)]
    out_json: Option<PathBuf>,

    /// Write the per-field CSV export
    #[arg(long)]
    out_csv: Option<PathBuf>,

    /// Write the Markdown summary (printed to stdout when omitted)
    #[arg(long)]
    summary: Option<PathBuf>,

    #[command(flatten)]
    keys: ApiKeys,
}

#[derive(Args, Default)]
struct ApiKeys {
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    anthropic_api_key: Option<String>,

    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    google_api_key: Option<String>,
}

impl ApiKeys {
    fn credentials(&self) -> ProviderCredentials {
        let mut credentials = ProviderCredentials::new();
        for (provider, key) in [
            (Provider::OpenAi, &self.openai_api_key),
            (Provider::Anthropic, &self.anthropic_api_key),
            (Provider::Google, &self.google_api_key),
        ] {
            if let Some(key) = key {
                credentials.set(provider, key.clone());
            }
        }
        credentials
    }
}

/// Contents of the `--config` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CliConfig {
    engine: EngineConfig,
    clients: ClientSettings,
}

impl CliConfig {
    fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);
    info!(version = xcheck_core::VERSION, "xcheck starting");

    match cli.command {
        Commands::Run(args) => cmd_run(&args).await,
        Commands::Schema { path } => cmd_schema(&path),
    }
}

async fn cmd_run(args: &RunArgs) -> Result<()> {
    let config = CliConfig::load(args.config.as_deref())?;
    let schema = load_schema(&args.schema)
        .with_context(|| format!("Failed to load schema {}", args.schema.display()))?;
    let document = load_document(&args.document)
        .with_context(|| format!("Failed to load document {}", args.document.display()))?;

    let (registry, credentials) = match &args.replay {
        Some(path) => replay_registry(path)?,
        None => {
            let credentials = args.keys.credentials();
            if credentials.enabled_providers().is_empty() {
                bail!(
                    "No provider credentials found. Set OPENAI_API_KEY, ANTHROPIC_API_KEY \
                     or GOOGLE_API_KEY, or pass --replay."
                );
            }
            let registry = http_registry(&credentials, &config.clients)
                .context("Failed to build provider clients")?;
            (registry, credentials)
        }
    };

    let orchestrator = Orchestrator::new(config.engine, registry).context("Invalid engine config")?;
    let report = orchestrator
        .run(&document, &schema, &credentials)
        .await
        .context("Extraction run rejected")?;

    export(args, &report)
}

fn replay_registry(path: &Path) -> Result<(ClientRegistry, ProviderCredentials)> {
    let recording = Recording::load(path)
        .with_context(|| format!("Failed to load recording {}", path.display()))?;
    let credentials = recording.credentials();
    Ok((recording.into_registry(), credentials))
}

fn export(args: &RunArgs, report: &VerifiedReport) -> Result<()> {
    let _span = RunSpan::enter(&report.run_id().to_string());

    if let Some(path) = &args.out_json {
        write_report_json(path, &ReportArtifact::from_report(report))?;
        info!(path = %path.display(), "wrote JSON report");
    }
    if let Some(path) = &args.out_csv {
        write_report_csv(path, report)?;
        info!(path = %path.display(), "wrote CSV export");
    }
    if let Some(path) = &args.save_recording {
        Recording::from_report(report)
            .save(path)
            .with_context(|| format!("Failed to save recording {}", path.display()))?;
        info!(path = %path.display(), "saved recording");
    }
    match &args.summary {
        Some(path) => {
            write_summary_md(path, report)?;
            info!(path = %path.display(), "wrote summary");
        }
        None => print!("{}", render_summary_md(report)),
    }
    Ok(())
}

fn cmd_schema(path: &Path) -> Result<()> {
    let schema = load_schema(path)
        .with_context(|| format!("Failed to load schema {}", path.display()))?;
    print!("{}", describe_schema(&schema));
    Ok(())
}

fn describe_schema(schema: &Schema) -> String {
    let mut out = format!("{} fields\n", schema.len());
    for field in schema.fields() {
        out.push_str(&format!("  {:<24} {:<8}", field.name, field.data_type));
        if let Some(category) = &field.category {
            out.push_str(&format!(" [{category}]"));
        }
        if !field.description.is_empty() {
            out.push_str(&format!(" {}", field.description));
        }
        out.push('\n');
    }
    out
}
