use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stampede_core::config::LoggingConfig;
use stampede_core::{SessionId, StampedeConfig, TestConfig};
use stampede_engine::ReportFormat;
use stampede_policy::PolicyManager;
use stampede_storage::ExportFormat;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

mod analyze;
mod policies;
mod run;
mod sessions;

#[derive(Parser, Debug)]
#[command(name = "stampede")]
#[command(about = "Load testing for HTTP and WebSocket services", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file; defaults to $STAMPEDE_CONFIG, ./config/stampede.* and /etc/stampede/stampede.*
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// JSON file of additional execution policies
    #[arg(long, global = true, env = "STAMPEDE_POLICIES")]
    policies: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a load test
    Run {
        /// Test configuration (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Policy to validate against and monitor with
        #[arg(long)]
        policy: Option<String>,

        /// Store the configuration and results as a session
        #[arg(long)]
        save: bool,

        /// Report format: md, json or csv
        #[arg(long)]
        report: Option<ReportFormat>,

        /// Write the report here instead of stdout
        #[arg(long, requires = "report")]
        output: Option<PathBuf>,

        /// Print stampede's own Prometheus metrics after the run
        #[arg(long)]
        print_metrics: bool,
    },

    /// Check a test configuration without generating traffic
    Validate {
        /// Test configuration (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Policy to validate against
        #[arg(long)]
        policy: String,
    },

    /// Manage stored sessions
    Sessions {
        #[command(subcommand)]
        command: SessionCommand,
    },

    /// Inspect execution policies
    Policies {
        #[command(subcommand)]
        command: PolicyCommand,
    },

    /// Analyze a stored session against the session history
    Analyze {
        #[arg(long)]
        session: SessionId,
    },

    /// Predict how a stored session's results scale to a target load
    Predict {
        #[arg(long)]
        session: SessionId,

        /// Target requests per second
        #[arg(long)]
        target_rps: f64,
    },
}

#[derive(Subcommand, Debug)]
enum SessionCommand {
    /// List sessions, most recently used first
    List,
    /// Show one session
    Show { id: SessionId },
    /// Delete a session
    Delete { id: SessionId },
    /// Copy a session's configuration into a new session
    Duplicate {
        id: SessionId,
        #[arg(long)]
        name: Option<String>,
    },
    /// Diff two sessions
    Compare { a: SessionId, b: SessionId },
    /// Search by name, description, environment and scenario names
    Search { query: String },
    /// Export a session
    Export {
        id: SessionId,
        #[arg(long, default_value = "json")]
        format: ExportFormat,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Import a session exported as JSON
    Import {
        file: PathBuf,
        #[arg(long, default_value = "json")]
        format: ExportFormat,
    },
    /// Aggregate statistics
    Stats,
}

#[derive(Subcommand, Debug)]
enum PolicyCommand {
    /// List available policies
    List,
    /// Show one policy as JSON
    Show { name: String },
    /// Export every policy as a JSON array
    Export {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Validate a policy file for use with --policies
    Import { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => StampedeConfig::from_file(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => StampedeConfig::load().context("failed to load settings")?,
    };
    init_logging(&settings.logging);

    let mut policies = PolicyManager::new();
    if let Some(path) = &cli.policies {
        let json = read(path)?;
        policies
            .import_policies(&json)
            .with_context(|| format!("failed to import policies from {}", path.display()))?;
    }

    match cli.command {
        Commands::Run {
            config,
            policy,
            save,
            report,
            output,
            print_metrics,
        } => {
            let options = run::RunOptions {
                policy,
                save,
                report,
                output,
                print_metrics,
            };
            run::run(settings, &mut policies, &config, options).await
        }
        Commands::Validate { config, policy } => run::validate(&mut policies, &config, &policy),
        Commands::Sessions { command } => sessions::handle(&settings, command).await,
        Commands::Policies { command } => policies::handle(&mut policies, command),
        Commands::Analyze { session } => analyze::analyze(&settings, session).await,
        Commands::Predict {
            session,
            target_rps,
        } => analyze::predict(&settings, session, target_rps).await,
    }
}

fn init_logging(logging: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = fmt().with_env_filter(env_filter).with_target(false);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

pub(crate) fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

pub(crate) fn load_test_config(path: &Path) -> Result<TestConfig> {
    let json = read(path)?;
    serde_json::from_str(&json)
        .with_context(|| format!("failed to parse test configuration {}", path.display()))
}

/// Writes `content` to `output`, or to stdout.
pub(crate) fn emit(content: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("✅ Wrote {}", path.display());
        }
        None => println!("{content}"),
    }
    Ok(())
}
