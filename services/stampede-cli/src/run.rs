use anyhow::{bail, Context, Result};
use stampede_core::{telemetry, CoreError, Overall, StampedeConfig, TestResults};
use stampede_engine::{FunctionRegistry, LoadTestOrchestrator, ReportFormat, ResultWriter};
use stampede_policy::{PolicyManager, ValidationReport};
use stampede_storage::SessionStore;
use std::path::{Path, PathBuf};

pub struct RunOptions {
    pub policy: Option<String>,
    pub save: bool,
    pub report: Option<ReportFormat>,
    pub output: Option<PathBuf>,
    pub print_metrics: bool,
}

pub async fn run(
    mut settings: StampedeConfig,
    policies: &mut PolicyManager,
    config_path: &Path,
    options: RunOptions,
) -> Result<()> {
    let test = crate::load_test_config(config_path)?;

    if let Some(policy) = options.policy {
        let report = policies.validate_test_config(&test, &policy)?;
        print_validation(&policy, &report);
        if !report.is_valid {
            bail!("test configuration violates policy '{policy}'");
        }
        settings.monitoring.policy = Some(policy);
    }

    let orchestrator =
        LoadTestOrchestrator::with_default_transports(settings.clone(), FunctionRegistry::new())
            .context("failed to initialize transports")?;

    println!("🚀 Running '{}' with {} users...", test.name, test.max_users);
    let results = match orchestrator.run_test(&test, policies).await {
        Ok(results) => results,
        Err(CoreError::InvalidConfig { errors }) => {
            println!("❌ Invalid test configuration:");
            for error in &errors {
                println!("  - {error}");
            }
            bail!("{} configuration error(s)", errors.len());
        }
        Err(err) => return Err(err.into()),
    };
    print_results(&results);

    if let Some(format) = options.report {
        let rendered = ResultWriter::new(&results).render(format)?;
        crate::emit(&rendered, options.output.as_deref())?;
    }

    if options.save {
        let mut store = SessionStore::open_local(&settings.sessions)
            .await
            .context("failed to open session store")?;
        let id = store.save_session(&test, Some(&results)).await?;
        println!("💾 Saved session {id}");
    }

    if options.print_metrics {
        println!("{}", telemetry::render());
    }

    if results.summary.overall == Overall::Fail {
        std::process::exit(1);
    }
    Ok(())
}

pub fn validate(policies: &mut PolicyManager, config_path: &Path, policy: &str) -> Result<()> {
    let test = crate::load_test_config(config_path)?;

    let structural = test.structural_errors();
    if !structural.is_empty() {
        println!("❌ Invalid test configuration:");
        for error in &structural {
            println!("  - {error}");
        }
        std::process::exit(1);
    }

    let report = policies.validate_test_config(&test, policy)?;
    print_validation(policy, &report);
    if !report.is_valid {
        std::process::exit(1);
    }
    println!("✅ '{}' is valid under policy '{}'", test.name, policy);
    Ok(())
}

fn print_validation(policy: &str, report: &ValidationReport) {
    if !report.is_valid {
        println!("❌ Policy '{policy}' rejected the configuration:");
    }
    for violation in &report.violations {
        println!("  - {violation}");
    }
    for warning in &report.warnings {
        println!("  ⚠️  {warning}");
    }
}

fn print_results(results: &TestResults) {
    let m = &results.metrics;
    let status = match results.summary.overall {
        Overall::Pass => "✅",
        Overall::Warning => "⚠️ ",
        Overall::Fail => "❌",
    };

    println!(
        "\n{} {} (score {:.1}, grade {})",
        status, results.summary.overall, results.summary.score, results.summary.grade
    );
    println!("  Duration: {:.1}s", results.duration);
    println!(
        "  Requests: {} total, {} failed ({:.2}% success)",
        m.requests.total, m.requests.failed, m.requests.success_rate
    );
    println!(
        "  Latency: avg {:.1}ms, P95 {:.1}ms, P99 {:.1}ms",
        m.latency.average, m.latency.p95, m.latency.p99
    );
    println!("  Throughput: {:.1} req/s", m.throughput.requests_per_second);
    if m.websockets.connections > 0 || m.websockets.connection_errors > 0 {
        println!(
            "  WebSockets: {} connections, {} errors, {} sent, {} received",
            m.websockets.connections,
            m.websockets.connection_errors,
            m.websockets.messages_sent,
            m.websockets.messages_received
        );
    }
    for warning in &results.warnings {
        println!("  ⚠️  {warning}");
    }
    for recommendation in &results.summary.recommendations {
        println!("  → {recommendation}");
    }
}
