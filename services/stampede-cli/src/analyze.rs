use anyhow::{Context, Result};
use stampede_analyzer::MetricsAnalyzer;
use stampede_core::{SessionId, StampedeConfig, TestResults};
use stampede_storage::SessionStore;

/// Target session results plus an analyzer seeded with every other stored run.
async fn seeded_analyzer(
    settings: &StampedeConfig,
    id: SessionId,
) -> Result<(TestResults, MetricsAnalyzer)> {
    let mut store = SessionStore::open_local(&settings.sessions)
        .await
        .context("failed to open session store")?;
    let session = store.load_session(id).await?;
    let results = session
        .results
        .with_context(|| format!("session {id} has no results to analyze"))?;

    let mut analyzer = MetricsAnalyzer::new(settings.analyzer.clone());
    for past in store.results_history().await? {
        if past.test_id != results.test_id {
            analyzer.record(past);
        }
    }
    Ok((results, analyzer))
}

pub async fn analyze(settings: &StampedeConfig, id: SessionId) -> Result<()> {
    let (results, mut analyzer) = seeded_analyzer(settings, id).await?;
    let history = analyzer.history_len();
    let analysis = analyzer.analyze_results(&results);

    println!(
        "Analysis of '{}' against {} earlier runs (score {:.1})",
        results.config.name, history, analysis.performance_score
    );

    if !analysis.anomalies.is_empty() {
        println!("\nAnomalies:");
        for anomaly in &analysis.anomalies {
            println!("  [{}] {} ({})", anomaly.severity, anomaly.description, anomaly.impact);
        }
    }
    if !analysis.trends.is_empty() {
        println!("\nTrends:");
        for trend in &analysis.trends {
            let marker = if trend.degrading { "↘" } else { "↗" };
            println!("  {} {}", marker, trend.description);
        }
    }
    if !analysis.bottlenecks.is_empty() {
        println!("\nBottlenecks:");
        for b in &analysis.bottlenecks {
            println!("  [{}] {}", b.severity, b.description);
        }
    }
    if !analysis.recommendations.is_empty() {
        println!("\nRecommendations:");
        for recommendation in &analysis.recommendations {
            println!("  → {recommendation}");
        }
    }

    println!("\nModels:");
    for report in analyzer.train_models() {
        match (report.model, report.accuracy) {
            (Some(model), Some(accuracy)) => {
                println!("  {:?}: {} (R² {:.3})", report.target, model, accuracy)
            }
            _ => println!(
                "  {:?}: not trained ({} runs)",
                report.target, report.samples
            ),
        }
    }
    Ok(())
}

pub async fn predict(settings: &StampedeConfig, id: SessionId, target_rps: f64) -> Result<()> {
    if target_rps.is_nan() || target_rps <= 0.0 {
        anyhow::bail!("--target-rps must be greater than 0");
    }

    let (results, mut analyzer) = seeded_analyzer(settings, id).await?;
    analyzer.record(results.clone());
    analyzer.train_models();
    let prediction = analyzer.predict_load(&results.metrics, target_rps);

    println!(
        "Prediction for '{}' at {:.1} req/s ({:.2}x current, {:?})",
        results.config.name, prediction.target_load, prediction.scaling_ratio, prediction.method
    );
    println!("  Latency: {:.1}ms", prediction.predicted_latency);
    println!("  Error rate: {:.2}%", prediction.predicted_error_rate);
    println!("  Throughput: {:.1} req/s", prediction.predicted_throughput);
    println!("  Capacity estimate: {:.1} req/s", prediction.capacity_estimate);
    println!("  Confidence: {:.0}%", prediction.confidence * 100.0);
    for bottleneck in &prediction.bottlenecks {
        println!("  ⚠️  {bottleneck}");
    }
    for recommendation in &prediction.recommendations {
        println!("  → {recommendation}");
    }
    Ok(())
}
