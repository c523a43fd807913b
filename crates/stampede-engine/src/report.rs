//! Report generation for test results

use std::fmt::Write as _;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use stampede_core::{CoreError, CoreResult, TestResults};

/// Report format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Markdown,
    Json,
    /// Flattened `metric,value` rows
    Csv,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md" | "markdown" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(CoreError::ValidationError(format!(
                "unknown report format `{other}`"
            ))),
        }
    }
}

/// Renders [`TestResults`] for humans, dashboards and CI.
pub struct ResultWriter<'a> {
    results: &'a TestResults,
}

impl<'a> ResultWriter<'a> {
    pub fn new(results: &'a TestResults) -> Self {
        Self { results }
    }

    /// Render the report in `format`
    pub fn render(&self, format: ReportFormat) -> CoreResult<String> {
        match format {
            ReportFormat::Markdown => Ok(self.generate_markdown()),
            ReportFormat::Json => self.generate_json(),
            ReportFormat::Csv => self.generate_csv(),
        }
    }

    /// Write report to file
    pub fn write_report(&self, path: impl AsRef<Path>, format: ReportFormat) -> CoreResult<()> {
        let content = self.render(format)?;
        let mut file = File::create(path)?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }

    /// Flattened `(metric, value)` pairs, in report order.
    pub fn flatten(&self) -> Vec<(String, String)> {
        let r = self.results;
        let m = &r.metrics;
        let mut rows: Vec<(String, String)> = vec![
            ("test_id".into(), r.test_id.to_string()),
            ("name".into(), r.config.name.clone()),
            ("environment".into(), r.config.environment.to_string()),
            ("max_users".into(), r.config.max_users.to_string()),
            ("duration_secs".into(), format!("{:.3}", r.duration)),
            ("termination".into(), termination_label(r).to_string()),
            ("overall".into(), r.summary.overall.to_string()),
            ("score".into(), format!("{:.1}", r.summary.score)),
            ("grade".into(), r.summary.grade.to_string()),
            ("requests.total".into(), m.requests.total.to_string()),
            ("requests.successful".into(), m.requests.successful.to_string()),
            ("requests.failed".into(), m.requests.failed.to_string()),
            ("requests.success_rate".into(), format!("{:.2}", m.requests.success_rate)),
            ("latency.average".into(), format!("{:.2}", m.latency.average)),
            ("latency.p50".into(), format!("{:.2}", m.latency.p50)),
            ("latency.p95".into(), format!("{:.2}", m.latency.p95)),
            ("latency.p99".into(), format!("{:.2}", m.latency.p99)),
            ("latency.min".into(), format!("{:.2}", m.latency.min)),
            ("latency.max".into(), format!("{:.2}", m.latency.max)),
            (
                "throughput.requests_per_second".into(),
                format!("{:.2}", m.throughput.requests_per_second),
            ),
            (
                "throughput.bytes_per_second".into(),
                format!("{:.2}", m.throughput.bytes_per_second),
            ),
            ("errors.total".into(), m.errors.total.to_string()),
        ];

        for (kind, count) in &m.errors.by_type {
            rows.push((format!("errors.{kind}"), count.to_string()));
        }

        let ws = &m.websockets;
        rows.extend([
            ("websockets.connections".into(), ws.connections.to_string()),
            (
                "websockets.connection_errors".into(),
                ws.connection_errors.to_string(),
            ),
            ("websockets.messages_sent".into(), ws.messages_sent.to_string()),
            (
                "websockets.messages_received".into(),
                ws.messages_received.to_string(),
            ),
            (
                "websockets.avg_message_latency".into(),
                format!("{:.2}", ws.avg_message_latency),
            ),
        ]);

        for (key, value) in &m.custom {
            rows.push((format!("custom.{key}"), format!("{value:.2}")));
        }
        rows
    }

    fn generate_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self.results)?)
    }

    fn generate_csv(&self) -> CoreResult<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(["metric", "value"])
            .map_err(|e| CoreError::SerializationError(e.to_string()))?;
        for (metric, value) in self.flatten() {
            writer
                .write_record([metric.as_str(), value.as_str()])
                .map_err(|e| CoreError::SerializationError(e.to_string()))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| CoreError::SerializationError(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| CoreError::SerializationError(e.to_string()))
    }

    /// Generate Markdown report
    fn generate_markdown(&self) -> String {
        let r = self.results;
        let m = &r.metrics;
        let status = match r.summary.overall {
            stampede_core::Overall::Pass => "✅",
            stampede_core::Overall::Warning => "⚠️",
            stampede_core::Overall::Fail => "❌",
        };

        let mut report = format!(
            r#"# Load Test Report: {}

**Status**: {} {} (score {:.1}, grade {})
**Environment**: {}
**Users**: {}
**Duration**: {:.1}s
**Termination**: {}

## Requests

| Metric | Value |
|--------|-------|
| Total | {} |
| Successful | {} |
| Failed | {} |
| Success rate | {:.2}% |
| Throughput | {:.1} req/s |

## Latency

| Metric | Value |
|--------|-------|
| Average | {:.2}ms |
| P50 | {:.2}ms |
| P95 | {:.2}ms |
| P99 | {:.2}ms |
| Max | {:.2}ms |
"#,
            r.config.name,
            status,
            r.summary.overall,
            r.summary.score,
            r.summary.grade,
            r.config.environment,
            r.config.max_users,
            r.duration,
            termination_label(r),
            m.requests.total,
            m.requests.successful,
            m.requests.failed,
            m.requests.success_rate,
            m.throughput.requests_per_second,
            m.latency.average,
            m.latency.p50,
            m.latency.p95,
            m.latency.p99,
            m.latency.max,
        );

        if !m.requests.by_endpoint.is_empty() {
            report.push_str(
                "\n## Endpoints\n\n| Endpoint | Count | Success | Avg | P95 |\n|----------|-------|---------|-----|-----|\n",
            );
            for (endpoint, e) in &m.requests.by_endpoint {
                let _ = writeln!(
                    report,
                    "| {} | {} | {:.1}% | {:.1}ms | {:.1}ms |",
                    endpoint, e.count, e.success_rate, e.average_latency, e.p95_latency
                );
            }
        }

        if m.websockets.connections > 0 || m.websockets.connection_errors > 0 {
            let ws = &m.websockets;
            let _ = write!(
                report,
                "\n## WebSockets\n\n- Connections: {} ({} failed, {} reconnects)\n- Messages: {} sent, {} received\n- Avg message latency: {:.2}ms\n",
                ws.connections,
                ws.connection_errors,
                ws.reconnects,
                ws.messages_sent,
                ws.messages_received,
                ws.avg_message_latency
            );
        }

        if !m.errors.most_common.is_empty() {
            report.push_str("\n## Most Common Errors\n\n");
            for error in &m.errors.most_common {
                let _ = writeln!(report, "- {} × {}", error.count, error.message);
            }
        }

        if !r.summary.bottlenecks.is_empty() {
            report.push_str("\n## Bottlenecks\n\n");
            for b in &r.summary.bottlenecks {
                let _ = writeln!(report, "- **{}**: {} ({})", b.severity, b.description, b.impact);
            }
        }

        if !r.summary.recommendations.is_empty() {
            report.push_str("\n## Recommendations\n\n");
            for rec in &r.summary.recommendations {
                let _ = writeln!(report, "- {rec}");
            }
        }

        if !r.warnings.is_empty() {
            report.push_str("\n## Warnings\n\n");
            for warning in &r.warnings {
                let _ = writeln!(report, "- {warning}");
            }
        }

        report
    }
}

fn termination_label(results: &TestResults) -> &'static str {
    use stampede_core::Termination;
    match results.termination {
        Termination::Completed => "completed",
        Termination::StoppedByPolicy => "stopped_by_policy",
        Termination::DurationElapsed => "duration_elapsed",
        Termination::PauseTimeout => "pause_timeout",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stampede_core::{
        Environment, HttpStep, Metrics, RequestMetrics, Scenario, Step, Summary, TestConfig,
        TestId, Termination,
    };

    fn results() -> TestResults {
        let mut metrics = Metrics::default();
        metrics.requests = RequestMetrics::from_counts(95, 5);
        metrics.errors.total = 5;
        metrics.errors.by_type.insert("network".to_string(), 5);
        metrics.latency.p95 = 120.0;

        TestResults {
            test_id: TestId::new(),
            config: TestConfig {
                name: "smoke".to_string(),
                description: String::new(),
                environment: Environment::Staging,
                max_users: 10,
                duration: 30,
                scenarios: vec![Scenario {
                    name: "home".to_string(),
                    weight: 1.0,
                    flow: vec![Step::http(HttpStep::get("/"))],
                }],
                base_url: None,
                websocket_url: None,
            },
            start_time: Utc::now(),
            end_time: Utc::now(),
            duration: 30.0,
            summary: Summary::scored(&metrics),
            metrics,
            errors: Vec::new(),
            warnings: vec!["Scenario 'home' received 0 users".to_string()],
            termination: Termination::Completed,
        }
    }

    #[test]
    fn test_csv_is_flat_metric_value_rows() {
        let results = results();
        let csv = ResultWriter::new(&results).render(ReportFormat::Csv).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("metric,value"));
        assert!(csv.contains("requests.total,100"));
        assert!(csv.contains("errors.network,5"));
        assert!(csv.contains("overall,"));
    }

    #[test]
    fn test_json_round_trips() {
        let results = results();
        let json = ResultWriter::new(&results).render(ReportFormat::Json).unwrap();
        let parsed: TestResults = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, results);
    }

    #[test]
    fn test_markdown_and_file_output() {
        let results = results();
        let writer = ResultWriter::new(&results);
        let markdown = writer.render(ReportFormat::Markdown).unwrap();
        assert!(markdown.starts_with("# Load Test Report: smoke"));
        assert!(markdown.contains("## Warnings"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.md");
        writer.write_report(&path, ReportFormat::Markdown).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), markdown);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("md".parse::<ReportFormat>().unwrap(), ReportFormat::Markdown);
        assert_eq!("CSV".parse::<ReportFormat>().unwrap(), ReportFormat::Csv);
        assert!("xml".parse::<ReportFormat>().is_err());
    }
}
