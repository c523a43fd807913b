//! Persisted session records and the views derived from them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use stampede_core::{
    CoreError, CoreResult, Environment, Overall, SessionId, TestConfig, TestResults,
};

/// Results are only stored alongside the configuration that produced them.
pub(crate) fn ensure_results_match(
    config: &TestConfig,
    results: Option<&TestResults>,
) -> CoreResult<()> {
    match results {
        Some(results) if results.config != *config => Err(CoreError::ValidationError(format!(
            "results of test {} were produced by configuration '{}', not '{}'",
            results.test_id, results.config.name, config.name
        ))),
        _ => Ok(()),
    }
}

/// A test configuration, optionally with the results of running it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub config: TestConfig,
    #[serde(default)]
    pub results: Option<TestResults>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: SessionMetadata,
}

/// Content hashes used to detect changes between saves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Hex SHA-256 of the canonical JSON of `config`.
    pub config_hash: String,
    /// Hex SHA-256 of the canonical JSON of `results`, when present.
    #[serde(default)]
    pub results_hash: Option<String>,
}

impl Session {
    /// New session with a fresh id and both timestamps set to now.
    ///
    /// # Errors
    ///
    /// `ValidationError` when `results` were produced by a different configuration;
    /// serialization errors if either cannot be hashed.
    pub fn new(config: TestConfig, results: Option<TestResults>) -> CoreResult<Self> {
        ensure_results_match(&config, results.as_ref())?;
        let now = Utc::now();
        let metadata = SessionMetadata::compute(&config, results.as_ref())?;
        Ok(Self {
            id: SessionId::new(),
            name: config.name.clone(),
            description: config.description.clone(),
            config,
            results,
            created_at: now,
            updated_at: now,
            metadata,
        })
    }

    pub(crate) fn summarize(&self, size_bytes: u64, sequence: u64) -> SessionSummary {
        SessionSummary {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            environment: self.config.environment,
            scenario_names: self
                .config
                .scenarios
                .iter()
                .map(|s| s.name.clone())
                .collect(),
            score: self.results.as_ref().map(|r| r.summary.score),
            overall: self.results.as_ref().map(|r| r.summary.overall),
            size_bytes,
            created_at: self.created_at,
            updated_at: self.updated_at,
            sequence,
        }
    }

    /// `field,value` rows: session fields, then `config.*` and `results.*` leaves.
    pub fn flatten(&self) -> CoreResult<Vec<(String, String)>> {
        let mut rows = vec![
            ("id".to_string(), self.id.to_string()),
            ("name".to_string(), self.name.clone()),
            ("description".to_string(), self.description.clone()),
            ("created_at".to_string(), self.created_at.to_rfc3339()),
            ("updated_at".to_string(), self.updated_at.to_rfc3339()),
            ("config_hash".to_string(), self.metadata.config_hash.clone()),
        ];
        if let Some(hash) = &self.metadata.results_hash {
            rows.push(("results_hash".to_string(), hash.clone()));
        }

        let mut leaves = BTreeMap::new();
        flatten_json("config", &serde_json::to_value(&self.config)?, &mut leaves);
        rows.extend(leaves.into_iter().map(|(k, v)| (k, leaf_text(&v))));

        if let Some(results) = &self.results {
            let mut leaves = BTreeMap::new();
            flatten_json(
                "results.metrics",
                &serde_json::to_value(&results.metrics)?,
                &mut leaves,
            );
            flatten_json(
                "results.summary",
                &serde_json::to_value(&results.summary)?,
                &mut leaves,
            );
            rows.extend(leaves.into_iter().map(|(k, v)| (k, leaf_text(&v))));
        }
        Ok(rows)
    }
}

impl SessionMetadata {
    pub fn compute(config: &TestConfig, results: Option<&TestResults>) -> CoreResult<Self> {
        Ok(Self {
            config_hash: content_hash(config)?,
            results_hash: results.map(content_hash).transpose()?,
        })
    }
}

/// Hex SHA-256 of a value's JSON encoding.
pub fn content_hash<T: Serialize>(value: &T) -> CoreResult<String> {
    let bytes = serde_json::to_vec(value)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// Index entry for a stored session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub environment: Environment,
    #[serde(default)]
    pub scenario_names: Vec<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub overall: Option<Overall>,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Monotonic touch counter; breaks `updated_at` ties for LRU ordering.
    pub sequence: u64,
}

impl SessionSummary {
    pub fn has_results(&self) -> bool {
        self.score.is_some()
    }

    pub(crate) fn lru_key(&self) -> (DateTime<Utc>, u64) {
        (self.updated_at, self.sequence)
    }
}

/// A single differing leaf, addressed by dotted path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDifference {
    pub path: String,
    /// `null` when the field is absent on this side.
    pub a: Value,
    pub b: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionComparison {
    pub session_a: SessionId,
    pub session_b: SessionId,
    pub config_differences: Vec<FieldDifference>,
    /// Empty unless both sessions carry results.
    pub results_differences: Vec<FieldDifference>,
    pub summary: String,
}

impl SessionComparison {
    pub fn between(a: &Session, b: &Session) -> CoreResult<Self> {
        let config_differences = diff_values(
            "",
            &serde_json::to_value(&a.config)?,
            &serde_json::to_value(&b.config)?,
        );

        let (results_differences, score_line) = match (&a.results, &b.results) {
            (Some(ra), Some(rb)) => {
                let mut diffs = diff_values(
                    "metrics",
                    &serde_json::to_value(&ra.metrics)?,
                    &serde_json::to_value(&rb.metrics)?,
                );
                diffs.extend(diff_values(
                    "summary",
                    &serde_json::to_value(&ra.summary)?,
                    &serde_json::to_value(&rb.summary)?,
                ));
                (diffs, score_delta(ra, rb))
            }
            _ => (
                Vec::new(),
                "results unavailable for comparison".to_string(),
            ),
        };

        let summary = format!(
            "{} configuration difference(s); {}",
            config_differences.len(),
            score_line
        );

        Ok(Self {
            session_a: a.id,
            session_b: b.id,
            config_differences,
            results_differences,
            summary,
        })
    }
}

fn score_delta(a: &TestResults, b: &TestResults) -> String {
    let delta = b.summary.score - a.summary.score;
    let direction = if delta > 0.0 {
        "improved"
    } else if delta < 0.0 {
        "regressed"
    } else {
        "unchanged"
    };
    format!(
        "score {} by {:+.1} ({:.1} -> {:.1}, {} -> {}); error rate {:.2}% -> {:.2}%; P95 {:.1}ms -> {:.1}ms",
        direction,
        delta,
        a.summary.score,
        b.summary.score,
        a.summary.overall,
        b.summary.overall,
        a.metrics.error_rate(),
        b.metrics.error_rate(),
        a.metrics.latency.p95,
        b.metrics.latency.p95
    )
}

/// Ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub session: SessionSummary,
    pub relevance: u32,
}

const NAME_WEIGHT: u32 = 10;
const DESCRIPTION_WEIGHT: u32 = 5;
const ENVIRONMENT_WEIGHT: u32 = 3;
const SCENARIO_WEIGHT: u32 = 2;

/// Case-insensitive substring relevance of `summary` for `query`; 0 is no match.
pub(crate) fn relevance(summary: &SessionSummary, query: &str) -> u32 {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return 0;
    }
    let hit = |text: &str| text.to_lowercase().contains(&query);

    let mut score = 0;
    if hit(&summary.name) {
        score += NAME_WEIGHT;
        if summary.name.to_lowercase() == query {
            score += NAME_WEIGHT;
        }
    }
    if hit(&summary.description) {
        score += DESCRIPTION_WEIGHT;
    }
    if hit(summary.environment.as_str()) {
        score += ENVIRONMENT_WEIGHT;
    }
    score += SCENARIO_WEIGHT * summary.scenario_names.iter().filter(|n| hit(n)).count() as u32;
    score
}

/// Aggregates over every stored session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub sessions_with_results: usize,
    pub total_size_bytes: u64,
    pub average_size_bytes: u64,
    pub oldest_session: Option<DateTime<Utc>>,
    pub newest_session: Option<DateTime<Utc>>,
    pub by_environment: BTreeMap<String, usize>,
}

impl SessionStats {
    pub(crate) fn from_summaries<'a>(summaries: impl IntoIterator<Item = &'a SessionSummary>) -> Self {
        let mut stats = Self::default();
        for s in summaries {
            stats.total_sessions += 1;
            if s.has_results() {
                stats.sessions_with_results += 1;
            }
            stats.total_size_bytes += s.size_bytes;
            stats.oldest_session = Some(stats.oldest_session.map_or(s.created_at, |t| t.min(s.created_at)));
            stats.newest_session = Some(stats.newest_session.map_or(s.created_at, |t| t.max(s.created_at)));
            *stats
                .by_environment
                .entry(s.environment.to_string())
                .or_insert(0) += 1;
        }
        if stats.total_sessions > 0 {
            stats.average_size_bytes = stats.total_size_bytes / stats.total_sessions as u64;
        }
        stats
    }
}

/// Session export/import format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    /// Flattened `field,value` rows; export only
    Csv,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Csv => "csv",
        })
    }
}

impl FromStr for ExportFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(CoreError::ValidationError(format!(
                "unknown export format `{other}`"
            ))),
        }
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Collects the leaves of `value` keyed by dotted path. Empty containers are leaves.
pub(crate) fn flatten_json(prefix: &str, value: &Value, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                flatten_json(&join_path(prefix, key), child, out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (i, child) in items.iter().enumerate() {
                flatten_json(&join_path(prefix, &i.to_string()), child, out);
            }
        }
        _ => {
            out.insert(prefix.to_string(), value.clone());
        }
    }
}

fn leaf_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Leaf-level differences between `a` and `b`, sorted by path.
pub(crate) fn diff_values(prefix: &str, a: &Value, b: &Value) -> Vec<FieldDifference> {
    let mut left = BTreeMap::new();
    let mut right = BTreeMap::new();
    flatten_json(prefix, a, &mut left);
    flatten_json(prefix, b, &mut right);

    let mut paths: Vec<&String> = left.keys().chain(right.keys()).collect();
    paths.sort();
    paths.dedup();

    paths
        .into_iter()
        .filter_map(|path| {
            let a = left.get(path).cloned().unwrap_or(Value::Null);
            let b = right.get(path).cloned().unwrap_or(Value::Null);
            (a != b).then(|| FieldDifference {
                path: path.clone(),
                a,
                b,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_diff_reports_changed_added_and_removed_leaves() {
        let a = json!({"max_users": 10, "scenarios": [{"name": "browse"}], "base_url": "http://a"});
        let b = json!({"max_users": 20, "scenarios": [{"name": "browse"}, {"name": "buy"}]});

        let diffs = diff_values("", &a, &b);
        let paths: Vec<&str> = diffs.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["base_url", "max_users", "scenarios.1.name"]);
        assert_eq!(diffs[0].b, Value::Null);
        assert_eq!(diffs[1].a, json!(10));
    }

    #[test]
    fn test_identical_values_have_no_diff() {
        let v = json!({"a": {"b": [1, 2, 3]}});
        assert!(diff_values("x", &v, &v).is_empty());
    }

    #[test]
    fn test_hash_is_stable_and_content_sensitive() {
        let a = content_hash(&json!({"k": 1})).unwrap();
        assert_eq!(a, content_hash(&json!({"k": 1})).unwrap());
        assert_ne!(a, content_hash(&json!({"k": 2})).unwrap());
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_export_format_parsing() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!("csv".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!("yaml".parse::<ExportFormat>().is_err());
    }
}
