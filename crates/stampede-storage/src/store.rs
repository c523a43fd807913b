//! Session store
//!
//! Sessions live at `sessions/{id}.json` in an [`ObjectStore`], with summaries cached in
//! `index.json`. The index is rewritten after every mutation and rebuilt from the session
//! objects when missing or unreadable. Once more than `max_sessions` are stored, the least
//! recently used (oldest `updated_at`, then lowest touch sequence) are evicted.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use stampede_core::config::SessionConfig;
use stampede_core::telemetry::SESSIONS_STORED;
use stampede_core::{CoreError, CoreResult, SessionId, TestConfig, TestResults};
use tracing::{debug, info, warn};

use crate::object_store::{LocalObjectStore, ObjectStore};
use crate::session::{
    ensure_results_match, relevance, ExportFormat, SearchResult, Session, SessionComparison,
    SessionMetadata, SessionStats, SessionSummary,
};

const INDEX_KEY: &str = "index.json";
const SESSIONS_PREFIX: &str = "sessions/";

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionIndex {
    #[serde(default)]
    next_sequence: u64,
    #[serde(default)]
    sessions: Vec<SessionSummary>,
}

impl SessionIndex {
    fn position(&self, id: SessionId) -> Option<usize> {
        self.sessions.iter().position(|s| s.id == id)
    }

    fn next_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    fn upsert(&mut self, summary: SessionSummary) {
        match self.position(summary.id) {
            Some(i) => self.sessions[i] = summary,
            None => self.sessions.push(summary),
        }
    }
}

fn session_key(id: SessionId) -> String {
    format!("{SESSIONS_PREFIX}{id}.json")
}

/// Persistent store of test sessions.
///
/// Not internally synchronised: mutating operations take `&mut self`.
pub struct SessionStore {
    store: Arc<dyn ObjectStore>,
    index: SessionIndex,
    max_sessions: usize,
}

impl SessionStore {
    /// Opens a store over `store`, loading or rebuilding the index.
    ///
    /// # Errors
    ///
    /// `ValidationError` when `max_sessions` is 0; otherwise storage failures while reading
    /// the index or the session objects.
    pub async fn open(store: Arc<dyn ObjectStore>, max_sessions: usize) -> CoreResult<Self> {
        if max_sessions == 0 {
            return Err(CoreError::ValidationError(
                "max_sessions must be greater than 0".to_string(),
            ));
        }

        let mut this = Self {
            store,
            index: SessionIndex::default(),
            max_sessions,
        };

        let stored = this.store.get(INDEX_KEY).await;
        match stored {
            Ok(bytes) => match serde_json::from_slice::<SessionIndex>(&bytes) {
                Ok(index) => this.index = index,
                Err(err) => {
                    warn!("Session index is unreadable ({}), rebuilding", err);
                    this.rebuild_index().await?;
                }
            },
            Err(err) if err.is_not_found() => this.rebuild_index().await?,
            Err(err) => return Err(err),
        }

        SESSIONS_STORED.set(this.index.sessions.len() as i64);
        debug!("Opened session store with {} sessions", this.index.sessions.len());
        Ok(this)
    }

    /// Filesystem-backed store rooted at `config.directory`.
    pub async fn open_local(config: &SessionConfig) -> CoreResult<Self> {
        let store = LocalObjectStore::new(&config.directory).await?;
        Self::open(Arc::new(store), config.max_sessions).await
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub fn len(&self) -> usize {
        self.index.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.sessions.is_empty()
    }

    /// Rebuilds `index.json` from the session objects.
    ///
    /// Objects that fail to parse are skipped with a warning.
    pub async fn rebuild_index(&mut self) -> CoreResult<()> {
        let mut objects = self.store.list(SESSIONS_PREFIX).await?;
        objects.sort_by(|a, b| a.last_modified.cmp(&b.last_modified));

        let mut index = SessionIndex::default();
        for object in objects {
            let bytes = self.store.get(&object.key).await?;
            match serde_json::from_slice::<Session>(&bytes) {
                Ok(session) => {
                    let sequence = index.next_sequence();
                    index.upsert(session.summarize(bytes.len() as u64, sequence));
                }
                Err(err) => warn!("Skipping unreadable session object {}: {}", object.key, err),
            }
        }

        info!("Rebuilt session index with {} sessions", index.sessions.len());
        self.index = index;
        self.persist_index().await
    }

    /// Saves a new session and returns its id.
    ///
    /// Evicts least recently used sessions beyond `max_sessions`; the new session is never
    /// evicted by its own save.
    pub async fn save_session(
        &mut self,
        config: &TestConfig,
        results: Option<&TestResults>,
    ) -> CoreResult<SessionId> {
        let session = Session::new(config.clone(), results.cloned())?;
        let id = session.id;
        self.write_session(&session).await?;
        info!("Saved session {} ('{}')", id, session.name);

        self.cleanup(id).await?;
        self.persist_index().await?;
        Ok(id)
    }

    /// Loads a session and marks it as recently used.
    ///
    /// # Errors
    ///
    /// `NotFound` when no session has this id.
    pub async fn load_session(&mut self, id: SessionId) -> CoreResult<Session> {
        let mut session = self.read_session(id).await?;
        session.updated_at = Utc::now();
        self.write_session(&session).await?;
        self.persist_index().await?;
        Ok(session)
    }

    /// Every session summary, most recently used first.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut sessions = self.index.sessions.clone();
        sessions.sort_by(|a, b| b.lru_key().cmp(&a.lru_key()));
        sessions
    }

    /// # Errors
    ///
    /// `NotFound` when no session has this id.
    pub async fn delete_session(&mut self, id: SessionId) -> CoreResult<()> {
        let position = self
            .index
            .position(id)
            .ok_or_else(|| CoreError::not_found("session", id.to_string()))?;

        self.store.delete(&session_key(id)).await?;
        self.index.sessions.remove(position);
        self.persist_index().await?;
        info!("Deleted session {}", id);
        Ok(())
    }

    /// Copies a session's configuration into a new session without results.
    ///
    /// The copy is named `new_name`, or `"<name> (copy)"` when none is given.
    pub async fn duplicate_session(
        &mut self,
        id: SessionId,
        new_name: Option<&str>,
    ) -> CoreResult<SessionId> {
        let source = self.read_session(id).await?;
        let mut config = source.config;
        config.name = match new_name {
            Some(name) => name.to_string(),
            None => format!("{} (copy)", source.name),
        };
        self.save_session(&config, None).await
    }

    /// Field-level differences between two sessions.
    ///
    /// Comparing does not count as using either session.
    pub async fn compare_sessions(
        &self,
        a: SessionId,
        b: SessionId,
    ) -> CoreResult<SessionComparison> {
        let a = self.read_session(a).await?;
        let b = self.read_session(b).await?;
        SessionComparison::between(&a, &b)
    }

    /// Sessions matching `query`, most relevant first.
    ///
    /// Matching is a case-insensitive substring test on name, description, environment and
    /// scenario names. Sessions with no match are left out.
    pub fn search_sessions(&self, query: &str) -> Vec<SearchResult> {
        let mut results: Vec<SearchResult> = self
            .index
            .sessions
            .iter()
            .filter_map(|summary| {
                let relevance = relevance(summary, query);
                (relevance > 0).then(|| SearchResult {
                    session: summary.clone(),
                    relevance,
                })
            })
            .collect();
        results.sort_by(|a, b| {
            b.relevance
                .cmp(&a.relevance)
                .then_with(|| b.session.lru_key().cmp(&a.session.lru_key()))
        });
        results
    }

    pub async fn export_session(&self, id: SessionId, format: ExportFormat) -> CoreResult<String> {
        let session = self.read_session(id).await?;
        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(&session)?),
            ExportFormat::Csv => {
                let mut writer = csv::Writer::from_writer(Vec::new());
                writer
                    .write_record(["field", "value"])
                    .map_err(|e| CoreError::SerializationError(e.to_string()))?;
                for (field, value) in session.flatten()? {
                    writer
                        .write_record([field.as_str(), value.as_str()])
                        .map_err(|e| CoreError::SerializationError(e.to_string()))?;
                }
                let bytes = writer
                    .into_inner()
                    .map_err(|e| CoreError::SerializationError(e.to_string()))?;
                String::from_utf8(bytes).map_err(|e| CoreError::SerializationError(e.to_string()))
            }
        }
    }

    /// Imports an exported session under a fresh id.
    ///
    /// # Errors
    ///
    /// `ValidationError` for CSV, which is lossy and export-only, or when the embedded results
    /// belong to a different configuration; `DeserializationError` for malformed JSON.
    pub async fn import_session(&mut self, data: &str, format: ExportFormat) -> CoreResult<SessionId> {
        if format == ExportFormat::Csv {
            return Err(CoreError::ValidationError(
                "CSV exports cannot be imported; use a JSON export".to_string(),
            ));
        }

        let imported: Session = serde_json::from_str(data)?;
        ensure_results_match(&imported.config, imported.results.as_ref())?;
        let metadata = SessionMetadata::compute(&imported.config, imported.results.as_ref())?;
        let now = Utc::now();
        let session = Session {
            id: SessionId::new(),
            created_at: now,
            updated_at: now,
            metadata,
            ..imported
        };
        let id = session.id;
        self.write_session(&session).await?;
        info!("Imported session {} ('{}')", id, session.name);

        self.cleanup(id).await?;
        self.persist_index().await?;
        Ok(id)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats::from_summaries(&self.index.sessions)
    }

    /// Results of every session that has them, in the order the runs started.
    ///
    /// Loading a session does not move its run in this history.
    pub async fn results_history(&self) -> CoreResult<Vec<TestResults>> {
        let mut summaries: Vec<&SessionSummary> = self
            .index
            .sessions
            .iter()
            .filter(|s| s.has_results())
            .collect();
        summaries.sort_by_key(|s| s.created_at);

        let mut history = Vec::with_capacity(summaries.len());
        for summary in summaries {
            if let Some(results) = self.read_session(summary.id).await?.results {
                history.push(results);
            }
        }
        history.sort_by_key(|r| r.start_time);
        Ok(history)
    }

    async fn read_session(&self, id: SessionId) -> CoreResult<Session> {
        if self.index.position(id).is_none() {
            return Err(CoreError::not_found("session", id.to_string()));
        }
        let bytes = self.store.get(&session_key(id)).await.map_err(|err| {
            if err.is_not_found() {
                CoreError::not_found("session", id.to_string())
            } else {
                err
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Writes the session object and refreshes its index entry. The index itself is not
    /// persisted here.
    async fn write_session(&mut self, session: &Session) -> CoreResult<()> {
        let bytes = serde_json::to_vec_pretty(session)?;
        let size = bytes.len() as u64;
        self.store
            .put(&session_key(session.id), Bytes::from(bytes))
            .await?;

        let sequence = self.index.next_sequence();
        self.index.upsert(session.summarize(size, sequence));
        Ok(())
    }

    async fn cleanup(&mut self, keep: SessionId) -> CoreResult<()> {
        while self.index.sessions.len() > self.max_sessions {
            let Some((position, victim)) = self
                .index
                .sessions
                .iter()
                .enumerate()
                .filter(|(_, s)| s.id != keep)
                .min_by_key(|(_, s)| s.lru_key())
                .map(|(i, s)| (i, s.id))
            else {
                break;
            };

            self.store.delete(&session_key(victim)).await?;
            self.index.sessions.remove(position);
            info!("Evicted least recently used session {}", victim);
        }
        Ok(())
    }

    async fn persist_index(&self) -> CoreResult<()> {
        let bytes = serde_json::to_vec_pretty(&self.index)?;
        self.store.put(INDEX_KEY, Bytes::from(bytes)).await?;
        SESSIONS_STORED.set(self.index.sessions.len() as i64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::MemoryObjectStore;
    use serde_json::Value;
    use stampede_core::{Environment, HttpStep, Metrics, Scenario, Step, Summary, TestId, Termination};

    fn config(name: &str, environment: Environment) -> TestConfig {
        TestConfig {
            name: name.to_string(),
            description: format!("{name} checkout journey"),
            environment,
            max_users: 10,
            duration: 60,
            scenarios: vec![Scenario {
                name: "browse catalog".to_string(),
                weight: 1.0,
                flow: vec![Step::http(HttpStep::get("/products"))],
            }],
            base_url: Some("http://shop.local".to_string()),
            websocket_url: None,
        }
    }

    fn results(config: &TestConfig, score_source: &Metrics) -> TestResults {
        TestResults {
            test_id: TestId::new(),
            config: config.clone(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            duration: 60.0,
            metrics: score_source.clone(),
            errors: Vec::new(),
            warnings: Vec::new(),
            termination: Termination::Completed,
            summary: Summary::scored(score_source),
        }
    }

    async fn store(max: usize) -> (MemoryObjectStore, SessionStore) {
        let objects = MemoryObjectStore::new();
        let store = SessionStore::open(Arc::new(objects.clone()), max)
            .await
            .unwrap();
        (objects, store)
    }

    #[tokio::test]
    async fn test_save_writes_session_and_index() {
        let (objects, mut store) = store(10).await;
        let id = store
            .save_session(&config("smoke", Environment::Staging), None)
            .await
            .unwrap();

        assert!(objects.exists(&session_key(id)).await.unwrap());
        assert!(objects.exists(INDEX_KEY).await.unwrap());
        assert_eq!(store.list_sessions()[0].id, id);
    }

    #[tokio::test]
    async fn test_load_touches_and_reorders() {
        let (_, mut store) = store(10).await;
        let first = store
            .save_session(&config("first", Environment::Staging), None)
            .await
            .unwrap();
        let second = store
            .save_session(&config("second", Environment::Staging), None)
            .await
            .unwrap();
        assert_eq!(store.list_sessions()[0].id, second);

        let before = store.list_sessions()[1].updated_at;
        let loaded = store.load_session(first).await.unwrap();
        assert!(loaded.updated_at >= before);
        assert_eq!(store.list_sessions()[0].id, first);
    }

    #[tokio::test]
    async fn test_lru_eviction_spares_touched_session() {
        let (_, mut store) = store(2).await;
        let a = store
            .save_session(&config("a", Environment::Staging), None)
            .await
            .unwrap();
        let b = store
            .save_session(&config("b", Environment::Staging), None)
            .await
            .unwrap();
        store.load_session(a).await.unwrap();
        let c = store
            .save_session(&config("c", Environment::Staging), None)
            .await
            .unwrap();

        let ids: Vec<SessionId> = store.list_sessions().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![c, a]);
        assert!(store.load_session(b).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_index_rebuilt_when_missing() {
        let (objects, mut store) = store(10).await;
        let id = store
            .save_session(&config("smoke", Environment::Staging), None)
            .await
            .unwrap();
        objects.delete(INDEX_KEY).await.unwrap();

        let reopened = SessionStore::open(Arc::new(objects.clone()), 10)
            .await
            .unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.list_sessions()[0].id, id);
    }

    #[tokio::test]
    async fn test_index_rebuilt_when_corrupt() {
        let (objects, mut store) = store(10).await;
        store
            .save_session(&config("smoke", Environment::Staging), None)
            .await
            .unwrap();
        objects
            .put(INDEX_KEY, Bytes::from("{not json"))
            .await
            .unwrap();

        let reopened = SessionStore::open(Arc::new(objects), 10).await.unwrap();
        assert_eq!(reopened.len(), 1);
    }

    #[tokio::test]
    async fn test_search_ranks_positive_matches_only() {
        let (_, mut store) = store(10).await;
        let checkout = store
            .save_session(&config("checkout", Environment::Production), None)
            .await
            .unwrap();
        let mut login = config("login", Environment::Staging);
        login.description = "sign in flow".to_string();
        login.scenarios[0].name = "login storm".to_string();
        store.save_session(&login, None).await.unwrap();

        let hits = store.search_sessions("checkout");
        // "login" has no checkout mention anywhere
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].session.id, checkout);
        // name exact (20) + description (5)
        assert_eq!(hits[0].relevance, 25);

        assert!(store.search_sessions("   ").is_empty());
        assert!(store.search_sessions("nothing-like-this").is_empty());
        assert_eq!(store.search_sessions("production").len(), 1);
    }

    #[tokio::test]
    async fn test_compare_with_results_reports_score_delta() {
        let (_, mut store) = store(10).await;
        let base = config("smoke", Environment::Staging);
        let mut good = Metrics::default();
        good.requests = stampede_core::RequestMetrics::from_counts(100, 0);
        let mut bad = good.clone();
        bad.requests = stampede_core::RequestMetrics::from_counts(80, 20);
        bad.errors.total = 20;

        let a = store
            .save_session(&base, Some(&results(&base, &good)))
            .await
            .unwrap();
        let mut changed = base.clone();
        changed.max_users = 50;
        let b = store
            .save_session(&changed, Some(&results(&changed, &bad)))
            .await
            .unwrap();

        let comparison = store.compare_sessions(a, b).await.unwrap();
        assert_eq!(comparison.config_differences.len(), 1);
        assert_eq!(comparison.config_differences[0].path, "max_users");
        assert!(!comparison.results_differences.is_empty());
        assert!(comparison.summary.contains("regressed"));
    }

    #[tokio::test]
    async fn test_compare_without_results() {
        let (_, mut store) = store(10).await;
        let a = store
            .save_session(&config("a", Environment::Staging), None)
            .await
            .unwrap();
        let b = store.duplicate_session(a, Some("b")).await.unwrap();

        let comparison = store.compare_sessions(a, b).await.unwrap();
        assert_eq!(comparison.config_differences.len(), 1);
        assert!(comparison.results_differences.is_empty());
        assert!(comparison.summary.contains("results unavailable"));
    }

    #[tokio::test]
    async fn test_duplicate_default_name() {
        let (_, mut store) = store(10).await;
        let a = store
            .save_session(&config("smoke", Environment::Staging), None)
            .await
            .unwrap();
        let copy = store.duplicate_session(a, None).await.unwrap();

        let session = store.load_session(copy).await.unwrap();
        assert_eq!(session.name, "smoke (copy)");
        assert_eq!(session.config.name, "smoke (copy)");
        assert!(session.results.is_none());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_stats_by_environment() {
        let (_, mut store) = store(10).await;
        assert_eq!(store.stats(), SessionStats::default());

        let base = config("a", Environment::Staging);
        store
            .save_session(&base, Some(&results(&base, &Metrics::default())))
            .await
            .unwrap();
        store
            .save_session(&config("b", Environment::Staging), None)
            .await
            .unwrap();
        store
            .save_session(&config("c", Environment::Production), None)
            .await
            .unwrap();

        let stats = store.stats();
        assert_eq!(stats.total_sessions, 3);
        assert_eq!(stats.sessions_with_results, 1);
        assert_eq!(stats.by_environment["staging"], 2);
        assert_eq!(stats.by_environment["production"], 1);
        assert!(stats.oldest_session <= stats.newest_session);
        assert_eq!(stats.average_size_bytes, stats.total_size_bytes / 3);
    }

    #[tokio::test]
    async fn test_csv_export_and_rejected_import() {
        let (_, mut store) = store(10).await;
        let id = store
            .save_session(&config("smoke", Environment::Staging), None)
            .await
            .unwrap();

        let csv = store.export_session(id, ExportFormat::Csv).await.unwrap();
        assert!(csv.starts_with("field,value"));
        assert!(csv.contains("config.max_users,10"));
        assert!(csv.contains("name,smoke"));

        let err = store
            .import_session(&csv, ExportFormat::Csv)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_results_history_oldest_first() {
        let (_, mut store) = store(10).await;
        let base = config("a", Environment::Staging);
        let first = results(&base, &Metrics::default());
        let second = results(&base, &Metrics::default());
        store.save_session(&base, Some(&first)).await.unwrap();
        store.save_session(&base, None).await.unwrap();
        store.save_session(&base, Some(&second)).await.unwrap();

        let history = store.results_history().await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].test_id, first.test_id);
        assert_eq!(history[1].test_id, second.test_id);
    }

    #[tokio::test]
    async fn test_history_follows_run_start_not_last_use() {
        let (_, mut store) = store(10).await;
        let base = config("a", Environment::Staging);

        let mut fast = Metrics::default();
        fast.throughput.requests_per_second = 100.0;
        let mut earlier = results(&base, &fast);
        earlier.start_time = Utc::now() - chrono::Duration::minutes(60);

        let mut slow = Metrics::default();
        slow.throughput.requests_per_second = 50.0;
        let mut later = results(&base, &slow);
        later.start_time = Utc::now() - chrono::Duration::minutes(30);

        let first = store.save_session(&base, Some(&earlier)).await.unwrap();
        store.save_session(&base, Some(&later)).await.unwrap();
        store.load_session(first).await.unwrap();

        let rps: Vec<f64> = store
            .results_history()
            .await
            .unwrap()
            .iter()
            .map(|r| r.metrics.throughput.requests_per_second)
            .collect();
        assert_eq!(rps, vec![100.0, 50.0]);
    }

    #[tokio::test]
    async fn test_results_from_another_config_rejected() {
        let (objects, mut store) = store(10).await;
        let mut other = config("other", Environment::Staging);
        other.max_users = 9999;
        let puts = objects.put_count();

        let mismatched = results(&other, &Metrics::default());

        let err = store
            .save_session(&config("a", Environment::Staging), Some(&mismatched))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
        assert!(store.is_empty());
        assert_eq!(objects.put_count(), puts);
    }

    #[tokio::test]
    async fn test_import_rejects_results_from_another_config() {
        let (_, mut store) = store(10).await;
        let base = config("a", Environment::Staging);
        let id = store
            .save_session(&base, Some(&results(&base, &Metrics::default())))
            .await
            .unwrap();

        let exported = store.export_session(id, ExportFormat::Json).await.unwrap();
        let mut tampered: Value = serde_json::from_str(&exported).unwrap();
        tampered["results"]["config"]["max_users"] = Value::from(9999);

        let err = store
            .import_session(&tampered.to_string(), ExportFormat::Json)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_capacity_rejected() {
        let result = SessionStore::open(Arc::new(MemoryObjectStore::new()), 0).await;
        assert!(matches!(result, Err(CoreError::ValidationError(_))));
    }
}
