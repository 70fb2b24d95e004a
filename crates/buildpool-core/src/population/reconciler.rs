//! Two-way reconciliation with the authoritative pool.
//!
//! A sync sends summaries of every published local builder and receives full
//! records to add plus ids to cull. Applying the response is replace-based
//! and idempotent: adds overwrite by id, culls of unknown ids are no-ops.
//! Unpublished drafts are keyed by their local discriminator and therefore
//! never culled. Records whose id or file paths would leave the builder
//! directory are skipped.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use buildpool_types::builder::BuilderKey;
use buildpool_types::config::SyncConfig;
use buildpool_types::error::{ArtifactRejection, AuthorityError};
use buildpool_types::sync::{BuilderRecord, SyncRequest, SyncResponse};

use super::Population;
use super::Upsert;
use super::authority::PoolAuthority;
use super::validator::{validate_key, validate_path};

/// What applying a sync response changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    /// Ids created fresh.
    pub added: Vec<String>,
    /// Ids overwritten in place.
    pub updated: Vec<String>,
    /// Ids removed.
    pub culled: Vec<String>,
    /// Cull ids that were not present locally.
    pub missing_culls: Vec<String>,
    /// Add or cull ids ignored because they are unsafe to store.
    pub rejected: Vec<String>,
}

impl ApplyReport {
    /// Ids whose local copy must be (re)written.
    pub fn written(&self) -> impl Iterator<Item = &String> {
        self.added.iter().chain(self.updated.iter())
    }

    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.culled.is_empty()
    }
}

/// An authority call that did not succeed within the retry budget.
#[derive(Debug)]
pub struct RetryFailure {
    pub attempts: u32,
    pub error: AuthorityError,
}

impl std::fmt::Display for RetryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (after {} attempt(s))", self.error, self.attempts)
    }
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    config: SyncConfig,
}

impl Reconciler {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Summaries of every published builder. An empty list is valid.
    pub fn build_request(&self, population: &Population) -> SyncRequest {
        SyncRequest {
            local_builders: population.summaries(),
        }
    }

    /// Apply an authority response to the replica.
    ///
    /// Adds are applied before culls, so an id present in both ends up
    /// removed. Overwrites keep the existing local discriminator.
    pub fn apply(
        &self,
        population: &mut Population,
        response: SyncResponse,
        now: DateTime<Utc>,
    ) -> ApplyReport {
        let mut report = ApplyReport::default();

        for record in response.add {
            if let Err(rejection) = check_record(&record) {
                tracing::warn!(id = %record.id, error = %rejection, "Skipping unsafe builder record");
                report.rejected.push(record.id);
                continue;
            }

            let id = record.id.clone();
            let existing_local_id = population.get_by_id(&id).map(|b| b.local_id);
            let builder = record.into_builder(existing_local_id, now);

            match population.upsert(builder) {
                Upsert::Inserted => report.added.push(id),
                Upsert::Replaced(_) => report.updated.push(id),
            }
        }

        for id in response.cull {
            if let Err(rejection) = validate_key(&id) {
                tracing::warn!(id = %id, error = %rejection, "Skipping unsafe cull id");
                report.rejected.push(id);
                continue;
            }
            match population.remove(&BuilderKey::Published(id.clone())) {
                Some(_) => report.culled.push(id),
                None => report.missing_culls.push(id),
            }
        }

        // An id both added and culled was only transiently present.
        report.added.retain(|id| !report.culled.contains(id));
        report.updated.retain(|id| !report.culled.contains(id));

        tracing::debug!(
            added = report.added.len(),
            updated = report.updated.len(),
            culled = report.culled.len(),
            missing_culls = report.missing_culls.len(),
            rejected = report.rejected.len(),
            "Applied sync response"
        );

        report
    }

    /// Whether the replica is stale: no marker yet, or the marker is older
    /// than the freshness window.
    pub fn is_sync_required(&self, last_sync: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_sync {
            None => true,
            Some(last) => {
                let age = now.signed_duration_since(last);
                age.num_seconds() < 0
                    || age.num_seconds() as u64 >= self.config.freshness_window_secs
            }
        }
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry - 1)`.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        backoff_delay(&self.config, retry)
    }

    /// Run one sync exchange with bounded retries.
    pub async fn exchange<A: PoolAuthority>(
        &self,
        authority: &A,
        request: &SyncRequest,
    ) -> Result<SyncResponse, RetryFailure> {
        retry_transient(&self.config, "sync", || authority.sync(request)).await
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}

/// An incoming record must be storable as `builders/{id}/` without any file
/// landing outside that directory.
fn check_record(record: &BuilderRecord) -> Result<(), ArtifactRejection> {
    validate_key(&record.id)?;
    for path in record.files_json.keys() {
        validate_path(path)?;
    }
    Ok(())
}

fn backoff_delay(config: &SyncConfig, retry: u32) -> Duration {
    let factor = 1u64 << retry.saturating_sub(1).min(16);
    Duration::from_millis(config.base_backoff_ms.saturating_mul(factor))
}

/// Call `op` until it succeeds, fails non-transiently, or the attempt budget
/// runs out, sleeping with exponential backoff between attempts.
pub async fn retry_transient<T, F, Fut>(
    config: &SyncConfig,
    operation: &str,
    mut op: F,
) -> Result<T, RetryFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AuthorityError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if !error.is_transient() => {
                tracing::debug!(operation, attempt, error = %error, "Authority call failed permanently");
                return Err(RetryFailure {
                    attempts: attempt,
                    error,
                });
            }
            Err(error) if attempt >= max_attempts => {
                return Err(RetryFailure {
                    attempts: attempt,
                    error,
                });
            }
            Err(error) => {
                let delay = backoff_delay(config, attempt);
                tracing::info!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Authority call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::population::fixtures::builder;
    use buildpool_types::builder::{Builder, FileMap};
    use buildpool_types::sync::{BuilderRecord, PublishRequest, PublishResponse};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    pub(crate) fn record(id: &str, fitness: f64) -> BuilderRecord {
        BuilderRecord {
            id: id.to_owned(),
            name: format!("builder-{id}"),
            description: format!("Builder {id}"),
            skill_md: format!("---\nname: builder-{id}\ndescription: Builder {id}\n---\n\nbody\n"),
            files_json: FileMap::new(),
            fitness_score: fitness,
            generation: 0,
            mutation_type: None,
            parent_ids: Vec::new(),
            skills_produced: 0,
            agent_runtime: None,
            created_at: None,
        }
    }

    /// Authority that replays scripted responses and counts calls.
    #[derive(Default)]
    pub(crate) struct ScriptedAuthority {
        pub sync_responses: Mutex<VecDeque<Result<SyncResponse, AuthorityError>>>,
        pub publish_responses: Mutex<VecDeque<Result<PublishResponse, AuthorityError>>>,
        pub sync_calls: AtomicU32,
        pub publish_calls: AtomicU32,
        pub last_sync_request: Mutex<Option<SyncRequest>>,
    }

    impl ScriptedAuthority {
        pub fn with_sync(responses: Vec<Result<SyncResponse, AuthorityError>>) -> Self {
            Self {
                sync_responses: Mutex::new(responses.into()),
                ..Self::default()
            }
        }
    }

    impl PoolAuthority for ScriptedAuthority {
        async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse, AuthorityError> {
            self.sync_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_sync_request.lock().unwrap() = Some(request.clone());
            self.sync_responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(SyncResponse::default()))
        }

        async fn publish(&self, request: &PublishRequest) -> Result<PublishResponse, AuthorityError> {
            let n = self.publish_calls.fetch_add(1, Ordering::SeqCst);
            self.publish_responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    Ok(PublishResponse {
                        id: format!("{}-{n}", request.name),
                    })
                })
        }
    }

    fn fast_config() -> SyncConfig {
        SyncConfig {
            base_backoff_ms: 1,
            ..SyncConfig::default()
        }
    }

    fn ids(population: &Population) -> Vec<String> {
        population
            .iter()
            .map(|b| b.id.clone().unwrap_or_else(|| b.key().to_string()))
            .collect()
    }

    #[test]
    fn test_scenario_add_x_cull_a() {
        let mut population =
            Population::from_builders(vec![builder("a", 1.0, 0), builder("b", 2.0, 0)]);
        let response = SyncResponse {
            add: vec![record("x", 4.0)],
            cull: vec!["a".to_owned()],
        };

        let report = Reconciler::default().apply(&mut population, response, Utc::now());

        let mut got = ids(&population);
        got.sort();
        assert_eq!(got, vec!["b", "x"]);
        assert_eq!(report.added, vec!["x"]);
        assert_eq!(report.culled, vec!["a"]);
        assert!(report.missing_culls.is_empty());
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut population =
            Population::from_builders(vec![builder("a", 1.0, 0), builder("b", 2.0, 0)]);
        let response = SyncResponse {
            add: vec![record("x", 4.0), record("b", 7.5)],
            cull: vec!["a".to_owned(), "ghost".to_owned()],
        };
        let reconciler = Reconciler::default();
        let now = Utc::now();

        reconciler.apply(&mut population, response.clone(), now);
        let once: Vec<Builder> = population.builders().to_vec();

        let second = reconciler.apply(&mut population, response, now);
        let twice = population.builders();

        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.local_id, b.local_id);
            assert_eq!(a.fitness_score, b.fitness_score);
            assert_eq!(a.instruction_text, b.instruction_text);
        }
        assert!(second.added.is_empty());
        assert_eq!(second.updated.len(), 2);
        assert_eq!(second.missing_culls, vec!["a", "ghost"]);
    }

    #[test]
    fn test_overwrite_keeps_local_discriminator() {
        let existing = builder("b", 2.0, 0);
        let local_id = existing.local_id;
        let mut population = Population::from_builders(vec![existing]);

        let report = Reconciler::default().apply(
            &mut population,
            SyncResponse {
                add: vec![record("b", 9.0)],
                cull: vec![],
            },
            Utc::now(),
        );

        assert_eq!(report.updated, vec!["b"]);
        let b = population.get_by_id("b").unwrap();
        assert_eq!(b.local_id, local_id);
        assert_eq!(b.fitness_score, 9.0);
        assert!(b.synced_at.is_some());
    }

    #[test]
    fn test_drafts_survive_sync() {
        let draft = Builder::genesis("draft-one", "d", "text", FileMap::new());
        let draft_key = draft.key();
        let mut population = Population::from_builders(vec![builder("a", 1.0, 0), draft]);

        let reconciler = Reconciler::default();
        let request = reconciler.build_request(&population);
        assert_eq!(request.local_builders.len(), 1);

        reconciler.apply(
            &mut population,
            SyncResponse {
                add: vec![],
                cull: vec!["a".to_owned(), draft_key.to_string()],
            },
            Utc::now(),
        );
        assert!(population.get(&draft_key).is_some());
        assert_eq!(population.len(), 1);
    }

    #[test]
    fn test_add_and_cull_same_id_removes_it() {
        let mut population = Population::new();
        let report = Reconciler::default().apply(
            &mut population,
            SyncResponse {
                add: vec![record("x", 1.0)],
                cull: vec!["x".to_owned()],
            },
            Utc::now(),
        );
        assert!(population.is_empty());
        assert!(report.added.is_empty());
        assert_eq!(report.culled, vec!["x"]);
    }

    #[test]
    fn test_unsafe_records_are_skipped() {
        let mut population = Population::from_builders(vec![builder("a", 1.0, 0)]);
        let mut escaping_file = record("y", 2.0);
        escaping_file
            .files_json
            .insert("../outside.md".to_owned(), "nope".to_owned());

        let report = Reconciler::default().apply(
            &mut population,
            SyncResponse {
                add: vec![record("x", 4.0), record("../../victim", 3.0), escaping_file],
                cull: vec!["../../victim".to_owned(), "..".to_owned()],
            },
            Utc::now(),
        );

        let mut got = ids(&population);
        got.sort();
        assert_eq!(got, vec!["a", "x"]);
        assert_eq!(report.added, vec!["x"]);
        assert_eq!(report.rejected, vec!["../../victim", "y", "../../victim", ".."]);
        assert!(report.culled.is_empty());
        assert!(report.missing_culls.is_empty());
    }

    #[test]
    fn test_staleness_marker() {
        let reconciler = Reconciler::default();
        let now = Utc::now();
        assert!(reconciler.is_sync_required(None, now));
        assert!(!reconciler.is_sync_required(Some(now - chrono::Duration::seconds(299)), now));
        assert!(reconciler.is_sync_required(Some(now - chrono::Duration::seconds(300)), now));
        assert!(reconciler.is_sync_required(Some(now + chrono::Duration::seconds(60)), now));
    }

    #[test]
    fn test_backoff_doubles() {
        let reconciler = Reconciler::default();
        assert_eq!(reconciler.backoff_delay(1), Duration::from_millis(500));
        assert_eq!(reconciler.backoff_delay(2), Duration::from_millis(1000));
        assert_eq!(reconciler.backoff_delay(3), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_exchange_retries_transient_failures() {
        let authority = ScriptedAuthority::with_sync(vec![
            Err(AuthorityError::Unreachable("connection refused".into())),
            Err(AuthorityError::Server {
                status: 503,
                message: "busy".into(),
            }),
            Ok(SyncResponse {
                add: vec![record("x", 1.0)],
                cull: vec![],
            }),
        ]);
        let reconciler = Reconciler::new(fast_config());

        let response = reconciler
            .exchange(&authority, &SyncRequest::default())
            .await
            .unwrap();
        assert_eq!(response.add.len(), 1);
        assert_eq!(authority.sync_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exchange_gives_up_after_max_attempts() {
        let authority = ScriptedAuthority::with_sync(
            (0..5)
                .map(|_| Err(AuthorityError::Unreachable("down".into())))
                .collect(),
        );
        let reconciler = Reconciler::new(fast_config());

        let failure = reconciler
            .exchange(&authority, &SyncRequest::default())
            .await
            .unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert_eq!(authority.sync_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exchange_does_not_retry_permanent_failures() {
        let authority = ScriptedAuthority::with_sync(vec![Err(AuthorityError::Unauthorized)]);
        let reconciler = Reconciler::new(fast_config());

        let failure = reconciler
            .exchange(&authority, &SyncRequest::default())
            .await
            .unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert!(matches!(failure.error, AuthorityError::Unauthorized));
    }
}
