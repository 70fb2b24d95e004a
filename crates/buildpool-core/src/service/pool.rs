//! Population service: the control loop around the local replica.
//!
//! Owns the in-memory [`Population`] and keeps it in step with the store.
//! Every operation that changes a builder writes the store first and only
//! then updates memory, so a failure part way leaves both at the last good
//! state. One service instance is the single writer for its replica.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;

use buildpool_types::builder::{Builder, BuilderKey, GeneratedArtifact, MutationType};
use buildpool_types::config::PoolConfig;
use buildpool_types::error::{ArtifactRejection, AuthorityError, PoolError};
use buildpool_types::sync::PublishRequest;

use crate::population::Population;
use crate::population::authority::PoolAuthority;
use crate::population::idea::IdeaSource;
use crate::population::mutator::{Ineligibility, MutationPlan, Mutator};
use crate::population::reconciler::{ApplyReport, Reconciler, RetryFailure, retry_transient};
use crate::population::rewriter::ContentRewriter;
use crate::population::selector::{SelectionBranch, Selector};
use crate::population::validator::Validator;
use crate::repository::population::PopulationStore;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Replica health at a glance.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub size: usize,
    pub published: usize,
    pub drafts: usize,
    pub total_fitness: f64,
    pub max_generation: Option<u32>,
    pub last_sync: Option<DateTime<Utc>>,
    pub sync_required: bool,
}

/// Result of a sync attempt. Authority failures never fail the caller; they
/// leave the replica at its last-known-good state.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The marker was recent enough; no exchange happened.
    Fresh,
    Synced(ApplyReport),
    Stale { attempts: u32, reason: String },
}

impl SyncOutcome {
    /// The outcome as an error, for callers that require a completed sync.
    pub fn into_result(self) -> Result<Option<ApplyReport>, PoolError> {
        match self {
            SyncOutcome::Fresh => Ok(None),
            SyncOutcome::Synced(report) => Ok(Some(report)),
            SyncOutcome::Stale { attempts, reason } => {
                Err(PoolError::SyncUnavailable { attempts, reason })
            }
        }
    }
}

/// A selected builder, detached from the population borrow.
#[derive(Debug, Clone, Serialize)]
pub struct SelectionReport {
    pub key: String,
    pub id: Option<String>,
    pub name: String,
    pub branch: SelectionBranch,
    pub fitness_score: f64,
    pub generation: u32,
    pub skills_produced: u32,
}

impl SelectionReport {
    pub fn builder_key(&self) -> BuilderKey {
        // Keys are produced by `BuilderKey::to_string`, so this always parses.
        self.key
            .parse()
            .unwrap_or_else(|_| BuilderKey::Published(self.key.clone()))
    }
}

/// Result of trying to evolve a parent.
#[derive(Debug, Clone)]
pub enum EvolveOutcome {
    NotEligible {
        parent: String,
        reason: Ineligibility,
    },
    /// A validated child draft was stored locally.
    Created {
        child: Box<Builder>,
        attempts: u32,
    },
    /// Every rewrite was rejected; nothing was stored.
    Skipped {
        parent: String,
        rejection: ArtifactRejection,
        attempts: u32,
    },
}

/// Where a recorded artifact went and the originating builder's new count.
#[derive(Debug, Clone, Serialize)]
pub struct RecordReport {
    pub builder: String,
    pub skills_produced: u32,
    pub path: PathBuf,
}

/// Mutation step of an iteration, flattened for reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MutationReport {
    NotEligible {
        reason: String,
    },
    Skipped {
        reason: String,
        attempts: u32,
    },
    Created {
        key: String,
        name: String,
        mutation_type: Option<MutationType>,
        generation: u32,
        attempts: u32,
        published_id: Option<String>,
    },
}

/// Everything one pass of the control loop did.
#[derive(Debug, Clone, Serialize)]
pub struct IterationReport {
    pub sync: SyncOutcome,
    pub selection: SelectionReport,
    pub mutation: MutationReport,
}

/// Stage of the control loop an iteration failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationStage {
    Sync,
    Select,
    Mutate,
    Rewrite,
    Publish,
}

impl std::fmt::Display for IterationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IterationStage::Sync => "sync",
            IterationStage::Select => "select",
            IterationStage::Mutate => "mutate",
            IterationStage::Rewrite => "rewrite",
            IterationStage::Publish => "publish",
        };
        f.write_str(s)
    }
}

/// A terminal iteration failure with the stage and builder it happened on.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed{}: {error}", .builder.as_ref().map(|b| format!(" for '{b}'")).unwrap_or_default())]
pub struct IterationFailure {
    pub stage: IterationStage,
    pub builder: Option<String>,
    #[source]
    pub error: PoolError,
}

impl IterationFailure {
    fn new(stage: IterationStage, builder: Option<&str>, error: PoolError) -> Self {
        Self {
            stage,
            builder: builder.map(str::to_owned),
            error,
        }
    }
}

// ---------------------------------------------------------------------------
// PopulationService
// ---------------------------------------------------------------------------

/// Service managing the builder population.
///
/// Generic over the store, the authority transport, and the content rewriter
/// so core never depends on infrastructure.
pub struct PopulationService<S: PopulationStore, A: PoolAuthority, W: ContentRewriter> {
    store: S,
    authority: A,
    rewriter: W,
    population: Population,
    selector: Selector,
    mutator: Mutator,
    validator: Validator,
    reconciler: Reconciler,
    agent_runtime: Option<String>,
    rng: StdRng,
}

impl<S: PopulationStore, A: PoolAuthority, W: ContentRewriter> PopulationService<S, A, W> {
    /// Load the replica from `store` and wire up the components from `config`.
    pub async fn open(
        store: S,
        authority: A,
        rewriter: W,
        config: &PoolConfig,
    ) -> Result<Self, PoolError> {
        let builders = store.load_all().await?;
        tracing::debug!(count = builders.len(), "Loaded population");

        Ok(Self {
            store,
            authority,
            rewriter,
            population: Population::from_builders(builders),
            selector: Selector::new(config.selection.clone()),
            mutator: Mutator::new(&config.mutation),
            validator: Validator::new(config.validation.clone()),
            reconciler: Reconciler::new(config.sync.clone()),
            agent_runtime: config.agent_runtime.clone(),
            rng: StdRng::from_entropy(),
        })
    }

    /// Replace the random source, e.g. with a seeded one.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn mutator(&self) -> &Mutator {
        &self.mutator
    }

    fn lookup(&self, key: &BuilderKey) -> Result<&Builder, PoolError> {
        self.population
            .get(key)
            .ok_or_else(|| PoolError::NotFound(key.to_string()))
    }

    pub async fn status(&self) -> Result<PoolStatus, PoolError> {
        let last_sync = self.store.last_sync().await?;
        let drafts = self.population.drafts().count();

        Ok(PoolStatus {
            size: self.population.len(),
            published: self.population.len() - drafts,
            drafts,
            total_fitness: self.population.total_fitness(),
            max_generation: self.population.max_generation(),
            last_sync,
            sync_required: self.reconciler.is_sync_required(last_sync, Utc::now()),
        })
    }

    /// Run one sync exchange and apply the result.
    ///
    /// Authority failures come back as [`SyncOutcome::Stale`]; only store
    /// failures are errors.
    #[tracing::instrument(name = "sync", skip_all)]
    pub async fn sync(&mut self) -> Result<SyncOutcome, PoolError> {
        let request = self.reconciler.build_request(&self.population);

        let response = match self.reconciler.exchange(&self.authority, &request).await {
            Ok(response) => response,
            Err(RetryFailure { attempts, error }) => {
                if error.is_transient() {
                    tracing::warn!(attempts, error = %error, "Authority unavailable; using last-known-good replica");
                } else {
                    tracing::error!(attempts, error = %error, "Authority rejected sync; using last-known-good replica");
                }
                return Ok(SyncOutcome::Stale {
                    attempts,
                    reason: error.to_string(),
                });
            }
        };

        let now = Utc::now();
        let mut next = self.population.clone();
        let report = self.reconciler.apply(&mut next, response, now);

        for id in report.written() {
            if let Some(builder) = next.get_by_id(id) {
                self.store.save(builder).await?;
            }
        }
        for id in &report.culled {
            self.store.remove(&BuilderKey::Published(id.clone())).await?;
        }
        self.store.record_sync(now).await?;
        self.population = next;

        tracing::info!(
            added = report.added.len(),
            updated = report.updated.len(),
            culled = report.culled.len(),
            "Sync complete"
        );
        Ok(SyncOutcome::Synced(report))
    }

    /// Sync only when the staleness marker says so.
    pub async fn ensure_fresh(&mut self) -> Result<SyncOutcome, PoolError> {
        let last_sync = self.store.last_sync().await?;
        if self.reconciler.is_sync_required(last_sync, Utc::now()) {
            self.sync().await
        } else {
            Ok(SyncOutcome::Fresh)
        }
    }

    /// Pick one builder with the epsilon-greedy policy.
    pub fn select(&mut self) -> Result<SelectionReport, PoolError> {
        let selection = self.selector.select(&self.population, &mut self.rng)?;
        let builder = selection.builder;

        tracing::debug!(builder = %builder.name, branch = %selection.branch, "Selected builder");

        Ok(SelectionReport {
            key: builder.key().to_string(),
            id: builder.id.clone(),
            name: builder.name.clone(),
            branch: selection.branch,
            fitness_score: builder.fitness_score,
            generation: builder.generation,
            skills_produced: builder.skills_produced,
        })
    }

    /// Sync when the marker is missing or stale, then select. A stale
    /// outcome still selects from the last-known-good replica.
    pub async fn select_fresh(&mut self) -> Result<(SyncOutcome, SelectionReport), PoolError> {
        let sync = self.ensure_fresh().await?;
        let selection = self.select()?;
        Ok((sync, selection))
    }

    /// Mutate `parent_key` into a validated local draft.
    ///
    /// Rejected rewrites are retried with the rejection as feedback up to the
    /// configured retry count; after that the mutation is skipped, which is
    /// not an error.
    #[tracing::instrument(name = "evolve", skip_all, fields(parent = %parent_key))]
    pub async fn evolve(
        &mut self,
        parent_key: &BuilderKey,
        idea: Option<String>,
    ) -> Result<EvolveOutcome, PoolError> {
        let parent = self.lookup(parent_key)?.clone();

        let draft = match self
            .mutator
            .plan(&parent, self.agent_runtime.clone(), &mut self.rng)
        {
            MutationPlan::NotEligible(reason) => {
                tracing::info!(parent = %parent.name, reason = %reason, "Parent not eligible for mutation");
                return Ok(EvolveOutcome::NotEligible {
                    parent: parent.name,
                    reason,
                });
            }
            MutationPlan::Ready(draft) => *draft,
        };

        let mut directive = draft.directive;
        directive.idea = idea;

        let max_attempts = self.validator.config().max_retries + 1;
        let mut last_rejection = None;

        for attempt in 1..=max_attempts {
            let content = self
                .rewriter
                .rewrite(&directive)
                .await
                .map_err(|e| PoolError::Rewrite(format!("{e:#}")))?;

            let mut child = draft.child.clone();
            self.mutator.attach(&mut child, content);

            match self.validator.validate_mutation(&child, &parent) {
                Ok(_) => {
                    self.store.save(&child).await?;
                    tracing::info!(
                        child = %child.name,
                        mutation = %directive.mutation_type,
                        attempt,
                        "Created child draft"
                    );
                    self.population.upsert(child.clone());
                    return Ok(EvolveOutcome::Created {
                        child: Box::new(child),
                        attempts: attempt,
                    });
                }
                Err(rejection) => {
                    tracing::warn!(child = %child.name, attempt, reason = %rejection, "Rewrite rejected");
                    directive.feedback = Some(rejection.to_string());
                    last_rejection = Some(rejection);
                }
            }
        }

        let rejection = last_rejection.unwrap_or_else(|| {
            ArtifactRejection::MissingMetadata("no rewrite attempted".to_owned())
        });
        tracing::warn!(parent = %parent.name, reason = %rejection, "Mutation skipped");
        Ok(EvolveOutcome::Skipped {
            parent: parent.name,
            rejection,
            attempts: max_attempts,
        })
    }

    /// Publish a local draft and rekey it under its authority id.
    ///
    /// Already-published builders are returned unchanged.
    #[tracing::instrument(name = "publish", skip_all, fields(builder = %key))]
    pub async fn publish(&mut self, key: &BuilderKey) -> Result<Builder, PoolError> {
        let draft = self.lookup(key)?.clone();
        if draft.is_published() {
            return Ok(draft);
        }

        self.validator.validate(&draft)?;

        let request = PublishRequest::from_builder(&draft);
        let authority = &self.authority;
        let response = retry_transient(self.reconciler.config(), "publish", || {
            authority.publish(&request)
        })
        .await
        .map_err(|RetryFailure { attempts, error }| match error {
            AuthorityError::Conflict(_) => PoolError::PublishConflict(draft.name.clone()),
            error if error.is_transient() => PoolError::SyncUnavailable {
                attempts,
                reason: error.to_string(),
            },
            error => PoolError::Authority(error.to_string()),
        })?;

        let now = Utc::now();
        let mut published = draft.clone();
        published.id = Some(response.id.clone());
        published.synced_at = Some(now);

        // New copy first so a crash in between leaves a duplicate, not a loss.
        self.store.save(&published).await?;
        self.store.remove(&BuilderKey::Local(draft.local_id)).await?;
        self.population
            .mark_published(draft.local_id, response.id.clone(), now);

        tracing::info!(builder = %published.name, id = %response.id, "Published builder");
        Ok(published)
    }

    /// Record an artifact produced by `builder_key` and credit the builder.
    pub async fn record_artifact(
        &mut self,
        builder_key: &BuilderKey,
        artifact: GeneratedArtifact,
    ) -> Result<RecordReport, PoolError> {
        let mut builder = self.lookup(builder_key)?.clone();
        self.validator.validate(&artifact)?;

        let path = self.store.save_artifact(&artifact).await?;
        builder.skills_produced += 1;
        self.store.save(&builder).await?;

        tracing::info!(
            builder = %builder.name,
            artifact = %artifact.name,
            skills_produced = builder.skills_produced,
            "Recorded artifact"
        );

        let report = RecordReport {
            builder: builder.name.clone(),
            skills_produced: builder.skills_produced,
            path,
        };
        self.population.upsert(builder);
        Ok(report)
    }

    /// Import a genesis builder from a validated artifact.
    ///
    /// The declared frontmatter name and description win over the artifact's
    /// own fields.
    pub async fn seed(&mut self, artifact: GeneratedArtifact) -> Result<Builder, PoolError> {
        let declared = self.validator.validate(&artifact)?;
        let name = declared.name.unwrap_or(artifact.name);
        let description = declared.description.unwrap_or(artifact.description);

        if self.population.find_by_name(&name).is_some() {
            return Err(PoolError::PublishConflict(name));
        }

        let mut builder = Builder::genesis(
            name,
            description,
            artifact.instruction_text,
            artifact.supporting_files,
        );
        builder.agent_runtime = self.agent_runtime.clone();

        self.store.save(&builder).await?;
        tracing::info!(builder = %builder.name, key = %builder.key(), "Seeded genesis builder");
        self.population.upsert(builder.clone());
        Ok(builder)
    }

    /// One pass of the control loop: sync if stale, select, and try to evolve
    /// the selected builder, publishing the child when `publish` is set.
    pub async fn run_iteration<I: IdeaSource>(
        &mut self,
        ideas: &I,
        publish: bool,
    ) -> Result<IterationReport, IterationFailure> {
        let sync = self
            .ensure_fresh()
            .await
            .map_err(|e| IterationFailure::new(IterationStage::Sync, None, e))?;

        let selection = self
            .select()
            .map_err(|e| IterationFailure::new(IterationStage::Select, None, e))?;

        let idea = match ideas.next_idea().await {
            Ok(idea) => idea,
            Err(e) => {
                tracing::warn!(error = %e, "Idea source failed; mutating without an idea");
                None
            }
        };

        let parent_key = selection.builder_key();
        let outcome = self
            .evolve(&parent_key, idea)
            .await
            .map_err(|e| {
                let stage = match e {
                    PoolError::Rewrite(_) => IterationStage::Rewrite,
                    _ => IterationStage::Mutate,
                };
                IterationFailure::new(stage, Some(&selection.name), e)
            })?;

        let mutation = match outcome {
            EvolveOutcome::NotEligible { reason, .. } => MutationReport::NotEligible {
                reason: reason.to_string(),
            },
            EvolveOutcome::Skipped {
                rejection,
                attempts,
                ..
            } => MutationReport::Skipped {
                reason: rejection.to_string(),
                attempts,
            },
            EvolveOutcome::Created { child, attempts } => {
                let published_id = if publish {
                    let published = self.publish(&child.key()).await.map_err(|e| {
                        IterationFailure::new(IterationStage::Publish, Some(&child.name), e)
                    })?;
                    published.id
                } else {
                    None
                };
                MutationReport::Created {
                    key: published_id
                        .clone()
                        .unwrap_or_else(|| child.key().to_string()),
                    name: child.name.clone(),
                    mutation_type: child.mutation_type,
                    generation: child.generation,
                    attempts,
                    published_id,
                }
            }
        };

        Ok(IterationReport {
            sync,
            selection,
            mutation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::population::fixtures::{builder, skill_md};
    use crate::population::reconciler::tests::{ScriptedAuthority, record};
    use crate::population::rewriter::{MutationDirective, RewrittenContent};
    use crate::population::idea::FixedIdea;
    use buildpool_types::builder::FileMap;
    use buildpool_types::error::StoreError;
    use buildpool_types::sync::{PublishResponse, SyncResponse};
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// In-memory store keyed by builder key.
    #[derive(Default)]
    struct MemoryStore {
        builders: Mutex<BTreeMap<String, Builder>>,
        artifacts: Mutex<Vec<GeneratedArtifact>>,
        last_sync: Mutex<Option<DateTime<Utc>>>,
        fail_saves: bool,
    }

    impl MemoryStore {
        fn with(builders: Vec<Builder>) -> Self {
            let store = Self::default();
            {
                let mut map = store.builders.lock().unwrap();
                for b in builders {
                    map.insert(b.key().to_string(), b);
                }
            }
            store
        }

        fn keys(&self) -> Vec<String> {
            self.builders.lock().unwrap().keys().cloned().collect()
        }
    }

    impl PopulationStore for MemoryStore {
        async fn load_all(&self) -> Result<Vec<Builder>, StoreError> {
            Ok(self.builders.lock().unwrap().values().cloned().collect())
        }

        async fn save(&self, builder: &Builder) -> Result<(), StoreError> {
            if self.fail_saves {
                return Err(StoreError::Io("disk full".into()));
            }
            for path in builder.supporting_files.keys() {
                crate::population::validator::validate_path(path)
                    .map_err(|e| StoreError::Io(e.to_string()))?;
            }
            self.builders
                .lock()
                .unwrap()
                .insert(builder.key().to_string(), builder.clone());
            Ok(())
        }

        async fn remove(&self, key: &BuilderKey) -> Result<bool, StoreError> {
            Ok(self.builders.lock().unwrap().remove(&key.to_string()).is_some())
        }

        async fn last_sync(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
            Ok(*self.last_sync.lock().unwrap())
        }

        async fn record_sync(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
            *self.last_sync.lock().unwrap() = Some(at);
            Ok(())
        }

        async fn save_artifact(&self, artifact: &GeneratedArtifact) -> Result<PathBuf, StoreError> {
            self.artifacts.lock().unwrap().push(artifact.clone());
            Ok(PathBuf::from("artifacts").join(&artifact.name))
        }
    }

    /// Rewriter that replays scripted bodies, recording each directive.
    struct ScriptedRewriter {
        bodies: Mutex<Vec<String>>,
        seen: Mutex<Vec<MutationDirective>>,
        calls: AtomicU32,
    }

    impl ScriptedRewriter {
        fn new(bodies: Vec<String>) -> Self {
            Self {
                bodies: Mutex::new(bodies),
                seen: Mutex::new(Vec::new()),
                calls: AtomicU32::new(0),
            }
        }
    }

    impl ContentRewriter for ScriptedRewriter {
        async fn rewrite(&self, directive: &MutationDirective) -> anyhow::Result<RewrittenContent> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(directive.clone());
            let mut bodies = self.bodies.lock().unwrap();
            let body = if bodies.is_empty() {
                anyhow::bail!("rewriter exhausted");
            } else {
                bodies.remove(0)
            };
            Ok(RewrittenContent {
                instruction_text: body,
                supporting_files: None,
            })
        }
    }

    fn rewritten_body() -> String {
        let mut text = "---\nname: placeholder\ndescription: Rewritten builder\n---\n\n# Rewritten\n\n".to_owned();
        for i in 0..15 {
            text.push_str(&format!("Rewritten step {i}: approach the task from a new angle.\n"));
        }
        text
    }

    fn eligible(id: &str, fitness: f64) -> Builder {
        let mut b = builder(id, fitness, 0);
        b.instruction_text = skill_md(&b.name, 40);
        b.skills_produced = 4;
        b
    }

    fn fast_config() -> PoolConfig {
        let mut config = PoolConfig::default();
        config.sync.base_backoff_ms = 1;
        config
    }

    async fn service(
        store: MemoryStore,
        authority: ScriptedAuthority,
        rewriter: ScriptedRewriter,
    ) -> PopulationService<MemoryStore, ScriptedAuthority, ScriptedRewriter> {
        PopulationService::open(store, authority, rewriter, &fast_config())
            .await
            .unwrap()
            .with_rng(StdRng::seed_from_u64(17))
    }

    #[tokio::test]
    async fn test_sync_applies_and_persists() {
        let store = MemoryStore::with(vec![builder("a", 1.0, 0), builder("b", 2.0, 0)]);
        let authority = ScriptedAuthority::with_sync(vec![Ok(SyncResponse {
            add: vec![record("x", 3.0)],
            cull: vec!["a".to_owned()],
        })]);
        let mut svc = service(store, authority, ScriptedRewriter::new(vec![])).await;

        let outcome = svc.sync().await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Synced(_)));
        assert_eq!(svc.store().keys(), vec!["b", "x"]);
        assert!(svc.population().get_by_id("a").is_none());
        assert!(svc.store().last_sync.lock().unwrap().is_some());

        let status = svc.status().await.unwrap();
        assert_eq!(status.size, 2);
        assert!(!status.sync_required);
    }

    #[tokio::test]
    async fn test_sync_skips_unsafe_record_and_records_marker() {
        let store = MemoryStore::with(vec![builder("a", 1.0, 0)]);
        let mut escaping = record("y", 2.0);
        escaping
            .files_json
            .insert("../x".to_owned(), "outside".to_owned());
        let authority = ScriptedAuthority::with_sync(vec![Ok(SyncResponse {
            add: vec![record("x", 3.0), escaping],
            cull: vec![],
        })]);
        let mut svc = service(store, authority, ScriptedRewriter::new(vec![])).await;

        let outcome = svc.ensure_fresh().await.unwrap();
        let SyncOutcome::Synced(report) = outcome else {
            panic!("expected a completed sync, got {outcome:?}");
        };
        assert_eq!(report.added, vec!["x"]);
        assert_eq!(report.rejected, vec!["y"]);
        assert_eq!(svc.store().keys(), vec!["a", "x"]);
        assert!(svc.store().last_sync.lock().unwrap().is_some());

        // The marker is fresh, so the next iteration does not sync again.
        assert!(matches!(svc.ensure_fresh().await.unwrap(), SyncOutcome::Fresh));
        assert_eq!(svc.authority.sync_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unavailable_authority_degrades_to_stale() {
        let store = MemoryStore::with(vec![builder("a", 1.0, 0)]);
        let authority = ScriptedAuthority::with_sync(
            (0..3)
                .map(|_| Err(AuthorityError::Unreachable("refused".into())))
                .collect(),
        );
        let mut svc = service(store, authority, ScriptedRewriter::new(vec![])).await;

        let outcome = svc.ensure_fresh().await.unwrap();
        match &outcome {
            SyncOutcome::Stale { attempts, .. } => assert_eq!(*attempts, 3),
            other => panic!("expected stale, got {other:?}"),
        }
        assert!(matches!(
            outcome.into_result(),
            Err(PoolError::SyncUnavailable { attempts: 3, .. })
        ));

        // Selection still works on last-known-good state.
        let selection = svc.select().unwrap();
        assert_eq!(selection.id.as_deref(), Some("a"));
        assert!(svc.store().last_sync.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ensure_fresh_skips_recent_sync() {
        let store = MemoryStore::with(vec![builder("a", 1.0, 0)]);
        *store.last_sync.lock().unwrap() = Some(Utc::now());
        let authority = ScriptedAuthority::default();
        let mut svc = service(store, authority, ScriptedRewriter::new(vec![])).await;

        assert!(matches!(svc.ensure_fresh().await.unwrap(), SyncOutcome::Fresh));
        assert_eq!(svc.authority.sync_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_select_fresh_syncs_a_stale_replica_first() {
        let authority = ScriptedAuthority::with_sync(vec![Ok(SyncResponse {
            add: vec![record("x", 3.0)],
            cull: vec![],
        })]);
        let mut svc = service(MemoryStore::default(), authority, ScriptedRewriter::new(vec![])).await;
        assert!(matches!(svc.select(), Err(PoolError::EmptyPopulation)));

        let (sync, selection) = svc.select_fresh().await.unwrap();
        assert!(matches!(sync, SyncOutcome::Synced(_)));
        assert_eq!(selection.id.as_deref(), Some("x"));

        let (sync, _) = svc.select_fresh().await.unwrap();
        assert!(matches!(sync, SyncOutcome::Fresh));
        assert_eq!(svc.authority.sync_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_population_cannot_select() {
        let mut svc = service(
            MemoryStore::default(),
            ScriptedAuthority::default(),
            ScriptedRewriter::new(vec![]),
        )
        .await;
        assert!(matches!(svc.select(), Err(PoolError::EmptyPopulation)));
    }

    #[tokio::test]
    async fn test_evolve_ineligible_parent_is_noop() {
        let mut parent = builder("p", 5.0, 0);
        parent.skills_produced = 2;
        let key = parent.key();
        let rewriter = ScriptedRewriter::new(vec![rewritten_body()]);
        let mut svc = service(MemoryStore::with(vec![parent]), ScriptedAuthority::default(), rewriter).await;

        let outcome = svc.evolve(&key, None).await.unwrap();
        assert!(matches!(
            outcome,
            EvolveOutcome::NotEligible {
                reason: Ineligibility::TooFewSkills { produced: 2, threshold: 3 },
                ..
            }
        ));
        assert_eq!(svc.rewriter.calls.load(Ordering::SeqCst), 0);
        assert_eq!(svc.population().len(), 1);
    }

    #[tokio::test]
    async fn test_evolve_retries_with_feedback_then_creates() {
        let parent = eligible("p", 5.0);
        let key = parent.key();
        // First rewrite is the parent verbatim: zero delta, rejected.
        let rewriter = ScriptedRewriter::new(vec![parent.instruction_text.clone(), rewritten_body()]);
        let mut svc = service(MemoryStore::with(vec![parent.clone()]), ScriptedAuthority::default(), rewriter).await;

        let outcome = svc.evolve(&key, Some("support OCR".into())).await.unwrap();
        let EvolveOutcome::Created { child, attempts } = outcome else {
            panic!("expected a child");
        };
        assert_eq!(attempts, 2);
        assert_eq!(child.generation, 1);
        assert_eq!(child.parent_ids, vec!["p".to_owned()]);
        assert_eq!(child.name, "builder-p-v1");
        assert_eq!(child.description, "Rewritten builder");
        assert!(!child.is_published());

        let seen = svc.rewriter.seen.lock().unwrap();
        assert!(seen[0].feedback.is_none());
        assert_eq!(seen[0].idea.as_deref(), Some("support OCR"));
        assert!(
            seen[1]
                .feedback
                .as_deref()
                .unwrap()
                .contains("insufficient mutation delta")
        );
        drop(seen);

        assert_eq!(svc.population().len(), 2);
        assert!(svc.store().keys().contains(&child.key().to_string()));
    }

    #[tokio::test]
    async fn test_evolve_skips_after_retry_budget() {
        let parent = eligible("p", 5.0);
        let key = parent.key();
        let same = parent.instruction_text.clone();
        let rewriter = ScriptedRewriter::new(vec![same.clone(), same.clone(), same]);
        let mut svc = service(MemoryStore::with(vec![parent]), ScriptedAuthority::default(), rewriter).await;

        let outcome = svc.evolve(&key, None).await.unwrap();
        match outcome {
            EvolveOutcome::Skipped { rejection, attempts, .. } => {
                assert_eq!(attempts, 3);
                assert!(matches!(rejection, ArtifactRejection::InsufficientMutationDelta { .. }));
            }
            other => panic!("expected skip, got {other:?}"),
        }
        assert_eq!(svc.population().len(), 1);
        assert_eq!(svc.store().keys().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_rekeys_draft() {
        let parent = eligible("p", 5.0);
        let key = parent.key();
        let authority = ScriptedAuthority::default();
        authority
            .publish_responses
            .lock()
            .unwrap()
            .push_back(Ok(PublishResponse { id: "srv-42".into() }));
        let rewriter = ScriptedRewriter::new(vec![rewritten_body()]);
        let mut svc = service(MemoryStore::with(vec![parent]), authority, rewriter).await;

        let EvolveOutcome::Created { child, .. } = svc.evolve(&key, None).await.unwrap() else {
            panic!("expected a child");
        };
        let local_key = child.key();

        let published = svc.publish(&local_key).await.unwrap();
        assert_eq!(published.id.as_deref(), Some("srv-42"));
        assert!(svc.population().get(&local_key).is_none());
        assert!(svc.population().get_by_id("srv-42").is_some());

        let keys = svc.store().keys();
        assert!(keys.contains(&"srv-42".to_owned()));
        assert!(!keys.contains(&local_key.to_string()));
    }

    #[tokio::test]
    async fn test_publish_conflict_is_not_retried() {
        let draft = Builder::genesis("seed-one", "Seed one", skill_md("seed-one", 4), FileMap::new());
        let key = draft.key();
        let authority = ScriptedAuthority::default();
        authority
            .publish_responses
            .lock()
            .unwrap()
            .push_back(Err(AuthorityError::Conflict("seed-one".into())));
        let mut svc = service(MemoryStore::with(vec![draft]), authority, ScriptedRewriter::new(vec![])).await;

        let err = svc.publish(&key).await.unwrap_err();
        assert!(matches!(err, PoolError::PublishConflict(ref name) if name == "seed-one"));
        assert_eq!(svc.authority.publish_calls.load(Ordering::SeqCst), 1);
        assert!(svc.population().get(&key).is_some());
    }

    #[tokio::test]
    async fn test_record_artifact_credits_builder() {
        let b = builder("a", 1.0, 0);
        let key = b.key();
        let mut svc = service(MemoryStore::with(vec![b]), ScriptedAuthority::default(), ScriptedRewriter::new(vec![])).await;

        let artifact = GeneratedArtifact {
            name: "pdf-reader".into(),
            description: "Reads PDFs".into(),
            instruction_text: skill_md("pdf-reader", 3),
            supporting_files: FileMap::new(),
        };
        let report = svc.record_artifact(&key, artifact).await.unwrap();
        assert_eq!(report.skills_produced, 1);
        assert_eq!(svc.population().get(&key).unwrap().skills_produced, 1);
        assert_eq!(svc.store().artifacts.lock().unwrap().len(), 1);

        let bad = GeneratedArtifact {
            name: "bad".into(),
            description: "bad".into(),
            instruction_text: skill_md("pdf-reader", 1),
            supporting_files: [("../escape".to_owned(), "x".to_owned())].into_iter().collect(),
        };
        let err = svc.record_artifact(&key, bad).await.unwrap_err();
        assert!(matches!(err, PoolError::InvalidArtifact(ArtifactRejection::UnsafePath(_))));
        assert_eq!(svc.population().get(&key).unwrap().skills_produced, 1);
    }

    #[tokio::test]
    async fn test_failed_store_write_leaves_memory_untouched() {
        let b = builder("a", 1.0, 0);
        let key = b.key();
        let mut store = MemoryStore::with(vec![b]);
        store.fail_saves = true;
        let mut svc = service(store, ScriptedAuthority::default(), ScriptedRewriter::new(vec![])).await;

        let artifact = GeneratedArtifact {
            name: "pdf-reader".into(),
            description: "Reads PDFs".into(),
            instruction_text: skill_md("pdf-reader", 3),
            supporting_files: FileMap::new(),
        };
        let err = svc.record_artifact(&key, artifact).await.unwrap_err();
        assert!(matches!(err, PoolError::Storage(_)));
        assert_eq!(svc.population().get(&key).unwrap().skills_produced, 0);
    }

    #[tokio::test]
    async fn test_seed_imports_genesis_and_rejects_duplicates() {
        let mut svc = service(MemoryStore::default(), ScriptedAuthority::default(), ScriptedRewriter::new(vec![])).await;
        let artifact = GeneratedArtifact {
            name: "ignored".into(),
            description: "ignored".into(),
            instruction_text: skill_md("seed-builder", 3),
            supporting_files: FileMap::new(),
        };

        let seeded = svc.seed(artifact.clone()).await.unwrap();
        assert_eq!(seeded.name, "seed-builder");
        assert!(seeded.is_genesis());
        assert!(!seeded.is_published());

        assert!(matches!(svc.seed(artifact).await, Err(PoolError::PublishConflict(_))));
    }

    #[tokio::test]
    async fn test_run_iteration_end_to_end() {
        let parent = eligible("p", 5.0);
        let authority = ScriptedAuthority::default();
        authority
            .publish_responses
            .lock()
            .unwrap()
            .push_back(Ok(PublishResponse { id: "child-1".into() }));
        let rewriter = ScriptedRewriter::new(vec![rewritten_body()]);
        let mut svc = service(MemoryStore::with(vec![parent]), authority, rewriter).await;

        let report = svc
            .run_iteration(&FixedIdea(Some("idea".into())), true)
            .await
            .unwrap();

        assert!(matches!(report.sync, SyncOutcome::Synced(_)));
        assert_eq!(report.selection.id.as_deref(), Some("p"));
        match report.mutation {
            MutationReport::Created { published_id, generation, .. } => {
                assert_eq!(published_id.as_deref(), Some("child-1"));
                assert_eq!(generation, 1);
            }
            other => panic!("unexpected mutation report {other:?}"),
        }

        let request = svc.authority.last_sync_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.local_builders.len(), 1);
    }

    #[tokio::test]
    async fn test_run_iteration_reports_failing_stage() {
        let mut svc = service(MemoryStore::default(), ScriptedAuthority::default(), ScriptedRewriter::new(vec![])).await;
        let failure = svc.run_iteration(&(), false).await.unwrap_err();
        assert_eq!(failure.stage, IterationStage::Select);
        assert!(matches!(failure.error, PoolError::EmptyPopulation));

        let parent = eligible("p", 5.0);
        let mut svc = service(MemoryStore::with(vec![parent]), ScriptedAuthority::default(), ScriptedRewriter::new(vec![])).await;
        let failure = svc.run_iteration(&(), false).await.unwrap_err();
        assert_eq!(failure.stage, IterationStage::Rewrite);
        assert_eq!(failure.builder.as_deref(), Some("builder-p"));
        assert!(failure.to_string().contains("rewrite failed for 'builder-p'"));
    }
}
