//! Background job tracking
//!
//! Jobs run as tokio tasks on a bounded pool. Every job for a repository
//! takes that repository's lock, so deletes and inserts for the same paths
//! never interleave; different repositories run in parallel. State moves
//! `queued` -> `running` -> `completed` | `failed` and is persisted in the
//! jobs table.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analysis::FullAnalysis;
use crate::config::AnalysisConfig;
use crate::downstream::DownstreamScheduler;
use crate::error::{Error, Result};
use crate::fetch::FetcherFactory;
use crate::indexer::IndexSync;
use crate::meta::{JobKind, JobRecord, JobState, MetaDb};
use crate::reconcile::{ChangeSet, Reconciler};
use crate::snapshot::{get_status, set_status, AnalysisState, AnalysisStatus};

/// Everything a job needs to do its work
pub struct JobServices {
    pub db: MetaDb,
    pub index: Arc<IndexSync>,
    pub fetchers: Arc<dyn FetcherFactory>,
    pub scheduler: Arc<dyn DownstreamScheduler>,
    pub analysis: AnalysisConfig,
    pub workspace_root: PathBuf,
}

/// Client-facing view of a job
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: String,
    pub kind: JobKind,
    pub repository_id: i64,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<JobRecord> for JobStatus {
    type Error = Error;

    fn try_from(record: JobRecord) -> Result<Self> {
        Ok(Self {
            kind: record.get_kind()?,
            state: record.get_state()?,
            result: record.result(),
            id: record.id,
            repository_id: record.repository_id,
            error: record.error,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

struct Inner {
    services: JobServices,
    permits: Arc<Semaphore>,
    repo_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
    active_analyses: Mutex<HashSet<i64>>,
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Inner {
    fn repo_lock(&self, repository_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        lock(&self.repo_locks)
            .entry(repository_id)
            .or_default()
            .clone()
    }
}

/// Marks a repository as having a full analysis queued or running
struct ActiveAnalysis {
    inner: Arc<Inner>,
    repository_id: i64,
}

impl ActiveAnalysis {
    fn claim(inner: &Arc<Inner>, repository_id: i64) -> Result<Self> {
        if !lock(&inner.active_analyses).insert(repository_id) {
            return Err(Error::AnalysisInProgress(repository_id));
        }
        Ok(Self {
            inner: inner.clone(),
            repository_id,
        })
    }
}

impl Drop for ActiveAnalysis {
    fn drop(&mut self) {
        lock(&self.inner.active_analyses).remove(&self.repository_id);
    }
}

/// Submits, runs and reports on background jobs
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    /// Create the manager. Jobs a previous process left queued or running
    /// are marked failed, as are analysis statuses stuck at running.
    pub async fn start(services: JobServices, max_concurrent_jobs: usize) -> Result<Self> {
        let interrupted = services.db.fail_interrupted_jobs().await?;
        if interrupted > 0 {
            warn!(count = interrupted, "Marked interrupted jobs as failed");
        }

        for repository in services.db.list_repositories().await? {
            let stuck = get_status(&services.db, repository.id)
                .await?
                .is_some_and(|status| status.status == AnalysisState::Running);
            if stuck {
                let status =
                    AnalysisStatus::now(AnalysisState::Failed, Some("interrupted".to_string()));
                set_status(&services.db, repository.id, &status).await?;
            }
        }

        Ok(Self {
            inner: Arc::new(Inner {
                services,
                permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
                repo_locks: Mutex::new(HashMap::new()),
                active_analyses: Mutex::new(HashSet::new()),
                handles: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn services(&self) -> &JobServices {
        &self.inner.services
    }

    /// Queue a full analysis and return its job id. Rejected with
    /// `AnalysisInProgress` while another one for the repository is pending.
    pub async fn start_full_analysis(&self, repository_id: i64) -> Result<String> {
        let services = &self.inner.services;
        let repository = services
            .db
            .get_repository(repository_id)
            .await?
            .ok_or_else(|| Error::RepositoryNotFound(repository_id.to_string()))?;
        let fetcher = services.fetchers.fetcher_for(&repository)?;
        let claim = ActiveAnalysis::claim(&self.inner, repository_id)?;

        let job_id = Uuid::new_v4().to_string();
        services
            .db
            .insert_job(&job_id, JobKind::FullAnalysis, repository_id)
            .await?;

        let inner = self.inner.clone();
        self.spawn(job_id.clone(), JobKind::FullAnalysis, repository_id, async move {
            let _claim = claim;
            let services = &inner.services;
            let report = FullAnalysis {
                db: &services.db,
                index: &services.index,
                fetcher: fetcher.as_ref(),
                config: &services.analysis,
                workspace_root: &services.workspace_root,
            }
            .run(repository_id)
            .await?;
            Ok(serde_json::to_value(report)?)
        });

        Ok(job_id)
    }

    /// Queue a reconciliation and return its job id
    pub async fn reconcile(&self, repository_id: i64, changes: ChangeSet) -> Result<String> {
        let services = &self.inner.services;
        let repository = services
            .db
            .get_repository(repository_id)
            .await?
            .ok_or_else(|| Error::RepositoryNotFound(repository_id.to_string()))?;
        let fetcher = services.fetchers.fetcher_for(&repository)?;

        let job_id = Uuid::new_v4().to_string();
        services
            .db
            .insert_job(&job_id, JobKind::Reconcile, repository_id)
            .await?;

        let inner = self.inner.clone();
        self.spawn(job_id.clone(), JobKind::Reconcile, repository_id, async move {
            let services = &inner.services;
            let report = Reconciler {
                db: &services.db,
                index: &services.index,
                fetcher: fetcher.as_ref(),
                config: &services.analysis,
                scheduler: services.scheduler.as_ref(),
            }
            .reconcile(repository_id, &changes)
            .await?;
            Ok(serde_json::to_value(report)?)
        });

        Ok(job_id)
    }

    /// Current state of a job
    pub async fn get_job_status(&self, job_id: &str) -> Result<JobStatus> {
        self.inner
            .services
            .db
            .get_job(job_id)
            .await?
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?
            .try_into()
    }

    /// Wait for a job started by this manager to finish, then report it
    pub async fn wait(&self, job_id: &str) -> Result<JobStatus> {
        let handle = lock(&self.inner.handles).remove(job_id);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(job_id, error = %e, "Job supervisor task failed");
            }
        }
        self.get_job_status(job_id).await
    }

    /// The handle stays tracked until the supervisor finishes, so `wait`
    /// is optional: a job nobody waits on drops its own entry.
    fn spawn<F>(&self, job_id: String, kind: JobKind, repository_id: i64, work: F)
    where
        F: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        let inner = self.inner.clone();
        let id = job_id.clone();

        let mut handles = lock(&self.inner.handles);
        let handle = tokio::spawn(async move {
            supervise(&inner, &id, kind, repository_id, work).await;
            lock(&inner.handles).remove(&id);
        });
        handles.insert(job_id, handle);
    }
}

async fn supervise<F>(inner: &Inner, id: &str, kind: JobKind, repository_id: i64, work: F)
where
    F: Future<Output = Result<serde_json::Value>> + Send + 'static,
{
    let db = &inner.services.db;
    let _permit = match inner.permits.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(e) => {
            record(db, id, JobState::Failed, None, Some(e.to_string())).await;
            return;
        }
    };
    let repo_lock = inner.repo_lock(repository_id);
    let _guard = repo_lock.lock().await;

    record(db, id, JobState::Running, None, None).await;
    info!(job_id = %id, kind = %kind, repository_id, "Job started");

    // The work runs in its own task so a panic surfaces as a JoinError.
    let (state, result, error) = match tokio::spawn(work).await {
        Ok(Ok(value)) => (JobState::Completed, Some(value.to_string()), None),
        Ok(Err(e)) => (JobState::Failed, None, Some(e.to_string())),
        Err(join_err) => {
            let message = if join_err.is_panic() {
                "job panicked".to_string()
            } else {
                format!("job cancelled: {join_err}")
            };
            if kind == JobKind::FullAnalysis {
                let status = AnalysisStatus::now(AnalysisState::Failed, Some(message.clone()));
                if let Err(e) = set_status(db, repository_id, &status).await {
                    error!(repository_id, error = %e, "Failed to record analysis failure");
                }
            }
            (JobState::Failed, None, Some(message))
        }
    };

    match &error {
        Some(message) => warn!(job_id = %id, error = %message, "Job failed"),
        None => info!(job_id = %id, "Job completed"),
    }
    record(db, id, state, result, error).await;
}

async fn record(
    db: &MetaDb,
    job_id: &str,
    state: JobState,
    result: Option<String>,
    error: Option<String>,
) {
    if let Err(e) = db.update_job(job_id, state, result, error).await {
        error!(job_id, error = %e, "Failed to persist job state");
    }
}
