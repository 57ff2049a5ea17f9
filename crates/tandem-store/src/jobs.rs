//! Scheduled job persistence.
//!
//! Jobs replay a saved prompt through the orchestrator on a timer. The
//! store owns the row lifecycle; claiming is a single conditional
//! `UPDATE … RETURNING` so a job is picked up at most once even with
//! multiple pollers. A `running` job always carries a `hold_until` lease
//! strictly in the future, which keeps the poller from re-picking it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// Whether a job runs once or on a recurring schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Once,
    Recurring,
}

impl JobKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Recurring => "recurring",
        }
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    fn parse(s: &str) -> StoreResult<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(StoreError::Rejected(format!(
                "unknown job status `{other}`"
            ))),
        }
    }
}

/// A scheduled job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub user_id: String,
    pub role_id: Option<String>,
    /// The natural-language prompt replayed through the orchestrator.
    pub description: String,
    pub kind: JobKind,
    /// Cron expression for recurring jobs, parsed and validated at creation.
    pub schedule: Option<String>,
    /// Unix timestamp for one-shot jobs.
    pub run_at: Option<i64>,
    pub status: JobStatus,
    /// Claim lease / next-fire gate for recurring jobs.
    pub hold_until: Option<i64>,
    pub last_run_at: Option<i64>,
    pub last_error: Option<String>,
    pub run_count: i64,
    /// Consecutive failures; resets on success.
    pub fail_streak: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// CRUD and claim operations on scheduled jobs.
#[derive(Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a one-shot job due at `run_at`.
    #[instrument(skip(self, description))]
    pub async fn create_once(
        &self,
        user_id: &str,
        role_id: Option<&str>,
        description: &str,
        run_at: i64,
    ) -> StoreResult<Job> {
        self.insert(user_id, role_id, description, JobKind::Once, None, Some(run_at))
            .await
    }

    /// Create a recurring job with a validated cron expression and the
    /// first fire instant.
    #[instrument(skip(self, description))]
    pub async fn create_recurring(
        &self,
        user_id: &str,
        role_id: Option<&str>,
        description: &str,
        schedule: &str,
        first_run: i64,
    ) -> StoreResult<Job> {
        let mut job = self
            .insert(
                user_id,
                role_id,
                description,
                JobKind::Recurring,
                Some(schedule),
                None,
            )
            .await?;
        self.set_hold_until(&job.id, Some(first_run)).await?;
        job.hold_until = Some(first_run);
        Ok(job)
    }

    async fn insert(
        &self,
        user_id: &str,
        role_id: Option<&str>,
        description: &str,
        kind: JobKind,
        schedule: Option<&str>,
        run_at: Option<i64>,
    ) -> StoreResult<Job> {
        let now = Utc::now().timestamp();
        let job = Job {
            id: Uuid::now_v7().to_string(),
            user_id: user_id.to_string(),
            role_id: role_id.map(str::to_string),
            description: description.to_string(),
            kind,
            schedule: schedule.map(str::to_string),
            run_at,
            status: JobStatus::Pending,
            hold_until: None,
            last_run_at: None,
            last_error: None,
            run_count: 0,
            fail_streak: 0,
            created_at: now,
            updated_at: now,
        };

        let j = job.clone();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO scheduled_jobs \
                     (id, user_id, role_id, description, kind, schedule, run_at, status, run_count, fail_streak, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', 0, 0, ?8, ?8)",
                    rusqlite::params![
                        j.id,
                        j.user_id,
                        j.role_id,
                        j.description,
                        j.kind.as_str(),
                        j.schedule,
                        j.run_at,
                        j.created_at
                    ],
                )?;
                Ok(())
            })
            .await?;

        debug!(job_id = %job.id, kind = %job.kind.as_str(), "job created");
        Ok(job)
    }

    /// Fetch a job by id.
    pub async fn get(&self, id: &str) -> StoreResult<Job> {
        let id_owned = id.to_string();
        let id_err = id.to_string();
        self.db
            .call(move |conn| {
                conn.query_row(
                    &format!("SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE id = ?1"),
                    rusqlite::params![id_owned],
                    row_to_job,
                )
                .map_err(StoreError::from)?
            })
            .await
            .map_err(|e| match e {
                StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows) => StoreError::NotFound {
                    entity: "scheduled_job",
                    id: id_err,
                },
                other => other,
            })
    }

    /// List all jobs owned by a user, newest first.
    pub async fn list_for_user(&self, user_id: &str) -> StoreResult<Vec<Job>> {
        let user_id = user_id.to_string();
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE user_id = ?1 \
                     ORDER BY created_at DESC"
                ))?;
                let jobs = stmt
                    .query_map(rusqlite::params![user_id], row_to_job)?
                    .collect::<Result<Vec<_>, _>>()?
                    .into_iter()
                    .collect::<StoreResult<Vec<_>>>()?;
                Ok(jobs)
            })
            .await
    }

    /// Atomically claim every due job: flip it to `running` with a short
    /// `hold_until` lease and return the claimed rows.
    ///
    /// Due means `once` + pending + `run_at <= now`, or `recurring` +
    /// pending + (`hold_until` null or `<= now`).
    pub async fn claim_due(&self, now: i64, lease_secs: i64) -> StoreResult<Vec<Job>> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "UPDATE scheduled_jobs \
                     SET status = 'running', hold_until = ?1, updated_at = ?2 \
                     WHERE status = 'pending' AND ( \
                       (kind = 'once' AND run_at IS NOT NULL AND run_at <= ?2) OR \
                       (kind = 'recurring' AND (hold_until IS NULL OR hold_until <= ?2)) \
                     ) \
                     RETURNING {JOB_COLUMNS}"
                ))?;
                let jobs = stmt
                    .query_map(rusqlite::params![now + lease_secs, now], row_to_job)?
                    .collect::<Result<Vec<_>, _>>()?
                    .into_iter()
                    .collect::<StoreResult<Vec<_>>>()?;
                Ok(jobs)
            })
            .await
    }

    /// Complete a one-shot job: `completed` on success, `failed` with the
    /// error message otherwise. Clears the lease either way.
    pub async fn finish_once(&self, id: &str, error: Option<&str>) -> StoreResult<()> {
        let id = id.to_string();
        let error = error.map(str::to_string);
        let now = Utc::now().timestamp();
        self.db
            .call(move |conn| {
                let status = if error.is_some() { "failed" } else { "completed" };
                conn.execute(
                    "UPDATE scheduled_jobs \
                     SET status = ?2, hold_until = NULL, last_run_at = ?3, last_error = ?4, \
                         run_count = run_count + 1, updated_at = ?3 \
                     WHERE id = ?1 AND status = 'running'",
                    rusqlite::params![id, status, now, error],
                )?;
                Ok(())
            })
            .await
    }

    /// Requeue a recurring job after a successful run: back to `pending`
    /// gated on the next fire instant, failure streak reset.
    pub async fn finish_recurring_success(&self, id: &str, next_run: i64) -> StoreResult<()> {
        let id = id.to_string();
        let now = Utc::now().timestamp();
        self.db
            .call(move |conn| {
                conn.execute(
                    "UPDATE scheduled_jobs \
                     SET status = 'pending', hold_until = ?2, last_run_at = ?3, last_error = NULL, \
                         run_count = run_count + 1, fail_streak = 0, updated_at = ?3 \
                     WHERE id = ?1 AND status = 'running'",
                    rusqlite::params![id, next_run, now],
                )?;
                Ok(())
            })
            .await
    }

    /// Record a recurring-job failure. `give_up` marks the job `failed`
    /// permanently; otherwise it is requeued gated on `retry_at`.
    pub async fn finish_recurring_failure(
        &self,
        id: &str,
        error: &str,
        retry_at: i64,
        give_up: bool,
    ) -> StoreResult<()> {
        let id = id.to_string();
        let error = error.to_string();
        let now = Utc::now().timestamp();
        self.db
            .call(move |conn| {
                if give_up {
                    conn.execute(
                        "UPDATE scheduled_jobs \
                         SET status = 'failed', hold_until = NULL, last_run_at = ?3, last_error = ?2, \
                             run_count = run_count + 1, fail_streak = fail_streak + 1, updated_at = ?3 \
                         WHERE id = ?1 AND status = 'running'",
                        rusqlite::params![id, error, now],
                    )?;
                } else {
                    conn.execute(
                        "UPDATE scheduled_jobs \
                         SET status = 'pending', hold_until = ?4, last_run_at = ?3, last_error = ?2, \
                             run_count = run_count + 1, fail_streak = fail_streak + 1, updated_at = ?3 \
                         WHERE id = ?1 AND status = 'running'",
                        rusqlite::params![id, error, now, retry_at],
                    )?;
                }
                Ok(())
            })
            .await
    }

    /// Cancel a job. Only `pending` and `failed` jobs can be cancelled by
    /// their owner; a `running` job must finish through the runner's own
    /// completion path first.
    pub async fn cancel(&self, id: &str, user_id: &str) -> StoreResult<()> {
        let id = id.to_string();
        let id_err = id.clone();
        let user_id = user_id.to_string();
        let now = Utc::now().timestamp();
        let changed = self
            .db
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE scheduled_jobs SET status = 'cancelled', hold_until = NULL, updated_at = ?3 \
                     WHERE id = ?1 AND user_id = ?2 AND status IN ('pending','failed')",
                    rusqlite::params![id, user_id, now],
                )?;
                Ok(n)
            })
            .await?;

        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "cancellable scheduled_job",
                id: id_err,
            });
        }
        Ok(())
    }

    /// Update the schedule of a recurring job (explicit edit path). The
    /// caller re-validates the cron expression before calling this.
    pub async fn update_schedule(
        &self,
        id: &str,
        schedule: &str,
        next_run: i64,
    ) -> StoreResult<()> {
        let id = id.to_string();
        let schedule = schedule.to_string();
        let now = Utc::now().timestamp();
        self.db
            .call(move |conn| {
                conn.execute(
                    "UPDATE scheduled_jobs SET schedule = ?2, hold_until = ?3, updated_at = ?4 \
                     WHERE id = ?1 AND kind = 'recurring'",
                    rusqlite::params![id, schedule, next_run, now],
                )?;
                Ok(())
            })
            .await
    }

    async fn set_hold_until(&self, id: &str, hold_until: Option<i64>) -> StoreResult<()> {
        let id = id.to_string();
        let now = Utc::now().timestamp();
        self.db
            .call(move |conn| {
                conn.execute(
                    "UPDATE scheduled_jobs SET hold_until = ?2, updated_at = ?3 WHERE id = ?1",
                    rusqlite::params![id, hold_until, now],
                )?;
                Ok(())
            })
            .await
    }
}

const JOB_COLUMNS: &str = "id, user_id, role_id, description, kind, schedule, run_at, status, \
                           hold_until, last_run_at, last_error, run_count, fail_streak, \
                           created_at, updated_at";

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoreResult<Job>> {
    let kind_raw: String = row.get(4)?;
    let status_raw: String = row.get(7)?;

    let kind = match kind_raw.as_str() {
        "once" => JobKind::Once,
        "recurring" => JobKind::Recurring,
        other => {
            return Ok(Err(StoreError::Rejected(format!(
                "unknown job kind `{other}`"
            ))));
        }
    };
    let status = match JobStatus::parse(&status_raw) {
        Ok(s) => s,
        Err(e) => return Ok(Err(e)),
    };

    Ok(Ok(Job {
        id: row.get(0)?,
        user_id: row.get(1)?,
        role_id: row.get(2)?,
        description: row.get(3)?,
        kind,
        schedule: row.get(5)?,
        run_at: row.get(6)?,
        status,
        hold_until: row.get(8)?,
        last_run_at: row.get(9)?,
        last_error: row.get(10)?,
        run_count: row.get(11)?,
        fail_streak: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    }))
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::seeded_db;

    #[tokio::test]
    async fn claim_picks_only_due_once_jobs() {
        let db = seeded_db().await;
        let store = JobStore::new(db);
        let now = Utc::now().timestamp();

        let due = store
            .create_once("u1", None, "due now", now - 1)
            .await
            .unwrap();
        store
            .create_once("u1", None, "later", now + 3600)
            .await
            .unwrap();

        let claimed = store.claim_due(now, 60).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, due.id);
        assert_eq!(claimed[0].status, JobStatus::Running);
        assert!(claimed[0].hold_until.unwrap() > now);
    }

    #[tokio::test]
    async fn claimed_job_is_not_reclaimed() {
        let db = seeded_db().await;
        let store = JobStore::new(db);
        let now = Utc::now().timestamp();

        store.create_once("u1", None, "x", now - 1).await.unwrap();

        let first = store.claim_due(now, 60).await.unwrap();
        assert_eq!(first.len(), 1);
        let second = store.claim_due(now, 60).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn recurring_claim_respects_hold_until() {
        let db = seeded_db().await;
        let store = JobStore::new(db);
        let now = Utc::now().timestamp();

        store
            .create_recurring("u1", None, "tick", "* * * * *", now + 3600)
            .await
            .unwrap();

        assert!(store.claim_due(now, 60).await.unwrap().is_empty());
        let later = store.claim_due(now + 3601, 60).await.unwrap();
        assert_eq!(later.len(), 1);
    }

    #[tokio::test]
    async fn finish_once_completed() {
        let db = seeded_db().await;
        let store = JobStore::new(db);
        let now = Utc::now().timestamp();

        let job = store.create_once("u1", None, "x", now - 1).await.unwrap();
        store.claim_due(now, 60).await.unwrap();
        store.finish_once(&job.id, None).await.unwrap();

        let job = store.get(&job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.run_count, 1);
        assert!(job.last_error.is_none());
        assert!(job.hold_until.is_none());
    }

    #[tokio::test]
    async fn recurring_success_requeues_pending_with_future_gate() {
        let db = seeded_db().await;
        let store = JobStore::new(db);
        let now = Utc::now().timestamp();

        let job = store
            .create_recurring("u1", None, "tick", "* * * * *", now - 1)
            .await
            .unwrap();
        store.claim_due(now, 60).await.unwrap();
        store
            .finish_recurring_success(&job.id, now + 60)
            .await
            .unwrap();

        let job = store.get(&job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.hold_until, Some(now + 60));
        assert_eq!(job.fail_streak, 0);
        assert_eq!(job.run_count, 1);
    }

    #[tokio::test]
    async fn recurring_failure_tracks_streak_and_gives_up() {
        let db = seeded_db().await;
        let store = JobStore::new(db);
        let now = Utc::now().timestamp();

        let job = store
            .create_recurring("u1", None, "tick", "* * * * *", now - 1)
            .await
            .unwrap();

        store.claim_due(now, 60).await.unwrap();
        store
            .finish_recurring_failure(&job.id, "boom", now - 1, false)
            .await
            .unwrap();
        assert_eq!(store.get(&job.id).await.unwrap().fail_streak, 1);

        store.claim_due(now, 60).await.unwrap();
        store
            .finish_recurring_failure(&job.id, "boom again", now, true)
            .await
            .unwrap();

        let job = store.get(&job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.fail_streak, 2);
        assert_eq!(job.last_error.as_deref(), Some("boom again"));
    }

    #[tokio::test]
    async fn cancel_rejects_running_jobs() {
        let db = seeded_db().await;
        let store = JobStore::new(db);
        let now = Utc::now().timestamp();

        let job = store.create_once("u1", None, "x", now - 1).await.unwrap();
        store.claim_due(now, 60).await.unwrap();

        let result = store.cancel(&job.id, "u1").await;
        assert!(result.is_err());

        store.finish_once(&job.id, Some("err")).await.unwrap();
        store.cancel(&job.id, "u1").await.unwrap();
        assert_eq!(
            store.get(&job.id).await.unwrap().status,
            JobStatus::Cancelled
        );
    }
}
