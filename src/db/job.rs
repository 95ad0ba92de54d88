//! Distribution job records: insert, lookup, state transitions.

use std::collections::BTreeMap;

use opentelemetry::KeyValue;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::*;
use crate::store::validate_transition;
use crate::telemetry::metrics;

impl super::Db {
    /// Insert a job. An existing row with the same ID is left untouched.
    pub async fn insert_job(&self, job: &DistributionJob) -> Result<DistributionJob> {
        let kind = serde_json::to_value(&job.kind)
            .map_err(|e| Error::Other(format!("serialize job kind: {e}")))?;
        let failures = serde_json::to_value(&job.failures)
            .map_err(|e| Error::Other(format!("serialize job failures: {e}")))?;

        sqlx::query(
            "INSERT INTO distribution_jobs (job_id, round_id, kind, status, success_count, failed_count, failures, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (job_id) DO NOTHING",
        )
        .bind(job.id.0)
        .bind(job.round_id.0)
        .bind(&kind)
        .bind(job.status.to_string())
        .bind(job.success_count as i64)
        .bind(job.failed_count as i64)
        .bind(&failures)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(self.pool())
        .await?;

        self.find_job(job.id).await?.ok_or(Error::JobNotFound(job.id))
    }

    /// Get a job by ID.
    pub async fn find_job(&self, id: JobId) -> Result<Option<DistributionJob>> {
        let row: Option<JobRow> = sqlx::query_as(
            "SELECT job_id, round_id, kind, status, success_count, failed_count, failures, created_at, updated_at
             FROM distribution_jobs WHERE job_id = $1",
        )
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;

        row.map(JobRow::try_into_job).transpose()
    }

    /// Transition a job's status with optimistic concurrency.
    pub async fn transition_job_state(
        &self,
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<DistributionJob> {
        validate_transition(from, to)?;

        let rows_affected = sqlx::query(
            "UPDATE distribution_jobs SET status = $1, updated_at = now()
             WHERE job_id = $2 AND status = $3",
        )
        .bind(to.to_string())
        .bind(id.0)
        .bind(from.to_string())
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        metrics::job_state_transitions().add(
            1,
            &[
                KeyValue::new("from", from.to_string()),
                KeyValue::new("to", to.to_string()),
            ],
        );

        self.find_job(id).await?.ok_or(Error::JobNotFound(id))
    }

    /// Running → terminal status with counters and failure details.
    pub async fn complete_job(
        &self,
        id: JobId,
        status: JobStatus,
        outcome: &JobOutcome,
    ) -> Result<DistributionJob> {
        validate_transition(JobStatus::Running, status)?;

        let failures = serde_json::to_value(&outcome.failures)
            .map_err(|e| Error::Other(format!("serialize job failures: {e}")))?;

        let rows_affected = sqlx::query(
            "UPDATE distribution_jobs SET status = $1, success_count = $2, failed_count = $3, failures = $4, updated_at = now()
             WHERE job_id = $5 AND status = 'running'",
        )
        .bind(status.to_string())
        .bind(outcome.success_count as i64)
        .bind(outcome.failed_count as i64)
        .bind(&failures)
        .bind(id.0)
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::InvalidTransition {
                from: JobStatus::Running.to_string(),
                to: status.to_string(),
            });
        }

        metrics::job_state_transitions().add(
            1,
            &[
                KeyValue::new("from", "running"),
                KeyValue::new("to", status.to_string()),
            ],
        );

        self.find_job(id).await?.ok_or(Error::JobNotFound(id))
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct JobRow {
    job_id: Uuid,
    round_id: Uuid,
    kind: serde_json::Value,
    status: String,
    success_count: i64,
    failed_count: i64,
    failures: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl JobRow {
    fn try_into_job(self) -> Result<DistributionJob> {
        let kind: JobKind = serde_json::from_value(self.kind)
            .map_err(|e| Error::Other(format!("bad job kind: {e}")))?;
        let failures: BTreeMap<String, String> = serde_json::from_value(self.failures)
            .map_err(|e| Error::Other(format!("bad job failures: {e}")))?;

        Ok(DistributionJob {
            id: JobId(self.job_id),
            round_id: RoundId(self.round_id),
            kind,
            status: self.status.parse()?,
            success_count: self.success_count as u64,
            failed_count: self.failed_count as u64,
            failures,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
