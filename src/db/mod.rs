//! Postgres primary store: connection pool, migrations, health check.
//!
//! Query code lives in the submodules as inherent `Db` methods; this module
//! wires them into the store traits.

pub mod assignment;
pub mod job;
pub mod round;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::Result;
use crate::model::*;
use crate::store::{PrimaryStore, StatisticsSource};

/// Database handle. Owns the connection pool.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| crate::error::Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PrimaryStore for Db {
    async fn create_job(&self, job: &DistributionJob) -> Result<DistributionJob> {
        self.insert_job(job).await
    }

    async fn get_job(&self, id: JobId) -> Result<Option<DistributionJob>> {
        self.find_job(id).await
    }

    async fn transition_job(
        &self,
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<DistributionJob> {
        self.transition_job_state(id, from, to).await
    }

    async fn finish_job(
        &self,
        id: JobId,
        status: JobStatus,
        outcome: &JobOutcome,
    ) -> Result<DistributionJob> {
        self.complete_job(id, status, outcome).await
    }

    async fn get_round(&self, id: RoundId) -> Result<Option<Round>> {
        self.find_round(id).await
    }

    async fn set_round_status(&self, id: RoundId, status: RoundStatus) -> Result<()> {
        self.update_round_status(id, status).await
    }

    async fn list_reviewers(&self, round_id: RoundId) -> Result<Vec<Reviewer>> {
        self.reviewers_by_round(round_id).await
    }

    async fn list_work_items(&self, round_id: RoundId) -> Result<Vec<WorkItem>> {
        self.work_items_by_round(round_id).await
    }

    async fn list_assignments(
        &self,
        round_id: RoundId,
        after: Option<AssignmentId>,
        limit: usize,
    ) -> Result<Vec<Assignment>> {
        self.assignments_page(round_id, after, limit).await
    }

    async fn create_assignments(&self, assignments: &[Assignment]) -> Result<u64> {
        self.insert_assignments(assignments).await
    }

    async fn update_assignment_reviewers(&self, changes: &[ReviewerChange]) -> Result<u64> {
        self.set_assignment_reviewers(changes).await
    }

    async fn apply_statistics(&self, update: &StatisticsUpdate) -> Result<()> {
        self.write_statistics(update).await
    }
}

#[async_trait]
impl StatisticsSource for Db {
    async fn work_item_statistics(&self, round_id: RoundId) -> Result<Vec<WorkItemStatistics>> {
        self.count_by_work_item(round_id).await
    }

    async fn reviewer_statistics(&self, round_id: RoundId) -> Result<Vec<ReviewerStatistics>> {
        self.count_by_reviewer(round_id).await
    }
}
