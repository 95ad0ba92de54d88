//! Store traits for the primary transactional store.
//!
//! The distribution core only talks to the primary store through these
//! traits. `Db` implements them over Postgres; `MemoryStore` implements them
//! in process for tests and embedding.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::*;

pub use memory::MemoryStore;

/// Jobs, rounds, reviewers, work items and assignments, scoped by round.
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    /// Insert a job record. Re-inserting an existing ID is a no-op that
    /// returns the stored record.
    async fn create_job(&self, job: &DistributionJob) -> Result<DistributionJob>;

    async fn get_job(&self, id: JobId) -> Result<Option<DistributionJob>>;

    /// Move a job between states with optimistic concurrency: fails with
    /// `InvalidTransition` if the job is not currently in `from`.
    async fn transition_job(&self, id: JobId, from: JobStatus, to: JobStatus)
    -> Result<DistributionJob>;

    /// Running → `status` (terminal), storing counters and failure details.
    async fn finish_job(
        &self,
        id: JobId,
        status: JobStatus,
        outcome: &JobOutcome,
    ) -> Result<DistributionJob>;

    async fn get_round(&self, id: RoundId) -> Result<Option<Round>>;

    async fn set_round_status(&self, id: RoundId, status: RoundStatus) -> Result<()>;

    /// All jury roles of the round, active or not, ordered by ID.
    async fn list_reviewers(&self, round_id: RoundId) -> Result<Vec<Reviewer>>;

    /// All work items of the round, ordered by ID.
    async fn list_work_items(&self, round_id: RoundId) -> Result<Vec<WorkItem>>;

    /// One page of the round's assignments ordered by ID, strictly after
    /// `after` when given.
    async fn list_assignments(
        &self,
        round_id: RoundId,
        after: Option<AssignmentId>,
        limit: usize,
    ) -> Result<Vec<Assignment>>;

    /// Insert new assignment rows and bump each work item's
    /// `assigned_count` by the number of rows created for it, atomically.
    async fn create_assignments(&self, assignments: &[Assignment]) -> Result<u64>;

    /// Apply reviewer changes atomically. Completed assignments are skipped.
    /// Returns the number of rows changed.
    async fn update_assignment_reviewers(&self, changes: &[ReviewerChange]) -> Result<u64>;

    /// Write round, reviewer and work item counters in one transaction.
    async fn apply_statistics(&self, update: &StatisticsUpdate) -> Result<()>;
}

/// Aggregate counts computed by scanning assignments.
#[async_trait]
pub trait StatisticsSource: Send + Sync {
    /// Per work item counts. Items without assignments are omitted.
    async fn work_item_statistics(&self, round_id: RoundId) -> Result<Vec<WorkItemStatistics>>;

    /// Per reviewer counts. Reviewers without assignments are omitted.
    async fn reviewer_statistics(&self, round_id: RoundId) -> Result<Vec<ReviewerStatistics>>;
}

/// Everything the distribution core needs from the primary side.
pub trait Store: PrimaryStore + StatisticsSource {}

impl<T: PrimaryStore + StatisticsSource> Store for T {}

/// Validate a job state transition, returning an error if disallowed.
pub(crate) fn validate_transition(from: JobStatus, to: JobStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(crate::error::Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
