//! Assignment rows: paged reads, bulk inserts, reviewer write-back.

use uuid::Uuid;

use crate::error::Result;
use crate::model::*;

impl super::Db {
    /// One page of a round's assignments, keyset-paginated on the ID.
    pub async fn assignments_page(
        &self,
        round_id: RoundId,
        after: Option<AssignmentId>,
        limit: usize,
    ) -> Result<Vec<Assignment>> {
        let rows: Vec<AssignmentRow> = sqlx::query_as(
            "SELECT assignment_id, work_item_id, round_id, reviewer_id, evaluated_at, distribution_job_id
             FROM assignments
             WHERE round_id = $1 AND ($2::uuid IS NULL OR assignment_id > $2)
             ORDER BY assignment_id
             LIMIT $3",
        )
        .bind(round_id.0)
        .bind(after.map(|id| id.0))
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(AssignmentRow::into_assignment).collect())
    }

    /// Insert rows and bump each work item's `assigned_count` in one transaction.
    pub async fn insert_assignments(&self, assignments: &[Assignment]) -> Result<u64> {
        if assignments.is_empty() {
            return Ok(0);
        }

        let ids: Vec<Uuid> = assignments.iter().map(|a| a.id.0).collect();
        let items: Vec<Uuid> = assignments.iter().map(|a| a.work_item_id.0).collect();
        let rounds: Vec<Uuid> = assignments.iter().map(|a| a.round_id.0).collect();
        let reviewers: Vec<Option<Uuid>> =
            assignments.iter().map(|a| a.reviewer_id.map(|r| r.0)).collect();
        let jobs: Vec<Option<Uuid>> = assignments.iter().map(|a| a.job_id.map(|j| j.0)).collect();

        let mut tx = self.pool().begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO assignments (assignment_id, work_item_id, round_id, reviewer_id, distribution_job_id)
             SELECT * FROM UNNEST($1::uuid[], $2::uuid[], $3::uuid[], $4::uuid[], $5::uuid[])",
        )
        .bind(&ids)
        .bind(&items)
        .bind(&rounds)
        .bind(&reviewers)
        .bind(&jobs)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            "UPDATE work_items SET assigned_count = assigned_count + c.n
             FROM (SELECT work_item_id, COUNT(*)::int AS n FROM UNNEST($1::uuid[]) AS t(work_item_id)
                   GROUP BY work_item_id) AS c
             WHERE work_items.work_item_id = c.work_item_id",
        )
        .bind(&items)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(inserted)
    }

    /// Apply reviewer changes in one transaction. Evaluated rows are skipped.
    ///
    /// The item/reviewer uniqueness constraint is deferred, so swaps that pass
    /// through a transient duplicate only fail if the final state is invalid.
    pub async fn set_assignment_reviewers(&self, changes: &[ReviewerChange]) -> Result<u64> {
        if changes.is_empty() {
            return Ok(0);
        }

        let ids: Vec<Uuid> = changes.iter().map(|c| c.assignment_id.0).collect();
        let reviewers: Vec<Option<Uuid>> =
            changes.iter().map(|c| c.reviewer_id.map(|r| r.0)).collect();
        let jobs: Vec<Uuid> = changes.iter().map(|c| c.job_id.0).collect();

        let mut tx = self.pool().begin().await?;
        let changed = sqlx::query(
            "UPDATE assignments SET reviewer_id = c.reviewer_id, distribution_job_id = c.job_id
             FROM UNNEST($1::uuid[], $2::uuid[], $3::uuid[]) AS c(assignment_id, reviewer_id, job_id)
             WHERE assignments.assignment_id = c.assignment_id AND assignments.evaluated_at IS NULL",
        )
        .bind(&ids)
        .bind(&reviewers)
        .bind(&jobs)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;

        Ok(changed)
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct AssignmentRow {
    assignment_id: Uuid,
    work_item_id: Uuid,
    round_id: Uuid,
    reviewer_id: Option<Uuid>,
    evaluated_at: Option<chrono::DateTime<chrono::Utc>>,
    distribution_job_id: Option<Uuid>,
}

impl AssignmentRow {
    fn into_assignment(self) -> Assignment {
        Assignment {
            id: AssignmentId(self.assignment_id),
            work_item_id: WorkItemId(self.work_item_id),
            round_id: RoundId(self.round_id),
            reviewer_id: self.reviewer_id.map(ReviewerId),
            evaluated_at: self.evaluated_at,
            job_id: self.distribution_job_id.map(JobId),
        }
    }
}
