//! Rounds, reviewers and work items, plus the statistics write-back.

use uuid::Uuid;

use crate::error::Result;
use crate::model::*;

impl super::Db {
    pub async fn find_round(&self, id: RoundId) -> Result<Option<Round>> {
        let row: Option<RoundRow> = sqlx::query_as(
            "SELECT round_id, campaign_id, quorum, status, total_submissions, total_assignments,
                    total_evaluated_assignments, total_evaluated_submissions, latest_job_id
             FROM rounds WHERE round_id = $1",
        )
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;

        row.map(RoundRow::try_into_round).transpose()
    }

    pub async fn update_round_status(&self, id: RoundId, status: RoundStatus) -> Result<()> {
        let rows_affected =
            sqlx::query("UPDATE rounds SET status = $1, updated_at = now() WHERE round_id = $2")
                .bind(status.to_string())
                .bind(id.0)
                .execute(self.pool())
                .await?
                .rows_affected();

        if rows_affected == 0 {
            return Err(crate::error::Error::RoundNotFound(id));
        }
        Ok(())
    }

    pub async fn reviewers_by_round(&self, round_id: RoundId) -> Result<Vec<Reviewer>> {
        let rows: Vec<(Uuid, Uuid, Uuid, bool, i64, i64)> = sqlx::query_as(
            "SELECT reviewer_id, round_id, user_id, active, total_assigned, total_evaluated
             FROM reviewers WHERE round_id = $1 ORDER BY reviewer_id",
        )
        .bind(round_id.0)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, round_id, user_id, active, total_assigned, total_evaluated)| Reviewer {
                    id: ReviewerId(id),
                    round_id: RoundId(round_id),
                    user_id: UserId(user_id),
                    active,
                    total_assigned: total_assigned as u64,
                    total_evaluated: total_evaluated as u64,
                },
            )
            .collect())
    }

    pub async fn work_items_by_round(&self, round_id: RoundId) -> Result<Vec<WorkItem>> {
        let rows: Vec<(Uuid, Uuid, Uuid, i32, i32)> = sqlx::query_as(
            "SELECT work_item_id, round_id, submitter_id, assigned_count, evaluated_count
             FROM work_items WHERE round_id = $1 ORDER BY work_item_id",
        )
        .bind(round_id.0)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, round_id, submitter_id, assigned_count, evaluated_count)| WorkItem {
                    id: WorkItemId(id),
                    round_id: RoundId(round_id),
                    submitter_id: UserId(submitter_id),
                    assigned_count: assigned_count.max(0) as u32,
                    evaluated_count: evaluated_count.max(0) as u32,
                },
            )
            .collect())
    }

    /// Round, reviewer and work item counters in a single transaction.
    pub async fn write_statistics(&self, update: &StatisticsUpdate) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        let rows_affected = sqlx::query(
            "UPDATE rounds SET total_submissions = $1, total_assignments = $2,
                    total_evaluated_assignments = $3, total_evaluated_submissions = $4,
                    latest_job_id = COALESCE($5, latest_job_id), updated_at = now()
             WHERE round_id = $6",
        )
        .bind(update.round.total_submissions as i64)
        .bind(update.round.total_assignments as i64)
        .bind(update.round.total_evaluated_assignments as i64)
        .bind(update.round.total_evaluated_submissions as i64)
        .bind(update.latest_job_id.map(|id| id.0))
        .bind(update.round_id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(crate::error::Error::RoundNotFound(update.round_id));
        }

        let reviewer_ids: Vec<Uuid> = update.reviewers.iter().map(|s| s.reviewer_id.0).collect();
        let reviewer_assigned: Vec<i64> =
            update.reviewers.iter().map(|s| s.assigned as i64).collect();
        let reviewer_evaluated: Vec<i64> =
            update.reviewers.iter().map(|s| s.evaluated as i64).collect();
        sqlx::query(
            "UPDATE reviewers SET total_assigned = s.assigned, total_evaluated = s.evaluated
             FROM UNNEST($1::uuid[], $2::bigint[], $3::bigint[]) AS s(reviewer_id, assigned, evaluated)
             WHERE reviewers.reviewer_id = s.reviewer_id AND reviewers.round_id = $4",
        )
        .bind(&reviewer_ids)
        .bind(&reviewer_assigned)
        .bind(&reviewer_evaluated)
        .bind(update.round_id.0)
        .execute(&mut *tx)
        .await?;

        let item_ids: Vec<Uuid> = update.work_items.iter().map(|s| s.work_item_id.0).collect();
        let item_assigned: Vec<i32> = update.work_items.iter().map(|s| s.assigned as i32).collect();
        let item_evaluated: Vec<i32> =
            update.work_items.iter().map(|s| s.evaluated as i32).collect();
        sqlx::query(
            "UPDATE work_items SET assigned_count = s.assigned, evaluated_count = s.evaluated
             FROM UNNEST($1::uuid[], $2::int[], $3::int[]) AS s(work_item_id, assigned, evaluated)
             WHERE work_items.work_item_id = s.work_item_id AND work_items.round_id = $4",
        )
        .bind(&item_ids)
        .bind(&item_assigned)
        .bind(&item_evaluated)
        .bind(update.round_id.0)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn count_by_work_item(&self, round_id: RoundId) -> Result<Vec<WorkItemStatistics>> {
        let rows: Vec<(Uuid, i64, i64)> = sqlx::query_as(
            "SELECT work_item_id, COUNT(*), COUNT(evaluated_at)
             FROM assignments WHERE round_id = $1
             GROUP BY work_item_id ORDER BY work_item_id",
        )
        .bind(round_id.0)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, assigned, evaluated)| WorkItemStatistics {
                work_item_id: WorkItemId(id),
                assigned: assigned as u64,
                evaluated: evaluated as u64,
            })
            .collect())
    }

    pub async fn count_by_reviewer(&self, round_id: RoundId) -> Result<Vec<ReviewerStatistics>> {
        let rows: Vec<(Uuid, i64, i64)> = sqlx::query_as(
            "SELECT reviewer_id, COUNT(*), COUNT(evaluated_at)
             FROM assignments WHERE round_id = $1 AND reviewer_id IS NOT NULL
             GROUP BY reviewer_id ORDER BY reviewer_id",
        )
        .bind(round_id.0)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, assigned, evaluated)| ReviewerStatistics {
                reviewer_id: ReviewerId(id),
                assigned: assigned as u64,
                evaluated: evaluated as u64,
            })
            .collect())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct RoundRow {
    round_id: Uuid,
    campaign_id: Uuid,
    quorum: i32,
    status: String,
    total_submissions: i64,
    total_assignments: i64,
    total_evaluated_assignments: i64,
    total_evaluated_submissions: i64,
    latest_job_id: Option<Uuid>,
}

impl RoundRow {
    fn try_into_round(self) -> Result<Round> {
        Ok(Round {
            id: RoundId(self.round_id),
            campaign_id: CampaignId(self.campaign_id),
            quorum: self.quorum.max(0) as u32,
            status: self.status.parse()?,
            statistics: RoundStatistics {
                total_submissions: self.total_submissions as u64,
                total_assignments: self.total_assignments as u64,
                total_evaluated_assignments: self.total_evaluated_assignments as u64,
                total_evaluated_submissions: self.total_evaluated_submissions as u64,
            },
            latest_job_id: self.latest_job_id.map(JobId),
        })
    }
}
