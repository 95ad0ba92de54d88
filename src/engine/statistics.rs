//! Recomputes cached round, reviewer and work item counters.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{Error, Result};
use crate::model::*;
use crate::store::Store;

/// Scan assignment counts and write every cached counter of the round in
/// one update. Running it twice yields the same counters.
pub async fn refresh_statistics<S: Store + ?Sized>(
    store: &S,
    round_id: RoundId,
    latest_job_id: Option<JobId>,
) -> Result<StatisticsUpdate> {
    let round = store
        .get_round(round_id)
        .await?
        .ok_or(Error::RoundNotFound(round_id))?;

    let item_counts: HashMap<WorkItemId, WorkItemStatistics> = store
        .work_item_statistics(round_id)
        .await?
        .into_iter()
        .map(|s| (s.work_item_id, s))
        .collect();
    let reviewer_counts: HashMap<ReviewerId, ReviewerStatistics> = store
        .reviewer_statistics(round_id)
        .await?
        .into_iter()
        .map(|s| (s.reviewer_id, s))
        .collect();

    let work_items: Vec<WorkItemStatistics> = store
        .list_work_items(round_id)
        .await?
        .into_iter()
        .map(|item| {
            item_counts.get(&item.id).copied().unwrap_or(WorkItemStatistics {
                work_item_id: item.id,
                assigned: 0,
                evaluated: 0,
            })
        })
        .collect();
    let reviewers: Vec<ReviewerStatistics> = store
        .list_reviewers(round_id)
        .await?
        .into_iter()
        .map(|r| {
            reviewer_counts.get(&r.id).copied().unwrap_or(ReviewerStatistics {
                reviewer_id: r.id,
                assigned: 0,
                evaluated: 0,
            })
        })
        .collect();

    let quorum = u64::from(round.quorum);
    let totals = RoundStatistics {
        total_submissions: work_items.len() as u64,
        total_assignments: work_items.iter().map(|s| s.assigned).sum(),
        total_evaluated_assignments: work_items.iter().map(|s| s.evaluated).sum(),
        total_evaluated_submissions: work_items
            .iter()
            .filter(|s| s.evaluated >= quorum)
            .count() as u64,
    };

    let update = StatisticsUpdate {
        round_id,
        round: totals,
        latest_job_id,
        reviewers,
        work_items,
    };
    store.apply_statistics(&update).await?;
    debug!(round_id = %round_id, statistics = ?update.round, "round statistics refreshed");
    Ok(update)
}
