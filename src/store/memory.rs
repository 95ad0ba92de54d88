//! In-memory implementation of the store traits.
//!
//! Enforces the same constraints as the Postgres schema: one assignment per
//! (work item, reviewer), completed assignments never change reviewer, and
//! optimistic job transitions.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{PrimaryStore, StatisticsSource, validate_transition};
use crate::error::{Error, Result};
use crate::model::*;

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<JobId, DistributionJob>,
    rounds: HashMap<RoundId, Round>,
    reviewers: BTreeMap<ReviewerId, Reviewer>,
    work_items: BTreeMap<WorkItemId, WorkItem>,
    assignments: BTreeMap<AssignmentId, Assignment>,
    /// Assignment IDs per work item, for constraint checks.
    by_work_item: HashMap<WorkItemId, Vec<AssignmentId>>,
}

impl State {
    fn add_assignment(&mut self, assignment: Assignment) {
        let ids = self.by_work_item.entry(assignment.work_item_id).or_default();
        if !ids.contains(&assignment.id) {
            ids.push(assignment.id);
        }
        self.assignments.insert(assignment.id, assignment);
    }

    /// Rows of `work_item_id`, with `pending` shadowing stored rows.
    fn item_rows<'a>(
        &'a self,
        work_item_id: WorkItemId,
        pending: &'a BTreeMap<AssignmentId, Assignment>,
    ) -> impl Iterator<Item = &'a Assignment> {
        self.by_work_item
            .get(&work_item_id)
            .into_iter()
            .flatten()
            .filter_map(|id| pending.get(id).or_else(|| self.assignments.get(id)))
    }
}

/// Primary store kept entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_round(&self, round: Round) {
        self.state.lock().await.rounds.insert(round.id, round);
    }

    pub async fn insert_reviewer(&self, reviewer: Reviewer) {
        self.state.lock().await.reviewers.insert(reviewer.id, reviewer);
    }

    pub async fn insert_work_item(&self, item: WorkItem) {
        self.state.lock().await.work_items.insert(item.id, item);
    }

    /// Insert an assignment as-is, without touching any counters.
    pub async fn insert_assignment(&self, assignment: Assignment) {
        self.state.lock().await.add_assignment(assignment);
    }

    /// Record a verdict on an assignment.
    pub async fn mark_evaluated(&self, id: AssignmentId) -> Result<()> {
        let mut state = self.state.lock().await;
        let assignment = state
            .assignments
            .get_mut(&id)
            .ok_or_else(|| Error::Other(format!("assignment not found: {id}")))?;
        if assignment.reviewer_id.is_none() {
            return Err(Error::Constraint(format!(
                "assignment {id} has no reviewer to evaluate it"
            )));
        }
        assignment.evaluated_at = Some(Utc::now());
        Ok(())
    }

    pub async fn round(&self, id: RoundId) -> Option<Round> {
        self.state.lock().await.rounds.get(&id).cloned()
    }

    pub async fn reviewer(&self, id: ReviewerId) -> Option<Reviewer> {
        self.state.lock().await.reviewers.get(&id).cloned()
    }

    pub async fn work_item(&self, id: WorkItemId) -> Option<WorkItem> {
        self.state.lock().await.work_items.get(&id).cloned()
    }

    /// Every assignment of the round, ordered by ID.
    pub async fn assignments(&self, round_id: RoundId) -> Vec<Assignment> {
        self.state
            .lock()
            .await
            .assignments
            .values()
            .filter(|a| a.round_id == round_id)
            .cloned()
            .collect()
    }
}

fn check_unique_reviewers<'a>(assignments: impl Iterator<Item = &'a Assignment>) -> Result<()> {
    let mut seen = HashSet::new();
    for assignment in assignments {
        if let Some(reviewer_id) = assignment.reviewer_id {
            if !seen.insert((assignment.work_item_id, reviewer_id)) {
                return Err(Error::Constraint(format!(
                    "reviewer {reviewer_id} already holds work item {}",
                    assignment.work_item_id
                )));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl PrimaryStore for MemoryStore {
    async fn create_job(&self, job: &DistributionJob) -> Result<DistributionJob> {
        let mut state = self.state.lock().await;
        let stored = state.jobs.entry(job.id).or_insert_with(|| job.clone());
        Ok(stored.clone())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<DistributionJob>> {
        Ok(self.state.lock().await.jobs.get(&id).cloned())
    }

    async fn transition_job(
        &self,
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<DistributionJob> {
        validate_transition(from, to)?;
        let mut state = self.state.lock().await;
        let job = state.jobs.get_mut(&id).ok_or(Error::JobNotFound(id))?;
        if job.status != from {
            return Err(Error::InvalidTransition {
                from: job.status.to_string(),
                to: to.to_string(),
            });
        }
        job.status = to;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn finish_job(
        &self,
        id: JobId,
        status: JobStatus,
        outcome: &JobOutcome,
    ) -> Result<DistributionJob> {
        validate_transition(JobStatus::Running, status)?;
        let mut state = self.state.lock().await;
        let job = state.jobs.get_mut(&id).ok_or(Error::JobNotFound(id))?;
        if job.status != JobStatus::Running {
            return Err(Error::InvalidTransition {
                from: job.status.to_string(),
                to: status.to_string(),
            });
        }
        job.status = status;
        job.success_count = outcome.success_count;
        job.failed_count = outcome.failed_count;
        job.failures = outcome.failures.clone();
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn get_round(&self, id: RoundId) -> Result<Option<Round>> {
        Ok(self.state.lock().await.rounds.get(&id).cloned())
    }

    async fn set_round_status(&self, id: RoundId, status: RoundStatus) -> Result<()> {
        let mut state = self.state.lock().await;
        let round = state.rounds.get_mut(&id).ok_or(Error::RoundNotFound(id))?;
        round.status = status;
        Ok(())
    }

    async fn list_reviewers(&self, round_id: RoundId) -> Result<Vec<Reviewer>> {
        Ok(self
            .state
            .lock()
            .await
            .reviewers
            .values()
            .filter(|r| r.round_id == round_id)
            .cloned()
            .collect())
    }

    async fn list_work_items(&self, round_id: RoundId) -> Result<Vec<WorkItem>> {
        Ok(self
            .state
            .lock()
            .await
            .work_items
            .values()
            .filter(|w| w.round_id == round_id)
            .cloned()
            .collect())
    }

    async fn list_assignments(
        &self,
        round_id: RoundId,
        after: Option<AssignmentId>,
        limit: usize,
    ) -> Result<Vec<Assignment>> {
        let state = self.state.lock().await;
        let page = state
            .assignments
            .values()
            .filter(|a| a.round_id == round_id)
            .filter(|a| after.is_none_or(|after| a.id > after))
            .take(limit)
            .cloned()
            .collect();
        Ok(page)
    }

    async fn create_assignments(&self, assignments: &[Assignment]) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut created: HashMap<WorkItemId, u32> = HashMap::new();
        for assignment in assignments {
            if !state.work_items.contains_key(&assignment.work_item_id) {
                return Err(Error::Constraint(format!(
                    "work item not found: {}",
                    assignment.work_item_id
                )));
            }
            if state.assignments.contains_key(&assignment.id) {
                return Err(Error::Constraint(format!(
                    "duplicate assignment id: {}",
                    assignment.id
                )));
            }
            *created.entry(assignment.work_item_id).or_default() += 1;
        }
        let mut pending: BTreeMap<AssignmentId, Assignment> = BTreeMap::new();
        for assignment in assignments {
            if pending.insert(assignment.id, assignment.clone()).is_some() {
                return Err(Error::Constraint(format!(
                    "duplicate assignment id: {}",
                    assignment.id
                )));
            }
        }
        for &work_item_id in created.keys() {
            let new_rows = pending.values().filter(|a| a.work_item_id == work_item_id);
            check_unique_reviewers(state.item_rows(work_item_id, &pending).chain(new_rows))?;
        }

        for assignment in pending.into_values() {
            state.add_assignment(assignment);
        }
        for (work_item_id, count) in created {
            if let Some(item) = state.work_items.get_mut(&work_item_id) {
                item.assigned_count += count;
            }
        }
        Ok(assignments.len() as u64)
    }

    async fn update_assignment_reviewers(&self, changes: &[ReviewerChange]) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut pending: BTreeMap<AssignmentId, Assignment> = BTreeMap::new();
        for change in changes {
            let Some(current) = pending
                .get(&change.assignment_id)
                .or_else(|| state.assignments.get(&change.assignment_id))
            else {
                continue;
            };
            if current.is_evaluated() {
                continue;
            }
            let mut next = current.clone();
            next.reviewer_id = change.reviewer_id;
            next.job_id = Some(change.job_id);
            pending.insert(next.id, next);
        }

        // Only the touched work items can gain a duplicate.
        let touched: BTreeSet<WorkItemId> = pending.values().map(|a| a.work_item_id).collect();
        for work_item_id in touched {
            check_unique_reviewers(state.item_rows(work_item_id, &pending))?;
        }

        let changed = pending.len() as u64;
        state.assignments.extend(pending);
        Ok(changed)
    }

    async fn apply_statistics(&self, update: &StatisticsUpdate) -> Result<()> {
        let mut state = self.state.lock().await;
        let round = state
            .rounds
            .get_mut(&update.round_id)
            .ok_or(Error::RoundNotFound(update.round_id))?;
        round.statistics = update.round;
        if update.latest_job_id.is_some() {
            round.latest_job_id = update.latest_job_id;
        }
        for stat in &update.reviewers {
            if let Some(reviewer) = state.reviewers.get_mut(&stat.reviewer_id) {
                reviewer.total_assigned = stat.assigned;
                reviewer.total_evaluated = stat.evaluated;
            }
        }
        for stat in &update.work_items {
            if let Some(item) = state.work_items.get_mut(&stat.work_item_id) {
                item.assigned_count = stat.assigned as u32;
                item.evaluated_count = stat.evaluated as u32;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StatisticsSource for MemoryStore {
    async fn work_item_statistics(&self, round_id: RoundId) -> Result<Vec<WorkItemStatistics>> {
        let state = self.state.lock().await;
        let mut stats: BTreeMap<WorkItemId, WorkItemStatistics> = BTreeMap::new();
        for assignment in state.assignments.values().filter(|a| a.round_id == round_id) {
            let entry = stats
                .entry(assignment.work_item_id)
                .or_insert(WorkItemStatistics {
                    work_item_id: assignment.work_item_id,
                    assigned: 0,
                    evaluated: 0,
                });
            entry.assigned += 1;
            if assignment.is_evaluated() {
                entry.evaluated += 1;
            }
        }
        Ok(stats.into_values().collect())
    }

    async fn reviewer_statistics(&self, round_id: RoundId) -> Result<Vec<ReviewerStatistics>> {
        let state = self.state.lock().await;
        let mut stats: BTreeMap<ReviewerId, ReviewerStatistics> = BTreeMap::new();
        for assignment in state.assignments.values().filter(|a| a.round_id == round_id) {
            let Some(reviewer_id) = assignment.reviewer_id else {
                continue;
            };
            let entry = stats.entry(reviewer_id).or_insert(ReviewerStatistics {
                reviewer_id,
                assigned: 0,
                evaluated: 0,
            });
            entry.assigned += 1;
            if assignment.is_evaluated() {
                entry.evaluated += 1;
            }
        }
        Ok(stats.into_values().collect())
    }
}
