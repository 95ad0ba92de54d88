//! Assignment distribution: quorum top-up, bulk or quota-claim assignment,
//! then a single-item fallback pass.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::quota::compute_quotas;
use super::workload::WorkloadQueue;
use crate::config::DistributionConfig;
use crate::error::{Error, Result};
use crate::model::*;
use crate::staging::{StagedReviewer, StagingStore};
use crate::store::Store;
use crate::telemetry::metrics;

/// What a distribution run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionReport {
    /// Assignment rows created by the quorum top-up.
    pub created: u64,
    /// Unevaluated rows taken back from ineligible reviewers.
    pub released: u64,
    /// Rows given a reviewer during this run.
    pub assigned: u64,
    /// Rows still without a reviewer at the end.
    pub unassigned: u64,
    /// Rows written back to the primary store.
    pub exported: u64,
    /// Unmatched assignment ID → reason.
    pub failures: BTreeMap<String, String>,
}

impl DistributionReport {
    pub fn outcome(&self) -> JobOutcome {
        JobOutcome {
            success_count: self.assigned,
            failed_count: self.unassigned,
            failures: self.failures.clone(),
        }
    }
}

/// A work item with open slots, as seen by a bulk worker.
#[derive(Debug, Clone)]
struct OpenItem {
    work_item_id: WorkItemId,
    submitter_id: UserId,
    slots: Vec<AssignmentId>,
}

pub struct AssignmentDistributor<'a, S: Store + ?Sized> {
    store: &'a S,
    config: &'a DistributionConfig,
}

impl<'a, S: Store + ?Sized> AssignmentDistributor<'a, S> {
    pub fn new(store: &'a S, config: &'a DistributionConfig) -> Self {
        Self { store, config }
    }

    /// Active reviewers of the round, narrowed to `requested` when non-empty.
    pub async fn eligible_reviewers(
        &self,
        round_id: RoundId,
        requested: &[ReviewerId],
    ) -> Result<Vec<Reviewer>> {
        let requested: HashSet<ReviewerId> = requested.iter().copied().collect();
        let eligible: Vec<Reviewer> = self
            .store
            .list_reviewers(round_id)
            .await?
            .into_iter()
            .filter(|r| r.active && (requested.is_empty() || requested.contains(&r.id)))
            .collect();
        if eligible.is_empty() {
            return Err(Error::InsufficientReviewers { round_id });
        }
        Ok(eligible)
    }

    /// Create the missing unassigned rows so every work item reaches
    /// `min(quorum, reviewer_count)` assignments.
    pub async fn top_up(&self, round: &Round, reviewer_count: usize, job_id: JobId) -> Result<u64> {
        let target = round.quorum.min(u32::try_from(reviewer_count).unwrap_or(u32::MAX));
        let counted: HashMap<WorkItemId, u64> = self
            .store
            .work_item_statistics(round.id)
            .await?
            .into_iter()
            .map(|s| (s.work_item_id, s.assigned))
            .collect();

        let batch_size = self.config.primary_batch_size.max(1);
        let mut pending = Vec::with_capacity(batch_size);
        let mut created = 0;
        for item in self.store.list_work_items(round.id).await? {
            let existing = counted
                .get(&item.id)
                .copied()
                .unwrap_or(0)
                .max(u64::from(item.assigned_count));
            let missing = u64::from(target).saturating_sub(existing);
            for _ in 0..missing {
                pending.push(Assignment::unassigned(&item, job_id));
                if pending.len() >= batch_size {
                    created += self.store.create_assignments(&pending).await?;
                    pending.clear();
                }
            }
        }
        if !pending.is_empty() {
            created += self.store.create_assignments(&pending).await?;
        }

        if created > 0 {
            metrics::assignments_created().add(created, &[]);
        }
        info!(round_id = %round.id, quorum = target, created, "quorum top-up done");
        Ok(created)
    }

    /// Run a full distribution for `round` with the given reviewers.
    pub async fn distribute(
        &self,
        round: &Round,
        job_id: JobId,
        requested: &[ReviewerId],
    ) -> Result<DistributionReport> {
        let started = Instant::now();
        let eligible = self.eligible_reviewers(round.id, requested).await?;
        let created = self.top_up(round, eligible.len(), job_id).await?;

        let staging = StagingStore::open(job_id, &self.config.staging).await?;
        let result = self.distribute_staged(&staging, round, job_id, &eligible).await;
        let closed = staging.close().await;
        let mut report = result?;
        closed?;
        report.created = created;

        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "distribute")],
        );
        info!(
            round_id = %round.id,
            created = report.created,
            assigned = report.assigned,
            unassigned = report.unassigned,
            "distribution finished"
        );
        Ok(report)
    }

    async fn distribute_staged(
        &self,
        staging: &StagingStore,
        round: &Round,
        job_id: JobId,
        eligible: &[Reviewer],
    ) -> Result<DistributionReport> {
        let eligible_ids: HashSet<ReviewerId> = eligible.iter().map(|r| r.id).collect();
        staging.import_round(self.store, round.id, &eligible_ids).await?;

        let mut report = DistributionReport {
            released: staging.release_ineligible().await?,
            ..Default::default()
        };
        if report.released > 0 {
            info!(released = report.released, "released work held by ineligible reviewers");
        }

        let reviewers = staging.eligible_reviewers().await?;
        if staging.has_history().await? {
            report.assigned += self.quota_claim(staging, round.id, &reviewers).await?;
        } else {
            report.assigned += self.bulk_assign(staging, &reviewers).await?;
        }

        let (assigned, failures) = fallback_pass(staging).await?;
        report.assigned += assigned;
        report.unassigned = failures.len() as u64;
        report.failures = failures;

        report.exported = staging
            .export_changes(self.store, job_id, self.config.primary_batch_size)
            .await?;
        Ok(report)
    }

    /// Claim up to each reviewer's quota of unassigned rows, in ID order.
    async fn quota_claim(
        &self,
        staging: &StagingStore,
        round_id: RoundId,
        reviewers: &[StagedReviewer],
    ) -> Result<u64> {
        let open = staging.unassigned_count().await?;
        if open == 0 {
            return Ok(0);
        }
        let loads: Vec<(ReviewerId, u64)> =
            reviewers.iter().map(|r| (r.reviewer_id, r.load)).collect();
        let quotas = compute_quotas(round_id, open, &loads)?;

        let mut claimed = 0;
        for reviewer in reviewers {
            let quota = quotas.get(&reviewer.reviewer_id).copied().unwrap_or(0);
            let got = staging
                .claim(reviewer.reviewer_id, reviewer.user_id, quota)
                .await?;
            if got < quota {
                debug!(reviewer_id = %reviewer.reviewer_id, quota, got, "quota not filled");
            }
            claimed += got;
        }
        metrics::assignments_assigned().add(claimed, &[KeyValue::new("mode", "quota")]);
        Ok(claimed)
    }

    /// Fill every open slot from the minimum-workload queue.
    async fn bulk_assign(&self, staging: &StagingStore, reviewers: &[StagedReviewer]) -> Result<u64> {
        let mut grouped: BTreeMap<WorkItemId, OpenItem> = BTreeMap::new();
        for slot in staging.open_slots().await? {
            grouped
                .entry(slot.work_item_id)
                .or_insert_with(|| OpenItem {
                    work_item_id: slot.work_item_id,
                    submitter_id: slot.submitter_id,
                    slots: Vec::new(),
                })
                .slots
                .push(slot.assignment_id);
        }
        let items: Arc<Vec<OpenItem>> = Arc::new(grouped.into_values().collect());
        if items.is_empty() {
            return Ok(0);
        }

        let mut by_user: HashMap<UserId, Vec<ReviewerId>> = HashMap::new();
        for r in reviewers {
            by_user.entry(r.user_id).or_default().push(r.reviewer_id);
        }
        let by_user = Arc::new(by_user);

        let (queue, actor) = WorkloadQueue::spawn(reviewers.iter().map(|r| (r.reviewer_id, r.load)));
        let ranges = self.config.mode.batch_ranges(items.len());
        debug!(items = items.len(), workers = ranges.len(), "bulk assignment started");

        let mut workers = JoinSet::new();
        for range in ranges {
            workers.spawn(bulk_worker(
                queue.clone(),
                staging.clone(),
                Arc::clone(&items),
                range,
                Arc::clone(&by_user),
                self.config.staging.batch_size.max(1),
            ));
        }

        let mut assigned = 0;
        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(n)) => assigned += n,
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(Error::Other(format!("bulk worker panicked: {e}")));
                }
            }
        }

        let loads = queue.shutdown().await?;
        let _ = actor.await;
        if let Some(e) = first_error {
            return Err(e);
        }
        debug!(?loads, "bulk assignment final loads");
        metrics::assignments_assigned().add(assigned, &[KeyValue::new("mode", "bulk")]);
        Ok(assigned)
    }
}

async fn bulk_worker(
    queue: WorkloadQueue,
    staging: StagingStore,
    items: Arc<Vec<OpenItem>>,
    range: Range<usize>,
    by_user: Arc<HashMap<UserId, Vec<ReviewerId>>>,
    batch_size: usize,
) -> Result<u64> {
    let mut pairs = Vec::with_capacity(batch_size);
    let mut assigned = 0;
    for item in &items[range] {
        let mut excluded: HashSet<ReviewerId> =
            staging.holders(item.work_item_id).await?.into_iter().collect();
        if let Some(own) = by_user.get(&item.submitter_id) {
            excluded.extend(own.iter().copied());
        }

        let picked = queue.pick(item.slots.len(), excluded).await?;
        pairs.extend(item.slots.iter().copied().zip(picked));
        if pairs.len() >= batch_size {
            assigned += staging.assign_many(std::mem::take(&mut pairs)).await?;
        }
    }
    assigned += staging.assign_many(pairs).await?;
    Ok(assigned)
}

/// Give every remaining open slot to the least-loaded reviewer that may
/// take it. Slots nobody can take are returned as failures.
pub(crate) async fn fallback_pass(
    staging: &StagingStore,
) -> Result<(u64, BTreeMap<String, String>)> {
    let mut assigned = 0;
    let mut failures = BTreeMap::new();
    for slot in staging.open_slots().await? {
        match staging.fallback_candidate(slot.assignment_id).await? {
            Some(reviewer) => {
                assigned += staging.assign_many(vec![(slot.assignment_id, reviewer)]).await?;
            }
            None => {
                warn!(
                    assignment_id = %slot.assignment_id,
                    work_item_id = %slot.work_item_id,
                    "no eligible reviewer for assignment"
                );
                failures.insert(
                    slot.assignment_id.to_string(),
                    format!("no eligible reviewer for work item {}", slot.work_item_id),
                );
            }
        }
    }
    if assigned > 0 {
        metrics::assignments_assigned().add(assigned, &[KeyValue::new("mode", "fallback")]);
    }
    if !failures.is_empty() {
        metrics::coverage_gaps().add(failures.len() as u64, &[]);
    }
    Ok((assigned, failures))
}
