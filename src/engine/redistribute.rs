//! Rebalancing of unevaluated work between reviewer sets.
//!
//! Each quota unit of a target reviewer is either a pairwise swap with a
//! donor (when a source set is given) or a single claim of unassigned work.
//! Swaps keep both sides' counts stable while changing who reviews what.
//! Evaluated assignments are never moved.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::{debug, info};

use super::distributor::{DistributionReport, fallback_pass};
use super::quota::compute_quotas;
use crate::config::DistributionConfig;
use crate::error::{Error, Result};
use crate::model::*;
use crate::staging::StagingStore;
use crate::store::Store;
use crate::telemetry::metrics;

pub struct RedistributionEngine<'a, S: Store + ?Sized> {
    store: &'a S,
    config: &'a DistributionConfig,
}

impl<'a, S: Store + ?Sized> RedistributionEngine<'a, S> {
    pub fn new(store: &'a S, config: &'a DistributionConfig) -> Self {
        Self { store, config }
    }

    pub async fn redistribute(
        &self,
        round: &Round,
        job_id: JobId,
        source: &[ReviewerId],
        target: &[ReviewerId],
    ) -> Result<DistributionReport> {
        let started = Instant::now();
        let reviewers = self.store.list_reviewers(round.id).await?;
        let users: HashMap<ReviewerId, UserId> =
            reviewers.iter().map(|r| (r.id, r.user_id)).collect();

        let target_set: HashSet<ReviewerId> = target.iter().copied().collect();
        let source_set: HashSet<ReviewerId> = source.iter().copied().collect();
        // Reviewer lists come back ordered by ID.
        let targets: Vec<ReviewerId> = reviewers
            .iter()
            .filter(|r| r.active && target_set.contains(&r.id))
            .map(|r| r.id)
            .collect();
        let donors: Vec<ReviewerId> = reviewers
            .iter()
            .filter(|r| source_set.contains(&r.id) && !target_set.contains(&r.id))
            .map(|r| r.id)
            .collect();
        if targets.is_empty() {
            return Err(Error::InsufficientReviewers { round_id: round.id });
        }

        let staging = StagingStore::open(job_id, &self.config.staging).await?;
        let result = self
            .redistribute_staged(&staging, round, job_id, &targets, &donors, &users)
            .await;
        let closed = staging.close().await;
        let report = result?;
        closed?;

        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "redistribute")],
        );
        info!(
            round_id = %round.id,
            moved = report.assigned,
            unassigned = report.unassigned,
            "redistribution finished"
        );
        Ok(report)
    }

    async fn redistribute_staged(
        &self,
        staging: &StagingStore,
        round: &Round,
        job_id: JobId,
        targets: &[ReviewerId],
        donors: &[ReviewerId],
        users: &HashMap<ReviewerId, UserId>,
    ) -> Result<DistributionReport> {
        let eligible: HashSet<ReviewerId> = targets.iter().copied().collect();
        staging.import_round(self.store, round.id, &eligible).await?;

        let eligible_work = if donors.is_empty() {
            staging.unassigned_count().await?
        } else {
            staging.unevaluated_loads(donors).await?.values().sum()
        };
        if eligible_work == 0 {
            return Err(Error::NoEligibleWork { round_id: round.id });
        }

        let loads: Vec<(ReviewerId, u64)> = staging
            .unevaluated_loads(targets)
            .await?
            .into_iter()
            .collect();
        let quotas = compute_quotas(round.id, eligible_work, &loads)?;

        let mut moved = 0u64;
        let mut cursor = 0usize;
        for &target in targets {
            let quota = quotas.get(&target).copied().unwrap_or(0);
            let Some(&target_user) = users.get(&target) else {
                continue;
            };

            let mut done = 0;
            while done < quota {
                let unit = if donors.is_empty() {
                    staging.claim(target, target_user, 1).await? == 1
                } else {
                    let mut swapped = false;
                    for step in 0..donors.len() {
                        let index = (cursor + step) % donors.len();
                        let donor = donors[index];
                        let Some(&donor_user) = users.get(&donor) else {
                            continue;
                        };
                        if staging.swap((target, target_user), (donor, donor_user)).await? {
                            cursor = index + 1;
                            swapped = true;
                            break;
                        }
                    }
                    swapped
                };
                if !unit {
                    break;
                }
                done += 1;
            }
            if done < quota {
                debug!(reviewer_id = %target, quota, done, "redistribution quota not filled");
            }
            moved += done;
        }
        let mode = if donors.is_empty() { "quota" } else { "swap" };
        metrics::assignments_assigned().add(moved, &[KeyValue::new("mode", mode)]);

        let (swept, failures) = fallback_pass(staging).await?;
        let exported = staging
            .export_changes(self.store, job_id, self.config.primary_batch_size)
            .await?;

        Ok(DistributionReport {
            created: 0,
            released: 0,
            assigned: moved + swept,
            unassigned: failures.len() as u64,
            exported,
            failures,
        })
    }
}
