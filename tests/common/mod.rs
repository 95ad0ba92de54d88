//! Shared fixtures: an in-memory round with predictable IDs.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use jury_balance::config::DistributionConfig;
use jury_balance::engine::DistributionService;
use jury_balance::model::*;
use jury_balance::store::{MemoryStore, PrimaryStore};
use uuid::Uuid;

pub fn uid(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

/// Reviewer IDs sort in the order of `n`.
pub fn reviewer_id(n: u128) -> ReviewerId {
    ReviewerId(uid(1_000 + n))
}

pub fn user_id(n: u128) -> UserId {
    UserId(uid(n))
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub round_id: RoundId,
    next_assignment: AtomicU64,
}

impl Fixture {
    /// A round in `Evaluating` with the given quorum.
    pub async fn new(quorum: u32) -> Self {
        let store = Arc::new(MemoryStore::new());
        let round_id = RoundId::new();
        store
            .insert_round(Round {
                id: round_id,
                campaign_id: CampaignId::new(),
                quorum,
                status: RoundStatus::Evaluating,
                statistics: RoundStatistics::default(),
                latest_job_id: None,
            })
            .await;
        Self {
            store,
            round_id,
            next_assignment: AtomicU64::new(1),
        }
    }

    /// Active reviewer `n`, backed by user `n`.
    pub async fn reviewer(&self, n: u128) -> Reviewer {
        self.add_reviewer(n, true).await
    }

    pub async fn inactive_reviewer(&self, n: u128) -> Reviewer {
        self.add_reviewer(n, false).await
    }

    async fn add_reviewer(&self, n: u128, active: bool) -> Reviewer {
        let reviewer = Reviewer {
            id: reviewer_id(n),
            round_id: self.round_id,
            user_id: user_id(n),
            active,
            total_assigned: 0,
            total_evaluated: 0,
        };
        self.store.insert_reviewer(reviewer.clone()).await;
        reviewer
    }

    /// Work item `n` submitted by user `submitter`.
    pub async fn item(&self, n: u128, submitter: u128) -> WorkItem {
        let item = WorkItem {
            id: WorkItemId(uid(2_000 + n)),
            round_id: self.round_id,
            submitter_id: user_id(submitter),
            assigned_count: 0,
            evaluated_count: 0,
        };
        self.store.insert_work_item(item.clone()).await;
        item
    }

    /// Seed an existing assignment and keep the item's cached count in step.
    pub async fn assignment(
        &self,
        item: &WorkItem,
        reviewer: Option<ReviewerId>,
        evaluated: bool,
    ) -> Assignment {
        let n = self.next_assignment.fetch_add(1, Ordering::Relaxed);
        let assignment = Assignment {
            id: AssignmentId(uid(10_000 + u128::from(n))),
            work_item_id: item.id,
            round_id: self.round_id,
            reviewer_id: reviewer,
            evaluated_at: evaluated.then(Utc::now),
            job_id: None,
        };
        self.store.insert_assignment(assignment.clone()).await;
        let mut updated = self
            .store
            .work_item(item.id)
            .await
            .expect("work item seeded");
        updated.assigned_count += 1;
        if evaluated {
            updated.evaluated_count += 1;
        }
        self.store.insert_work_item(updated).await;
        assignment
    }

    pub fn service(&self) -> DistributionService {
        self.service_with(DistributionConfig::default())
    }

    pub fn service_with(&self, config: DistributionConfig) -> DistributionService {
        DistributionService::new(self.store.clone(), config)
    }

    pub async fn assignments(&self) -> Vec<Assignment> {
        self.store.assignments(self.round_id).await
    }

    pub async fn round(&self) -> Round {
        self.store.round(self.round_id).await.expect("round seeded")
    }

    /// Assignments per reviewer.
    pub async fn loads(&self) -> HashMap<ReviewerId, usize> {
        let mut loads = HashMap::new();
        for a in self.assignments().await {
            if let Some(r) = a.reviewer_id {
                *loads.entry(r).or_default() += 1;
            }
        }
        loads
    }

    /// No duplicate (item, reviewer) pair and no self-review.
    pub async fn assert_constraints(&self) {
        let reviewers: HashMap<ReviewerId, UserId> = self
            .store
            .list_reviewers(self.round_id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.id, r.user_id))
            .collect();
        let mut seen = HashSet::new();
        for a in self.assignments().await {
            let Some(r) = a.reviewer_id else { continue };
            assert!(
                seen.insert((a.work_item_id, r)),
                "reviewer {r} holds work item {} twice",
                a.work_item_id
            );
            let item = self.store.work_item(a.work_item_id).await.unwrap();
            assert_ne!(
                reviewers.get(&r),
                Some(&item.submitter_id),
                "reviewer {r} reviews their own submission"
            );
        }
    }
}
