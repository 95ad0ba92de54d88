//! Core data model.
//!
//! A round holds work items (submissions) that need a quorum of independent
//! reviews. Reviewers are jury roles scoped to the round. An assignment binds
//! one work item to one reviewer; distribution jobs create and move them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| Error::Other(format!("bad {}: {e}", stringify!($name))))
            }
        }
    };
}

id_type!(
    /// Round identifier.
    RoundId
);
id_type!(
    /// Campaign identifier. Rounds belong to campaigns; this core only carries it.
    CampaignId
);
id_type!(
    /// Work item (submission) identifier.
    WorkItemId
);
id_type!(
    /// Reviewer (jury role) identifier. Distinct from the user behind the role.
    ReviewerId
);
id_type!(
    /// Underlying user account identifier.
    UserId
);
id_type!(
    /// Assignment (evaluation) identifier.
    AssignmentId
);
id_type!(
    /// Distribution job identifier.
    JobId
);

// ---------------------------------------------------------------------------
// Round
// ---------------------------------------------------------------------------

/// Coarse lifecycle of a round. Only `Distributing` is owned by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Pending,
    Importing,
    Distributing,
    Evaluating,
    Completed,
    Rejected,
    Cancelled,
    Paused,
}

impl std::fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RoundStatus::Pending => "pending",
            RoundStatus::Importing => "importing",
            RoundStatus::Distributing => "distributing",
            RoundStatus::Evaluating => "evaluating",
            RoundStatus::Completed => "completed",
            RoundStatus::Rejected => "rejected",
            RoundStatus::Cancelled => "cancelled",
            RoundStatus::Paused => "paused",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RoundStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RoundStatus::Pending),
            "importing" => Ok(RoundStatus::Importing),
            "distributing" => Ok(RoundStatus::Distributing),
            "evaluating" => Ok(RoundStatus::Evaluating),
            "completed" => Ok(RoundStatus::Completed),
            "rejected" => Ok(RoundStatus::Rejected),
            "cancelled" => Ok(RoundStatus::Cancelled),
            "paused" => Ok(RoundStatus::Paused),
            other => Err(Error::Other(format!("unknown round status: {other}"))),
        }
    }
}

/// Cached round-level counters, recomputed after every distribution run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStatistics {
    pub total_submissions: u64,
    pub total_assignments: u64,
    pub total_evaluated_assignments: u64,
    pub total_evaluated_submissions: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub campaign_id: CampaignId,
    /// Independent reviews required per work item.
    pub quorum: u32,
    pub status: RoundStatus,
    pub statistics: RoundStatistics,
    /// Most recent distribution job that touched this round.
    pub latest_job_id: Option<JobId>,
}

// ---------------------------------------------------------------------------
// Work items, reviewers, assignments
// ---------------------------------------------------------------------------

/// A submission that needs reviewing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub round_id: RoundId,
    /// The user who submitted this item. Their reviewer role may never review it.
    pub submitter_id: UserId,
    pub assigned_count: u32,
    pub evaluated_count: u32,
}

/// A jury role scoped to one round. Counters are cached, not authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reviewer {
    pub id: ReviewerId,
    pub round_id: RoundId,
    pub user_id: UserId,
    /// Inactive reviewers keep their completed work but receive nothing new.
    pub active: bool,
    pub total_assigned: u64,
    pub total_evaluated: u64,
}

/// One review slot of one work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub work_item_id: WorkItemId,
    pub round_id: RoundId,
    /// `None` while unassigned.
    pub reviewer_id: Option<ReviewerId>,
    /// Completion marker. Once set, `reviewer_id` never changes.
    pub evaluated_at: Option<DateTime<Utc>>,
    /// The job that last (re)claimed this row.
    pub job_id: Option<JobId>,
}

impl Assignment {
    /// A fresh unassigned slot for `work_item`, created by `job_id`.
    pub fn unassigned(work_item: &WorkItem, job_id: JobId) -> Self {
        Self {
            id: AssignmentId::new(),
            work_item_id: work_item.id,
            round_id: work_item.round_id,
            reviewer_id: None,
            evaluated_at: None,
            job_id: Some(job_id),
        }
    }

    pub fn is_evaluated(&self) -> bool {
        self.evaluated_at.is_some()
    }
}

/// A reviewer change written back to the primary store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewerChange {
    pub assignment_id: AssignmentId,
    pub reviewer_id: Option<ReviewerId>,
    pub job_id: JobId,
}

// ---------------------------------------------------------------------------
// Distribution jobs
// ---------------------------------------------------------------------------

/// Lifecycle state of a distribution job. No automatic retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Pending, Running) | (Running, Success) | (Running, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::Other(format!("unknown job status: {other}"))),
        }
    }
}

/// What a job does when it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    /// Quorum top-up plus fair assignment. An empty reviewer list means every
    /// active reviewer of the round.
    Distribute { reviewers: Vec<ReviewerId> },
    /// Swap unevaluated work from `source` reviewers to `target` reviewers.
    Redistribute {
        source: Vec<ReviewerId>,
        target: Vec<ReviewerId>,
    },
    /// Submission import. Handled outside this crate.
    Import,
}

impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::Distribute { .. } => "distribute",
            JobKind::Redistribute { .. } => "redistribute",
            JobKind::Import => "import",
        }
    }
}

/// A persisted distribution job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionJob {
    pub id: JobId,
    pub round_id: RoundId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub success_count: u64,
    pub failed_count: u64,
    /// Free-form failure details, keyed by assignment ID or `"error"`.
    pub failures: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DistributionJob {
    /// A new pending job for `round_id`.
    pub fn new(round_id: RoundId, kind: JobKind) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            round_id,
            kind,
            status: JobStatus::Pending,
            success_count: 0,
            failed_count: 0,
            failures: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Terminal result recorded on a job by the runner.
#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    pub success_count: u64,
    pub failed_count: u64,
    pub failures: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Assignment/evaluation counts for one work item, from scanning assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItemStatistics {
    pub work_item_id: WorkItemId,
    pub assigned: u64,
    pub evaluated: u64,
}

/// Assignment/evaluation counts for one reviewer, from scanning assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewerStatistics {
    pub reviewer_id: ReviewerId,
    pub assigned: u64,
    pub evaluated: u64,
}

/// Everything the statistics aggregator writes back in one batch.
#[derive(Debug, Clone)]
pub struct StatisticsUpdate {
    pub round_id: RoundId,
    pub round: RoundStatistics,
    pub latest_job_id: Option<JobId>,
    pub reviewers: Vec<ReviewerStatistics>,
    pub work_items: Vec<WorkItemStatistics>,
}
