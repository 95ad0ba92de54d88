//! Job execution: status lifecycle, strategy dispatch, round status restore.

use std::sync::Arc;

use tracing::{Instrument, error, info, warn};

use super::distributor::{AssignmentDistributor, DistributionReport};
use super::redistribute::RedistributionEngine;
use super::statistics::refresh_statistics;
use crate::config::DistributionConfig;
use crate::error::{Error, Result};
use crate::model::*;
use crate::store::Store;
use crate::telemetry::job::{record_state_transition, start_job_span};

/// The strategy a job runs, borrowed from its kind.
enum Strategy<'a> {
    Distribute {
        reviewers: &'a [ReviewerId],
    },
    Redistribute {
        source: &'a [ReviewerId],
        target: &'a [ReviewerId],
    },
}

/// Runs persisted distribution jobs to a terminal status.
#[derive(Clone)]
pub struct TaskRunner {
    store: Arc<dyn Store>,
    config: Arc<DistributionConfig>,
}

impl TaskRunner {
    pub fn new(store: Arc<dyn Store>, config: Arc<DistributionConfig>) -> Self {
        Self { store, config }
    }

    /// Run job `job_id`. A job that is already terminal is returned as-is.
    ///
    /// Strategy errors do not surface here: they are recorded on the job as
    /// `Failed` with the message under the `error` key. Errors are returned
    /// only when the job record itself cannot be read or written.
    pub async fn run(&self, job_id: JobId) -> Result<DistributionJob> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))?;
        if job.status.is_terminal() {
            info!(job_id = %job_id, status = %job.status, "job already finished");
            return Ok(job);
        }

        let span = start_job_span(job.id, job.round_id, &job.kind);
        let job_span = span.clone();
        async move {
            self.store
                .transition_job(job.id, JobStatus::Pending, JobStatus::Running)
                .await?;
            record_state_transition(&job_span, JobStatus::Pending, JobStatus::Running);

            let (status, outcome) = match self.execute(&job).await {
                Ok(report) => (JobStatus::Success, report.outcome()),
                Err(e) => {
                    error!(error = %e, "distribution job failed");
                    let mut outcome = JobOutcome::default();
                    outcome.failures.insert("error".to_string(), e.to_string());
                    (JobStatus::Failed, outcome)
                }
            };

            let finished = self.store.finish_job(job.id, status, &outcome).await?;
            record_state_transition(&job_span, JobStatus::Running, status);
            info!(
                success_count = finished.success_count,
                failed_count = finished.failed_count,
                "job finished"
            );
            Ok(finished)
        }
        .instrument(span)
        .await
    }

    /// Dispatch on the job kind with the round held in `Distributing`.
    async fn execute(&self, job: &DistributionJob) -> Result<DistributionReport> {
        let strategy = match &job.kind {
            JobKind::Distribute { reviewers } => Strategy::Distribute {
                reviewers: reviewers.as_slice(),
            },
            JobKind::Redistribute { source, target } => Strategy::Redistribute {
                source: source.as_slice(),
                target: target.as_slice(),
            },
            JobKind::Import => {
                return Err(Error::Other(
                    "unsupported job: import runs outside the distribution core".to_string(),
                ));
            }
        };

        let round = self
            .store
            .get_round(job.round_id)
            .await?
            .ok_or(Error::RoundNotFound(job.round_id))?;

        // A round left in Distributing by a crashed run goes back to Evaluating.
        let previous = match round.status {
            RoundStatus::Distributing => {
                warn!(round_id = %round.id, "round was left distributing, restoring to evaluating");
                RoundStatus::Evaluating
            }
            status => status,
        };
        self.store
            .set_round_status(round.id, RoundStatus::Distributing)
            .await?;

        let result = self.run_strategy(job.id, &round, strategy).await;

        let restored = self.store.set_round_status(round.id, previous).await;
        if let Err(ref e) = restored {
            error!(round_id = %round.id, error = %e, "failed to restore round status");
        }
        let report = result?;
        restored?;
        Ok(report)
    }

    async fn run_strategy(
        &self,
        job_id: JobId,
        round: &Round,
        strategy: Strategy<'_>,
    ) -> Result<DistributionReport> {
        let store = self.store.as_ref();
        let report = match strategy {
            Strategy::Distribute { reviewers } => {
                AssignmentDistributor::new(store, &self.config)
                    .distribute(round, job_id, reviewers)
                    .await?
            }
            Strategy::Redistribute { source, target } => {
                RedistributionEngine::new(store, &self.config)
                    .redistribute(round, job_id, source, target)
                    .await?
            }
        };
        refresh_statistics(store, round.id, Some(job_id)).await?;
        Ok(report)
    }
}
