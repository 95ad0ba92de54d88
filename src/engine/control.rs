//! Service entry points: accept a job, persist it, run it in the background.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info};

use super::runner::TaskRunner;
use crate::config::DistributionConfig;
use crate::error::{Error, Result};
use crate::model::*;
use crate::store::Store;

/// A started job. The ID is available immediately; awaiting is optional.
pub struct JobHandle {
    pub job_id: JobId,
    task: JoinHandle<Result<DistributionJob>>,
}

impl JobHandle {
    /// Wait for the job to reach a terminal status.
    pub async fn wait(self) -> Result<DistributionJob> {
        self.task
            .await
            .map_err(|e| Error::Other(format!("distribution task panicked: {e}")))?
    }
}

/// Starts distribution jobs against one primary store.
#[derive(Clone)]
pub struct DistributionService {
    store: Arc<dyn Store>,
    runner: TaskRunner,
}

impl DistributionService {
    pub fn new(store: Arc<dyn Store>, config: DistributionConfig) -> Self {
        let runner = TaskRunner::new(Arc::clone(&store), Arc::new(config));
        Self { store, runner }
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    /// Distribute a round's work over `reviewers`, or over every active
    /// reviewer when the list is empty.
    pub async fn start_distribution(
        &self,
        round_id: RoundId,
        reviewers: Vec<ReviewerId>,
    ) -> Result<JobHandle> {
        self.submit(DistributionJob::new(round_id, JobKind::Distribute { reviewers }))
            .await
    }

    /// Swap unevaluated work from `source` reviewers to `target` reviewers.
    pub async fn start_redistribution(
        &self,
        round_id: RoundId,
        source: Vec<ReviewerId>,
        target: Vec<ReviewerId>,
    ) -> Result<JobHandle> {
        self.submit(DistributionJob::new(
            round_id,
            JobKind::Redistribute { source, target },
        ))
        .await
    }

    /// Persist a caller-built job and start running it.
    pub async fn submit(&self, job: DistributionJob) -> Result<JobHandle> {
        if self.store.get_round(job.round_id).await?.is_none() {
            return Err(Error::RoundNotFound(job.round_id));
        }
        let job = self.store.create_job(&job).await?;
        info!(job_id = %job.id, round_id = %job.round_id, kind = job.kind.name(), "job submitted");

        let runner = self.runner.clone();
        let job_id = job.id;
        let task = tokio::spawn(async move {
            let result = runner.run(job_id).await;
            if let Err(ref e) = result {
                error!(job_id = %job_id, error = %e, "job runner error");
            }
            result
        });
        Ok(JobHandle { job_id, task })
    }
}
