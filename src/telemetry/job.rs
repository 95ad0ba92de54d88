//! Span helpers for distribution jobs.

use tracing::Span;

use crate::model::{JobId, JobKind, JobStatus, RoundId};

/// Span covering one job run. `job.status` is filled in as the job moves.
pub fn start_job_span(job_id: JobId, round_id: RoundId, kind: &JobKind) -> Span {
    tracing::info_span!(
        "distribution.job",
        "job.id" = %job_id,
        "job.kind" = kind.name(),
        "round.id" = %round_id,
        "job.status" = tracing::field::Empty,
    )
}

/// Record a status change on the job span.
pub fn record_state_transition(span: &Span, from: JobStatus, to: JobStatus) {
    span.record("job.status", tracing::field::display(to));
    span.in_scope(|| {
        tracing::info!(from = %from, to = %to, "state_transition");
    });
}
