//! Metric instruments, created lazily from the global `MeterProvider`.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter(super::SERVICE_NAME)
}

/// Counter: assignment rows created by quorum top-up.
pub fn assignments_created() -> Counter<u64> {
    meter()
        .u64_counter("jury.assignments.created")
        .with_description("Assignment rows created to reach quorum")
        .build()
}

/// Counter: assignments given a reviewer.
/// Labels: `mode` ("bulk" | "quota" | "fallback" | "swap").
pub fn assignments_assigned() -> Counter<u64> {
    meter()
        .u64_counter("jury.assignments.assigned")
        .with_description("Assignments given a reviewer")
        .build()
}

/// Counter: assignments left without an eligible reviewer.
pub fn coverage_gaps() -> Counter<u64> {
    meter()
        .u64_counter("jury.assignments.coverage_gaps")
        .with_description("Assignments left unassigned after a run")
        .build()
}

/// Counter: distribution job state transitions.
/// Labels: `from`, `to`.
pub fn job_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("jury.job.state_transitions")
        .with_description("Number of distribution job state transitions")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("jury.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
