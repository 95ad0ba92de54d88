//! Distribution engine: quotas, assignment strategies, statistics and the
//! job runner that ties them together.

pub mod control;
pub mod distributor;
pub mod quota;
pub mod redistribute;
pub mod runner;
pub mod statistics;
pub mod workload;

pub use control::{DistributionService, JobHandle};
pub use distributor::{AssignmentDistributor, DistributionReport};
pub use quota::compute_quotas;
pub use redistribute::RedistributionEngine;
pub use runner::TaskRunner;
pub use statistics::refresh_statistics;
pub use workload::WorkloadQueue;
