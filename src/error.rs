//! Error types for jury-balance.

use thiserror::Error;

use crate::model::{JobId, RoundId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("round not found: {0}")]
    RoundNotFound(RoundId),

    #[error("distribution job not found: {0}")]
    JobNotFound(JobId),

    #[error("round {round_id} has no eligible reviewers")]
    InsufficientReviewers { round_id: RoundId },

    #[error("round {round_id} has no eligible assignments to redistribute")]
    NoEligibleWork { round_id: RoundId },

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
