//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The database URL is wrapped in `secrecy::SecretString` so it
//! never reaches the logs.

use std::path::PathBuf;

use crate::error::{Error, Result};
use secrecy::SecretString;

const DEFAULT_STAGING_BATCH_SIZE: usize = 1000;
const DEFAULT_PRIMARY_BATCH_SIZE: usize = 500;
const DEFAULT_MAX_BATCH_COUNT: usize = 4;
const DEFAULT_MIN_BATCH_SIZE: usize = 100;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub distribution: DistributionConfig,
}

/// How bulk mode walks the open work items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One worker, items in ID order.
    Sequential,
    /// Items split into at most `max_batch_count` batches of at least
    /// `min_batch_size`, processed by concurrent workers.
    Batched {
        max_batch_count: usize,
        min_batch_size: usize,
    },
}

impl ExecutionMode {
    /// Split `len` items into contiguous batch ranges.
    pub fn batch_ranges(&self, len: usize) -> Vec<std::ops::Range<usize>> {
        if len == 0 {
            return Vec::new();
        }
        let (count, size) = match *self {
            ExecutionMode::Sequential => (1, len),
            ExecutionMode::Batched {
                max_batch_count,
                min_batch_size,
            } => {
                let min_batch_size = min_batch_size.max(1);
                let count = (len / min_batch_size).clamp(1, max_batch_count.max(1));
                (count, len.div_ceil(count))
            }
        };
        (0..count)
            .map(|i| (i * size).min(len)..((i + 1) * size).min(len))
            .filter(|r| !r.is_empty())
            .collect()
    }
}

/// Staging database location and batch size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingConfig {
    /// Directory for per-job database files. `None` keeps staging in memory.
    pub dir: Option<PathBuf>,
    pub batch_size: usize,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            batch_size: DEFAULT_STAGING_BATCH_SIZE,
        }
    }
}

/// Tunables for distribution runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionConfig {
    pub mode: ExecutionMode,
    pub staging: StagingConfig,
    /// Rows per primary store write.
    pub primary_batch_size: usize,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            staging: StagingConfig::default(),
            primary_batch_size: DEFAULT_PRIMARY_BATCH_SIZE,
        }
    }
}

impl DistributionConfig {
    /// Read the distribution tunables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mode = match lookup("DISTRIBUTION_MODE").as_deref() {
            None | Some("sequential") => ExecutionMode::Sequential,
            Some("batched") => ExecutionMode::Batched {
                max_batch_count: parse_var(
                    &lookup,
                    "DISTRIBUTION_MAX_BATCH_COUNT",
                    DEFAULT_MAX_BATCH_COUNT,
                )?,
                min_batch_size: parse_var(
                    &lookup,
                    "DISTRIBUTION_MIN_BATCH_SIZE",
                    DEFAULT_MIN_BATCH_SIZE,
                )?,
            },
            Some(other) => {
                return Err(Error::Config(format!(
                    "DISTRIBUTION_MODE must be sequential or batched, got {other:?}"
                )));
            }
        };

        Ok(Self {
            mode,
            staging: StagingConfig {
                dir: lookup("STAGING_DIR").filter(|d| !d.is_empty()).map(PathBuf::from),
                batch_size: parse_var(&lookup, "STAGING_BATCH_SIZE", DEFAULT_STAGING_BATCH_SIZE)?,
            },
            primary_batch_size: parse_var(
                &lookup,
                "PRIMARY_BATCH_SIZE",
                DEFAULT_PRIMARY_BATCH_SIZE,
            )?,
        })
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("DATABASE_URL").ok_or_else(|| {
            Error::Config("required environment variable DATABASE_URL is not set".to_string())
        })?;

        Ok(Self {
            database_url: SecretString::from(database_url),
            otel_endpoint: lookup("OTEL_ENDPOINT"),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            distribution: DistributionConfig::from_lookup(&lookup)?,
        })
    }
}

/// Parse a positive integer variable, falling back to `default` when unset.
fn parse_var(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: usize) -> Result<usize> {
    match lookup(name) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<usize>() {
            Ok(0) | Err(_) => Err(Error::Config(format!(
                "{name} must be a positive integer, got {raw:?}"
            ))),
            Ok(value) => Ok(value),
        },
    }
}
