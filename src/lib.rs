//! # jury-balance
//!
//! Distributes review assignments of a contest round over a jury so every
//! submission reaches its quorum and every juror gets a near-equal share,
//! never their own submission and never the same one twice.
//!
//! Jobs run in the background against a primary store (Postgres or in
//! memory); bulk work happens in a per-job SQLite staging store.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod staging;
pub mod store;
pub mod telemetry;
