//! Failure classification, retry and state rollback.
//!
//! This module handles:
//! - Classifying raw failure text into error kinds
//! - Retry decisions with capped exponential backoff
//! - Recovery points (full-state snapshots) and restore
//! - Artifact verification for manual continuation

mod backoff;
mod checkpoint;
mod classifier;
mod error_log;
mod scheduler;
mod verify;

pub use backoff::backoff_delay;
pub use checkpoint::{RecoveryPoint, RecoveryPointManager, RecoveryPointSummary};
pub use classifier::{ErrorKind, classify, classify_exit};
pub use error_log::{ErrorLog, ErrorLogEntry};
pub use scheduler::{
    RefusalReason, RetryCandidate, RetryOutcome, RetryRecord, RetryScheduler, RetryStats, evaluate_retry,
};
pub use verify::{ArtifactReport, verify_artifacts};
