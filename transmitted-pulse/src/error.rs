use crate::{cache::CacheError, solver::SolverError};
use efish_common::ShotId;
use efish_waveform_reader::LoadError;
use thiserror::Error;

/// Violations of the structural preconditions of a processing stage.
///
/// These indicate problems with the integrity of the upstream data and abort the batch.
#[derive(Debug, Error)]
pub(crate) enum ProcessingError {
    #[error("{operation}: the input series contains no shots")]
    EmptySeries { operation: &'static str },
    #[error("{operation}: shot {shot} has {observed} rows, at least {expected} are required")]
    ShotTooShort {
        shot: ShotId,
        operation: &'static str,
        observed: usize,
        expected: usize,
    },
    #[error("{operation}: {reason}")]
    InvalidParameter {
        operation: &'static str,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub(crate) enum PipelineError {
    #[error("Load error: {0}")]
    Load(#[from] LoadError),
    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),
    #[error("Processing was cancelled")]
    Cancelled,
}
