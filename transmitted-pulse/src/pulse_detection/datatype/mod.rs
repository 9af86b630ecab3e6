//! Provides abstractions for the data types flowing through windows and detectors.
mod samples;
mod timevalue;
mod tracepoint;

pub(crate) use samples::{AveragedSample, TransmittedSample};
pub(crate) use timevalue::TimeValue;
pub(crate) use tracepoint::TracePoint;
