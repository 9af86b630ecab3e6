//! Generic building blocks for reducing per-shot waveforms to timing events.
//!
//! A shot's rows are fed as `(time, value)` trace points through [Window]s, which smooth the
//! signal, and [Detector]s, which register at most one event per shot. Both are applied
//! through the iterator adapters in [iterators].
pub(crate) mod datatype;
pub(crate) mod detectors;
pub(crate) mod iterators;
pub(crate) mod window;

pub(crate) use datatype::{TimeValue, TracePoint};
pub(crate) use detectors::Detector;
pub(crate) use efish_common::Real;
pub(crate) use iterators::{Detect, WindowFilter};
pub(crate) use window::Window;
