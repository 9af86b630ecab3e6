//! Provides adapters to convert per-shot trace data into smoothed traces and events.
mod event;
mod window;

use super::{Detector, TracePoint, Window};
pub(crate) use event::Detect;
pub(crate) use window::WindowFilter;
