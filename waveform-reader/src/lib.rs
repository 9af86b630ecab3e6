//! # Waveform Reader
//!
//! Reads oscilloscope waveform exports into per-shot channel series.
//! * Discovers the files recorded on a given channel in a directory.
//! * Parses each file in parallel, skipping (and reporting) any which are unreadable.
//! * Merges every file into a single [ChannelSeries](efish_common::ChannelSeries) sorted by shot and time.
mod error;
mod file_name;
mod loader;

pub use error::LoadError;
pub use file_name::{is_background_file, matches_channel, parse_shot_id};
pub use loader::{
    ChannelLoad, LoadReport, LoaderOptions, SkippedFile, channel_files, load_background,
    load_channel, read_waveform_file,
};
