//! Conventions of the oscilloscope's file naming scheme.
//!
//! Files are named `{channel}--{description}--{shot}.{extension}`, for instance
//! `C1--20240516_Air150mbar_45kV--00042.txt`. Background reference files carry `BG` in their name.
use efish_common::ShotId;

/// Parses the shot id from the text between the last `--` and the first following `.`.
pub fn parse_shot_id(file_name: &str) -> Option<ShotId> {
    file_name
        .rsplit("--")
        .next()?
        .split('.')
        .next()?
        .trim()
        .parse()
        .ok()
}

/// Returns true if the text before the first `-` of the file name is exactly `channel`.
pub fn matches_channel(file_name: &str, channel: &str) -> bool {
    file_name.split('-').next() == Some(channel)
}

pub fn is_background_file(file_name: &str) -> bool {
    file_name.contains("BG")
}
