use metrics::{describe_gauge, gauge};

pub fn component_info_metric(name: &'static str) {
    static NAME: &str = "efish_pipeline_component_info";

    describe_gauge!(NAME, "Basic information about the component");

    gauge!(NAME, "component" => name, "git_version" => crate::version!()).set(1);
}

pub mod names {
    use const_format::concatcp;

    pub const METRIC_NAME_PREFIX: &str = "efish_pipeline_";

    pub const FAILURES: &str = concatcp!(METRIC_NAME_PREFIX, "failures");
    pub const FILES_READ: &str = concatcp!(METRIC_NAME_PREFIX, "files_read");
    pub const FILES_WRITTEN: &str = concatcp!(METRIC_NAME_PREFIX, "files_written");
    pub const SHOTS_DROPPED: &str = concatcp!(METRIC_NAME_PREFIX, "shots_dropped");
    pub const DISCHARGES_FOUND: &str = concatcp!(METRIC_NAME_PREFIX, "discharges_found");
    pub const CACHE_LOOKUPS: &str = concatcp!(METRIC_NAME_PREFIX, "cache_lookups");
}

pub mod failures {
    #[derive(Debug, Clone, Copy, Eq, Hash, PartialEq)]
    pub enum FailureKind {
        CacheFailed,
        FileWriteFailed,
        InvalidFileName,
        MalformedFile,
        UnreadableFile,
    }

    // Label building function
    pub fn get_label(failure_kind: FailureKind) -> (&'static str, &'static str) {
        (
            "failure_kind",
            match failure_kind {
                FailureKind::CacheFailed => "cache_failed",
                FailureKind::FileWriteFailed => "file_write_failed",
                FailureKind::InvalidFileName => "invalid_file_name",
                FailureKind::MalformedFile => "malformed_file",
                FailureKind::UnreadableFile => "unreadable_file",
            },
        )
    }
}

pub mod shots_dropped {
    use strum::{Display, IntoStaticStr};

    /// The pipeline stage at which a shot left the batch.
    #[derive(Debug, Clone, Copy, Eq, Hash, PartialEq, PartialOrd, Ord, Display, IntoStaticStr)]
    #[strum(serialize_all = "snake_case")]
    pub enum DropStage {
        Timing,
        Synthesis,
        Discharge,
    }

    // Label building function
    pub fn get_label(stage: DropStage) -> (&'static str, &'static str) {
        ("stage", stage.into())
    }
}

pub mod cache_lookups {
    #[derive(Debug, Clone, Copy, Eq, Hash, PartialEq)]
    pub enum LookupResult {
        Hit,
        Miss,
    }

    // Label building function
    pub fn get_label(result: LookupResult) -> (&'static str, &'static str) {
        (
            "result",
            match result {
                LookupResult::Hit => "hit",
                LookupResult::Miss => "miss",
            },
        )
    }
}
