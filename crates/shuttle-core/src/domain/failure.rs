//! Failure reason taxonomy (observability only).

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    DownloadFailure,
    UploadFailure,
    ModuleFailure,
    CpuOveruse,
    GpuOveruse,
    MemoryOveruse,
    DiskOveruse,
    TimeOveruse,
    Sigterm,
    Killed,
    Other,
}

/// First matching marker wins.
const MARKERS: &[(&str, FailureReason)] = &[
    ("Exception: failed to download", FailureReason::DownloadFailure),
    ("Exception: failed to upload", FailureReason::UploadFailure),
    ("Exception: module failed", FailureReason::ModuleFailure),
    ("Resource overusage for cpu", FailureReason::CpuOveruse),
    ("Resource overusage for gpu", FailureReason::GpuOveruse),
    ("Resource overusage for memory", FailureReason::MemoryOveruse),
    ("Resource overusage for disk", FailureReason::DiskOveruse),
    ("Resource overusage for time", FailureReason::TimeOveruse),
    ("pilot SIGTERM", FailureReason::Sigterm),
    ("killed", FailureReason::Killed),
];

impl FailureReason {
    /// Classify free-form reason text reported by a worker.
    pub fn classify(text: &str) -> Self {
        MARKERS
            .iter()
            .find(|(marker, _)| text.contains(marker))
            .map(|&(_, reason)| reason)
            .unwrap_or(FailureReason::Other)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::DownloadFailure => "download_failure",
            FailureReason::UploadFailure => "upload_failure",
            FailureReason::ModuleFailure => "module_failure",
            FailureReason::CpuOveruse => "cpu_overuse",
            FailureReason::GpuOveruse => "gpu_overuse",
            FailureReason::MemoryOveruse => "memory_overuse",
            FailureReason::DiskOveruse => "disk_overuse",
            FailureReason::TimeOveruse => "time_overuse",
            FailureReason::Sigterm => "sigterm",
            FailureReason::Killed => "killed",
            FailureReason::Other => "other",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
