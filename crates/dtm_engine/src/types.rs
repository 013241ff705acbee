use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TileStatus {
    Downloading,
    Resuming,
    AlreadyDownloaded,
    Completed,
    Extracting,
    AlreadyExtracted,
}

/// Download or extraction progress for one tile.
///
/// While extracting, `bytes_done`/`bytes_total` count archive members instead of bytes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileProgress {
    pub tile_name: String,
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub bytes_per_second: f64,
    pub eta_seconds: Option<u64>,
    pub status: TileStatus,
}

impl TileProgress {
    pub fn percent(&self) -> f64 {
        if self.bytes_total == 0 {
            0.0
        } else {
            self.bytes_done as f64 / self.bytes_total as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Merging,
    CreatingOutput,
    Completed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Merging => "merging",
            Stage::CreatingOutput => "creating_output",
            Stage::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageProgress {
    pub stage: Stage,
    pub percent: u8,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    TileProgress(TileProgress),
    StageProgress(StageProgress),
    Completed { output_name: String },
    Failed { reason: String },
}

impl ProgressEvent {
    pub(crate) fn stage(stage: Stage, percent: u8, message: impl Into<String>) -> Self {
        ProgressEvent::StageProgress(StageProgress {
            stage,
            percent,
            message: message.into(),
        })
    }

    /// `Completed` and `Failed` end a job's event stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Completed { .. } | ProgressEvent::Failed { .. }
        )
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFailure {
    NetworkFailure,
    WriteFailure,
    ArchiveCorrupt,
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchFailure::NetworkFailure => write!(f, "network failure"),
            FetchFailure::WriteFailure => write!(f, "write failure"),
            FetchFailure::ArchiveCorrupt => write!(f, "archive corrupt"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FetchFailure,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchFailure, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn network(message: impl Into<String>) -> Self {
        Self::new(FetchFailure::NetworkFailure, message)
    }

    pub(crate) fn write(message: impl Into<String>) -> Self {
        Self::new(FetchFailure::WriteFailure, message)
    }

    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        Self::new(FetchFailure::ArchiveCorrupt, message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("no input rasters to merge")]
    NoInputs,
    /// `diagnostic` is the tool's own error output, unmodified.
    #[error("{tool} failed: {diagnostic}")]
    ToolFailure { tool: String, diagnostic: String },
}
