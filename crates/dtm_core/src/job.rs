use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{ClipBounds, TileRecord};

/// Opaque job token: 128 random bits rendered as 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(format!("{:032x}", rand::random::<u128>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, used in output file names.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(idx, _)| idx)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Fetching,
    Merging,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    /// Forward-only transitions; `Failed` is reachable from `Fetching` and `Merging`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Fetching)
                | (JobStatus::Fetching, JobStatus::Merging)
                | (JobStatus::Fetching, JobStatus::Failed)
                | (JobStatus::Merging, JobStatus::Complete)
                | (JobStatus::Merging, JobStatus::Failed)
        )
    }
}

/// Output compression; unknown keywords map to the default codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    Zstd,
    Lzma,
    #[default]
    Deflate,
    Lzw,
}

impl Compression {
    pub fn from_keyword(keyword: &str) -> Self {
        match keyword.trim().to_lowercase().as_str() {
            "zstd" => Compression::Zstd,
            "lzma" => Compression::Lzma,
            "lzw" => Compression::Lzw,
            _ => Compression::Deflate,
        }
    }

    /// Codec identifier understood by the raster tool.
    pub fn codec(self) -> &'static str {
        match self {
            Compression::Zstd => "ZSTD",
            Compression::Lzma => "LZMA",
            Compression::Deflate => "DEFLATE",
            Compression::Lzw => "LZW",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Download order.
    pub tiles: Vec<TileRecord>,
    pub clip_bounds: Option<ClipBounds>,
    pub compression: Compression,
}

impl JobRequest {
    pub fn new(tiles: Vec<TileRecord>) -> Self {
        Self {
            tiles,
            clip_bounds: None,
            compression: Compression::default(),
        }
    }

    pub fn with_clip_bounds(mut self, clip_bounds: ClipBounds) -> Self {
        self.clip_bounds = Some(clip_bounds);
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal job transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// State of one job. `output_location` is set exactly when the status is `Complete`.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    id: JobId,
    request: JobRequest,
    status: JobStatus,
    history: Vec<JobStatus>,
    output_location: Option<PathBuf>,
    failure: Option<String>,
}

impl JobRecord {
    pub fn new(id: JobId, request: JobRequest) -> Self {
        Self {
            id,
            request,
            status: JobStatus::Pending,
            history: vec![JobStatus::Pending],
            output_location: None,
            failure: None,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn request(&self) -> &JobRequest {
        &self.request
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Every status the job has held, oldest first.
    pub fn history(&self) -> &[JobStatus] {
        &self.history
    }

    pub fn output_location(&self) -> Option<&Path> {
        self.output_location.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn begin_fetching(&mut self) -> Result<(), TransitionError> {
        self.transition(JobStatus::Fetching)
    }

    pub fn begin_merging(&mut self) -> Result<(), TransitionError> {
        self.transition(JobStatus::Merging)
    }

    pub fn complete(&mut self, output_location: PathBuf) -> Result<(), TransitionError> {
        self.transition(JobStatus::Complete)?;
        self.output_location = Some(output_location);
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Failed)?;
        self.failure = Some(reason.into());
        Ok(())
    }

    /// Fails the job from any non-terminal status. A pending job passes through `Fetching`.
    pub fn abort(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        if self.status == JobStatus::Pending {
            self.begin_fetching()?;
        }
        self.fail(reason)
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.history.push(next);
        Ok(())
    }
}
