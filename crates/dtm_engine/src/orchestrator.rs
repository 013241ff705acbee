use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use dtm_core::{JobId, JobRecord, JobRequest, JobStatus};
use dtm_logging::{dtm_debug, dtm_error, dtm_info, dtm_warn};
use tokio_util::io::ReaderStream;

use crate::channel::{ProgressChannel, Subscription};
use crate::fetch::ProgressSink;
use crate::merge::MergeStage;
use crate::persist::ensure_output_dir;
use crate::raster_tool::{GdalTool, RasterTool};
use crate::registry::{JobEntry, JobRegistry};
use crate::worker::{ArchiveWorker, TileWorker};
use crate::{EngineConfig, FetchError, ProgressEvent};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrchestratorError {
    #[error("job {0} not found or not complete")]
    NotFound(JobId),
    #[error("artifact for job {job} unavailable: {message}")]
    ArtifactUnavailable { job: JobId, message: String },
}

/// The finished raster of a completed job, ready to stream.
pub struct Artifact {
    pub file_name: String,
    pub size_bytes: u64,
    pub stream: ReaderStream<tokio::fs::File>,
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("file_name", &self.file_name)
            .field("size_bytes", &self.size_bytes)
            .finish_non_exhaustive()
    }
}

/// Runs jobs from `Pending` to `Complete` or `Failed`, one tokio task per job.
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: EngineConfig,
    registry: JobRegistry,
    worker: Arc<dyn TileWorker>,
    merge: MergeStage,
}

impl JobOrchestrator {
    /// Orchestrator downloading real archives and merging with the GDAL tools.
    pub fn new(config: EngineConfig) -> Result<Self, FetchError> {
        let worker = ArchiveWorker::new(config.fetch.clone(), config.archives_dir())?;
        let tool = GdalTool::new(config.gdal_bin_dir.clone());
        Ok(Self::with_components(config, Arc::new(worker), Arc::new(tool)))
    }

    pub fn with_components(
        config: EngineConfig,
        worker: Arc<dyn TileWorker>,
        tool: Arc<dyn RasterTool>,
    ) -> Self {
        let merge = MergeStage::new(tool).with_clip_srid(config.target_srid);
        Self {
            inner: Arc::new(Inner {
                config,
                registry: JobRegistry::new(),
                worker,
                merge,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Registers a job and returns its id without waiting for any work.
    pub async fn start(&self, request: JobRequest) -> JobId {
        let entry = self.register(request).await;
        let id = entry.record.read().await.id().clone();
        self.spawn(entry);
        id
    }

    /// Like [`JobOrchestrator::start`], with a subscription taken before the job runs.
    pub async fn start_watched(&self, request: JobRequest) -> (JobId, Subscription) {
        let entry = self.register(request).await;
        let id = entry.record.read().await.id().clone();
        let subscription = entry.channel.subscribe();
        self.spawn(entry);
        (id, subscription)
    }

    pub async fn subscribe(&self, id: &JobId) -> Result<Subscription, OrchestratorError> {
        let entry = self.entry(id).await?;
        Ok(entry.channel.subscribe())
    }

    pub async fn status(&self, id: &JobId) -> Option<JobStatus> {
        let entry = self.inner.registry.get(id).await?;
        let status = entry.record.read().await.status();
        Some(status)
    }

    pub async fn snapshot(&self, id: &JobId) -> Option<JobRecord> {
        let entry = self.inner.registry.get(id).await?;
        let record = entry.record.read().await.clone();
        Some(record)
    }

    /// Opens the output of a `Complete` job and removes the job from the registry.
    pub async fn retrieve_artifact(&self, id: &JobId) -> Result<Artifact, OrchestratorError> {
        let entry = self.entry(id).await?;
        let output = {
            let record = entry.record.read().await;
            match (record.status(), record.output_location()) {
                (JobStatus::Complete, Some(output)) => output.to_path_buf(),
                _ => return Err(OrchestratorError::NotFound(id.clone())),
            }
        };

        let unavailable = |err: std::io::Error| OrchestratorError::ArtifactUnavailable {
            job: id.clone(),
            message: format!("{}: {err}", output.display()),
        };
        let file = tokio::fs::File::open(&output).await.map_err(unavailable)?;
        let size_bytes = file.metadata().await.map_err(unavailable)?.len();
        let file_name = output
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.inner.registry.evict(id).await;
        dtm_info!("Job {} artifact retrieved ({} bytes)", id.short(), size_bytes);
        Ok(Artifact {
            file_name,
            size_bytes,
            stream: ReaderStream::new(file),
        })
    }

    pub async fn job_count(&self) -> usize {
        self.inner.registry.len().await
    }

    async fn entry(&self, id: &JobId) -> Result<Arc<JobEntry>, OrchestratorError> {
        self.inner
            .registry
            .get(id)
            .await
            .ok_or_else(|| OrchestratorError::NotFound(id.clone()))
    }

    async fn register(&self, request: JobRequest) -> Arc<JobEntry> {
        let config = &self.inner.config;
        let channel = ProgressChannel::new(config.channel_capacity, config.heartbeat_interval);
        let jobs_dir = config.jobs_dir();
        self.inner
            .registry
            .register(request, channel, |id| jobs_dir.join(id.as_str()))
            .await
    }

    fn spawn(&self, entry: Arc<JobEntry>) {
        let inner = self.inner.clone();
        tokio::spawn(run_job(inner, entry));
    }
}

pub fn output_file_name(id: &JobId) -> String {
    format!("dtm_output_{}.tif", id.short())
}

async fn run_job(inner: Arc<Inner>, entry: Arc<JobEntry>) {
    tokio::time::sleep(inner.config.start_delay).await;

    let outcome = inner.advance(&entry).await;
    let id = finish(&entry, outcome).await;

    let retention = inner.config.retention;
    let work_dir = entry.work_dir.clone();
    let weak = Arc::downgrade(&inner);
    drop(inner);
    drop(entry);

    tokio::time::sleep(retention).await;
    if let Some(inner) = weak.upgrade() {
        if inner.registry.evict(&id).await.is_some() {
            dtm_debug!("Job {} expired", id.short());
        }
    }
    match tokio::fs::remove_dir_all(&work_dir).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => dtm_warn!("Could not remove {}: {}", work_dir.display(), err),
    }
}

impl Inner {
    /// Fetches every tile in order, then merges. `Err` carries the failure reason.
    async fn advance(&self, entry: &Arc<JobEntry>) -> Result<PathBuf, String> {
        let (id, request) = {
            let mut record = entry.record.write().await;
            record.begin_fetching().map_err(|err| err.to_string())?;
            (record.id().clone(), record.request().clone())
        };
        dtm_info!("Job {} fetching {} tiles", id.short(), request.tiles.len());

        let sink: Arc<dyn ProgressSink> = Arc::new(entry.channel.clone());
        let extracts_dir = self.config.extracts_dir();
        let mut rasters = Vec::new();
        for (index, tile) in request.tiles.iter().enumerate() {
            dtm_info!(
                "Job {} tile {}/{}: {}",
                id.short(),
                index + 1,
                request.tiles.len(),
                tile.tile_name
            );
            let destination = extracts_dir.join(tile.cache_key());
            let produced = self
                .worker
                .run(tile, &destination, sink.clone())
                .await
                .map_err(|err| format!("{}: {err}", tile.tile_name))?;
            rasters.extend(produced);
        }

        entry
            .record
            .write()
            .await
            .begin_merging()
            .map_err(|err| err.to_string())?;
        dtm_info!("Job {} merging {} rasters", id.short(), rasters.len());

        ensure_output_dir(&entry.work_dir).map_err(|err| err.to_string())?;
        let output = entry.work_dir.join(output_file_name(&id));
        self.merge
            .run(
                &rasters,
                request.clip_bounds,
                request.compression,
                &output,
                &entry.channel,
            )
            .await
            .map_err(|err| err.to_string())?;
        Ok(output)
    }
}

/// Records the outcome and publishes the terminal event while holding the record lock,
/// so nobody observes `Complete` before `Completed` went out.
async fn finish(entry: &JobEntry, outcome: Result<PathBuf, String>) -> JobId {
    let mut record = entry.record.write().await;
    let id = record.id().clone();

    let failure = match outcome {
        Ok(output) => {
            let output_name = output
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            match record.complete(output) {
                Ok(()) => {
                    dtm_info!("Job {} complete: {}", id.short(), output_name);
                    entry
                        .channel
                        .publish(ProgressEvent::Completed { output_name });
                    return id;
                }
                Err(err) => err.to_string(),
            }
        }
        Err(reason) => reason,
    };

    dtm_error!("Job {} failed: {}", id.short(), failure);
    if let Err(err) = record.abort(failure.clone()) {
        dtm_error!("Job {}: {}", id.short(), err);
    }
    entry
        .channel
        .publish(ProgressEvent::Failed { reason: failure });
    id
}
