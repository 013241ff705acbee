use std::path::{Path, PathBuf};
use std::sync::Arc;

use dtm_core::TileRecord;
use dtm_logging::{dtm_info, dtm_warn};

use crate::extract::{unpack_archive, verify_extraction};
use crate::fetch::{tile_event, ArchiveDownloader, ProgressSink};
use crate::{FetchError, FetchFailure, FetchSettings, TileStatus};

/// Fetches one tile and unpacks it, returning the raster files it produced.
#[async_trait::async_trait]
pub trait TileWorker: Send + Sync {
    async fn run(
        &self,
        tile: &TileRecord,
        destination_dir: &Path,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Vec<PathBuf>, FetchError>;
}

/// Downloads zip archives into a shared archive cache and extracts them.
#[derive(Debug, Clone)]
pub struct ArchiveWorker {
    downloader: ArchiveDownloader,
    archives_dir: PathBuf,
}

impl ArchiveWorker {
    pub fn new(settings: FetchSettings, archives_dir: PathBuf) -> Result<Self, FetchError> {
        Ok(Self {
            downloader: ArchiveDownloader::new(settings)?,
            archives_dir,
        })
    }

    pub fn archive_path(&self, tile: &TileRecord) -> PathBuf {
        self.archives_dir.join(format!("{}.zip", tile.cache_key()))
    }
}

#[async_trait::async_trait]
impl TileWorker for ArchiveWorker {
    async fn run(
        &self,
        tile: &TileRecord,
        destination_dir: &Path,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Vec<PathBuf>, FetchError> {
        if tile.source_url.trim().is_empty() {
            return Err(FetchError::network(format!(
                "tile {} has no source url",
                tile.tile_name
            )));
        }

        let archive_path = self.archive_path(tile);
        self.downloader
            .download(&tile.source_url, &archive_path, &tile.tile_name, sink.as_ref())
            .await?;

        let cached_archive = archive_path.clone();
        let destination = destination_dir.to_path_buf();
        let tile_name = tile.tile_name.clone();
        let extracted = tokio::task::spawn_blocking(move || {
            if let Some(rasters) = verify_extraction(&archive_path, &destination) {
                sink.emit(tile_event(
                    &tile_name,
                    1,
                    1,
                    0.0,
                    None,
                    TileStatus::AlreadyExtracted,
                ));
                return Ok(rasters);
            }
            unpack_archive(&archive_path, &destination, &tile_name, sink.as_ref())
        })
        .await
        .map_err(|err| FetchError::write(format!("extraction task failed: {err}")))?;

        // Corrupt archives leave the cache so a later job downloads them again.
        let rasters = match extracted {
            Err(err) if err.kind == FetchFailure::ArchiveCorrupt => {
                dtm_warn!(
                    "Removing corrupt archive {} for {}: {}",
                    cached_archive.display(),
                    tile.tile_name,
                    err.message
                );
                if let Err(remove_err) = tokio::fs::remove_file(&cached_archive).await {
                    dtm_warn!(
                        "Cannot remove {}: {}",
                        cached_archive.display(),
                        remove_err
                    );
                }
                return Err(err);
            }
            other => other?,
        };

        dtm_info!("{} ready with {} rasters", tile.tile_name, rasters.len());
        Ok(rasters)
    }
}
