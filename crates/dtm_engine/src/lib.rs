//! DTM engine: catalog queries, tile download and extraction, raster merging and job orchestration.
mod catalog;
mod channel;
mod config;
mod extract;
mod fetch;
mod merge;
mod orchestrator;
mod persist;
mod raster_tool;
mod registry;
mod types;
mod worker;

pub use catalog::{
    extract_download_url, CatalogClient, CatalogError, CatalogSummary, DEFAULT_CATALOG_URL,
    MAX_PAGE_SIZE,
};
pub use channel::{Delivery, ProgressChannel, Subscription};
pub use config::{default_cache_root, EngineConfig, FetchSettings, CACHE_DIR_ENV};
pub use extract::{is_raster_path, unpack_archive, verify_extraction};
pub use fetch::{ArchiveDownloader, ProgressSink};
pub use merge::MergeStage;
pub use orchestrator::{output_file_name, Artifact, JobOrchestrator, OrchestratorError};
pub use persist::ensure_output_dir;
pub use raster_tool::{
    intermediate_path, is_float_raster_type, parse_band_data_type, GdalTool, RasterCommand,
    RasterTool, ToolOutput,
};
pub use registry::{JobEntry, JobRegistry};
pub use types::{
    FetchError, FetchFailure, MergeError, ProgressEvent, Stage, StageProgress, TileProgress,
    TileStatus,
};
pub use worker::{ArchiveWorker, TileWorker};
