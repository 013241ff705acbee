//! DTM core: pure tile data model, version resolution and the job state machine.
mod geometry;
mod job;
mod resolver;
mod tile;
mod year;

pub use geometry::{BoundingBox, ClipBounds, Footprint, WEB_MERCATOR};
pub use job::{Compression, JobId, JobRecord, JobRequest, JobStatus, TransitionError};
pub use resolver::{
    build_options, default_key, fallback_key, group_key, option_key, resolve, vintage_token,
    CoverageMode, ParseCoverageModeError, VersionOption, UNSPECIFIED_VINTAGE,
};
pub use tile::TileRecord;
pub use year::{extract_latest_year, extract_year_range, strip_year_fragments};
