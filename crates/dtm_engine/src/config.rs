use std::path::PathBuf;
use std::time::Duration;

use dtm_core::WEB_MERCATOR;

/// Environment variable overriding the cache root.
pub const CACHE_DIR_ENV: &str = "DTM_CACHE_DIR";

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    /// Longest silence allowed between body chunks; archives are large so there is no total timeout.
    pub read_timeout: Duration,
    pub user_agent: String,
    /// Minimum wall time between download progress events.
    pub progress_interval: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
            user_agent: format!("dtm-download/{}", env!("CARGO_PKG_VERSION")),
            progress_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root for cached archives, extracted rasters and per-job output.
    pub cache_root: PathBuf,
    pub fetch: FetchSettings,
    pub heartbeat_interval: Duration,
    /// How long a finished job stays addressable before eviction.
    pub retention: Duration,
    /// Pause before a job starts working so subscribers can attach.
    pub start_delay: Duration,
    pub channel_capacity: usize,
    /// Directory holding the raster tool binaries; `None` searches `PATH`.
    pub gdal_bin_dir: Option<PathBuf>,
    /// Spatial reference of clip bounds.
    pub target_srid: u32,
}

impl EngineConfig {
    pub fn default_with_cache_root(cache_root: PathBuf) -> Self {
        Self {
            cache_root,
            fetch: FetchSettings::default(),
            heartbeat_interval: Duration::from_secs(15),
            retention: Duration::from_secs(60 * 60),
            start_delay: Duration::from_millis(500),
            channel_capacity: 64,
            gdal_bin_dir: None,
            target_srid: WEB_MERCATOR,
        }
    }

    /// Defaults rooted at `$DTM_CACHE_DIR` or the platform cache directory.
    pub fn from_env() -> Self {
        Self::default_with_cache_root(default_cache_root())
    }

    pub fn archives_dir(&self) -> PathBuf {
        self.cache_root.join("archives")
    }

    pub fn extracts_dir(&self) -> PathBuf {
        self.cache_root.join("extracts")
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.cache_root.join("jobs")
    }
}

pub fn default_cache_root() -> PathBuf {
    cache_root_from(std::env::var(CACHE_DIR_ENV).ok().as_deref(), dirs::cache_dir())
}

fn cache_root_from(override_dir: Option<&str>, platform_cache: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = override_dir.map(str::trim).filter(|dir| !dir.is_empty()) {
        return PathBuf::from(dir);
    }
    match platform_cache {
        Some(dir) => dir.join("dtm-download"),
        None => std::env::temp_dir().join("dtm-download-cache"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins_when_not_blank() {
        assert_eq!(
            cache_root_from(Some(" /tmp/dtm-cache-override "), Some(PathBuf::from("/c"))),
            PathBuf::from("/tmp/dtm-cache-override")
        );
        assert_eq!(
            cache_root_from(Some("  "), Some(PathBuf::from("/c"))),
            PathBuf::from("/c/dtm-download")
        );
    }

    #[test]
    fn temp_dir_is_last_resort() {
        assert_eq!(
            cache_root_from(None, None),
            std::env::temp_dir().join("dtm-download-cache")
        );
    }

    #[test]
    fn cache_layout_hangs_off_root() {
        let config = EngineConfig::default_with_cache_root(PathBuf::from("/data"));
        assert_eq!(config.archives_dir(), PathBuf::from("/data/archives"));
        assert_eq!(config.extracts_dir(), PathBuf::from("/data/extracts"));
        assert_eq!(config.jobs_dir(), PathBuf::from("/data/jobs"));
        assert_eq!(config.fetch.progress_interval, Duration::from_millis(100));
    }
}
