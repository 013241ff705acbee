use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dtm_engine::{default_cache_root, EngineConfig};
use dtm_logging::{dtm_info, dtm_warn};
use serde::{Deserialize, Serialize};

/// Default settings file, looked up in the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "dtm_settings.ron";

/// Optional overrides read from a RON file; every field falls back to the engine default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub cache_dir: Option<PathBuf>,
    pub gdal_bin_dir: Option<PathBuf>,
    pub catalog_url: Option<String>,
    pub log_file: Option<PathBuf>,
    pub compression: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
    pub heartbeat_secs: Option<u64>,
}

impl AppSettings {
    pub fn engine_config(&self) -> EngineConfig {
        let cache_root = self.cache_dir.clone().unwrap_or_else(default_cache_root);
        let mut config = EngineConfig::default_with_cache_root(cache_root);
        config.gdal_bin_dir = self.gdal_bin_dir.clone();
        if let Some(secs) = self.connect_timeout_secs {
            config.fetch.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.read_timeout_secs {
            config.fetch.read_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.heartbeat_secs.filter(|secs| *secs > 0) {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        config
    }
}

/// Reads settings from `path`. A missing file gives defaults; an unreadable or
/// malformed one is logged and also gives defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return AppSettings::default();
        }
        Err(err) => {
            dtm_warn!("Failed to read settings from {:?}: {}", path, err);
            return AppSettings::default();
        }
    };

    match ron::from_str(&content) {
        Ok(settings) => {
            dtm_info!("Loaded settings from {:?}", path);
            settings
        }
        Err(err) => {
            dtm_warn!("Failed to parse settings from {:?}: {}", path, err);
            AppSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            load_settings(&dir.path().join("absent.ron")),
            AppSettings::default()
        );
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_SETTINGS_FILE);
        fs::write(
            &path,
            r#"(cache_dir: Some("/srv/dtm-cache"), heartbeat_secs: Some(5))"#,
        )
        .unwrap();

        let settings = load_settings(&path);
        assert_eq!(settings.cache_dir, Some(PathBuf::from("/srv/dtm-cache")));

        let config = settings.engine_config();
        assert_eq!(config.cache_root, PathBuf::from("/srv/dtm-cache"));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.retention, Duration::from_secs(3600));
    }

    #[test]
    fn malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ron");
        fs::write(&path, "(cache_dir: [").unwrap();
        assert_eq!(load_settings(&path), AppSettings::default());
    }
}
