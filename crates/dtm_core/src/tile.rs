use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::Footprint;

/// One downloadable terrain tile as reported by the catalog. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    pub dataset_name: String,
    pub tile_name: String,
    /// Free-text vintage such as `"2016-18"`; `None` when the catalog has no year.
    pub vintage_hint: Option<String>,
    pub footprint: Footprint,
    pub size_bytes: u64,
    pub source_url: String,
    pub resolution_m: f64,
    pub coverage_km2: f64,
}

impl TileRecord {
    pub fn new(dataset_name: impl Into<String>, tile_name: impl Into<String>) -> Self {
        Self {
            dataset_name: dataset_name.into(),
            tile_name: tile_name.into(),
            vintage_hint: None,
            footprint: Footprint::default(),
            size_bytes: 0,
            source_url: String::new(),
            resolution_m: 0.0,
            coverage_km2: 0.0,
        }
    }

    pub fn with_vintage_hint(mut self, hint: impl Into<String>) -> Self {
        self.vintage_hint = Some(hint.into());
        self
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = url.into();
        self
    }

    pub fn with_size_bytes(mut self, size_bytes: u64) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    /// Stable identity used for de-duplication: the source URL, or dataset + tile name.
    pub fn identity(&self) -> String {
        if self.source_url.trim().is_empty() {
            format!("{}::{}", self.dataset_name, self.tile_name)
        } else {
            self.source_url.clone()
        }
    }

    /// Filesystem-safe cache key: `{sanitized tile name}_{hash(source url)}`.
    pub fn cache_key(&self) -> String {
        format!(
            "{}_{}",
            sanitize_for_path(&self.tile_name),
            short_hash(&self.identity())
        )
    }
}

fn sanitize_for_path(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "tile".to_string()
    } else {
        cleaned
    }
}

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        use std::fmt::Write;
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_prefers_source_url() {
        let tile = TileRecord::new("GTA 2023", "Tile A").with_source_url("https://x/a.zip");
        assert_eq!(tile.identity(), "https://x/a.zip");

        let bare = TileRecord::new("GTA 2023", "Tile A");
        assert_eq!(bare.identity(), "GTA 2023::Tile A");
    }

    #[test]
    fn identity_separates_dataset_from_tile() {
        let left = TileRecord::new("AB", "C");
        let right = TileRecord::new("A", "BC");
        assert_ne!(left.identity(), right.identity());
        assert_ne!(left.cache_key(), right.cache_key());
    }

    #[test]
    fn cache_key_changes_with_url_and_is_stable() {
        let a = TileRecord::new("GTA", "GTA / A").with_source_url("https://example.com/a.zip");
        let b = TileRecord::new("GTA", "GTA / A").with_source_url("https://example.com/b.zip");
        assert_ne!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), a.clone().cache_key());
        assert!(a.cache_key().starts_with("GTA___A_"));
        assert_eq!(a.cache_key().len(), "GTA___A_".len() + 16);
    }
}
