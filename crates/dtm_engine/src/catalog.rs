use std::collections::BTreeSet;

use dtm_core::{extract_year_range, BoundingBox, Footprint, TileRecord};
use dtm_logging::{dtm_debug, dtm_info, dtm_warn};
use serde::Deserialize;

use crate::FetchSettings;

/// Feature server holding the Ontario lidar-derived DTM package index.
pub const DEFAULT_CATALOG_URL: &str = "https://services1.arcgis.com/TJH5KDher0W13Kgo/arcgis/rest/services/Ontario_Digital_Terrain_Model_Lidar_Derived_WFL1/FeatureServer/0";

/// Largest page the service returns.
pub const MAX_PAGE_SIZE: usize = 2000;

const OUT_FIELDS: &str = "Package,Size_GB,Resolution,DownloadLink,Project,Shape__Area";
const BYTES_PER_GB: f64 = 1_000_000_000.0;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    Request(String),
    #[error("catalog returned http status {0}")]
    Status(u16),
    #[error("catalog response malformed: {0}")]
    Parse(String),
    #[error("catalog service error {code}: {message}")]
    Service { code: i64, message: String },
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    features: Vec<Feature>,
    #[serde(default, rename = "exceededTransferLimit", alias = "exceeded_transfer_limit")]
    exceeded_transfer_limit: bool,
    error: Option<ServiceError>,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Feature {
    attributes: Attributes,
    geometry: Option<PolygonGeometry>,
}

#[derive(Debug, Default, Deserialize)]
struct Attributes {
    #[serde(rename = "Package")]
    package: Option<String>,
    #[serde(rename = "Size_GB")]
    size_gb: Option<f64>,
    #[serde(rename = "Resolution")]
    resolution: Option<f64>,
    #[serde(rename = "DownloadLink")]
    download_link: Option<String>,
    #[serde(rename = "Project")]
    project: Option<String>,
    #[serde(rename = "Shape__Area")]
    shape_area: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PolygonGeometry {
    rings: Vec<Vec<Vec<f64>>>,
}

/// Queries the tile catalog for tiles intersecting an extent.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    client: reqwest::Client,
    base_url: String,
    page_size: usize,
}

impl CatalogClient {
    pub fn new(settings: &FetchSettings) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.read_timeout)
            .build()
            .map_err(|err| CatalogError::Request(err.to_string()))?;
        Ok(Self {
            client,
            base_url: DEFAULT_CATALOG_URL.to_string(),
            page_size: MAX_PAGE_SIZE,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// All tiles whose footprint intersects `bbox`, across every result page.
    pub async fn query_by_extent(&self, bbox: &BoundingBox) -> Result<Vec<TileRecord>, CatalogError> {
        let mut tiles = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.query_page(bbox, offset).await?;
            let raw_count = page.features.len();
            let more = raw_count > 0 && (raw_count >= self.page_size || page.exceeded_transfer_limit);
            tiles.extend(page.features.into_iter().filter_map(feature_to_tile));
            if !more {
                break;
            }
            offset += raw_count;
        }
        dtm_info!("Catalog returned {} tiles", tiles.len());
        Ok(tiles)
    }

    async fn query_page(&self, bbox: &BoundingBox, offset: usize) -> Result<QueryResponse, CatalogError> {
        let geometry = bbox.to_esri_envelope();
        let srid = bbox.srid.to_string();
        let offset_text = offset.to_string();
        let page_size = self.page_size.to_string();
        let params = [
            ("f", "json"),
            ("where", "1=1"),
            ("outFields", OUT_FIELDS),
            ("geometryType", "esriGeometryEnvelope"),
            ("geometry", geometry.as_str()),
            ("spatialRel", "esriSpatialRelIntersects"),
            ("inSR", srid.as_str()),
            ("outSR", srid.as_str()),
            ("returnGeometry", "true"),
            ("resultOffset", offset_text.as_str()),
            ("resultRecordCount", page_size.as_str()),
        ];

        let url = format!("{}/query", self.base_url);
        let response = self
            .client
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|err| CatalogError::Request(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status(status.as_u16()));
        }
        let text = response
            .text()
            .await
            .map_err(|err| CatalogError::Request(err.to_string()))?;

        let page: QueryResponse =
            serde_json::from_str(&text).map_err(|err| CatalogError::Parse(err.to_string()))?;
        if let Some(error) = page.error {
            return Err(CatalogError::Service {
                code: error.code,
                message: error.message,
            });
        }
        dtm_debug!(
            "Catalog page at offset {}: {} features",
            offset,
            page.features.len()
        );
        Ok(page)
    }
}

/// Skips features without a name, a usable download link or a footprint.
fn feature_to_tile(feature: Feature) -> Option<TileRecord> {
    let attrs = feature.attributes;

    let Some(tile_name) = attrs.package.filter(|name| !name.trim().is_empty()) else {
        dtm_warn!("Skipping catalog feature without a package name");
        return None;
    };

    let Some(source_url) = attrs.download_link.as_deref().and_then(extract_download_url) else {
        dtm_warn!("Skipping {}: no usable download link", tile_name);
        return None;
    };

    let Some(geometry) = feature.geometry else {
        dtm_warn!("Skipping {}: no geometry", tile_name);
        return None;
    };

    let project = attrs.project.unwrap_or_default();
    let vintage_hint = extract_year_range(&project);
    let dataset_name = if project.trim().is_empty() {
        tile_name.clone()
    } else {
        project
    };

    let mut tile = TileRecord::new(dataset_name, tile_name)
        .with_source_url(source_url)
        .with_size_bytes((attrs.size_gb.unwrap_or(0.0).max(0.0) * BYTES_PER_GB).round() as u64);
    tile.vintage_hint = vintage_hint;
    tile.footprint = Footprint::from_esri_rings(geometry.rings);
    tile.resolution_m = attrs.resolution.unwrap_or(0.0);
    tile.coverage_km2 = attrs.shape_area.map(|area| area / 1_000_000.0).unwrap_or(0.0);
    Some(tile)
}

/// The `href` of an HTML anchor, e.g. `<a href = 'https://x/y.zip'>`.
pub fn extract_download_url(html: &str) -> Option<String> {
    let after_href = &html[html.find("href")? + "href".len()..];
    let after_eq = after_href.trim_start().strip_prefix('=')?.trim_start();
    let quote = after_eq.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let rest = &after_eq[1..];
    let url = &rest[..rest.find(quote)?];
    let url = url.trim();
    (!url.is_empty()).then(|| url.to_string())
}

/// Totals shown to the user for a search result.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogSummary {
    pub tile_count: usize,
    /// Distinct dataset names, sorted.
    pub projects: Vec<String>,
    pub total_size_bytes: u64,
}

impl CatalogSummary {
    pub fn from_tiles(tiles: &[TileRecord]) -> Self {
        let projects: BTreeSet<&str> = tiles.iter().map(|t| t.dataset_name.as_str()).collect();
        Self {
            tile_count: tiles.len(),
            projects: projects.into_iter().map(str::to_string).collect(),
            total_size_bytes: tiles.iter().map(|t| t.size_bytes).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn href_extraction_accepts_both_quotes_and_spacing() {
        assert_eq!(
            extract_download_url(r#"<a href="https://example.com/a.zip">A</a>"#),
            Some("https://example.com/a.zip".to_string())
        );
        assert_eq!(
            extract_download_url("<a href = 'https://example.com/b.zip' target='_blank'>B</a>"),
            Some("https://example.com/b.zip".to_string())
        );
        assert_eq!(extract_download_url("<a>no link</a>"), None);
        assert_eq!(extract_download_url("<a href=https://x>x</a>"), None);
        assert_eq!(extract_download_url(r#"<a href="">x</a>"#), None);
    }

    #[test]
    fn feature_conversion_fills_tile() {
        let feature = Feature {
            attributes: Attributes {
                package: Some("GTA-2015-A".into()),
                size_gb: Some(2.5),
                resolution: Some(0.5),
                download_link: Some(r#"<a href="https://example.com/t.zip">t</a>"#.into()),
                project: Some("GTA 2014-18".into()),
                shape_area: Some(4_000_000.0),
            },
            geometry: Some(PolygonGeometry {
                rings: vec![vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![1.0, 1.0], vec![0.0, 0.0]]],
            }),
        };
        let tile = feature_to_tile(feature).unwrap();
        assert_eq!(tile.dataset_name, "GTA 2014-18");
        assert_eq!(tile.tile_name, "GTA-2015-A");
        assert_eq!(tile.vintage_hint.as_deref(), Some("2014-18"));
        assert_eq!(tile.size_bytes, 2_500_000_000);
        assert_eq!(tile.coverage_km2, 4.0);
        assert_eq!(tile.source_url, "https://example.com/t.zip");
        assert!(!tile.footprint.is_empty());
    }

    #[test]
    fn features_missing_essentials_are_skipped() {
        let no_geometry = Feature {
            attributes: Attributes {
                package: Some("A".into()),
                download_link: Some(r#"<a href="https://e/a.zip">a</a>"#.into()),
                ..Attributes::default()
            },
            geometry: None,
        };
        assert!(feature_to_tile(no_geometry).is_none());

        let no_name = Feature {
            attributes: Attributes::default(),
            geometry: Some(PolygonGeometry { rings: Vec::new() }),
        };
        assert!(feature_to_tile(no_name).is_none());
    }
}
