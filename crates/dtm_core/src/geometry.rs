use serde::{Deserialize, Serialize};

/// Spatial reference used by the catalog and the map front end.
pub const WEB_MERCATOR: u32 = 3857;

fn default_srid() -> u32 {
    WEB_MERCATOR
}

/// Search extent sent to the metadata service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
    #[serde(default = "default_srid")]
    pub srid: u32,
}

impl BoundingBox {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64, srid: u32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
            srid,
        }
    }

    pub fn is_valid(&self) -> bool {
        [self.xmin, self.ymin, self.xmax, self.ymax]
            .iter()
            .all(|v| v.is_finite())
            && self.xmin < self.xmax
            && self.ymin < self.ymax
    }

    /// ESRI envelope JSON, e.g. `{"xmin":..,"spatialReference":{"wkid":3857}}`.
    pub fn to_esri_envelope(&self) -> String {
        format!(
            r#"{{"xmin":{},"ymin":{},"xmax":{},"ymax":{},"spatialReference":{{"wkid":{}}}}}"#,
            self.xmin, self.ymin, self.xmax, self.ymax, self.srid
        )
    }
}

/// Rectangle the merged output is clipped to, in the inputs' spatial reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipBounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl ClipBounds {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }
}

impl From<BoundingBox> for ClipBounds {
    fn from(bbox: BoundingBox) -> Self {
        Self::new(bbox.xmin, bbox.ymin, bbox.xmax, bbox.ymax)
    }
}

/// Tile footprint polygon as a list of rings of `[x, y]` points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    pub rings: Vec<Vec<[f64; 2]>>,
}

impl Footprint {
    /// Builds a footprint from ESRI rings, dropping points with fewer than two ordinates.
    pub fn from_esri_rings(rings: Vec<Vec<Vec<f64>>>) -> Self {
        let rings = rings
            .into_iter()
            .map(|ring| {
                ring.into_iter()
                    .filter_map(|point| match point.as_slice() {
                        [x, y, ..] => Some([*x, *y]),
                        _ => None,
                    })
                    .collect()
            })
            .collect();
        Self { rings }
    }

    pub fn is_empty(&self) -> bool {
        self.rings.iter().all(|ring| ring.is_empty())
    }

    pub fn bounds(&self) -> Option<ClipBounds> {
        let mut points = self.rings.iter().flatten();
        let first = points.next()?;
        let mut bounds = ClipBounds::new(first[0], first[1], first[0], first[1]);
        for [x, y] in points {
            bounds.min_x = bounds.min_x.min(*x);
            bounds.min_y = bounds.min_y.min(*y);
            bounds.max_x = bounds.max_x.max(*x);
            bounds.max_y = bounds.max_y.max(*y);
        }
        Some(bounds)
    }
}
