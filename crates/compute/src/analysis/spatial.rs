use formats::GeoTable;
use foundation::Aabb2;
use serde::Serialize;

pub const DEFAULT_CENTER: [f64; 2] = [20.5, -101.5];
pub const DEFAULT_ZOOM: u8 = 7;
pub const DATA_ZOOM: u8 = 8;

/// Initial map view. `center` is `[lat, lon]`; `fit_bounds` is
/// `[[south, west], [north, east]]` and takes precedence when present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapFrame {
    pub center: [f64; 2],
    pub zoom: u8,
    pub fit_bounds: Option<[[f64; 2]; 2]>,
}

impl Default for MapFrame {
    fn default() -> Self {
        Self {
            center: DEFAULT_CENTER,
            zoom: DEFAULT_ZOOM,
            fit_bounds: None,
        }
    }
}

fn finite(b: &Aabb2) -> bool {
    b.min.iter().chain(b.max.iter()).all(|v| v.is_finite())
}

/// Centers on the shown projects and fits the basin boundary when one exists.
pub fn map_frame(projects: Option<&GeoTable>, boundary: Option<&GeoTable>) -> MapFrame {
    let mut frame = MapFrame::default();
    if let Some(b) = projects.and_then(GeoTable::bounds).filter(finite) {
        frame.center = [(b.min[1] + b.max[1]) / 2.0, (b.min[0] + b.max[0]) / 2.0];
        frame.zoom = DATA_ZOOM;
    }
    if let Some(b) = boundary.and_then(GeoTable::bounds).filter(finite) {
        frame.fit_bounds = Some([[b.min[1], b.min[0]], [b.max[1], b.max[0]]]);
    }
    frame
}
