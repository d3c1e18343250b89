//! Coordinate reference systems: EPSG codes and `.prj` WKT.
//!
//! Only what field shapefiles in the service area actually carry is modelled:
//! geographic lon/lat, UTM and other Transverse Mercator grids, Lambert
//! Conformal Conic and Web Mercator. Datum shifts are not applied: NAD83 and
//! ITRF realizations (GRS80) are treated as WGS84, which is sub-metre for
//! dashboard display, and any other ellipsoid is rejected with
//! [`CrsError::UnsupportedDatum`].

use crate::math::{Ellipsoid, LambertConformalConic, Projection, TransverseMercator};

/// ESRI-flavoured WKT written next to exported WGS84 shapefiles.
pub const WGS84_WKT: &str = "GEOGCS[\"GCS_WGS_1984\",DATUM[\"D_WGS_1984\",SPHEROID[\"WGS_1984\",6378137.0,298.257223563]],PRIMEM[\"Greenwich\",0.0],UNIT[\"Degree\",0.0174532925199433]]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrsError {
    UnknownEpsg { code: u32 },
    InvalidWkt { reason: String },
    UnsupportedProjection { name: String },
    /// Datum on an ellipsoid other than WGS84/GRS80; coordinates would need a shift.
    UnsupportedDatum { name: String },
}

impl std::fmt::Display for CrsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CrsError::UnknownEpsg { code } => write!(f, "unsupported EPSG code {code}"),
            CrsError::InvalidWkt { reason } => write!(f, "invalid WKT: {reason}"),
            CrsError::UnsupportedProjection { name } => {
                write!(f, "unsupported projection '{name}'")
            }
            CrsError::UnsupportedDatum { name } => write!(
                f,
                "unsupported datum '{name}'; reproject the layer to WGS 84, NAD83 or ITRF before uploading"
            ),
        }
    }
}

impl std::error::Error for CrsError {}

#[derive(Debug, Clone, PartialEq)]
pub struct Crs {
    pub name: String,
    pub epsg: Option<u32>,
    pub projection: Projection,
    /// Meters per projected unit (1.0 for metre grids, ignored when geographic).
    pub linear_unit_m: f64,
}

impl Crs {
    pub fn wgs84() -> Self {
        Crs {
            name: "WGS 84".to_string(),
            epsg: Some(4326),
            projection: Projection::Geographic,
            linear_unit_m: 1.0,
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self.projection, Projection::Geographic)
    }

    pub fn from_epsg(code: u32) -> Result<Self, CrsError> {
        let named = |name: &str, projection: Projection| Crs {
            name: name.to_string(),
            epsg: Some(code),
            projection,
            linear_unit_m: 1.0,
        };
        let mexico_lcc = |ellipsoid| {
            Projection::LambertConformalConic(LambertConformalConic {
                ellipsoid,
                lat1_deg: 17.5,
                lat2_deg: 29.5,
                lat0_deg: 12.0,
                lon0_deg: -102.0,
                k0: 1.0,
                false_easting: 2_500_000.0,
                false_northing: 0.0,
            })
        };
        let utm = |zone: u32, north: bool, ellipsoid| {
            Projection::TransverseMercator(TransverseMercator::utm(zone as u8, north, ellipsoid))
        };

        let crs = match code {
            4326 => Crs::wgs84(),
            4269 => named("NAD83", Projection::Geographic),
            4483 => named("Mexico ITRF92", Projection::Geographic),
            6365 => named("Mexico ITRF2008", Projection::Geographic),
            4258 => named("ETRS89", Projection::Geographic),
            3857 | 900913 => named("WGS 84 / Pseudo-Mercator", Projection::WebMercator),
            32601..=32660 => named(
                &format!("WGS 84 / UTM zone {}N", code - 32600),
                utm(code - 32600, true, Ellipsoid::WGS84),
            ),
            32701..=32760 => named(
                &format!("WGS 84 / UTM zone {}S", code - 32700),
                utm(code - 32700, false, Ellipsoid::WGS84),
            ),
            26901..=26923 => named(
                &format!("NAD83 / UTM zone {}N", code - 26900),
                utm(code - 26900, true, Ellipsoid::GRS80),
            ),
            4484..=4489 => named(
                &format!("Mexico ITRF92 / UTM zone {}N", code - 4473),
                utm(code - 4473, true, Ellipsoid::GRS80),
            ),
            6366..=6371 => named(
                &format!("Mexico ITRF2008 / UTM zone {}N", code - 6355),
                utm(code - 6355, true, Ellipsoid::GRS80),
            ),
            6362 => named("Mexico ITRF92 / LCC", mexico_lcc(Ellipsoid::GRS80)),
            6372 => named("Mexico ITRF2008 / LCC", mexico_lcc(Ellipsoid::GRS80)),
            _ => return Err(CrsError::UnknownEpsg { code }),
        };
        Ok(crs)
    }

    /// Parses OGC/ESRI WKT1 and the common subset of WKT2 found in `.prj` files.
    pub fn from_wkt(wkt: &str) -> Result<Self, CrsError> {
        let root = wkt::parse(wkt)?;
        let keyword = root.keyword.to_ascii_uppercase();
        let authority = root.epsg_code();
        check_datum(&root)?;

        match keyword.as_str() {
            "GEOGCS" | "GEOGCRS" | "GEODCRS" | "GEOGRAPHICCRS" => Ok(Crs {
                name: root.name().unwrap_or("unnamed").to_string(),
                epsg: authority,
                projection: Projection::Geographic,
                linear_unit_m: 1.0,
            }),
            "PROJCS" | "PROJCRS" | "PROJECTEDCRS" => match projected_from_wkt(&root) {
                Ok(crs) => Ok(Crs {
                    epsg: authority,
                    ..crs
                }),
                // An authority code we know beats a projection we cannot model.
                Err(err) => match authority.map(Crs::from_epsg) {
                    Some(Ok(crs)) => Ok(crs),
                    _ => Err(err),
                },
            },
            other => Err(CrsError::InvalidWkt {
                reason: format!("unexpected root keyword '{other}'"),
            }),
        }
    }

    /// Projected (or geographic) coordinate to WGS84 `[lon, lat]`.
    pub fn to_wgs84(&self, x: f64, y: f64) -> [f64; 2] {
        match self.projection {
            Projection::Geographic => [x, y],
            ref p => p.inverse(x * self.linear_unit_m, y * self.linear_unit_m),
        }
    }

    /// WGS84 `[lon, lat]` to this CRS.
    pub fn from_wgs84(&self, lon: f64, lat: f64) -> [f64; 2] {
        match self.projection {
            Projection::Geographic => [lon, lat],
            ref p => {
                let [x, y] = p.forward(lon, lat);
                [x / self.linear_unit_m, y / self.linear_unit_m]
            }
        }
    }
}

fn wkt_ellipsoid(root: &wkt::Node) -> Option<Ellipsoid> {
    let n = root.find("SPHEROID").or_else(|| root.find("ELLIPSOID"))?;
    Some(Ellipsoid::new(n.number(0)?, n.number(1)?))
}

/// Coordinates are never datum-shifted, so only WGS84-compatible ellipsoids pass.
fn check_datum(root: &wkt::Node) -> Result<(), CrsError> {
    match wkt_ellipsoid(root) {
        Some(e) if !e.approx_eq(&Ellipsoid::WGS84) => {
            let name = root
                .find("DATUM")
                .and_then(|d| d.name())
                .or_else(|| root.find("SPHEROID").or_else(|| root.find("ELLIPSOID"))?.name())
                .unwrap_or("unnamed");
            Err(CrsError::UnsupportedDatum {
                name: name.to_string(),
            })
        }
        _ => Ok(()),
    }
}

fn projected_from_wkt(root: &wkt::Node) -> Result<Crs, CrsError> {
    let method = root
        .child("PROJECTION")
        .or_else(|| root.child("CONVERSION").and_then(|c| c.child("METHOD")))
        .and_then(|n| n.name())
        .ok_or_else(|| CrsError::InvalidWkt {
            reason: "projected CRS without a projection".to_string(),
        })?;
    let method_key = normalize_key(method);

    let ellipsoid = wkt_ellipsoid(root).unwrap_or(Ellipsoid::WGS84);

    // WKT1 puts the linear unit directly under PROJCS; WKT2 under CS/LENGTHUNIT.
    let linear_unit_m = root
        .children_named("UNIT")
        .last()
        .or_else(|| root.find("LENGTHUNIT"))
        .and_then(|n| n.number(0))
        .filter(|v| *v > 0.0)
        .unwrap_or(1.0);

    let params = wkt::Parameters::collect(root);
    // WKT1 false easting/northing are in the CRS linear unit.
    let false_easting = params.get(&["false_easting"]).unwrap_or(0.0) * linear_unit_m;
    let false_northing = params.get(&["false_northing"]).unwrap_or(0.0) * linear_unit_m;
    let lon0 = params
        .get(&[
            "central_meridian",
            "longitude_of_center",
            "longitude_of_origin",
            "longitude_of_natural_origin",
            "longitude_of_false_origin",
        ])
        .unwrap_or(0.0);
    let lat0 = params
        .get(&[
            "latitude_of_origin",
            "latitude_of_center",
            "latitude_of_natural_origin",
            "latitude_of_false_origin",
        ])
        .unwrap_or(0.0);
    let k0 = params
        .get(&["scale_factor", "scale_factor_at_natural_origin"])
        .unwrap_or(1.0);

    let projection = match method_key.as_str() {
        "transverse_mercator" | "gauss_kruger" => {
            Projection::TransverseMercator(TransverseMercator {
                ellipsoid,
                lat0_deg: lat0,
                lon0_deg: lon0,
                k0,
                false_easting,
                false_northing,
            })
        }
        "lambert_conformal_conic"
        | "lambert_conformal_conic_2sp"
        | "lambert_conic_conformal_(2sp)"
        | "lambert_conformal_conic_1sp"
        | "lambert_conic_conformal_(1sp)" => {
            let lat1 = params
                .get(&[
                    "standard_parallel_1",
                    "latitude_of_1st_standard_parallel",
                ])
                .unwrap_or(lat0);
            let lat2 = params
                .get(&[
                    "standard_parallel_2",
                    "latitude_of_2nd_standard_parallel",
                ])
                .unwrap_or(lat1);
            let single = (lat1 - lat2).abs() < 1e-12;
            Projection::LambertConformalConic(LambertConformalConic {
                ellipsoid,
                lat1_deg: lat1,
                lat2_deg: lat2,
                lat0_deg: lat0,
                lon0_deg: lon0,
                k0: if single { k0 } else { 1.0 },
                false_easting,
                false_northing,
            })
        }
        "mercator_auxiliary_sphere" | "popular_visualisation_pseudo_mercator" => {
            Projection::WebMercator
        }
        _ => {
            return Err(CrsError::UnsupportedProjection {
                name: method.to_string(),
            });
        }
    };

    Ok(Crs {
        name: root.name().unwrap_or("unnamed").to_string(),
        epsg: None,
        projection,
        linear_unit_m,
    })
}

fn normalize_key(s: &str) -> String {
    s.trim().to_ascii_lowercase().replace([' ', '-'], "_")
}

/// Minimal WKT tree: `KEYWORD[item, item, ...]` with `[]` or `()` brackets.
mod wkt {
    use super::{CrsError, normalize_key};

    #[derive(Debug, Clone, PartialEq)]
    pub enum Item {
        Text(String),
        Number(f64),
        Node(Node),
        /// Unquoted enumeration value such as `Cartesian` or `north`.
        Bare,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct Node {
        pub keyword: String,
        pub items: Vec<Item>,
    }

    impl Node {
        pub fn name(&self) -> Option<&str> {
            match self.items.first() {
                Some(Item::Text(s)) => Some(s.as_str()),
                _ => None,
            }
        }

        /// The `idx`-th numeric item.
        pub fn number(&self, idx: usize) -> Option<f64> {
            self.items
                .iter()
                .filter_map(|i| match i {
                    Item::Number(v) => Some(*v),
                    _ => None,
                })
                .nth(idx)
        }

        pub fn children(&self) -> impl Iterator<Item = &Node> {
            self.items.iter().filter_map(|i| match i {
                Item::Node(n) => Some(n),
                _ => None,
            })
        }

        pub fn children_named<'a, 'k>(
            &'a self,
            keyword: &'k str,
        ) -> impl Iterator<Item = &'a Node> + 'k
        where
            'a: 'k,
        {
            self.children()
                .filter(move |n| n.keyword.eq_ignore_ascii_case(keyword))
        }

        pub fn child<'a>(&'a self, keyword: &str) -> Option<&'a Node> {
            self.children().find(|n| n.keyword.eq_ignore_ascii_case(keyword))
        }

        /// Depth-first search for the first descendant with `keyword`.
        pub fn find(&self, keyword: &str) -> Option<&Node> {
            for c in self.children() {
                if c.keyword.eq_ignore_ascii_case(keyword) {
                    return Some(c);
                }
                if let Some(found) = c.find(keyword) {
                    return Some(found);
                }
            }
            None
        }

        /// EPSG code from a direct `AUTHORITY["EPSG","n"]` or `ID["EPSG",n]` child.
        pub fn epsg_code(&self) -> Option<u32> {
            let node = self.child("AUTHORITY").or_else(|| self.child("ID"))?;
            if !node.name()?.eq_ignore_ascii_case("EPSG") {
                return None;
            }
            match node.items.get(1)? {
                Item::Text(s) => s.trim().parse().ok(),
                Item::Number(v) if *v >= 0.0 => Some(*v as u32),
                _ => None,
            }
        }
    }

    /// Projection parameters keyed by normalized name.
    pub struct Parameters(Vec<(String, f64)>);

    impl Parameters {
        pub fn collect(root: &Node) -> Self {
            let mut out = Vec::new();
            let mut stack = vec![root];
            while let Some(node) = stack.pop() {
                for c in node.children() {
                    if c.keyword.eq_ignore_ascii_case("PARAMETER") {
                        if let (Some(name), Some(v)) = (c.name(), c.number(0)) {
                            out.push((normalize_key(name), v));
                        }
                    } else {
                        stack.push(c);
                    }
                }
            }
            Parameters(out)
        }

        pub fn get(&self, names: &[&str]) -> Option<f64> {
            names
                .iter()
                .find_map(|n| self.0.iter().find(|(k, _)| k == n).map(|(_, v)| *v))
        }
    }

    struct Parser<'a> {
        src: &'a [u8],
        pos: usize,
    }

    pub fn parse(text: &str) -> Result<Node, CrsError> {
        let mut p = Parser {
            src: text.as_bytes(),
            pos: 0,
        };
        p.skip_ws();
        let node = p.node()?;
        p.skip_ws();
        if p.pos != p.src.len() {
            return Err(p.error("trailing characters"));
        }
        Ok(node)
    }

    impl Parser<'_> {
        fn error(&self, reason: &str) -> CrsError {
            CrsError::InvalidWkt {
                reason: format!("{reason} at byte {}", self.pos),
            }
        }

        fn peek(&self) -> Option<u8> {
            self.src.get(self.pos).copied()
        }

        fn skip_ws(&mut self) {
            while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
                self.pos += 1;
            }
        }

        fn word(&mut self) -> String {
            let start = self.pos;
            while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'_') {
                self.pos += 1;
            }
            String::from_utf8_lossy(&self.src[start..self.pos]).into_owned()
        }

        fn node(&mut self) -> Result<Node, CrsError> {
            let keyword = self.word();
            if keyword.is_empty() {
                return Err(self.error("expected keyword"));
            }
            self.skip_ws();
            let close = match self.peek() {
                Some(b'[') => b']',
                Some(b'(') => b')',
                _ => return Err(self.error("expected '[' or '('")),
            };
            self.pos += 1;

            let mut items = Vec::new();
            loop {
                self.skip_ws();
                match self.peek() {
                    None => return Err(self.error("unterminated node")),
                    Some(b) if b == close => {
                        self.pos += 1;
                        break;
                    }
                    Some(b',') => {
                        self.pos += 1;
                    }
                    Some(b'"') => items.push(Item::Text(self.quoted()?)),
                    Some(b) if b == b'-' || b == b'+' || b == b'.' || b.is_ascii_digit() => {
                        items.push(Item::Number(self.number()?));
                    }
                    Some(b) if b.is_ascii_alphabetic() => {
                        let save = self.pos;
                        self.word();
                        self.skip_ws();
                        if matches!(self.peek(), Some(b'[') | Some(b'(')) {
                            self.pos = save;
                            items.push(Item::Node(self.node()?));
                        } else {
                            items.push(Item::Bare);
                        }
                    }
                    Some(_) => return Err(self.error("unexpected character")),
                }
            }
            Ok(Node { keyword, items })
        }

        fn quoted(&mut self) -> Result<String, CrsError> {
            self.pos += 1;
            let mut out = Vec::new();
            loop {
                match self.peek() {
                    None => return Err(self.error("unterminated string")),
                    Some(b'"') => {
                        self.pos += 1;
                        // WKT escapes a quote by doubling it.
                        if self.peek() == Some(b'"') {
                            out.push(b'"');
                            self.pos += 1;
                        } else {
                            break;
                        }
                    }
                    Some(b) => {
                        out.push(b);
                        self.pos += 1;
                    }
                }
            }
            Ok(String::from_utf8_lossy(&out).into_owned())
        }

        fn number(&mut self) -> Result<f64, CrsError> {
            let start = self.pos;
            while matches!(self.peek(), Some(b) if b.is_ascii_digit() || matches!(b, b'-' | b'+' | b'.' | b'e' | b'E'))
            {
                self.pos += 1;
            }
            std::str::from_utf8(&self.src[start..self.pos])
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| self.error("invalid number"))
        }
    }
}
