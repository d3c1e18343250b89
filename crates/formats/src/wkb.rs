//! Well-Known Binary geometry codec (ISO/OGC 2D, the GeoParquet encoding).
//!
//! The writer always emits little-endian XY. The reader also accepts
//! big-endian input and ISO or EWKB Z/M/SRID variants, dropping the extra
//! ordinates.

use geo_types::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WkbError {
    UnexpectedEof,
    InvalidByteOrder { found: u8 },
    UnsupportedType { code: u32 },
    TrailingBytes { count: usize },
}

impl std::fmt::Display for WkbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WkbError::UnexpectedEof => write!(f, "WKB: unexpected end of data"),
            WkbError::InvalidByteOrder { found } => write!(f, "WKB: invalid byte order {found}"),
            WkbError::UnsupportedType { code } => write!(f, "WKB: unsupported geometry type {code}"),
            WkbError::TrailingBytes { count } => write!(f, "WKB: {count} trailing bytes"),
        }
    }
}

impl std::error::Error for WkbError {}

const POINT: u32 = 1;
const LINE_STRING: u32 = 2;
const POLYGON: u32 = 3;
const MULTI_POINT: u32 = 4;
const MULTI_LINE_STRING: u32 = 5;
const MULTI_POLYGON: u32 = 6;
const GEOMETRY_COLLECTION: u32 = 7;

const EWKB_Z: u32 = 0x8000_0000;
const EWKB_M: u32 = 0x4000_0000;
const EWKB_SRID: u32 = 0x2000_0000;

pub fn encode(geom: &Geometry<f64>) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    write_geometry(&mut out, geom);
    out
}

pub fn decode(bytes: &[u8]) -> Result<Geometry<f64>, WkbError> {
    let mut r = Reader::new(bytes);
    let g = r.read_geometry()?;
    if r.pos != bytes.len() {
        return Err(WkbError::TrailingBytes {
            count: bytes.len() - r.pos,
        });
    }
    Ok(g)
}

/// OGC type name, as listed in GeoParquet `geometry_types`.
pub fn type_name(geom: &Geometry<f64>) -> &'static str {
    match geom {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) | Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
    }
}

fn write_header(out: &mut Vec<u8>, code: u32) {
    out.push(1);
    out.extend_from_slice(&code.to_le_bytes());
}

fn write_u32(out: &mut Vec<u8>, v: usize) {
    out.extend_from_slice(&(v as u32).to_le_bytes());
}

fn write_coord(out: &mut Vec<u8>, c: Coord<f64>) {
    out.extend_from_slice(&c.x.to_le_bytes());
    out.extend_from_slice(&c.y.to_le_bytes());
}

fn write_coords(out: &mut Vec<u8>, line: &LineString<f64>) {
    write_u32(out, line.0.len());
    for c in &line.0 {
        write_coord(out, *c);
    }
}

fn write_polygon_body(out: &mut Vec<u8>, poly: &Polygon<f64>) {
    if poly.exterior().0.is_empty() {
        write_u32(out, 0);
        return;
    }
    write_u32(out, 1 + poly.interiors().len());
    write_coords(out, poly.exterior());
    for ring in poly.interiors() {
        write_coords(out, ring);
    }
}

fn write_geometry(out: &mut Vec<u8>, geom: &Geometry<f64>) {
    match geom {
        Geometry::Point(p) => {
            write_header(out, POINT);
            write_coord(out, p.0);
        }
        Geometry::Line(l) => {
            write_header(out, LINE_STRING);
            write_coords(out, &LineString::new(vec![l.start, l.end]));
        }
        Geometry::LineString(l) => {
            write_header(out, LINE_STRING);
            write_coords(out, l);
        }
        Geometry::Polygon(p) => {
            write_header(out, POLYGON);
            write_polygon_body(out, p);
        }
        Geometry::Rect(r) => {
            write_header(out, POLYGON);
            write_polygon_body(out, &r.to_polygon());
        }
        Geometry::Triangle(t) => {
            write_header(out, POLYGON);
            write_polygon_body(out, &t.to_polygon());
        }
        Geometry::MultiPoint(mp) => {
            write_header(out, MULTI_POINT);
            write_u32(out, mp.0.len());
            for p in &mp.0 {
                write_geometry(out, &Geometry::Point(*p));
            }
        }
        Geometry::MultiLineString(ml) => {
            write_header(out, MULTI_LINE_STRING);
            write_u32(out, ml.0.len());
            for l in &ml.0 {
                write_header(out, LINE_STRING);
                write_coords(out, l);
            }
        }
        Geometry::MultiPolygon(mp) => {
            write_header(out, MULTI_POLYGON);
            write_u32(out, mp.0.len());
            for p in &mp.0 {
                write_header(out, POLYGON);
                write_polygon_body(out, p);
            }
        }
        Geometry::GeometryCollection(gc) => {
            write_header(out, GEOMETRY_COLLECTION);
            write_u32(out, gc.0.len());
            for g in &gc.0 {
                write_geometry(out, g);
            }
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], WkbError> {
        let end = self.pos + N;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(WkbError::UnexpectedEof)?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn read_u32(&mut self, little: bool) -> Result<u32, WkbError> {
        let b = self.take::<4>()?;
        Ok(if little {
            u32::from_le_bytes(b)
        } else {
            u32::from_be_bytes(b)
        })
    }

    fn read_f64(&mut self, little: bool) -> Result<f64, WkbError> {
        let b = self.take::<8>()?;
        Ok(if little {
            f64::from_le_bytes(b)
        } else {
            f64::from_be_bytes(b)
        })
    }

    /// Element count, bounded by what the remaining bytes could possibly hold.
    fn read_count(&mut self, little: bool, min_item_bytes: usize) -> Result<usize, WkbError> {
        let n = self.read_u32(little)? as usize;
        if n.saturating_mul(min_item_bytes) > self.bytes.len() - self.pos {
            return Err(WkbError::UnexpectedEof);
        }
        Ok(n)
    }

    fn read_coord(&mut self, little: bool, extra: usize) -> Result<Coord<f64>, WkbError> {
        let x = self.read_f64(little)?;
        let y = self.read_f64(little)?;
        for _ in 0..extra {
            self.read_f64(little)?;
        }
        Ok(Coord { x, y })
    }

    fn read_line(&mut self, little: bool, extra: usize) -> Result<LineString<f64>, WkbError> {
        let n = self.read_count(little, 16 + 8 * extra)?;
        let mut coords = Vec::with_capacity(n);
        for _ in 0..n {
            coords.push(self.read_coord(little, extra)?);
        }
        Ok(LineString::new(coords))
    }

    fn read_polygon(&mut self, little: bool, extra: usize) -> Result<Polygon<f64>, WkbError> {
        let rings = self.read_count(little, 4)?;
        if rings == 0 {
            return Ok(Polygon::new(LineString::new(vec![]), vec![]));
        }
        let exterior = self.read_line(little, extra)?;
        let mut interiors = Vec::with_capacity(rings - 1);
        for _ in 1..rings {
            interiors.push(self.read_line(little, extra)?);
        }
        Ok(Polygon::new(exterior, interiors))
    }

    /// Reads a nested geometry and requires it to be of `expected` base type.
    fn read_member(&mut self, expected: u32) -> Result<Geometry<f64>, WkbError> {
        let g = self.read_geometry()?;
        let ok = matches!(
            (expected, &g),
            (POINT, Geometry::Point(_))
                | (LINE_STRING, Geometry::LineString(_))
                | (POLYGON, Geometry::Polygon(_))
        );
        if ok {
            Ok(g)
        } else {
            Err(WkbError::UnsupportedType { code: expected })
        }
    }

    fn read_geometry(&mut self) -> Result<Geometry<f64>, WkbError> {
        let little = match self.take::<1>()?[0] {
            0 => false,
            1 => true,
            found => return Err(WkbError::InvalidByteOrder { found }),
        };
        let raw = self.read_u32(little)?;

        let mut extra = 0;
        if raw & EWKB_Z != 0 {
            extra += 1;
        }
        if raw & EWKB_M != 0 {
            extra += 1;
        }
        if raw & EWKB_SRID != 0 {
            self.read_u32(little)?;
        }
        let iso = raw & 0x0FFF_FFFF;
        let base = iso % 1000;
        extra += match iso / 1000 {
            0 => 0,
            1 | 2 => 1,
            3 => 2,
            _ => return Err(WkbError::UnsupportedType { code: raw }),
        };

        let geom = match base {
            POINT => Geometry::Point(Point(self.read_coord(little, extra)?)),
            LINE_STRING => Geometry::LineString(self.read_line(little, extra)?),
            POLYGON => Geometry::Polygon(self.read_polygon(little, extra)?),
            MULTI_POINT => {
                let n = self.read_count(little, 21)?;
                let mut points = Vec::with_capacity(n);
                for _ in 0..n {
                    if let Geometry::Point(p) = self.read_member(POINT)? {
                        points.push(p);
                    }
                }
                Geometry::MultiPoint(MultiPoint(points))
            }
            MULTI_LINE_STRING => {
                let n = self.read_count(little, 9)?;
                let mut lines = Vec::with_capacity(n);
                for _ in 0..n {
                    if let Geometry::LineString(l) = self.read_member(LINE_STRING)? {
                        lines.push(l);
                    }
                }
                Geometry::MultiLineString(MultiLineString(lines))
            }
            MULTI_POLYGON => {
                let n = self.read_count(little, 9)?;
                let mut polys = Vec::with_capacity(n);
                for _ in 0..n {
                    if let Geometry::Polygon(p) = self.read_member(POLYGON)? {
                        polys.push(p);
                    }
                }
                Geometry::MultiPolygon(MultiPolygon(polys))
            }
            GEOMETRY_COLLECTION => {
                let n = self.read_count(little, 5)?;
                let mut items = Vec::with_capacity(n);
                for _ in 0..n {
                    items.push(self.read_geometry()?);
                }
                Geometry::GeometryCollection(GeometryCollection(items))
            }
            _ => return Err(WkbError::UnsupportedType { code: raw }),
        };
        Ok(geom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{line_string, point, polygon};

    #[test]
    fn point_layout_matches_reference_bytes() {
        // POINT(1 2), little endian.
        let bytes = encode(&point!(x: 1.0, y: 2.0).into());
        let mut expected = vec![1u8, 1, 0, 0, 0];
        expected.extend_from_slice(&1.0f64.to_le_bytes());
        expected.extend_from_slice(&2.0f64.to_le_bytes());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn multipolygon_with_hole_survives() {
        let outer = polygon!(
            exterior: [(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)],
            interiors: [[(x: 2.0, y: 2.0), (x: 3.0, y: 2.0), (x: 3.0, y: 3.0)]],
        );
        let other = polygon![(x: 20.0, y: 20.0), (x: 21.0, y: 20.0), (x: 21.0, y: 21.0)];
        let g = Geometry::MultiPolygon(MultiPolygon(vec![outer, other]));
        assert_eq!(decode(&encode(&g)).unwrap(), g);
        assert_eq!(type_name(&g), "MultiPolygon");
    }

    #[test]
    fn reads_big_endian_linestring() {
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(&2u32.to_be_bytes());
        for v in [1.0f64, 2.0, 3.0, 4.0] {
            bytes.extend_from_slice(&v.to_be_bytes());
        }
        let g = decode(&bytes).unwrap();
        assert_eq!(g, Geometry::LineString(line_string![(x: 1.0, y: 2.0), (x: 3.0, y: 4.0)]));
    }

    #[test]
    fn drops_z_from_iso_and_ewkb() {
        // ISO POINT Z (type 1001).
        let mut iso = vec![1u8];
        iso.extend_from_slice(&1001u32.to_le_bytes());
        for v in [5.0f64, 6.0, 7.0] {
            iso.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(decode(&iso).unwrap(), Geometry::Point(point!(x: 5.0, y: 6.0)));

        // EWKB POINT Z with SRID 4326.
        let mut ewkb = vec![1u8];
        ewkb.extend_from_slice(&(POINT | EWKB_Z | EWKB_SRID).to_le_bytes());
        ewkb.extend_from_slice(&4326u32.to_le_bytes());
        for v in [5.0f64, 6.0, 7.0] {
            ewkb.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(decode(&ewkb).unwrap(), Geometry::Point(point!(x: 5.0, y: 6.0)));
    }

    #[test]
    fn rejects_truncated_and_garbage_input() {
        let bytes = encode(&point!(x: 1.0, y: 2.0).into());
        assert_eq!(decode(&bytes[..10]), Err(WkbError::UnexpectedEof));
        assert_eq!(decode(&[7]), Err(WkbError::InvalidByteOrder { found: 7 }));

        let mut huge = vec![1u8];
        huge.extend_from_slice(&LINE_STRING.to_le_bytes());
        huge.extend_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(decode(&huge), Err(WkbError::UnexpectedEof));

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert_eq!(decode(&trailing), Err(WkbError::TrailingBytes { count: 1 }));
    }
}
