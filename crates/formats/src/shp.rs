//! ESRI shapefile geometry codec (`.shp` main file and `.shx` index).
//!
//! Layout per the ESRI Shapefile Technical Description (1998): a 100-byte
//! header followed by records of big-endian `(number, content length)` and a
//! little-endian shape body. Z and M ordinates are read past and dropped.

use geo_types::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};

const FILE_CODE: i32 = 9994;
const VERSION: i32 = 1000;
const HEADER_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShpError {
    UnexpectedEof,
    InvalidFileCode { found: i32 },
    UnsupportedShapeType { code: i32 },
    InvalidRecord { index: usize, reason: String },
    MixedGeometry { first: &'static str, other: &'static str },
}

impl std::fmt::Display for ShpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShpError::UnexpectedEof => write!(f, "shapefile is truncated"),
            ShpError::InvalidFileCode { found } => {
                write!(f, "not a shapefile (file code {found}, expected {FILE_CODE})")
            }
            ShpError::UnsupportedShapeType { code } => {
                write!(f, "unsupported shape type {code}")
            }
            ShpError::InvalidRecord { index, reason } => {
                write!(f, "invalid shape record {index}: {reason}")
            }
            ShpError::MixedGeometry { first, other } => {
                write!(f, "cannot write {other} into a {first} shapefile")
            }
        }
    }
}

impl std::error::Error for ShpError {}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ShapeKind {
    Null,
    Point,
    PolyLine,
    Polygon,
    MultiPoint,
}

impl ShapeKind {
    /// Base kind for a shape type code. Z and M variants map to their XY base.
    fn from_code(code: i32) -> Result<ShapeKind, ShpError> {
        let kind = match code {
            0 => ShapeKind::Null,
            1 | 11 | 21 => ShapeKind::Point,
            3 | 13 | 23 => ShapeKind::PolyLine,
            5 | 15 | 25 => ShapeKind::Polygon,
            8 | 18 | 28 => ShapeKind::MultiPoint,
            _ => return Err(ShpError::UnsupportedShapeType { code }),
        };
        Ok(kind)
    }

    fn code(self) -> i32 {
        match self {
            ShapeKind::Null => 0,
            ShapeKind::Point => 1,
            ShapeKind::PolyLine => 3,
            ShapeKind::Polygon => 5,
            ShapeKind::MultiPoint => 8,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ShapeKind::Null => "Null",
            ShapeKind::Point => "Point",
            ShapeKind::PolyLine => "PolyLine",
            ShapeKind::Polygon => "Polygon",
            ShapeKind::MultiPoint => "MultiPoint",
        }
    }
}

/// Reads every record of a `.shp` file. Null shapes come back as `None`.
pub fn read_shapes(bytes: &[u8]) -> Result<Vec<Option<Geometry<f64>>>, ShpError> {
    let mut r = Reader::new(bytes);
    let file_code = r.read_i32_be()?;
    if file_code != FILE_CODE {
        return Err(ShpError::InvalidFileCode { found: file_code });
    }
    r.seek(32)?;
    // Validates the declared shape type even though each record carries its own.
    ShapeKind::from_code(r.read_i32_le()?)?;
    r.seek(HEADER_LEN)?;

    let mut shapes = Vec::new();
    // Some writers pad the file; a partial record header ends the scan.
    while r.remaining() >= 8 {
        let index = shapes.len();
        let _number = r.read_i32_be()?;
        let words = r.read_i32_be()?;
        if words < 2 {
            return Err(ShpError::InvalidRecord {
                index,
                reason: format!("content length {words} words"),
            });
        }
        let content = r.read_slice(words as usize * 2)?;
        let shape = read_shape(content).map_err(|e| match e {
            ShpError::UnexpectedEof => ShpError::InvalidRecord {
                index,
                reason: "record body shorter than its shape".to_string(),
            },
            ShpError::InvalidRecord { reason, .. } => ShpError::InvalidRecord { index, reason },
            other => other,
        })?;
        shapes.push(shape);
    }
    Ok(shapes)
}

fn read_shape(content: &[u8]) -> Result<Option<Geometry<f64>>, ShpError> {
    let mut r = Reader::new(content);
    let kind = ShapeKind::from_code(r.read_i32_le()?)?;
    let geometry = match kind {
        ShapeKind::Null => return Ok(None),
        ShapeKind::Point => {
            let c = r.read_coord()?;
            // ESRI uses values below -1e38 as "no data".
            if c.x.is_nan() || c.y.is_nan() || c.x < -1e38 || c.y < -1e38 {
                return Ok(None);
            }
            Geometry::Point(Point(c))
        }
        ShapeKind::MultiPoint => {
            r.skip(32)?;
            let n = r.read_count(16)?;
            let mut points = Vec::with_capacity(n);
            for _ in 0..n {
                points.push(Point(r.read_coord()?));
            }
            if points.is_empty() {
                return Ok(None);
            }
            Geometry::MultiPoint(MultiPoint(points))
        }
        ShapeKind::PolyLine | ShapeKind::Polygon => {
            r.skip(32)?;
            let num_parts = r.read_count(4)?;
            let num_points = r.read_count(0)?;
            let mut starts = Vec::with_capacity(num_parts);
            for _ in 0..num_parts {
                starts.push(r.read_i32_le()?);
            }
            if num_points.saturating_mul(16) > r.remaining() {
                return Err(ShpError::UnexpectedEof);
            }
            let mut coords = Vec::with_capacity(num_points);
            for _ in 0..num_points {
                coords.push(r.read_coord()?);
            }
            let parts = split_parts(&starts, coords)?;
            if parts.is_empty() {
                return Ok(None);
            }
            if kind == ShapeKind::PolyLine {
                let mut lines: Vec<LineString<f64>> = parts.into_iter().map(LineString::new).collect();
                if lines.len() == 1 {
                    Geometry::LineString(lines.remove(0))
                } else {
                    Geometry::MultiLineString(MultiLineString(lines))
                }
            } else {
                assemble_polygons(parts.into_iter().map(LineString::new).collect())
            }
        }
    };
    Ok(Some(geometry))
}

fn split_parts(starts: &[i32], coords: Vec<Coord<f64>>) -> Result<Vec<Vec<Coord<f64>>>, ShpError> {
    let mut parts = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(coords.len() as i32);
        if start < 0 || end < start || end as usize > coords.len() {
            return Err(ShpError::InvalidRecord {
                index: 0,
                reason: format!("part {i} spans [{start}, {end}) of {} points", coords.len()),
            });
        }
        if end > start {
            parts.push(coords[start as usize..end as usize].to_vec());
        }
    }
    Ok(parts)
}

/// Twice the signed area; positive for counter-clockwise rings.
fn signed_area2(ring: &LineString<f64>) -> f64 {
    ring.0
        .windows(2)
        .map(|w| w[0].x * w[1].y - w[1].x * w[0].y)
        .sum()
}

fn ring_contains(ring: &LineString<f64>, p: Coord<f64>) -> bool {
    let pts = &ring.0;
    let mut inside = false;
    let mut j = pts.len().wrapping_sub(1);
    for i in 0..pts.len() {
        let (a, b) = (pts[i], pts[j]);
        if (a.y > p.y) != (b.y > p.y) && p.x < (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Groups shapefile rings into polygons. Clockwise rings are exteriors;
/// counter-clockwise rings are holes of the first exterior that contains them.
/// A hole with no container stands alone as its own polygon.
fn assemble_polygons(rings: Vec<LineString<f64>>) -> Geometry<f64> {
    let mut exteriors: Vec<(LineString<f64>, Vec<LineString<f64>>)> = Vec::new();
    let mut holes = Vec::new();
    for mut ring in rings {
        ring.close();
        if signed_area2(&ring) <= 0.0 {
            exteriors.push((ring, Vec::new()));
        } else {
            holes.push(ring);
        }
    }

    for hole in holes {
        let probe = hole.0[0];
        match exteriors.iter_mut().find(|(ext, _)| ring_contains(ext, probe)) {
            Some((_, interiors)) => interiors.push(hole),
            None => exteriors.push((hole, Vec::new())),
        }
    }

    let mut polygons: Vec<Polygon<f64>> = exteriors
        .into_iter()
        .map(|(ext, ints)| Polygon::new(ext, ints))
        .collect();
    if polygons.len() == 1 {
        Geometry::Polygon(polygons.remove(0))
    } else {
        Geometry::MultiPolygon(MultiPolygon(polygons))
    }
}

/// `.shp` and `.shx` contents for one set of geometries.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeFiles {
    pub shp: Vec<u8>,
    pub shx: Vec<u8>,
}

/// Writes geometries as a single-type shapefile.
pub fn write_shapes(geoms: &[Geometry<f64>]) -> Result<ShapeFiles, ShpError> {
    let mut kind = ShapeKind::Null;
    for g in geoms {
        let k = kind_of(g)?;
        if kind == ShapeKind::Null {
            kind = k;
        } else if k != kind {
            return Err(ShpError::MixedGeometry {
                first: kind.name(),
                other: k.name(),
            });
        }
    }

    let mut bbox: Option<[f64; 4]> = None;
    let mut body = Vec::new();
    let mut index = Vec::with_capacity(geoms.len() * 8);
    for (i, g) in geoms.iter().enumerate() {
        let content = shape_content(g, kind, &mut bbox);
        let offset_words = (HEADER_LEN + body.len()) / 2;
        let len_words = content.len() / 2;
        index.extend_from_slice(&(offset_words as i32).to_be_bytes());
        index.extend_from_slice(&(len_words as i32).to_be_bytes());
        body.extend_from_slice(&((i + 1) as i32).to_be_bytes());
        body.extend_from_slice(&(len_words as i32).to_be_bytes());
        body.extend_from_slice(&content);
    }

    let bbox = bbox.unwrap_or([0.0; 4]);
    let mut shp = header(kind, bbox, HEADER_LEN + body.len());
    shp.extend_from_slice(&body);
    let mut shx = header(kind, bbox, HEADER_LEN + index.len());
    shx.extend_from_slice(&index);
    Ok(ShapeFiles { shp, shx })
}

fn kind_of(g: &Geometry<f64>) -> Result<ShapeKind, ShpError> {
    match g {
        Geometry::Point(_) => Ok(ShapeKind::Point),
        Geometry::MultiPoint(_) => Ok(ShapeKind::MultiPoint),
        Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => {
            Ok(ShapeKind::PolyLine)
        }
        Geometry::Polygon(_) | Geometry::MultiPolygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => {
            Ok(ShapeKind::Polygon)
        }
        Geometry::GeometryCollection(_) => Err(ShpError::MixedGeometry {
            first: "single-type",
            other: "GeometryCollection",
        }),
    }
}

fn header(kind: ShapeKind, bbox: [f64; 4], total_len: usize) -> Vec<u8> {
    let mut h = Vec::with_capacity(HEADER_LEN);
    h.extend_from_slice(&FILE_CODE.to_be_bytes());
    h.extend_from_slice(&[0u8; 20]);
    h.extend_from_slice(&((total_len / 2) as i32).to_be_bytes());
    h.extend_from_slice(&VERSION.to_le_bytes());
    h.extend_from_slice(&kind.code().to_le_bytes());
    for v in bbox {
        h.extend_from_slice(&v.to_le_bytes());
    }
    h.extend_from_slice(&[0u8; 32]);
    h
}

fn extend_bbox(bbox: &mut Option<[f64; 4]>, c: Coord<f64>) {
    let b = bbox.get_or_insert([c.x, c.y, c.x, c.y]);
    b[0] = b[0].min(c.x);
    b[1] = b[1].min(c.y);
    b[2] = b[2].max(c.x);
    b[3] = b[3].max(c.y);
}

fn shape_content(g: &Geometry<f64>, kind: ShapeKind, file_bbox: &mut Option<[f64; 4]>) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&kind.code().to_le_bytes());
    match g {
        Geometry::Point(p) => {
            extend_bbox(file_bbox, p.0);
            push_coord(&mut out, p.0);
        }
        Geometry::MultiPoint(mp) => {
            let coords: Vec<Coord<f64>> = mp.0.iter().map(|p| p.0).collect();
            push_multipoint(&mut out, &coords, file_bbox);
        }
        Geometry::Line(l) => push_parts(&mut out, vec![vec![l.start, l.end]], file_bbox),
        Geometry::LineString(l) => push_parts(&mut out, vec![l.0.clone()], file_bbox),
        Geometry::MultiLineString(ml) => {
            push_parts(&mut out, ml.0.iter().map(|l| l.0.clone()).collect(), file_bbox)
        }
        Geometry::Polygon(p) => push_parts(&mut out, polygon_rings(p), file_bbox),
        Geometry::Rect(r) => push_parts(&mut out, polygon_rings(&r.to_polygon()), file_bbox),
        Geometry::Triangle(t) => push_parts(&mut out, polygon_rings(&t.to_polygon()), file_bbox),
        Geometry::MultiPolygon(mp) => {
            push_parts(&mut out, mp.0.iter().flat_map(polygon_rings).collect(), file_bbox)
        }
        // Rejected by `kind_of` before any content is written.
        Geometry::GeometryCollection(_) => {}
    }
    out
}

/// Exterior clockwise, holes counter-clockwise, as the format requires.
fn polygon_rings(p: &Polygon<f64>) -> Vec<Vec<Coord<f64>>> {
    let orient = |ring: &LineString<f64>, clockwise: bool| {
        let mut coords = ring.0.clone();
        if (signed_area2(ring) < 0.0) != clockwise {
            coords.reverse();
        }
        coords
    };
    let mut rings = Vec::with_capacity(1 + p.interiors().len());
    if !p.exterior().0.is_empty() {
        rings.push(orient(p.exterior(), true));
    }
    for ring in p.interiors() {
        rings.push(orient(ring, false));
    }
    rings
}

fn push_coord(out: &mut Vec<u8>, c: Coord<f64>) {
    out.extend_from_slice(&c.x.to_le_bytes());
    out.extend_from_slice(&c.y.to_le_bytes());
}

fn push_bbox(out: &mut Vec<u8>, coords: impl Iterator<Item = Coord<f64>>, file_bbox: &mut Option<[f64; 4]>) {
    let mut b = None;
    for c in coords {
        extend_bbox(&mut b, c);
        extend_bbox(file_bbox, c);
    }
    for v in b.unwrap_or([0.0; 4]) {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn push_multipoint(out: &mut Vec<u8>, coords: &[Coord<f64>], file_bbox: &mut Option<[f64; 4]>) {
    push_bbox(out, coords.iter().copied(), file_bbox);
    out.extend_from_slice(&(coords.len() as i32).to_le_bytes());
    for c in coords {
        push_coord(out, *c);
    }
}

fn push_parts(out: &mut Vec<u8>, parts: Vec<Vec<Coord<f64>>>, file_bbox: &mut Option<[f64; 4]>) {
    push_bbox(out, parts.iter().flatten().copied(), file_bbox);
    let total: usize = parts.iter().map(Vec::len).sum();
    out.extend_from_slice(&(parts.len() as i32).to_le_bytes());
    out.extend_from_slice(&(total as i32).to_le_bytes());
    let mut start = 0usize;
    for p in &parts {
        out.extend_from_slice(&(start as i32).to_le_bytes());
        start += p.len();
    }
    for c in parts.iter().flatten() {
        push_coord(out, *c);
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

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn seek(&mut self, pos: usize) -> Result<(), ShpError> {
        if pos > self.bytes.len() {
            return Err(ShpError::UnexpectedEof);
        }
        self.pos = pos;
        Ok(())
    }

    fn skip(&mut self, n: usize) -> Result<(), ShpError> {
        self.seek(self.pos + n)
    }

    fn read_slice(&mut self, n: usize) -> Result<&'a [u8], ShpError> {
        let out = self
            .bytes
            .get(self.pos..self.pos + n)
            .ok_or(ShpError::UnexpectedEof)?;
        self.pos += n;
        Ok(out)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ShpError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_slice(N)?);
        Ok(out)
    }

    fn read_i32_be(&mut self) -> Result<i32, ShpError> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    fn read_i32_le(&mut self) -> Result<i32, ShpError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    fn read_f64_le(&mut self) -> Result<f64, ShpError> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    fn read_coord(&mut self) -> Result<Coord<f64>, ShpError> {
        Ok(Coord {
            x: self.read_f64_le()?,
            y: self.read_f64_le()?,
        })
    }

    /// Non-negative count whose items (of `item_bytes` each) fit in what is left.
    fn read_count(&mut self, item_bytes: usize) -> Result<usize, ShpError> {
        let n = self.read_i32_le()?;
        if n < 0 || (n as usize).saturating_mul(item_bytes) > self.remaining() {
            return Err(ShpError::UnexpectedEof);
        }
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{line_string, point, polygon};

    fn square(x0: f64, y0: f64, size: f64) -> Polygon<f64> {
        polygon![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size),
            (x: x0, y: y0 + size),
        ]
    }

    #[test]
    fn header_and_index_are_consistent() {
        let files = write_shapes(&[square(0.0, 0.0, 1.0).into(), square(5.0, 5.0, 2.0).into()]).unwrap();
        let shp = &files.shp;
        assert_eq!(i32::from_be_bytes(shp[0..4].try_into().unwrap()), 9994);
        assert_eq!(
            i32::from_be_bytes(shp[24..28].try_into().unwrap()) as usize * 2,
            shp.len()
        );
        assert_eq!(i32::from_le_bytes(shp[32..36].try_into().unwrap()), 5);
        assert_eq!(f64::from_le_bytes(shp[52..60].try_into().unwrap()), 7.0);

        // Second index entry points at the second record header.
        let shx = &files.shx;
        assert_eq!(shx.len(), 100 + 16);
        let off = i32::from_be_bytes(shx[108..112].try_into().unwrap()) as usize * 2;
        assert_eq!(i32::from_be_bytes(shp[off..off + 4].try_into().unwrap()), 2);
    }

    #[test]
    fn polygon_with_hole_reads_back_as_one_polygon() {
        let with_hole = Polygon::new(
            square(0.0, 0.0, 10.0).exterior().clone(),
            vec![square(2.0, 2.0, 2.0).exterior().clone()],
        );
        let files = write_shapes(&[with_hole.into()]).unwrap();
        let shapes = read_shapes(&files.shp).unwrap();
        let Some(Geometry::Polygon(p)) = &shapes[0] else {
            panic!("expected polygon, got {:?}", shapes[0]);
        };
        assert_eq!(p.interiors().len(), 1);
        // Exterior written clockwise.
        assert!(signed_area2(p.exterior()) < 0.0);
        assert!(signed_area2(&p.interiors()[0]) > 0.0);
    }

    #[test]
    fn disjoint_exteriors_become_multipolygon() {
        let mp = MultiPolygon(vec![square(0.0, 0.0, 1.0), square(3.0, 0.0, 1.0)]);
        let files = write_shapes(&[mp.into()]).unwrap();
        let shapes = read_shapes(&files.shp).unwrap();
        assert!(matches!(&shapes[0], Some(Geometry::MultiPolygon(m)) if m.0.len() == 2));
    }

    #[test]
    fn lines_and_points_round_trip() {
        let line: Geometry<f64> = line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)].into();
        let files = write_shapes(&[line.clone()]).unwrap();
        assert_eq!(read_shapes(&files.shp).unwrap(), vec![Some(line)]);

        let pts: Vec<Geometry<f64>> = vec![point!(x: 1.5, y: -2.5).into(), point!(x: 3.0, y: 4.0).into()];
        let files = write_shapes(&pts).unwrap();
        let back: Vec<Geometry<f64>> = read_shapes(&files.shp).unwrap().into_iter().flatten().collect();
        assert_eq!(back, pts);
    }

    #[test]
    fn null_records_and_z_variants() {
        // Header declaring PointZ, then one null record and one PointZ record.
        let mut shp = header(ShapeKind::Point, [0.0; 4], 0);
        shp[32..36].copy_from_slice(&11i32.to_le_bytes());
        shp.extend_from_slice(&1i32.to_be_bytes());
        shp.extend_from_slice(&2i32.to_be_bytes());
        shp.extend_from_slice(&0i32.to_le_bytes());
        shp.extend_from_slice(&2i32.to_be_bytes());
        shp.extend_from_slice(&18i32.to_be_bytes());
        shp.extend_from_slice(&11i32.to_le_bytes());
        for v in [10.0f64, 20.0, 30.0, 0.0] {
            shp.extend_from_slice(&v.to_le_bytes());
        }
        let shapes = read_shapes(&shp).unwrap();
        assert_eq!(shapes, vec![None, Some(point!(x: 10.0, y: 20.0).into())]);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(
            read_shapes(&[0u8; 100]),
            Err(ShpError::InvalidFileCode { found: 0 })
        );
        assert_eq!(read_shapes(&[0u8; 3]), Err(ShpError::UnexpectedEof));

        let files = write_shapes(&[square(0.0, 0.0, 1.0).into()]).unwrap();
        let truncated = &files.shp[..files.shp.len() - 10];
        assert!(read_shapes(truncated).is_err());

        let mixed = write_shapes(&[square(0.0, 0.0, 1.0).into(), point!(x: 0.0, y: 0.0).into()]);
        assert!(matches!(mixed, Err(ShpError::MixedGeometry { .. })));
    }
}
