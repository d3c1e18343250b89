//! GeoJSON FeatureCollection <-> [`GeoTable`] conversion (RFC 7946, WGS84).

use foundation::Crs;
use geo_types::{
    Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon,
};
use serde_json::{Map, Value};
use tracing::warn;

use crate::table::{AttributeTable, CellValue, Column, GeoTable};

#[derive(Debug)]
pub enum GeoJsonError {
    NotAFeatureCollection,
    InvalidFeature { index: usize, reason: String },
}

impl std::fmt::Display for GeoJsonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeoJsonError::NotAFeatureCollection => {
                write!(f, "expected GeoJSON FeatureCollection")
            }
            GeoJsonError::InvalidFeature { index, reason } => {
                write!(f, "invalid feature at index {index}: {reason}")
            }
        }
    }
}

impl std::error::Error for GeoJsonError {}

fn cell_to_json(value: &CellValue) -> Value {
    match value {
        CellValue::Null => Value::Null,
        CellValue::Text(s) => Value::String(s.clone()),
        // Non-finite numbers have no JSON form.
        CellValue::Number(v) => serde_json::Number::from_f64(*v).map_or(Value::Null, Value::Number),
        CellValue::Bool(b) => Value::Bool(*b),
    }
}

fn json_to_cell(value: &Value) -> CellValue {
    match value {
        Value::Null => CellValue::Null,
        Value::String(s) => CellValue::Text(s.clone()),
        Value::Number(n) => n.as_f64().map_or(CellValue::Null, CellValue::Number),
        Value::Bool(b) => CellValue::Bool(*b),
        other => CellValue::Text(other.to_string()),
    }
}

/// Feature collection with one feature per row; attributes become properties.
pub fn to_feature_collection(table: &GeoTable) -> Value {
    let columns = table.attributes.columns();
    let mut features = Vec::with_capacity(table.len());
    for (row, geometry) in table.geometries.iter().enumerate() {
        let mut properties = Map::new();
        for column in columns {
            properties.insert(column.name.clone(), cell_to_json(&column.values[row]));
        }
        let mut feature = Map::new();
        feature.insert("type".to_string(), Value::String("Feature".to_string()));
        feature.insert("properties".to_string(), Value::Object(properties));
        feature.insert("geometry".to_string(), geometry_to_json(geometry));
        features.push(Value::Object(feature));
    }

    let mut root = Map::new();
    root.insert(
        "type".to_string(),
        Value::String("FeatureCollection".to_string()),
    );
    root.insert("features".to_string(), Value::Array(features));
    Value::Object(root)
}

pub fn parse_feature_collection(payload: &str) -> Result<GeoTable, GeoJsonError> {
    let value: Value = serde_json::from_str(payload).map_err(|e| GeoJsonError::InvalidFeature {
        index: 0,
        reason: format!("JSON parse error: {e}"),
    })?;
    from_feature_collection(&value)
}

/// Builds a WGS84 table from a FeatureCollection. Property keys become
/// columns in first-seen order; features without geometry are dropped.
pub fn from_feature_collection(value: &Value) -> Result<GeoTable, GeoJsonError> {
    let obj = value.as_object().ok_or(GeoJsonError::NotAFeatureCollection)?;
    if obj.get("type").and_then(Value::as_str) != Some("FeatureCollection") {
        return Err(GeoJsonError::NotAFeatureCollection);
    }
    let features = obj
        .get("features")
        .and_then(Value::as_array)
        .ok_or(GeoJsonError::NotAFeatureCollection)?;

    let mut names: Vec<String> = Vec::new();
    let mut rows: Vec<&Map<String, Value>> = Vec::with_capacity(features.len());
    let mut geometries = Vec::with_capacity(features.len());
    let empty = Map::new();
    let mut dropped = 0usize;

    for (index, feature) in features.iter().enumerate() {
        let invalid = |reason: String| GeoJsonError::InvalidFeature { index, reason };
        let feature = feature
            .as_object()
            .ok_or_else(|| invalid("feature must be an object".to_string()))?;
        match feature.get("type").and_then(Value::as_str) {
            Some("Feature") => {}
            Some(other) => return Err(invalid(format!("unexpected feature type: {other}"))),
            None => return Err(invalid("feature missing type".to_string())),
        }
        let geometry = match feature.get("geometry") {
            None | Some(Value::Null) => {
                dropped += 1;
                continue;
            }
            Some(g) => parse_geometry(g).map_err(invalid)?,
        };
        let properties = feature
            .get("properties")
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        for key in properties.keys() {
            if !names.contains(key) {
                names.push(key.clone());
            }
        }
        rows.push(properties);
        geometries.push(geometry);
    }
    if dropped > 0 {
        warn!("dropped {dropped} GeoJSON features without geometry");
    }

    let columns = names
        .into_iter()
        .map(|name| {
            let values = rows
                .iter()
                .map(|props| props.get(&name).map_or(CellValue::Null, json_to_cell))
                .collect();
            Column::new(name, values)
        })
        .collect();
    let attributes = AttributeTable::from_columns(rows.len(), columns).map_err(|e| {
        GeoJsonError::InvalidFeature {
            index: 0,
            reason: e.to_string(),
        }
    })?;
    Ok(GeoTable {
        attributes,
        geometries,
        crs: Some(Crs::wgs84()),
    })
}

fn coord_json(c: &Coord<f64>) -> Value {
    Value::Array(vec![Value::from(c.x), Value::from(c.y)])
}

fn line_json(l: &LineString<f64>) -> Value {
    Value::Array(l.0.iter().map(coord_json).collect())
}

fn polygon_json(p: &Polygon<f64>) -> Value {
    Value::Array(
        std::iter::once(p.exterior())
            .chain(p.interiors())
            .map(line_json)
            .collect(),
    )
}

pub fn geometry_to_json(geometry: &Geometry<f64>) -> Value {
    let (ty, coordinates) = match geometry {
        Geometry::Point(p) => ("Point", coord_json(&p.0)),
        Geometry::MultiPoint(mp) => (
            "MultiPoint",
            Value::Array(mp.0.iter().map(|p| coord_json(&p.0)).collect()),
        ),
        Geometry::Line(l) => (
            "LineString",
            Value::Array(vec![coord_json(&l.start), coord_json(&l.end)]),
        ),
        Geometry::LineString(l) => ("LineString", line_json(l)),
        Geometry::MultiLineString(ml) => (
            "MultiLineString",
            Value::Array(ml.0.iter().map(line_json).collect()),
        ),
        Geometry::Polygon(p) => ("Polygon", polygon_json(p)),
        Geometry::Rect(r) => ("Polygon", polygon_json(&r.to_polygon())),
        Geometry::Triangle(t) => ("Polygon", polygon_json(&t.to_polygon())),
        Geometry::MultiPolygon(mp) => (
            "MultiPolygon",
            Value::Array(mp.0.iter().map(polygon_json).collect()),
        ),
        Geometry::GeometryCollection(gc) => {
            let mut obj = Map::new();
            obj.insert(
                "type".to_string(),
                Value::String("GeometryCollection".to_string()),
            );
            obj.insert(
                "geometries".to_string(),
                Value::Array(gc.0.iter().map(geometry_to_json).collect()),
            );
            return Value::Object(obj);
        }
    };
    let mut obj = Map::new();
    obj.insert("type".to_string(), Value::String(ty.to_string()));
    obj.insert("coordinates".to_string(), coordinates);
    Value::Object(obj)
}

fn parse_geometry(value: &Value) -> Result<Geometry<f64>, String> {
    let obj = value
        .as_object()
        .ok_or("geometry must be an object".to_string())?;
    let ty = obj
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or("geometry missing type".to_string())?;
    if ty == "GeometryCollection" {
        let members = obj
            .get("geometries")
            .and_then(Value::as_array)
            .ok_or("GeometryCollection missing geometries".to_string())?;
        let parsed = members
            .iter()
            .map(parse_geometry)
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Geometry::GeometryCollection(parsed.into_iter().collect()));
    }

    let coords = obj
        .get("coordinates")
        .ok_or("geometry missing coordinates".to_string())?;
    match ty {
        "Point" => Ok(Geometry::Point(Point(parse_coord(coords)?))),
        "MultiPoint" => Ok(Geometry::MultiPoint(MultiPoint(
            parse_coords(coords)?.into_iter().map(Point).collect(),
        ))),
        "LineString" => Ok(Geometry::LineString(LineString::new(parse_coords(coords)?))),
        "MultiLineString" => Ok(Geometry::MultiLineString(MultiLineString(
            parse_array(coords, "MultiLineString")?
                .iter()
                .map(|l| parse_coords(l).map(LineString::new))
                .collect::<Result<_, _>>()?,
        ))),
        "Polygon" => Ok(Geometry::Polygon(parse_polygon(coords)?)),
        "MultiPolygon" => Ok(Geometry::MultiPolygon(MultiPolygon(
            parse_array(coords, "MultiPolygon")?
                .iter()
                .map(parse_polygon)
                .collect::<Result<_, _>>()?,
        ))),
        other => Err(format!("unsupported geometry type: {other}")),
    }
}

fn parse_array<'a>(coords: &'a Value, what: &str) -> Result<&'a Vec<Value>, String> {
    coords
        .as_array()
        .ok_or(format!("{what} coordinates must be an array"))
}

fn parse_coord(coords: &Value) -> Result<Coord<f64>, String> {
    let arr = parse_array(coords, "position")?;
    if arr.len() < 2 {
        return Err("position must have [lon, lat]".to_string());
    }
    let x = arr[0].as_f64().ok_or("lon must be a number".to_string())?;
    let y = arr[1].as_f64().ok_or("lat must be a number".to_string())?;
    Ok(Coord { x, y })
}

fn parse_coords(coords: &Value) -> Result<Vec<Coord<f64>>, String> {
    parse_array(coords, "LineString")?
        .iter()
        .map(parse_coord)
        .collect()
}

fn parse_polygon(coords: &Value) -> Result<Polygon<f64>, String> {
    let mut rings = parse_array(coords, "Polygon")?
        .iter()
        .map(|r| parse_coords(r).map(LineString::new));
    let exterior = rings
        .next()
        .transpose()?
        .ok_or("Polygon needs an exterior ring".to_string())?;
    let interiors = rings.collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, interiors))
}
