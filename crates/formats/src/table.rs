//! In-memory attribute and geospatial tables.
//!
//! Columns keep insertion order and may temporarily share a name (a join can
//! produce that); lookups by name always see the first such column.

use foundation::{Aabb2, Crs};
use geo::{BoundingRect, MapCoords};
use geo_types::{Coord, Geometry};

use crate::FormatError;

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Text rendering used for join keys and text coercion.
    ///
    /// Integral numbers print without a fractional part so a folio read as
    /// `1234.0` from one source still equals `"1234"` from another.
    pub fn to_text(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            CellValue::Text(s) => Some(s.clone()),
            CellValue::Number(v) => Some(format_number(*v)),
            CellValue::Bool(b) => Some(b.to_string()),
        }
    }

    /// Finite numeric value, parsing text strictly after trimming.
    pub fn to_number(&self) -> Option<f64> {
        let v = match self {
            CellValue::Null => return None,
            CellValue::Number(v) => *v,
            CellValue::Text(s) => s.trim().parse::<f64>().ok()?,
            CellValue::Bool(b) => f64::from(u8::from(*b)),
        };
        v.is_finite().then_some(v)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Number(v)
    }
}

pub fn format_number(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<CellValue>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<CellValue>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeTable {
    columns: Vec<Column>,
    row_count: usize,
}

impl AttributeTable {
    /// A table with `row_count` rows and no columns yet.
    pub fn new(row_count: usize) -> Self {
        Self {
            columns: Vec::new(),
            row_count,
        }
    }

    pub fn from_columns(row_count: usize, columns: Vec<Column>) -> Result<Self, FormatError> {
        let mut table = Self::new(row_count);
        for c in columns {
            table.push_column(c.name, c.values)?;
        }
        Ok(table)
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    pub fn value(&self, row: usize, name: &str) -> Option<&CellValue> {
        self.column(name)?.values.get(row)
    }

    pub fn push_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<CellValue>,
    ) -> Result<(), FormatError> {
        let name = name.into();
        if values.len() != self.row_count {
            return Err(FormatError::ColumnLength {
                name,
                expected: self.row_count,
                found: values.len(),
            });
        }
        self.columns.push(Column { name, values });
        Ok(())
    }

    /// Replaces the first column called `name`, or appends it.
    pub fn set_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<CellValue>,
    ) -> Result<(), FormatError> {
        let name = name.into();
        match self.position(&name) {
            Some(idx) if values.len() == self.row_count => {
                self.columns[idx].values = values;
                Ok(())
            }
            _ => self.push_column(name, values),
        }
    }

    /// Renames the column at `idx`.
    pub fn rename_at(&mut self, idx: usize, to: impl Into<String>) {
        if let Some(c) = self.columns.get_mut(idx) {
            c.name = to.into();
        }
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        let idx = self.position(name)?;
        Some(self.columns.remove(idx))
    }

    /// Drops later columns whose name repeats an earlier one; returns the dropped names.
    pub fn dedup_columns(&mut self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        let mut dropped = Vec::new();
        self.columns.retain(|c| {
            if seen.contains(&c.name) {
                dropped.push(c.name.clone());
                false
            } else {
                seen.push(c.name.clone());
                true
            }
        });
        dropped
    }

    /// Moves the named columns to the front, in the given order; others keep
    /// their relative order after them (or are dropped when `keep_rest` is false).
    pub fn reorder(&mut self, front: &[String], keep_rest: bool) {
        let mut rest = std::mem::take(&mut self.columns);
        let mut ordered = Vec::with_capacity(rest.len());
        for name in front {
            if let Some(idx) = rest.iter().position(|c| &c.name == name) {
                ordered.push(rest.remove(idx));
            }
        }
        if keep_rest {
            ordered.extend(rest);
        }
        self.columns = ordered;
    }

    /// Rows at `indices`, in that order.
    pub fn take_rows(&self, indices: &[usize]) -> AttributeTable {
        let columns = self
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                values: indices
                    .iter()
                    .map(|&i| c.values.get(i).cloned().unwrap_or(CellValue::Null))
                    .collect(),
            })
            .collect();
        AttributeTable {
            columns,
            row_count: indices.len(),
        }
    }
}

/// Attribute rows paired one-to-one with geometries.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoTable {
    pub attributes: AttributeTable,
    pub geometries: Vec<Geometry<f64>>,
    /// `None` when the source carried no coordinate reference.
    pub crs: Option<Crs>,
}

impl GeoTable {
    pub fn new(
        attributes: AttributeTable,
        geometries: Vec<Geometry<f64>>,
        crs: Option<Crs>,
    ) -> Result<Self, FormatError> {
        if attributes.row_count() != geometries.len() {
            return Err(FormatError::ColumnLength {
                name: crate::GEOMETRY_COLUMN.to_string(),
                expected: attributes.row_count(),
                found: geometries.len(),
            });
        }
        Ok(Self {
            attributes,
            geometries,
            crs,
        })
    }

    pub fn len(&self) -> usize {
        self.geometries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.geometries.is_empty()
    }

    /// True when coordinates must go through a projection to become WGS84 lon/lat.
    pub fn needs_reprojection(&self) -> bool {
        matches!(&self.crs, Some(crs) if !crs.is_geographic())
    }

    /// Converts geometries to WGS84 lon/lat. Tables without a CRS pass through.
    pub fn into_wgs84(mut self) -> Self {
        let Some(crs) = self.crs.take() else {
            return self;
        };
        if !crs.is_geographic() {
            self.geometries = self
                .geometries
                .iter()
                .map(|g| {
                    g.map_coords(|Coord { x, y }| {
                        let [lon, lat] = crs.to_wgs84(x, y);
                        Coord { x: lon, y: lat }
                    })
                })
                .collect();
        }
        self.crs = Some(Crs::wgs84());
        self
    }

    pub fn bounds(&self) -> Option<Aabb2> {
        foundation::union_all(self.geometries.iter().filter_map(|g| {
            let r = g.bounding_rect()?;
            Some(Aabb2::new([r.min().x, r.min().y], [r.max().x, r.max().y]))
        }))
    }

    pub fn take_rows(&self, indices: &[usize]) -> GeoTable {
        GeoTable {
            attributes: self.attributes.take_rows(indices),
            geometries: indices.iter().map(|&i| self.geometries[i].clone()).collect(),
            crs: self.crs.clone(),
        }
    }

    /// Row-wise union. Columns appear in first-seen order; cells a table lacks are null.
    /// The result carries the first table's CRS.
    pub fn concat(tables: Vec<GeoTable>) -> GeoTable {
        let mut names: Vec<String> = Vec::new();
        for t in &tables {
            for c in t.attributes.columns() {
                if !names.contains(&c.name) {
                    names.push(c.name.clone());
                }
            }
        }

        let total: usize = tables.iter().map(GeoTable::len).sum();
        let crs = tables.first().and_then(|t| t.crs.clone());
        let mut columns: Vec<Column> = names
            .iter()
            .map(|n| Column::new(n.clone(), Vec::with_capacity(total)))
            .collect();
        let mut geometries = Vec::with_capacity(total);

        for t in tables {
            let rows = t.len();
            for col in columns.iter_mut() {
                match t.attributes.column(&col.name) {
                    Some(src) => col.values.extend(src.values.iter().cloned()),
                    None => col.values.extend(std::iter::repeat_n(CellValue::Null, rows)),
                }
            }
            geometries.extend(t.geometries);
        }

        GeoTable {
            attributes: AttributeTable {
                columns,
                row_count: total,
            },
            geometries,
            crs,
        }
    }
}
