use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::CatalogError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDefinition {
    /// Short code stored in every record and used in artifact file names.
    pub code: String,
    pub display_name: String,
    /// Fill color on the map, `#rrggbb`.
    pub map_color: String,
    /// Bar color in the per-layer chart, `#rrggbb`.
    pub chart_color: String,
}

impl LayerDefinition {
    pub fn new(code: &str, display_name: &str, map_color: &str, chart_color: &str) -> Self {
        Self {
            code: code.to_string(),
            display_name: display_name.to_string(),
            map_color: map_color.to_string(),
            chart_color: chart_color.to_string(),
        }
    }
}

/// Layers in display order. Built once at start-up and shared behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerCatalog {
    layers: Vec<LayerDefinition>,
}

#[derive(Deserialize)]
struct CatalogFile {
    layers: Vec<LayerDefinition>,
}

impl LayerCatalog {
    pub fn new(layers: Vec<LayerDefinition>) -> Result<Self, CatalogError> {
        if layers.is_empty() {
            return Err(CatalogError::Empty);
        }
        for (i, layer) in layers.iter().enumerate() {
            validate(layer)?;
            if layers[..i].iter().any(|l| l.code == layer.code) {
                return Err(CatalogError::DuplicateLayer(layer.code.clone()));
            }
        }
        Ok(Self { layers })
    }

    /// The four programs the dashboard ships with.
    pub fn builtin() -> Self {
        Self {
            layers: vec![
                LayerDefinition::new("PSA", "Servicios Ambientales", "#28a745", "#13322B"),
                LayerDefinition::new(
                    "PFC",
                    "Plantaciones Forestales Comerciales",
                    "#ffc107",
                    "#9D2449",
                ),
                LayerDefinition::new("MFC", "Manejo Forestal Comunitario", "#17a2b8", "#DDC9A3"),
                LayerDefinition::new("CA", "Compensación Ambiental", "#6f42c1", "#6c757d"),
            ],
        }
    }

    /// Parses `{ "layers": [ { "code": .., "display_name": .., "map_color": .., "chart_color": .. } ] }`.
    pub fn from_json(text: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile =
            serde_json::from_str(text).map_err(|e| CatalogError::Corrupt(e.to_string()))?;
        Self::new(file.layers)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Io(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn layers(&self) -> &[LayerDefinition] {
        &self.layers
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|l| l.code.as_str())
    }

    pub fn get(&self, code: &str) -> Option<&LayerDefinition> {
        self.layers.iter().find(|l| l.code == code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.get(code).is_some()
    }

    /// Looks up a layer by code, tolerating surrounding whitespace and case.
    pub fn resolve(&self, code: &str) -> Result<&LayerDefinition, CatalogError> {
        let wanted = code.trim();
        self.layers
            .iter()
            .find(|l| l.code.eq_ignore_ascii_case(wanted))
            .ok_or_else(|| CatalogError::UnknownLayer(wanted.to_string()))
    }
}

fn validate(layer: &LayerDefinition) -> Result<(), CatalogError> {
    let invalid = |reason: &str| CatalogError::InvalidLayer {
        code: layer.code.clone(),
        reason: reason.to_string(),
    };
    // Codes end up in file names.
    if layer.code.is_empty()
        || !layer
            .code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(invalid("code must be non-empty ASCII letters, digits or '_'"));
    }
    for color in [&layer.map_color, &layer.chart_color] {
        if !is_hex_color(color) {
            return Err(invalid(&format!("'{color}' is not a #rrggbb color")));
        }
    }
    Ok(())
}

fn is_hex_color(s: &str) -> bool {
    s.len() == 7
        && s.starts_with('#')
        && s[1..].chars().all(|c| c.is_ascii_hexdigit())
}
