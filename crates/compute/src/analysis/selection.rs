use catalog::{LayerCatalog, LAYER_FIELD};
use formats::GeoTable;
use serde::Serialize;
use tracing::debug;

/// Layer codes to show, in catalog order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerSelection {
    codes: Vec<String>,
}

impl LayerSelection {
    pub fn all(catalog: &LayerCatalog) -> Self {
        Self {
            codes: catalog.codes().map(str::to_string).collect(),
        }
    }

    /// Parses a comma separated list such as `psa, PFC`. `None` selects every
    /// layer; an empty string selects none. Codes outside the catalog are ignored.
    pub fn parse(raw: Option<&str>, catalog: &LayerCatalog) -> Self {
        let Some(raw) = raw else {
            return Self::all(catalog);
        };
        let wanted: Vec<&str> = raw.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
        let mut codes = Vec::new();
        for layer in catalog.layers() {
            if wanted.iter().any(|w| w.eq_ignore_ascii_case(&layer.code)) {
                codes.push(layer.code.clone());
            }
        }
        for w in &wanted {
            if catalog.resolve(w).is_err() {
                debug!("ignoring unknown layer '{w}' in selection");
            }
        }
        Self { codes }
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes.iter().any(|c| c == code)
    }
}

/// Rows whose layer field is one of the selected codes.
pub fn filter_layers(table: &GeoTable, selection: &LayerSelection) -> GeoTable {
    let Some(column) = table.attributes.column(LAYER_FIELD) else {
        return table.take_rows(&[]);
    };
    let rows: Vec<usize> = column
        .values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.to_text().is_some_and(|code| selection.contains(code.trim())))
        .map(|(i, _)| i)
        .collect();
    table.take_rows(&rows)
}

/// A catalog layer with the number of records currently published for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerOverview {
    pub code: String,
    pub display_name: String,
    pub map_color: String,
    pub chart_color: String,
    pub records: usize,
}

pub fn layer_overview(catalog: &LayerCatalog, projects: Option<&GeoTable>) -> Vec<LayerOverview> {
    let codes = projects.and_then(|t| t.attributes.column(LAYER_FIELD));
    catalog
        .layers()
        .iter()
        .map(|layer| LayerOverview {
            code: layer.code.clone(),
            display_name: layer.display_name.clone(),
            map_color: layer.map_color.clone(),
            chart_color: layer.chart_color.clone(),
            records: codes.map_or(0, |c| {
                c.values
                    .iter()
                    .filter(|v| v.as_str().is_some_and(|s| s.trim() == layer.code))
                    .count()
            }),
        })
        .collect()
}
