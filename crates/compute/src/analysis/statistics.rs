use std::collections::BTreeMap;

use catalog::{LayerCatalog, LAYER_FIELD, SENTINEL};
use formats::{AttributeTable, GeoTable};
use serde::Serialize;

/// Column names accepted as surface in hectares, in preference order.
pub const SURFACE_COLUMNS: [&str; 4] = ["SUPERFICIE", "SUP_HA", "HECTAREAS", "HA"];
pub const TOP_N: usize = 10;
/// Concept labels longer than this are cut and suffixed with `...`.
pub const LABEL_CHARS: usize = 30;

/// First column whose upper-cased name is a known surface column.
pub fn surface_column(table: &AttributeTable) -> Option<&str> {
    table
        .columns()
        .iter()
        .map(|c| c.name.as_str())
        .find(|name| SURFACE_COLUMNS.contains(&name.to_uppercase().as_str()))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Totals {
    /// Agency contribution (`MONTO_CNF`).
    pub agency: f64,
    /// Beneficiary counterpart (`MONTO_PI`).
    pub partner: f64,
    pub total: f64,
    pub surface_ha: f64,
    pub projects: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ranked {
    pub label: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerAmount {
    pub code: String,
    pub display_name: String,
    pub color: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub totals: Totals,
    pub top_municipalities: Vec<Ranked>,
    pub top_concepts: Vec<Ranked>,
    pub by_regime: Vec<Ranked>,
    pub by_layer: Vec<LayerAmount>,
}

fn column_sum(table: &AttributeTable, name: &str) -> f64 {
    table.column(name).map_or(0.0, |c| {
        c.values.iter().filter_map(|v| v.to_number()).sum()
    })
}

/// `MONTO_TOT` summed per distinct value of `group`, ordered by label.
fn amount_by(table: &AttributeTable, group: &str) -> Vec<Ranked> {
    let (Some(keys), amounts) = (table.column(group), table.column("MONTO_TOT")) else {
        return Vec::new();
    };
    let mut sums: BTreeMap<String, f64> = BTreeMap::new();
    for (row, key) in keys.values.iter().enumerate() {
        let label = key.to_text().unwrap_or_else(|| SENTINEL.to_string());
        let amount = amounts
            .and_then(|c| c.values[row].to_number())
            .unwrap_or(0.0);
        *sums.entry(label).or_insert(0.0) += amount;
    }
    sums.into_iter()
        .map(|(label, amount)| Ranked { label, amount })
        .collect()
}

/// Largest `n` by amount; ties keep label order.
fn top(mut ranked: Vec<Ranked>, n: usize) -> Vec<Ranked> {
    ranked.sort_by(|a, b| b.amount.total_cmp(&a.amount));
    ranked.truncate(n);
    ranked
}

pub fn truncate_label(label: &str) -> String {
    if label.chars().count() > LABEL_CHARS {
        let head: String = label.chars().take(LABEL_CHARS).collect();
        format!("{head}...")
    } else {
        label.to_string()
    }
}

/// Dashboard figures for an already filtered set of projects.
pub fn summarize(projects: &GeoTable, catalog: &LayerCatalog) -> Summary {
    let t = &projects.attributes;
    let totals = Totals {
        agency: column_sum(t, "MONTO_CNF"),
        partner: column_sum(t, "MONTO_PI"),
        total: column_sum(t, "MONTO_TOT"),
        surface_ha: surface_column(t).map_or(0.0, |c| column_sum(t, c)),
        projects: projects.len(),
    };

    let top_concepts = top(amount_by(t, "CONCEPTO"), TOP_N)
        .into_iter()
        .map(|r| Ranked {
            label: truncate_label(&r.label),
            amount: r.amount,
        })
        .collect();

    let mut by_layer: Vec<LayerAmount> = amount_by(t, LAYER_FIELD)
        .into_iter()
        .map(|r| {
            let layer = catalog.get(&r.label);
            LayerAmount {
                display_name: layer.map_or_else(|| r.label.clone(), |l| l.display_name.clone()),
                color: layer.map_or_else(String::new, |l| l.chart_color.clone()),
                code: r.label,
                amount: r.amount,
            }
        })
        .collect();
    by_layer.sort_by(|a, b| b.amount.total_cmp(&a.amount));

    Summary {
        totals,
        top_municipalities: top(amount_by(t, "MUNICIPIO"), TOP_N),
        top_concepts,
        by_regime: amount_by(t, "TIPO_PROP"),
        by_layer,
    }
}
