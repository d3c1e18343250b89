use formats::CellValue;
use serde::Serialize;

/// Placeholder written into text fields that have no value.
pub const SENTINEL: &str = "Sin Dato";
/// Column that carries the layer code of every record.
pub const LAYER_FIELD: &str = "TIPO_CAPA";
/// Identity field used to join geometry with companion tables.
pub const JOIN_KEY: &str = "FOL_PROG";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Numeric,
}

impl FieldKind {
    /// Value synthesized when a field is absent, null or unparseable.
    pub fn default_value(self) -> CellValue {
        match self {
            FieldKind::Text => CellValue::Text(SENTINEL.to_string()),
            FieldKind::Numeric => CellValue::Number(0.0),
        }
    }

    /// Coerces a cell to this kind. Never fails; falls back to `default_value`.
    pub fn coerce(self, value: &CellValue) -> CellValue {
        match self {
            FieldKind::Numeric => CellValue::Number(value.to_number().unwrap_or(0.0)),
            FieldKind::Text => match value.to_text() {
                Some(text) => CellValue::Text(text),
                None => self.default_value(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalField {
    pub name: String,
    pub aliases: Vec<String>,
    pub kind: FieldKind,
    /// Column header used in exported tables.
    pub label: String,
}

impl CanonicalField {
    fn new(name: &str, aliases: &[&str], kind: FieldKind, label: &str) -> Self {
        Self {
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            kind,
            label: label.to_string(),
        }
    }
}

/// Fixed target schema every persisted record conforms to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalSchema {
    fields: Vec<CanonicalField>,
}

impl Default for CanonicalSchema {
    fn default() -> Self {
        use FieldKind::{Numeric, Text};
        Self {
            fields: vec![
                CanonicalField::new(JOIN_KEY, &["FOLIO", "CLAVE"], Text, "FOLIO"),
                CanonicalField::new("MONTO_TOT", &["MONTO"], Numeric, "INVERSIÓN_TOTAL"),
                CanonicalField::new("MONTO_CNF", &["CNF"], Numeric, "MONTO_CONAFOR"),
                CanonicalField::new("MONTO_PI", &["PI"], Numeric, "CONTRAPARTE"),
                CanonicalField::new("SUPERFICIE", &["SUP_HA"], Numeric, "SUPERFICIE_HA"),
                CanonicalField::new("MUNICIPIO", &["MUN"], Text, "MUNICIPIO"),
                CanonicalField::new("ESTADO", &["EDO"], Text, "ESTADO"),
                CanonicalField::new("TIPO_PROP", &["REGIMEN"], Text, "RÉGIMEN"),
                CanonicalField::new("CONCEPTO", &["CONCEPTO"], Text, "CONCEPTO"),
                CanonicalField::new("SOLICITANT", &["BENEFICIARIO"], Text, "BENEFICIARIO"),
                CanonicalField::new("EJERCICIO", &["ANIO", "AÑO", "YEAR", "EJER"], Text, "EJERCICIO"),
            ],
        }
    }
}

impl CanonicalSchema {
    pub fn fields(&self) -> &[CanonicalField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&CanonicalField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Aliases registered for `name`; empty for names outside the schema.
    pub fn aliases_for(&self, name: &str) -> &[String] {
        self.field(name).map(|f| f.aliases.as_slice()).unwrap_or(&[])
    }

    pub fn join_key(&self) -> &CanonicalField {
        // The default schema always starts with the join key.
        &self.fields[0]
    }

    pub fn layer_field(&self) -> &str {
        LAYER_FIELD
    }

    /// Canonical names in schema order followed by the layer field.
    pub fn output_columns(&self) -> Vec<String> {
        self.fields
            .iter()
            .map(|f| f.name.clone())
            .chain(std::iter::once(LAYER_FIELD.to_string()))
            .collect()
    }

    /// `(column, header)` pairs for exported tables, in export order.
    pub fn export_columns(&self) -> Vec<(String, String)> {
        const ORDER: [&str; 11] = [
            JOIN_KEY,
            "SOLICITANT",
            "ESTADO",
            "MUNICIPIO",
            "TIPO_PROP",
            LAYER_FIELD,
            "CONCEPTO",
            "MONTO_TOT",
            "MONTO_CNF",
            "MONTO_PI",
            "SUPERFICIE",
        ];
        ORDER
            .iter()
            .map(|name| {
                let label = match self.field(name) {
                    Some(f) => f.label.clone(),
                    None => "CATEGORÍA".to_string(),
                };
                (name.to_string(), label)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn schema_order_and_kinds() {
        let s = CanonicalSchema::default();
        assert_eq!(
            s.output_columns(),
            vec![
                "FOL_PROG", "MONTO_TOT", "MONTO_CNF", "MONTO_PI", "SUPERFICIE", "MUNICIPIO",
                "ESTADO", "TIPO_PROP", "CONCEPTO", "SOLICITANT", "EJERCICIO", "TIPO_CAPA",
            ]
        );
        assert_eq!(
            s.fields()
                .iter()
                .filter(|f| f.kind == FieldKind::Numeric)
                .map(|f| f.name.as_str())
                .collect::<Vec<_>>(),
            vec!["MONTO_TOT", "MONTO_CNF", "MONTO_PI", "SUPERFICIE"]
        );
        assert_eq!(s.join_key().name, JOIN_KEY);
        assert_eq!(s.aliases_for("FOL_PROG"), ["FOLIO", "CLAVE"]);
        assert!(s.aliases_for("NOPE").is_empty());
    }

    #[test]
    fn default_policy_per_kind() {
        assert_eq!(FieldKind::Numeric.default_value(), CellValue::Number(0.0));
        assert_eq!(
            FieldKind::Text.default_value(),
            CellValue::Text("Sin Dato".to_string())
        );
    }

    #[test]
    fn coercion_never_fails() {
        let n = FieldKind::Numeric;
        assert_eq!(n.coerce(&CellValue::Text(" 12.5 ".into())), CellValue::Number(12.5));
        assert_eq!(n.coerce(&CellValue::Text("n/a".into())), CellValue::Number(0.0));
        assert_eq!(n.coerce(&CellValue::Number(f64::NAN)), CellValue::Number(0.0));
        assert_eq!(n.coerce(&CellValue::Null), CellValue::Number(0.0));

        let t = FieldKind::Text;
        assert_eq!(t.coerce(&CellValue::Number(1234.0)), CellValue::Text("1234".into()));
        assert_eq!(t.coerce(&CellValue::Null), CellValue::Text("Sin Dato".into()));
    }

    #[test]
    fn export_headers() {
        let cols = CanonicalSchema::default().export_columns();
        assert_eq!(cols[0], ("FOL_PROG".to_string(), "FOLIO".to_string()));
        assert_eq!(cols[5], ("TIPO_CAPA".to_string(), "CATEGORÍA".to_string()));
        assert_eq!(cols[10], ("SUPERFICIE".to_string(), "SUPERFICIE_HA".to_string()));
    }
}
