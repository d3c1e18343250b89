//! Column name resolution against the canonical schema.
//!
//! [`resolve_column`] is the lenient single-field lookup. [`map_schema`] maps
//! all canonical fields at once and is stricter: exact names are reserved
//! before any fuzzy matching, a source column backs at most one field, and
//! short aliases must match a whole name token (`PI` matches `MONTO_PI` but not
//! `MUNICIPIO`).
//! [`ColumnResolver`] adds the schema's registered aliases to the lenient
//! lookup; merging uses it to find the join key on both sides.

use catalog::CanonicalSchema;
use tracing::debug;

/// Aliases shorter than this match whole tokens only.
const SHORT_ALIAS_CHARS: usize = 4;

/// First column matching `target`: an exact case-insensitive hit wins,
/// otherwise the first column whose uppercased name contains `target` or one
/// of `aliases` (tried in that order).
pub fn resolve_column<'a, S: AsRef<str>>(
    columns: &'a [S],
    target: &str,
    aliases: &[&str],
) -> Option<&'a str> {
    let target_upper = target.to_uppercase();
    if let Some(hit) = columns
        .iter()
        .find(|c| c.as_ref().to_uppercase() == target_upper)
    {
        return Some(hit.as_ref());
    }
    std::iter::once(target)
        .chain(aliases.iter().copied())
        .map(str::to_uppercase)
        .find_map(|candidate| {
            columns
                .iter()
                .find(|c| c.as_ref().to_uppercase().contains(&candidate))
                .map(AsRef::as_ref)
        })
}

/// [`resolve_column`] with the aliases the schema registers for `target`
/// appended to the caller's.
#[derive(Debug, Clone, Copy)]
pub struct ColumnResolver<'s> {
    schema: &'s CanonicalSchema,
}

impl<'s> ColumnResolver<'s> {
    pub fn new(schema: &'s CanonicalSchema) -> Self {
        Self { schema }
    }

    pub fn resolve<'a, S: AsRef<str>>(
        &self,
        columns: &'a [S],
        target: &str,
        extra: &[&str],
    ) -> Option<&'a str> {
        let mut aliases: Vec<&str> = extra.to_vec();
        aliases.extend(self.schema.aliases_for(target).iter().map(String::as_str));
        resolve_column(columns, target, &aliases)
    }
}

fn tokens(name: &str) -> impl Iterator<Item = &str> {
    name.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty())
}

fn candidate_matches(column_upper: &str, candidate_upper: &str) -> bool {
    if candidate_upper.chars().count() < SHORT_ALIAS_CHARS {
        tokens(column_upper).any(|t| t == candidate_upper)
    } else {
        column_upper.contains(candidate_upper)
    }
}

/// Source column chosen for one canonical field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMatch {
    pub field: String,
    /// `None` when nothing in the source backs the field.
    pub column: Option<String>,
}

/// Maps every canonical field to at most one distinct source column.
pub fn map_schema<S: AsRef<str>>(columns: &[S], schema: &CanonicalSchema) -> Vec<FieldMatch> {
    let upper: Vec<String> = columns.iter().map(|c| c.as_ref().to_uppercase()).collect();
    let mut claimed = vec![false; columns.len()];
    let mut matches: Vec<FieldMatch> = schema
        .fields()
        .iter()
        .map(|f| FieldMatch {
            field: f.name.clone(),
            column: None,
        })
        .collect();

    // Pass 1: exact names.
    for (m, field) in matches.iter_mut().zip(schema.fields()) {
        let wanted = field.name.to_uppercase();
        if let Some(i) = (0..columns.len()).find(|&i| !claimed[i] && upper[i] == wanted) {
            claimed[i] = true;
            m.column = Some(columns[i].as_ref().to_string());
        }
    }

    // Pass 2: substring / token matches over what is left, in schema order.
    for (m, field) in matches.iter_mut().zip(schema.fields()) {
        if m.column.is_some() {
            continue;
        }
        let candidates = std::iter::once(&field.name).chain(field.aliases.iter());
        let hit = candidates.map(|c| c.to_uppercase()).find_map(|candidate| {
            (0..columns.len()).find(|&i| !claimed[i] && candidate_matches(&upper[i], &candidate))
        });
        if let Some(i) = hit {
            claimed[i] = true;
            debug!("column '{}' resolved as {}", columns[i].as_ref(), field.name);
            m.column = Some(columns[i].as_ref().to_string());
        }
    }
    matches
}
