//! Cell values as the external service represents them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single cell value.
///
/// Serialized untagged so a grid reads naturally as JSON:
/// `[["Name", 3, true, null]]`. Formulas are text beginning with `=`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
}

/// A row-major grid of values.
pub type Grid = Vec<Vec<CellValue>>;

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn is_formula(&self) -> bool {
        matches!(self, CellValue::Text(s) if s.starts_with('='))
    }

    /// Exact, type-aware equality. `Number(1.0)` never equals `Text("1")`;
    /// NaN equals NaN so an unchanged error cell is not reported as modified.
    pub fn same_as(&self, other: &CellValue) -> bool {
        match (self, other) {
            (a, b) if a.is_empty() && b.is_empty() => true,
            (CellValue::Bool(a), CellValue::Bool(b)) => a == b,
            (CellValue::Number(a), CellValue::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (CellValue::Text(a), CellValue::Text(b)) => a == b,
            _ => false,
        }
    }

    /// Short type label used in diff output.
    pub fn type_name(&self) -> &'static str {
        match self {
            CellValue::Empty => "empty",
            CellValue::Bool(_) => "bool",
            CellValue::Number(_) => "number",
            CellValue::Text(s) if s.starts_with('=') => "formula",
            CellValue::Text(_) => "text",
        }
    }
}

impl PartialEq for CellValue {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::Text(s) => write!(f, "{s}"),
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
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Number(n as f64)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}
