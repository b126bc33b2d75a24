//! Intents: immutable logical operations issued by tool handlers.
//!
//! An Intent says *what* should happen to one spreadsheet (the container). It
//! knows nothing about how it will be batched; the batch compiler decides that.

use crate::range::A1Range;
use crate::value::Grid;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// The spreadsheet an Intent targets. Intents on different containers never
/// share a physical call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The closed set of logical operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntentKind {
    /// Read the values in a range.
    ReadRange { range: A1Range },

    /// Overwrite a range with a grid, anchored at the range's top-left cell.
    WriteRange { range: A1Range, values: Grid },

    /// Append rows after the last non-empty row of the table at `range`.
    AppendRows { range: A1Range, values: Grid },

    /// Clear values (not formats) in a range.
    ClearRange { range: A1Range },

    /// Apply a cell format (opaque to the engine) to a range.
    FormatCells {
        range: A1Range,
        format: serde_json::Value,
    },

    /// Add a sheet with the given title.
    AddSheet { title: String },

    /// Delete the sheet with the given title.
    DeleteSheet { title: String },
}

impl IntentKind {
    /// Stable snake_case label, matching the serialized `kind` tag.
    pub fn label(&self) -> &'static str {
        match self {
            IntentKind::ReadRange { .. } => "read_range",
            IntentKind::WriteRange { .. } => "write_range",
            IntentKind::AppendRows { .. } => "append_rows",
            IntentKind::ClearRange { .. } => "clear_range",
            IntentKind::FormatCells { .. } => "format_cells",
            IntentKind::AddSheet { .. } => "add_sheet",
            IntentKind::DeleteSheet { .. } => "delete_sheet",
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, IntentKind::ReadRange { .. })
    }

    /// The range the operation addresses, if it addresses one.
    pub fn range(&self) -> Option<&A1Range> {
        match self {
            IntentKind::ReadRange { range }
            | IntentKind::WriteRange { range, .. }
            | IntentKind::AppendRows { range, .. }
            | IntentKind::ClearRange { range }
            | IntentKind::FormatCells { range, .. } => Some(range),
            IntentKind::AddSheet { .. } | IntentKind::DeleteSheet { .. } => None,
        }
    }
}

/// A content-derived idempotency key (hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(pub String);

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single logical operation.
///
/// Immutable once built: fields are private and the idempotency key is derived
/// from the content at construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Intent {
    target: ContainerId,
    #[serde(flatten)]
    kind: IntentKind,
    key: IdempotencyKey,
}

impl Intent {
    pub fn new(target: impl Into<String>, kind: IntentKind) -> Self {
        let target = ContainerId::new(target);
        let key = derive_key(&target, &kind);
        Self { target, kind, key }
    }

    pub fn read(target: impl Into<String>, range: A1Range) -> Self {
        Self::new(target, IntentKind::ReadRange { range })
    }

    pub fn write(target: impl Into<String>, range: A1Range, values: Grid) -> Self {
        Self::new(target, IntentKind::WriteRange { range, values })
    }

    pub fn append(target: impl Into<String>, range: A1Range, values: Grid) -> Self {
        Self::new(target, IntentKind::AppendRows { range, values })
    }

    pub fn clear(target: impl Into<String>, range: A1Range) -> Self {
        Self::new(target, IntentKind::ClearRange { range })
    }

    pub fn format(target: impl Into<String>, range: A1Range, format: serde_json::Value) -> Self {
        Self::new(target, IntentKind::FormatCells { range, format })
    }

    pub fn add_sheet(target: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(target, IntentKind::AddSheet { title: title.into() })
    }

    pub fn delete_sheet(target: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(target, IntentKind::DeleteSheet { title: title.into() })
    }

    pub fn target(&self) -> &ContainerId {
        &self.target
    }

    pub fn kind(&self) -> &IntentKind {
        &self.kind
    }

    pub fn key(&self) -> &IdempotencyKey {
        &self.key
    }
}

/// Wire shape accepted from tool handlers: `{"target": "...", "kind": "...", ...}`.
/// The key is always recomputed; a caller-supplied one is ignored.
#[derive(Deserialize)]
struct IntentWire {
    target: ContainerId,
    #[serde(flatten)]
    kind: IntentKind,
}

impl<'de> Deserialize<'de> for Intent {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = IntentWire::deserialize(deserializer)?;
        Ok(Intent::new(wire.target.0, wire.kind))
    }
}

fn derive_key(target: &ContainerId, kind: &IntentKind) -> IdempotencyKey {
    let canonical = serde_json::json!({ "target": target, "op": kind });
    IdempotencyKey(sha256_hex(&canonical))
}

/// Hex SHA-256 of a JSON value's canonical text.
///
/// `serde_json::Value` keeps object keys sorted, so two payloads that differ
/// only in key order hash identically.
pub fn sha256_hex(value: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::CellValue;

    fn range(s: &str) -> A1Range {
        s.parse().unwrap()
    }

    #[test]
    fn key_is_content_derived() {
        let a = Intent::write("sheet-1", range("A1"), vec![vec![CellValue::from("x")]]);
        let b = Intent::write("sheet-1", range("A1"), vec![vec![CellValue::from("x")]]);
        let c = Intent::write("sheet-1", range("A1"), vec![vec![CellValue::from("y")]]);
        let d = Intent::write("sheet-2", range("A1"), vec![vec![CellValue::from("x")]]);
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
        assert_ne!(a.key(), d.key());
        assert_eq!(a.key().0.len(), 64);
    }

    #[test]
    fn key_ignores_object_key_order() {
        let a: Intent = serde_json::from_str(
            r#"{"target":"s","kind":"format_cells","range":"A1:A5","format":{"bold":true,"italic":false}}"#,
        )
        .unwrap();
        let b: Intent = serde_json::from_str(
            r#"{"format":{"italic":false,"bold":true},"range":"A1:A5","kind":"format_cells","target":"s"}"#,
        )
        .unwrap();
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn wire_roundtrip() {
        let intent = Intent::append("s", range("Log!A1:C1"), vec![vec![1i64.into(), "ok".into()]]);
        let json = serde_json::to_value(&intent).unwrap();
        assert_eq!(json["kind"], "append_rows");
        assert_eq!(json["target"], "s");
        assert_eq!(json["range"], "Log!A1:C1");

        let back: Intent = serde_json::from_value(json).unwrap();
        assert_eq!(back, intent);
    }

    #[test]
    fn unknown_kind_rejected() {
        let result: Result<Intent, _> =
            serde_json::from_str(r#"{"target":"s","kind":"make_chart","range":"A1"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn kind_helpers() {
        let read = Intent::read("s", range("A1:B2"));
        assert!(read.kind().is_read());
        assert_eq!(read.kind().label(), "read_range");
        assert!(Intent::add_sheet("s", "New").kind().range().is_none());
    }
}
