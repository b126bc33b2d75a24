//! Snapshots: point-in-time captures of a container, used only for diffing.

use crate::intent::ContainerId;
use crate::range::A1Range;
use crate::value::CellValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Property holding the ordered list of sheet titles.
pub const SHEETS_PROPERTY: &str = "sheets";

/// Property holding applied formats, keyed by range.
pub const FORMATS_PROPERTY: &str = "formats";

/// Address of one cell inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellRef {
    pub sheet: String,
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub fn new(sheet: impl Into<String>, row: u32, col: u32) -> Self {
        Self {
            sheet: sheet.into(),
            row,
            col,
        }
    }

    /// Whether the cell lies inside `range`. An unnamed range sheet matches
    /// `default_sheet` only.
    pub fn within(&self, range: &A1Range, default_sheet: &str) -> bool {
        let sheet = range.sheet.as_deref().unwrap_or(default_sheet);
        sheet == self.sheet && range.contains_cell(self.row, self.col)
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let range = A1Range::cell(Some(&self.sheet), self.row, self.col);
        write!(f, "{range}")
    }
}

/// A timestamped capture of a container's values and properties.
///
/// Empty cells are not stored; absence and emptiness are the same thing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub container: ContainerId,
    pub captured_at: DateTime<Utc>,
    /// The sheet an unnamed range refers to.
    pub default_sheet: String,
    #[serde(with = "cell_list")]
    pub cells: BTreeMap<CellRef, CellValue>,
    /// Shape-level properties: sheet list, formats, anything non-cell.
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl Snapshot {
    pub fn new(container: ContainerId, default_sheet: impl Into<String>) -> Self {
        Self {
            container,
            captured_at: Utc::now(),
            default_sheet: default_sheet.into(),
            cells: BTreeMap::new(),
            properties: BTreeMap::new(),
        }
    }

    /// Set a cell, dropping it when the value is empty.
    pub fn set(&mut self, cell: CellRef, value: CellValue) {
        if value.is_empty() {
            self.cells.remove(&cell);
        } else {
            self.cells.insert(cell, value);
        }
    }

    pub fn get(&self, cell: &CellRef) -> Option<&CellValue> {
        self.cells.get(cell)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.properties.insert(key.into(), value);
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// JSON object keys must be strings, so cells travel as a list of entries.
mod cell_list {
    use super::{CellRef, CellValue};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize)]
    struct Entry {
        #[serde(flatten)]
        cell: CellRef,
        value: CellValue,
    }

    pub fn serialize<S: Serializer>(
        cells: &BTreeMap<CellRef, CellValue>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let entries: Vec<Entry> = cells
            .iter()
            .map(|(cell, value)| Entry {
                cell: cell.clone(),
                value: value.clone(),
            })
            .collect();
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<CellRef, CellValue>, D::Error> {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        Ok(entries
            .into_iter()
            .filter(|e| !e.value.is_empty())
            .map(|e| (e.cell, e.value))
            .collect())
    }
}
