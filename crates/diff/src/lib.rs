//! Snapshot diffing and conflict detection.
//!
//! Comparison is structural and exact: a number never equals its text
//! rendering, and there is no numeric tolerance. Empty and absent cells are
//! the same thing. This crate only *reports* divergence; refusing to proceed
//! on a conflict is up to whoever calls it.

use serde::Serialize;
use sheetgate_core::{
    A1Range, CellRef, CellValue, FORMATS_PROPERTY, Intent, IntentKind, SHEETS_PROPERTY, Snapshot,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// How an entry changed between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

/// One difference between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum Change {
    Cell {
        cell: CellRef,
        kind: ChangeKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        before: Option<CellValue>,
        #[serde(skip_serializing_if = "Option::is_none")]
        after: Option<CellValue>,
    },
    Property {
        key: String,
        kind: ChangeKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        before: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        after: Option<serde_json::Value>,
    },
}

impl Change {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Change::Cell { kind, .. } | Change::Property { kind, .. } => *kind,
        }
    }
}

/// Counts per change kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

/// The result of comparing two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diff {
    pub changes: Vec<Change>,
    /// True when state changed somewhere the caller did not mutate.
    pub conflict: bool,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn summary(&self) -> DiffSummary {
        let mut summary = DiffSummary::default();
        for change in &self.changes {
            match change.kind() {
                ChangeKind::Added => summary.added += 1,
                ChangeKind::Removed => summary.removed += 1,
                ChangeKind::Modified => summary.modified += 1,
            }
        }
        summary
    }
}

// ── Controlled paths ────────────────────────────────────────────────────────

/// The parts of a container a caller changed on purpose.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlledPaths {
    pub ranges: Vec<A1Range>,
    pub properties: BTreeSet<String>,
}

impl ControlledPaths {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_range(mut self, range: A1Range) -> Self {
        self.ranges.push(range);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>) -> Self {
        self.properties.insert(key.into());
        self
    }

    /// The footprint of every mutating Intent in `intents`.
    ///
    /// Appends control everything below their start row. Sheet changes
    /// control the sheet list and whole sheet they name.
    pub fn from_intents(intents: &[Intent]) -> Self {
        let mut paths = Self::new();
        for intent in intents {
            match intent.kind() {
                IntentKind::ReadRange { .. } => {}
                IntentKind::WriteRange { range, .. } | IntentKind::ClearRange { range } => {
                    paths.ranges.push(range.clone());
                }
                IntentKind::AppendRows { range, .. } => paths.ranges.push(range.extend_down()),
                IntentKind::FormatCells { range, .. } => {
                    paths.ranges.push(range.clone());
                    paths.properties.insert(FORMATS_PROPERTY.to_string());
                }
                IntentKind::AddSheet { title } | IntentKind::DeleteSheet { title } => {
                    paths.ranges.push(A1Range::whole_sheet(Some(title)));
                    paths.properties.insert(SHEETS_PROPERTY.to_string());
                }
            }
        }
        paths
    }

    fn covers_cell(&self, cell: &CellRef, default_sheet: &str) -> bool {
        self.ranges.iter().any(|r| cell.within(r, default_sheet))
    }

    fn covers(&self, change: &Change, default_sheet: &str) -> bool {
        match change {
            Change::Cell { cell, .. } => self.covers_cell(cell, default_sheet),
            Change::Property { key, .. } => self.properties.contains(key),
        }
    }
}

// ── Comparison ──────────────────────────────────────────────────────────────

/// Compare two snapshots. With no controlled paths, any change is a conflict.
pub fn diff(before: &Snapshot, after: &Snapshot) -> Diff {
    diff_controlled(before, after, &ControlledPaths::default())
}

/// Compare two snapshots, flagging a conflict when anything changed outside
/// `controlled`.
pub fn diff_controlled(before: &Snapshot, after: &Snapshot, controlled: &ControlledPaths) -> Diff {
    let mut changes = cell_changes(&before.cells, &after.cells);
    changes.extend(property_changes(&before.properties, &after.properties));

    let default_sheet = after.default_sheet.as_str();
    let conflict = changes.iter().any(|c| !controlled.covers(c, default_sheet));
    if conflict {
        debug!(
            container = %after.container,
            changes = changes.len(),
            "Snapshot diverged outside controlled paths"
        );
    }
    Diff { changes, conflict }
}

/// Whether `actual` diverges from what the caller expected to find.
pub fn detect_conflict(expected_before: &Snapshot, actual_current: &Snapshot) -> bool {
    diff(expected_before, actual_current).conflict
}

fn cell_changes(
    before: &BTreeMap<CellRef, CellValue>,
    after: &BTreeMap<CellRef, CellValue>,
) -> Vec<Change> {
    let present = |v: &&CellValue| !v.is_empty();
    let mut changes = Vec::new();

    for (cell, old) in before {
        let new = after.get(cell).filter(present);
        match (old.is_empty(), new) {
            (true, None) => {}
            (true, Some(new)) => changes.push(Change::Cell {
                cell: cell.clone(),
                kind: ChangeKind::Added,
                before: None,
                after: Some(new.clone()),
            }),
            (false, None) => changes.push(Change::Cell {
                cell: cell.clone(),
                kind: ChangeKind::Removed,
                before: Some(old.clone()),
                after: None,
            }),
            (false, Some(new)) if old.same_as(new) => {}
            (false, Some(new)) => changes.push(Change::Cell {
                cell: cell.clone(),
                kind: ChangeKind::Modified,
                before: Some(old.clone()),
                after: Some(new.clone()),
            }),
        }
    }

    for (cell, new) in after {
        if !before.contains_key(cell) && !new.is_empty() {
            changes.push(Change::Cell {
                cell: cell.clone(),
                kind: ChangeKind::Added,
                before: None,
                after: Some(new.clone()),
            });
        }
    }

    changes.sort_by(|a, b| match (a, b) {
        (Change::Cell { cell: x, .. }, Change::Cell { cell: y, .. }) => x.cmp(y),
        _ => std::cmp::Ordering::Equal,
    });
    changes
}

fn property_changes(
    before: &BTreeMap<String, serde_json::Value>,
    after: &BTreeMap<String, serde_json::Value>,
) -> Vec<Change> {
    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    keys.into_iter()
        .filter_map(|key| {
            let old = before.get(key);
            let new = after.get(key);
            let kind = match (old, new) {
                (None, Some(_)) => ChangeKind::Added,
                (Some(_), None) => ChangeKind::Removed,
                (Some(a), Some(b)) if a != b => ChangeKind::Modified,
                _ => return None,
            };
            Some(Change::Property {
                key: key.clone(),
                kind,
                before: old.cloned(),
                after: new.cloned(),
            })
        })
        .collect()
}
