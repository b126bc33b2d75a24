//! In-memory spreadsheet backend: useful for testing, demos and dry runs.
//!
//! [`InMemorySheets`] implements [`SheetsClient`] against workbooks held in a
//! map. Fragments are applied in order and answered one by one, like the real
//! service's batch endpoint. Faults can be queued to exercise the resilience
//! layer deterministically.

use async_trait::async_trait;
use chrono::Utc;
use sheetgate_core::{
    A1Range, BatchReply, CellRef, CellValue, ClientCapabilities, ContainerId, ExternalError,
    FORMATS_PROPERTY, FragmentOp, FragmentReply, Grid, PhysicalCall, RangeValues, SHEETS_PROPERTY,
    SheetsClient, Snapshot, UpdateSummary,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// A failure to inject into the next physical call.
#[derive(Debug, Clone)]
pub enum Fault {
    /// The whole call fails.
    FailCall(ExternalError),
    /// One fragment fails; the others are applied.
    FailFragment { index: usize, error: ExternalError },
}

#[derive(Debug, Clone)]
struct Sheet {
    id: u64,
    title: String,
    cells: BTreeMap<(u32, u32), CellValue>,
}

impl Sheet {
    /// Last populated row and column, if any.
    fn extent(&self) -> Option<(u32, u32)> {
        let max_row = self.cells.keys().map(|(r, _)| *r).max()?;
        let max_col = self.cells.keys().map(|(_, c)| *c).max()?;
        Some((max_row, max_col))
    }

    fn read(&self, range: &A1Range) -> Grid {
        let Some((max_row, max_col)) = self.extent() else {
            return Vec::new();
        };
        let area = range.clamp(max_row, max_col);
        if area.start_row > area.end_row || area.start_col > area.end_col {
            return Vec::new();
        }

        let mut grid: Grid = (area.start_row..=area.end_row)
            .map(|row| {
                let mut line: Vec<CellValue> = (area.start_col..=area.end_col)
                    .map(|col| self.cells.get(&(row, col)).cloned().unwrap_or_default())
                    .collect();
                while line.last().is_some_and(CellValue::is_empty) {
                    line.pop();
                }
                line
            })
            .collect();
        while grid.last().is_some_and(Vec::is_empty) {
            grid.pop();
        }
        grid
    }

    /// Write `values` with its top-left at (`row`, `col`), clipped to `bounds`.
    fn write(&mut self, row: u32, col: u32, values: &Grid, bounds: &A1Range) -> UpdateSummary {
        let mut written: Grid = Vec::new();
        let mut max_cols = 0u32;
        for (dr, line) in values.iter().enumerate() {
            let Some(r) = row.checked_add(dr as u32).filter(|r| *r <= bounds.end_row) else {
                break;
            };
            let mut stored = Vec::new();
            for (dc, value) in line.iter().enumerate() {
                let Some(c) = col.checked_add(dc as u32).filter(|c| *c <= bounds.end_col) else {
                    break;
                };
                if value.is_empty() {
                    self.cells.remove(&(r, c));
                } else {
                    self.cells.insert((r, c), value.clone());
                }
                stored.push(value.clone());
            }
            max_cols = max_cols.max(stored.len() as u32);
            written.push(stored);
        }

        let rows = written.len() as u32;
        let updated_range = if rows == 0 || max_cols == 0 {
            A1Range::cell(Some(&self.title), row, col)
        } else {
            A1Range::new(
                Some(&self.title),
                row,
                col,
                row.saturating_add(rows - 1),
                col.saturating_add(max_cols - 1),
            )
        };
        UpdateSummary {
            updated_range,
            updated_rows: rows,
            updated_columns: max_cols,
            updated_cells: written.iter().map(|l| l.len() as u32).sum(),
            values: Some(written),
        }
    }

    fn clear(&mut self, range: &A1Range) {
        self.cells
            .retain(|(row, col), _| !range.contains_cell(*row, *col));
    }
}

#[derive(Debug, Clone, Default)]
struct Workbook {
    sheets: Vec<Sheet>,
    formats: BTreeMap<String, serde_json::Value>,
}

impl Workbook {
    fn sheet_index(&self, range_sheet: Option<&str>) -> Result<usize, ExternalError> {
        match range_sheet {
            None if !self.sheets.is_empty() => Ok(0),
            None => Err(ExternalError::from_status(400, "workbook has no sheets")),
            Some(title) => self
                .sheets
                .iter()
                .position(|s| s.title == title)
                .ok_or_else(|| {
                    ExternalError::from_status(400, format!("Unable to parse range: no sheet named '{title}'"))
                }),
        }
    }

    fn sheet_mut(&mut self, range: &A1Range) -> Result<&mut Sheet, ExternalError> {
        let index = self.sheet_index(range.sheet.as_deref())?;
        Ok(&mut self.sheets[index])
    }

    fn sheet(&self, range: &A1Range) -> Result<&Sheet, ExternalError> {
        let index = self.sheet_index(range.sheet.as_deref())?;
        Ok(&self.sheets[index])
    }
}

/// A spreadsheet service held entirely in memory.
pub struct InMemorySheets {
    name: String,
    capabilities: ClientCapabilities,
    latency: Duration,
    workbooks: RwLock<HashMap<ContainerId, Workbook>>,
    faults: Mutex<VecDeque<Fault>>,
    call_count: AtomicUsize,
    next_sheet_id: AtomicU64,
}

impl InMemorySheets {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: ClientCapabilities::default(),
            latency: Duration::ZERO,
            workbooks: RwLock::new(HashMap::new()),
            faults: Mutex::new(VecDeque::new()),
            call_count: AtomicUsize::new(0),
            next_sheet_id: AtomicU64::new(1),
        }
    }

    pub fn with_capabilities(mut self, capabilities: ClientCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Delay every call by `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Create (or replace) a workbook with the given sheet titles.
    pub async fn create_workbook(&self, container: impl Into<String>, sheets: &[&str]) {
        let workbook = Workbook {
            sheets: sheets
                .iter()
                .map(|title| Sheet {
                    id: self.next_sheet_id.fetch_add(1, Ordering::Relaxed),
                    title: (*title).to_string(),
                    cells: BTreeMap::new(),
                })
                .collect(),
            formats: BTreeMap::new(),
        };
        self.workbooks
            .write()
            .await
            .insert(ContainerId::new(container), workbook);
    }

    /// Write values directly, bypassing call accounting and faults.
    pub async fn seed(&self, container: &str, range: &A1Range, values: &Grid) -> Result<(), ExternalError> {
        let mut workbooks = self.workbooks.write().await;
        let workbook = workbooks
            .get_mut(&ContainerId::new(container))
            .ok_or_else(|| not_found(container))?;
        let sheet = workbook.sheet_mut(range)?;
        sheet.write(range.start_row, range.start_col, values, range);
        Ok(())
    }

    /// Queue a fault for an upcoming call. Faults are consumed in order.
    pub fn push_fault(&self, fault: Fault) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(fault);
    }

    /// Number of physical calls received so far.
    pub fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Capture the current state of a workbook.
    pub async fn snapshot(&self, container: &str) -> Option<Snapshot> {
        let workbooks = self.workbooks.read().await;
        let workbook = workbooks.get(&ContainerId::new(container))?;
        let default_sheet = workbook
            .sheets
            .first()
            .map(|s| s.title.clone())
            .unwrap_or_default();

        let mut snapshot = Snapshot::new(ContainerId::new(container), default_sheet);
        snapshot.captured_at = Utc::now();
        for sheet in &workbook.sheets {
            for ((row, col), value) in &sheet.cells {
                snapshot.set(CellRef::new(sheet.title.clone(), *row, *col), value.clone());
            }
        }
        let titles: Vec<&str> = workbook.sheets.iter().map(|s| s.title.as_str()).collect();
        snapshot.set_property(SHEETS_PROPERTY, serde_json::json!(titles));
        if !workbook.formats.is_empty() {
            snapshot.set_property(
                FORMATS_PROPERTY,
                serde_json::to_value(&workbook.formats).unwrap_or_default(),
            );
        }
        Some(snapshot)
    }

    fn next_fault(&self) -> Option<Fault> {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn apply(&self, workbook: &mut Workbook, op: &FragmentOp) -> Result<FragmentReply, ExternalError> {
        match op {
            FragmentOp::ValuesGet { ranges } => {
                let ranges = ranges
                    .iter()
                    .map(|range| {
                        let sheet = workbook.sheet(range)?;
                        Ok(RangeValues {
                            range: qualify(range, &sheet.title),
                            values: sheet.read(range),
                        })
                    })
                    .collect::<Result<Vec<_>, ExternalError>>()?;
                Ok(FragmentReply::Values { ranges })
            }
            FragmentOp::ValuesUpdate { data } => {
                // Resolve every sheet first so a bad range leaves nothing half-written.
                for entry in data {
                    workbook.sheet(&entry.range)?;
                }
                let responses = data
                    .iter()
                    .map(|entry| {
                        let sheet = workbook.sheet_mut(&entry.range)?;
                        let bounds = qualify(&entry.range, &sheet.title);
                        Ok(sheet.write(bounds.start_row, bounds.start_col, &entry.values, &bounds))
                    })
                    .collect::<Result<Vec<_>, ExternalError>>()?;
                Ok(FragmentReply::Updated { responses })
            }
            FragmentOp::ValuesAppend { range, values } => {
                let sheet = workbook.sheet_mut(range)?;
                let table = range.extend_down();
                let next_row = sheet
                    .cells
                    .keys()
                    .filter(|(row, col)| table.contains_cell(*row, *col))
                    .map(|(row, _)| row.saturating_add(1))
                    .max()
                    .unwrap_or(range.start_row);
                let bounds = A1Range {
                    start_row: next_row,
                    ..qualify(&table, &sheet.title)
                };
                let update = sheet.write(next_row, range.start_col, values, &bounds);
                Ok(FragmentReply::Appended { update })
            }
            FragmentOp::ValuesClear { ranges } => {
                for range in ranges {
                    workbook.sheet(range)?;
                }
                let mut cleared = Vec::with_capacity(ranges.len());
                for range in ranges {
                    let sheet = workbook.sheet_mut(range)?;
                    sheet.clear(range);
                    cleared.push(qualify(range, &sheet.title));
                }
                Ok(FragmentReply::Cleared { ranges: cleared })
            }
            FragmentOp::Format { entries } => {
                let mut ranges = Vec::with_capacity(entries.len());
                for entry in entries {
                    let title = workbook.sheet(&entry.range)?.title.clone();
                    let range = qualify(&entry.range, &title);
                    workbook.formats.insert(range.to_string(), entry.format.clone());
                    ranges.push(range);
                }
                Ok(FragmentReply::Formatted { ranges })
            }
            FragmentOp::AddSheet { title } => {
                if workbook.sheets.iter().any(|s| &s.title == title) {
                    return Err(ExternalError::from_status(
                        400,
                        format!("A sheet with the name \"{title}\" already exists"),
                    ));
                }
                let id = self.next_sheet_id.fetch_add(1, Ordering::Relaxed);
                workbook.sheets.push(Sheet {
                    id,
                    title: title.clone(),
                    cells: BTreeMap::new(),
                });
                Ok(FragmentReply::SheetAdded {
                    sheet_id: id,
                    title: title.clone(),
                })
            }
            FragmentOp::DeleteSheet { title } => {
                let index = workbook
                    .sheets
                    .iter()
                    .position(|s| &s.title == title)
                    .ok_or_else(|| ExternalError::from_status(400, format!("No sheet named '{title}'")))?;
                if workbook.sheets.len() == 1 {
                    return Err(ExternalError::from_status(
                        400,
                        "You can't remove all the sheets in a document",
                    ));
                }
                let removed = workbook.sheets.remove(index);
                workbook.formats.retain(|key, _| {
                    key.parse::<A1Range>()
                        .map(|range| range.sheet.as_deref() != Some(removed.title.as_str()))
                        .unwrap_or(true)
                });
                debug!(sheet_id = removed.id, title = %removed.title, "Deleted sheet");
                Ok(FragmentReply::SheetDeleted {
                    title: title.clone(),
                })
            }
        }
    }
}

fn not_found(container: &str) -> ExternalError {
    ExternalError::from_status(404, format!("Requested entity was not found: {container}"))
}

/// The same range with its sheet name filled in.
fn qualify(range: &A1Range, title: &str) -> A1Range {
    A1Range {
        sheet: Some(title.to_string()),
        ..range.clone()
    }
}

#[async_trait]
impl SheetsClient for InMemorySheets {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ClientCapabilities {
        self.capabilities
    }

    async fn execute(&self, call: &PhysicalCall) -> Result<BatchReply, ExternalError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let fault = self.next_fault();
        if let Some(Fault::FailCall(error)) = &fault {
            debug!(container = %call.container, error = %error, "Injected call failure");
            return Err(error.clone());
        }
        let failing_fragment = match fault {
            Some(Fault::FailFragment { index, error }) => Some((index, error)),
            _ => None,
        };

        let mut workbooks = self.workbooks.write().await;
        let workbook = workbooks
            .get_mut(&call.container)
            .ok_or_else(|| not_found(call.container.as_str()))?;

        let fragments = call
            .fragments
            .iter()
            .enumerate()
            .map(|(index, fragment)| match &failing_fragment {
                Some((failing, error)) if *failing == index => Err(error.clone()),
                _ => self.apply(workbook, &fragment.op),
            })
            .collect();
        Ok(BatchReply { fragments })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetgate_core::{Fragment, RangeFormat};

    fn r(a1: &str) -> A1Range {
        a1.parse().unwrap()
    }

    fn call(ops: Vec<FragmentOp>) -> PhysicalCall {
        PhysicalCall {
            container: ContainerId::new("book"),
            fragments: ops
                .into_iter()
                .enumerate()
                .map(|(i, op)| Fragment { op, intents: vec![i] })
                .collect(),
        }
    }

    async fn backend() -> InMemorySheets {
        let sheets = InMemorySheets::new("memory");
        sheets.create_workbook("book", &["Sheet1"]).await;
        sheets
    }

    #[tokio::test]
    async fn write_then_read_in_one_call() {
        let sheets = backend().await;
        let reply = sheets
            .execute(&call(vec![
                FragmentOp::ValuesUpdate {
                    data: vec![RangeValues {
                        range: r("A1:B2"),
                        values: vec![vec!["a".into(), 1i64.into()], vec!["b".into(), 2i64.into()]],
                    }],
                },
                FragmentOp::ValuesGet {
                    ranges: vec![r("A:B")],
                },
            ]))
            .await
            .unwrap();

        match &reply.fragments[0] {
            Ok(FragmentReply::Updated { responses }) => {
                assert_eq!(responses[0].updated_cells, 4);
                assert_eq!(responses[0].updated_range.to_string(), "Sheet1!A1:B2");
            }
            other => panic!("unexpected {other:?}"),
        }
        match &reply.fragments[1] {
            Ok(FragmentReply::Values { ranges }) => {
                assert_eq!(ranges[0].values.len(), 2);
                assert_eq!(ranges[0].values[1][1], CellValue::Number(2.0));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(sheets.calls(), 1);
    }

    #[tokio::test]
    async fn append_goes_below_existing_rows() {
        let sheets = backend().await;
        sheets
            .seed("book", &r("A1:B2"), &vec![vec!["h1".into(), "h2".into()], vec![1i64.into(), 2i64.into()]])
            .await
            .unwrap();

        let reply = sheets
            .execute(&call(vec![FragmentOp::ValuesAppend {
                range: r("A1:B1"),
                values: vec![vec![3i64.into(), 4i64.into()]],
            }]))
            .await
            .unwrap();

        match &reply.fragments[0] {
            Ok(FragmentReply::Appended { update }) => {
                assert_eq!(update.updated_range.to_string(), "Sheet1!A3:B3");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn write_at_the_last_row_is_clipped() {
        let sheets = backend().await;
        let last = sheetgate_core::range::UNBOUNDED;
        let range = A1Range::new(None, last - 1, 0, last, 0);
        let reply = sheets
            .execute(&call(vec![FragmentOp::ValuesUpdate {
                data: vec![RangeValues {
                    range,
                    values: vec![vec![1i64.into()], vec![2i64.into()], vec![3i64.into()]],
                }],
            }]))
            .await
            .unwrap();

        match &reply.fragments[0] {
            Ok(FragmentReply::Updated { responses }) => {
                assert_eq!(responses[0].updated_rows, 2);
                assert_eq!(responses[0].updated_range.start_row, last - 1);
                assert_eq!(responses[0].updated_range.end_row, last);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(sheets.snapshot("book").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_sheet_fails_only_its_fragment() {
        let sheets = backend().await;
        let reply = sheets
            .execute(&call(vec![
                FragmentOp::ValuesClear {
                    ranges: vec![r("Missing!A1")],
                },
                FragmentOp::Format {
                    entries: vec![RangeFormat {
                        range: r("A1"),
                        format: serde_json::json!({"bold": true}),
                    }],
                },
            ]))
            .await
            .unwrap();
        assert!(matches!(&reply.fragments[0], Err(e) if !e.is_transient()));
        assert!(reply.fragments[1].is_ok());
    }

    #[tokio::test]
    async fn unknown_container_fails_whole_call() {
        let sheets = InMemorySheets::new("memory");
        let err = sheets
            .execute(&call(vec![FragmentOp::ValuesGet { ranges: vec![r("A1")] }]))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn faults_are_consumed_in_order() {
        let sheets = backend().await;
        sheets.push_fault(Fault::FailCall(ExternalError::from_status(503, "unavailable")));
        sheets.push_fault(Fault::FailFragment {
            index: 0,
            error: ExternalError::from_status(500, "internal"),
        });
        let get = || call(vec![FragmentOp::ValuesGet { ranges: vec![r("A1")] }]);

        assert!(sheets.execute(&get()).await.unwrap_err().is_transient());
        assert!(sheets.execute(&get()).await.unwrap().fragments[0].is_err());
        assert!(sheets.execute(&get()).await.unwrap().fragments[0].is_ok());
        assert_eq!(sheets.calls(), 3);
    }

    #[tokio::test]
    async fn sheet_lifecycle_shows_in_snapshot() {
        let sheets = backend().await;
        let reply = sheets
            .execute(&call(vec![
                FragmentOp::AddSheet { title: "Q2".into() },
                FragmentOp::AddSheet { title: "Q2".into() },
            ]))
            .await
            .unwrap();
        assert!(reply.fragments[0].is_ok());
        assert!(reply.fragments[1].is_err());

        let snap = sheets.snapshot("book").await.unwrap();
        assert_eq!(snap.properties[SHEETS_PROPERTY], serde_json::json!(["Sheet1", "Q2"]));

        sheets
            .execute(&call(vec![FragmentOp::DeleteSheet { title: "Q2".into() }]))
            .await
            .unwrap();
        let snap = sheets.snapshot("book").await.unwrap();
        assert_eq!(snap.properties[SHEETS_PROPERTY], serde_json::json!(["Sheet1"]));
    }

    #[tokio::test]
    async fn clear_removes_values_from_snapshot() {
        let sheets = backend().await;
        sheets
            .seed("book", &r("A1:A2"), &vec![vec!["x".into()], vec!["y".into()]])
            .await
            .unwrap();
        sheets
            .execute(&call(vec![FragmentOp::ValuesClear { ranges: vec![r("A1")] }]))
            .await
            .unwrap();

        let snap = sheets.snapshot("book").await.unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(
            snap.get(&CellRef::new("Sheet1", 1, 0)),
            Some(&CellValue::Text("y".into()))
        );
    }
}
