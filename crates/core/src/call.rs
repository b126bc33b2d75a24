//! Physical calls: what actually goes over the wire to the external service.
//!
//! A [`PhysicalCall`] targets exactly one container and carries an ordered list
//! of [`Fragment`]s. The service applies fragments in array order, so a later
//! fragment wins where two overlap. Each fragment remembers which Intents
//! (by index into the caller's list) it serves.

use crate::error::ExternalError;
use crate::intent::ContainerId;
use crate::range::A1Range;
use crate::value::Grid;
use serde::{Deserialize, Serialize};

/// The physical request type of a fragment. Only fragments of the same type
/// can be merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentType {
    ValuesGet,
    ValuesUpdate,
    ValuesAppend,
    ValuesClear,
    Format,
    AddSheet,
    DeleteSheet,
}

impl FragmentType {
    pub fn is_read(self) -> bool {
        matches!(self, FragmentType::ValuesGet)
    }
}

/// A value write for one range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeValues {
    pub range: A1Range,
    pub values: Grid,
}

/// A format application for one range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeFormat {
    pub range: A1Range,
    pub format: serde_json::Value,
}

/// The payload of one fragment. Entries inside a multi-entry payload are
/// positional: entry `j` serves `Fragment::intents[j]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FragmentOp {
    ValuesGet { ranges: Vec<A1Range> },
    ValuesUpdate { data: Vec<RangeValues> },
    ValuesAppend { range: A1Range, values: Grid },
    ValuesClear { ranges: Vec<A1Range> },
    Format { entries: Vec<RangeFormat> },
    AddSheet { title: String },
    DeleteSheet { title: String },
}

impl FragmentOp {
    pub fn fragment_type(&self) -> FragmentType {
        match self {
            FragmentOp::ValuesGet { .. } => FragmentType::ValuesGet,
            FragmentOp::ValuesUpdate { .. } => FragmentType::ValuesUpdate,
            FragmentOp::ValuesAppend { .. } => FragmentType::ValuesAppend,
            FragmentOp::ValuesClear { .. } => FragmentType::ValuesClear,
            FragmentOp::Format { .. } => FragmentType::Format,
            FragmentOp::AddSheet { .. } => FragmentType::AddSheet,
            FragmentOp::DeleteSheet { .. } => FragmentType::DeleteSheet,
        }
    }

    /// Number of positional entries (and so of expected reply entries).
    pub fn entry_count(&self) -> usize {
        match self {
            FragmentOp::ValuesGet { ranges } | FragmentOp::ValuesClear { ranges } => ranges.len(),
            FragmentOp::ValuesUpdate { data } => data.len(),
            FragmentOp::Format { entries } => entries.len(),
            FragmentOp::ValuesAppend { .. }
            | FragmentOp::AddSheet { .. }
            | FragmentOp::DeleteSheet { .. } => 1,
        }
    }
}

/// One unit of a physical batch call, merged from one or more Intents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    #[serde(flatten)]
    pub op: FragmentOp,
    /// Indices into the Intent list this fragment serves, in entry order.
    pub intents: Vec<usize>,
}

/// A single request to the external service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalCall {
    pub container: ContainerId,
    pub fragments: Vec<Fragment>,
}

impl PhysicalCall {
    pub fn is_read_only(&self) -> bool {
        self.fragments.iter().all(|f| f.op.fragment_type().is_read())
    }
}

// ── Replies ─────────────────────────────────────────────────────────────────

/// Per-range outcome of a value write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateSummary {
    pub updated_range: A1Range,
    pub updated_rows: u32,
    pub updated_columns: u32,
    pub updated_cells: u32,
    /// The values as stored after the write, when the service echoes them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Grid>,
}

/// The service's answer to one fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FragmentReply {
    Values { ranges: Vec<RangeValues> },
    Updated { responses: Vec<UpdateSummary> },
    Appended { update: UpdateSummary },
    Cleared { ranges: Vec<A1Range> },
    Formatted { ranges: Vec<A1Range> },
    SheetAdded { sheet_id: u64, title: String },
    SheetDeleted { title: String },
}

impl FragmentReply {
    /// Number of positional entries, to check against [`FragmentOp::entry_count`].
    pub fn entry_count(&self) -> usize {
        match self {
            FragmentReply::Values { ranges } => ranges.len(),
            FragmentReply::Updated { responses } => responses.len(),
            FragmentReply::Cleared { ranges } | FragmentReply::Formatted { ranges } => ranges.len(),
            FragmentReply::Appended { .. }
            | FragmentReply::SheetAdded { .. }
            | FragmentReply::SheetDeleted { .. } => 1,
        }
    }
}

/// The answer to a whole physical call: one outcome per fragment, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReply {
    pub fragments: Vec<Result<FragmentReply, ExternalError>>,
}

impl BatchReply {
    pub fn all_ok(replies: Vec<FragmentReply>) -> Self {
        Self {
            fragments: replies.into_iter().map(Ok).collect(),
        }
    }

    pub fn first_error(&self) -> Option<&ExternalError> {
        self.fragments.iter().find_map(|f| f.as_ref().err())
    }
}
