//! Intent → physical call compilation.
//!
//! Intents are grouped by container (first-appearance order), then folded
//! into an ordered fragment list per container. An Intent joins an earlier
//! fragment of the same type only when doing so cannot change the outcome
//! compared to issuing everything sequentially:
//!
//! - for mutations, it must not overlap any range already in that fragment;
//! - it must not conflict with any fragment it would jump over.
//!
//! Two footprints conflict when they overlap and at least one mutates. Sheet
//! additions and deletions conflict with everything in their container.

use serde::{Deserialize, Serialize};
use sheetgate_core::{
    A1Range, ContainerId, Fragment, FragmentOp, Intent, IntentKind, PhysicalCall, RangeFormat,
    RangeValues,
};
use tracing::debug;

/// The output of [`compile`]: one physical call per container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledBatch {
    pub calls: Vec<PhysicalCall>,
    /// Number of Intents the batch was compiled from.
    pub intent_count: usize,
}

impl CompiledBatch {
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn fragment_count(&self) -> usize {
        self.calls.iter().map(|c| c.fragments.len()).sum()
    }
}

/// The cell area an operation touches. `range: None` means the whole container.
#[derive(Debug, Clone)]
struct Footprint {
    range: Option<A1Range>,
    mutates: bool,
}

impl Footprint {
    fn of(kind: &IntentKind) -> Self {
        match kind {
            IntentKind::ReadRange { range } => Self {
                range: Some(range.clone()),
                mutates: false,
            },
            IntentKind::AppendRows { range, .. } => Self {
                range: Some(range.extend_down()),
                mutates: true,
            },
            IntentKind::WriteRange { range, .. }
            | IntentKind::ClearRange { range }
            | IntentKind::FormatCells { range, .. } => Self {
                range: Some(range.clone()),
                mutates: true,
            },
            IntentKind::AddSheet { .. } | IntentKind::DeleteSheet { .. } => Self {
                range: None,
                mutates: true,
            },
        }
    }

    fn conflicts(&self, other: &Footprint) -> bool {
        if !self.mutates && !other.mutates {
            return false;
        }
        match (&self.range, &other.range) {
            (Some(a), Some(b)) => a.overlaps(b),
            _ => true,
        }
    }
}

/// A fragment under construction with the footprint of each entry.
struct Planned {
    fragment: Fragment,
    footprints: Vec<Footprint>,
}

impl Planned {
    fn conflicts(&self, footprint: &Footprint) -> bool {
        self.footprints.iter().any(|f| f.conflicts(footprint))
    }
}

/// Compile an Intent list into the minimal set of physical calls.
///
/// An empty list compiles to an empty batch. Every Intent index appears in
/// exactly one fragment.
pub fn compile(intents: &[Intent]) -> CompiledBatch {
    let mut groups: Vec<(ContainerId, Vec<usize>)> = Vec::new();
    for (index, intent) in intents.iter().enumerate() {
        match groups.iter_mut().find(|(c, _)| c == intent.target()) {
            Some((_, members)) => members.push(index),
            None => groups.push((intent.target().clone(), vec![index])),
        }
    }

    let calls: Vec<PhysicalCall> = groups
        .into_iter()
        .map(|(container, members)| PhysicalCall {
            container,
            fragments: plan_container(intents, &members),
        })
        .collect();

    let batch = CompiledBatch {
        calls,
        intent_count: intents.len(),
    };
    debug!(
        intents = batch.intent_count,
        calls = batch.calls.len(),
        fragments = batch.fragment_count(),
        "Compiled batch"
    );
    batch
}

fn plan_container(intents: &[Intent], members: &[usize]) -> Vec<Fragment> {
    let mut planned: Vec<Planned> = Vec::new();

    'intents: for &index in members {
        let kind = intents[index].kind();
        let footprint = Footprint::of(kind);

        for candidate in planned.iter_mut().rev() {
            if candidate.conflicts(&footprint) {
                break;
            }
            if absorb(&mut candidate.fragment.op, kind) {
                candidate.fragment.intents.push(index);
                candidate.footprints.push(footprint);
                continue 'intents;
            }
        }

        planned.push(Planned {
            fragment: Fragment {
                op: open_fragment(kind),
                intents: vec![index],
            },
            footprints: vec![footprint],
        });
    }

    planned.into_iter().map(|p| p.fragment).collect()
}

/// Append `kind` as a new entry of `op` if their types match and the type
/// supports multiple entries.
fn absorb(op: &mut FragmentOp, kind: &IntentKind) -> bool {
    match (op, kind) {
        (FragmentOp::ValuesGet { ranges }, IntentKind::ReadRange { range })
        | (FragmentOp::ValuesClear { ranges }, IntentKind::ClearRange { range }) => {
            ranges.push(range.clone());
        }
        (FragmentOp::ValuesUpdate { data }, IntentKind::WriteRange { range, values }) => {
            data.push(RangeValues {
                range: range.clone(),
                values: values.clone(),
            });
        }
        (FragmentOp::Format { entries }, IntentKind::FormatCells { range, format }) => {
            entries.push(RangeFormat {
                range: range.clone(),
                format: format.clone(),
            });
        }
        _ => return false,
    }
    true
}

fn open_fragment(kind: &IntentKind) -> FragmentOp {
    match kind {
        IntentKind::ReadRange { range } => FragmentOp::ValuesGet {
            ranges: vec![range.clone()],
        },
        IntentKind::WriteRange { range, values } => FragmentOp::ValuesUpdate {
            data: vec![RangeValues {
                range: range.clone(),
                values: values.clone(),
            }],
        },
        IntentKind::AppendRows { range, values } => FragmentOp::ValuesAppend {
            range: range.clone(),
            values: values.clone(),
        },
        IntentKind::ClearRange { range } => FragmentOp::ValuesClear {
            ranges: vec![range.clone()],
        },
        IntentKind::FormatCells { range, format } => FragmentOp::Format {
            entries: vec![RangeFormat {
                range: range.clone(),
                format: format.clone(),
            }],
        },
        IntentKind::AddSheet { title } => FragmentOp::AddSheet {
            title: title.clone(),
        },
        IntentKind::DeleteSheet { title } => FragmentOp::DeleteSheet {
            title: title.clone(),
        },
    }
}
