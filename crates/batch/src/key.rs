//! Request keys for the deduplicator.
//!
//! A key is `"{container}:{sha256}"` over the canonical JSON of the call's
//! fragment payloads. The Intent indices a fragment serves are excluded, so
//! two callers issuing the same physical request share one execution even
//! though their Intent lists differ.

use sheetgate_core::intent::sha256_hex;
use sheetgate_core::{Error, FragmentOp, PhysicalCall};

/// Reorder a read-only call into canonical form.
///
/// Range order inside a read carries no meaning, so ranges are sorted (their
/// Intent indices move with them) and fragments are sorted by content. Calls
/// that mutate keep their order.
pub fn canonicalize(call: &PhysicalCall) -> PhysicalCall {
    if !call.is_read_only() {
        return call.clone();
    }

    let mut fragments = call.fragments.clone();
    for fragment in &mut fragments {
        if let FragmentOp::ValuesGet { ranges } = &mut fragment.op {
            let mut pairs: Vec<_> = ranges
                .drain(..)
                .zip(fragment.intents.drain(..))
                .map(|(range, intent)| (range.to_string(), range, intent))
                .collect();
            pairs.sort_by(|a, b| a.0.cmp(&b.0).then(a.2.cmp(&b.2)));
            for (_, range, intent) in pairs {
                ranges.push(range);
                fragment.intents.push(intent);
            }
        }
    }
    fragments.sort_by_cached_key(|f| match &f.op {
        FragmentOp::ValuesGet { ranges } => ranges
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(","),
        _ => String::new(),
    });

    PhysicalCall {
        container: call.container.clone(),
        fragments,
    }
}

/// The deduplication key for a call. Pass a [`canonicalize`]d call so read
/// order does not split keys.
pub fn request_key(call: &PhysicalCall) -> Result<String, Error> {
    let ops = call
        .fragments
        .iter()
        .map(|f| serde_json::to_value(&f.op))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!(
        "{}:{}",
        call.container,
        sha256_hex(&serde_json::Value::Array(ops))
    ))
}

/// Key prefix shared by every call against `container`.
pub fn container_prefix(call: &PhysicalCall) -> String {
    format!("{}:", call.container)
}
