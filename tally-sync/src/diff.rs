//! Unified diff of a catalog document before and after reconciliation,
//! for `tally diff`.

use similar::TextDiff;

use tally_core::DatasetKind;

use crate::reconcile::ReconcileReport;

/// What a run would change in one dataset. Nothing is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentDiff {
    pub kind: DatasetKind,
    pub path: String,
    pub report: ReconcileReport,
    /// Empty when the encoded document is byte-identical to the remote one.
    pub unified_diff: String,
}

impl DocumentDiff {
    pub fn is_empty(&self) -> bool {
        self.unified_diff.is_empty()
    }
}

/// Line diff of `before` → `after`, headed `a/{path}` / `b/{path}`.
///
/// Returns an empty string when the inputs are identical.
pub fn unified_diff(path: &str, before: &[u8], after: &[u8]) -> String {
    if before == after {
        return String::new();
    }
    let before = normalize_line_endings(&String::from_utf8_lossy(before));
    let after = normalize_line_endings(&String::from_utf8_lossy(after));
    let old_header = format!("a/{path}");
    let new_header = format!("b/{path}");
    TextDiff::from_lines(&before, &after)
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string()
}

fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n")
}
