//! Reconciler: overwrite every record's `downloads` from the count index.
//!
//! Pure apart from logging. Records with no stored count are set to zero and
//! each one is warned about exactly once.

use tally_core::{CatalogDocument, CountIndex, DatasetKind, DownloadCount, RecordId};

/// Counts gathered while reconciling one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records visited.
    pub entries: usize,
    /// Records whose uuid was present in the index.
    pub matched: usize,
    /// Records whose count differs from what the document held before.
    pub changed: usize,
    /// Uuids with no stored count, in document order.
    pub unmatched: Vec<RecordId>,
}

/// Assign `downloads` on every record of `document` from `index`.
///
/// Entry order, entry count and every other field are left untouched.
pub fn reconcile(
    kind: DatasetKind,
    document: &mut CatalogDocument,
    index: &CountIndex,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    for record in document.records_mut() {
        report.entries += 1;
        let next = match index.get(&record.uuid) {
            Some(count) => {
                report.matched += 1;
                count.clone()
            }
            None => {
                tracing::warn!(kind = %kind, uuid = %record.uuid, "download number not found; using 0");
                report.unmatched.push(record.uuid.clone());
                DownloadCount::zero()
            }
        };
        if record.downloads.as_ref() != Some(&next) {
            report.changed += 1;
            record.downloads = Some(next);
        }
    }

    tracing::debug!(
        kind = %kind,
        entries = report.entries,
        matched = report.matched,
        changed = report.changed,
        "reconciled"
    );
    report
}
