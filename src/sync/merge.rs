//! Per-record reconciliation of two replicas.
//!
//! For a record present on both sides:
//! 1. The higher `revision` wins, tombstone or not.
//! 2. On equal revisions a live record beats a tombstone.
//! 3. Otherwise the later `updated_at` wins, then the larger `origin`,
//!    then the larger canonical content, so every replica picks the same
//!    winner.
//! 4. If both sides were live at the same revision and their content
//!    differs, the loser is kept as a conflict copy (see `CredentialRecord::conflict_copy`).
//!
//! The result does not depend on which side is "local".

use std::cmp::Ordering;
use std::collections::BTreeMap;

use uuid::Uuid;

use crate::vault::record::CredentialRecord;

/// What the merge did, for logs and reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Records taken from the remote side.
    pub pulled: usize,
    /// Records where the local side won or that only exist locally.
    pub pushed: usize,
    /// Conflict copies created.
    pub conflicts: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub records: Vec<CredentialRecord>,
    pub report: MergeReport,
}

/// Merge two record sets.
pub fn merge_records(local: &[CredentialRecord], remote: &[CredentialRecord]) -> MergeOutcome {
    let mut merged: BTreeMap<Uuid, CredentialRecord> = BTreeMap::new();
    let mut report = MergeReport::default();
    let remote_by_id: BTreeMap<Uuid, &CredentialRecord> = remote.iter().map(|r| (r.id, r)).collect();
    let mut copies = Vec::new();

    for record in local {
        match remote_by_id.get(&record.id) {
            None => {
                report.pushed += 1;
                merged.insert(record.id, record.clone());
            }
            Some(theirs) => {
                let (winner, loser) = match pick(record, theirs) {
                    Ordering::Less => (*theirs, record),
                    _ => (record, *theirs),
                };
                if std::ptr::eq(winner, record) {
                    if record != *theirs {
                        report.pushed += 1;
                    }
                } else {
                    report.pulled += 1;
                }
                // Only a concurrent edit (same revision) can lose data.
                if winner.revision == loser.revision
                    && !winner.deleted
                    && !loser.deleted
                    && !winner.content_eq(loser)
                {
                    copies.push(loser.conflict_copy());
                }
                merged.insert(winner.id, winner.clone());
            }
        }
    }

    for record in remote {
        if !merged.contains_key(&record.id) {
            report.pulled += 1;
            merged.insert(record.id, record.clone());
        }
    }

    for copy in copies {
        // The same copy may already exist from an earlier merge elsewhere.
        if !merged.contains_key(&copy.id) {
            report.conflicts.push(copy.id);
            merged.insert(copy.id, copy);
        }
    }

    MergeOutcome {
        records: merged.into_values().collect(),
        report,
    }
}

/// Drop records another replica already purged.  A copy edited past the
/// purged revision is kept.
pub fn forget_purged(
    records: &[CredentialRecord],
    purged: &BTreeMap<Uuid, u64>,
) -> Vec<CredentialRecord> {
    records
        .iter()
        .filter(|r| !purged.get(&r.id).is_some_and(|revision| r.revision <= *revision))
        .cloned()
        .collect()
}

/// Union of two purge ledgers, keeping the higher revision per id.
pub fn merge_purged(a: &BTreeMap<Uuid, u64>, b: &BTreeMap<Uuid, u64>) -> BTreeMap<Uuid, u64> {
    let mut merged = a.clone();
    for (id, revision) in b {
        let entry = merged.entry(*id).or_insert(*revision);
        *entry = (*entry).max(*revision);
    }
    merged
}

/// `Greater` if `a` should win over `b`.
fn pick(a: &CredentialRecord, b: &CredentialRecord) -> Ordering {
    a.revision
        .cmp(&b.revision)
        .then_with(|| b.deleted.cmp(&a.deleted))
        .then_with(|| a.updated_at.cmp(&b.updated_at))
        .then_with(|| a.origin.cmp(&b.origin))
        .then_with(|| content_key(a).cmp(&content_key(b)))
}

fn content_key(r: &CredentialRecord) -> (&str, Vec<(&str, &str)>) {
    (
        r.title.as_str(),
        r.fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect(),
    )
}
