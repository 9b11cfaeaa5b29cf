//! sm_diff
//! Classify the changes between two registry snapshots of the same protocol.
//!
//! The comparison runs as a sequence of gates, each stage running only if the
//! previous one did not already end the comparison:
//!
//! 1. Either snapshot empty: nothing to compare.
//! 2. Column names differ: schema mismatch, no further diffing.
//! 3. Specimen ids only in the new snapshot are *added*, only in the old are *removed*.
//! 4. Shared ids with a different number of distinct rows are *count drift* and are
//!    not field-compared.
//! 5. Remaining shared ids are sorted by the composite record key and compared
//!    row by row; any difference marks the id as *field changed*.
//!
//! The "not applicable" registry token is treated as a missing value throughout.

use itertools::Itertools;
use log::debug;
use serde::Serialize;
use sm_types::{Snapshot, SpecimenId, SpecimenRecord};
use std::collections::{BTreeMap, BTreeSet};

/// The classified changes between two snapshots. The four sets are pairwise disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeRecord {
    pub added_keys: BTreeSet<SpecimenId>,
    pub removed_keys: BTreeSet<SpecimenId>,
    pub count_drift_keys: BTreeSet<SpecimenId>,
    pub field_changed_keys: BTreeSet<SpecimenId>,
}

impl ChangeRecord {
    /// True if nothing changed at all.
    pub fn is_empty(&self) -> bool {
        self.added_keys.is_empty() && self.impact_keys().is_empty()
    }

    /// Ids whose change can affect outputs that were already generated.
    /// Added ids cannot, as no existing output refers to them.
    pub fn impact_keys(&self) -> BTreeSet<SpecimenId> {
        self.removed_keys
            .iter()
            .chain(&self.count_drift_keys)
            .chain(&self.field_changed_keys)
            .cloned()
            .collect()
    }

    /// Removed or drifted ids call for an elevated notification.
    pub fn is_severe(&self) -> bool {
        !self.removed_keys.is_empty() || !self.count_drift_keys.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DiffOutcome {
    /// At least one side was empty or missing.
    NothingToCompare,
    /// The snapshots do not share the same columns. Lists the columns found
    /// in only one of them.
    SchemaMismatch { unshared_columns: BTreeSet<String> },
    Compared(ChangeRecord),
}

impl DiffOutcome {
    pub fn change_record(&self) -> Option<&ChangeRecord> {
        match self {
            DiffOutcome::Compared(record) => Some(record),
            _ => None,
        }
    }
}

/// Group distinct, normalized rows by specimen id.
fn group_rows(snapshot: &Snapshot) -> BTreeMap<SpecimenId, Vec<SpecimenRecord>> {
    snapshot
        .records
        .iter()
        .map(SpecimenRecord::normalized)
        .unique()
        .map(|r| (r.specimen_id.clone(), r))
        .into_group_map()
        .into_iter()
        .collect()
}

/// Compare `old` against `new`.
pub fn diff_snapshots(old: &Snapshot, new: &Snapshot) -> DiffOutcome {
    if old.is_empty() || new.is_empty() {
        debug!("one of the snapshots is empty; nothing to compare");
        return DiffOutcome::NothingToCompare;
    }

    let old_cols: BTreeSet<&String> = old.columns.iter().collect();
    let new_cols: BTreeSet<&String> = new.columns.iter().collect();
    let unshared_columns: BTreeSet<String> = old_cols
        .symmetric_difference(&new_cols)
        .map(|c| c.to_string())
        .collect();
    if !unshared_columns.is_empty() {
        return DiffOutcome::SchemaMismatch { unshared_columns };
    }

    let old_rows = group_rows(old);
    let new_rows = group_rows(new);

    let mut record = ChangeRecord::default();
    for (id, old_group) in &old_rows {
        let Some(new_group) = new_rows.get(id) else {
            record.removed_keys.insert(id.clone());
            continue;
        };
        if old_group.len() != new_group.len() {
            record.count_drift_keys.insert(id.clone());
            continue;
        }
        let mut old_group = old_group.clone();
        let mut new_group = new_group.clone();
        old_group.sort();
        new_group.sort();
        if old_group != new_group {
            record.field_changed_keys.insert(id.clone());
        }
    }
    record.added_keys = new_rows
        .keys()
        .filter(|id| !old_rows.contains_key(*id))
        .cloned()
        .collect();

    debug!(
        "added {}, removed {}, count drift {}, field changed {}",
        record.added_keys.len(),
        record.removed_keys.len(),
        record.count_drift_keys.len(),
        record.field_changed_keys.len()
    );
    DiffOutcome::Compared(record)
}
