//! Check current outputs against the registry.
//!
//! Every row of an output that names a specimen must agree with the latest
//! registry snapshot of the row's network and protocol: the specimen must be
//! present there, and the patient id must match.

use crate::discover::current_outputs;
use anyhow::{bail, ensure, Result};
use io_utils::Table;
use itertools::Itertools;
use log::{info, warn};
use sm_impact::JobDiscovery;
use sm_notify::BatchReport;
use sm_store::SnapshotStore;
use sm_types::constants::{
    OUTPUT_NETWORK_COLUMN, OUTPUT_PATIENT_ID_COLUMN, OUTPUT_PROTOCOL_COLUMN,
    OUTPUT_SPECIMEN_ID_COLUMNS,
};
use sm_types::{Network, Protocol, ProtocolKey, SpecimenId};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Patient ids by specimen, from the latest snapshot of one protocol.
type PatientIndex = BTreeMap<SpecimenId, BTreeSet<String>>;

/// Latest registry snapshots, loaded on first use.
struct RegistryIndex<'a> {
    store: &'a SnapshotStore,
    loaded: BTreeMap<ProtocolKey, PatientIndex>,
}

impl<'a> RegistryIndex<'a> {
    fn new(store: &'a SnapshotStore) -> RegistryIndex<'a> {
        RegistryIndex {
            store,
            loaded: BTreeMap::new(),
        }
    }

    fn patients(&mut self, key: ProtocolKey) -> Result<&PatientIndex> {
        if !self.loaded.contains_key(&key) {
            let Some(latest) = self.store.latest(key)? else {
                bail!("No registry snapshot of {key} to check against");
            };
            let snapshot = self.store.load_snapshot(&latest.path)?;
            let mut index = PatientIndex::new();
            for record in snapshot.records.iter().map(|r| r.normalized()) {
                let patients = index.entry(record.specimen_id).or_default();
                if let Some(ptid) = record.patient_id {
                    patients.insert(ptid);
                }
            }
            self.loaded.insert(key, index);
        }
        match self.loaded.get(&key) {
            Some(index) => Ok(index),
            None => bail!("No registry snapshot of {key} to check against"),
        }
    }
}

/// Patient ids are sometimes written as floats by upstream tools.
fn same_patient(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

/// Audit every current output, recording findings in `report`.
pub fn audit_outputs(
    discovery: &JobDiscovery,
    store: &SnapshotStore,
    report: &mut BatchReport,
) -> Result<()> {
    let mut registry = RegistryIndex::new(store);
    let outputs = current_outputs(discovery)?;
    info!("auditing {} outputs", outputs.len());
    for output in outputs {
        if let Err(e) = audit_output(&output, &mut registry, report) {
            warn!("unable to audit {}: {e:#}", output.display());
            report.record_audit_error(&output, &e);
        }
    }
    Ok(())
}

fn audit_output(
    output: &Path,
    registry: &mut RegistryIndex<'_>,
    report: &mut BatchReport,
) -> Result<()> {
    let table = Table::read_normalized(output)?;
    let Some(id_column) = table.find_column(&OUTPUT_SPECIMEN_ID_COLUMNS) else {
        warn!("no specimen id column in {}", output.display());
        report.record_missing_identifier(output);
        return Ok(());
    };
    ensure!(
        table.has_column(OUTPUT_NETWORK_COLUMN) && table.has_column(OUTPUT_PROTOCOL_COLUMN),
        "The output has no '{OUTPUT_NETWORK_COLUMN}' or no '{OUTPUT_PROTOCOL_COLUMN}' column"
    );

    for row in 0..table.len() {
        let Some(id) = table.get(row, id_column) else {
            continue;
        };
        let line = row + 2;
        let (Some(network), Some(protocol)) = (
            table.get(row, OUTPUT_NETWORK_COLUMN),
            table.get(row, OUTPUT_PROTOCOL_COLUMN),
        ) else {
            bail!("On line {line}: specimen {id} has no network or no protocol");
        };
        let key = ProtocolKey::new(
            Network::try_from(network.to_string())?,
            protocol.parse::<Protocol>()?,
        );

        let Some(patients) = registry.patients(key)?.get(id) else {
            report.record_audit_mismatch(
                output,
                SpecimenId::from(id),
                format!("not in the {key} registry"),
            );
            continue;
        };
        if let Some(ptid) = table.get(row, OUTPUT_PATIENT_ID_COLUMN) {
            if !patients.iter().any(|p| same_patient(p, ptid)) {
                report.record_audit_mismatch(
                    output,
                    SpecimenId::from(id),
                    format!(
                        "ptid {ptid} in output, {} in the {key} registry",
                        if patients.is_empty() {
                            "none".to_string()
                        } else {
                            patients.iter().join("/")
                        }
                    ),
                );
            }
        }
    }
    Ok(())
}
