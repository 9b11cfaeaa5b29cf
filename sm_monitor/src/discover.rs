//! Walk the current outputs of all discoverable jobs.

use anyhow::Result;
use io_utils::Table;
use log::{debug, warn};
use sm_impact::{discover_jobs, JobDiscovery};
use sm_types::constants::{OUTPUT_NETWORK_COLUMN, OUTPUT_PROTOCOL_COLUMN};
use sm_types::{Network, Protocol};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// The most recent output of every job below the jobs root. Jobs whose
/// output cannot be located are skipped with a warning.
pub fn current_outputs(discovery: &JobDiscovery) -> Result<Vec<PathBuf>> {
    let mut outputs = Vec::new();
    for job in discover_jobs(&discovery.jobs_root, &discovery.config_name)? {
        match job.locate_outputs() {
            Ok(found) => outputs.extend(found),
            Err(e) => warn!("skipping job {}: {e}", job.name),
        }
    }
    Ok(outputs)
}

/// Protocols referenced by the current outputs, from their `network` and
/// `protocol` columns. Outputs without those columns, or that cannot be read,
/// are skipped.
pub fn discover_protocols(discovery: &JobDiscovery) -> Result<BTreeMap<Network, BTreeSet<Protocol>>> {
    let mut found: BTreeMap<Network, BTreeSet<Protocol>> = BTreeMap::new();
    for output in current_outputs(discovery)? {
        let table = match Table::read_normalized(&output) {
            Ok(t) => t,
            Err(e) => {
                warn!("unable to read {}: {e:#}", output.display());
                continue;
            }
        };
        if !(table.has_column(OUTPUT_NETWORK_COLUMN) && table.has_column(OUTPUT_PROTOCOL_COLUMN)) {
            debug!("no network/protocol columns in {}", output.display());
            continue;
        }
        for row in 0..table.len() {
            let (Some(network), Some(protocol)) = (
                table.get(row, OUTPUT_NETWORK_COLUMN),
                table.get(row, OUTPUT_PROTOCOL_COLUMN),
            ) else {
                continue;
            };
            match (Network::try_from(network.to_string()), protocol.parse::<Protocol>()) {
                (Ok(network), Ok(protocol)) => {
                    found.entry(network).or_default().insert(protocol);
                }
                _ => debug!(
                    "{}: unrecognized network/protocol '{network}'/'{protocol}'",
                    output.display()
                ),
            }
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_discover_protocols() -> Result<()> {
        let root = tempfile::tempdir()?;
        let jobs_root = root.path().join("jobs");
        let out = root.path().join("out");
        std::fs::create_dir_all(jobs_root.join("elisa"))?;
        std::fs::create_dir_all(jobs_root.join("bama"))?;
        std::fs::create_dir_all(jobs_root.join("missing"))?;
        std::fs::create_dir_all(&out)?;

        std::fs::write(
            out.join("elisa.20240101.txt"),
            "guspec\tNetwork\tProtocol\nS1\tHVTN\t302\nS2\thvtn\t302.0\nS3\tCoVPN\t3008\nS4\tHPTN\t1\n",
        )?;
        std::fs::write(out.join("bama.20240101.csv"), "guspec,ptid\nS1,P1\n")?;
        for (job, prefix) in [("elisa", "elisa."), ("bama", "bama."), ("missing", "nope.")] {
            std::fs::write(
                jobs_root.join(job).join("paths.yaml"),
                format!("savedir: {}\noutput_prefix: {prefix}\n", out.display()),
            )?;
        }

        let discovery = JobDiscovery {
            jobs_root,
            config_name: "paths.yaml".to_string(),
        };
        assert_eq!(current_outputs(&discovery)?.len(), 2);

        let expected: BTreeMap<Network, BTreeSet<Protocol>> = [
            (Network::Hvtn, [Protocol::new(302)].into_iter().collect()),
            (Network::Covpn, [Protocol::new(3008)].into_iter().collect()),
        ]
        .into_iter()
        .collect();
        assert_eq!(discover_protocols(&discovery)?, expected);
        Ok(())
    }
}
