//! Access to the external specimen registry.

use crate::config::RetryConfig;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, NaiveDateTime};
use io_utils::Table;
use log::{debug, warn};
use sm_types::constants::{LSTUDY, STANDARD_COLS};
use sm_types::{Network, Protocol, Snapshot, SpecimenRecord};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// The registry as seen by the monitor: a full extract per (network,
/// protocol), and the time the registry was last touched.
pub trait RegistrySource {
    fn pull_snapshot(&self, network: Network, protocol: Protocol) -> Result<Snapshot>;

    fn last_modified(&self, network: Network) -> Result<NaiveDateTime>;
}

/// Registry source backed by one organization-wide export file per network.
#[derive(Debug, Clone)]
pub struct CsvRegistrySource {
    exports: BTreeMap<Network, PathBuf>,
}

impl CsvRegistrySource {
    pub fn new(exports: BTreeMap<Network, PathBuf>) -> CsvRegistrySource {
        CsvRegistrySource { exports }
    }

    fn export(&self, network: Network) -> Result<&Path> {
        match self.exports.get(&network) {
            Some(path) => Ok(path),
            None => bail!("No registry export is configured for network {network}"),
        }
    }
}

impl RegistrySource for CsvRegistrySource {
    fn pull_snapshot(&self, network: Network, protocol: Protocol) -> Result<Snapshot> {
        let path = self.export(network)?;
        let table = Table::read_normalized(path)?;
        let missing: Vec<_> = STANDARD_COLS
            .iter()
            .filter(|c| !table.has_column(c))
            .collect();
        if !missing.is_empty() {
            bail!(
                "The registry export {} is missing columns {:?}",
                path.display(),
                missing
            );
        }

        let mut records = Vec::new();
        for row in 0..table.len() {
            let study = table.get(row, LSTUDY).and_then(|s| s.parse::<f64>().ok());
            if !study.is_some_and(|v| protocol.matches_f64(v)) {
                continue;
            }
            let mut record = SpecimenRecord::from_table_row(&table, row)?;
            record.extra.clear();
            records.push(record);
        }
        debug!(
            "pulled {} rows for {network}{protocol} from {}",
            records.len(),
            path.display()
        );
        Ok(Snapshot::new(
            STANDARD_COLS.iter().map(ToString::to_string).collect(),
            records,
        ))
    }

    fn last_modified(&self, network: Network) -> Result<NaiveDateTime> {
        let path = self.export(network)?;
        let modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .with_context(|| path.display().to_string())?;
        Ok(DateTime::<Local>::from(modified).naive_local())
    }
}

/// Call `f` until it succeeds, at most `cfg.attempts` times, doubling the
/// wait after every failure.
/// Double the wait between attempts, without overflowing.
fn next_backoff(backoff: Duration) -> Duration {
    backoff.saturating_mul(2)
}

pub fn with_retry<T>(cfg: &RetryConfig, what: &str, mut f: impl FnMut() -> Result<T>) -> Result<T> {
    let attempts = cfg.attempts.max(1);
    let mut backoff = cfg.initial_backoff();
    let mut attempt = 1;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < attempts => {
                warn!("{what} failed (attempt {attempt} of {attempts}), retrying in {backoff:?}: {e:#}");
                thread::sleep(backoff);
                backoff = next_backoff(backoff);
                attempt += 1;
            }
            Err(e) => return Err(e.context(format!("{what} failed after {attempts} attempts"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use pretty_assertions::assert_eq;
    use sm_types::SpecimenId;
    use std::cell::Cell;

    const EXPORT: &str = "\
TXTPID,drawdm,drawdd,drawdy,vidval,lstudy,guspec,primstr,addstr,dervstr,lab_note
P1,1,15,2024,1.0,302.0,S1,BLD,HEP,PLA,x
P2,1,16,2024,2.0,303.0,S2,BLD,HEP,PLA,y
P3,1,17,2024,2.0,302,S3,BLD,N/A,SER,z
P4,1,17,2024,2.0,,S4,BLD,HEP,SER,z
";

    fn source(dir: &Path, body: &str) -> Result<CsvRegistrySource> {
        let path = dir.join("hvtn.csv");
        std::fs::write(&path, body)?;
        Ok(CsvRegistrySource::new(
            [(Network::Hvtn, path)].into_iter().collect(),
        ))
    }

    #[test]
    fn test_pull_filters_by_protocol() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = source(dir.path(), EXPORT)?;
        let snapshot = source.pull_snapshot(Network::Hvtn, Protocol::new(302))?;
        assert_eq!(snapshot.columns, STANDARD_COLS.to_vec());
        let ids: Vec<_> = snapshot.records.iter().map(|r| r.specimen_id.clone()).collect();
        assert_eq!(ids, vec![SpecimenId::from("S1"), SpecimenId::from("S3")]);
        assert!(snapshot.records.iter().all(|r| r.extra.is_empty()));

        assert!(source.pull_snapshot(Network::Hvtn, Protocol::new(999))?.is_empty());
        assert!(source.pull_snapshot(Network::Covpn, Protocol::new(302)).is_err());
        assert!(source.last_modified(Network::Hvtn).is_ok());
        Ok(())
    }

    #[test]
    fn test_pull_requires_standard_columns() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = source(dir.path(), "guspec,lstudy\nS1,302\n")?;
        assert!(source.pull_snapshot(Network::Hvtn, Protocol::new(302)).is_err());
        Ok(())
    }

    #[test]
    fn test_retry_until_success() -> Result<()> {
        let cfg = RetryConfig {
            attempts: 3,
            initial_backoff_ms: 0,
        };
        let calls = Cell::new(0);
        let v = with_retry(&cfg, "pull", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(anyhow!("connection reset"))
            } else {
                Ok(42)
            }
        })?;
        assert_eq!((v, calls.get()), (42, 3));

        calls.set(0);
        let err = with_retry(&cfg, "pull", || -> Result<()> {
            calls.set(calls.get() + 1);
            Err(anyhow!("connection reset"))
        })
        .unwrap_err();
        assert_eq!(calls.get(), 3);
        assert_eq!(
            format!("{err:#}"),
            "pull failed after 3 attempts: connection reset"
        );
        Ok(())
    }

    #[test]
    fn test_backoff_saturates() {
        assert_eq!(next_backoff(Duration::from_millis(250)), Duration::from_millis(500));
        assert_eq!(next_backoff(Duration::MAX), Duration::MAX);
        assert_eq!(next_backoff(Duration::MAX / 2 + Duration::from_secs(1)), Duration::MAX);
    }
}
