//! sm_store
//! Durable, append-only storage of daily registry snapshots with bounded retention.
//!
//! Snapshots of one (network, protocol) pair live in
//! `{studies_root}/{NETWORK}/{protocol_dir}/specimens/ldms_feed/`. A snapshot is
//! written once and never modified; the only other mutation is pruning the
//! oldest files.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use io_utils::write_table;
use log::{debug, info};
use sm_types::constants::STANDARD_COLS;
use sm_types::{ProtocolKey, Snapshot};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

mod name;
pub use name::{SnapshotName, SnapshotNameError};

/// Result of [`SnapshotStore::save_snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A new snapshot was written at this path.
    Created(PathBuf),
    /// A snapshot for that date was already present and was left untouched.
    AlreadyExists(PathBuf),
}

impl SaveOutcome {
    pub fn path(&self) -> &Path {
        match self {
            SaveOutcome::Created(p) | SaveOutcome::AlreadyExists(p) => p,
        }
    }
}

/// A snapshot file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSnapshot {
    pub name: SnapshotName,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    studies_root: PathBuf,
    extension: String,
    protocol_dirs: BTreeMap<ProtocolKey, String>,
}

impl SnapshotStore {
    pub fn new(studies_root: impl Into<PathBuf>, extension: &str) -> SnapshotStore {
        SnapshotStore {
            studies_root: studies_root.into(),
            extension: extension.trim_start_matches('.').to_string(),
            protocol_dirs: BTreeMap::new(),
        }
    }

    /// Use `dir` instead of the default directory name for `key`.
    pub fn with_protocol_dir(mut self, key: ProtocolKey, dir: impl Into<String>) -> SnapshotStore {
        self.protocol_dirs.insert(key, dir.into());
        self
    }

    /// Directory name of a protocol under its network, `HVTN049` or `CoVPN3008` by default.
    pub fn protocol_dir(&self, key: ProtocolKey) -> String {
        match self.protocol_dirs.get(&key) {
            Some(dir) => dir.clone(),
            None => format!("{}{:03}", key.network, key.protocol.number()),
        }
    }

    pub fn feed_dir(&self, key: ProtocolKey) -> PathBuf {
        self.studies_root
            .join(key.network.to_string())
            .join(self.protocol_dir(key))
            .join("specimens")
            .join("ldms_feed")
    }

    pub fn snapshot_path(&self, key: ProtocolKey, date: NaiveDate) -> PathBuf {
        self.feed_dir(key)
            .join(SnapshotName::new(key, date, &self.extension).to_string())
    }

    pub fn has_snapshot(&self, key: ProtocolKey, date: NaiveDate) -> bool {
        self.snapshot_path(key, date).is_file()
    }

    /// Write `snapshot` as the snapshot of `key` for `as_of`.
    ///
    /// An existing snapshot for that date is never overwritten; the call then
    /// returns [`SaveOutcome::AlreadyExists`]. Missing directories are created.
    pub fn save_snapshot(
        &self,
        key: ProtocolKey,
        snapshot: &Snapshot,
        as_of: NaiveDate,
    ) -> Result<SaveOutcome> {
        let path = self.snapshot_path(key, as_of);
        if path.exists() {
            info!("{} already exists", path.display());
            return Ok(SaveOutcome::AlreadyExists(path));
        }

        let dir = self.feed_dir(key);
        if !dir.is_dir() {
            info!("creating snapshot directory for {key}: {}", dir.display());
            std::fs::create_dir_all(&dir).with_context(|| dir.display().to_string())?;
        }

        let columns: Vec<String> = if snapshot.columns.is_empty() {
            STANDARD_COLS.iter().map(ToString::to_string).collect()
        } else {
            snapshot.columns.clone()
        };

        // Write beside the final path, then link it into place without
        // replacing anything a concurrent writer put there first.
        let partial = tempfile::Builder::new()
            .prefix(".partial.")
            .suffix(&format!(".{}", self.extension))
            .tempfile_in(&dir)
            .with_context(|| dir.display().to_string())?;
        write_table(
            partial.path(),
            &columns,
            snapshot.records.iter().map(|r| r.to_row(&columns)),
        )?;
        match partial.persist_noclobber(&path) {
            Ok(_) => {
                info!("created {}", path.display());
                Ok(SaveOutcome::Created(path))
            }
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                info!("{} already exists", path.display());
                Ok(SaveOutcome::AlreadyExists(path))
            }
            Err(e) => Err(e.error).with_context(|| path.display().to_string()),
        }
    }

    /// All snapshots of `key`, oldest first. Files that do not follow the
    /// naming convention, or belong to another protocol, are ignored.
    pub fn list_snapshots(&self, key: ProtocolKey) -> Result<Vec<StoredSnapshot>> {
        let dir = self.feed_dir(key);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&dir).with_context(|| dir.display().to_string())? {
            let entry = entry.with_context(|| dir.display().to_string())?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            match file_name.parse::<SnapshotName>() {
                Ok(name) if name.key == key && name.extension == self.extension => {
                    found.push(StoredSnapshot {
                        name,
                        path: entry.path(),
                    });
                }
                Ok(_) => {}
                Err(e) => debug!("skipping {}: {e}", entry.path().display()),
            }
        }
        found.sort_by(|a, b| a.name.date.cmp(&b.name.date));
        Ok(found)
    }

    /// Delete all but the `keep_n` most recent snapshots of `key`, returning
    /// the deleted paths.
    pub fn prune(&self, key: ProtocolKey, keep_n: usize) -> Result<Vec<PathBuf>> {
        let snapshots = self.list_snapshots(key)?;
        let n_delete = snapshots.len().saturating_sub(keep_n);
        let mut deleted = Vec::with_capacity(n_delete);
        for snap in snapshots.into_iter().take(n_delete) {
            info!("deleting {}", snap.path.display());
            std::fs::remove_file(&snap.path).with_context(|| snap.path.display().to_string())?;
            deleted.push(snap.path);
        }
        Ok(deleted)
    }

    /// Load the snapshot of `key` for `date`, or None if there is none.
    pub fn load_dated(&self, key: ProtocolKey, date: NaiveDate) -> Result<Option<Snapshot>> {
        let path = self.snapshot_path(key, date);
        if !path.is_file() {
            return Ok(None);
        }
        self.load_snapshot(&path).map(Some)
    }

    /// Most recent stored snapshot of `key`.
    pub fn latest(&self, key: ProtocolKey) -> Result<Option<StoredSnapshot>> {
        Ok(self.list_snapshots(key)?.pop())
    }

    /// Most recent stored snapshot of `key` dated strictly before `date`.
    pub fn latest_before(&self, key: ProtocolKey, date: NaiveDate) -> Result<Option<StoredSnapshot>> {
        Ok(self
            .list_snapshots(key)?
            .into_iter()
            .take_while(|s| s.name.date < date)
            .last())
    }

    pub fn load_snapshot(&self, path: &Path) -> Result<Snapshot> {
        Snapshot::load(path).with_context(|| format!("Error loading snapshot {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sm_types::{Network, Protocol, SpecimenRecord};

    fn key() -> ProtocolKey {
        ProtocolKey::new(Network::Hvtn, Protocol::new(302))
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn snapshot(ids: &[&str]) -> Snapshot {
        let records = ids
            .iter()
            .map(|id| SpecimenRecord {
                patient_id: Some("110".to_string()),
                draw_year: Some(2024),
                ..SpecimenRecord::new(*id)
            })
            .collect();
        Snapshot::new(Vec::new(), records)
    }

    #[test]
    fn test_layout() {
        let store = SnapshotStore::new("/studies", "csv")
            .with_protocol_dir(ProtocolKey::new(Network::Hvtn, Protocol::new(703)), "HVTN703_704");
        assert_eq!(
            store.snapshot_path(key(), day(4)),
            Path::new("/studies/HVTN/HVTN302/specimens/ldms_feed/hvtn.ldms302.20240304.csv")
        );
        assert_eq!(
            store.protocol_dir(ProtocolKey::new(Network::Hvtn, Protocol::new(49))),
            "HVTN049"
        );
        assert_eq!(
            store.protocol_dir(ProtocolKey::new(Network::Hvtn, Protocol::new(703))),
            "HVTN703_704"
        );
    }

    #[test]
    fn test_save_is_idempotent() -> Result<()> {
        let root = tempfile::tempdir()?;
        let store = SnapshotStore::new(root.path(), "csv");

        let first = store.save_snapshot(key(), &snapshot(&["S1", "S2"]), day(4))?;
        assert!(matches!(first, SaveOutcome::Created(_)));
        let before = std::fs::read(first.path())?;

        let second = store.save_snapshot(key(), &snapshot(&["S9"]), day(4))?;
        assert_eq!(second, SaveOutcome::AlreadyExists(first.path().to_path_buf()));
        assert_eq!(std::fs::read(second.path())?, before);

        let loaded = store.load_snapshot(first.path())?;
        assert_eq!(loaded.columns, STANDARD_COLS.to_vec());
        assert_eq!(loaded.records, snapshot(&["S1", "S2"]).records);

        // only the finished file is left behind
        assert_eq!(std::fs::read_dir(store.feed_dir(key()))?.count(), 1);
        Ok(())
    }

    #[test]
    fn test_list_and_prune() -> Result<()> {
        let root = tempfile::tempdir()?;
        let store = SnapshotStore::new(root.path(), "csv");
        assert!(store.list_snapshots(key())?.is_empty());
        assert!(store.prune(key(), 2)?.is_empty());

        for d in [7, 4, 5, 6] {
            store.save_snapshot(key(), &snapshot(&["S1"]), day(d))?;
        }
        // files that are not snapshots of this protocol are left alone
        std::fs::write(store.feed_dir(key()).join("notes.txt"), "x")?;
        std::fs::write(
            store.feed_dir(key()).join("hvtn.ldms3020.20240301.csv"),
            "guspec\n",
        )?;

        let dates: Vec<_> = store
            .list_snapshots(key())?
            .into_iter()
            .map(|s| s.name.date)
            .collect();
        assert_eq!(dates, vec![day(4), day(5), day(6), day(7)]);

        assert!(store.prune(key(), 10)?.is_empty());
        assert_eq!(store.list_snapshots(key())?.len(), 4);

        let deleted = store.prune(key(), 2)?;
        assert_eq!(deleted.len(), 2);
        let dates: Vec<_> = store
            .list_snapshots(key())?
            .into_iter()
            .map(|s| s.name.date)
            .collect();
        assert_eq!(dates, vec![day(6), day(7)]);
        assert_eq!(store.latest(key())?.map(|s| s.name.date), Some(day(7)));
        assert_eq!(store.latest_before(key(), day(7))?.map(|s| s.name.date), Some(day(6)));
        assert_eq!(store.latest_before(key(), day(11))?.map(|s| s.name.date), Some(day(7)));
        assert_eq!(store.latest_before(key(), day(6))?, None);
        assert!(store.feed_dir(key()).join("notes.txt").exists());

        store.prune(key(), 0)?;
        assert!(store.list_snapshots(key())?.is_empty());
        Ok(())
    }

    #[test]
    fn test_load_dated() -> Result<()> {
        let root = tempfile::tempdir()?;
        let store = SnapshotStore::new(root.path(), "csv");
        assert_eq!(store.load_dated(key(), day(4))?, None);
        store.save_snapshot(key(), &snapshot(&["S1"]), day(4))?;
        assert_eq!(store.load_dated(key(), day(4))?.map(|s| s.len()), Some(1));
        assert!(store.has_snapshot(key(), day(4)));
        Ok(())
    }
}
