use crate::constants::GUSPEC;
use crate::schema::SchemaError;
use crate::specimen::{SpecimenId, SpecimenRecord};
use anyhow::Result;
use io_utils::Table;
use itertools::Itertools;
use std::collections::BTreeSet;
use std::path::Path;

/// The typed rows of one registry extract, with the column names they were read from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub columns: Vec<String>,
    pub records: Vec<SpecimenRecord>,
}

impl Snapshot {
    pub fn new(columns: Vec<String>, records: Vec<SpecimenRecord>) -> Snapshot {
        Snapshot { columns, records }
    }

    /// Read a snapshot file, casting every registry column to its declared type.
    /// A file with no header at all is an empty snapshot.
    pub fn load(path: &Path) -> Result<Snapshot> {
        let table = Table::read(path)?;
        if table.headers().is_empty() {
            return Ok(Snapshot::default());
        }
        if !table.has_column(GUSPEC) {
            return Err(SchemaError::NoSpecimenIdColumn {
                path: path.to_path_buf(),
            }
            .into());
        }
        let records: Vec<SpecimenRecord> = (0..table.len())
            .map(|row| SpecimenRecord::from_table_row(&table, row))
            .try_collect()?;
        Ok(Snapshot {
            columns: table.headers().to_vec(),
            records,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Collapse exact-duplicate rows, keeping the first occurrence of each.
    pub fn dedup(self) -> Snapshot {
        Snapshot {
            columns: self.columns,
            records: self.records.into_iter().unique().collect(),
        }
    }

    pub fn specimen_ids(&self) -> BTreeSet<&SpecimenId> {
        self.records.iter().map(|r| &r.specimen_id).collect()
    }
}
