//! Reading the specimen ids referenced by a generated output file.

use anyhow::Result;
use io_utils::Table;
use sm_types::constants::OUTPUT_SPECIMEN_ID_COLUMNS;
use sm_types::SpecimenId;
use std::collections::BTreeSet;
use std::path::Path;

/// Distinct specimen ids in the output at `path`, or None if the output has
/// no specimen id column. Column names are matched case-insensitively.
pub fn read_specimen_ids(path: &Path) -> Result<Option<BTreeSet<SpecimenId>>> {
    let table = Table::read_normalized(path)?;
    Ok(specimen_ids_of(&table))
}

pub(crate) fn specimen_ids_of(table: &Table) -> Option<BTreeSet<SpecimenId>> {
    let column = table.find_column(&OUTPUT_SPECIMEN_ID_COLUMNS)?;
    let values = table.column_values(column)?;
    Some(values.map(SpecimenId::from).collect())
}
