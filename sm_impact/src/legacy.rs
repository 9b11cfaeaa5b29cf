//! The frozen table of legacy outputs.
//!
//! Legacy outputs predate per-job configuration files and cannot be
//! regenerated automatically. Their specimen ids are indexed once, with
//! [`LegacyImpactTable::freeze`], and the table is only ever read afterwards.

use crate::output::read_specimen_ids;
use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sm_types::SpecimenId;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Map from specimen id to the legacy outputs that reference it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LegacyImpactTable(BTreeMap<SpecimenId, BTreeSet<PathBuf>>);

impl LegacyImpactTable {
    pub fn load(path: &Path) -> Result<LegacyImpactTable> {
        let text = std::fs::read_to_string(path).with_context(|| path.display().to_string())?;
        if text.trim().is_empty() {
            return Ok(LegacyImpactTable::default());
        }
        serde_yaml::from_str(&text)
            .with_context(|| format!("Error parsing legacy impact table {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml).with_context(|| path.display().to_string())
    }

    /// Index the specimen ids of every output in `outputs`. Outputs without a
    /// specimen id column are skipped with a warning.
    pub fn freeze(outputs: &[PathBuf]) -> Result<LegacyImpactTable> {
        let mut table = LegacyImpactTable::default();
        for path in outputs {
            let Some(ids) = read_specimen_ids(path)? else {
                warn!("no specimen id column in {}; not indexed", path.display());
                continue;
            };
            info!("indexed {} specimen ids from {}", ids.len(), path.display());
            for id in ids {
                table.0.entry(id).or_default().insert(path.clone());
            }
        }
        Ok(table)
    }

    /// Legacy outputs referencing any of `ids`. Unknown ids are skipped.
    pub fn resolve<'a>(&self, ids: impl IntoIterator<Item = &'a SpecimenId>) -> BTreeSet<PathBuf> {
        ids.into_iter()
            .filter_map(|id| self.0.get(id))
            .flatten()
            .cloned()
            .collect()
    }

    /// Number of indexed specimen ids.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(SpecimenId, BTreeSet<PathBuf>)> for LegacyImpactTable {
    fn from_iter<I: IntoIterator<Item = (SpecimenId, BTreeSet<PathBuf>)>>(iter: I) -> Self {
        LegacyImpactTable(iter.into_iter().collect())
    }
}

/// Read a list of output paths, one per line. Blank lines and `#` comments are ignored.
pub fn read_output_list(path: &Path) -> Result<Vec<PathBuf>> {
    let text = std::fs::read_to_string(path).with_context(|| path.display().to_string())?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(PathBuf::from)
        .collect())
}
