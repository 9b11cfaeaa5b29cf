//! sm_impact
//! Find the generated outputs affected by a set of changed specimens.
//!
//! Two independent strategies are combined: a frozen lookup table for legacy
//! outputs, and the specimen id caches of the current job configurations.

use anyhow::Result;
use log::{info, warn};
use serde::Serialize;
use sm_types::SpecimenId;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub mod job;
pub mod legacy;
pub mod output;
pub mod rerun;

pub use job::{discover_jobs, find_job_configs, Job, JobConfig, JobError};
pub use legacy::LegacyImpactTable;
pub use rerun::{CommandJob, JobRegistry, RerunJob, RerunSummary};

/// A current job whose output references a changed specimen.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct AffectedJob {
    pub name: String,
    pub config_path: PathBuf,
    pub outputs: Vec<PathBuf>,
}

/// A current job that could not be checked, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UncheckedJob {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImpactReport {
    /// Legacy outputs; these cannot be regenerated automatically.
    pub legacy_outputs: BTreeSet<PathBuf>,
    pub current_jobs: Vec<AffectedJob>,
    /// Jobs whose configuration or outputs could not be read; they may or may
    /// not be affected.
    pub unchecked_jobs: Vec<UncheckedJob>,
}

impl ImpactReport {
    /// True if no output is known to be affected.
    pub fn is_empty(&self) -> bool {
        self.legacy_outputs.is_empty() && self.current_jobs.is_empty()
    }
}

/// Result of the current-job strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurrentImpact {
    pub affected: Vec<AffectedJob>,
    pub unchecked: Vec<UncheckedJob>,
}

/// Where to find current job configurations.
#[derive(Debug, Clone)]
pub struct JobDiscovery {
    pub jobs_root: PathBuf,
    pub config_name: String,
}

pub struct ImpactResolver {
    legacy: LegacyImpactTable,
    discovery: Option<JobDiscovery>,
}

impl ImpactResolver {
    pub fn new(legacy: LegacyImpactTable, discovery: Option<JobDiscovery>) -> ImpactResolver {
        ImpactResolver { legacy, discovery }
    }

    pub fn resolve_legacy(&self, changed: &BTreeSet<SpecimenId>) -> BTreeSet<PathBuf> {
        self.legacy.resolve(changed)
    }

    /// Current jobs whose outputs reference any of `changed`. Builds and
    /// writes back the specimen id cache of any job lacking a fresh one.
    ///
    /// One job never stops the others from being checked: a job whose output
    /// cannot be located is skipped with a warning, and a job that fails to
    /// load or read is listed as unchecked.
    pub fn resolve_current(&self, changed: &BTreeSet<SpecimenId>) -> Result<CurrentImpact> {
        let mut impact = CurrentImpact::default();
        let Some(discovery) = &self.discovery else {
            return Ok(impact);
        };
        for (name, config_path) in find_job_configs(&discovery.jobs_root, &discovery.config_name)? {
            match check_job(name.clone(), &config_path, changed) {
                Ok(Some(job)) => {
                    info!("job {} is affected", job.name);
                    impact.affected.push(job);
                }
                Ok(None) => {}
                Err(e) => match e.downcast_ref::<JobError>() {
                    Some(job_err) => warn!("skipping job {name}: {job_err}"),
                    None => {
                        warn!("unable to check job {name}: {e:#}");
                        impact.unchecked.push(UncheckedJob {
                            name,
                            error: format!("{e:#}"),
                        });
                    }
                },
            }
        }
        Ok(impact)
    }

    /// Union of the legacy and current strategies.
    pub fn resolve(&self, changed: &BTreeSet<SpecimenId>) -> Result<ImpactReport> {
        if changed.is_empty() {
            return Ok(ImpactReport::default());
        }
        let current = self.resolve_current(changed)?;
        Ok(ImpactReport {
            legacy_outputs: self.resolve_legacy(changed),
            current_jobs: current.affected,
            unchecked_jobs: current.unchecked,
        })
    }
}

/// The job at `config_path` if its outputs reference any of `changed`.
fn check_job(
    name: String,
    config_path: &Path,
    changed: &BTreeSet<SpecimenId>,
) -> Result<Option<AffectedJob>> {
    let Some(mut job) = Job::load(name, config_path)? else {
        return Ok(None);
    };
    let ids = job.specimen_ids()?;
    if !changed.iter().any(|id| ids.contains(id)) {
        return Ok(None);
    }
    let outputs = job.locate_outputs()?;
    Ok(Some(AffectedJob {
        name: job.name,
        config_path: job.config_path,
        outputs,
    }))
}
