//! Regenerating affected current outputs.
//!
//! Jobs that can be regenerated are registered by name in a [`JobRegistry`].
//! Affected jobs without a registered re-run are left for manual follow-up.

use crate::AffectedJob;
use anyhow::{ensure, Context, Result};
use log::{info, warn};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;

/// Environment variable carrying the job configuration path to a re-run command.
pub const JOB_CONFIG_ENV: &str = "SPECIMEN_MONITOR_JOB_CONFIG";

/// Something that can regenerate the output of one job.
pub trait RerunJob {
    fn rerun(&self, job: &AffectedJob) -> Result<()>;
}

/// Re-run a job by running an external command from the job's configuration
/// directory. The configuration path is passed in [`JOB_CONFIG_ENV`].
#[derive(Debug, Clone)]
pub struct CommandJob {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl RerunJob for CommandJob {
    fn rerun(&self, job: &AffectedJob) -> Result<()> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).env(JOB_CONFIG_ENV, &job.config_path);
        if let Some(dir) = job.config_path.parent() {
            command.current_dir(dir);
        }
        let status = command
            .status()
            .with_context(|| format!("Running {}", self.program.display()))?;
        ensure!(
            status.success(),
            "{} exited with {status} while re-running {}",
            self.program.display(),
            job.name
        );
        Ok(())
    }
}

/// What happened to the affected jobs handed to [`JobRegistry::rerun_affected`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RerunSummary {
    pub rerun: Vec<String>,
    /// Jobs with no registered re-run; these need manual follow-up.
    pub unregistered: Vec<String>,
    /// Job name and error message of each failed re-run.
    pub failed: Vec<(String, String)>,
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: BTreeMap<String, Box<dyn RerunJob>>,
}

impl JobRegistry {
    pub fn new() -> JobRegistry {
        JobRegistry::default()
    }

    pub fn register(&mut self, name: impl Into<String>, job: Box<dyn RerunJob>) {
        self.jobs.insert(name.into(), job);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Re-run every affected job that has a registered re-run. A failure is
    /// recorded and does not stop the remaining re-runs.
    pub fn rerun_affected(&self, affected: &[AffectedJob]) -> RerunSummary {
        let mut summary = RerunSummary::default();
        for job in affected {
            let Some(rerun) = self.jobs.get(&job.name) else {
                info!("no re-run registered for {}; needs manual follow-up", job.name);
                summary.unregistered.push(job.name.clone());
                continue;
            };
            info!("re-running {}", job.name);
            match rerun.rerun(job) {
                Ok(()) => summary.rerun.push(job.name.clone()),
                Err(e) => {
                    warn!("re-running {} failed: {e:#}", job.name);
                    summary.failed.push((job.name.clone(), format!("{e:#}")));
                }
            }
        }
        summary
    }
}
