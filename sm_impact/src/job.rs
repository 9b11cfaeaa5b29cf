//! Current jobs: outputs whose generating job is described by a configuration
//! file next to its script.
//!
//! A job configuration names the directory the job writes to (`savedir`) and
//! one or more file name prefixes (`output_prefix`). The job's current output
//! for a prefix is the lexically greatest file in `savedir` starting with it,
//! which is the most recent one for date-stamped names.
//!
//! The configuration also carries a cache of the specimen ids the output
//! contains, together with the outputs and the modification time it was built
//! from. The cache is rebuilt, and written back to the configuration, whenever
//! the current outputs are different files or newer on disk.

use crate::output::read_specimen_ids;
use anyhow::{ensure, Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sm_types::SpecimenId;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("No file starting with '{prefix}' in {savedir:?}")]
    OutputNotFound { savedir: PathBuf, prefix: String },

    #[error("Unable to list the output directory {savedir:?}")]
    SaveDir {
        savedir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputPrefix {
    One(String),
    Many(Vec<String>),
}

impl OutputPrefix {
    pub fn as_slice(&self) -> &[String] {
        match self {
            OutputPrefix::One(p) => std::slice::from_ref(p),
            OutputPrefix::Many(ps) => ps,
        }
    }
}

/// Contents of a job configuration file. Keys other than the ones below are
/// kept as-is so they survive a cache write-back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub savedir: PathBuf,
    pub output_prefix: OutputPrefix,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specimen_ids: Option<BTreeSet<SpecimenId>>,
    /// Modification time, in seconds since the epoch, of the newest output
    /// the cached `specimen_ids` were read from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specimen_ids_mtime: Option<u64>,
    /// Outputs the cached `specimen_ids` were read from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specimen_ids_outputs: Option<Vec<PathBuf>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// A job configuration together with where it was found.
#[derive(Debug, Clone)]
pub struct Job {
    /// Directory of the configuration relative to the jobs root, e.g. `CoVPN3008/elisa`.
    pub name: String,
    pub config_path: PathBuf,
    pub config: JobConfig,
}

fn mtime_secs(path: &Path) -> Result<u64> {
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .with_context(|| path.display().to_string())?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs())
}

impl Job {
    /// Load the configuration at `config_path`. An empty file is a job that
    /// has not been filled in yet and yields None.
    pub fn load(name: String, config_path: &Path) -> Result<Option<Job>> {
        let text = std::fs::read_to_string(config_path)
            .with_context(|| config_path.display().to_string())?;
        if text.trim().is_empty() {
            warn!("{} is empty; please fill it in", config_path.display());
            return Ok(None);
        }
        let config: JobConfig = serde_yaml::from_str(&text)
            .with_context(|| format!("Error parsing job configuration {}", config_path.display()))?;
        Ok(Some(Job {
            name,
            config_path: config_path.to_path_buf(),
            config,
        }))
    }

    /// Write the configuration back to where it was loaded from.
    pub fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&self.config)?;
        std::fs::write(&self.config_path, yaml)
            .with_context(|| self.config_path.display().to_string())
    }

    /// Most recent output for each declared prefix, in declaration order.
    pub fn locate_outputs(&self) -> Result<Vec<PathBuf>, JobError> {
        let savedir = &self.config.savedir;
        let mut names = Vec::new();
        let entries = std::fs::read_dir(savedir).map_err(|source| JobError::SaveDir {
            savedir: savedir.clone(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| JobError::SaveDir {
                savedir: savedir.clone(),
                source,
            })?;
            if entry.path().is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }

        self.config
            .output_prefix
            .as_slice()
            .iter()
            .map(|prefix| {
                names
                    .iter()
                    .filter(|n| n.starts_with(prefix.as_str()))
                    .max()
                    .map(|n| savedir.join(n))
                    .ok_or_else(|| JobError::OutputNotFound {
                        savedir: savedir.clone(),
                        prefix: prefix.clone(),
                    })
            })
            .collect()
    }

    /// Specimen ids referenced by the job's current outputs, from the cache
    /// when it is still fresh, otherwise read from the outputs and written back.
    pub fn specimen_ids(&mut self) -> Result<&BTreeSet<SpecimenId>> {
        let outputs = self.locate_outputs()?;
        let mut newest = 0;
        for output in &outputs {
            newest = newest.max(mtime_secs(output)?);
        }

        let fresh = matches!(
            (
                &self.config.specimen_ids,
                self.config.specimen_ids_mtime,
                &self.config.specimen_ids_outputs,
            ),
            (Some(_), Some(cached), Some(built_from)) if cached >= newest && *built_from == outputs
        );
        if !fresh {
            info!("building specimen id cache for job {}", self.name);
            let mut ids = BTreeSet::new();
            for output in &outputs {
                match read_specimen_ids(output)? {
                    Some(found) => ids.extend(found),
                    None => warn!("no specimen id column in {}", output.display()),
                }
            }
            self.config.specimen_ids = Some(ids);
            self.config.specimen_ids_mtime = Some(newest);
            self.config.specimen_ids_outputs = Some(outputs);
            self.save()?;
        } else {
            debug!("using cached specimen ids for job {}", self.name);
        }
        Ok(self.config.specimen_ids.get_or_insert_with(BTreeSet::new))
    }
}

/// Name and path of every job configuration named `config_name` below
/// `jobs_root`, sorted by path. Nothing is loaded.
pub fn find_job_configs(jobs_root: &Path, config_name: &str) -> Result<Vec<(String, PathBuf)>> {
    ensure!(
        jobs_root.is_dir(),
        "The jobs root {} is not a directory",
        jobs_root.display()
    );
    let pattern = format!(
        "{}/**/{}",
        glob::Pattern::escape(&jobs_root.to_string_lossy()),
        glob::Pattern::escape(config_name)
    );
    let mut paths = Vec::new();
    for entry in glob::glob(&pattern).with_context(|| pattern.clone())? {
        paths.push(entry.with_context(|| jobs_root.display().to_string())?);
    }
    paths.sort();
    Ok(paths
        .into_iter()
        .map(|path| (job_name(jobs_root, &path), path))
        .collect())
}

/// Load every job configuration named `config_name` below `jobs_root`, sorted by path.
pub fn discover_jobs(jobs_root: &Path, config_name: &str) -> Result<Vec<Job>> {
    let mut jobs = Vec::new();
    for (name, path) in find_job_configs(jobs_root, config_name)? {
        if let Some(job) = Job::load(name, &path)? {
            jobs.push(job);
        }
    }
    debug!("found {} job configurations under {}", jobs.len(), jobs_root.display());
    Ok(jobs)
}

fn job_name(jobs_root: &Path, config_path: &Path) -> String {
    let dir = config_path.parent().unwrap_or(config_path);
    match dir.strip_prefix(jobs_root) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel.to_string_lossy().into_owned(),
        _ => dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string()),
    }
}

/// Set the modification time of `path`, for tests of cache staleness.
#[cfg(test)]
pub(crate) fn set_mtime(path: &Path, secs: u64) -> Result<()> {
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_modified(UNIX_EPOCH + std::time::Duration::from_secs(secs))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(ids: &[&str]) -> BTreeSet<SpecimenId> {
        ids.iter().map(|id| SpecimenId::from(*id)).collect()
    }

    fn write_job(root: &Path, dir: &str, body: &str) -> Result<PathBuf> {
        let dir = root.join(dir);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("paths.yaml");
        std::fs::write(&path, body)?;
        Ok(path)
    }

    #[test]
    fn test_locate_outputs_picks_latest_per_prefix() -> Result<()> {
        let root = tempfile::tempdir()?;
        let out = root.path().join("out");
        std::fs::create_dir(&out)?;
        for name in [
            "DRT.elisa.processed.20240101.txt",
            "DRT.elisa.processed.20240301.txt",
            "DRT.bama.processed.20240201.txt",
            "notes.txt",
        ] {
            std::fs::write(out.join(name), "guspec\nS1\n")?;
        }
        let config = write_job(
            root.path(),
            "jobs/CoVPN3008/elisa",
            &format!(
                "savedir: {}\noutput_prefix:\n  - DRT.elisa\n  - DRT.bama\n",
                out.display()
            ),
        )?;
        let job = Job::load("elisa".to_string(), &config)?.unwrap();
        assert_eq!(
            job.locate_outputs()?,
            vec![
                out.join("DRT.elisa.processed.20240301.txt"),
                out.join("DRT.bama.processed.20240201.txt")
            ]
        );

        let mut missing = job.clone();
        missing.config.output_prefix = OutputPrefix::One("DRT.icabs".to_string());
        assert!(matches!(
            missing.locate_outputs(),
            Err(JobError::OutputNotFound { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_cache_is_written_back_and_refreshed() -> Result<()> {
        let root = tempfile::tempdir()?;
        let out = root.path().join("out");
        std::fs::create_dir(&out)?;
        let output = out.join("DRT.elisa.20240101.txt");
        std::fs::write(&output, "guspec\tresult\nS1\t1\nS2\t2\n")?;
        set_mtime(&output, 1_700_000_000)?;

        let config = write_job(
            root.path(),
            "jobs/elisa",
            &format!(
                "savedir: {}\noutput_prefix: DRT.elisa\nowner: lab\n",
                out.display()
            ),
        )?;
        let mut job = Job::load("elisa".to_string(), &config)?.unwrap();
        assert_eq!(job.specimen_ids()?, &ids(&["S1", "S2"]));

        // written back, unknown keys kept
        let reloaded = Job::load("elisa".to_string(), &config)?.unwrap();
        assert_eq!(reloaded.config.specimen_ids, Some(ids(&["S1", "S2"])));
        assert_eq!(reloaded.config.specimen_ids_mtime, Some(1_700_000_000));
        assert_eq!(reloaded.config.specimen_ids_outputs, Some(vec![output.clone()]));
        assert_eq!(
            reloaded.config.extra.get("owner"),
            Some(&serde_yaml::Value::from("lab"))
        );

        // same output: the cache is used even if it disagrees with the file
        let mut job = reloaded;
        job.config.specimen_ids = Some(ids(&["S7"]));
        assert_eq!(job.specimen_ids()?, &ids(&["S7"]));

        // newer output: rebuilt
        std::fs::write(&output, "guspec\tresult\nS3\t1\n")?;
        set_mtime(&output, 1_700_000_100)?;
        assert_eq!(job.specimen_ids()?, &ids(&["S3"]));
        Ok(())
    }

    #[test]
    fn test_cache_rebuilt_when_newest_output_disappears() -> Result<()> {
        let root = tempfile::tempdir()?;
        let out = root.path().join("out");
        std::fs::create_dir(&out)?;
        let older = out.join("DRT.elisa.20240101.txt");
        let newer = out.join("DRT.elisa.20240201.txt");
        std::fs::write(&older, "guspec\nS1\n")?;
        std::fs::write(&newer, "guspec\nS2\n")?;
        set_mtime(&older, 1_700_000_000)?;
        set_mtime(&newer, 1_700_000_200)?;

        let config = write_job(
            root.path(),
            "jobs/elisa",
            &format!("savedir: {}\noutput_prefix: DRT.elisa\n", out.display()),
        )?;
        let mut job = Job::load("elisa".to_string(), &config)?.unwrap();
        assert_eq!(job.specimen_ids()?, &ids(&["S2"]));

        // the older output is current again; its mtime is below the cached one
        std::fs::remove_file(&newer)?;
        assert_eq!(job.specimen_ids()?, &ids(&["S1"]));
        let reloaded = Job::load("elisa".to_string(), &config)?.unwrap();
        assert_eq!(reloaded.config.specimen_ids_outputs, Some(vec![older]));
        assert_eq!(reloaded.config.specimen_ids_mtime, Some(1_700_000_000));
        Ok(())
    }

    #[test]
    fn test_discover_jobs() -> Result<()> {
        let root = tempfile::tempdir()?;
        let jobs_root = root.path().join("processing_scripts");
        write_job(&jobs_root, "HVTN302/elisa", "savedir: /x\noutput_prefix: a\n")?;
        write_job(&jobs_root, "CoVPN3008/bama", "savedir: /y\noutput_prefix: [b, c]\n")?;
        write_job(&jobs_root, "HVTN135", "")?;
        std::fs::write(jobs_root.join("HVTN302/other.yaml"), "savedir: /z\n")?;

        let jobs = discover_jobs(&jobs_root, "paths.yaml")?;
        let names: Vec<_> = jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["CoVPN3008/bama", "HVTN302/elisa"]);
        assert_eq!(
            jobs[0].config.output_prefix.as_slice(),
            &["b".to_string(), "c".to_string()]
        );

        assert!(find_job_configs(&root.path().join("nowhere"), "paths.yaml").is_err());
        Ok(())
    }
}
