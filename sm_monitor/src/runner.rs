//! The scheduled batch run.

use crate::config::MonitorConfig;
use crate::freshness::was_registry_updated;
use crate::loader::ensure_snapshot;
use crate::source::RegistrySource;
use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, info, warn};
use sm_diff::{diff_snapshots, DiffOutcome};
use sm_impact::{AffectedJob, ImpactReport, ImpactResolver, JobRegistry};
use sm_notify::BatchReport;
use sm_store::SnapshotStore;
use sm_types::ProtocolKey;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Date of the snapshot to take and compare.
    pub as_of: NaiveDate,
    /// Time the freshness check is measured from.
    pub reference_time: NaiveDateTime,
    /// Pull even if the registry does not look updated.
    pub force: bool,
}

pub struct Monitor<'a> {
    config: &'a MonitorConfig,
    source: &'a dyn RegistrySource,
    store: SnapshotStore,
    resolver: ImpactResolver,
    jobs: JobRegistry,
}

impl<'a> Monitor<'a> {
    pub fn new(config: &'a MonitorConfig, source: &'a dyn RegistrySource) -> Result<Monitor<'a>> {
        Ok(Monitor {
            config,
            source,
            store: config.snapshot_store(),
            resolver: config.impact_resolver()?,
            jobs: config.job_registry(),
        })
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Process every monitored protocol. A failure is recorded against the
    /// network or protocol it happened in and the run moves on.
    pub fn run(&self, options: &RunOptions) -> BatchReport {
        let mut report = BatchReport::new();
        let mut affected = BTreeSet::new();

        for (&network, network_config) in &self.config.networks {
            if !options.force {
                match was_registry_updated(self.source, network, options.reference_time) {
                    Ok(true) => {}
                    Ok(false) => {
                        info!("{network} registry not updated; skipping");
                        continue;
                    }
                    Err(e) => {
                        warn!("{network} freshness check failed: {e:#}");
                        report.record_error(network, &e);
                        continue;
                    }
                }
            }

            let saved = ensure_snapshot(
                &self.store,
                self.source,
                &self.config.pull_retry,
                network,
                &network_config.protocols,
                options.as_of,
            );
            for (key, outcome) in saved {
                let result = outcome.and_then(|_| {
                    self.compare(key, options.as_of, &mut report, &mut affected)
                });
                if let Err(e) = result {
                    warn!("{key} failed: {e:#}");
                    report.record_error(key, &e);
                }
            }
        }

        if self.config.rerun_affected && !affected.is_empty() {
            let affected: Vec<AffectedJob> = affected.into_iter().collect();
            report.record_reruns(self.jobs.rerun_affected(&affected));
        }
        report
    }

    /// Compare the snapshot of `as_of` with the newest stored snapshot dated
    /// before it, resolve the impact of any change, then apply retention.
    /// Days the registry was skipped leave no snapshot, so the previous one
    /// can be older than the last business day.
    fn compare(
        &self,
        key: ProtocolKey,
        as_of: NaiveDate,
        report: &mut BatchReport,
        affected: &mut BTreeSet<AffectedJob>,
    ) -> Result<()> {
        let old = match self.store.latest_before(key, as_of)? {
            Some(previous) => {
                debug!("{key}: comparing with {}", previous.path.display());
                self.store.load_snapshot(&previous.path)?
            }
            None => {
                info!("{key}: no snapshot before {as_of}; nothing to compare");
                Default::default()
            }
        };
        let new = self.store.load_dated(key, as_of)?.unwrap_or_default();

        match diff_snapshots(&old, &new) {
            DiffOutcome::NothingToCompare => debug!("{key}: nothing to compare"),
            DiffOutcome::SchemaMismatch { unshared_columns } => {
                warn!("{key}: snapshot columns differ: {unshared_columns:?}");
                report.record_schema_mismatch(key, unshared_columns);
            }
            DiffOutcome::Compared(change) => {
                let impact = match self.resolver.resolve(&change.impact_keys()) {
                    Ok(impact) => impact,
                    Err(e) => {
                        warn!("{key}: unable to resolve impact: {e:#}");
                        report.record_error(key, &e);
                        ImpactReport::default()
                    }
                };
                affected.extend(impact.current_jobs.iter().cloned());
                report.record_change(key, change, impact);
            }
        }

        self.store.prune(key, self.config.retention)?;
        Ok(())
    }
}
