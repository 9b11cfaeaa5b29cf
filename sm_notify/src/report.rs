use itertools::Itertools;
use log::info;
use sm_diff::ChangeRecord;
use sm_impact::{ImpactReport, RerunSummary};
use sm_types::{ProtocolKey, SpecimenId};
use std::collections::BTreeSet;
use std::fmt::{self, Display, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Routine,
    /// Specimens were removed from the registry or changed their row count.
    Elevated,
}

/// A composed notification, independent of how it is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub body: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolChange {
    pub key: ProtocolKey,
    pub change: ChangeRecord,
    pub impact: ImpactReport,
}

/// An output row that disagrees with the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditMismatch {
    pub output: PathBuf,
    pub specimen_id: SpecimenId,
    pub detail: String,
}

/// Everything worth reporting from one batch run.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub schema_mismatches: Vec<(ProtocolKey, BTreeSet<String>)>,
    pub changes: Vec<ProtocolChange>,
    pub reruns: RerunSummary,
    /// What failed, and the error chain.
    pub errors: Vec<(String, String)>,
    pub audit_mismatches: Vec<AuditMismatch>,
    pub missing_identifier: Vec<PathBuf>,
    pub audit_errors: Vec<(PathBuf, String)>,
}

impl BatchReport {
    pub fn new() -> BatchReport {
        BatchReport::default()
    }

    pub fn record_schema_mismatch(&mut self, key: ProtocolKey, unshared_columns: BTreeSet<String>) {
        self.schema_mismatches.push((key, unshared_columns));
    }

    /// Record the changes of one protocol. Changes limited to added specimens
    /// are kept, and reported as routine, since they cannot affect existing
    /// outputs.
    pub fn record_change(&mut self, key: ProtocolKey, change: ChangeRecord, impact: ImpactReport) {
        if !change.added_keys.is_empty() {
            info!(
                "{key}: {} specimens added: {}",
                change.added_keys.len(),
                change.added_keys.iter().join(", ")
            );
        }
        if change.is_empty() {
            return;
        }
        self.changes.push(ProtocolChange {
            key,
            change,
            impact,
        });
    }

    pub fn record_reruns(&mut self, summary: RerunSummary) {
        self.reruns.rerun.extend(summary.rerun);
        self.reruns.unregistered.extend(summary.unregistered);
        self.reruns.failed.extend(summary.failed);
    }

    /// Record a failure that ended the processing of `what`.
    pub fn record_error(&mut self, what: impl Display, error: &anyhow::Error) {
        self.errors.push((what.to_string(), format!("{error:#}")));
    }

    pub fn record_audit_mismatch(&mut self, output: &Path, specimen_id: SpecimenId, detail: String) {
        self.audit_mismatches.push(AuditMismatch {
            output: output.to_path_buf(),
            specimen_id,
            detail,
        });
    }

    pub fn record_missing_identifier(&mut self, output: &Path) {
        self.missing_identifier.push(output.to_path_buf());
    }

    pub fn record_audit_error(&mut self, output: &Path, error: &anyhow::Error) {
        self.audit_errors
            .push((output.to_path_buf(), format!("{error:#}")));
    }

    /// True if there is nothing to report.
    pub fn is_empty(&self) -> bool {
        self.schema_mismatches.is_empty()
            && self.changes.is_empty()
            && self.reruns == RerunSummary::default()
            && self.errors.is_empty()
            && self.audit_mismatches.is_empty()
            && self.missing_identifier.is_empty()
            && self.audit_errors.is_empty()
    }

    pub fn severity(&self) -> Severity {
        if self.changes.iter().any(|c| c.change.is_severe()) {
            Severity::Elevated
        } else {
            Severity::Routine
        }
    }

    /// Render the report, one section per kind of issue. None if there is
    /// nothing to report.
    pub fn compose(&self, subject: &str) -> Result<Option<Message>, fmt::Error> {
        if self.is_empty() {
            return Ok(None);
        }
        let severity = self.severity();
        let subject = match severity {
            Severity::Elevated => format!("[ACTION REQUIRED] {subject}"),
            Severity::Routine => subject.to_string(),
        };

        let mut sections = Vec::new();
        if !self.schema_mismatches.is_empty() {
            sections.push(self.schema_section()?);
        }
        if !self.changes.is_empty() {
            sections.push(self.change_section()?);
        }
        if self.reruns != RerunSummary::default() {
            sections.push(self.rerun_section()?);
        }
        if !self.errors.is_empty() {
            sections.push(self.error_section()?);
        }
        if !(self.audit_mismatches.is_empty()
            && self.missing_identifier.is_empty()
            && self.audit_errors.is_empty())
        {
            sections.push(self.audit_section()?);
        }

        Ok(Some(Message {
            subject,
            body: sections.join("\n"),
            severity,
        }))
    }

    fn schema_section(&self) -> Result<String, fmt::Error> {
        let mut s = String::from("SCHEMA MISMATCHES (not compared)\n");
        for (key, columns) in &self.schema_mismatches {
            writeln!(s, "  {key}: columns not shared: {}", columns.iter().join(", "))?;
        }
        Ok(s)
    }

    fn change_section(&self) -> Result<String, fmt::Error> {
        let mut s = String::from("SPECIMEN CHANGES\n");
        for c in &self.changes {
            writeln!(s, "  {}", c.key)?;
            let sets = [
                ("removed from registry", &c.change.removed_keys),
                ("row count changed", &c.change.count_drift_keys),
                ("fields changed", &c.change.field_changed_keys),
                ("added to registry", &c.change.added_keys),
            ];
            for (label, ids) in sets {
                if !ids.is_empty() {
                    writeln!(s, "    {label} ({}): {}", ids.len(), ids.iter().join(", "))?;
                }
            }
            // added specimens are not looked up
            if c.impact.is_empty() && !c.change.impact_keys().is_empty() {
                writeln!(s, "    no monitored outputs affected")?;
            }
            if !c.impact.legacy_outputs.is_empty() {
                writeln!(s, "    affected legacy outputs (manual follow-up):")?;
                for path in &c.impact.legacy_outputs {
                    writeln!(s, "      {}", path.display())?;
                }
            }
            if !c.impact.current_jobs.is_empty() {
                writeln!(s, "    affected current jobs:")?;
                for job in &c.impact.current_jobs {
                    writeln!(
                        s,
                        "      {}: {}",
                        job.name,
                        job.outputs.iter().map(|p| p.display()).join(", ")
                    )?;
                }
            }
            if !c.impact.unchecked_jobs.is_empty() {
                writeln!(s, "    jobs that could not be checked:")?;
                for job in &c.impact.unchecked_jobs {
                    writeln!(s, "      {}: {}", job.name, job.error)?;
                }
            }
        }
        Ok(s)
    }

    fn rerun_section(&self) -> Result<String, fmt::Error> {
        let mut s = String::from("RE-RUNS\n");
        if !self.reruns.rerun.is_empty() {
            writeln!(s, "  re-ran: {}", self.reruns.rerun.iter().join(", "))?;
        }
        if !self.reruns.unregistered.is_empty() {
            writeln!(
                s,
                "  no re-run registered (manual follow-up): {}",
                self.reruns.unregistered.iter().join(", ")
            )?;
        }
        for (job, error) in &self.reruns.failed {
            writeln!(s, "  failed: {job}: {error}")?;
        }
        Ok(s)
    }

    fn error_section(&self) -> Result<String, fmt::Error> {
        let mut s = String::from("ENCOUNTERED ERRORS\n");
        for (what, error) in &self.errors {
            writeln!(s, "  {what}: {error}")?;
        }
        Ok(s)
    }

    fn audit_section(&self) -> Result<String, fmt::Error> {
        let mut s = String::from("OUTPUT AUDIT\n");
        for (output, rows) in &self
            .audit_mismatches
            .iter()
            .group_by(|m| m.output.as_path())
        {
            writeln!(s, "  mismatches in {}:", output.display())?;
            for m in rows {
                writeln!(s, "    {}: {}", m.specimen_id, m.detail)?;
            }
        }
        if !self.missing_identifier.is_empty() {
            writeln!(s, "  outputs without a specimen id column:")?;
            for path in &self.missing_identifier {
                writeln!(s, "    {}", path.display())?;
            }
        }
        if !self.audit_errors.is_empty() {
            writeln!(s, "  outputs that could not be checked:")?;
            for (path, error) in &self.audit_errors {
                writeln!(s, "    {}: {error}", path.display())?;
            }
        }
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use pretty_assertions::assert_eq;
    use sm_impact::{AffectedJob, UncheckedJob};
    use sm_types::{Network, Protocol};

    fn key(p: u32) -> ProtocolKey {
        ProtocolKey::new(Network::Hvtn, Protocol::new(p))
    }

    fn ids(ids: &[&str]) -> BTreeSet<SpecimenId> {
        ids.iter().map(|id| SpecimenId::from(*id)).collect()
    }

    #[test]
    fn test_nothing_to_report_is_silent() -> Result<(), fmt::Error> {
        let mut report = BatchReport::new();
        assert_eq!(report.compose("registry changes")?, None);

        report.record_change(key(302), ChangeRecord::default(), ImpactReport::default());
        assert!(report.is_empty());
        assert_eq!(report.compose("registry changes")?, None);
        Ok(())
    }

    #[test]
    fn test_added_specimens_are_routine() -> Result<(), fmt::Error> {
        let mut report = BatchReport::new();
        report.record_change(
            key(302),
            ChangeRecord {
                added_keys: ids(&["S3", "S4"]),
                ..Default::default()
            },
            ImpactReport::default(),
        );
        let message = report.compose("registry changes")?.unwrap();
        assert_eq!(message.severity, Severity::Routine);
        assert_eq!(
            message.body,
            "SPECIMEN CHANGES\n  HVTN302\n    added to registry (2): S3, S4\n"
        );
        Ok(())
    }

    #[test]
    fn test_field_changes_are_routine() -> Result<(), fmt::Error> {
        let mut report = BatchReport::new();
        report.record_change(
            key(302),
            ChangeRecord {
                field_changed_keys: ids(&["S1"]),
                ..Default::default()
            },
            ImpactReport::default(),
        );
        let message = report.compose("registry changes")?.unwrap();
        assert_eq!(message.severity, Severity::Routine);
        assert_eq!(message.subject, "registry changes");
        assert_eq!(
            message.body,
            "SPECIMEN CHANGES\n  HVTN302\n    fields changed (1): S1\n    no monitored outputs affected\n"
        );
        Ok(())
    }

    #[test]
    fn test_full_report() -> Result<(), fmt::Error> {
        let mut report = BatchReport::new();
        report.record_schema_mismatch(key(135), ["vidval".to_string()].into_iter().collect());
        report.record_change(
            key(302),
            ChangeRecord {
                added_keys: ids(&["S3"]),
                removed_keys: ids(&["S2"]),
                count_drift_keys: ids(&["S4"]),
                field_changed_keys: ids(&["S1"]),
            },
            ImpactReport {
                legacy_outputs: [PathBuf::from("/out/legacyA.txt")].into_iter().collect(),
                current_jobs: vec![AffectedJob {
                    name: "jobX".to_string(),
                    config_path: PathBuf::from("/jobs/jobX/paths.yaml"),
                    outputs: vec![PathBuf::from("/out/x.txt")],
                }],
                unchecked_jobs: vec![UncheckedJob {
                    name: "jobW".to_string(),
                    error: "Error reading rows of /out/w.txt".to_string(),
                }],
            },
        );
        report.record_reruns(RerunSummary {
            rerun: vec![],
            unregistered: vec!["jobX".to_string()],
            failed: vec![],
        });
        report.record_error(key(704), &anyhow!("disk full").context("saving snapshot"));
        report.record_audit_mismatch(
            Path::new("/out/x.txt"),
            SpecimenId::from("S9"),
            "not in the registry".to_string(),
        );
        report.record_missing_identifier(Path::new("/out/y.txt"));

        let message = report.compose("registry changes")?.unwrap();
        assert_eq!(message.severity, Severity::Elevated);
        assert_eq!(message.subject, "[ACTION REQUIRED] registry changes");
        let expected = "\
SCHEMA MISMATCHES (not compared)
  HVTN135: columns not shared: vidval

SPECIMEN CHANGES
  HVTN302
    removed from registry (1): S2
    row count changed (1): S4
    fields changed (1): S1
    added to registry (1): S3
    affected legacy outputs (manual follow-up):
      /out/legacyA.txt
    affected current jobs:
      jobX: /out/x.txt
    jobs that could not be checked:
      jobW: Error reading rows of /out/w.txt

RE-RUNS
  no re-run registered (manual follow-up): jobX

ENCOUNTERED ERRORS
  HVTN704: saving snapshot: disk full

OUTPUT AUDIT
  mismatches in /out/x.txt:
    S9: not in the registry
  outputs without a specimen id column:
    /out/y.txt
";
        assert_eq!(message.body, expected);
        Ok(())
    }
}
