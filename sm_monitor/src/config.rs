//! Monitor configuration, read once from a TOML file and passed to every component.
//!
//! ```toml
//! studies_root = "/networks/lab/studies"
//! jobs_root = "/repos/adhoc/processing_scripts"
//! legacy_impact_table = "/repos/adhoc/legacy_impact.yaml"
//!
//! [networks.HVTN]
//! protocols = [302, 303]
//! registry_export = "/registry/hvtn_export.csv"
//! protocol_dirs = { 703 = "HVTN703_704" }
//!
//! [notify]
//! sink = "email"
//! recipients = ["lab@example.org"]
//! ```

use crate::source::CsvRegistrySource;
use anyhow::{Context, Result};
use serde::Deserialize;
use sm_impact::{CommandJob, ImpactResolver, JobDiscovery, JobRegistry, LegacyImpactTable};
use sm_notify::{ConsoleSink, EmailSink, Sink, SinkKind};
use sm_store::SnapshotStore;
use sm_types::{Network, Protocol, ProtocolKey};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    /// Holds `{NETWORK}/{protocol_dir}/specimens/ldms_feed/` for each monitored protocol.
    pub studies_root: PathBuf,
    #[serde(default = "default_snapshot_extension")]
    pub snapshot_extension: String,
    /// Number of snapshots kept per protocol.
    #[serde(default = "default_retention")]
    pub retention: usize,
    #[serde(default)]
    pub networks: BTreeMap<Network, NetworkConfig>,
    /// Root of the tree searched for job configurations.
    #[serde(default)]
    pub jobs_root: Option<PathBuf>,
    #[serde(default = "default_job_config_name")]
    pub job_config_name: String,
    #[serde(default)]
    pub legacy_impact_table: Option<PathBuf>,
    #[serde(default)]
    pub pull_retry: RetryConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Commands that regenerate current outputs, by job name.
    #[serde(default)]
    pub rerun: BTreeMap<String, RerunCommand>,
    #[serde(default)]
    pub rerun_affected: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    pub protocols: Vec<Protocol>,
    /// Organization-wide registry extract for the network.
    pub registry_export: PathBuf,
    /// Directory names that differ from the `{NETWORK}{protocol}` default.
    #[serde(default)]
    pub protocol_dirs: BTreeMap<Protocol, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetryConfig {
    pub attempts: u32,
    /// Wait before the second attempt; doubled after every further failure.
    pub initial_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            attempts: 3,
            initial_backoff_ms: 2000,
        }
    }
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct NotifyConfig {
    pub sink: SinkKind,
    pub recipients: Vec<String>,
    pub sender: String,
    pub subject: String,
    pub sendmail: PathBuf,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        NotifyConfig {
            sink: SinkKind::Console,
            recipients: Vec::new(),
            sender: "specimen-monitor@localhost".to_string(),
            subject: "Specimen registry changes".to_string(),
            sendmail: PathBuf::from("/usr/sbin/sendmail"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RerunCommand {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_snapshot_extension() -> String {
    "csv".to_string()
}

fn default_retention() -> usize {
    30
}

fn default_job_config_name() -> String {
    "paths.yaml".to_string()
}

impl MonitorConfig {
    pub fn load(path: &Path) -> Result<MonitorConfig> {
        let s = std::fs::read_to_string(path).with_context(|| path.display().to_string())?;
        toml::from_str(&s).with_context(|| path.display().to_string())
    }

    /// Every monitored (network, protocol) pair, in a stable order.
    pub fn protocol_keys(&self) -> Vec<ProtocolKey> {
        self.networks
            .iter()
            .flat_map(|(&network, cfg)| {
                cfg.protocols
                    .iter()
                    .map(move |&protocol| ProtocolKey::new(network, protocol))
            })
            .collect()
    }

    pub fn snapshot_store(&self) -> SnapshotStore {
        let mut store = SnapshotStore::new(&self.studies_root, &self.snapshot_extension);
        for (&network, cfg) in &self.networks {
            for (&protocol, dir) in &cfg.protocol_dirs {
                store = store.with_protocol_dir(ProtocolKey::new(network, protocol), dir.as_str());
            }
        }
        store
    }

    pub fn registry_source(&self) -> CsvRegistrySource {
        CsvRegistrySource::new(
            self.networks
                .iter()
                .map(|(&network, cfg)| (network, cfg.registry_export.clone()))
                .collect(),
        )
    }

    pub fn job_discovery(&self) -> Option<JobDiscovery> {
        self.jobs_root.as_ref().map(|root| JobDiscovery {
            jobs_root: root.clone(),
            config_name: self.job_config_name.clone(),
        })
    }

    /// Load the legacy table, if one is configured, and set up job discovery.
    pub fn impact_resolver(&self) -> Result<ImpactResolver> {
        let legacy = match &self.legacy_impact_table {
            Some(path) => LegacyImpactTable::load(path)?,
            None => LegacyImpactTable::default(),
        };
        Ok(ImpactResolver::new(legacy, self.job_discovery()))
    }

    pub fn job_registry(&self) -> JobRegistry {
        let mut registry = JobRegistry::new();
        for (name, cmd) in &self.rerun {
            registry.register(
                name.as_str(),
                Box::new(CommandJob {
                    program: cmd.program.clone(),
                    args: cmd.args.clone(),
                }),
            );
        }
        registry
    }

    pub fn sink(&self) -> Box<dyn Sink> {
        match self.notify.sink {
            SinkKind::Console => Box::new(ConsoleSink),
            SinkKind::Email => Box::new(EmailSink {
                sendmail: self.notify.sendmail.clone(),
                sender: self.notify.sender.clone(),
                recipients: self.notify.recipients.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CONFIG: &str = r#"
studies_root = "/studies"
jobs_root = "/repos/processing_scripts"
retention = 10
rerun_affected = true

[networks.hvtn]
protocols = [302, 703.0]
registry_export = "/registry/hvtn.csv"
protocol_dirs = { 703 = "HVTN703_704" }

[networks.CoVPN]
protocols = ["3008"]
registry_export = "/registry/covpn.csv"

[pull_retry]
attempts = 5

[notify]
sink = "email"
recipients = ["lab@example.org"]

[rerun."HVTN302/elisa"]
program = "python3"
args = ["process_data.py"]
"#;

    #[test]
    fn test_parse_config() -> Result<()> {
        let config: MonitorConfig = toml::from_str(CONFIG)?;
        assert_eq!(config.snapshot_extension, "csv");
        assert_eq!(config.retention, 10);
        assert_eq!(config.job_config_name, "paths.yaml");
        assert_eq!(config.pull_retry.attempts, 5);
        assert_eq!(config.pull_retry.initial_backoff_ms, 2000);
        assert_eq!(config.notify.sink, SinkKind::Email);
        assert_eq!(config.notify.sendmail, PathBuf::from("/usr/sbin/sendmail"));
        assert!(config.rerun_affected);

        assert_eq!(
            config.protocol_keys(),
            vec![
                ProtocolKey::new(Network::Hvtn, Protocol::new(302)),
                ProtocolKey::new(Network::Hvtn, Protocol::new(703)),
                ProtocolKey::new(Network::Covpn, Protocol::new(3008)),
            ]
        );
        let store = config.snapshot_store();
        assert_eq!(
            store.protocol_dir(ProtocolKey::new(Network::Hvtn, Protocol::new(703))),
            "HVTN703_704"
        );
        let registry = config.job_registry();
        assert!(registry.contains("HVTN302/elisa"));
        assert_eq!(
            config.job_discovery().map(|d| d.jobs_root),
            Some(PathBuf::from("/repos/processing_scripts"))
        );
        Ok(())
    }

    #[test]
    fn test_minimal_config_defaults() -> Result<()> {
        let config: MonitorConfig = toml::from_str("studies_root = \"/studies\"\n")?;
        assert_eq!(config.retention, 30);
        assert_eq!(config.pull_retry.attempts, 3);
        assert_eq!(config.notify.sink, SinkKind::Console);
        assert!(config.protocol_keys().is_empty());
        assert!(config.job_discovery().is_none());
        assert!(!config.rerun_affected);
        Ok(())
    }

    #[test]
    fn test_unknown_network_is_rejected() {
        let bad = "studies_root = \"/s\"\n[networks.HPTN]\nprotocols = [1]\nregistry_export = \"/r\"\n";
        assert!(toml::from_str::<MonitorConfig>(bad).is_err());
    }
}
