//! specimen_monitor
//! Detect specimen registry changes and report the generated outputs they affect.

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use env_logger::Builder;
use itertools::Itertools;
use log::{info, LevelFilter};
use sm_diff::diff_snapshots;
use sm_impact::legacy::read_output_list;
use sm_impact::LegacyImpactTable;
use sm_monitor::audit::audit_outputs;
use sm_monitor::discover::discover_protocols;
use sm_monitor::runner::RunOptions;
use sm_monitor::{print_error_chain, Monitor, MonitorConfig};
use sm_notify::BatchReport;
use sm_types::Snapshot;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[clap(name = "specimen_monitor", about = "Specimen registry change monitor")]
struct Cli {
    /// Monitor configuration file (TOML).
    #[clap(long, global = true, default_value = "specimen_monitor.toml")]
    config: PathBuf,

    /// Log at debug level. RUST_LOG takes precedence.
    #[clap(long, short, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Snapshot the registry, compare with the previous snapshot, and report.
    Run {
        /// Snapshot date, YYYY-MM-DD. Defaults to today.
        #[clap(long)]
        date: Option<NaiveDate>,

        /// Pull even if the registry does not look updated.
        #[clap(long)]
        force: bool,

        /// Print the report instead of delivering it.
        #[clap(long)]
        dry: bool,
    },

    /// Compare two snapshot files and print the changes as JSON.
    Diff { old: PathBuf, new: PathBuf },

    /// Check current outputs against the latest registry snapshots.
    Audit {
        /// Print the report instead of delivering it.
        #[clap(long)]
        dry: bool,
    },

    /// Build the legacy impact table from a list of legacy output paths.
    FreezeLegacy { output_list: PathBuf, out: PathBuf },

    /// Print the protocols referenced by current outputs.
    DiscoverProtocols,
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, level);
    if let Ok(spec) = std::env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }
    builder.init();
}

fn deliver(config: &MonitorConfig, report: &BatchReport, dry: bool) -> Result<()> {
    let Some(message) = report.compose(&config.notify.subject)? else {
        info!("nothing to report");
        return Ok(());
    };
    if dry {
        println!("{}\n\n{}", message.subject, message.body);
        Ok(())
    } else {
        config.sink().deliver(&message)
    }
}

fn run(config: &MonitorConfig, date: Option<NaiveDate>, force: bool, dry: bool) -> Result<()> {
    let now = Local::now().naive_local();
    let options = RunOptions {
        as_of: date.unwrap_or(now.date()),
        reference_time: match date {
            Some(d) => d.and_time(now.time()),
            None => now,
        },
        force,
    };
    let source = config.registry_source();
    let monitor = Monitor::new(config, &source)?;
    let report = monitor.run(&options);
    deliver(config, &report, dry)
}

fn diff(old: &Path, new: &Path) -> Result<()> {
    let old = Snapshot::load(old).with_context(|| old.display().to_string())?;
    let new = Snapshot::load(new).with_context(|| new.display().to_string())?;
    let outcome = diff_snapshots(&old, &new);
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn audit(config: &MonitorConfig, dry: bool) -> Result<()> {
    let Some(discovery) = config.job_discovery() else {
        bail!("The audit needs 'jobs_root' to be set in the configuration");
    };
    let mut report = BatchReport::new();
    audit_outputs(&discovery, &config.snapshot_store(), &mut report)?;
    deliver(config, &report, dry)
}

fn freeze_legacy(output_list: &Path, out: &Path) -> Result<()> {
    let outputs = read_output_list(output_list)?;
    let table = LegacyImpactTable::freeze(&outputs)?;
    table.save(out)?;
    info!(
        "wrote {} specimens from {} legacy outputs to {}",
        table.len(),
        outputs.len(),
        out.display()
    );
    Ok(())
}

fn print_protocols(config: &MonitorConfig) -> Result<()> {
    let Some(discovery) = config.job_discovery() else {
        bail!("Protocol discovery needs 'jobs_root' to be set in the configuration");
    };
    for (network, protocols) in discover_protocols(&discovery)? {
        println!("{network}: {}", protocols.iter().join(", "));
    }
    Ok(())
}

fn inner_main(cli: Cli) -> Result<()> {
    let load_config = || MonitorConfig::load(&cli.config);
    match cli.command {
        Command::Run { date, force, dry } => run(&load_config()?, date, force, dry),
        Command::Diff { old, new } => diff(&old, &new),
        Command::Audit { dry } => audit(&load_config()?, dry),
        Command::FreezeLegacy { output_list, out } => freeze_legacy(&output_list, &out),
        Command::DiscoverProtocols => print_protocols(&load_config()?),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    match inner_main(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            print_error_chain(&err);
            ExitCode::FAILURE
        }
    }
}
