//! sm_monitor
//! Watch the specimen registry for changes that affect generated outputs.
//!
//! One batch run checks whether the registry was updated, takes a dated
//! snapshot of every monitored protocol, compares it with the previous
//! business day's snapshot, resolves which outputs reference the changed
//! specimens, and delivers a single report.

use itertools::Itertools;

pub mod audit;
pub mod config;
pub mod discover;
pub mod freshness;
pub mod loader;
pub mod runner;
pub mod source;

pub use config::MonitorConfig;
pub use runner::Monitor;
pub use source::{CsvRegistrySource, RegistrySource};

/// Convert an io::error to a string and strip "(os error N)" from the end.
fn io_error_to_string(err: &std::io::Error) -> String {
    let s = err.to_string();
    match err.raw_os_error() {
        Some(code) => s
            .strip_suffix(&format!(" (os error {code})"))
            .unwrap_or(&s)
            .to_string(),
        None => s,
    }
}

/// Print an error chain.
pub fn print_error_chain(err: &anyhow::Error) {
    let error_chain = err.chain().join("\n\tCaused by: ");
    if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
        let io_err_str = io_error_to_string(io_err);
        match err.chain().len() {
            1 => eprintln!("ERROR: {io_err_str}"),
            2 => eprintln!("ERROR: {io_err_str}: {err}"),
            _ => eprintln!("ERROR: {error_chain}"),
        };
    } else {
        eprintln!("ERROR: {error_chain}");
    };
}
