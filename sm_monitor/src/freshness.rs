//! Decide whether the registry changed since the previous business day.
//!
//! Business days are Monday to Friday with no holiday calendar, and the
//! monitor is assumed never to run on a weekend: a Saturday run looks back to
//! Friday and a Sunday run to Saturday.

use crate::source::RegistrySource;
use anyhow::Result;
use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, Weekday};
use log::info;
use sm_types::Network;

/// The business day before `date`: the preceding Friday for a Monday, the
/// preceding calendar day otherwise.
pub fn last_business_day(date: NaiveDate) -> NaiveDate {
    let days = match date.weekday() {
        Weekday::Mon => 3,
        _ => 1,
    };
    date - Days::new(days)
}

/// True if the registry of `network` was modified strictly after the same
/// time of day on the business day before `reference_time`.
pub fn was_registry_updated(
    source: &dyn RegistrySource,
    network: Network,
    reference_time: NaiveDateTime,
) -> Result<bool> {
    let cutoff = last_business_day(reference_time.date()).and_time(reference_time.time());
    let modified = source.last_modified(network)?;
    let updated = modified > cutoff;
    info!(
        "{network} registry last modified {modified}, {} since {cutoff}",
        if updated { "updated" } else { "not updated" }
    );
    Ok(updated)
}
