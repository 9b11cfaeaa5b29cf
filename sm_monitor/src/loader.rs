use crate::config::RetryConfig;
use crate::source::{with_retry, RegistrySource};
use anyhow::Result;
use chrono::NaiveDate;
use log::debug;
use sm_store::{SaveOutcome, SnapshotStore};
use sm_types::{Network, Protocol, ProtocolKey};

/// Make sure every protocol of `network` has a snapshot for `as_of`, pulling
/// from the registry only for protocols that lack one.
///
/// Each protocol gets its own result so that one failed pull does not prevent
/// the others from being saved.
pub fn ensure_snapshot(
    store: &SnapshotStore,
    source: &dyn RegistrySource,
    retry: &RetryConfig,
    network: Network,
    protocols: &[Protocol],
    as_of: NaiveDate,
) -> Vec<(ProtocolKey, Result<SaveOutcome>)> {
    protocols
        .iter()
        .map(|&protocol| {
            let key = ProtocolKey::new(network, protocol);
            (key, ensure_one(store, source, retry, key, as_of))
        })
        .collect()
}

fn ensure_one(
    store: &SnapshotStore,
    source: &dyn RegistrySource,
    retry: &RetryConfig,
    key: ProtocolKey,
    as_of: NaiveDate,
) -> Result<SaveOutcome> {
    if store.has_snapshot(key, as_of) {
        let path = store.snapshot_path(key, as_of);
        debug!("{key}: snapshot for {as_of} already present, not pulling");
        return Ok(SaveOutcome::AlreadyExists(path));
    }
    let snapshot = with_retry(retry, &format!("registry pull for {key}"), || {
        source.pull_snapshot(key.network, key.protocol)
    })?;
    store.save_snapshot(key, &snapshot, as_of)
}
