use chrono::NaiveDate;
use sm_types::{Network, Protocol, ProtocolKey};
use std::fmt;
use std::str::FromStr;

const DATE_FORMAT: &str = "%Y%m%d";
const PROTOCOL_PREFIX: &str = "ldms";

#[derive(Debug, thiserror::Error)]
#[error("'{name}' is not a snapshot file name ({reason})")]
pub struct SnapshotNameError {
    name: String,
    reason: &'static str,
}

/// File name of one stored snapshot: `{network}.ldms{protocol}.{YYYYMMDD}.{ext}`,
/// e.g. `covpn.ldms3008.20240105.csv`.
///
/// The date is zero padded, so for a fixed network and protocol the lexical
/// order of names is the chronological order of snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotName {
    pub key: ProtocolKey,
    pub date: NaiveDate,
    pub extension: String,
}

impl SnapshotName {
    pub fn new(key: ProtocolKey, date: NaiveDate, extension: &str) -> SnapshotName {
        SnapshotName {
            key,
            date,
            extension: extension.to_string(),
        }
    }

    /// The part of the name shared by every snapshot of `key`.
    pub fn stem_prefix(key: ProtocolKey) -> String {
        format!(
            "{}.{PROTOCOL_PREFIX}{}.",
            key.network.file_prefix(),
            key.protocol
        )
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}.{}",
            Self::stem_prefix(self.key),
            self.date.format(DATE_FORMAT),
            self.extension
        )
    }
}

impl FromStr for SnapshotName {
    type Err = SnapshotNameError;

    fn from_str(name: &str) -> Result<SnapshotName, SnapshotNameError> {
        let err = |reason| SnapshotNameError {
            name: name.to_string(),
            reason,
        };
        let parts: Vec<&str> = name.split('.').collect();
        let [network, protocol, date, extension] = parts[..] else {
            return Err(err("expected four '.' separated fields"));
        };
        let network: Network = network.parse().map_err(|_| err("unknown network"))?;
        let protocol: Protocol = protocol
            .strip_prefix(PROTOCOL_PREFIX)
            .and_then(|p| p.parse::<u32>().ok())
            .map(Protocol::new)
            .ok_or_else(|| err("bad protocol field"))?;
        if date.len() != 8 {
            return Err(err("date must be YYYYMMDD"));
        }
        let date =
            NaiveDate::parse_from_str(date, DATE_FORMAT).map_err(|_| err("date must be YYYYMMDD"))?;
        if extension.is_empty() {
            return Err(err("missing extension"));
        }
        Ok(SnapshotName {
            key: ProtocolKey::new(network, protocol),
            date,
            extension: extension.to_string(),
        })
    }
}
