use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum_macros::{Display, EnumString};

/// A trial-sponsor grouping. Protocol numbers are only unique within a network.
#[derive(
    EnumString,
    Display,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Clone,
    Copy,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[strum(ascii_case_insensitive)]
#[serde(try_from = "String", into = "String")]
pub enum Network {
    #[strum(to_string = "HVTN")]
    Hvtn,
    #[strum(to_string = "CoVPN")]
    Covpn,
}

impl Network {
    pub const ALL: [Network; 2] = [Network::Hvtn, Network::Covpn];

    /// Lowercase form used in snapshot file names, e.g. `covpn`.
    pub fn file_prefix(self) -> String {
        self.to_string().to_lowercase()
    }
}

impl TryFrom<String> for Network {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Network> {
        match Network::from_str(s.trim()) {
            Ok(n) => Ok(n),
            Err(_) => bail!("Network must be one of 'HVTN' or 'CoVPN' (case insensitive), got '{s}'"),
        }
    }
}

impl From<Network> for String {
    fn from(n: Network) -> String {
        n.to_string()
    }
}

/// A numbered clinical trial within a network.
///
/// The registry stores study numbers as floats, so `"302.0"` and `302.0` are
/// accepted wherever a protocol is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "ProtocolRepr", into = "u32")]
pub struct Protocol(u32);

impl Protocol {
    pub fn new(number: u32) -> Protocol {
        Protocol(number)
    }

    pub fn number(self) -> u32 {
        self.0
    }

    /// Convert a float-typed study number. Fails on fractional or negative values.
    pub fn from_f64(v: f64) -> Result<Protocol> {
        if !v.is_finite() || v < 0.0 || v.fract() != 0.0 || v > f64::from(u32::MAX) {
            bail!("'{v}' is not a valid protocol number");
        }
        Ok(Protocol(v as u32))
    }

    /// True if a float-typed registry study number refers to this protocol.
    pub fn matches_f64(self, v: f64) -> bool {
        v == f64::from(self.0)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Protocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Protocol> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u32>() {
            return Ok(Protocol(n));
        }
        match s.parse::<f64>() {
            Ok(v) => Protocol::from_f64(v),
            Err(_) => bail!("'{s}' is not a valid protocol number"),
        }
    }
}

impl From<Protocol> for u32 {
    fn from(p: Protocol) -> u32 {
        p.0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProtocolRepr {
    Int(u64),
    Float(f64),
    Text(String),
}

impl TryFrom<ProtocolRepr> for Protocol {
    type Error = anyhow::Error;

    fn try_from(repr: ProtocolRepr) -> Result<Protocol> {
        match repr {
            ProtocolRepr::Int(n) => match u32::try_from(n) {
                Ok(n) => Ok(Protocol(n)),
                Err(_) => bail!("'{n}' is not a valid protocol number"),
            },
            ProtocolRepr::Float(v) => Protocol::from_f64(v),
            ProtocolRepr::Text(s) => s.parse(),
        }
    }
}

/// One monitored (network, protocol) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProtocolKey {
    pub network: Network,
    pub protocol: Protocol,
}

impl ProtocolKey {
    pub fn new(network: Network, protocol: Protocol) -> ProtocolKey {
        ProtocolKey { network, protocol }
    }
}

impl fmt::Display for ProtocolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.network, self.protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parsing() {
        assert_eq!("hvtn".parse::<Network>().unwrap(), Network::Hvtn);
        assert_eq!("COVPN".parse::<Network>().unwrap(), Network::Covpn);
        assert_eq!(Network::Covpn.to_string(), "CoVPN");
        assert_eq!(Network::Covpn.file_prefix(), "covpn");
        assert!(Network::try_from("HPTN".to_string()).is_err());
    }

    #[test]
    fn test_protocol_parsing() {
        assert_eq!("302".parse::<Protocol>().unwrap(), Protocol::new(302));
        assert_eq!(" 302.0 ".parse::<Protocol>().unwrap(), Protocol::new(302));
        assert!("302.5".parse::<Protocol>().is_err());
        assert!("-1".parse::<Protocol>().is_err());
        assert!("abc".parse::<Protocol>().is_err());
        assert!(Protocol::new(3008).matches_f64(3008.0));
        assert!(!Protocol::new(3008).matches_f64(3008.5));
    }

    #[test]
    fn test_protocol_serde() {
        let ps: Vec<Protocol> = serde_json::from_str(r#"[302, 303.0, "704"]"#).unwrap();
        assert_eq!(
            ps,
            vec![Protocol::new(302), Protocol::new(303), Protocol::new(704)]
        );
        assert_eq!(serde_json::to_string(&ps).unwrap(), "[302,303,704]");
    }

    #[test]
    fn test_protocol_key_display() {
        let key = ProtocolKey::new(Network::Covpn, Protocol::new(3008));
        assert_eq!(key.to_string(), "CoVPN3008");
    }
}
