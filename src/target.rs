use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("{0} is not a valid remote host: missing port")]
    MissingPort(String),
    #[error("{0} is not a valid remote host: too many colons (bracket IPv6 hosts)")]
    TooManyColons(String),
    #[error("{0} is not a valid remote host: empty host")]
    EmptyHost(String),
    #[error("{0} is not a valid remote host: port must be a number between 1 and 65535")]
    InvalidPort(String),
}

/// A client target, as written `host:port` in the configuration.
/// The host is kept unresolved: it is looked up again on every connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn parse(address: &str) -> Result<Self, TargetError> {
        let (host, port) = if let Some(rest) = address.strip_prefix('[') {
            let (host, rest) = rest
                .split_once(']')
                .ok_or_else(|| TargetError::MissingPort(address.to_string()))?;
            let port = rest
                .strip_prefix(':')
                .ok_or_else(|| TargetError::MissingPort(address.to_string()))?;
            (host, port)
        } else {
            let (host, port) = address
                .rsplit_once(':')
                .ok_or_else(|| TargetError::MissingPort(address.to_string()))?;
            if host.contains(':') {
                return Err(TargetError::TooManyColons(address.to_string()));
            }
            (host, port)
        };
        if host.is_empty() {
            return Err(TargetError::EmptyHost(address.to_string()));
        }
        let port = match port.parse::<u16>() {
            Ok(p) if p != 0 => p,
            _ => return Err(TargetError::InvalidPort(address.to_string())),
        };
        Ok(Target {
            host: host.to_string(),
            port,
        })
    }
}

impl FromStr for Target {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Target::parse(s)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
