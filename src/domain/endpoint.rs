use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Port assumed when an endpoint does not name one
pub const DEFAULT_PORT: u16 = 25565;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidEndpoint {
    #[error("endpoint must not be empty")]
    Empty,

    #[error("endpoint contains non-printable characters: {0:?}")]
    NotPrintable(String),
}

/// Monitored server address (`host[:port]`), compared case-sensitively
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(String);

impl Endpoint {
    /// Validate and wrap a raw address
    pub fn parse(raw: impl Into<String>) -> Result<Self, InvalidEndpoint> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(InvalidEndpoint::Empty);
        }
        if raw.chars().any(char::is_control) {
            return Err(InvalidEndpoint::NotPrintable(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into host and port, falling back to [`DEFAULT_PORT`].
    ///
    /// Accepts `host`, `host:port`, `[v6]` and `[v6]:port`. An unbracketed
    /// string with more than one colon is taken as a bare IPv6 host.
    pub fn host_port(&self) -> (&str, u16) {
        let raw = self.0.as_str();

        if let Some(rest) = raw.strip_prefix('[') {
            if let Some((host, tail)) = rest.split_once(']') {
                let port = tail
                    .strip_prefix(':')
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(DEFAULT_PORT);
                return (host, port);
            }
        }

        match raw.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => match port.parse() {
                Ok(port) => (host, port),
                Err(_) => (raw, DEFAULT_PORT),
            },
            _ => (raw, DEFAULT_PORT),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = InvalidEndpoint;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(raw)
    }
}

impl TryFrom<&str> for Endpoint {
    type Error = InvalidEndpoint;

    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        Self::parse(raw)
    }
}
