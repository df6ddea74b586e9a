//! Bind targets: where the daemon listens.
//!
//! A target is either a filesystem path (Unix-domain socket) or an
//! `host[:port]` pair. IPv6 hosts carrying a port use the bracketed form
//! `[::1]:12345`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Host used when a target names only a port (`:12345`) and for the
/// fallback bind when no configured target is usable.
pub const WILDCARD_HOST: &str = "0.0.0.0";

/// Transport preference for every bind target. Stream and datagram are
/// mutually exclusive for one daemon instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// TCP or Unix stream sockets, one message per accepted connection.
    Stream,
    /// UDP or Unix datagram sockets, one message per datagram.
    #[default]
    Datagram,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Stream => f.write_str("stream"),
            Transport::Datagram => f.write_str("datagram"),
        }
    }
}

/// A parsed bind target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindTarget {
    /// Unix-domain socket at the given path.
    Unix(PathBuf),
    /// Internet socket; `port` is `None` when the default port applies.
    Inet { host: String, port: Option<u16> },
}

impl BindTarget {
    /// Wildcard internet target on the given port.
    pub fn wildcard(port: u16) -> Self {
        BindTarget::Inet {
            host: WILDCARD_HOST.to_string(),
            port: Some(port),
        }
    }

    /// Whether the target string uses filesystem-path syntax.
    fn is_path(s: &str) -> bool {
        s.starts_with('/') || s.starts_with("./") || s.starts_with("../")
    }
}

impl FromStr for BindTarget {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConfigError::Validation(
                "bind target must not be empty".to_string(),
            ));
        }

        if Self::is_path(s) {
            return Ok(BindTarget::Unix(PathBuf::from(s)));
        }

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, after) = rest.split_once(']').ok_or_else(|| {
                ConfigError::Validation(format!("unterminated '[' in bind target {s:?}"))
            })?;
            match after {
                "" => (host, None),
                _ => match after.strip_prefix(':') {
                    Some(port) => (host, Some(port)),
                    None => {
                        return Err(ConfigError::Validation(format!(
                            "unexpected {after:?} after ']' in bind target {s:?}"
                        )));
                    }
                },
            }
        } else {
            match s.rsplit_once(':') {
                // A bare IPv6 address without brackets carries no port.
                Some((host, _)) if host.contains(':') => (s, None),
                Some((host, port)) => (host, Some(port)),
                None => (s, None),
            }
        };

        let port = port
            .map(|p| parse_port(p, s))
            .transpose()?;
        let host = if host.is_empty() {
            WILDCARD_HOST.to_string()
        } else {
            host.to_string()
        };

        Ok(BindTarget::Inet { host, port })
    }
}

fn parse_port(port: &str, target: &str) -> Result<u16, ConfigError> {
    // Port 0 is accepted and asks the kernel for an ephemeral port.
    port.parse::<u16>().map_err(|e| {
        ConfigError::Validation(format!(
            "invalid port {port:?} in bind target {target:?}: {e}"
        ))
    })
}

impl fmt::Display for BindTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindTarget::Unix(path) => write!(f, "{}", path.display()),
            BindTarget::Inet { host, port } => {
                let bracket = host.contains(':');
                match (bracket, port) {
                    (true, Some(p)) => write!(f, "[{host}]:{p}"),
                    (false, Some(p)) => write!(f, "{host}:{p}"),
                    (_, None) => f.write_str(host),
                }
            }
        }
    }
}
