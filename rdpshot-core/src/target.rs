//! Remote targets given on the command line as `host[:port]`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::CaptureError;

/// Port used when a target omits one.
pub const DEFAULT_PORT: u16 = 3389;

/// A single remote desktop address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    host: String,
    port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host`, `host:port`, `[v6]` or `[v6]:port`, falling back to
    /// `default_port`.
    pub fn parse_with_default(s: &str, default_port: u16) -> Result<Self, CaptureError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CaptureError::InvalidTarget("empty target".into()));
        }

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| CaptureError::InvalidTarget(format!("unclosed bracket in {s}")))?;
            match tail {
                "" => (host, None),
                t => match t.strip_prefix(':') {
                    Some(port) => (host, Some(port)),
                    None => {
                        return Err(CaptureError::InvalidTarget(format!(
                            "unexpected text after ] in {s}"
                        )));
                    }
                },
            }
        } else {
            match s.split_once(':') {
                // A bare IPv6 address without brackets has several colons.
                Some((_, rest)) if rest.contains(':') => (s, None),
                Some((host, port)) => (host, Some(port)),
                None => (s, None),
            }
        };

        if host.is_empty() {
            return Err(CaptureError::InvalidTarget(format!("missing host in {s}")));
        }

        let port = match port {
            Some(p) => p
                .parse::<u16>()
                .map_err(|_| CaptureError::InvalidTarget(format!("bad port in {s}")))?,
            None => default_port,
        };

        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` form suitable for `TcpStream::connect`.
    pub fn socket_addr_string(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Screenshot path for this target: `<prefix><host>.<extension>`.
    ///
    /// The prefix is concatenated, not joined, so `/tmp/` and `/tmp/shot-`
    /// both work. Colons and path separators in the host become `_`, so the
    /// file always lands directly under the prefix.
    pub fn output_path(&self, prefix: &Path, extension: &str) -> PathBuf {
        let host: String = self
            .host
            .chars()
            .map(|c| if c == ':' || c == '/' || c == '\\' { '_' } else { c })
            .collect();
        let mut path = prefix.as_os_str().to_owned();
        path.push(host);
        path.push(".");
        path.push(extension);
        PathBuf::from(path)
    }
}

impl FromStr for Target {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_with_default(s, DEFAULT_PORT)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.socket_addr_string())
    }
}
