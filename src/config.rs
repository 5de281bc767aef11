use std::path::PathBuf;

pub const ADDR_VAR: &str = "LIVEBRIDGE_ADDR";
pub const SOCKET_VAR: &str = "LIVEBRIDGE_SOCKET";
pub const DEFAULT_ADDR: &str = "127.0.0.1:5050";
pub const DEFAULT_SOCKET: &str = "/tmp/livebridge.sock";

/// Where the server listens and where clients connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// TCP address to bind or connect to.
    pub addr: String,
    /// Unix socket path, `None` when disabled.
    pub socket: Option<PathBuf>,
    /// Set when the address was given explicitly; clients then use TCP.
    pub prefer_tcp: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            socket: Some(PathBuf::from(DEFAULT_SOCKET)),
            prefer_tcp: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let addr = lookup(ADDR_VAR).filter(|a| !a.trim().is_empty());
        let socket = match lookup(SOCKET_VAR).as_deref() {
            Some("off") | Some("") => None,
            Some(path) => Some(PathBuf::from(path)),
            None => Some(PathBuf::from(DEFAULT_SOCKET)),
        };

        Self {
            prefer_tcp: addr.is_some(),
            addr: addr.unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            socket,
        }
    }

    /// TCP only, on the given address.
    pub fn tcp(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            socket: None,
            prefer_tcp: true,
        }
    }
}
