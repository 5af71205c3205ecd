//! Policy router errors

use thiserror::Error;

/// Outcome of a failed netlink request
///
/// `AlreadyExists` and `NotFound` are split out so idempotent callers can
/// swallow exactly those.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetlinkError {
    /// Object already present (EEXIST)
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Object absent (ENOENT, ESRCH, EADDRNOTAVAIL)
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other netlink failure
    #[error("netlink error: {0}")]
    Other(String),
}

/// Errors that can occur while configuring host routing
#[derive(Debug, Error)]
pub enum RouterError {
    /// Netlink request failed
    #[error("Netlink error: {0}")]
    Netlink(#[from] NetlinkError),

    /// iptables invocation failed
    #[error("iptables error: {0}")]
    Iptables(String),

    /// sysctl read/write failed
    #[error("sysctl error for {key}: {source}")]
    Sysctl {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// No link carries the ENI's MAC address
    #[error("Link not found for ENI {eni_id} (mac {mac})")]
    LinkNotFound { eni_id: String, mac: String },

    /// ENI subnet CIDR could not be parsed
    #[error("Invalid subnet CIDR {0}")]
    InvalidSubnet(String),

    /// Device 0 is owned by the host network stack
    #[error("Refusing to configure primary ENI {0}")]
    PrimaryEni(String),
}

/// Result type for router operations
pub type RouterResult<T> = Result<T, RouterError>;
