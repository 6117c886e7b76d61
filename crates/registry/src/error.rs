use std::fmt;

/// Error type for registry lookups.
///
/// These never reach the engine: [`crate::RdapResolver`] folds them into an
/// `OwnershipResult` with the `error` field set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Connection, TLS or timeout failure
    Network(String),
    /// Non-success HTTP status
    Http(u16, String),
    /// Response body was not a usable RDAP document
    Parse(String),
    /// Not an IPv4 address, or a malformed CIDR in configuration
    InvalidAddress(String),
}

impl RegistryError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RegistryError::Network(_) | RegistryError::Parse(_) => true,
            RegistryError::Http(code, _) => *code == 429 || *code >= 500,
            RegistryError::InvalidAddress(_) => false,
        }
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Network(msg) => write!(f, "Network error: {}", msg),
            RegistryError::Http(code, msg) => write!(f, "HTTP {}: {}", code, msg),
            RegistryError::Parse(msg) => write!(f, "Parse error: {}", msg),
            RegistryError::InvalidAddress(msg) => write!(f, "Invalid address: {}", msg),
        }
    }
}

impl std::error::Error for RegistryError {}
