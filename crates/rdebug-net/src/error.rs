//! # Error Types
//!
//! Transport failures. The debugger never stops the VM because of one of
//! these; they are logged, surfaced as `bool`/`Result` and the OS error code
//! stays queryable through [`NetError::os_code`].

use std::io;

use thiserror::Error;

/// Errors produced by the transport layer.
#[derive(Error, Debug)]
pub enum NetError
{
    /// The endpoint string could not be parsed or resolved.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Creating or configuring a socket failed.
    #[error("Socket open failed: {0}")]
    Open(#[source] io::Error),

    /// `bind`/`listen` failed (address in use, permission denied, ...).
    #[error("Listen on {endpoint} failed: {source}")]
    Listen
    {
        /// Endpoint we tried to bind.
        endpoint: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Outbound connect could not even be started.
    #[error("Connect to {endpoint} failed: {source}")]
    Connect
    {
        /// Endpoint we tried to reach.
        endpoint: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Poller creation or registration failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl NetError
{
    /// Raw OS error code behind this failure, if there is one.
    #[must_use]
    pub fn os_code(&self) -> Option<i32>
    {
        match self {
            Self::Open(source) | Self::Io(source) => source.raw_os_error(),
            Self::Listen { source, .. } | Self::Connect { source, .. } => source.raw_os_error(),
            Self::InvalidEndpoint(_) => None,
        }
    }
}

/// Convenience type alias for transport results.
pub type Result<T> = std::result::Result<T, NetError>;

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_os_code_is_preserved()
    {
        let err = NetError::Listen {
            endpoint: "127.0.0.1:1".to_string(),
            source: io::Error::from_raw_os_error(98),
        };
        assert_eq!(err.os_code(), Some(98));
        assert!(err.to_string().contains("127.0.0.1:1"));
    }

    #[test]
    fn test_invalid_endpoint_has_no_code()
    {
        let err = NetError::InvalidEndpoint("nope".to_string());
        assert_eq!(err.os_code(), None);
    }
}
