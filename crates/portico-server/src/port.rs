//! Validated listen port.

use std::fmt;

use crate::error::{ServerError, ServerResult};

/// A port number known to be within 0–65535.
///
/// `0` asks the operating system for an ephemeral port.
///
/// # Example
///
/// ```rust
/// use portico_server::ServerPort;
///
/// assert_eq!(ServerPort::new(8080).unwrap().get(), 8080);
/// assert!(ServerPort::new(70000).is_err());
/// assert!(ServerPort::new(-1).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerPort(u16);

impl ServerPort {
    /// Validates `port`.
    ///
    /// Fails with [`ServerError::InvalidPort`] outside 0–65535.
    pub fn new(port: impl Into<i64>) -> ServerResult<Self> {
        let port = port.into();
        u16::try_from(port)
            .map(Self)
            .map_err(|_| ServerError::InvalidPort { port })
    }

    /// Returns the port number.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl From<u16> for ServerPort {
    fn from(port: u16) -> Self {
        Self(port)
    }
}

impl TryFrom<i64> for ServerPort {
    type Error = ServerError;

    fn try_from(port: i64) -> ServerResult<Self> {
        Self::new(port)
    }
}

impl fmt::Display for ServerPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
