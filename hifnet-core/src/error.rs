/// hifnet Error Types
///
/// Every failure in the socket layer is local and return-value based. Nothing
/// here is fatal to the process: exhaustion and timeout are the worst outcomes.

use std::time::Duration;
use thiserror::Error;

use crate::handle::SocketHandle;
use crate::state::SocketState;

/// Immediate status reported by a low-level transport primitive.
///
/// The numeric convention is the one used by the host interface: `0` is
/// success, negative values are errors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Destination address is malformed
    #[error("invalid address")]
    InvalidAddress,

    /// Port already bound by another socket
    #[error("address already in use")]
    AddressInUse,

    /// No more hardware sockets of the requested kind
    #[error("maximum number of sockets reached")]
    MaxSockets,

    /// Argument rejected by the transport
    #[error("invalid argument")]
    InvalidArgument,

    /// Socket not known to the transport
    #[error("invalid socket")]
    Invalid,

    /// Operation needs a destination address
    #[error("address required")]
    AddressRequired,

    /// Connection aborted by the peer or the interface
    #[error("connection aborted")]
    ConnectionAborted,

    /// Transport-side timeout
    #[error("transport timed out")]
    TimedOut,

    /// Transmit buffer is full, try again after pumping events
    #[error("transmit buffer full")]
    BufferFull,

    /// Interface cannot make progress right now
    #[error("transport busy")]
    Busy,

    /// Any other negative status code
    #[error("transport error code {0}")]
    Other(i16),
}

impl TransportError {
    /// Map a raw status code to a result.
    pub const fn from_code(code: i16) -> std::result::Result<(), Self> {
        match code {
            c if c >= 0 => Ok(()),
            -1 => Err(Self::InvalidAddress),
            -2 => Err(Self::AddressInUse),
            -3 | -4 | -7 => Err(Self::MaxSockets),
            -6 => Err(Self::InvalidArgument),
            -9 => Err(Self::Invalid),
            -11 => Err(Self::AddressRequired),
            -12 => Err(Self::ConnectionAborted),
            -13 => Err(Self::TimedOut),
            -14 => Err(Self::BufferFull),
            -15 => Err(Self::Busy),
            c => Err(Self::Other(c)),
        }
    }

    /// Raw status code for this error.
    #[must_use]
    pub const fn code(&self) -> i16 {
        match self {
            Self::InvalidAddress => -1,
            Self::AddressInUse => -2,
            Self::MaxSockets => -3,
            Self::InvalidArgument => -6,
            Self::Invalid => -9,
            Self::AddressRequired => -11,
            Self::ConnectionAborted => -12,
            Self::TimedOut => -13,
            Self::BufferFull => -14,
            Self::Busy => -15,
            Self::Other(c) => *c,
        }
    }
}

/// Main error type for socket layer operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SocketError {
    /// No free socket slot or receive buffer memory
    #[error("no free socket resources")]
    NoResource,

    /// Handle is out of range or refers to a slot that was closed and reused
    #[error("invalid socket handle {0}")]
    InvalidHandle(SocketHandle),

    /// Operation not allowed in the socket's current state
    #[error("cannot {op} while socket is {state}")]
    InvalidState {
        op: &'static str,
        state: SocketState,
    },

    /// Operation not supported for this socket type (e.g. connect on datagram)
    #[error("{op} is not supported on this socket type")]
    WrongSocketType { op: &'static str },

    /// Wait budget for a bind/listen/connect/send elapsed
    #[error("{op} timed out after {after:?}")]
    Timeout {
        op: &'static str,
        after: Duration,
    },

    /// Peer shut down or the socket was never connected
    #[error("socket not connected")]
    NotConnected,

    /// Low-level primitive rejected the request
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result type alias for socket layer operations
pub type Result<T> = std::result::Result<T, SocketError>;

impl SocketError {
    /// Shorthand for [`SocketError::InvalidState`].
    pub const fn invalid_state(op: &'static str, state: SocketState) -> Self {
        Self::InvalidState { op, state }
    }

    /// Check if the caller may retry the same operation later.
    ///
    /// Timeouts revert the socket to `Idle`, and exhaustion clears once other
    /// sockets are closed. A connect is retried on a freshly created socket.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoResource
                | Self::Timeout { .. }
                | Self::Transport(TransportError::BufferFull | TransportError::Busy)
        )
    }

    /// Check if this is a connection error
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::Transport(TransportError::ConnectionAborted)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_both_ways() {
        assert_eq!(TransportError::from_code(0), Ok(()));
        assert_eq!(TransportError::from_code(12), Ok(()));
        assert_eq!(TransportError::from_code(-14), Err(TransportError::BufferFull));
        assert_eq!(TransportError::from_code(-4), Err(TransportError::MaxSockets));
        assert_eq!(TransportError::from_code(-99), Err(TransportError::Other(-99)));

        for err in [
            TransportError::InvalidAddress,
            TransportError::AddressInUse,
            TransportError::ConnectionAborted,
            TransportError::BufferFull,
        ] {
            assert_eq!(TransportError::from_code(err.code()), Err(err));
        }
    }

    #[test]
    fn recoverable_errors() {
        let timeout = SocketError::Timeout {
            op: "connect",
            after: Duration::from_secs(20),
        };
        assert!(timeout.is_recoverable());
        assert!(SocketError::NoResource.is_recoverable());
        assert!(!SocketError::NotConnected.is_recoverable());
        assert!(SocketError::NotConnected.is_connection_error());
    }

    #[test]
    fn error_messages() {
        let err = SocketError::invalid_state("listen", SocketState::Idle);
        assert_eq!(err.to_string(), "cannot listen while socket is Idle");
        let err = SocketError::from(TransportError::BufferFull);
        assert_eq!(err.to_string(), "transport error: transmit buffer full");
    }
}
