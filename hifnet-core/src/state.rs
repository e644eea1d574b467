//! Per-socket lifecycle state.
//!
//! ```text
//! Invalid -> Idle -> Connecting -> Connected
//!                 -> Binding -> Bound -> Listen -> Listening
//!                                                  (children: Accepted -> Connected)
//! ```
//!
//! `Invalid` is both the initial and the post-close state.

use std::fmt;

use crate::socket_type::SocketType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SocketState {
    /// Slot unused, or closed
    #[default]
    Invalid,
    /// Allocated, no request outstanding
    Idle,
    /// Connect issued, waiting for the result
    Connecting,
    /// Stream connected; readable and writable
    Connected,
    /// Bind issued, waiting for the result
    Binding,
    /// Bound; datagram sockets are readable here
    Bound,
    /// Listen issued, waiting for the result
    Listen,
    /// Listening for incoming connections
    Listening,
    /// Child of a listening socket whose peer just connected, not yet claimed
    Accepted,
}

impl SocketState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Invalid => "Invalid",
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Binding => "Binding",
            Self::Bound => "Bound",
            Self::Listen => "Listen",
            Self::Listening => "Listening",
            Self::Accepted => "Accepted",
        }
    }

    /// Whether a socket of type `ty` in this state receives payload.
    ///
    /// Streams only once connected; datagrams once bound. A bound or
    /// listening stream never buffers data.
    #[inline]
    #[must_use]
    pub const fn is_readable(&self, ty: SocketType) -> bool {
        matches!(
            (ty, self),
            (SocketType::Stream, Self::Connected) | (SocketType::Datagram, Self::Bound)
        )
    }
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
