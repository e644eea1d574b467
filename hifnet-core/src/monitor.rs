//! Socket event monitoring.
//!
//! Provides an event stream for tracking socket lifecycle events like binds,
//! connections, accepts, peer shutdowns and receive stalls.

use std::fmt;
use std::net::SocketAddrV4;

use crate::handle::SocketHandle;

/// Socket lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// Socket successfully bound.
    Bound(SocketHandle),

    /// Bind was rejected or timed out.
    BindFailed(SocketHandle),

    /// Socket is listening for incoming connections.
    Listening(SocketHandle),

    /// Listen was rejected or timed out.
    ListenFailed(SocketHandle),

    /// Socket successfully connected to a peer.
    Connected {
        handle: SocketHandle,
        remote: SocketAddrV4,
    },

    /// Connect was rejected or timed out.
    ConnectFailed(SocketHandle),

    /// A listening socket spawned a child for an incoming connection.
    Accepted {
        listener: SocketHandle,
        child: SocketHandle,
        remote: SocketAddrV4,
    },

    /// Peer shut the connection down.
    Disconnected(SocketHandle),

    /// Receive buffer full; the transport is no longer asked for data.
    BufferFull(SocketHandle),

    /// Socket closed by the application.
    Closed(SocketHandle),
}

impl fmt::Display for SocketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bound(h) => write!(f, "Socket {h} bound"),
            Self::BindFailed(h) => write!(f, "Bind failed for socket {h}"),
            Self::Listening(h) => write!(f, "Socket {h} listening"),
            Self::ListenFailed(h) => write!(f, "Listen failed for socket {h}"),
            Self::Connected { handle, remote } => {
                write!(f, "Socket {handle} connected to {remote}")
            }
            Self::ConnectFailed(h) => write!(f, "Connect failed for socket {h}"),
            Self::Accepted {
                listener,
                child,
                remote,
            } => write!(f, "Socket {listener} accepted {child} from {remote}"),
            Self::Disconnected(h) => write!(f, "Socket {h} disconnected by peer"),
            Self::BufferFull(h) => write!(f, "Socket {h} receive buffer full"),
            Self::Closed(h) => write!(f, "Socket {h} closed"),
        }
    }
}

/// Handle for receiving socket events.
pub type SocketMonitor = flume::Receiver<SocketEvent>;

/// Sending half kept by the socket stack.
pub type SocketEventSender = flume::Sender<SocketEvent>;

/// Creates a new monitoring channel pair.
#[must_use]
pub fn create_monitor() -> (SocketEventSender, SocketMonitor) {
    flume::unbounded()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::RawSocket;

    #[test]
    fn test_socket_event_display() {
        let remote: SocketAddrV4 = "10.0.0.7:8080".parse().unwrap();
        let event = SocketEvent::Connected {
            handle: SocketHandle::new(RawSocket(2), 1),
            remote,
        };
        assert_eq!(event.to_string(), "Socket 2#1 connected to 10.0.0.7:8080");
    }

    #[test]
    fn test_monitor_channel() {
        let (sender, receiver) = create_monitor();
        let handle = SocketHandle::new(RawSocket(0), 1);
        sender.send(SocketEvent::Bound(handle)).unwrap();
        assert_eq!(receiver.recv().unwrap(), SocketEvent::Bound(handle));
    }
}
