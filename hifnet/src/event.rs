//! Hardware notifications and the deferred actions dispatch produces.

use bytes::Bytes;
use hifnet_core::error::TransportError;
use hifnet_core::handle::RawSocket;
use smallvec::SmallVec;
use std::net::SocketAddrV4;

/// Asynchronous result reported by the transport from inside its event pump.
///
/// Notifications name sockets by raw slot number, exactly as the hardware
/// does; they carry no generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    BindResult {
        socket: RawSocket,
        status: Result<(), TransportError>,
    },
    ListenResult {
        socket: RawSocket,
        status: Result<(), TransportError>,
    },
    /// A listening socket accepted a peer; `child` is the hardware socket
    /// allocated for the new connection.
    Accepted {
        listener: RawSocket,
        child: RawSocket,
        remote: SocketAddrV4,
    },
    ConnectResult {
        socket: RawSocket,
        status: Result<(), TransportError>,
    },
    /// One transfer in answer to an armed receive request. An empty transfer
    /// on a stream socket is an orderly shutdown by the peer.
    Received {
        socket: RawSocket,
        data: Bytes,
        source: SocketAddrV4,
    },
    /// The armed receive request failed.
    ReceiveFailed {
        socket: RawSocket,
        error: TransportError,
    },
    SendComplete {
        socket: RawSocket,
        sent: usize,
    },
}

impl Notification {
    /// Raw socket the notification is about.
    #[must_use]
    pub const fn socket(&self) -> RawSocket {
        match self {
            Self::BindResult { socket, .. }
            | Self::ListenResult { socket, .. }
            | Self::ConnectResult { socket, .. }
            | Self::Received { socket, .. }
            | Self::ReceiveFailed { socket, .. }
            | Self::SendComplete { socket, .. } => *socket,
            Self::Accepted { listener, .. } => *listener,
        }
    }
}

/// Transport call requested by dispatch, run after the pump returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Issue one receive request of `len` bytes.
    ArmReceive { socket: RawSocket, len: usize },
    /// Flush a delivery nobody will read.
    Discard(RawSocket),
    /// Release the hardware socket.
    Close(RawSocket),
}

/// Actions collected during one pump.
pub type ActionQueue = SmallVec<[Action; 8]>;
