//! The transport seam: low-level primitives and the cooperative event pump.
//!
//! Every primitive returns only an *immediate* status. Its real outcome is
//! reported later as a [`Notification`] handed to the [`EventSink`] while
//! [`Transport::pump`] runs.

use hifnet_core::error::TransportError;
use hifnet_core::handle::RawSocket;
use hifnet_core::socket_type::SocketType;
use std::net::SocketAddrV4;

use crate::event::Notification;

/// Immediate status of a primitive.
pub type TransportResult<T = ()> = Result<T, TransportError>;

/// Receiver of notifications during a pump.
///
/// The socket layer's dispatch implements this. A sink never calls back
/// into the transport.
pub trait EventSink {
    fn notify(&mut self, notification: Notification);
}

/// Interrupt-driven network interface with one outstanding transfer per socket.
///
/// Implementations are driven from a single thread. `pump` must deliver
/// every notification that is pending when it is called, in arrival order,
/// and return once they are drained.
///
/// Notifications name only the hardware socket, not the handle generation.
/// Once [`Transport::close`] returns, no notification for the closed socket
/// may be delivered: the slot can be handed to a new socket right away, and
/// a late result would be applied to it.
///
/// # Examples
///
/// ```
/// use hifnet::sim::SimTransport;
/// use hifnet::transport::Transport;
/// use hifnet_core::handle::RawSocket;
/// use hifnet_core::socket_type::SocketType;
///
/// let mut sim = SimTransport::new();
/// assert!(sim.open(RawSocket(0), SocketType::Stream, 0).is_ok());
/// ```
pub trait Transport {
    /// Claim hardware socket `socket` for `ty`. `flags` are passed through
    /// from `create` untouched.
    fn open(&mut self, socket: RawSocket, ty: SocketType, flags: u8) -> TransportResult;

    /// Start binding; answered by [`Notification::BindResult`].
    fn bind(&mut self, socket: RawSocket, addr: SocketAddrV4) -> TransportResult;

    /// Start listening; answered by [`Notification::ListenResult`].
    fn listen(&mut self, socket: RawSocket, backlog: u8) -> TransportResult;

    /// Start connecting; answered by [`Notification::ConnectResult`].
    fn connect(&mut self, socket: RawSocket, addr: SocketAddrV4) -> TransportResult;

    /// Queue bytes on a connected socket. Returns the number accepted.
    ///
    /// `Err(TransportError::BufferFull)` means nothing was accepted and the
    /// call may be repeated after pumping.
    fn send(&mut self, socket: RawSocket, data: &[u8]) -> TransportResult<usize>;

    /// Queue one datagram for `addr`.
    fn send_to(&mut self, socket: RawSocket, data: &[u8], addr: SocketAddrV4)
        -> TransportResult<usize>;

    /// Arm one receive request of at most `len` bytes; answered by
    /// [`Notification::Received`] or [`Notification::ReceiveFailed`].
    fn recv(&mut self, socket: RawSocket, len: usize) -> TransportResult;

    /// Drop whatever the last indication on `socket` left undrained.
    fn discard(&mut self, socket: RawSocket) -> TransportResult;

    /// Release hardware socket `socket` and drop every notification for it
    /// that has not been delivered yet.
    fn close(&mut self, socket: RawSocket) -> TransportResult;

    /// Pass a socket option straight to the hardware.
    fn set_option(&mut self, socket: RawSocket, level: u8, name: u8, value: &[u8])
        -> TransportResult;

    /// The interface's receive path is stalled; waiting for transmit room
    /// would not make progress.
    fn receive_blocked(&self) -> bool;

    /// Deliver all pending notifications to `sink`.
    fn pump(&mut self, sink: &mut dyn EventSink);
}
