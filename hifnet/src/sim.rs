//! Scripted in-memory transport.
//!
//! `SimTransport` stands in for the hardware in tests and demos. It records
//! every primitive call, answers bind/listen/connect on request (or
//! automatically), and delivers whatever notifications the caller injects
//! on the next pump. Each pump advances a shared [`ManualClock`] by a fixed
//! tick, so wait budgets elapse without sleeping.

use bytes::Bytes;
use hifnet_core::config::{DEFAULT_DATAGRAM_SLOTS, DEFAULT_STREAM_SLOTS};
use hifnet_core::error::TransportError;
use hifnet_core::handle::{RawSocket, SocketLayout};
use hifnet_core::socket_type::SocketType;
use hifnet_core::timeout::ManualClock;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::SocketAddrV4;
use std::time::Duration;
use tracing::trace;

use crate::event::Notification;
use crate::transport::{EventSink, Transport, TransportResult};

/// Clock advance per pump unless configured otherwise.
pub const DEFAULT_TICK: Duration = Duration::from_millis(10);

/// A primitive call as the simulated hardware saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Open { socket: RawSocket, ty: SocketType, flags: u8 },
    Bind { socket: RawSocket, addr: SocketAddrV4 },
    Listen { socket: RawSocket, backlog: u8 },
    Connect { socket: RawSocket, addr: SocketAddrV4 },
    Send { socket: RawSocket, data: Bytes },
    SendTo { socket: RawSocket, data: Bytes, addr: SocketAddrV4 },
    Recv { socket: RawSocket, len: usize },
    Discard(RawSocket),
    Close(RawSocket),
    SetOption { socket: RawSocket, level: u8, name: u8, value: Vec<u8> },
}

/// In-memory transport driven by the test.
#[derive(Debug)]
pub struct SimTransport {
    clock: ManualClock,
    tick: Duration,
    layout: SocketLayout,
    auto_ack: bool,
    queue: VecDeque<Notification>,
    requests: Vec<Request>,
    open: BTreeSet<RawSocket>,
    /// Outstanding receive request size per socket
    armed: BTreeMap<RawSocket, usize>,
    /// Sends answered with `BufferFull` before one is accepted
    full_sends: usize,
    send_error: Option<TransportError>,
    receive_blocked: bool,
    pumps: usize,
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: ManualClock::new(),
            tick: DEFAULT_TICK,
            layout: SocketLayout::new(DEFAULT_STREAM_SLOTS, DEFAULT_DATAGRAM_SLOTS),
            auto_ack: false,
            queue: VecDeque::new(),
            requests: Vec::new(),
            open: BTreeSet::new(),
            armed: BTreeMap::new(),
            full_sends: 0,
            send_error: None,
            receive_blocked: false,
            pumps: 0,
        }
    }

    /// Answer every bind, listen and connect with success on the next pump.
    #[must_use]
    pub fn with_auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }

    /// Clock advance per pump.
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Slot layout used to pick hardware sockets for accepted connections.
    #[must_use]
    pub fn with_layout(mut self, stream_slots: u8, datagram_slots: u8) -> Self {
        self.layout = SocketLayout::new(stream_slots, datagram_slots);
        self
    }

    /// Handle to the clock this transport advances; give it to the stack.
    #[must_use]
    pub fn clock(&self) -> ManualClock {
        self.clock.clone()
    }

    pub fn set_auto_ack(&mut self, auto_ack: bool) {
        self.auto_ack = auto_ack;
    }

    /// Queue a notification for the next pump.
    pub fn inject(&mut self, notification: Notification) {
        self.queue.push_back(notification);
    }

    /// Queue a peer connection on `listener`.
    ///
    /// Returns the hardware socket chosen for the child, or `None` if every
    /// stream socket is taken.
    pub fn accept(&mut self, listener: RawSocket, remote: SocketAddrV4) -> Option<RawSocket> {
        let child = self
            .layout
            .range(SocketType::Stream)
            .map(RawSocket)
            .find(|raw| !self.open.contains(raw))?;
        self.open.insert(child);
        self.inject(Notification::Accepted {
            listener,
            child,
            remote,
        });
        Some(child)
    }

    /// Queue one transfer for `socket`.
    pub fn deliver(&mut self, socket: RawSocket, data: impl Into<Bytes>, source: SocketAddrV4) {
        self.inject(Notification::Received {
            socket,
            data: data.into(),
            source,
        });
    }

    /// Queue an orderly shutdown from the peer of `socket`.
    pub fn hang_up(&mut self, socket: RawSocket, source: SocketAddrV4) {
        self.deliver(socket, Bytes::new(), source);
    }

    /// Answer the next `count` sends with `BufferFull`.
    pub fn fill_transmit(&mut self, count: usize) {
        self.full_sends = count;
    }

    /// Answer every send with `error` until cleared.
    pub fn fail_sends(&mut self, error: Option<TransportError>) {
        self.send_error = error;
    }

    pub fn set_receive_blocked(&mut self, blocked: bool) {
        self.receive_blocked = blocked;
    }

    /// Every primitive call so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn clear_requests(&mut self) {
        self.requests.clear();
    }

    /// Size of the outstanding receive request on `socket`.
    #[must_use]
    pub fn armed(&self, socket: RawSocket) -> Option<usize> {
        self.armed.get(&socket).copied()
    }

    #[must_use]
    pub fn is_open(&self, socket: RawSocket) -> bool {
        self.open.contains(&socket)
    }

    /// Bytes accepted by `send` on `socket`, concatenated.
    #[must_use]
    pub fn sent(&self, socket: RawSocket) -> Vec<u8> {
        self.requests
            .iter()
            .filter_map(|req| match req {
                Request::Send { socket: s, data } if *s == socket => Some(data.as_ref()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    #[must_use]
    pub const fn pumps(&self) -> usize {
        self.pumps
    }

    fn ack(&mut self, notification: Notification) {
        if self.auto_ack {
            self.queue.push_back(notification);
        }
    }
}

impl Transport for SimTransport {
    fn open(&mut self, socket: RawSocket, ty: SocketType, flags: u8) -> TransportResult {
        if !self.open.insert(socket) {
            return Err(TransportError::MaxSockets);
        }
        self.requests.push(Request::Open { socket, ty, flags });
        Ok(())
    }

    fn bind(&mut self, socket: RawSocket, addr: SocketAddrV4) -> TransportResult {
        self.requests.push(Request::Bind { socket, addr });
        self.ack(Notification::BindResult {
            socket,
            status: Ok(()),
        });
        Ok(())
    }

    fn listen(&mut self, socket: RawSocket, backlog: u8) -> TransportResult {
        self.requests.push(Request::Listen { socket, backlog });
        self.ack(Notification::ListenResult {
            socket,
            status: Ok(()),
        });
        Ok(())
    }

    fn connect(&mut self, socket: RawSocket, addr: SocketAddrV4) -> TransportResult {
        self.requests.push(Request::Connect { socket, addr });
        self.ack(Notification::ConnectResult {
            socket,
            status: Ok(()),
        });
        Ok(())
    }

    fn send(&mut self, socket: RawSocket, data: &[u8]) -> TransportResult<usize> {
        if let Some(err) = self.send_error {
            return Err(err);
        }
        if self.full_sends > 0 {
            self.full_sends -= 1;
            return Err(TransportError::BufferFull);
        }
        self.requests.push(Request::Send {
            socket,
            data: Bytes::copy_from_slice(data),
        });
        self.queue.push_back(Notification::SendComplete {
            socket,
            sent: data.len(),
        });
        Ok(data.len())
    }

    fn send_to(&mut self, socket: RawSocket, data: &[u8], addr: SocketAddrV4) -> TransportResult<usize> {
        if let Some(err) = self.send_error {
            return Err(err);
        }
        self.requests.push(Request::SendTo {
            socket,
            data: Bytes::copy_from_slice(data),
            addr,
        });
        self.queue.push_back(Notification::SendComplete {
            socket,
            sent: data.len(),
        });
        Ok(data.len())
    }

    fn recv(&mut self, socket: RawSocket, len: usize) -> TransportResult {
        if self.armed.insert(socket, len).is_some() {
            // The hardware takes one outstanding request per socket.
            return Err(TransportError::Busy);
        }
        self.requests.push(Request::Recv { socket, len });
        Ok(())
    }

    fn discard(&mut self, socket: RawSocket) -> TransportResult {
        self.requests.push(Request::Discard(socket));
        Ok(())
    }

    fn close(&mut self, socket: RawSocket) -> TransportResult {
        self.requests.push(Request::Close(socket));
        self.armed.remove(&socket);
        let open = &mut self.open;
        self.queue.retain(|n| {
            if n.socket() != socket {
                return true;
            }
            // A connection the listener never saw gives its socket back too.
            if let Notification::Accepted { child, .. } = n {
                open.remove(child);
            }
            false
        });
        if self.open.remove(&socket) {
            Ok(())
        } else {
            Err(TransportError::Invalid)
        }
    }

    fn set_option(&mut self, socket: RawSocket, level: u8, name: u8, value: &[u8]) -> TransportResult {
        self.requests.push(Request::SetOption {
            socket,
            level,
            name,
            value: value.to_vec(),
        });
        Ok(())
    }

    fn receive_blocked(&self) -> bool {
        self.receive_blocked
    }

    fn pump(&mut self, sink: &mut dyn EventSink) {
        self.pumps += 1;
        self.clock.advance(self.tick);
        let pending: Vec<_> = self.queue.drain(..).collect();
        if !pending.is_empty() {
            trace!(count = pending.len(), "sim pump");
        }
        for notification in pending {
            if let Notification::Received { socket, .. } | Notification::ReceiveFailed { socket, .. } =
                &notification
            {
                self.armed.remove(socket);
            }
            sink.notify(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    struct Collect(Vec<Notification>);

    impl EventSink for Collect {
        fn notify(&mut self, notification: Notification) {
            self.0.push(notification);
        }
    }

    #[test]
    fn pump_advances_clock_and_drains_in_order() {
        let mut sim = SimTransport::new().with_auto_ack(true);
        let clock = sim.clock();
        sim.bind(RawSocket(0), SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 80)).unwrap();
        sim.listen(RawSocket(0), 1).unwrap();

        let mut sink = Collect(Vec::new());
        sim.pump(&mut sink);
        assert_eq!(clock.elapsed(), DEFAULT_TICK);
        assert!(matches!(sink.0[0], Notification::BindResult { .. }));
        assert!(matches!(sink.0[1], Notification::ListenResult { .. }));

        sim.pump(&mut sink);
        assert_eq!(sink.0.len(), 2);
    }

    #[test]
    fn accept_picks_free_stream_socket() {
        let mut sim = SimTransport::new().with_layout(2, 1);
        sim.open(RawSocket(0), SocketType::Stream, 0).unwrap();
        let remote = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9000);
        assert_eq!(sim.accept(RawSocket(0), remote), Some(RawSocket(1)));
        assert_eq!(sim.accept(RawSocket(0), remote), None);
    }

    #[test]
    fn second_outstanding_receive_is_refused() {
        let mut sim = SimTransport::new();
        assert!(sim.recv(RawSocket(3), 1400).is_ok());
        assert_eq!(sim.recv(RawSocket(3), 1400), Err(TransportError::Busy));
        assert_eq!(sim.armed(RawSocket(3)), Some(1400));
    }

    #[test]
    fn close_drops_undelivered_notifications() {
        let mut sim = SimTransport::new().with_auto_ack(true);
        let remote = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9000);
        sim.open(RawSocket(0), SocketType::Stream, 0).unwrap();
        sim.open(RawSocket(1), SocketType::Stream, 0).unwrap();
        sim.connect(RawSocket(0), remote).unwrap();
        sim.connect(RawSocket(1), remote).unwrap();
        let child = sim.accept(RawSocket(0), remote).unwrap();

        sim.close(RawSocket(0)).unwrap();
        assert!(!sim.is_open(child));

        let mut sink = Collect(Vec::new());
        sim.pump(&mut sink);
        assert_eq!(
            sink.0,
            [Notification::ConnectResult {
                socket: RawSocket(1),
                status: Ok(()),
            }]
        );
    }

    #[test]
    fn transmit_full_then_accepts() {
        let mut sim = SimTransport::new();
        sim.fill_transmit(1);
        assert_eq!(sim.send(RawSocket(0), b"hi"), Err(TransportError::BufferFull));
        assert_eq!(sim.send(RawSocket(0), b"hi"), Ok(2));
        assert_eq!(sim.sent(RawSocket(0)), b"hi");
    }
}
