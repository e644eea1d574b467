//! The dispatch callback.
//!
//! The only place notifications mutate socket records. Dispatch never talks
//! to the transport: anything that needs a primitive call (re-arming a
//! receive, flushing a delivery, releasing a hardware socket) is pushed onto
//! the action queue and run by the stack once the pump has returned.
//!
//! A notification whose precondition does not hold is stale or duplicated.
//! It is logged and dropped.

use hifnet_core::backpressure::{Delivery, Ingest};
use hifnet_core::error::TransportError;
use hifnet_core::handle::{RawSocket, SocketHandle};
use hifnet_core::monitor::{SocketEvent, SocketEventSender};
use hifnet_core::socket_type::SocketType;
use hifnet_core::state::SocketState;
use std::net::SocketAddrV4;
use tracing::{debug, trace, warn};

use crate::event::{Action, ActionQueue, Notification};
use crate::table::{SocketRecord, SocketTable};
use crate::transport::EventSink;

/// Borrowed view of the stack handed to the transport during one pump.
pub(crate) struct Dispatcher<'a> {
    pub(crate) table: &'a mut SocketTable,
    pub(crate) actions: &'a mut ActionQueue,
    pub(crate) monitor: Option<&'a SocketEventSender>,
}

impl EventSink for Dispatcher<'_> {
    fn notify(&mut self, notification: Notification) {
        trace!(?notification, "dispatch");
        match notification {
            Notification::BindResult { socket, status } => self.on_bind(socket, status),
            Notification::ListenResult { socket, status } => self.on_listen(socket, status),
            Notification::Accepted {
                listener,
                child,
                remote,
            } => self.on_accept(listener, child, remote),
            Notification::ConnectResult { socket, status } => self.on_connect(socket, status),
            Notification::Received {
                socket,
                data,
                source,
            } => self.on_receive(socket, Delivery::new(data, source)),
            Notification::ReceiveFailed { socket, error } => self.on_receive_failed(socket, error),
            Notification::SendComplete { socket, sent } => {
                if let Some((rec, _)) = self.table.by_raw_mut(socket) {
                    if rec.state != SocketState::Invalid {
                        trace!(socket = %socket, sent, "send complete");
                        rec.send_in_flight = false;
                    }
                }
            }
        }
    }
}

impl Dispatcher<'_> {
    fn emit(&self, event: SocketEvent) {
        if let Some(monitor) = self.monitor {
            let _ = monitor.send(event);
        }
    }

    fn on_bind(&mut self, socket: RawSocket, status: Result<(), TransportError>) {
        let Some(rec) = record_in(self.table, socket, SocketState::Binding, "bind result") else {
            return;
        };
        let event: fn(SocketHandle) -> SocketEvent = match status {
            Ok(()) => {
                rec.state = SocketState::Bound;
                debug!(socket = %socket, ty = %rec.ty, "bound");
                if rec.ty == SocketType::Datagram {
                    arm(rec, socket, self.actions);
                }
                SocketEvent::Bound
            }
            Err(err) => {
                rec.state = SocketState::Idle;
                rec.last_error = Some(err);
                warn!(socket = %socket, error = %err, "bind failed");
                SocketEvent::BindFailed
            }
        };
        if let Some(handle) = self.table.handle_of(socket) {
            self.emit(event(handle));
        }
    }

    fn on_listen(&mut self, socket: RawSocket, status: Result<(), TransportError>) {
        let Some(rec) = record_in(self.table, socket, SocketState::Listen, "listen result") else {
            return;
        };
        let event: fn(SocketHandle) -> SocketEvent = match status {
            Ok(()) => {
                rec.state = SocketState::Listening;
                debug!(socket = %socket, "listening");
                SocketEvent::Listening
            }
            Err(err) => {
                rec.state = SocketState::Idle;
                rec.last_error = Some(err);
                warn!(socket = %socket, error = %err, "listen failed");
                SocketEvent::ListenFailed
            }
        };
        if let Some(handle) = self.table.handle_of(socket) {
            self.emit(event(handle));
        }
    }

    fn on_accept(&mut self, listener: RawSocket, child: RawSocket, remote: SocketAddrV4) {
        let child_free = self
            .table
            .by_raw(child)
            .is_some_and(|rec| rec.state == SocketState::Invalid);

        if record_in(self.table, listener, SocketState::Listening, "accept").is_none() {
            // Nobody will claim this connection; give the hardware socket back.
            if child_free {
                self.actions.push(Action::Close(child));
            }
            return;
        }

        let Some(child_handle) = self.table.adopt(child, listener, remote) else {
            warn!(listener = %listener, child = %child, "accepted child slot unusable");
            if child_free {
                self.actions.push(Action::Close(child));
            }
            return;
        };

        if let Some((rec, _)) = self.table.by_raw_mut(listener) {
            rec.accept_queue.push(child);
        }
        debug!(listener = %listener, child = %child, %remote, "accepted");
        if let Some(listener) = self.table.handle_of(listener) {
            self.emit(SocketEvent::Accepted {
                listener,
                child: child_handle,
                remote,
            });
        }
    }

    fn on_connect(&mut self, socket: RawSocket, status: Result<(), TransportError>) {
        let Some(rec) = record_in(self.table, socket, SocketState::Connecting, "connect result") else {
            return;
        };
        let remote = rec.remote;
        let connected = match status {
            Ok(()) => {
                rec.state = SocketState::Connected;
                debug!(socket = %socket, ?remote, "connected");
                arm(rec, socket, self.actions);
                true
            }
            Err(err) => {
                rec.abandon_connect();
                rec.last_error = Some(err);
                warn!(socket = %socket, error = %err, "connect failed");
                false
            }
        };
        let Some(handle) = self.table.handle_of(socket) else {
            return;
        };
        match (connected, remote) {
            (true, Some(remote)) => self.emit(SocketEvent::Connected { handle, remote }),
            (true, None) => {}
            (false, _) => self.emit(SocketEvent::ConnectFailed(handle)),
        }
    }

    fn on_receive(&mut self, socket: RawSocket, delivery: Delivery) {
        let Some((rec, pool)) = self.table.by_raw_mut(socket) else {
            warn!(socket = %socket, "receive for unknown socket");
            return;
        };

        if rec.ty == SocketType::Stream && delivery.data.is_empty() {
            if rec.state == SocketState::Connected {
                self.shutdown(socket);
            } else {
                warn!(socket = %socket, state = %rec.state, "ignoring stale shutdown");
            }
            return;
        }

        if !rec.state.is_readable(rec.ty) {
            warn!(socket = %socket, state = %rec.state, "discarding data for unreadable socket");
            self.actions.push(Action::Discard(socket));
            return;
        }

        let len = delivery.data.len();
        match rec.window.ingest(delivery, pool) {
            Ingest::Buffered => trace!(socket = %socket, len, "buffered"),
            Ingest::Stalled => debug!(socket = %socket, len, "receive stalled"),
            Ingest::Dropped => self.actions.push(Action::Discard(socket)),
        }

        if !arm(rec, socket, self.actions) {
            debug!(socket = %socket, fill = rec.window.buffer().fill(), "receive buffer full");
            if let Some(handle) = self.table.handle_of(socket) {
                self.emit(SocketEvent::BufferFull(handle));
            }
        }
    }

    fn on_receive_failed(&mut self, socket: RawSocket, error: TransportError) {
        let Some((rec, _)) = self.table.by_raw_mut(socket) else {
            return;
        };
        match (rec.ty, rec.state) {
            (SocketType::Stream, SocketState::Connected) => {
                warn!(socket = %socket, %error, "receive failed, dropping connection");
                self.shutdown(socket);
            }
            (SocketType::Datagram, SocketState::Bound) => {
                warn!(socket = %socket, %error, "datagram receive failed");
                rec.window.disarm();
                arm(rec, socket, self.actions);
            }
            _ => warn!(socket = %socket, state = %rec.state, %error, "ignoring receive failure"),
        }
    }

    /// Peer is gone: release everything now rather than on the next call.
    fn shutdown(&mut self, socket: RawSocket) {
        self.table.release(socket);
        self.actions.push(Action::Close(socket));
        debug!(socket = %socket, "disconnected by peer");
        if let Some(handle) = self.table.handle_of(socket) {
            self.emit(SocketEvent::Disconnected(handle));
        }
    }
}

/// Record in `expected` state, or `None` if the notification is stale.
fn record_in<'t>(
    table: &'t mut SocketTable,
    socket: RawSocket,
    expected: SocketState,
    what: &'static str,
) -> Option<&'t mut SocketRecord> {
    match table.by_raw_mut(socket) {
        Some((rec, _)) if rec.state == expected => Some(rec),
        Some((rec, _)) => {
            warn!(socket = %socket, state = %rec.state, what, "ignoring stale notification");
            None
        }
        None => {
            warn!(socket = %socket, what, "notification for unknown socket");
            None
        }
    }
}

/// Queue the next receive request if the window grants one.
///
/// Returns `false` when the window withholds it (backpressure).
pub(crate) fn arm(rec: &mut SocketRecord, socket: RawSocket, actions: &mut ActionQueue) -> bool {
    if rec.window.is_armed() {
        return true;
    }
    match rec.window.arm() {
        Some(len) => {
            let queued = actions
                .iter()
                .any(|a| matches!(a, Action::ArmReceive { socket: s, .. } if *s == socket));
            if !queued {
                actions.push(Action::ArmReceive { socket, len });
            }
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use hifnet_core::options::StackOptions;
    use std::net::Ipv4Addr;

    fn peer() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 50), 40000)
    }

    struct Fixture {
        table: SocketTable,
        actions: ActionQueue,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                table: SocketTable::new(&StackOptions::new().with_layout(3, 1)),
                actions: ActionQueue::new(),
            }
        }

        fn notify(&mut self, n: Notification) {
            Dispatcher {
                table: &mut self.table,
                actions: &mut self.actions,
                monitor: None,
            }
            .notify(n);
        }

        fn socket_in(&mut self, ty: SocketType, state: SocketState) -> SocketHandle {
            let h = self.table.allocate(ty).unwrap();
            self.table.get_mut(h).unwrap().state = state;
            h
        }

        fn state(&self, h: SocketHandle) -> SocketState {
            self.table.get(h).unwrap().state()
        }
    }

    #[test]
    fn bind_failure_reverts_to_idle() {
        let mut f = Fixture::new();
        let h = f.socket_in(SocketType::Stream, SocketState::Binding);
        f.notify(Notification::BindResult {
            socket: h.raw(),
            status: Err(TransportError::AddressInUse),
        });
        assert_eq!(f.state(h), SocketState::Idle);
        assert_eq!(f.table.get(h).unwrap().last_error, Some(TransportError::AddressInUse));
        assert!(f.actions.is_empty());
    }

    #[test]
    fn datagram_bind_arms_first_receive() {
        let mut f = Fixture::new();
        let h = f.socket_in(SocketType::Datagram, SocketState::Binding);
        f.notify(Notification::BindResult {
            socket: h.raw(),
            status: Ok(()),
        });
        assert_eq!(f.state(h), SocketState::Bound);
        assert_eq!(
            f.actions.as_slice(),
            [Action::ArmReceive {
                socket: h.raw(),
                len: 1400
            }]
        );
    }

    #[test]
    fn results_without_matching_state_are_ignored() {
        let mut f = Fixture::new();
        let h = f.socket_in(SocketType::Stream, SocketState::Idle);
        f.notify(Notification::ConnectResult {
            socket: h.raw(),
            status: Ok(()),
        });
        f.notify(Notification::ListenResult {
            socket: h.raw(),
            status: Ok(()),
        });
        f.notify(Notification::ConnectResult {
            socket: RawSocket(200),
            status: Ok(()),
        });
        assert_eq!(f.state(h), SocketState::Idle);
        assert!(f.actions.is_empty());
    }

    #[test]
    fn accept_queues_children_in_arrival_order() {
        let mut f = Fixture::new();
        let l = f.socket_in(SocketType::Stream, SocketState::Listening);
        f.notify(Notification::Accepted {
            listener: l.raw(),
            child: RawSocket(2),
            remote: peer(),
        });
        f.notify(Notification::Accepted {
            listener: l.raw(),
            child: RawSocket(1),
            remote: peer(),
        });
        let rec = f.table.get(l).unwrap();
        assert_eq!(rec.accept_queue.as_slice(), [RawSocket(2), RawSocket(1)]);
    }

    #[test]
    fn accept_on_closed_listener_releases_child() {
        let mut f = Fixture::new();
        f.notify(Notification::Accepted {
            listener: RawSocket(0),
            child: RawSocket(1),
            remote: peer(),
        });
        assert_eq!(f.actions.as_slice(), [Action::Close(RawSocket(1))]);
    }

    #[test]
    fn data_for_unreadable_socket_is_discarded() {
        let mut f = Fixture::new();
        let h = f.socket_in(SocketType::Stream, SocketState::Listening);
        f.notify(Notification::Received {
            socket: h.raw(),
            data: Bytes::from_static(b"late"),
            source: peer(),
        });
        assert_eq!(f.actions.as_slice(), [Action::Discard(h.raw())]);
        assert_eq!(f.table.get(h).unwrap().window().available(), 0);
    }

    #[test]
    fn bound_stream_does_not_buffer() {
        let mut f = Fixture::new();
        let h = f.socket_in(SocketType::Stream, SocketState::Bound);
        f.notify(Notification::Received {
            socket: h.raw(),
            data: Bytes::from_static(b"early"),
            source: peer(),
        });
        assert_eq!(f.actions.as_slice(), [Action::Discard(h.raw())]);
        assert_eq!(f.table.get(h).unwrap().window().available(), 0);
    }

    #[test]
    fn failed_connect_forgets_peer() {
        let mut f = Fixture::new();
        let h = f.socket_in(SocketType::Stream, SocketState::Connecting);
        f.table.get_mut(h).unwrap().remote = Some(peer());
        f.notify(Notification::ConnectResult {
            socket: h.raw(),
            status: Err(TransportError::TimedOut),
        });
        let rec = f.table.get(h).unwrap();
        assert_eq!(rec.state(), SocketState::Idle);
        assert_eq!(rec.remote(), None);
        assert!(rec.connect_failed);
    }

    #[test]
    fn empty_stream_receive_is_shutdown() {
        let mut f = Fixture::new();
        let l = f.socket_in(SocketType::Stream, SocketState::Listening);
        let c = f.socket_in(SocketType::Stream, SocketState::Connected);
        f.table.get_mut(c).unwrap().parent = Some(l.raw());

        f.notify(Notification::Received {
            socket: c.raw(),
            data: Bytes::new(),
            source: peer(),
        });
        let rec = f.table.get(c).unwrap();
        assert_eq!(rec.state(), SocketState::Invalid);
        assert_eq!(rec.parent(), None);
        assert_eq!(f.actions.as_slice(), [Action::Close(c.raw())]);
    }

    #[test]
    fn send_complete_clears_marker() {
        let mut f = Fixture::new();
        let h = f.socket_in(SocketType::Stream, SocketState::Connected);
        f.table.get_mut(h).unwrap().send_in_flight = true;
        f.notify(Notification::SendComplete {
            socket: h.raw(),
            sent: 10,
        });
        assert!(!f.table.get(h).unwrap().send_in_flight);
    }
}
