//! `SocketStack`: the BSD-style socket facade.
//!
//! Owns the transport, the socket table and the deferred action queue. Every
//! call that has to wait for the hardware does so by pumping the transport
//! until the socket reaches a terminal state or the wait budget runs out.
//!
//! Calling context: none of these methods may be called from inside a
//! transport's `pump`. Dispatch only ever sees the table, never the stack,
//! so this cannot happen through the layer's own callbacks.

use hifnet_core::buffer::DatagramHeader;
use hifnet_core::error::{Result, SocketError, TransportError};
use hifnet_core::handle::{RawSocket, SocketHandle};
use hifnet_core::monitor::{create_monitor, SocketEvent, SocketEventSender, SocketMonitor};
use hifnet_core::options::{BufferAllocation, OptionsError, StackOptions};
use hifnet_core::socket_type::{Domain, SocketType};
use hifnet_core::state::SocketState;
use hifnet_core::timeout::{Clock, Deadline, SystemClock};
use smallvec::SmallVec;
use std::net::SocketAddrV4;
use std::task::Poll;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::dispatch::{arm, Dispatcher};
use crate::event::{Action, ActionQueue};
use crate::table::SocketTable;
use crate::transport::Transport;
use crate::wait::{OpKind, PendingOp};

/// Socket layer over one transport.
///
/// # Examples
///
/// ```
/// use hifnet::sim::SimTransport;
/// use hifnet::SocketStack;
/// use hifnet_core::options::StackOptions;
/// use hifnet_core::socket_type::{Domain, SocketType};
///
/// let sim = SimTransport::new().with_auto_ack(true);
/// let clock = sim.clock();
/// let mut stack = SocketStack::with_clock(sim, StackOptions::default(), clock).unwrap();
///
/// let udp = stack.create(Domain::Inet, SocketType::Datagram, 0).unwrap();
/// stack.bind(udp, "0.0.0.0:5353".parse().unwrap()).unwrap();
/// assert!(stack.bound(udp).unwrap());
/// ```
pub struct SocketStack<T: Transport, C: Clock = SystemClock> {
    transport: T,
    clock: C,
    table: SocketTable,
    options: StackOptions,
    actions: ActionQueue,
    monitor: Option<SocketEventSender>,
}

impl<T: Transport> SocketStack<T> {
    /// Create a stack that measures wait budgets with the system clock.
    pub fn new(transport: T, options: StackOptions) -> std::result::Result<Self, OptionsError> {
        Self::with_clock(transport, options, SystemClock)
    }
}

impl<T: Transport, C: Clock> SocketStack<T, C> {
    /// Create a stack with an injected clock.
    pub fn with_clock(
        transport: T,
        options: StackOptions,
        clock: C,
    ) -> std::result::Result<Self, OptionsError> {
        options.validate()?;
        debug!(
            stream_slots = options.layout.stream_slots,
            datagram_slots = options.layout.datagram_slots,
            mtu = options.buffers.mtu,
            "socket stack ready"
        );
        Ok(Self {
            transport,
            clock,
            table: SocketTable::new(&options),
            options,
            actions: ActionQueue::new(),
            monitor: None,
        })
    }

    #[inline]
    pub const fn options(&self) -> &StackOptions {
        &self.options
    }

    #[inline]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    #[inline]
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    #[inline]
    pub const fn clock(&self) -> &C {
        &self.clock
    }

    #[inline]
    pub const fn table(&self) -> &SocketTable {
        &self.table
    }

    /// Enable lifecycle monitoring and get the event receiver.
    ///
    /// A second call replaces the previous receiver.
    pub fn monitor(&mut self) -> SocketMonitor {
        let (sender, receiver) = create_monitor();
        self.monitor = Some(sender);
        receiver
    }

    fn emit(&self, event: SocketEvent) {
        if let Some(monitor) = &self.monitor {
            let _ = monitor.send(event); // Ignore errors if receiver dropped
        }
    }

    /// Run the event pump once, then the actions dispatch queued.
    pub fn poll(&mut self) {
        let mut dispatcher = Dispatcher {
            table: &mut self.table,
            actions: &mut self.actions,
            monitor: self.monitor.as_ref(),
        };
        self.transport.pump(&mut dispatcher);
        self.run_actions();
    }

    fn run_actions(&mut self) {
        for action in std::mem::take(&mut self.actions) {
            match action {
                Action::ArmReceive { socket, len } => {
                    // A later indication in the same pump may have filled the window.
                    let wanted = self
                        .table
                        .by_raw(socket)
                        .is_some_and(|rec| rec.window.is_armed());
                    if !wanted {
                        continue;
                    }
                    trace!(socket = %socket, len, "arm receive");
                    if let Err(err) = self.transport.recv(socket, len) {
                        warn!(socket = %socket, error = %err, "receive request refused");
                        if let Some((rec, _)) = self.table.by_raw_mut(socket) {
                            rec.window.disarm();
                        }
                    }
                }
                Action::Discard(socket) => {
                    trace!(socket = %socket, "discard delivery");
                    if let Err(err) = self.transport.discard(socket) {
                        warn!(socket = %socket, error = %err, "discard failed");
                    }
                }
                Action::Close(socket) => {
                    trace!(socket = %socket, "close hardware socket");
                    if let Err(err) = self.transport.close(socket) {
                        warn!(socket = %socket, error = %err, "close failed");
                    }
                }
            }
        }
    }

    /// Ask for the next receive on `socket` if it is readable and has room.
    fn rearm(&mut self, socket: RawSocket) {
        if let Some((rec, _)) = self.table.by_raw_mut(socket) {
            if rec.state.is_readable(rec.ty) {
                arm(rec, socket, &mut self.actions);
            }
        }
        self.run_actions();
    }

    /// Allocate a socket of type `ty`.
    ///
    /// # Errors
    ///
    /// `NoResource` if every slot for `ty` is taken (or, with static
    /// allocation, the buffer budget is spent).
    pub fn create(&mut self, domain: Domain, ty: SocketType, flags: u8) -> Result<SocketHandle> {
        let handle = self.table.allocate(ty).ok_or_else(|| {
            warn!(%ty, "socket table exhausted");
            SocketError::NoResource
        })?;
        let raw = handle.raw();

        if let Err(err) = self.transport.open(raw, ty, flags) {
            self.table.release(raw);
            return Err(err.into());
        }

        if self.options.allocation == BufferAllocation::Static {
            let (rec, pool) = self.table.get_with_pool(handle)?;
            if let Err(err) = rec.window.reserve(pool) {
                warn!(%handle, "no memory for receive buffer");
                self.table.release(raw);
                if let Err(close_err) = self.transport.close(raw) {
                    warn!(%handle, error = %close_err, "close failed");
                }
                return Err(err);
            }
        }

        debug!(%handle, %ty, ?domain, flags, "created");
        Ok(handle)
    }

    /// Issue a bind and return the wait state without blocking.
    pub fn begin_bind(&mut self, handle: SocketHandle, addr: SocketAddrV4) -> Result<PendingOp> {
        self.table.get(handle)?.expect_state("bind", SocketState::Idle)?;
        self.transport.bind(handle.raw(), addr)?;
        self.begin(handle, OpKind::Bind, self.options.bind_timeout)
    }

    /// Issue a listen and return the wait state without blocking.
    pub fn begin_listen(&mut self, handle: SocketHandle, backlog: u8) -> Result<PendingOp> {
        let rec = self.table.get(handle)?;
        if rec.ty != SocketType::Stream {
            return Err(SocketError::WrongSocketType { op: "listen" });
        }
        rec.expect_state("listen", SocketState::Bound)?;
        self.transport.listen(handle.raw(), backlog)?;
        self.begin(handle, OpKind::Listen, self.options.listen_timeout)
    }

    /// Issue a connect and return the wait state without blocking.
    pub fn begin_connect(&mut self, handle: SocketHandle, addr: SocketAddrV4) -> Result<PendingOp> {
        let rec = self.table.get(handle)?;
        if rec.ty != SocketType::Stream {
            return Err(SocketError::WrongSocketType { op: "connect" });
        }
        rec.expect_state("connect", SocketState::Idle)?;
        if rec.connect_failed {
            // A late result for the earlier attempt would land on this one.
            return Err(SocketError::invalid_state("connect", rec.state));
        }
        self.transport.connect(handle.raw(), addr)?;
        self.table.get_mut(handle)?.remote = Some(addr);
        self.begin(handle, OpKind::Connect, self.options.connect_timeout)
    }

    fn begin(&mut self, handle: SocketHandle, kind: OpKind, budget: Duration) -> Result<PendingOp> {
        let rec = self.table.get_mut(handle)?;
        rec.state = kind.waiting_state();
        rec.last_error = None;
        trace!(%handle, op = %kind, ?budget, "waiting");
        Ok(PendingOp::new(
            handle,
            kind,
            Deadline::starting_now(&self.clock, budget),
        ))
    }

    /// Pump once and check on `op`.
    ///
    /// Ready with `Ok` once the socket reached the target state. On a failure
    /// result or budget expiry the socket is back in `Idle`.
    pub fn poll_op(&mut self, op: &PendingOp) -> Poll<Result<()>> {
        self.poll();
        let now = self.clock.now();
        let rec = match self.table.get_mut(op.handle) {
            Ok(rec) => rec,
            Err(err) => return Poll::Ready(Err(err)),
        };

        let state = rec.state;
        if state == op.kind.target_state() {
            return Poll::Ready(Ok(()));
        }
        if state == op.kind.waiting_state() {
            if !op.deadline.is_expired(now) {
                return Poll::Pending;
            }
            if op.kind == OpKind::Connect {
                rec.abandon_connect();
            } else {
                rec.state = SocketState::Idle;
            }
            let after = op.deadline.elapsed(now);
            warn!(handle = %op.handle, op = %op.kind, ?after, "timed out");
            self.emit(failure_event(op));
            return Poll::Ready(Err(SocketError::Timeout {
                op: op.kind.as_str(),
                after,
            }));
        }
        if state == SocketState::Idle {
            if let Some(err) = rec.last_error.take() {
                return Poll::Ready(Err(err.into()));
            }
        }
        Poll::Ready(Err(SocketError::invalid_state(op.kind.as_str(), state)))
    }

    /// Pump until `op` completes.
    pub fn wait(&mut self, op: &PendingOp) -> Result<()> {
        loop {
            if let Poll::Ready(result) = self.poll_op(op) {
                return result;
            }
        }
    }

    /// Bind and wait up to the bind budget.
    ///
    /// Datagram sockets start receiving as soon as they are bound.
    pub fn bind(&mut self, handle: SocketHandle, addr: SocketAddrV4) -> Result<()> {
        let op = self.begin_bind(handle, addr)?;
        self.wait(&op)
    }

    /// Listen and wait up to the listen budget. The socket must be bound.
    pub fn listen(&mut self, handle: SocketHandle, backlog: u8) -> Result<()> {
        let op = self.begin_listen(handle, backlog)?;
        self.wait(&op)
    }

    /// Connect and wait up to the connect budget.
    ///
    /// After a failure or timeout the socket is `Idle` and refuses another
    /// connect; close it and create a new one before trying again.
    pub fn connect(&mut self, handle: SocketHandle, addr: SocketAddrV4) -> Result<()> {
        let op = self.begin_connect(handle, addr)?;
        self.wait(&op)
    }

    /// Write `data` to a connected stream socket.
    ///
    /// While the transmit buffer is full the call pumps events and tries
    /// again, until the transport accepts, reports another error, or says
    /// its receive path is blocked. Returns the number of bytes accepted;
    /// nothing is buffered here.
    pub fn send(&mut self, handle: SocketHandle, data: &[u8]) -> Result<usize> {
        let rec = self.table.get(handle)?;
        if rec.ty != SocketType::Stream {
            return Err(SocketError::WrongSocketType { op: "send" });
        }
        if rec.state != SocketState::Connected {
            return Err(SocketError::NotConnected);
        }
        if data.is_empty() {
            return Ok(0);
        }

        let raw = handle.raw();
        let deadline = self
            .options
            .send_timeout
            .map(|budget| Deadline::starting_now(&self.clock, budget));

        loop {
            match self.transport.send(raw, data) {
                Ok(sent) => {
                    self.table.get_mut(handle)?.send_in_flight = true;
                    trace!(%handle, sent, "sent");
                    return Ok(sent);
                }
                Err(TransportError::BufferFull) => {
                    if self.transport.receive_blocked() {
                        warn!(%handle, "transmit full and receive path blocked");
                        return Err(TransportError::Busy.into());
                    }
                    self.poll();
                    if self.table.get(handle)?.state != SocketState::Connected {
                        return Err(SocketError::NotConnected);
                    }
                    if let Some(deadline) = deadline {
                        let now = self.clock.now();
                        if deadline.is_expired(now) {
                            warn!(%handle, "send timed out");
                            return Err(SocketError::Timeout {
                                op: "send",
                                after: deadline.elapsed(now),
                            });
                        }
                    }
                }
                Err(err) => {
                    warn!(%handle, error = %err, "send failed");
                    return Err(err.into());
                }
            }
        }
    }

    /// Send one datagram from a bound datagram socket. No retry.
    pub fn send_to(&mut self, handle: SocketHandle, data: &[u8], addr: SocketAddrV4) -> Result<usize> {
        let rec = self.table.get(handle)?;
        if rec.ty != SocketType::Datagram {
            return Err(SocketError::WrongSocketType { op: "send_to" });
        }
        rec.expect_state("send_to", SocketState::Bound)?;
        let sent = self.transport.send_to(handle.raw(), data, addr)?;
        self.table.get_mut(handle)?.send_in_flight = true;
        trace!(%handle, sent, %addr, "sent datagram");
        Ok(sent)
    }

    /// Pump once, then report buffered plus pending bytes.
    ///
    /// Zero for sockets that are neither connected nor bound.
    pub fn available(&mut self, handle: SocketHandle) -> Result<usize> {
        self.poll();
        let rec = self.table.get(handle)?;
        Ok(if rec.state.is_readable(rec.ty) {
            rec.window.available()
        } else {
            0
        })
    }

    /// Read what is resident or immediately transferable, up to `dst.len()`.
    ///
    /// Datagram reads stop at the end of the current datagram.
    pub fn read(&mut self, handle: SocketHandle, dst: &mut [u8]) -> Result<usize> {
        let (rec, pool) = self.table.get_with_pool(handle)?;
        if !rec.state.is_readable(rec.ty) {
            return Err(SocketError::NotConnected);
        }
        if dst.is_empty() {
            return Ok(0);
        }

        if rec.ty.is_framed() && rec.window.buffer().open_frame_remaining().unwrap_or(0) == 0 {
            match rec.window.next_datagram(pool)? {
                Some(header) => {
                    rec.remote = Some(header.source);
                    if header.len == 0 {
                        self.rearm(handle.raw());
                        return Ok(0);
                    }
                }
                None => return Ok(0),
            }
        }

        let n = rec.window.read(dst, pool)?;
        trace!(%handle, n, "read");
        self.rearm(handle.raw());
        Ok(n)
    }

    /// Next readable byte without consuming it.
    pub fn peek(&mut self, handle: SocketHandle) -> Result<Option<u8>> {
        let (rec, pool) = self.table.get_with_pool(handle)?;
        if !rec.state.is_readable(rec.ty) {
            return Err(SocketError::NotConnected);
        }
        rec.window.peek(pool)
    }

    /// Open the next buffered datagram, skipping the unread rest of the
    /// current one. Updates the remote address to the datagram's source.
    pub fn next_datagram(&mut self, handle: SocketHandle) -> Result<Option<DatagramHeader>> {
        let (rec, pool) = self.table.get_with_pool(handle)?;
        if rec.ty != SocketType::Datagram {
            return Err(SocketError::WrongSocketType { op: "next_datagram" });
        }
        if !rec.state.is_readable(rec.ty) {
            return Err(SocketError::NotConnected);
        }
        let header = rec.window.next_datagram(pool)?;
        if let Some(header) = header {
            rec.remote = Some(header.source);
        }
        self.rearm(handle.raw());
        Ok(header)
    }

    /// Close `handle`, flushing any undrained delivery.
    ///
    /// A no-op for sockets that are already closed and for stale handles.
    /// Closing a listener also closes children it accepted but never handed
    /// out; children already handed out stay open.
    pub fn close(&mut self, handle: SocketHandle) {
        let Ok(rec) = self.table.get(handle) else {
            trace!(%handle, "close on stale handle");
            return;
        };
        if rec.state == SocketState::Invalid {
            return;
        }
        let raw = handle.raw();

        let unclaimed = rec.accept_queue.clone();
        for child in unclaimed {
            let orphan = self
                .table
                .by_raw(child)
                .is_some_and(|c| c.state == SocketState::Accepted && c.parent == Some(raw));
            if orphan {
                if let Some(child_handle) = self.table.handle_of(child) {
                    debug!(%handle, child = %child_handle, "closing unclaimed child");
                    self.close_raw(child);
                    self.emit(SocketEvent::Closed(child_handle));
                }
            }
        }

        let claimed: SmallVec<[RawSocket; 8]> = self.table.children_of(raw).collect();
        for child in claimed {
            if let Some((rec, _)) = self.table.by_raw_mut(child) {
                rec.parent = None;
            }
        }

        self.close_raw(raw);
        debug!(%handle, "closed");
        self.emit(SocketEvent::Closed(handle));
    }

    fn close_raw(&mut self, raw: RawSocket) {
        if self.table.release(raw) {
            if let Err(err) = self.transport.discard(raw) {
                warn!(socket = %raw, error = %err, "discard failed");
            }
        }
        if let Err(err) = self.transport.close(raw) {
            warn!(socket = %raw, error = %err, "close failed");
        }
    }

    /// Hand out the oldest accepted child of `listener`, connected and
    /// receiving. `None` if no connection is waiting.
    pub fn accepted_child(&mut self, listener: SocketHandle) -> Result<Option<SocketHandle>> {
        self.poll();
        self.table
            .get(listener)?
            .expect_state("accept", SocketState::Listening)?;

        loop {
            let rec = self.table.get_mut(listener)?;
            if rec.accept_queue.is_empty() {
                return Ok(None);
            }
            let child = rec.accept_queue.remove(0);

            let Some((crec, pool)) = self.table.by_raw_mut(child) else {
                continue;
            };
            if crec.state != SocketState::Accepted || crec.parent != Some(listener.raw()) {
                continue;
            }
            crec.state = SocketState::Connected;
            if self.options.allocation == BufferAllocation::Static
                && crec.window.reserve(pool).is_err()
            {
                warn!(child = %child, "no memory for receive buffer, allocating on demand");
            }
            arm(crec, child, &mut self.actions);
            self.run_actions();

            let handle = self.table.handle_of(child);
            debug!(%listener, child = %child, "handed out accepted child");
            return Ok(handle);
        }
    }

    /// Peer of a stream socket, or source of the last opened datagram.
    pub fn remote_address(&self, handle: SocketHandle) -> Result<Option<SocketAddrV4>> {
        let rec = self.table.get(handle)?;
        Ok(if rec.state == SocketState::Invalid {
            None
        } else {
            rec.remote
        })
    }

    pub fn state(&self, handle: SocketHandle) -> Result<SocketState> {
        Ok(self.table.get(handle)?.state)
    }

    /// Pump once, then test for `Connected`.
    pub fn connected(&mut self, handle: SocketHandle) -> Result<bool> {
        self.poll();
        Ok(self.state(handle)? == SocketState::Connected)
    }

    /// Pump once, then test for `Listening`.
    pub fn listening(&mut self, handle: SocketHandle) -> Result<bool> {
        self.poll();
        Ok(self.state(handle)? == SocketState::Listening)
    }

    /// Pump once, then test for `Bound`.
    pub fn bound(&mut self, handle: SocketHandle) -> Result<bool> {
        self.poll();
        Ok(self.state(handle)? == SocketState::Bound)
    }

    /// A send was accepted and its completion has not been reported yet.
    pub fn send_in_flight(&self, handle: SocketHandle) -> Result<bool> {
        Ok(self.table.get(handle)?.send_in_flight)
    }

    /// Pass a socket option through to the transport.
    pub fn set_option(&mut self, handle: SocketHandle, level: u8, name: u8, value: &[u8]) -> Result<()> {
        let state = self.table.get(handle)?.state;
        if state == SocketState::Invalid {
            return Err(SocketError::invalid_state("set_option", state));
        }
        self.transport.set_option(handle.raw(), level, name, value)?;
        Ok(())
    }
}

fn failure_event(op: &PendingOp) -> SocketEvent {
    match op.kind {
        OpKind::Bind => SocketEvent::BindFailed(op.handle),
        OpKind::Listen => SocketEvent::ListenFailed(op.handle),
        OpKind::Connect => SocketEvent::ConnectFailed(op.handle),
    }
}
