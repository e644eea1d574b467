//! Per-socket records in a fixed, generational table.
//!
//! Slots are indexed by [`RawSocket`]. Each allocation bumps the slot's
//! generation, so a [`SocketHandle`] taken before a close/reallocate cycle no
//! longer resolves. Closing does *not* bump the generation: the old handle
//! keeps resolving to an `Invalid` record until the slot is reused, which is
//! what makes a second `close` a no-op and lets reads report "not connected"
//! after a peer shutdown.

use hifnet_core::backpressure::ReceiveWindow;
use hifnet_core::buffer::BufferPool;
use hifnet_core::config::BufferSizing;
use hifnet_core::error::{Result, SocketError, TransportError};
use hifnet_core::handle::{RawSocket, SocketHandle, SocketLayout};
use hifnet_core::options::StackOptions;
use hifnet_core::socket_type::SocketType;
use hifnet_core::state::SocketState;
use smallvec::SmallVec;
use std::net::SocketAddrV4;

/// Accepted children a listener has not handed out yet, oldest first.
pub type AcceptQueue = SmallVec<[RawSocket; 4]>;

/// Everything the layer knows about one socket.
#[derive(Debug)]
pub struct SocketRecord {
    pub(crate) ty: SocketType,
    pub(crate) state: SocketState,
    pub(crate) generation: u32,
    /// Listening socket this stream was accepted on
    pub(crate) parent: Option<RawSocket>,
    /// Connect target, accepted peer, or source of the opened datagram
    pub(crate) remote: Option<SocketAddrV4>,
    pub(crate) window: ReceiveWindow,
    pub(crate) send_in_flight: bool,
    pub(crate) accept_queue: AcceptQueue,
    /// Failure reported by the last bind/listen/connect result
    pub(crate) last_error: Option<TransportError>,
    /// A connect failed or timed out; the hardware socket may still answer it
    pub(crate) connect_failed: bool,
}

impl SocketRecord {
    fn new(ty: SocketType, sizing: &BufferSizing) -> Self {
        let capacity = match ty {
            SocketType::Stream => sizing.stream_capacity,
            SocketType::Datagram => sizing.datagram_capacity,
        };
        Self {
            ty,
            state: SocketState::Invalid,
            generation: 0,
            parent: None,
            remote: None,
            window: ReceiveWindow::new(ty, capacity, sizing.mtu),
            send_in_flight: false,
            accept_queue: AcceptQueue::new(),
            last_error: None,
            connect_failed: false,
        }
    }

    #[inline]
    #[must_use]
    pub const fn socket_type(&self) -> SocketType {
        self.ty
    }

    #[inline]
    #[must_use]
    pub const fn state(&self) -> SocketState {
        self.state
    }

    #[inline]
    #[must_use]
    pub const fn parent(&self) -> Option<RawSocket> {
        self.parent
    }

    #[inline]
    #[must_use]
    pub const fn remote(&self) -> Option<SocketAddrV4> {
        self.remote
    }

    #[inline]
    #[must_use]
    pub const fn window(&self) -> &ReceiveWindow {
        &self.window
    }

    /// Give up on a connect: the socket keeps no peer and takes no new connect.
    pub(crate) fn abandon_connect(&mut self) {
        self.state = SocketState::Idle;
        self.remote = None;
        self.connect_failed = true;
    }

    /// Check the socket is in `expected`, or fail naming `op`.
    pub(crate) fn expect_state(&self, op: &'static str, expected: SocketState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SocketError::invalid_state(op, self.state))
        }
    }
}

/// The socket table plus the receive buffer budget shared by its records.
#[derive(Debug)]
pub struct SocketTable {
    slots: Vec<SocketRecord>,
    layout: SocketLayout,
    pool: BufferPool,
}

impl SocketTable {
    #[must_use]
    pub fn new(options: &StackOptions) -> Self {
        let layout = options.layout;
        let slots = (0..layout.total())
            .map(|i| {
                // Index is within `layout.total()`, which is built from two u8 counts.
                let raw = RawSocket(u8::try_from(i).unwrap_or(u8::MAX));
                let ty = layout.type_of(raw).unwrap_or(SocketType::Datagram);
                SocketRecord::new(ty, &options.buffers)
            })
            .collect();
        Self {
            slots,
            layout,
            pool: BufferPool::new(options.buffer_pool_limit),
        }
    }

    #[inline]
    #[must_use]
    pub const fn layout(&self) -> SocketLayout {
        self.layout
    }

    #[inline]
    #[must_use]
    pub const fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Claim the lowest free slot in the range for `ty`.
    pub fn allocate(&mut self, ty: SocketType) -> Option<SocketHandle> {
        let raw = self
            .layout
            .range(ty)
            .map(RawSocket)
            .find(|raw| self.slots[raw.index()].state == SocketState::Invalid)?;
        Some(self.occupy(raw, SocketState::Idle))
    }

    /// Claim a specific free slot (hardware-chosen accept child).
    pub(crate) fn adopt(
        &mut self,
        raw: RawSocket,
        parent: RawSocket,
        remote: SocketAddrV4,
    ) -> Option<SocketHandle> {
        let slot = self.slots.get(raw.index())?;
        if slot.ty != SocketType::Stream || slot.state != SocketState::Invalid {
            return None;
        }
        let handle = self.occupy(raw, SocketState::Accepted);
        let rec = &mut self.slots[raw.index()];
        rec.parent = Some(parent);
        rec.remote = Some(remote);
        Some(handle)
    }

    fn occupy(&mut self, raw: RawSocket, state: SocketState) -> SocketHandle {
        let rec = &mut self.slots[raw.index()];
        rec.generation = rec.generation.wrapping_add(1);
        rec.state = state;
        rec.parent = None;
        rec.remote = None;
        rec.send_in_flight = false;
        rec.accept_queue.clear();
        rec.last_error = None;
        rec.connect_failed = false;
        SocketHandle::new(raw, rec.generation)
    }

    /// Return a slot to `Invalid`, dropping its buffer and links.
    ///
    /// Returns `true` if a delivery was still undrained at the transport.
    pub(crate) fn release(&mut self, raw: RawSocket) -> bool {
        let Some(rec) = self.slots.get_mut(raw.index()) else {
            return false;
        };
        let had_pending = rec.window.reset(&mut self.pool);
        rec.state = SocketState::Invalid;
        rec.parent = None;
        rec.send_in_flight = false;
        rec.accept_queue.clear();
        had_pending
    }

    /// Current handle of `raw`.
    #[must_use]
    pub fn handle_of(&self, raw: RawSocket) -> Option<SocketHandle> {
        self.slots
            .get(raw.index())
            .map(|rec| SocketHandle::new(raw, rec.generation))
    }

    /// Resolve a caller's handle.
    pub fn get(&self, handle: SocketHandle) -> Result<&SocketRecord> {
        self.slots
            .get(handle.raw().index())
            .filter(|rec| rec.generation == handle.generation())
            .ok_or(SocketError::InvalidHandle(handle))
    }

    pub(crate) fn get_mut(&mut self, handle: SocketHandle) -> Result<&mut SocketRecord> {
        self.slots
            .get_mut(handle.raw().index())
            .filter(|rec| rec.generation == handle.generation())
            .ok_or(SocketError::InvalidHandle(handle))
    }

    /// Resolve a caller's handle together with the buffer budget.
    pub(crate) fn get_with_pool(
        &mut self,
        handle: SocketHandle,
    ) -> Result<(&mut SocketRecord, &mut BufferPool)> {
        let rec = self
            .slots
            .get_mut(handle.raw().index())
            .filter(|rec| rec.generation == handle.generation())
            .ok_or(SocketError::InvalidHandle(handle))?;
        Ok((rec, &mut self.pool))
    }

    /// Record addressed by a notification.
    pub(crate) fn by_raw_mut(&mut self, raw: RawSocket) -> Option<(&mut SocketRecord, &mut BufferPool)> {
        let rec = self.slots.get_mut(raw.index())?;
        Some((rec, &mut self.pool))
    }

    pub(crate) fn by_raw(&self, raw: RawSocket) -> Option<&SocketRecord> {
        self.slots.get(raw.index())
    }

    /// Raw sockets whose parent is `listener`.
    pub(crate) fn children_of(&self, listener: RawSocket) -> impl Iterator<Item = RawSocket> + '_ {
        self.slots.iter().enumerate().filter_map(move |(i, rec)| {
            (rec.parent == Some(listener))
                .then(|| RawSocket(u8::try_from(i).unwrap_or(u8::MAX)))
        })
    }

    /// Slots currently in use.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.slots
            .iter()
            .filter(|rec| rec.state != SocketState::Invalid)
            .count()
    }
}
