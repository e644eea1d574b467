//! Backpressure: `ReceiveWindow`
//!
//! Flow control between the transport's single outstanding receive request
//! and the application draining the buffer.
//!
//! Design principle:
//! - The transport delivers at most one transfer per armed request
//! - Not re-arming is enough to pause inbound data; no flow-control message exists
//! - Data that does not fit stays *pending* at the transport, never dropped
//!
//! Lifecycle:
//! ```text
//! arm() -> [transport delivers] -> ingest() -> Buffered  -> arm() again if room
//!                                           -> Stalled   -> full until read() drains
//! ```

use bytes::Bytes;
use std::collections::VecDeque;
use std::net::SocketAddrV4;
use tracing::{trace, warn};

use crate::buffer::{BufferPool, DatagramHeader, RecvBuffer};
use crate::config::DATAGRAM_HEADER_SIZE;
use crate::error::{Result, SocketError};
use crate::socket_type::SocketType;

/// One receive indication's worth of data, still resident at the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub data: Bytes,
    pub source: SocketAddrV4,
}

impl Delivery {
    pub fn new(data: impl Into<Bytes>, source: SocketAddrV4) -> Self {
        Self {
            data: data.into(),
            source,
        }
    }
}

/// Outcome of handing a delivery to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// Copied into the buffer
    Buffered,
    /// Would exceed capacity (or no buffer memory); kept pending, full asserted
    Stalled,
    /// Datagram larger than the whole buffer; it can never fit and was discarded
    Dropped,
}

/// Per-socket receive window: bounded buffer plus pending deliveries.
#[derive(Debug)]
pub struct ReceiveWindow {
    buffer: RecvBuffer,
    pending: VecDeque<Delivery>,
    mtu: usize,
    full: bool,
    armed: bool,
}

impl ReceiveWindow {
    #[must_use]
    pub fn new(ty: SocketType, capacity: usize, mtu: usize) -> Self {
        Self {
            buffer: RecvBuffer::new(ty, capacity),
            pending: VecDeque::new(),
            mtu,
            full: false,
            armed: false,
        }
    }

    #[inline]
    #[must_use]
    pub const fn buffer(&self) -> &RecvBuffer {
        &self.buffer
    }

    /// Full condition asserted: the transport is not being asked for more.
    #[inline]
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.full
    }

    /// A receive request is outstanding at the transport.
    #[inline]
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    /// Payload bytes still held by the transport.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.iter().map(|d| d.data.len()).sum()
    }

    /// Buffered plus pending payload bytes.
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.payload_len() + self.pending_len()
    }

    /// Bytes of free space needed before another transfer is requested.
    #[inline]
    fn low_water_room(&self) -> usize {
        self.buffer.framed_len(self.mtu)
    }

    /// Request size for the next receive, if another request may be issued.
    ///
    /// Asserts the full condition when the buffer cannot take one more MTU or
    /// data is still pending; clears it when a request is granted.
    pub fn arm(&mut self) -> Option<usize> {
        if self.armed {
            return None;
        }
        if self.pending.is_empty() && self.buffer.free() >= self.low_water_room() {
            self.armed = true;
            self.full = false;
            Some(self.mtu)
        } else {
            self.full = true;
            None
        }
    }

    /// Forget an outstanding request the transport refused to take.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Accept a receive indication.
    ///
    /// The outstanding request is consumed by the indication, so the window is
    /// disarmed whatever the outcome; the caller decides about re-arming via
    /// [`ReceiveWindow::arm`].
    pub fn ingest(&mut self, delivery: Delivery, pool: &mut BufferPool) -> Ingest {
        self.armed = false;

        let len = delivery.data.len();
        if self.buffer.socket_type().is_framed()
            && (len + DATAGRAM_HEADER_SIZE > self.buffer.capacity()
                || u16::try_from(len).is_err())
        {
            warn!(len, capacity = self.buffer.capacity(), "dropping oversize datagram");
            return Ingest::Dropped;
        }

        self.pending.push_back(delivery);
        // Out of buffer memory leaves the delivery pending, same as a full buffer.
        let _ = self.refill(pool);

        if self.pending.is_empty() {
            Ingest::Buffered
        } else {
            self.full = true;
            Ingest::Stalled
        }
    }

    /// Move pending deliveries into the buffer while they fit.
    ///
    /// Stream deliveries are split at the free space; datagrams move whole.
    /// Returns the number of payload bytes moved, or `NoResource` if the
    /// buffer could not be reserved.
    pub fn refill(&mut self, pool: &mut BufferPool) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        if !pool.try_reserve(&mut self.buffer) {
            warn!(capacity = self.buffer.capacity(), "receive buffer pool exhausted");
            self.full = true;
            return Err(SocketError::NoResource);
        }

        let mut moved = 0;
        while let Some(front) = self.pending.front_mut() {
            match self.buffer.socket_type() {
                SocketType::Stream => {
                    let take = front.data.len().min(self.buffer.free());
                    if take == 0 {
                        break;
                    }
                    let chunk = front.data.split_to(take);
                    self.buffer.push_stream(&chunk);
                    moved += take;
                    if !front.data.is_empty() {
                        break;
                    }
                }
                SocketType::Datagram => {
                    if !self.buffer.push_datagram(front.source, &front.data) {
                        break;
                    }
                    moved += front.data.len();
                }
            }
            self.pending.pop_front();
        }

        if moved > 0 {
            trace!(moved, fill = self.buffer.fill(), "refilled receive buffer");
        }
        Ok(moved)
    }

    /// Copy readable payload into `dst`.
    ///
    /// Refills from pending deliveries when the buffer runs dry, so a stream
    /// read returns everything resident or immediately transferable up to
    /// `dst.len()`. A datagram read returns at most one frame's payload.
    pub fn read(&mut self, dst: &mut [u8], pool: &mut BufferPool) -> Result<usize> {
        if self.buffer.socket_type().is_framed() {
            if self.buffer.is_empty() {
                self.refill(pool)?;
            }
            return Ok(self.buffer.read(dst));
        }

        let mut total = 0;
        while total < dst.len() {
            if self.buffer.is_empty() {
                if let Err(err) = self.refill(pool) {
                    if total == 0 {
                        return Err(err);
                    }
                    break;
                }
            }
            let n = self.buffer.read(&mut dst[total..]);
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    /// Next readable byte, refilling from pending data if the buffer is empty.
    pub fn peek(&mut self, pool: &mut BufferPool) -> Result<Option<u8>> {
        if self.buffer.is_empty() {
            self.refill(pool)?;
        }
        Ok(self.buffer.peek())
    }

    /// Open the next datagram, skipping the unread tail of the current one.
    pub fn next_datagram(&mut self, pool: &mut BufferPool) -> Result<Option<DatagramHeader>> {
        if !self.buffer.has_unopened_frame() {
            // Skipping the current tail may empty the buffer; pull the next frame in.
            self.buffer.open_next_frame();
            self.refill(pool)?;
        }
        Ok(self.buffer.open_next_frame())
    }

    /// Drop everything and release the buffer.
    ///
    /// Returns `true` if undrained deliveries were still held by the transport.
    pub fn reset(&mut self, pool: &mut BufferPool) -> bool {
        let had_pending = !self.pending.is_empty();
        self.pending.clear();
        pool.release(&mut self.buffer);
        self.full = false;
        self.armed = false;
        had_pending
    }

    /// Reserve the buffer up front (static allocation).
    pub fn reserve(&mut self, pool: &mut BufferPool) -> Result<()> {
        if pool.try_reserve(&mut self.buffer) {
            Ok(())
        } else {
            Err(SocketError::NoResource)
        }
    }
}
