use bytes::{Buf, BufMut, BytesMut};
use std::net::{Ipv4Addr, SocketAddrV4};

use crate::config::DATAGRAM_HEADER_SIZE;
use crate::socket_type::SocketType;

/// Frame header stored in front of every buffered datagram.
///
/// Layout (big-endian): `len: u16`, `port: u16`, `addr: u32`. This is an
/// internal buffering convention and never goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    pub len: u16,
    pub source: SocketAddrV4,
}

impl DatagramHeader {
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.len);
        dst.put_u16(self.source.port());
        dst.put_u32(u32::from(*self.source.ip()));
    }

    /// Decode a header from the front of `src`.
    ///
    /// Returns `None` if fewer than [`DATAGRAM_HEADER_SIZE`] bytes are present.
    pub fn decode(src: &[u8]) -> Option<Self> {
        let mut hdr = src.get(..DATAGRAM_HEADER_SIZE)?;
        let len = hdr.get_u16();
        let port = hdr.get_u16();
        let ip = Ipv4Addr::from(hdr.get_u32());
        Some(Self {
            len,
            source: SocketAddrV4::new(ip, port),
        })
    }
}

/// Bounded receive store for one socket.
///
/// Stream sockets hold a plain byte run. Datagram sockets hold a sequence of
/// `[header][payload]` frames; a frame is *opened* by consuming its header,
/// after which its payload is read without ever crossing into the next frame.
///
/// The byte store is reserved on demand and released on close; its logical
/// capacity never changes.
#[derive(Debug)]
pub struct RecvBuffer {
    ty: SocketType,
    capacity: usize,
    data: Option<BytesMut>,
    /// Payload bytes buffered, frame headers excluded
    payload: usize,
    /// Unread payload bytes of the currently opened datagram
    open_frame: Option<usize>,
}

impl RecvBuffer {
    #[must_use]
    pub const fn new(ty: SocketType, capacity: usize) -> Self {
        Self {
            ty,
            capacity,
            data: None,
            payload: 0,
            open_frame: None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn socket_type(&self) -> SocketType {
        self.ty
    }

    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        self.data.is_some()
    }

    /// Bytes currently occupied, frame headers included.
    #[inline]
    #[must_use]
    pub fn fill(&self) -> usize {
        self.data.as_ref().map_or(0, BytesMut::len)
    }

    #[inline]
    #[must_use]
    pub fn free(&self) -> usize {
        self.capacity - self.fill()
    }

    /// Buffered payload bytes (what a reader can still get).
    #[inline]
    #[must_use]
    pub const fn payload_len(&self) -> usize {
        self.payload
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fill() == 0
    }

    /// Bytes a `len`-byte delivery occupies once buffered.
    #[inline]
    #[must_use]
    pub const fn framed_len(&self, len: usize) -> usize {
        if self.ty.is_framed() {
            len + DATAGRAM_HEADER_SIZE
        } else {
            len
        }
    }

    /// Whether a `len`-byte delivery fits without exceeding capacity.
    #[inline]
    #[must_use]
    pub fn fits(&self, len: usize) -> bool {
        self.fill() + self.framed_len(len) <= self.capacity
    }

    /// Unread payload of the opened datagram, if one is open.
    #[inline]
    #[must_use]
    pub const fn open_frame_remaining(&self) -> Option<usize> {
        self.open_frame
    }

    /// Whether a datagram frame is buffered but not yet opened.
    #[must_use]
    pub fn has_unopened_frame(&self) -> bool {
        self.ty.is_framed() && self.fill() > self.open_frame.unwrap_or(0)
    }

    pub(crate) fn reserve(&mut self) {
        if self.data.is_none() {
            self.data = Some(BytesMut::with_capacity(self.capacity));
        }
    }

    /// Drop all content and give the byte store back.
    pub(crate) fn release(&mut self) {
        self.data = None;
        self.payload = 0;
        self.open_frame = None;
    }

    /// Append stream bytes.
    ///
    /// Returns `false`, leaving the buffer untouched, if the bytes do not fit
    /// or the store is not reserved.
    pub fn push_stream(&mut self, bytes: &[u8]) -> bool {
        debug_assert!(!self.ty.is_framed());
        if !self.fits(bytes.len()) {
            return false;
        }
        let Some(data) = self.data.as_mut() else {
            return false;
        };
        data.extend_from_slice(bytes);
        self.payload += bytes.len();
        true
    }

    /// Append one datagram with its frame header.
    ///
    /// Returns `false`, leaving the buffer untouched, if the framed datagram
    /// does not fit, is too long for the length field, or the store is not
    /// reserved.
    pub fn push_datagram(&mut self, source: SocketAddrV4, payload: &[u8]) -> bool {
        debug_assert!(self.ty.is_framed());
        let Ok(len) = u16::try_from(payload.len()) else {
            return false;
        };
        if !self.fits(payload.len()) {
            return false;
        }
        let Some(data) = self.data.as_mut() else {
            return false;
        };
        DatagramHeader { len, source }.encode(data);
        data.extend_from_slice(payload);
        self.payload += payload.len();
        true
    }

    /// Open the next datagram frame, skipping the unread tail of the open one.
    pub fn open_next_frame(&mut self) -> Option<DatagramHeader> {
        if !self.ty.is_framed() {
            return None;
        }
        let data = self.data.as_mut()?;

        if let Some(rest) = self.open_frame.take() {
            data.advance(rest);
            self.payload -= rest;
        }

        let header = DatagramHeader::decode(data)?;
        data.advance(DATAGRAM_HEADER_SIZE);
        self.open_frame = Some(usize::from(header.len));
        self.compact();
        Some(header)
    }

    /// Look at the next readable payload byte without consuming it.
    ///
    /// For datagrams this is the next byte of the open frame or, if that is
    /// exhausted, the first byte of the next frame.
    #[must_use]
    pub fn peek(&self) -> Option<u8> {
        let data = self.data.as_ref()?;
        if !self.ty.is_framed() {
            return data.first().copied();
        }
        match self.open_frame {
            Some(rest) if rest > 0 => data.first().copied(),
            Some(rest) => self.peek_unopened(&data[rest..]),
            None => self.peek_unopened(data),
        }
    }

    fn peek_unopened(&self, frames: &[u8]) -> Option<u8> {
        let header = DatagramHeader::decode(frames)?;
        if header.len == 0 {
            return None;
        }
        frames.get(DATAGRAM_HEADER_SIZE).copied()
    }

    /// Copy buffered payload into `dst`, consuming it.
    ///
    /// Datagram reads are confined to one frame: if no frame is open (or the
    /// open one is exhausted) the next frame is opened first, and at most its
    /// remaining payload is returned.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        if self.ty.is_framed() {
            return self.read_frame(dst);
        }
        let Some(data) = self.data.as_mut() else {
            return 0;
        };
        let n = dst.len().min(data.len());
        dst[..n].copy_from_slice(&data[..n]);
        data.advance(n);
        self.payload -= n;
        self.compact();
        n
    }

    fn read_frame(&mut self, dst: &mut [u8]) -> usize {
        if self.open_frame.unwrap_or(0) == 0 && self.open_next_frame().is_none() {
            return 0;
        }
        let Some(data) = self.data.as_mut() else {
            return 0;
        };
        let rest = self.open_frame.unwrap_or(0);
        let n = dst.len().min(rest);
        dst[..n].copy_from_slice(&data[..n]);
        data.advance(n);
        self.payload -= n;
        self.open_frame = Some(rest - n);
        self.compact();
        n
    }

    /// Reset the store once everything has been consumed, so the next
    /// transfer lands at the start of the reserved capacity.
    fn compact(&mut self) {
        if let Some(data) = self.data.as_mut() {
            if data.is_empty() {
                data.clear();
                data.reserve(self.capacity);
            }
        }
    }
}

/// Accounting for the memory held by all receive buffers together.
#[derive(Debug, Clone, Default)]
pub struct BufferPool {
    limit: Option<usize>,
    in_use: usize,
}

impl BufferPool {
    #[must_use]
    pub const fn new(limit: Option<usize>) -> Self {
        Self { limit, in_use: 0 }
    }

    #[inline]
    #[must_use]
    pub const fn in_use(&self) -> usize {
        self.in_use
    }

    /// Reserve the byte store of `buf` if the budget allows.
    ///
    /// Returns `true` if the buffer is (now) reserved.
    pub fn try_reserve(&mut self, buf: &mut RecvBuffer) -> bool {
        if buf.is_reserved() {
            return true;
        }
        if let Some(limit) = self.limit {
            if self.in_use + buf.capacity() > limit {
                return false;
            }
        }
        buf.reserve();
        self.in_use += buf.capacity();
        true
    }

    /// Release the byte store of `buf` and return its bytes to the budget.
    pub fn release(&mut self, buf: &mut RecvBuffer) {
        if buf.is_reserved() {
            self.in_use -= buf.capacity();
        }
        buf.release();
    }
}
