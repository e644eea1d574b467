//! Socket handles and the slot layout of the socket table.
//!
//! The transport numbers its sockets with small integers ([`RawSocket`]).
//! Stream sockets and datagram sockets live in disjoint ranges of one table:
//! `0..stream_slots` for streams, followed by `datagram_slots` datagram slots.
//!
//! Callers hold a [`SocketHandle`], which pairs the raw slot with the
//! generation the slot had when it was acquired. Closing a slot bumps its
//! generation, so a handle kept across close/reopen no longer resolves.

use std::fmt;
use std::ops::Range;

use crate::socket_type::SocketType;

/// Slot number as the transport knows it (and as notifications carry it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RawSocket(pub u8);

impl RawSocket {
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RawSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generational handle to one socket table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketHandle {
    raw: RawSocket,
    generation: u32,
}

impl SocketHandle {
    #[must_use]
    pub const fn new(raw: RawSocket, generation: u32) -> Self {
        Self { raw, generation }
    }

    /// Slot number used when talking to the transport.
    #[inline]
    #[must_use]
    pub const fn raw(&self) -> RawSocket {
        self.raw
    }

    #[inline]
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.raw, self.generation)
    }
}

/// How the fixed table is split between stream and datagram sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketLayout {
    pub stream_slots: u8,
    pub datagram_slots: u8,
}

impl SocketLayout {
    #[must_use]
    pub const fn new(stream_slots: u8, datagram_slots: u8) -> Self {
        Self {
            stream_slots,
            datagram_slots,
        }
    }

    /// Total number of slots in the table.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.stream_slots as usize + self.datagram_slots as usize
    }

    /// Raw slot numbers reserved for `ty`.
    #[must_use]
    pub fn range(&self, ty: SocketType) -> Range<u8> {
        match ty {
            SocketType::Stream => 0..self.stream_slots,
            SocketType::Datagram => {
                self.stream_slots..self.stream_slots.saturating_add(self.datagram_slots)
            }
        }
    }

    /// Socket type owning `raw`, or `None` if it is outside the table.
    #[must_use]
    pub fn type_of(&self, raw: RawSocket) -> Option<SocketType> {
        if raw.0 < self.stream_slots {
            Some(SocketType::Stream)
        } else if raw.index() < self.total() {
            Some(SocketType::Datagram)
        } else {
            None
        }
    }
}
