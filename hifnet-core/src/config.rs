//! Buffer sizing and timing constants
//!
//! The transport hands over at most one MTU per receive request. Buffers are
//! sized in MTUs so that one full transfer can always land while another MTU
//! is still being drained by the application.

use std::time::Duration;

/// Maximum single transfer the transport delivers per receive request.
pub const DEFAULT_MTU: usize = 1400;

/// Frame header in front of every buffered datagram:
/// length (2), source port (2), source IPv4 address (4), all big-endian.
pub const DATAGRAM_HEADER_SIZE: usize = 8;

/// Default stream receive buffer (2 MTU)
pub const DEFAULT_STREAM_BUFFER_SIZE: usize = DEFAULT_MTU * 2;

/// Default datagram receive buffer (2 MTU)
pub const DEFAULT_DATAGRAM_BUFFER_SIZE: usize = DEFAULT_MTU * 2;

/// MTU for devices with very little RAM.
pub const LIMITED_RAM_MTU: usize = 16;

/// Stream receive buffer for devices with very little RAM.
pub const LIMITED_RAM_STREAM_BUFFER_SIZE: usize = 64;

/// Datagram receive buffer for devices with very little RAM.
pub const LIMITED_RAM_DATAGRAM_BUFFER_SIZE: usize = DATAGRAM_HEADER_SIZE + 64;

/// Wait budget for bind results.
pub const DEFAULT_BIND_TIMEOUT: Duration = Duration::from_secs(2);

/// Wait budget for listen results.
pub const DEFAULT_LISTEN_TIMEOUT: Duration = Duration::from_secs(2);

/// Wait budget for connect results.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Hardware stream socket count.
pub const DEFAULT_STREAM_SLOTS: u8 = 7;

/// Hardware datagram socket count.
pub const DEFAULT_DATAGRAM_SLOTS: u8 = 4;

/// Receive buffer sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSizing {
    /// Size of each receive request issued to the transport
    pub mtu: usize,
    /// Stream socket buffer capacity
    pub stream_capacity: usize,
    /// Datagram socket buffer capacity, frame headers included
    pub datagram_capacity: usize,
}

impl Default for BufferSizing {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            stream_capacity: DEFAULT_STREAM_BUFFER_SIZE,
            datagram_capacity: DEFAULT_DATAGRAM_BUFFER_SIZE,
        }
    }
}

impl BufferSizing {
    /// Sizing for RAM-starved targets.
    #[must_use]
    pub const fn limited_ram() -> Self {
        Self {
            mtu: LIMITED_RAM_MTU,
            stream_capacity: LIMITED_RAM_STREAM_BUFFER_SIZE,
            datagram_capacity: LIMITED_RAM_DATAGRAM_BUFFER_SIZE,
        }
    }

    /// Custom buffer sizing
    #[must_use]
    pub const fn custom(mtu: usize, stream_capacity: usize, datagram_capacity: usize) -> Self {
        Self {
            mtu,
            stream_capacity,
            datagram_capacity,
        }
    }
}
