//! Socket stack configuration options
//!
//! Everything that used to be a magic number in the wait loops and buffer
//! manager is a field here: wait budgets, buffer sizing, table layout and the
//! buffer allocation policy.

use std::time::Duration;

use crate::config::{
    BufferSizing, DATAGRAM_HEADER_SIZE, DEFAULT_BIND_TIMEOUT, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_DATAGRAM_SLOTS, DEFAULT_LISTEN_TIMEOUT, DEFAULT_STREAM_SLOTS,
};
use crate::handle::SocketLayout;

/// When receive buffers are acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferAllocation {
    /// Reserve the buffer when the socket is created
    Static,
    /// Reserve the buffer on the first receive indication, release on close
    #[default]
    Lazy,
}

/// Rejected option combinations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionsError {
    #[error("MTU must be non-zero")]
    ZeroMtu,

    #[error("stream buffer of {capacity} bytes cannot hold one {mtu}-byte transfer")]
    StreamBufferTooSmall { capacity: usize, mtu: usize },

    #[error("datagram buffer of {capacity} bytes cannot hold one framed {mtu}-byte transfer")]
    DatagramBufferTooSmall { capacity: usize, mtu: usize },

    #[error("datagram frame length field cannot describe a {0}-byte MTU")]
    MtuTooLarge(usize),

    #[error("socket table has no slots")]
    EmptyTable,
}

/// Socket stack options.
///
/// # Examples
///
/// ```
/// use hifnet_core::options::StackOptions;
/// use std::time::Duration;
///
/// let opts = StackOptions::default()
///     .with_connect_timeout(Duration::from_secs(5))
///     .with_send_timeout(Some(Duration::from_secs(1)));
/// assert!(opts.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct StackOptions {
    /// Wait budget for a bind result.
    /// - Default: 2 seconds
    pub bind_timeout: Duration,

    /// Wait budget for a listen result.
    /// - Default: 2 seconds
    pub listen_timeout: Duration,

    /// Wait budget for a connect result.
    /// - Default: 20 seconds
    pub connect_timeout: Duration,

    /// Budget for retrying a send while the transmit buffer is full.
    /// - `None` (default): retry until the transport accepts or fails
    /// - `Some(duration)`: give up with a timeout error
    pub send_timeout: Option<Duration>,

    /// Receive buffer and MTU sizes
    pub buffers: BufferSizing,

    /// Stream/datagram split of the socket table
    pub layout: SocketLayout,

    /// When receive buffers are reserved
    pub allocation: BufferAllocation,

    /// Upper bound on bytes held by all receive buffers together.
    /// - `None` (default): unbounded
    pub buffer_pool_limit: Option<usize>,
}

impl Default for StackOptions {
    fn default() -> Self {
        Self {
            bind_timeout: DEFAULT_BIND_TIMEOUT,
            listen_timeout: DEFAULT_LISTEN_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            send_timeout: None,
            buffers: BufferSizing::default(),
            layout: SocketLayout::new(DEFAULT_STREAM_SLOTS, DEFAULT_DATAGRAM_SLOTS),
            allocation: BufferAllocation::default(),
            buffer_pool_limit: None,
        }
    }
}

impl StackOptions {
    /// Create new options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for RAM-starved targets: tiny MTU and buffers.
    pub fn limited_ram() -> Self {
        Self::default().with_buffers(BufferSizing::limited_ram())
    }

    /// Set bind timeout.
    pub fn with_bind_timeout(mut self, timeout: Duration) -> Self {
        self.bind_timeout = timeout;
        self
    }

    /// Set listen timeout.
    pub fn with_listen_timeout(mut self, timeout: Duration) -> Self {
        self.listen_timeout = timeout;
        self
    }

    /// Set connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set send retry budget.
    pub fn with_send_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set buffer sizing.
    pub fn with_buffers(mut self, buffers: BufferSizing) -> Self {
        self.buffers = buffers;
        self
    }

    /// Set the number of stream and datagram slots.
    pub fn with_layout(mut self, stream_slots: u8, datagram_slots: u8) -> Self {
        self.layout = SocketLayout::new(stream_slots, datagram_slots);
        self
    }

    /// Set buffer allocation policy.
    pub fn with_allocation(mut self, allocation: BufferAllocation) -> Self {
        self.allocation = allocation;
        self
    }

    /// Cap the bytes reserved by receive buffers.
    pub fn with_buffer_pool_limit(mut self, limit: Option<usize>) -> Self {
        self.buffer_pool_limit = limit;
        self
    }

    /// Check that buffers can hold at least one transfer and the table is usable.
    pub fn validate(&self) -> Result<(), OptionsError> {
        let BufferSizing {
            mtu,
            stream_capacity,
            datagram_capacity,
        } = self.buffers;

        if mtu == 0 {
            return Err(OptionsError::ZeroMtu);
        }
        if mtu > usize::from(u16::MAX) {
            return Err(OptionsError::MtuTooLarge(mtu));
        }
        if stream_capacity < mtu {
            return Err(OptionsError::StreamBufferTooSmall {
                capacity: stream_capacity,
                mtu,
            });
        }
        if datagram_capacity < mtu + DATAGRAM_HEADER_SIZE {
            return Err(OptionsError::DatagramBufferTooSmall {
                capacity: datagram_capacity,
                mtu,
            });
        }
        if self.layout.total() == 0 {
            return Err(OptionsError::EmptyTable);
        }
        Ok(())
    }
}
