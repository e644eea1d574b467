//! hifnet Core
//!
//! This crate contains the transport-agnostic building blocks of the socket layer:
//! - Socket handles and the stream/datagram slot layout (`handle`)
//! - Socket kinds and lifecycle states (`socket_type`, `state`)
//! - Bounded receive buffer with datagram framing (`buffer`)
//! - Receive flow control and pending deliveries (`backpressure`)
//! - Sizing constants and stack options (`config`, `options`)
//! - Clocks and wait deadlines (`timeout`)
//! - Lifecycle events (`monitor`)
//! - Error types (`error`)

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
pub mod backpressure;
pub mod buffer;
pub mod config;
pub mod error;
pub mod handle;
pub mod monitor;
pub mod options;
pub mod socket_type;
pub mod state;
pub mod timeout;

// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::backpressure::{Delivery, Ingest, ReceiveWindow};
    pub use crate::buffer::{BufferPool, DatagramHeader, RecvBuffer};
    pub use crate::config::BufferSizing;
    pub use crate::error::{Result, SocketError, TransportError};
    pub use crate::handle::{RawSocket, SocketHandle, SocketLayout};
    pub use crate::monitor::{SocketEvent, SocketMonitor};
    pub use crate::options::{BufferAllocation, StackOptions};
    pub use crate::socket_type::{Domain, SocketType};
    pub use crate::state::SocketState;
    pub use crate::timeout::{Clock, Deadline, ManualClock, SystemClock};
}
