//! # hifnet
//!
//! BSD-style sockets over an interrupt-driven network interface that allows
//! one outstanding transfer per socket and reports every result through a
//! cooperative event pump.
//!
//! ## Architecture
//!
//! - **`hifnet-core`**: handles, states, bounded receive buffers, backpressure
//! - **`transport`**: the seam to the hardware (primitives + event pump)
//! - **`dispatch`**: pure state mutation on notifications, deferred actions
//! - **`SocketStack`**: the facade (this crate)
//!
//! ## Quick Start
//!
//! ```rust
//! use hifnet::sim::SimTransport;
//! use hifnet::SocketStack;
//! use hifnet_core::options::StackOptions;
//! use hifnet_core::socket_type::{Domain, SocketType};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let sim = SimTransport::new().with_auto_ack(true);
//! let clock = sim.clock();
//! let mut stack = SocketStack::with_clock(sim, StackOptions::default(), clock)?;
//!
//! let server = stack.create(Domain::Inet, SocketType::Stream, 0)?;
//! stack.bind(server, "0.0.0.0:8080".parse()?)?;
//! stack.listen(server, 4)?;
//!
//! let peer = "10.0.0.2:51000".parse()?;
//! stack.transport_mut().accept(server.raw(), peer);
//!
//! let client = stack.accepted_child(server)?.expect("one connection waiting");
//! assert_eq!(stack.remote_address(client)?, Some(peer));
//! # Ok(())
//! # }
//! ```
//!
//! ## Waiting
//!
//! `bind`, `listen` and `connect` block by pumping the transport until the
//! result arrives or the budget in [`StackOptions`](hifnet_core::options::StackOptions)
//! runs out (2 s, 2 s and 20 s by default). The `begin_*` variants return a
//! [`PendingOp`] to poll instead.

#![warn(clippy::all)]

pub mod dev_tracing;
mod dispatch;
pub mod event;
pub mod sim;
pub mod stack;
pub mod table;
pub mod transport;
pub mod wait;

pub use bytes::Bytes;
pub use event::{Action, Notification};
pub use hifnet_core::error::{Result, SocketError, TransportError};
pub use hifnet_core::handle::SocketHandle;
pub use stack::SocketStack;
pub use transport::{EventSink, Transport};
pub use wait::{OpKind, PendingOp};
