//! Non-blocking wait state for bind, listen and connect.
//!
//! `begin_*` issues the primitive and returns a [`PendingOp`]. Each
//! [`SocketStack::poll_op`](crate::SocketStack::poll_op) call pumps the
//! transport once and reports whether the socket reached its target state,
//! fell back to `Idle`, or ran out of budget. The blocking facade calls are
//! loops over the same poll.

use hifnet_core::handle::SocketHandle;
use hifnet_core::state::SocketState;
use hifnet_core::timeout::Deadline;
use std::fmt;

/// Which request is being waited on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Bind,
    Listen,
    Connect,
}

impl OpKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bind => "bind",
            Self::Listen => "listen",
            Self::Connect => "connect",
        }
    }

    /// State the socket sits in while the result is outstanding.
    #[must_use]
    pub const fn waiting_state(&self) -> SocketState {
        match self {
            Self::Bind => SocketState::Binding,
            Self::Listen => SocketState::Listen,
            Self::Connect => SocketState::Connecting,
        }
    }

    /// State that means success.
    #[must_use]
    pub const fn target_state(&self) -> SocketState {
        match self {
            Self::Bind => SocketState::Bound,
            Self::Listen => SocketState::Listening,
            Self::Connect => SocketState::Connected,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An issued request whose result has not been observed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a pending operation does nothing unless polled"]
pub struct PendingOp {
    pub(crate) handle: SocketHandle,
    pub(crate) kind: OpKind,
    pub(crate) deadline: Deadline,
}

impl PendingOp {
    pub(crate) const fn new(handle: SocketHandle, kind: OpKind, deadline: Deadline) -> Self {
        Self {
            handle,
            kind,
            deadline,
        }
    }

    #[inline]
    pub const fn handle(&self) -> SocketHandle {
        self.handle
    }

    #[inline]
    pub const fn kind(&self) -> OpKind {
        self.kind
    }

    #[inline]
    pub const fn deadline(&self) -> Deadline {
        self.deadline
    }
}
