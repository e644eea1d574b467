//! Socket domain and type as passed to `create`.

use std::fmt;

/// Socket type: byte stream (TCP) or datagram (UDP).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SocketType {
    /// Connection-oriented byte stream
    Stream = 1,

    /// Connectionless datagrams with source address framing
    Datagram = 2,
}

impl SocketType {
    /// Get the socket type as a string name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stream => "STREAM",
            Self::Datagram => "DGRAM",
        }
    }

    /// Datagram sockets prefix each buffered unit with a frame header.
    #[must_use]
    pub const fn is_framed(&self) -> bool {
        matches!(self, Self::Datagram)
    }
}

impl fmt::Display for SocketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Address family. The host interface only speaks IPv4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u16)]
pub enum Domain {
    #[default]
    Inet = 2,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_type_display() {
        assert_eq!(SocketType::Stream.to_string(), "STREAM");
        assert_eq!(SocketType::Datagram.to_string(), "DGRAM");
    }

    #[test]
    fn only_datagrams_are_framed() {
        assert!(SocketType::Datagram.is_framed());
        assert!(!SocketType::Stream.is_framed());
        assert_eq!(Domain::default() as u16, 2);
    }
}
