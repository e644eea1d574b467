//! Integration tests for the data path: receive buffering, backpressure,
//! datagram framing, peer shutdown and the send retry loop.

use hifnet::sim::{Request, SimTransport};
use hifnet::{SocketHandle, SocketStack};
use hifnet_core::config::BufferSizing;
use hifnet_core::error::{SocketError, TransportError};
use hifnet_core::monitor::SocketEvent;
use hifnet_core::options::{BufferAllocation, StackOptions};
use hifnet_core::socket_type::{Domain, SocketType};
use hifnet_core::state::SocketState;
use hifnet_core::timeout::ManualClock;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

type Stack = SocketStack<SimTransport, ManualClock>;

fn peer() -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::new(10, 1, 2, 3), 4321)
}

fn stack_with(options: StackOptions) -> Stack {
    hifnet::dev_tracing::init_tracing();
    let sim = SimTransport::new().with_auto_ack(true);
    let clock = sim.clock();
    SocketStack::with_clock(sim, options, clock).unwrap()
}

/// 16-byte MTU, 32-byte stream buffer, 40-byte datagram buffer.
fn small() -> StackOptions {
    StackOptions::new().with_buffers(BufferSizing::custom(16, 32, 40))
}

fn connected(stack: &mut Stack) -> SocketHandle {
    let h = stack.create(Domain::Inet, SocketType::Stream, 0).unwrap();
    stack.connect(h, peer()).unwrap();
    h
}

fn bound_datagram(stack: &mut Stack) -> SocketHandle {
    let h = stack.create(Domain::Inet, SocketType::Datagram, 0).unwrap();
    stack.bind(h, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 5000)).unwrap();
    h
}

fn read_all(stack: &mut Stack, h: SocketHandle, chunk: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; chunk];
    loop {
        let n = stack.read(h, &mut buf).unwrap();
        if n == 0 {
            return out;
        }
        out.extend_from_slice(&buf[..n]);
    }
}

#[test]
fn test_available_matches_first_indication() {
    let mut stack = stack_with(StackOptions::default());
    let h = connected(&mut stack);
    stack.transport_mut().deliver(h.raw(), vec![0xAB; 100], peer());
    assert_eq!(stack.available(h).unwrap(), 100);

    let udp = bound_datagram(&mut stack);
    stack.transport_mut().deliver(udp.raw(), vec![1u8; 37], peer());
    assert_eq!(stack.available(udp).unwrap(), 37);
}

#[test]
fn test_overflow_asserts_full_and_keeps_bytes_intact() {
    let mut stack = stack_with(small());
    let monitor = stack.monitor();
    let h = connected(&mut stack);

    let expected: Vec<u8> = (0u8..80).collect();
    for chunk in expected.chunks(16) {
        stack.transport_mut().deliver(h.raw(), chunk.to_vec(), peer());
    }
    assert_eq!(stack.available(h).unwrap(), 80);

    let window = stack.table().get(h).unwrap().window();
    assert!(window.is_full());
    assert!(window.buffer().fill() <= window.buffer().capacity());
    assert_eq!(window.buffer().fill(), 32);
    // Backpressure: no receive request outstanding while full.
    assert_eq!(stack.transport().armed(h.raw()), None);
    assert!(monitor.try_iter().any(|e| e == SocketEvent::BufferFull(h)));

    assert_eq!(read_all(&mut stack, h, 10), expected);
    assert!(!stack.table().get(h).unwrap().window().is_full());
    assert_eq!(stack.transport().armed(h.raw()), Some(16));
}

#[test]
fn test_read_returns_partial_data() {
    let mut stack = stack_with(StackOptions::default());
    let h = connected(&mut stack);
    stack.transport_mut().deliver(h.raw(), &b"hello"[..], peer());
    stack.poll();

    let mut buf = [0u8; 64];
    assert_eq!(stack.peek(h).unwrap(), Some(b'h'));
    assert_eq!(stack.read(h, &mut buf).unwrap(), 5);
    assert_eq!(&buf[..5], b"hello");
    assert_eq!(stack.read(h, &mut buf).unwrap(), 0);
    assert_eq!(stack.peek(h).unwrap(), None);
}

#[test]
fn test_stream_shutdown_on_zero_size_receive() {
    let mut stack = stack_with(StackOptions::default());
    let monitor = stack.monitor();
    let h = connected(&mut stack);
    stack.transport_mut().deliver(h.raw(), &b"tail"[..], peer());
    stack.transport_mut().hang_up(h.raw(), peer());

    assert_eq!(stack.available(h).unwrap(), 0);
    assert_eq!(stack.state(h).unwrap(), SocketState::Invalid);
    assert_eq!(stack.read(h, &mut [0u8; 8]), Err(SocketError::NotConnected));
    assert_eq!(stack.send(h, b"x"), Err(SocketError::NotConnected));
    assert!(stack
        .transport()
        .requests()
        .contains(&Request::Close(h.raw())));
    assert!(monitor.try_iter().any(|e| e == SocketEvent::Disconnected(h)));

    // Closing after the peer did is a no-op.
    stack.transport_mut().clear_requests();
    stack.close(h);
    assert!(stack.transport().requests().is_empty());
}

#[test]
fn test_zero_size_datagram_is_readable() {
    let mut stack = stack_with(StackOptions::default());
    let h = bound_datagram(&mut stack);
    stack.transport_mut().deliver(h.raw(), Vec::new(), peer());
    stack.poll();

    assert_eq!(stack.state(h).unwrap(), SocketState::Bound);
    let header = stack.next_datagram(h).unwrap().unwrap();
    assert_eq!(header.len, 0);
    assert_eq!(header.source, peer());
    assert_eq!(stack.remote_address(h).unwrap(), Some(peer()));
    assert_eq!(stack.next_datagram(h).unwrap(), None);
}

#[test]
fn test_datagram_reads_stop_at_frame_boundary() {
    let mut stack = stack_with(StackOptions::default());
    let h = bound_datagram(&mut stack);
    let a = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 1111);
    let b = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 2222);
    stack.transport_mut().deliver(h.raw(), &b"one"[..], a);
    stack.transport_mut().deliver(h.raw(), &b"three"[..], b);
    assert_eq!(stack.available(h).unwrap(), 8);

    let mut buf = [0u8; 64];
    assert_eq!(stack.read(h, &mut buf).unwrap(), 3);
    assert_eq!(&buf[..3], b"one");
    assert_eq!(stack.remote_address(h).unwrap(), Some(a));

    assert_eq!(stack.read(h, &mut buf).unwrap(), 5);
    assert_eq!(&buf[..5], b"three");
    assert_eq!(stack.remote_address(h).unwrap(), Some(b));
    assert_eq!(stack.read(h, &mut buf).unwrap(), 0);
}

#[test]
fn test_next_datagram_skips_unread_tail() {
    let mut stack = stack_with(StackOptions::default());
    let h = bound_datagram(&mut stack);
    stack.transport_mut().deliver(h.raw(), &b"abcdef"[..], peer());
    stack.transport_mut().deliver(h.raw(), &b"xy"[..], peer());
    stack.poll();

    let mut two = [0u8; 2];
    assert_eq!(stack.read(h, &mut two).unwrap(), 2);
    assert_eq!(&two, b"ab");

    let header = stack.next_datagram(h).unwrap().unwrap();
    assert_eq!(header.len, 2);
    assert_eq!(stack.read(h, &mut [0u8; 16]).unwrap(), 2);
}

#[test]
fn test_oversize_datagram_is_discarded() {
    let mut stack = stack_with(small());
    let h = bound_datagram(&mut stack);
    // 40-byte buffer cannot hold 33 bytes plus the 8-byte header.
    stack.transport_mut().deliver(h.raw(), vec![0u8; 33], peer());
    assert_eq!(stack.available(h).unwrap(), 0);
    assert!(stack
        .transport()
        .requests()
        .contains(&Request::Discard(h.raw())));
    assert_eq!(stack.transport().armed(h.raw()), Some(16));
}

#[test]
fn test_close_flushes_pending_delivery() {
    let mut stack = stack_with(small());
    let h = connected(&mut stack);
    stack.transport_mut().deliver(h.raw(), vec![1u8; 40], peer());
    stack.poll();
    assert_eq!(stack.table().get(h).unwrap().window().pending_len(), 8);

    stack.transport_mut().clear_requests();
    stack.close(h);
    assert_eq!(
        stack.transport().requests(),
        [Request::Discard(h.raw()), Request::Close(h.raw())]
    );
    assert_eq!(stack.table().pool().in_use(), 0);
}

#[test]
fn test_send_retries_while_transmit_full() {
    let mut stack = stack_with(StackOptions::default());
    let h = connected(&mut stack);
    let pumps = stack.transport().pumps();
    stack.transport_mut().fill_transmit(3);

    assert_eq!(stack.send(h, b"payload").unwrap(), 7);
    assert_eq!(stack.transport().pumps() - pumps, 3);
    assert_eq!(stack.transport().sent(h.raw()), b"payload");
    assert!(stack.send_in_flight(h).unwrap());

    stack.poll();
    assert!(!stack.send_in_flight(h).unwrap());
}

#[test]
fn test_send_aborts_when_receive_blocked() {
    let mut stack = stack_with(StackOptions::default());
    let h = connected(&mut stack);
    stack.transport_mut().fill_transmit(1);
    stack.transport_mut().set_receive_blocked(true);
    assert_eq!(
        stack.send(h, b"x"),
        Err(SocketError::Transport(TransportError::Busy))
    );
}

#[test]
fn test_send_reports_other_errors() {
    let mut stack = stack_with(StackOptions::default());
    let h = connected(&mut stack);
    stack
        .transport_mut()
        .fail_sends(Some(TransportError::ConnectionAborted));
    assert_eq!(
        stack.send(h, b"x"),
        Err(SocketError::Transport(TransportError::ConnectionAborted))
    );
}

#[test]
fn test_send_timeout_bounds_the_retry_loop() {
    let options = StackOptions::new().with_send_timeout(Some(Duration::from_millis(500)));
    let mut stack = stack_with(options);
    let h = connected(&mut stack);
    stack.transport_mut().fill_transmit(usize::MAX);

    match stack.send(h, b"stuck") {
        Err(SocketError::Timeout { op, after }) => {
            assert_eq!(op, "send");
            assert!(after >= Duration::from_millis(500));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_send_to_requires_bound_datagram() {
    let mut stack = stack_with(StackOptions::default());
    let h = bound_datagram(&mut stack);
    assert_eq!(stack.send_to(h, b"ping", peer()).unwrap(), 4);
    assert!(stack.transport().requests().contains(&Request::SendTo {
        socket: h.raw(),
        data: bytes::Bytes::from_static(b"ping"),
        addr: peer(),
    }));

    let stream = connected(&mut stack);
    assert_eq!(
        stack.send_to(stream, b"ping", peer()),
        Err(SocketError::WrongSocketType { op: "send_to" })
    );
}

#[test]
fn test_static_allocation_respects_pool_budget() {
    let options = small()
        .with_allocation(BufferAllocation::Static)
        .with_buffer_pool_limit(Some(32));
    let mut stack = stack_with(options);
    let a = stack.create(Domain::Inet, SocketType::Stream, 0).unwrap();
    assert_eq!(stack.table().pool().in_use(), 32);
    assert_eq!(
        stack.create(Domain::Inet, SocketType::Stream, 0),
        Err(SocketError::NoResource)
    );

    stack.close(a);
    assert!(stack.create(Domain::Inet, SocketType::Stream, 0).is_ok());
}

#[test]
fn test_lazy_allocation_exhaustion_keeps_data_pending() {
    let options = small().with_buffer_pool_limit(Some(40));
    let mut stack = stack_with(options);
    let a = connected(&mut stack);
    let b = connected(&mut stack);

    stack.transport_mut().deliver(a.raw(), &b"first"[..], peer());
    stack.transport_mut().deliver(b.raw(), &b"second"[..], peer());
    stack.poll();

    assert_eq!(stack.available(b).unwrap(), 6);
    assert_eq!(stack.read(b, &mut [0u8; 8]), Err(SocketError::NoResource));

    // Draining and closing `a` frees its buffer for `b`.
    assert_eq!(read_all(&mut stack, a, 8), b"first");
    stack.close(a);
    assert_eq!(read_all(&mut stack, b, 8), b"second");
}

#[test]
fn test_data_for_unclaimed_child_is_discarded() {
    let mut stack = stack_with(StackOptions::default());
    let listener = stack.create(Domain::Inet, SocketType::Stream, 0).unwrap();
    stack
        .bind(listener, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 80))
        .unwrap();
    stack.listen(listener, 1).unwrap();
    let child = stack.transport_mut().accept(listener.raw(), peer()).unwrap();
    stack.transport_mut().deliver(child, &b"early"[..], peer());
    stack.poll();

    assert!(stack
        .transport()
        .requests()
        .contains(&Request::Discard(child)));
}

#[test]
fn test_bound_stream_socket_never_receives() {
    let mut stack = stack_with(StackOptions::default());
    let h = stack.create(Domain::Inet, SocketType::Stream, 0).unwrap();
    stack.bind(h, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 80)).unwrap();

    assert_eq!(stack.read(h, &mut [0u8; 8]), Err(SocketError::NotConnected));
    assert_eq!(stack.peek(h), Err(SocketError::NotConnected));
    assert_eq!(stack.available(h).unwrap(), 0);
    assert_eq!(stack.transport().armed(h.raw()), None);
    assert!(!stack
        .transport()
        .requests()
        .iter()
        .any(|r| matches!(r, Request::Recv { .. })));

    // Data showing up anyway is flushed, not buffered.
    stack.transport_mut().deliver(h.raw(), &b"stray"[..], peer());
    stack.poll();
    assert!(stack.transport().requests().contains(&Request::Discard(h.raw())));
    assert_eq!(stack.table().get(h).unwrap().window().available(), 0);
}
