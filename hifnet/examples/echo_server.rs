//! Echo server over the simulated transport.
//!
//! Listens on port 7, takes two peers, echoes what each one sends and closes
//! when a peer hangs up. Run with `RUST_LOG=hifnet=debug` to watch dispatch.

use hifnet::sim::SimTransport;
use hifnet::{SocketHandle, SocketStack};
use hifnet_core::options::StackOptions;
use hifnet_core::socket_type::{Domain, SocketType};
use std::net::SocketAddrV4;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    hifnet::dev_tracing::init_tracing();

    let sim = SimTransport::new().with_auto_ack(true);
    let clock = sim.clock();
    let mut stack = SocketStack::with_clock(sim, StackOptions::default(), clock)?;
    let monitor = stack.monitor();

    println!("Echo Server Example");
    println!("===================\n");

    let server = stack.create(Domain::Inet, SocketType::Stream, 0)?;
    stack.bind(server, "0.0.0.0:7".parse()?)?;
    stack.listen(server, 2)?;

    let peers: [SocketAddrV4; 2] = ["10.0.0.2:51000".parse()?, "10.0.0.3:51001".parse()?];
    for peer in peers {
        stack.transport_mut().accept(server.raw(), peer);
    }

    let mut clients: Vec<SocketHandle> = Vec::new();
    while let Some(client) = stack.accepted_child(server)? {
        clients.push(client);
    }

    for ((&client, peer), greeting) in clients.iter().zip(peers).zip(["hello", "goodbye"]) {
        stack.transport_mut().deliver(client.raw(), greeting.as_bytes().to_vec(), peer);
        stack.poll();

        let mut buf = [0u8; 64];
        let n = stack.read(client, &mut buf)?;
        stack.send(client, &buf[..n])?;
        println!("{client}: echoed {:?}", String::from_utf8_lossy(&buf[..n]));

        stack.transport_mut().hang_up(client.raw(), peer);
        if !stack.connected(client)? {
            println!("{client}: peer {peer} hung up");
            stack.close(client);
        }
    }
    stack.close(server);

    println!("\nEvents:");
    for event in monitor.try_iter() {
        println!("  {event}");
    }
    Ok(())
}
