//! Two threads talking over a duplex shared-memory channel.
//!
//! Run with: `cargo run --example duplex`

use shmring::{Channel, Geometry, Side, Spsc};
use std::thread;

fn main() -> Result<(), shmring::RingError> {
    let geometry = Geometry::new(32, 16);
    let name = format!("/shmring_duplex_demo_{}", std::process::id());

    let peer_name = name.clone();
    let peer = thread::spawn(move || -> Result<(), shmring::RingError> {
        let mut side_b: Channel<Spsc> = Channel::with_geometry(Side::B, &peer_name, geometry)?;
        side_b.open()?;

        let mut buf = [0u8; 32];
        side_b.receive(&mut buf)?;
        println!("B received: {}", String::from_utf8_lossy(&buf));

        let mut reply = [0u8; 32];
        reply[..4].copy_from_slice(b"pong");
        side_b.send(&reply)?;
        side_b.close();
        Ok(())
    });

    let mut side_a: Channel<Spsc> = Channel::with_geometry(Side::A, &name, geometry)?;
    side_a.open()?;

    let mut message = [0u8; 32];
    message[..4].copy_from_slice(b"ping");
    side_a.send(&message)?;

    let mut buf = [0u8; 32];
    side_a.receive(&mut buf)?;
    println!("A received: {}", String::from_utf8_lossy(&buf));

    peer.join().expect("peer thread panicked")?;
    side_a.close();
    Channel::<Spsc>::unlink(&name)?;
    Ok(())
}
