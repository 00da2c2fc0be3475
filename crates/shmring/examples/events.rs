//! A wait/notify event stream: the subscriber parks in the kernel instead
//! of spinning, which suits low-frequency streams.
//!
//! Run with: `cargo run --example events`

use shmring::{RingPublisher, RingSubscriber};
use std::thread;
use std::time::Duration;

fn main() -> Result<(), shmring::RingError> {
    let name = format!("/shmring_events_demo_{}", std::process::id());

    let mut publisher = RingPublisher::with_geometry(16, 32)?;
    publisher.open(&name)?;

    let sub_name = name.clone();
    let subscriber = thread::spawn(move || -> Result<(), shmring::RingError> {
        let mut subscriber = RingSubscriber::with_geometry(16, 32)?;
        subscriber.open(&sub_name)?;

        let mut event = [0u8; 16];
        for _ in 0..5 {
            subscriber.pop(&mut event)?;
            let seq = u64::from_le_bytes(event[..8].try_into().unwrap());
            println!("event {seq}");
        }
        subscriber.close();
        Ok(())
    });

    for seq in 0u64..5 {
        let mut event = [0u8; 16];
        event[..8].copy_from_slice(&seq.to_le_bytes());
        publisher.push(&event)?;
        thread::sleep(Duration::from_millis(200));
    }

    subscriber.join().expect("subscriber thread panicked")?;
    publisher.close();
    Ok(())
}
