//! shmring - Lock-Free Shared-Memory Rings for Inter-Process Communication
//!
//! Fixed-geometry ring buffers living in named POSIX shared memory, usable
//! from any number of cooperating processes:
//!
//! - [`Producer`]/[`Consumer`] endpoints over the [`Spsc`], [`Mpsc`] and
//!   [`Mpmc`] disciplines, with non-blocking, busy-wait and timed forms
//! - [`Channel`], a duplex endpoint pairing two rings (`_AB`/`_BA`)
//! - [`Publisher`]/[`Subscriber`] and [`RingPublisher`]/[`RingSubscriber`],
//!   a wait/notify variant whose pops park on a process-shared condition
//!
//! Payloads are opaque fixed-size byte slots; peers agree on the geometry
//! (`element_size` x `capacity`) at open time and the first opener of a
//! name initializes the segment header exactly once.
//!
//! # Example
//!
//! ```no_run
//! use shmring::{Geometry, RingError, SpscConsumer, SpscProducer};
//!
//! # fn main() -> Result<(), RingError> {
//! let geometry = Geometry::new(8, 64);
//! let mut producer = SpscProducer::with_geometry("/ticks", geometry)?;
//! producer.open()?;
//! producer.push(&42u64.to_le_bytes())?;
//!
//! // typically in another process
//! let mut consumer = SpscConsumer::with_geometry("/ticks", geometry)?;
//! consumer.open()?;
//! let mut tick = [0u8; 8];
//! consumer.pop(&mut tick)?;
//! assert_eq!(u64::from_le_bytes(tick), 42);
//!
//! SpscProducer::unlink("/ticks")?;
//! # Ok(())
//! # }
//! ```

mod channel;
mod config;
mod endpoint;
mod error;
mod layout;
mod policy;
mod pubring;
mod pubsub;
mod segment;
mod sync;

pub use channel::{Channel, Side};
pub use config::{
    Geometry, DEFAULT_AREA_SIZE, DEFAULT_CAPACITY, DEFAULT_ELEMENT_SIZE,
    DEFAULT_EVENT_CAPACITY, DEFAULT_EVENT_ELEMENT_SIZE,
};
pub use endpoint::{
    Consumer, MpmcConsumer, MpmcProducer, MpscConsumer, MpscProducer, Producer, SpscConsumer,
    SpscProducer,
};
pub use error::{Result, RingError};
pub use layout::RingView;
pub use policy::{Mpmc, Mpsc, RingPolicy, Spsc};
pub use pubring::{RingPublisher, RingSubscriber};
pub use pubsub::{Publisher, Subscriber};
