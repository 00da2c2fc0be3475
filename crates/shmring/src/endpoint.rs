//! Role-typed endpoints over a segment and a ring policy.
//!
//! A `Producer` may only push, a `Consumer` may only pop; the policy is
//! fixed at the type level. Endpoints are not clonable: one endpoint is one
//! logical participant, and multi-producer use means opening one `Producer`
//! per producing thread or process.

use crate::config::Geometry;
use crate::error::Result;
use crate::policy::RingPolicy;
use crate::segment::Segment;
use std::marker::PhantomData;
use std::time::Duration;

/// Writing endpoint of a shared ring.
///
/// Endpoints never unlink on close; call [`Producer::unlink`] from the
/// process that owns the name once every peer is done with it.
pub struct Producer<P: RingPolicy> {
    segment: Segment,
    _policy: PhantomData<P>,
}

impl<P: RingPolicy> Producer<P> {
    /// Producer with the default geometry
    /// ([`crate::DEFAULT_ELEMENT_SIZE`] x [`crate::DEFAULT_CAPACITY`]).
    pub fn new(name: &str) -> Result<Self> {
        Self::with_geometry(name, Geometry::default())
    }

    /// Producer with an explicit geometry. Validates the configuration but
    /// acquires no OS resources; call [`Producer::open`] for that.
    pub fn with_geometry(name: &str, geometry: Geometry) -> Result<Self> {
        Ok(Self {
            segment: Segment::new(name, geometry, P::STAMPED)?,
            _policy: PhantomData,
        })
    }

    /// Creates or attaches the named segment. Fails with
    /// [`crate::RingError::InUse`] when already open.
    pub fn open(&mut self) -> Result<()> {
        self.segment.open()
    }

    /// Unmaps and closes without unlinking the name.
    pub fn close(&mut self) {
        self.segment.close();
    }

    /// Whether the segment is currently mapped.
    pub fn opened(&self) -> bool {
        self.segment.opened()
    }

    /// Removes the OS name; succeeds if it is already absent.
    pub fn unlink(name: &str) -> Result<()> {
        Segment::unlink(name)
    }

    /// Push without blocking; `WouldBlock` when the ring is full.
    pub fn try_push(&mut self, element: &[u8]) -> Result<()> {
        P::try_push(&self.segment.ring()?, element)
    }

    /// Push, busy-waiting (spin then yield) while the ring is full.
    pub fn push(&mut self, element: &[u8]) -> Result<()> {
        P::push(&self.segment.ring()?, element)
    }

    /// Push with a deadline; `TimedOut` when it passes while still full.
    pub fn timed_push(&mut self, element: &[u8], timeout: Duration) -> Result<()> {
        P::timed_push(&self.segment.ring()?, element, timeout)
    }

    /// Free slots at this instant. Zero when not open.
    pub fn available(&self) -> u64 {
        self.segment.ring().map_or(0, |ring| P::available(&ring))
    }

    /// Whether no slot is free at this instant.
    pub fn full(&self) -> bool {
        self.segment.ring().is_ok_and(|ring| P::full(&ring))
    }

    pub fn name(&self) -> &str {
        self.segment.name()
    }

    pub fn element_size(&self) -> u64 {
        self.segment.geometry().element_size
    }

    pub fn capacity(&self) -> u64 {
        self.segment.geometry().capacity
    }
}

/// Reading endpoint of a shared ring.
pub struct Consumer<P: RingPolicy> {
    segment: Segment,
    _policy: PhantomData<P>,
}

impl<P: RingPolicy> Consumer<P> {
    /// Consumer with the default geometry.
    pub fn new(name: &str) -> Result<Self> {
        Self::with_geometry(name, Geometry::default())
    }

    /// Consumer with an explicit geometry; no OS resources acquired yet.
    pub fn with_geometry(name: &str, geometry: Geometry) -> Result<Self> {
        Ok(Self {
            segment: Segment::new(name, geometry, P::STAMPED)?,
            _policy: PhantomData,
        })
    }

    /// Creates or attaches the named segment. Fails with
    /// [`crate::RingError::InUse`] when already open.
    pub fn open(&mut self) -> Result<()> {
        self.segment.open()
    }

    /// Unmaps and closes without unlinking the name.
    pub fn close(&mut self) {
        self.segment.close();
    }

    /// Whether the segment is currently mapped.
    pub fn opened(&self) -> bool {
        self.segment.opened()
    }

    /// Removes the OS name; succeeds if it is already absent.
    pub fn unlink(name: &str) -> Result<()> {
        Segment::unlink(name)
    }

    /// Pop without blocking; `WouldBlock` when the ring is empty.
    pub fn try_pop(&mut self, element: &mut [u8]) -> Result<()> {
        P::try_pop(&self.segment.ring()?, element)
    }

    /// Pop, busy-waiting (spin then yield) while the ring is empty.
    pub fn pop(&mut self, element: &mut [u8]) -> Result<()> {
        P::pop(&self.segment.ring()?, element)
    }

    /// Pop with a deadline; `TimedOut` when it passes while still empty.
    pub fn timed_pop(&mut self, element: &mut [u8], timeout: Duration) -> Result<()> {
        P::timed_pop(&self.segment.ring()?, element, timeout)
    }

    /// Elements queued at this instant. Zero when not open.
    pub fn pending(&self) -> u64 {
        self.segment.ring().map_or(0, |ring| P::pending(&ring))
    }

    /// Whether nothing is queued at this instant.
    pub fn empty(&self) -> bool {
        self.segment.ring().map_or(true, |ring| P::empty(&ring))
    }

    pub fn name(&self) -> &str {
        self.segment.name()
    }

    pub fn element_size(&self) -> u64 {
        self.segment.geometry().element_size
    }

    pub fn capacity(&self) -> u64 {
        self.segment.geometry().capacity
    }
}

/// One producer, one consumer.
pub type SpscProducer = Producer<crate::Spsc>;
/// One producer, one consumer.
pub type SpscConsumer = Consumer<crate::Spsc>;
/// Many producers, one consumer.
pub type MpscProducer = Producer<crate::Mpsc>;
/// Many producers, one consumer.
pub type MpscConsumer = Consumer<crate::Mpsc>;
/// Many producers, many consumers.
pub type MpmcProducer = Producer<crate::Mpmc>;
/// Many producers, many consumers.
pub type MpmcConsumer = Consumer<crate::Mpmc>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RingError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn uniq(tag: &str) -> String {
        static N: AtomicUsize = AtomicUsize::new(0);
        format!(
            "/shmring_ep_{tag}_{}_{}",
            std::process::id(),
            N.fetch_add(1, Ordering::Relaxed)
        )
    }

    #[test]
    fn producer_consumer_roundtrip() {
        let name = uniq("pair");
        let geometry = Geometry::new(4, 2);
        let mut producer = SpscProducer::with_geometry(&name, geometry).unwrap();
        let mut consumer = SpscConsumer::with_geometry(&name, geometry).unwrap();
        producer.open().unwrap();
        consumer.open().unwrap();

        producer.try_push(&[1, 2, 3, 4]).unwrap();
        assert_eq!(consumer.pending(), 1);
        assert_eq!(producer.available(), 1);

        let mut out = [0u8; 4];
        consumer.try_pop(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
        assert!(consumer.empty());
        assert!(!producer.full());

        producer.close();
        consumer.close();
        SpscProducer::unlink(&name).unwrap();
    }

    #[test]
    fn operations_require_open() {
        let name = uniq("closed");
        let mut producer = SpscProducer::with_geometry(&name, Geometry::new(4, 2)).unwrap();
        assert_eq!(
            producer.try_push(&[0u8; 4]),
            Err(RingError::InvalidParam)
        );
        assert_eq!(producer.available(), 0);
        assert!(!producer.full());
    }

    #[test]
    fn moving_keeps_the_mapping() {
        let name = uniq("moved");
        let mut producer = SpscProducer::with_geometry(&name, Geometry::new(4, 2)).unwrap();
        producer.open().unwrap();
        let mut moved = producer;
        assert!(moved.opened());
        moved.try_push(&[9, 9, 9, 9]).unwrap();
        moved.close();
        SpscProducer::unlink(&name).unwrap();
    }
}
