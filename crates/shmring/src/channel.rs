//! Bidirectional channel pairing two independently-named rings.
//!
//! A channel named `chat` uses the segment `chat_AB` for A-to-B traffic and
//! `chat_BA` for B-to-A traffic. Side A sends on `_AB` and receives on
//! `_BA`; side B is the mirror image. Both directions share one geometry.

use crate::config::Geometry;
use crate::endpoint::{Consumer, Producer};
use crate::error::{Result, RingError};
use crate::policy::RingPolicy;
use std::time::Duration;

/// Which end of a duplex channel this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Sends on `<name>_AB`, receives on `<name>_BA`.
    A,
    /// Sends on `<name>_BA`, receives on `<name>_AB`.
    B,
}

/// Duplex endpoint built from an outbound [`Producer`] and an inbound
/// [`Consumer`], one ring policy per direction.
pub struct Channel<Out: RingPolicy, In: RingPolicy = Out> {
    side: Side,
    name: String,
    outbound: Producer<Out>,
    inbound: Consumer<In>,
}

impl<Out: RingPolicy, In: RingPolicy> Channel<Out, In> {
    /// Channel with the default geometry in both directions.
    pub fn new(side: Side, name: &str) -> Result<Self> {
        Self::with_geometry(side, name, Geometry::default())
    }

    /// Channel with an explicit geometry applied to both directions.
    pub fn with_geometry(side: Side, name: &str, geometry: Geometry) -> Result<Self> {
        let (out_name, in_name) = match side {
            Side::A => (format!("{name}_AB"), format!("{name}_BA")),
            Side::B => (format!("{name}_BA"), format!("{name}_AB")),
        };
        Ok(Self {
            side,
            name: name.to_owned(),
            outbound: Producer::with_geometry(&out_name, geometry)?,
            inbound: Consumer::with_geometry(&in_name, geometry)?,
        })
    }

    /// Opens both directions; if either fails, both are closed and the
    /// failure is surfaced.
    pub fn open(&mut self) -> Result<()> {
        if self.opened() {
            return Err(RingError::InUse);
        }
        if let Err(err) = self.outbound.open() {
            self.close();
            return Err(err);
        }
        if let Err(err) = self.inbound.open() {
            self.close();
            return Err(err);
        }
        Ok(())
    }

    /// Closes both directions. Never unlinks.
    pub fn close(&mut self) {
        self.outbound.close();
        self.inbound.close();
    }

    /// Whether both directions are mapped.
    pub fn opened(&self) -> bool {
        self.outbound.opened() && self.inbound.opened()
    }

    /// Removes both segment names of a channel; absent names are fine.
    pub fn unlink(name: &str) -> Result<()> {
        crate::segment::Segment::unlink(&format!("{name}_AB"))?;
        crate::segment::Segment::unlink(&format!("{name}_BA"))
    }

    /// Send without blocking; `WouldBlock` when the outbound ring is full.
    pub fn try_send(&mut self, element: &[u8]) -> Result<()> {
        self.outbound.try_push(element)
    }

    /// Send, busy-waiting while the outbound ring is full.
    pub fn send(&mut self, element: &[u8]) -> Result<()> {
        self.outbound.push(element)
    }

    /// Send with a deadline.
    pub fn timed_send(&mut self, element: &[u8], timeout: Duration) -> Result<()> {
        self.outbound.timed_push(element, timeout)
    }

    /// Receive without blocking; `WouldBlock` when the inbound ring is
    /// empty.
    pub fn try_receive(&mut self, element: &mut [u8]) -> Result<()> {
        self.inbound.try_pop(element)
    }

    /// Receive, busy-waiting while the inbound ring is empty.
    pub fn receive(&mut self, element: &mut [u8]) -> Result<()> {
        self.inbound.pop(element)
    }

    /// Receive with a deadline.
    pub fn timed_receive(&mut self, element: &mut [u8], timeout: Duration) -> Result<()> {
        self.inbound.timed_pop(element, timeout)
    }

    /// Free outbound slots.
    pub fn available(&self) -> u64 {
        self.outbound.available()
    }

    /// Whether a send would block right now.
    pub fn full(&self) -> bool {
        self.outbound.full()
    }

    /// Messages waiting inbound.
    pub fn pending(&self) -> u64 {
        self.inbound.pending()
    }

    /// Whether a receive would block right now.
    pub fn empty(&self) -> bool {
        self.inbound.empty()
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn element_size(&self) -> u64 {
        self.inbound.element_size()
    }

    pub fn capacity(&self) -> u64 {
        self.inbound.capacity()
    }
}
