//! A ring buffer carried inside a wait/notify area: pushes wake the
//! subscriber, pops block on the shared condition.
//!
//! The discipline is SPSC (the publisher owns `head`, the subscriber owns
//! `tail`), but unlike the busy-wait rings the pop side parks in the kernel.
//! Intended for low-frequency event streams where spinning would waste a
//! core.

use crate::config::{DEFAULT_EVENT_CAPACITY, DEFAULT_EVENT_ELEMENT_SIZE};
use crate::error::{Result, RingError};
use crate::layout::CacheAligned;
use crate::pubsub::{ShmArea, NOTIFY_SYNC_SIZE};
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Ring header stored at the start of the area payload.
///
/// `element_size` and `capacity` are plain values: the publisher writes them
/// before the rendezvous semaphore releases any subscriber, and nobody
/// writes them afterwards.
#[repr(C)]
struct RingHeader {
    head: CacheAligned<AtomicU64>,
    tail: CacheAligned<AtomicU64>,
    element_size: u64,
    capacity: u64,
}

const RING_HEADER_SIZE: usize = std::mem::size_of::<RingHeader>();

fn ring_area_size(element_size: u64, capacity: u64) -> Result<usize> {
    if element_size == 0 || capacity == 0 {
        return Err(RingError::InvalidParam);
    }
    let data = element_size.checked_mul(capacity).ok_or(RingError::Overflow)?;
    let total = (RING_HEADER_SIZE as u64)
        .checked_add(data)
        .ok_or(RingError::Overflow)?;
    if total > libc::off_t::MAX as u64 - NOTIFY_SYNC_SIZE as u64 {
        return Err(RingError::Overflow);
    }
    Ok(total as usize)
}

/// Pushing side of a wait/notify ring. Creates the area and owns its names.
pub struct RingPublisher {
    area: ShmArea,
    element_size: u64,
    capacity: u64,
}

impl RingPublisher {
    /// Publisher with the default event geometry
    /// ([`DEFAULT_EVENT_ELEMENT_SIZE`] x [`DEFAULT_EVENT_CAPACITY`]).
    pub fn new() -> Self {
        Self::with_geometry(DEFAULT_EVENT_ELEMENT_SIZE, DEFAULT_EVENT_CAPACITY)
            .expect("default event geometry is valid")
    }

    /// Publisher with an explicit geometry.
    pub fn with_geometry(element_size: u64, capacity: u64) -> Result<Self> {
        Ok(Self {
            area: ShmArea::new(true, ring_area_size(element_size, capacity)?),
            element_size,
            capacity,
        })
    }

    /// Creates the named area, writes the ring header, and releases waiting
    /// subscribers.
    pub fn open(&mut self, name: &str) -> Result<()> {
        let element_size = self.element_size;
        let capacity = self.capacity;
        self.area.open_with(name, |payload| {
            let header = payload.cast::<RingHeader>();
            // SAFETY: the payload region is exclusively ours until the
            // rendezvous semaphore is posted, and it is large enough for
            // the header.
            unsafe {
                (*header).head.store(0, Ordering::Relaxed);
                (*header).tail.store(0, Ordering::Relaxed);
                ptr::addr_of_mut!((*header).element_size).write(element_size);
                ptr::addr_of_mut!((*header).capacity).write(capacity);
            }
            Ok(())
        })
    }

    /// Closes and unlinks the area and its semaphore.
    pub fn close(&mut self) {
        self.area.close();
    }

    pub fn opened(&self) -> bool {
        self.area.opened()
    }

    /// Pushes one element and wakes the subscriber. `WouldBlock` when full.
    pub fn push(&mut self, element: &[u8]) -> Result<()> {
        let header = self.header()?;
        if element.len() as u64 != self.element_size {
            return Err(RingError::InvalidParam);
        }
        if self.pending() >= self.capacity {
            return Err(RingError::WouldBlock);
        }

        let head = header.head.load(Ordering::Acquire);
        let slot = (head % self.capacity) as usize;
        // SAFETY: the slot is within the payload and owned by the publisher
        // until head advances.
        unsafe {
            ptr::copy_nonoverlapping(
                element.as_ptr(),
                self.data_ptr().add(slot * self.element_size as usize),
                self.element_size as usize,
            );
        }
        header.head.store(head.wrapping_add(1), Ordering::Release);

        // The notification must follow the head publish: it banks one
        // signal for exactly one readable element. Reordering the two
        // drifts the counter against the ring and strands the subscriber.
        self.area.notify()
    }

    /// Elements currently queued.
    pub fn pending(&self) -> u64 {
        self.header().map_or(0, |header| {
            let tail = header.tail.load(Ordering::Acquire);
            let head = header.head.load(Ordering::Acquire);
            head.wrapping_sub(tail)
        })
    }

    /// Free slots remaining.
    pub fn available(&self) -> u64 {
        self.capacity.saturating_sub(self.pending())
    }

    pub fn empty(&self) -> bool {
        self.pending() == 0
    }

    pub fn full(&self) -> bool {
        self.available() == 0
    }

    pub fn element_size(&self) -> u64 {
        self.element_size
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    fn header(&self) -> Result<&RingHeader> {
        let payload = self.area.data_ptr();
        if payload.is_null() {
            return Err(RingError::InvalidParam);
        }
        // SAFETY: the payload begins with the RingHeader we initialized.
        Ok(unsafe { &*payload.cast::<RingHeader>() })
    }

    fn data_ptr(&self) -> *mut u8 {
        // SAFETY: header() succeeded for every caller; the slot array
        // follows the header.
        unsafe { self.area.data_ptr().add(RING_HEADER_SIZE) }
    }
}

impl Default for RingPublisher {
    fn default() -> Self {
        Self::new()
    }
}

/// Popping side of a wait/notify ring. Pops park on the shared condition.
pub struct RingSubscriber {
    area: ShmArea,
    element_size: u64,
    capacity: u64,
}

impl RingSubscriber {
    /// Subscriber with the default event geometry.
    pub fn new() -> Self {
        Self::with_geometry(DEFAULT_EVENT_ELEMENT_SIZE, DEFAULT_EVENT_CAPACITY)
            .expect("default event geometry is valid")
    }

    /// Subscriber with an explicit geometry; must match the publisher's.
    pub fn with_geometry(element_size: u64, capacity: u64) -> Result<Self> {
        Ok(Self {
            area: ShmArea::new(false, ring_area_size(element_size, capacity)?),
            element_size,
            capacity,
        })
    }

    /// Attaches to the named area (parking until the publisher is ready)
    /// and validates the ring geometry against this subscriber's.
    pub fn open(&mut self, name: &str) -> Result<()> {
        self.area.open_with(name, |_| Ok(()))?;
        let header = self.header()?;
        if header.element_size != self.element_size || header.capacity != self.capacity {
            self.close();
            return Err(RingError::InvalidParam);
        }
        Ok(())
    }

    /// Unmaps and closes; never unlinks.
    pub fn close(&mut self) {
        self.area.close();
    }

    pub fn opened(&self) -> bool {
        self.area.opened()
    }

    /// Pops one element, blocking on the shared condition until the
    /// publisher pushes.
    pub fn pop(&mut self, element: &mut [u8]) -> Result<()> {
        self.check_pop(element)?;
        // The wait must precede the tail read: it consumes exactly the
        // signal banked for the element this pop takes. Reordering the two
        // drifts the counter against the ring.
        self.area.wait()?;
        self.take(element)
    }

    /// As [`RingSubscriber::pop`] with a deadline; `TimedOut` leaves the
    /// ring untouched.
    pub fn timed_pop(&mut self, element: &mut [u8], timeout: Duration) -> Result<()> {
        self.check_pop(element)?;
        self.area.timed_wait(timeout)?;
        self.take(element)
    }

    /// Elements currently queued.
    pub fn pending(&self) -> u64 {
        self.header().map_or(0, |header| {
            let tail = header.tail.load(Ordering::Acquire);
            let head = header.head.load(Ordering::Acquire);
            head.wrapping_sub(tail)
        })
    }

    pub fn empty(&self) -> bool {
        self.pending() == 0
    }

    pub fn element_size(&self) -> u64 {
        self.element_size
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    fn check_pop(&self, element: &[u8]) -> Result<()> {
        self.header()?;
        if element.len() as u64 != self.element_size {
            return Err(RingError::InvalidParam);
        }
        Ok(())
    }

    /// Copies out the slot at `tail` and publishes the new tail. Only
    /// called after a successful wait, so the slot is guaranteed readable.
    fn take(&mut self, element: &mut [u8]) -> Result<()> {
        let header = self.header()?;
        let tail = header.tail.load(Ordering::Acquire);
        let slot = (tail % self.capacity) as usize;
        // SAFETY: the slot is within the payload; the wait consumed a
        // signal published after this element was written.
        unsafe {
            ptr::copy_nonoverlapping(
                self.data_ptr().add(slot * self.element_size as usize),
                element.as_mut_ptr(),
                self.element_size as usize,
            );
        }
        header.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    fn header(&self) -> Result<&RingHeader> {
        let payload = self.area.data_ptr();
        if payload.is_null() {
            return Err(RingError::InvalidParam);
        }
        // SAFETY: the payload begins with the RingHeader written by the
        // publisher before the rendezvous released us.
        Ok(unsafe { &*payload.cast::<RingHeader>() })
    }

    fn data_ptr(&self) -> *mut u8 {
        // SAFETY: only called with a live mapping; the slot array follows
        // the header.
        unsafe { self.area.data_ptr().add(RING_HEADER_SIZE) }
    }
}

impl Default for RingSubscriber {
    fn default() -> Self {
        Self::new()
    }
}
