//! Lock-free ring disciplines: SPSC, MPSC, MPMC.
//!
//! =========================================================================
//! MEMORY ORDERING & SYNCHRONIZATION STRATEGY
//! =========================================================================
//!
//! All three policies share the header protocol: `head` and `tail` are
//! monotonic u64 sequence counters (no ABA: wrap takes decades at any real
//! rate); the slot index is `seq % capacity`; occupancy is `head - tail`.
//!
//! **SPSC** — a single producer owns `head` writes and a single consumer
//! owns `tail` writes. Each side acquires the opposite counter and releases
//! its own after the payload copy, so the copy happens-before the
//! publication the peer observes.
//!
//! **MPSC / MPMC** — producers (and, for MPMC, consumers) reserve a
//! sequence by CAS on the shared counter. A CAS alone cannot order the
//! payload copy against the counter publication, so every slot carries a
//! ready stamp:
//!
//! ```text
//! stamp == seq              slot free, a producer may claim seq
//! stamp == seq + 1          payload written, a consumer may take seq
//! stamp == seq + capacity   consumed, free for the next lap
//! ```
//!
//! Producers publish the stamp with `Release` after the copy; consumers
//! acquire it before reading. The stamp also embeds the lap, so a slot is
//! never overwritten while a peer is still copying it.
//!
//! `try_*` never blocks and never yields. The blocking forms spin briefly
//! then yield between retries; the timed forms additionally check a steady
//! clock deadline.

use crate::error::{Result, RingError};
use crate::layout::RingView;
use crossbeam_utils::Backoff;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

#[inline]
fn check_len(view: &RingView<'_>, len: usize) -> Result<()> {
    if len != view.element_size {
        return Err(RingError::InvalidParam);
    }
    Ok(())
}

/// A ring discipline. Policies are zero-sized; endpoints select one at the
/// type level, so there is no dispatch cost on the hot path.
pub trait RingPolicy {
    /// Whether segments of this policy carry a per-slot ready stamp array.
    const STAMPED: bool;

    /// Push one element without blocking. `WouldBlock` when full.
    fn try_push(ring: &RingView<'_>, element: &[u8]) -> Result<()>;

    /// Pop one element without blocking. `WouldBlock` when empty.
    fn try_pop(ring: &RingView<'_>, element: &mut [u8]) -> Result<()>;

    /// Push, retrying on `WouldBlock` with spin-then-yield backoff.
    fn push(ring: &RingView<'_>, element: &[u8]) -> Result<()> {
        let backoff = Backoff::new();
        loop {
            match Self::try_push(ring, element) {
                Err(RingError::WouldBlock) => snooze(&backoff),
                res => return res,
            }
        }
    }

    /// Pop, retrying on `WouldBlock` with spin-then-yield backoff.
    fn pop(ring: &RingView<'_>, element: &mut [u8]) -> Result<()> {
        let backoff = Backoff::new();
        loop {
            match Self::try_pop(ring, element) {
                Err(RingError::WouldBlock) => snooze(&backoff),
                res => return res,
            }
        }
    }

    /// Push with a relative deadline; `TimedOut` once it passes.
    fn timed_push(ring: &RingView<'_>, element: &[u8], timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();
        loop {
            match Self::try_push(ring, element) {
                Err(RingError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Err(RingError::TimedOut);
                    }
                    snooze(&backoff);
                }
                res => return res,
            }
        }
    }

    /// Pop with a relative deadline; `TimedOut` once it passes.
    fn timed_pop(ring: &RingView<'_>, element: &mut [u8], timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();
        loop {
            match Self::try_pop(ring, element) {
                Err(RingError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Err(RingError::TimedOut);
                    }
                    snooze(&backoff);
                }
                res => return res,
            }
        }
    }

    /// Elements currently queued.
    ///
    /// `tail` is loaded first so the snapshot never goes negative.
    fn pending(ring: &RingView<'_>) -> u64 {
        let tail = ring.sync.tail().load(Ordering::Acquire);
        let head = ring.sync.head().load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    /// Free slots remaining.
    fn available(ring: &RingView<'_>) -> u64 {
        ring.capacity.saturating_sub(Self::pending(ring))
    }

    /// Snapshot: no free slot at this instant.
    fn full(ring: &RingView<'_>) -> bool {
        Self::pending(ring) >= ring.capacity
    }

    /// Snapshot: nothing queued at this instant.
    fn empty(ring: &RingView<'_>) -> bool {
        Self::pending(ring) == 0
    }
}

#[inline]
fn snooze(backoff: &Backoff) {
    if backoff.is_completed() {
        thread::yield_now();
    } else {
        backoff.snooze();
    }
}

/// One producer, one consumer. The plain header layout with no stamp array.
pub struct Spsc;

impl RingPolicy for Spsc {
    const STAMPED: bool = false;

    fn try_push(ring: &RingView<'_>, element: &[u8]) -> Result<()> {
        check_len(ring, element.len())?;
        let tail = ring.sync.tail().load(Ordering::Acquire);
        let head = ring.sync.head().load(Ordering::Relaxed);
        if head.wrapping_sub(tail) == ring.capacity {
            return Err(RingError::WouldBlock);
        }
        ring.write_slot(head, element);
        ring.sync.head().store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    fn try_pop(ring: &RingView<'_>, element: &mut [u8]) -> Result<()> {
        check_len(ring, element.len())?;
        let head = ring.sync.head().load(Ordering::Acquire);
        let tail = ring.sync.tail().load(Ordering::Relaxed);
        if head == tail {
            return Err(RingError::WouldBlock);
        }
        ring.read_slot(tail, element);
        ring.sync.tail().store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }
}

/// Many producers, one consumer. Producers reserve by CAS on `head`.
pub struct Mpsc;

impl RingPolicy for Mpsc {
    const STAMPED: bool = true;

    fn try_push(ring: &RingView<'_>, element: &[u8]) -> Result<()> {
        check_len(ring, element.len())?;
        let mut head = ring.sync.head().load(Ordering::Relaxed);
        loop {
            let tail = ring.sync.tail().load(Ordering::Acquire);
            if head.wrapping_sub(tail) >= ring.capacity {
                return Err(RingError::WouldBlock);
            }
            let stamp = ring.stamp(head).load(Ordering::Acquire);
            if stamp == head {
                match ring.sync.head().compare_exchange_weak(
                    head,
                    head.wrapping_add(1),
                    Ordering::Acquire,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        ring.write_slot(head, element);
                        ring.stamp(head).store(head.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => head = current,
                }
            } else if stamp < head {
                // previous-lap occupant not consumed yet
                return Err(RingError::WouldBlock);
            } else {
                // another producer claimed this sequence
                head = ring.sync.head().load(Ordering::Relaxed);
            }
        }
    }

    fn try_pop(ring: &RingView<'_>, element: &mut [u8]) -> Result<()> {
        check_len(ring, element.len())?;
        let tail = ring.sync.tail().load(Ordering::Relaxed);
        let stamp = ring.stamp(tail).load(Ordering::Acquire);
        if stamp != tail.wrapping_add(1) {
            // empty, or the producer that reserved this slot has not
            // published its payload yet
            return Err(RingError::WouldBlock);
        }
        ring.read_slot(tail, element);
        ring.sync.tail().store(tail.wrapping_add(1), Ordering::Release);
        ring.stamp(tail)
            .store(tail.wrapping_add(ring.capacity), Ordering::Release);
        Ok(())
    }
}

/// Many producers, many consumers. Consumers also reserve by CAS on `tail`.
pub struct Mpmc;

impl RingPolicy for Mpmc {
    const STAMPED: bool = true;

    fn try_push(ring: &RingView<'_>, element: &[u8]) -> Result<()> {
        Mpsc::try_push(ring, element)
    }

    fn try_pop(ring: &RingView<'_>, element: &mut [u8]) -> Result<()> {
        check_len(ring, element.len())?;
        let mut tail = ring.sync.tail().load(Ordering::Relaxed);
        loop {
            let stamp = ring.stamp(tail).load(Ordering::Acquire);
            if stamp == tail.wrapping_add(1) {
                match ring.sync.tail().compare_exchange_weak(
                    tail,
                    tail.wrapping_add(1),
                    Ordering::Acquire,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        ring.read_slot(tail, element);
                        ring.stamp(tail)
                            .store(tail.wrapping_add(ring.capacity), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => tail = current,
                }
            } else if stamp < tail.wrapping_add(1) {
                return Err(RingError::WouldBlock);
            } else {
                // another consumer claimed this sequence
                tail = ring.sync.tail().load(Ordering::Relaxed);
            }
        }
    }
}
