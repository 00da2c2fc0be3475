//! Binary layout of the shared segment header.
//!
//! The header is the ABI between every process attached to a named segment:
//! all peers of a given name must agree on these offsets, so the layout is
//! `#[repr(C)]` with one 64-bit atomic per cache line and is pinned by
//! compile-time assertions below.
//!
//! ```text
//! offset   0  magic          (atomic, one-shot init sentinel)
//! offset  64  head           (atomic write sequence)
//! offset 128  tail           (atomic read sequence)
//! offset 192  element_size
//! offset 256  capacity
//! offset 320  ready stamps   (capacity x u64, MPSC/MPMC only)
//! offset DATA slot array     (capacity x element_size bytes)
//! ```

use std::ops::Deref;
use std::ptr;
use std::sync::atomic::AtomicU64;

/// Sentinel stored in `magic` by the one opener that wins initialization.
pub(crate) const MAGIC: u64 = 0x9F7E_3B2A_8D5C_4E1B;

/// Alignment unit for the header fields and the data region.
pub(crate) const CACHE_LINE: usize = 64;

/// Wrapper that pads its contents to a full cache line.
///
/// `head` and `tail` are written by opposite sides of the queue; sharing a
/// line between them would turn every publication into a coherence miss.
#[repr(C, align(64))]
pub(crate) struct CacheAligned<T> {
    value: T,
}

impl<T> Deref for CacheAligned<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

/// Synchronization header at the start of every ring segment.
///
/// `element_size` and `capacity` are atomics only so that the open-time
/// initialization race is defined; after the winner publishes `capacity`
/// they are never stored again.
#[repr(C)]
pub(crate) struct RingSync {
    magic: CacheAligned<AtomicU64>,
    head: CacheAligned<AtomicU64>,
    tail: CacheAligned<AtomicU64>,
    element_size: CacheAligned<AtomicU64>,
    capacity: CacheAligned<AtomicU64>,
}

impl RingSync {
    #[inline]
    pub(crate) fn magic(&self) -> &AtomicU64 {
        &self.magic
    }

    #[inline]
    pub(crate) fn head(&self) -> &AtomicU64 {
        &self.head
    }

    #[inline]
    pub(crate) fn tail(&self) -> &AtomicU64 {
        &self.tail
    }

    #[inline]
    pub(crate) fn element_size(&self) -> &AtomicU64 {
        &self.element_size
    }

    #[inline]
    pub(crate) fn capacity(&self) -> &AtomicU64 {
        &self.capacity
    }
}

/// Header size; the stamp array (when present) starts here.
pub(crate) const SYNC_SIZE: usize = std::mem::size_of::<RingSync>();

// The offsets above are the wire format; a padding change would silently
// desynchronize peers built from different revisions.
const _: () = {
    assert!(std::mem::offset_of!(RingSync, magic) == 0);
    assert!(std::mem::offset_of!(RingSync, head) == 64);
    assert!(std::mem::offset_of!(RingSync, tail) == 128);
    assert!(std::mem::offset_of!(RingSync, element_size) == 192);
    assert!(std::mem::offset_of!(RingSync, capacity) == 256);
    assert!(SYNC_SIZE == 320);
};

pub(crate) const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Borrowed view of an opened ring segment handed to the policies.
///
/// `stamps` is empty for SPSC segments; for MPSC/MPMC it holds one ready
/// stamp per slot (`seq` = free, `seq + 1` = full, freed with
/// `seq + capacity`).
///
/// Exported as an opaque handle because it appears in the
/// [`crate::RingPolicy`] signatures; it cannot be constructed outside the
/// crate, so endpoints remain the only way to reach a ring.
pub struct RingView<'a> {
    pub(crate) sync: &'a RingSync,
    pub(crate) stamps: &'a [AtomicU64],
    pub(crate) data: *mut u8,
    pub(crate) element_size: usize,
    pub(crate) capacity: u64,
}

impl RingView<'_> {
    /// Ready stamp for the slot addressed by `seq`.
    #[inline]
    pub(crate) fn stamp(&self, seq: u64) -> &AtomicU64 {
        &self.stamps[(seq % self.capacity) as usize]
    }

    #[inline]
    fn slot_ptr(&self, seq: u64) -> *mut u8 {
        let index = (seq % self.capacity) as usize;
        // SAFETY: index < capacity and the mapping holds capacity slots of
        // element_size bytes past `data`.
        unsafe { self.data.add(index * self.element_size) }
    }

    /// Copy `element_size` bytes into the slot addressed by `seq`.
    ///
    /// The caller must own `seq` (reserved via the counter protocol) so no
    /// other process touches the slot until it is published.
    #[inline]
    pub(crate) fn write_slot(&self, seq: u64, src: &[u8]) {
        debug_assert_eq!(src.len(), self.element_size);
        // SAFETY: src holds element_size bytes and the slot is exclusively
        // owned by the caller between reservation and publication.
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), self.slot_ptr(seq), self.element_size) };
    }

    /// Copy the slot addressed by `seq` out into `dst`.
    #[inline]
    pub(crate) fn read_slot(&self, seq: u64, dst: &mut [u8]) {
        debug_assert_eq!(dst.len(), self.element_size);
        // SAFETY: dst holds element_size bytes and the slot stays owned by
        // the caller until the read sequence is published.
        unsafe { ptr::copy_nonoverlapping(self.slot_ptr(seq), dst.as_mut_ptr(), self.element_size) };
    }
}
