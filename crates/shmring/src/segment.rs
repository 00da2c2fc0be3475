//! Lifecycle of a named, file-backed shared segment.
//!
//! The first process to open a name creates and sizes the object; everyone
//! else attaches read/write. Exactly one opener wins the header
//! initialization via a compare-exchange on the magic word; all openers then
//! validate that the header geometry matches their own configuration.

use crate::config::Geometry;
use crate::error::{Result, RingError};
use crate::layout::{align_up, RingSync, RingView, CACHE_LINE, MAGIC, SYNC_SIZE};
use std::ffi::CString;
use std::io;
use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};

fn errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
}

/// A named shared-memory segment holding a [`RingSync`] header, an optional
/// per-slot stamp array, and the slot data.
///
/// Construction only validates the configuration; `open` acquires the OS
/// object and mapping. `close` releases them without unlinking the name.
pub(crate) struct Segment {
    name: String,
    cname: CString,
    geometry: Geometry,
    stamped: bool,
    data_offset: usize,
    total_size: usize,
    fd: libc::c_int,
    ptr: *mut u8,
}

// SAFETY: the mapping is MAP_SHARED and position-independent state; moving
// the handle between threads does not move the mapping.
unsafe impl Send for Segment {}

impl Segment {
    /// Validates the configuration and prepares a closed segment handle.
    ///
    /// `stamped` reserves one ready stamp per slot between the header and
    /// the data region (MPSC/MPMC policies).
    pub(crate) fn new(name: &str, geometry: Geometry, stamped: bool) -> Result<Self> {
        if name.is_empty() {
            return Err(RingError::InvalidParam);
        }
        let cname = CString::new(name).map_err(|_| RingError::InvalidParam)?;

        let data_size = geometry.data_size()?;
        let stamp_size = if stamped {
            geometry
                .capacity
                .checked_mul(std::mem::size_of::<AtomicU64>() as u64)
                .ok_or(RingError::Overflow)?
        } else {
            0
        };
        let header_size = (SYNC_SIZE as u64)
            .checked_add(stamp_size)
            .ok_or(RingError::Overflow)?;
        if header_size > libc::off_t::MAX as u64 {
            return Err(RingError::Overflow);
        }
        let data_offset = align_up(header_size as usize, CACHE_LINE) as u64;
        let total_size = data_offset
            .checked_add(data_size)
            .ok_or(RingError::Overflow)?;
        if total_size > libc::off_t::MAX as u64 {
            return Err(RingError::Overflow);
        }

        Ok(Self {
            name: name.to_owned(),
            cname,
            geometry,
            stamped,
            data_offset: data_offset as usize,
            total_size: total_size as usize,
            fd: -1,
            ptr: ptr::null_mut(),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Whether a mapping currently exists.
    pub(crate) fn opened(&self) -> bool {
        !self.ptr.is_null()
    }

    /// Creates or attaches the OS object, maps it, and runs the
    /// one-writer-wins header initialization.
    ///
    /// Any failure closes the segment before returning; a partial mapping is
    /// never observable.
    pub(crate) fn open(&mut self) -> Result<()> {
        if self.opened() {
            return Err(RingError::InUse);
        }

        let mut created = true;
        // SAFETY: cname is a valid NUL-terminated string.
        let mut fd = unsafe {
            libc::shm_open(
                self.cname.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL | libc::O_CLOEXEC,
                0o644,
            )
        };
        if fd == -1 && errno() == libc::EEXIST {
            created = false;
            // SAFETY: as above.
            fd = unsafe {
                libc::shm_open(self.cname.as_ptr(), libc::O_RDWR | libc::O_CLOEXEC, 0o644)
            };
        }
        if fd == -1 {
            let err = RingError::last_os_error();
            self.close();
            return Err(err);
        }
        self.fd = fd;

        // SAFETY: fd is a segment descriptor we own; total_size fits off_t.
        if created && unsafe { libc::ftruncate(self.fd, self.total_size as libc::off_t) } == -1 {
            let err = RingError::last_os_error();
            self.close();
            return Err(err);
        }

        if !created {
            if let Err(err) = self.wait_for_size() {
                self.close();
                return Err(err);
            }
        }

        // SAFETY: fd is open read/write and the object is at least
        // total_size bytes long.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                self.total_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            let err = RingError::last_os_error();
            self.close();
            return Err(err);
        }
        self.ptr = ptr.cast::<u8>();

        if let Err(err) = self.init_header() {
            self.close();
            return Err(err);
        }
        Ok(())
    }

    /// Waits for an attached object to reach our size.
    ///
    /// The creator sizes the object only after creating it, so a brand-new
    /// object can transiently be zero-length; touching pages past its end
    /// would fault. A shortfall that persists is a geometry mismatch.
    fn wait_for_size(&self) -> Result<()> {
        let mut spins = 0u32;
        loop {
            // SAFETY: fd is a live descriptor and stat is a valid
            // out-pointer.
            let mut stat: libc::stat = unsafe { std::mem::zeroed() };
            if unsafe { libc::fstat(self.fd, &mut stat) } == -1 {
                return Err(RingError::last_os_error());
            }
            if stat.st_size as u64 >= self.total_size as u64 {
                return Ok(());
            }
            spins += 1;
            if spins > 1 << 12 {
                return Err(RingError::InvalidParam);
            }
            std::thread::yield_now();
        }
    }

    /// One-writer-wins initialization plus geometry validation.
    ///
    /// The winner publishes `capacity` last with `Release`; losers wait for
    /// it to become non-zero before validating, so a half-written header is
    /// never mistaken for a mismatch.
    fn init_header(&self) -> Result<()> {
        let sync = self.sync();
        let won = sync
            .magic()
            .compare_exchange(0, MAGIC, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            sync.head().store(0, Ordering::Relaxed);
            sync.tail().store(0, Ordering::Relaxed);
            sync.element_size()
                .store(self.geometry.element_size, Ordering::Relaxed);
            for (i, stamp) in self.stamps().iter().enumerate() {
                stamp.store(i as u64, Ordering::Relaxed);
            }
            sync.capacity().store(self.geometry.capacity, Ordering::Release);
        } else {
            // The winner may still be between the magic CAS and the capacity
            // publish; give it a bounded grace period. A winner that died in
            // that window leaves zeros and the validation below rejects them.
            let mut spins = 0u32;
            while sync.capacity().load(Ordering::Acquire) == 0 && spins < 1 << 16 {
                std::thread::yield_now();
                spins += 1;
            }
        }

        if sync.element_size().load(Ordering::Relaxed) != self.geometry.element_size
            || sync.capacity().load(Ordering::Relaxed) != self.geometry.capacity
        {
            return Err(RingError::InvalidParam);
        }
        Ok(())
    }

    /// Releases the mapping and descriptor. Never unlinks the name.
    pub(crate) fn close(&mut self) {
        if !self.ptr.is_null() {
            // SAFETY: ptr/total_size come from a successful mmap.
            unsafe { libc::munmap(self.ptr.cast::<libc::c_void>(), self.total_size) };
            self.ptr = ptr::null_mut();
        }
        if self.fd != -1 {
            // SAFETY: fd is a descriptor we own.
            unsafe { libc::close(self.fd) };
            self.fd = -1;
        }
    }

    /// Removes the OS name. Succeeds if the name is already absent.
    pub(crate) fn unlink(name: &str) -> Result<()> {
        let cname = CString::new(name).map_err(|_| RingError::InvalidParam)?;
        // SAFETY: cname is a valid NUL-terminated string.
        if unsafe { libc::shm_unlink(cname.as_ptr()) } == -1 {
            let eno = errno();
            if eno != libc::ENOENT {
                return Err(RingError::from_errno(eno));
            }
        }
        Ok(())
    }

    fn sync(&self) -> &RingSync {
        debug_assert!(self.opened());
        // SAFETY: the mapping starts with a RingSync and outlives &self.
        unsafe { &*self.ptr.cast::<RingSync>() }
    }

    fn stamps(&self) -> &[AtomicU64] {
        if !self.stamped {
            return &[];
        }
        // SAFETY: capacity stamps live at SYNC_SIZE, inside the mapping.
        unsafe {
            slice::from_raw_parts(
                self.ptr.add(SYNC_SIZE).cast::<AtomicU64>(),
                self.geometry.capacity as usize,
            )
        }
    }

    /// Borrow the opened ring, or `InvalidParam` when there is no mapping.
    pub(crate) fn ring(&self) -> Result<RingView<'_>> {
        if !self.opened() {
            return Err(RingError::InvalidParam);
        }
        Ok(RingView {
            sync: self.sync(),
            stamps: self.stamps(),
            // SAFETY: data_offset < total_size, inside the mapping.
            data: unsafe { self.ptr.add(self.data_offset) },
            element_size: self.geometry.element_size as usize,
            capacity: self.geometry.capacity,
        })
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn uniq(tag: &str) -> String {
        static N: AtomicUsize = AtomicUsize::new(0);
        format!(
            "/shmring_seg_{tag}_{}_{}",
            std::process::id(),
            N.fetch_add(1, Ordering::Relaxed)
        )
    }

    #[test]
    fn rejects_bad_names() {
        let g = Geometry::new(8, 4);
        assert!(Segment::new("", g, false).is_err());
        assert!(Segment::new("bad\0name", g, false).is_err());
    }

    #[test]
    fn open_close_reopen() {
        let name = uniq("lifecycle");
        let mut seg = Segment::new(&name, Geometry::new(8, 4), false).unwrap();
        assert!(!seg.opened());
        seg.open().unwrap();
        assert!(seg.opened());
        assert_eq!(seg.open(), Err(RingError::InUse));
        seg.close();
        assert!(!seg.opened());
        // close when already closed is a no-op
        seg.close();
        seg.open().unwrap();
        seg.close();
        Segment::unlink(&name).unwrap();
    }

    #[test]
    fn unlink_is_idempotent() {
        let name = uniq("unlink");
        assert_eq!(Segment::unlink(&name), Ok(()));
        let mut seg = Segment::new(&name, Geometry::new(8, 4), false).unwrap();
        seg.open().unwrap();
        seg.close();
        assert_eq!(Segment::unlink(&name), Ok(()));
        assert_eq!(Segment::unlink(&name), Ok(()));
    }

    #[test]
    fn geometry_mismatch_fails_second_opener() {
        let name = uniq("geometry");
        let mut first = Segment::new(&name, Geometry::new(64, 16), false).unwrap();
        first.open().unwrap();

        let mut second = Segment::new(&name, Geometry::new(128, 16), false).unwrap();
        assert_eq!(second.open(), Err(RingError::InvalidParam));
        assert!(!second.opened());

        // the first opener is unaffected
        assert!(first.opened());
        assert_eq!(first.ring().unwrap().capacity, 16);
        first.close();
        Segment::unlink(&name).unwrap();
    }

    #[test]
    fn header_survives_reattach() {
        let name = uniq("reattach");
        let g = Geometry::new(16, 8);
        let mut a = Segment::new(&name, g, true).unwrap();
        a.open().unwrap();
        a.ring().unwrap().sync.head().store(3, Ordering::Release);

        let mut b = Segment::new(&name, g, true).unwrap();
        b.open().unwrap();
        assert_eq!(b.ring().unwrap().sync.head().load(Ordering::Acquire), 3);
        // the loser did not reinitialize the stamps either
        assert_eq!(b.ring().unwrap().stamps[0].load(Ordering::Relaxed), 0);

        a.close();
        b.close();
        Segment::unlink(&name).unwrap();
    }
}
