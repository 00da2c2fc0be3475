//! Process-shared mutex and condition variable living in shared memory.
//!
//! These wrap raw `pthread_mutex_t` / `pthread_cond_t` values placed inside
//! a mapped segment. The creator initializes them in place with the
//! `PTHREAD_PROCESS_SHARED` attribute before any peer can observe the
//! segment; peers then operate on them through references into the mapping.
//! The condition is bound to `CLOCK_MONOTONIC` so timed waits are immune to
//! wall-clock adjustments.

use crate::error::{Result, RingError};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::time::Duration;

/// A `pthread_mutex_t` in shared memory, process-shared.
#[repr(C)]
pub(crate) struct SharedMutex {
    inner: UnsafeCell<libc::pthread_mutex_t>,
}

// SAFETY: the pthread mutex is initialized process-shared; concurrent use
// from any number of threads and processes is its entire purpose.
unsafe impl Send for SharedMutex {}
unsafe impl Sync for SharedMutex {}

impl SharedMutex {
    /// In-place initialization by the segment creator.
    ///
    /// # Safety
    /// `this` must point to writable mapped memory that no peer observes
    /// before this call returns.
    pub(crate) unsafe fn init(this: *mut SharedMutex) -> Result<()> {
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        let mut eno = libc::pthread_mutexattr_init(attr.as_mut_ptr());
        if eno != 0 {
            return Err(RingError::from_errno(eno));
        }
        eno = libc::pthread_mutexattr_setpshared(attr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED);
        if eno == 0 {
            eno = libc::pthread_mutex_init((*this).inner.get(), attr.as_ptr());
        }
        libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
        if eno != 0 {
            return Err(RingError::from_errno(eno));
        }
        Ok(())
    }

    /// Destruction by the segment owner before unmapping.
    ///
    /// # Safety
    /// `this` must point to a mutex initialized by [`SharedMutex::init`]
    /// that no peer will touch again.
    pub(crate) unsafe fn destroy(this: *mut SharedMutex) {
        libc::pthread_mutex_destroy((*this).inner.get());
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_>> {
        // SAFETY: initialized process-shared before publication.
        let eno = unsafe { libc::pthread_mutex_lock(self.inner.get()) };
        if eno != 0 {
            return Err(RingError::from_errno(eno));
        }
        Ok(MutexGuard { mutex: self })
    }
}

/// RAII lock over a [`SharedMutex`]; unlocks on drop.
pub(crate) struct MutexGuard<'a> {
    mutex: &'a SharedMutex,
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: the guard holds the lock.
        unsafe { libc::pthread_mutex_unlock(self.mutex.inner.get()) };
    }
}

/// A `pthread_cond_t` in shared memory, process-shared, monotonic-clock
/// based.
#[repr(C)]
pub(crate) struct SharedCondition {
    inner: UnsafeCell<libc::pthread_cond_t>,
}

// SAFETY: as for SharedMutex.
unsafe impl Send for SharedCondition {}
unsafe impl Sync for SharedCondition {}

impl SharedCondition {
    /// In-place initialization by the segment creator.
    ///
    /// # Safety
    /// `this` must point to writable mapped memory that no peer observes
    /// before this call returns.
    pub(crate) unsafe fn init(this: *mut SharedCondition) -> Result<()> {
        let mut attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
        let mut eno = libc::pthread_condattr_init(attr.as_mut_ptr());
        if eno != 0 {
            return Err(RingError::from_errno(eno));
        }
        eno = libc::pthread_condattr_setpshared(attr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED);
        if eno == 0 {
            eno = libc::pthread_condattr_setclock(attr.as_mut_ptr(), libc::CLOCK_MONOTONIC);
        }
        if eno == 0 {
            eno = libc::pthread_cond_init((*this).inner.get(), attr.as_ptr());
        }
        libc::pthread_condattr_destroy(attr.as_mut_ptr());
        if eno != 0 {
            return Err(RingError::from_errno(eno));
        }
        Ok(())
    }

    /// Destruction by the segment owner before unmapping.
    ///
    /// # Safety
    /// As for [`SharedMutex::destroy`].
    pub(crate) unsafe fn destroy(this: *mut SharedCondition) {
        libc::pthread_cond_destroy((*this).inner.get());
    }

    /// Wake at least one waiter.
    pub(crate) fn signal(&self) {
        // SAFETY: initialized process-shared before publication.
        unsafe { libc::pthread_cond_signal(self.inner.get()) };
    }

    /// Block until `predicate` is true, releasing `guard`'s mutex while
    /// waiting.
    pub(crate) fn wait<F>(&self, guard: &MutexGuard<'_>, mut predicate: F) -> Result<()>
    where
        F: FnMut() -> bool,
    {
        while !predicate() {
            // SAFETY: guard holds the mutex this condition is paired with.
            let eno =
                unsafe { libc::pthread_cond_wait(self.inner.get(), guard.mutex.inner.get()) };
            if eno != 0 {
                return Err(RingError::from_errno(eno));
            }
        }
        Ok(())
    }

    /// As [`SharedCondition::wait`] but bounded by a monotonic deadline;
    /// `TimedOut` when it passes with the predicate still false.
    pub(crate) fn timed_wait<F>(
        &self,
        guard: &MutexGuard<'_>,
        timeout: Duration,
        mut predicate: F,
    ) -> Result<()>
    where
        F: FnMut() -> bool,
    {
        let deadline = monotonic_deadline(timeout);
        while !predicate() {
            // SAFETY: guard holds the mutex this condition is paired with.
            let eno = unsafe {
                libc::pthread_cond_timedwait(self.inner.get(), guard.mutex.inner.get(), &deadline)
            };
            if eno == libc::ETIMEDOUT {
                if predicate() {
                    return Ok(());
                }
                return Err(RingError::TimedOut);
            }
            if eno != 0 {
                return Err(RingError::from_errno(eno));
            }
        }
        Ok(())
    }
}

/// Absolute `CLOCK_MONOTONIC` timespec `timeout` from now.
fn monotonic_deadline(timeout: Duration) -> libc::timespec {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: now is a valid out-pointer.
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now) };

    const NANOS_PER_SEC: i64 = 1_000_000_000;
    let mut sec = now.tv_sec + timeout.as_secs() as libc::time_t;
    let mut nsec = now.tv_nsec + i64::from(timeout.subsec_nanos());
    if nsec >= NANOS_PER_SEC {
        sec += 1;
        nsec -= NANOS_PER_SEC;
    }
    libc::timespec {
        tv_sec: sec,
        tv_nsec: nsec,
    }
}
