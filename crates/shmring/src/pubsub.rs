//! Wait/notify shared-memory areas: a publisher that signals and
//! subscribers that block.
//!
//! The area starts with a [`NotifySync`] header (process-shared mutex,
//! condition, signal counter) followed by `user_size` bytes of payload
//! space. A named semaphore, `<name>_ready`, serves only as an open-time
//! rendezvous: subscribers park on it until the publisher has created and
//! initialized the segment, so they can never observe an uninitialized
//! header. It plays no role on the hot path.
//!
//! Ownership is asymmetric by design: the publisher unlinks both the shared
//! object and the semaphore when it closes; subscribers only unmap.

use crate::config::DEFAULT_AREA_SIZE;
use crate::error::{Result, RingError};
use crate::layout::CacheAligned;
use crate::sync::{SharedCondition, SharedMutex};
use std::ffi::CString;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

fn errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
}

/// Synchronization header of a wait/notify area.
#[repr(C)]
pub(crate) struct NotifySync {
    mutex: CacheAligned<SharedMutex>,
    condition: SharedCondition,
    signal_count: CacheAligned<AtomicU64>,
}

// The pthread primitives must fit the lines reserved for them; a libc that
// grows them would silently shift the payload offset between builds.
const _: () = {
    assert!(std::mem::size_of::<libc::pthread_mutex_t>() <= 64);
    assert!(std::mem::size_of::<libc::pthread_cond_t>() <= 64);
};

/// Header size; the user payload area starts here.
pub(crate) const NOTIFY_SYNC_SIZE: usize = std::mem::size_of::<NotifySync>();

/// Role-shared core of [`Publisher`] and [`Subscriber`].
pub(crate) struct ShmArea {
    publisher: bool,
    user_size: usize,
    total_size: usize,
    fd: libc::c_int,
    ptr: *mut u8,
    shm_name: Option<String>,
    sem: *mut libc::sem_t,
    sem_name: Option<String>,
    sem_owner: bool,
}

// SAFETY: the mapping is MAP_SHARED; the handle can move between threads.
unsafe impl Send for ShmArea {}

impl ShmArea {
    pub(crate) fn new(publisher: bool, user_size: usize) -> Self {
        Self {
            publisher,
            user_size,
            total_size: 0,
            fd: -1,
            ptr: ptr::null_mut(),
            shm_name: None,
            sem: ptr::null_mut(),
            sem_name: None,
            sem_owner: false,
        }
    }

    pub(crate) fn opened(&self) -> bool {
        self.fd != -1
    }

    pub(crate) fn size(&self) -> usize {
        self.user_size
    }

    /// Payload pointer past the header; null when not open.
    pub(crate) fn data_ptr(&self) -> *mut u8 {
        if self.ptr.is_null() {
            return ptr::null_mut();
        }
        // SAFETY: the mapping is NOTIFY_SYNC_SIZE + user_size bytes long.
        unsafe { self.ptr.add(NOTIFY_SYNC_SIZE) }
    }

    fn sync(&self) -> Result<&NotifySync> {
        if self.ptr.is_null() {
            return Err(RingError::InvalidParam);
        }
        // SAFETY: the mapping starts with a NotifySync, initialized by the
        // publisher before the semaphore released any subscriber.
        Ok(unsafe { &*self.ptr.cast::<NotifySync>() })
    }

    /// Opens the area; the publisher runs `init_payload` on the payload
    /// region after the header is initialized but before subscribers are
    /// released.
    pub(crate) fn open_with<F>(&mut self, name: &str, init_payload: F) -> Result<()>
    where
        F: FnOnce(*mut u8) -> Result<()>,
    {
        if self.opened() {
            return Err(RingError::InUse);
        }
        let total_size = NOTIFY_SYNC_SIZE
            .checked_add(self.user_size)
            .filter(|&n| n as u64 <= libc::off_t::MAX as u64)
            .ok_or(RingError::Overflow)?;
        self.total_size = total_size;

        let c_shm = CString::new(name).map_err(|_| RingError::InvalidParam)?;
        let sem_name = format!("{name}_ready");
        let c_sem = CString::new(sem_name.as_str()).map_err(|_| RingError::InvalidParam)?;
        // SAFETY: c_sem is a valid NUL-terminated string; O_CREAT takes the
        // extra mode and initial-value arguments.
        self.sem = unsafe {
            libc::sem_open(c_sem.as_ptr(), libc::O_CREAT, 0o640 as libc::c_uint, 0 as libc::c_uint)
        };
        if self.sem == libc::SEM_FAILED {
            self.sem = ptr::null_mut();
            return Err(RingError::last_os_error());
        }
        self.sem_name = Some(sem_name);

        if !self.publisher {
            // wait for the publisher, then let further subscribers through
            loop {
                // SAFETY: sem is a live semaphore handle.
                if unsafe { libc::sem_wait(self.sem) } == 0 {
                    break;
                }
                let eno = errno();
                if eno != libc::EINTR {
                    self.close();
                    return Err(RingError::from_errno(eno));
                }
            }
            // SAFETY: as above.
            unsafe { libc::sem_post(self.sem) };
        }

        let oflag = if self.publisher {
            libc::O_CREAT | libc::O_EXCL | libc::O_RDWR | libc::O_CLOEXEC
        } else {
            libc::O_RDWR | libc::O_CLOEXEC
        };
        // SAFETY: c_shm is a valid NUL-terminated string.
        self.fd = unsafe { libc::shm_open(c_shm.as_ptr(), oflag, 0o640) };
        if self.fd == -1 {
            let err = RingError::last_os_error();
            self.close();
            return Err(err);
        }
        self.shm_name = Some(name.to_owned());

        // SAFETY: fd was just opened; total_size fits off_t.
        if self.publisher && unsafe { libc::ftruncate(self.fd, total_size as libc::off_t) } == -1 {
            let err = RingError::last_os_error();
            self.close();
            return Err(err);
        }

        if !self.publisher {
            // The rendezvous guarantees the publisher has already sized the
            // object, so a shortfall here is a size disagreement, not a
            // race.
            // SAFETY: fd is a live descriptor; stat is a valid out-pointer.
            let mut stat: libc::stat = unsafe { std::mem::zeroed() };
            if unsafe { libc::fstat(self.fd, &mut stat) } == -1 {
                let err = RingError::last_os_error();
                self.close();
                return Err(err);
            }
            if (stat.st_size as u64) < total_size as u64 {
                self.close();
                return Err(RingError::InvalidParam);
            }
        }

        // SAFETY: fd is open read/write over total_size bytes.
        let mapped = unsafe {
            libc::mmap(
                ptr::null_mut(),
                total_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd,
                0,
            )
        };
        if mapped == libc::MAP_FAILED {
            let err = RingError::last_os_error();
            self.close();
            return Err(err);
        }
        self.ptr = mapped.cast::<u8>();

        if self.publisher {
            let sync = self.ptr.cast::<NotifySync>();
            // SAFETY: we created the object exclusively; nobody else can
            // observe it until the sem_post below.
            let init = unsafe {
                match SharedMutex::init(ptr::addr_of_mut!((*sync).mutex).cast::<SharedMutex>()) {
                    Ok(()) => SharedCondition::init(ptr::addr_of_mut!((*sync).condition)),
                    Err(err) => Err(err),
                }
            };
            if let Err(err) = init {
                self.close();
                return Err(err);
            }
            // ftruncate zero-filled the counter; make it explicit anyway
            // SAFETY: sync points at the initialized header.
            unsafe { (*sync).signal_count.store(0, Ordering::Release) };

            if let Err(err) = init_payload(self.data_ptr()) {
                self.close();
                return Err(err);
            }

            self.sem_owner = true;
            // release the subscribers
            // SAFETY: sem is a live semaphore handle.
            unsafe { libc::sem_post(self.sem) };
        }

        Ok(())
    }

    /// Unmaps and closes; the publisher additionally unlinks the shared
    /// object and the rendezvous semaphore.
    pub(crate) fn close(&mut self) {
        if !self.ptr.is_null() {
            if self.publisher {
                let sync = self.ptr.cast::<NotifySync>();
                // SAFETY: we initialized these primitives; subscribers that
                // are still mapped only see the unlinked (but live) pages.
                unsafe {
                    SharedMutex::destroy(ptr::addr_of_mut!((*sync).mutex).cast::<SharedMutex>());
                    SharedCondition::destroy(ptr::addr_of_mut!((*sync).condition));
                }
            }
            // SAFETY: ptr/total_size come from a successful mmap.
            unsafe { libc::munmap(self.ptr.cast::<libc::c_void>(), self.total_size) };
            self.ptr = ptr::null_mut();
        }

        if self.fd != -1 {
            // SAFETY: fd is a descriptor we own.
            unsafe { libc::close(self.fd) };
            self.fd = -1;
            if self.publisher {
                if let Some(name) = &self.shm_name {
                    if let Ok(c_shm) = CString::new(name.as_str()) {
                        // SAFETY: valid NUL-terminated string.
                        unsafe { libc::shm_unlink(c_shm.as_ptr()) };
                    }
                }
            }
        }
        self.shm_name = None;

        if !self.sem.is_null() {
            // SAFETY: sem is a live semaphore handle.
            unsafe { libc::sem_close(self.sem) };
            if self.publisher && self.sem_owner {
                if let Some(name) = &self.sem_name {
                    if let Ok(c_sem) = CString::new(name.as_str()) {
                        // SAFETY: valid NUL-terminated string.
                        unsafe { libc::sem_unlink(c_sem.as_ptr()) };
                    }
                }
            }
            self.sem = ptr::null_mut();
            self.sem_owner = false;
        }
        self.sem_name = None;
    }

    /// Publisher side: count a signal, then wake a waiter.
    pub(crate) fn notify(&self) -> Result<()> {
        let sync = self.sync()?;
        // fast path for waiters: the counter
        sync.signal_count.fetch_add(1, Ordering::Release);
        // The signal is issued under the mutex: otherwise it could land
        // between a waiter's locked counter check and its wait, and that
        // waiter would sleep on a signal that never comes again.
        let guard = sync.mutex.lock()?;
        sync.condition.signal();
        drop(guard);
        Ok(())
    }

    /// Subscriber side: consume one signal, blocking until one arrives.
    pub(crate) fn wait(&self) -> Result<()> {
        let sync = self.sync()?;

        // fast path: a signal is already banked
        let expected = sync.signal_count.load(Ordering::Acquire);
        if expected > 0
            && sync
                .signal_count
                .compare_exchange(expected, expected - 1, Ordering::Acquire, Ordering::Acquire)
                .is_ok()
        {
            return Ok(());
        }

        // slow path
        let guard = sync.mutex.lock()?;

        // re-check after taking the mutex
        if sync.signal_count.load(Ordering::Relaxed) > 0 {
            sync.signal_count.fetch_sub(1, Ordering::Relaxed);
            return Ok(());
        }

        sync.condition
            .wait(&guard, || sync.signal_count.load(Ordering::Relaxed) > 0)?;
        sync.signal_count.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }

    /// Subscriber side: as [`ShmArea::wait`] with a deadline.
    pub(crate) fn timed_wait(&self, timeout: Duration) -> Result<()> {
        let sync = self.sync()?;

        let expected = sync.signal_count.load(Ordering::Acquire);
        if expected > 0
            && sync
                .signal_count
                .compare_exchange(expected, expected - 1, Ordering::Acquire, Ordering::Acquire)
                .is_ok()
        {
            return Ok(());
        }

        let guard = sync.mutex.lock()?;

        if sync.signal_count.load(Ordering::Relaxed) > 0 {
            sync.signal_count.fetch_sub(1, Ordering::Relaxed);
            return Ok(());
        }

        sync.condition.timed_wait(&guard, timeout, || {
            sync.signal_count.load(Ordering::Relaxed) > 0
        })?;
        sync.signal_count.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for ShmArea {
    fn drop(&mut self) {
        self.close();
    }
}

/// Owning side of a wait/notify area.
///
/// Creates the shared object exclusively, initializes the header, and
/// unlinks everything on close.
pub struct Publisher {
    area: ShmArea,
}

impl Publisher {
    /// Publisher over [`DEFAULT_AREA_SIZE`] payload bytes.
    pub fn new() -> Self {
        Self::with_size(DEFAULT_AREA_SIZE)
    }

    /// Publisher over `size` payload bytes.
    pub fn with_size(size: usize) -> Self {
        Self {
            area: ShmArea::new(true, size),
        }
    }

    /// Creates the named area and releases waiting subscribers.
    pub fn open(&mut self, name: &str) -> Result<()> {
        self.area.open_with(name, |_| Ok(()))
    }

    /// Unmaps, closes, and unlinks both the shared object and the
    /// rendezvous semaphore.
    pub fn close(&mut self) {
        self.area.close();
    }

    pub fn opened(&self) -> bool {
        self.area.opened()
    }

    /// Wakes one waiting subscriber; the signal is banked in a counter, so
    /// a wake is never lost even if nobody waits yet.
    pub fn notify(&self) -> Result<()> {
        self.area.notify()
    }

    /// Payload region pointer; null when not open. Peers on other processes
    /// see the same bytes.
    pub fn data_ptr(&self) -> *mut u8 {
        self.area.data_ptr()
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.area.size()
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}

/// Attaching side of a wait/notify area. Blocks in `open` until the
/// publisher has initialized the segment.
pub struct Subscriber {
    area: ShmArea,
}

impl Subscriber {
    /// Subscriber over [`DEFAULT_AREA_SIZE`] payload bytes; must match the
    /// publisher's size.
    pub fn new() -> Self {
        Self::with_size(DEFAULT_AREA_SIZE)
    }

    /// Subscriber over `size` payload bytes; must match the publisher's.
    pub fn with_size(size: usize) -> Self {
        Self {
            area: ShmArea::new(false, size),
        }
    }

    /// Attaches to the named area, parking on the rendezvous semaphore
    /// until the publisher is ready.
    pub fn open(&mut self, name: &str) -> Result<()> {
        self.area.open_with(name, |_| Ok(()))
    }

    /// Unmaps and closes; never unlinks.
    pub fn close(&mut self) {
        self.area.close();
    }

    pub fn opened(&self) -> bool {
        self.area.opened()
    }

    /// Consumes one notification, blocking until one is available.
    pub fn wait(&self) -> Result<()> {
        self.area.wait()
    }

    /// Consumes one notification or gives up with `TimedOut`.
    pub fn timed_wait(&self, timeout: Duration) -> Result<()> {
        self.area.timed_wait(timeout)
    }

    /// Payload region pointer; null when not open.
    pub fn data_ptr(&self) -> *mut u8 {
        self.area.data_ptr()
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.area.size()
    }
}

impl Default for Subscriber {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn uniq(tag: &str) -> String {
        static N: AtomicUsize = AtomicUsize::new(0);
        format!(
            "/shmring_ps_{tag}_{}_{}",
            std::process::id(),
            N.fetch_add(1, Ordering::Relaxed)
        )
    }

    #[test]
    fn notify_then_wait_consumes_banked_signal() {
        let name = uniq("banked");
        let mut publisher = Publisher::with_size(64);
        publisher.open(&name).unwrap();

        let mut subscriber = Subscriber::with_size(64);
        subscriber.open(&name).unwrap();

        publisher.notify().unwrap();
        publisher.notify().unwrap();
        subscriber.wait().unwrap();
        subscriber.wait().unwrap();
        assert_eq!(
            subscriber.timed_wait(Duration::from_millis(30)),
            Err(RingError::TimedOut)
        );

        subscriber.close();
        publisher.close();
    }

    #[test]
    fn wait_blocks_until_notified() {
        let name = uniq("block");
        let mut publisher = Publisher::with_size(64);
        publisher.open(&name).unwrap();

        let sub_name = name.clone();
        let waiter = thread::spawn(move || {
            let mut subscriber = Subscriber::with_size(64);
            subscriber.open(&sub_name).unwrap();
            subscriber.wait().unwrap();
            subscriber.close();
        });

        thread::sleep(Duration::from_millis(50));
        publisher.notify().unwrap();
        waiter.join().unwrap();
        publisher.close();
    }

    #[test]
    fn wait_before_open_is_invalid() {
        let subscriber = Subscriber::new();
        assert_eq!(subscriber.wait(), Err(RingError::InvalidParam));
        assert_eq!(
            subscriber.timed_wait(Duration::from_millis(1)),
            Err(RingError::InvalidParam)
        );
    }
}
