// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements named counting semaphores with per-thread registration.
//!
//! Semaphores are created by name: creating a name that already exists
//! registers the caller with the existing semaphore and returns its id.
//! Only registered threads may perform [`p`], [`v`], or
//! [`destroy_semaphore`] on it. Destroying deregisters the caller; when
//! the last registrant leaves, any remaining waiters are woken (they
//! observe the semaphore as destroyed and fail with not-found) and the
//! semaphore is removed from the registry.
//!
//! `p` uses the classical semantics: the count is re-checked under an
//! atomic section after every wake, and only a positive count is
//! decremented, so a thread can never pass on a count it did not own.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use ember_abi::Error;
use interrupts::with_atomic;
use multitasking::{current_thread, wait, wake_up, wake_up_one, ThreadId, WaitQueue};

/// The longest allowed semaphore name, in bytes.
///
pub const MAX_SEMAPHORE_NAME: usize = 25;

/// The largest number of threads that may be registered
/// with one semaphore at a time.
///
pub const MAX_REGISTERED_THREADS: usize = 60;

/// Identifies a live semaphore. Ids are allocated
/// monotonically from 1 and never reused.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SemaphoreId(pub u64);

impl SemaphoreId {
    /// Returns a numerical representation for the
    /// semaphore id.
    ///
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

/// A named counting semaphore.
///
#[derive(Debug)]
struct Semaphore {
    id: SemaphoreId,
    name: String,

    // The current count. Mutated only inside atomic
    // sections.
    count: AtomicU64,

    // The threads allowed to operate on this semaphore.
    registered: spin::Mutex<Vec<ThreadId>>,

    // Set when the last registrant deregisters. Woken
    // waiters check this and bail out.
    destroyed: AtomicBool,

    waiters: WaitQueue,
}

impl Semaphore {
    fn is_registered(&self, thread: ThreadId) -> bool {
        self.registered.lock().contains(&thread)
    }
}

/// The named semaphore registry.
///
pub(crate) struct SemaphoreRegistry {
    semaphores: Vec<Arc<Semaphore>>,
    next_id: u64,
}

impl SemaphoreRegistry {
    const fn new() -> Self {
        SemaphoreRegistry {
            semaphores: Vec::new(),
            next_id: 1,
        }
    }

    fn find_by_name(&self, name: &str) -> Option<Arc<Semaphore>> {
        self.semaphores
            .iter()
            .find(|sem| sem.name == name)
            .cloned()
    }

    fn get(&self, id: SemaphoreId) -> Option<Arc<Semaphore>> {
        self.semaphores.iter().find(|sem| sem.id == id).cloned()
    }

    /// Creates a semaphore named `name` with the given
    /// initial count, or registers `caller` with the
    /// existing semaphore of that name. Returns its id.
    ///
    fn create(
        &mut self,
        caller: ThreadId,
        name: &str,
        initial_count: i64,
    ) -> Result<SemaphoreId, Error> {
        if name.is_empty() || name.len() > MAX_SEMAPHORE_NAME {
            return Err(Error::InvalidArgument);
        }
        if name.bytes().any(|b| b == 0) {
            return Err(Error::InvalidArgument);
        }
        if initial_count < 0 {
            return Err(Error::InvalidArgument);
        }

        let semaphore = match self.find_by_name(name) {
            Some(semaphore) => semaphore,
            None => {
                let semaphore = Arc::new(Semaphore {
                    id: SemaphoreId(self.next_id),
                    name: String::from(name),
                    count: AtomicU64::new(initial_count as u64),
                    registered: spin::Mutex::new(Vec::new()),
                    destroyed: AtomicBool::new(false),
                    waiters: WaitQueue::new(),
                });

                self.next_id += 1;
                self.semaphores.push(semaphore.clone());
                semaphore
            }
        };

        let mut registered = semaphore.registered.lock();
        if registered.len() == MAX_REGISTERED_THREADS {
            return Err(Error::Busy);
        }
        if !registered.contains(&caller) {
            registered.push(caller);
        }

        Ok(semaphore.id)
    }

    /// Removes `caller` from the semaphore's registered
    /// set. If the set becomes empty, the semaphore is
    /// removed from the registry and returned so the
    /// caller can wake any remaining waiters.
    ///
    fn deregister(
        &mut self,
        caller: ThreadId,
        id: SemaphoreId,
    ) -> Result<Option<Arc<Semaphore>>, Error> {
        let semaphore = self.get(id).ok_or(Error::NotFound)?;

        let empty = {
            let mut registered = semaphore.registered.lock();
            if !registered.contains(&caller) {
                return Err(Error::AccessDenied);
            }

            registered.retain(|&thread| thread != caller);
            registered.is_empty()
        };

        if !empty {
            return Ok(None);
        }

        semaphore.destroyed.store(true, Ordering::SeqCst);
        self.semaphores.retain(|sem| sem.id != id);

        Ok(Some(semaphore))
    }
}

/// REGISTRY holds every live named semaphore.
///
static REGISTRY: spin::Mutex<SemaphoreRegistry> = spin::Mutex::new(SemaphoreRegistry::new());

/// Creates a semaphore with the given name and initial
/// count, or registers the calling thread with the
/// existing semaphore of that name. Returns the semaphore
/// id used with [`p`], [`v`], and [`destroy_semaphore`].
///
pub fn create_semaphore(name: &str, initial_count: i64) -> Result<SemaphoreId, Error> {
    let caller = current_thread().id();
    with_atomic(|| REGISTRY.lock().create(caller, name, initial_count))
}

/// Looks up a semaphore, checking that the calling thread
/// is registered with it.
///
fn checked_lookup(id: SemaphoreId) -> Result<Arc<Semaphore>, Error> {
    let semaphore = REGISTRY.lock().get(id).ok_or(Error::NotFound)?;
    if !semaphore.is_registered(current_thread().id()) {
        return Err(Error::AccessDenied);
    }

    Ok(semaphore)
}

/// Acquires the semaphore, blocking while its count is
/// zero.
///
pub fn p(id: SemaphoreId) -> Result<(), Error> {
    with_atomic(|| {
        let semaphore = checked_lookup(id)?;

        loop {
            if semaphore.destroyed.load(Ordering::SeqCst) {
                // The semaphore was destroyed while we
                // waited.
                return Err(Error::NotFound);
            }

            let count = semaphore.count.load(Ordering::SeqCst);
            if count > 0 {
                semaphore.count.store(count - 1, Ordering::SeqCst);

                // The count may still be positive if several
                // releases arrived together; pass the wakeup
                // on so no waiter is stranded.
                if count > 1 {
                    wake_up_one(&semaphore.waiters);
                }

                return Ok(());
            }

            wait(&semaphore.waiters);
        }
    })
}

/// Releases the semaphore, waking a waiter if the count
/// was zero.
///
pub fn v(id: SemaphoreId) -> Result<(), Error> {
    with_atomic(|| {
        let semaphore = checked_lookup(id)?;

        let count = semaphore.count.load(Ordering::SeqCst) + 1;
        semaphore.count.store(count, Ordering::SeqCst);
        if count == 1 {
            wake_up_one(&semaphore.waiters);
        }

        Ok(())
    })
}

/// Deregisters the calling thread from the semaphore.
///
/// When the last registered thread leaves, any waiters are
/// woken (and observe the destruction) and the semaphore
/// is removed from the registry.
///
pub fn destroy_semaphore(id: SemaphoreId) -> Result<(), Error> {
    let caller = current_thread().id();
    with_atomic(|| {
        let destroyed = REGISTRY.lock().deregister(caller, id)?;
        if let Some(semaphore) = destroyed {
            wake_up(&semaphore.waiters);
        }

        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::SemaphoreId;
    use super::SemaphoreRegistry;
    use super::MAX_REGISTERED_THREADS;
    use core::sync::atomic::Ordering;
    use ember_abi::Error;
    use multitasking::ThreadId;

    #[test]
    fn test_create_and_reuse_by_name() {
        let mut registry = SemaphoreRegistry::new();

        let first = registry
            .create(ThreadId(1), "ping", 1)
            .expect("create failed");
        assert_eq!(first, SemaphoreId(1));

        // Creating the same name registers the caller and
        // returns the existing id.
        let again = registry
            .create(ThreadId(2), "ping", 7)
            .expect("create failed");
        assert_eq!(again, first);

        let semaphore = registry.get(first).expect("semaphore not discoverable");
        assert_eq!(semaphore.count.load(Ordering::SeqCst), 1);
        assert!(semaphore.is_registered(ThreadId(1)));
        assert!(semaphore.is_registered(ThreadId(2)));

        // A different name allocates the next id.
        let other = registry
            .create(ThreadId(1), "pong", 0)
            .expect("create failed");
        assert_eq!(other, SemaphoreId(2));
    }

    #[test]
    fn test_invalid_names_and_counts() {
        let mut registry = SemaphoreRegistry::new();

        assert_eq!(
            registry.create(ThreadId(1), "", 0),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            registry.create(ThreadId(1), "a-name-well-over-the-25-byte-limit", 0),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            registry.create(ThreadId(1), "nul\0name", 0),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            registry.create(ThreadId(1), "ok", -1),
            Err(Error::InvalidArgument)
        );
    }

    #[test]
    fn test_registration_cap() {
        let mut registry = SemaphoreRegistry::new();
        for i in 0..MAX_REGISTERED_THREADS {
            registry
                .create(ThreadId(i as u64 + 1), "crowded", 0)
                .expect("create failed");
        }

        assert_eq!(
            registry.create(ThreadId(999), "crowded", 0),
            Err(Error::Busy)
        );
    }

    #[test]
    fn test_deregister_and_destroy() {
        let mut registry = SemaphoreRegistry::new();
        let id = registry
            .create(ThreadId(1), "shared", 0)
            .expect("create failed");
        registry
            .create(ThreadId(2), "shared", 0)
            .expect("create failed");

        // A thread that never registered cannot leave.
        assert_eq!(
            registry.deregister(ThreadId(3), id).unwrap_err(),
            Error::AccessDenied
        );

        // The first deregistration leaves the semaphore
        // alive and discoverable.
        assert!(registry
            .deregister(ThreadId(1), id)
            .expect("deregister failed")
            .is_none());
        assert!(registry.get(id).is_some());

        // The last deregistration destroys it.
        let destroyed = registry
            .deregister(ThreadId(2), id)
            .expect("deregister failed")
            .expect("semaphore should be destroyed");
        assert!(destroyed.destroyed.load(Ordering::SeqCst));
        assert!(registry.get(id).is_none());

        // Unknown ids report not-found.
        assert_eq!(
            registry.deregister(ThreadId(2), id).unwrap_err(),
            Error::NotFound
        );

        // The id is not reused.
        let next = registry
            .create(ThreadId(1), "shared", 0)
            .expect("create failed");
        assert_eq!(next, SemaphoreId(2));
    }
}
