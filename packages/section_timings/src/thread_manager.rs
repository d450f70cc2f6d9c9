//! Thread count cap and stable small thread indices.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::num::NonZero;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::thread;

use crate::{Configuration, ERR_POISONED_LOCK, Error, Result, global_configuration};

/// Returns the process-wide [`ThreadManager`], creating it on first use.
///
/// The initial cap comes from `threading.max_count` in the environment configuration (see
/// [`Configuration::from_env()`]) and defaults to one thread.
#[must_use]
pub fn thread_manager() -> &'static ThreadManager {
    static INSTANCE: OnceLock<ThreadManager> = OnceLock::new();

    INSTANCE.get_or_init(|| ThreadManager::from_config(global_configuration()))
}

/// Single source of truth for how many threads may take part in a computation and which small
/// index the calling thread has.
///
/// Indices are assigned lazily the first time a thread calls [`thread()`][Self::thread], lowest
/// free index first, and stay fixed until that thread exits. An exiting thread returns its
/// index to the pool so the next new thread reuses it.
///
/// # Examples
///
/// ```
/// use section_timings::thread_manager;
///
/// let manager = thread_manager();
/// let index = manager.thread();
///
/// // Stable for the life of the thread.
/// assert_eq!(manager.thread(), index);
/// assert!(manager.current_threads() <= manager.max_threads());
/// ```
#[derive(Debug)]
pub struct ThreadManager {
    max_threads: AtomicUsize,

    // Set once fixed-size per-thread storage has been sized for `max_threads`.
    frozen: AtomicBool,

    indices: Mutex<IndexPool>,
}

#[derive(Debug, Default)]
struct IndexPool {
    next: usize,
    free: BTreeSet<usize>,
    in_use: usize,

    // Counts every index assignment, so each holder of an index gets a distinct lease ID.
    leases_issued: u64,
}

/// Holds a thread index for as long as its thread lives.
struct ThreadIndexLease {
    manager: &'static ThreadManager,
    index: usize,
    id: u64,
}

impl Drop for ThreadIndexLease {
    fn drop(&mut self) {
        self.manager.release(self.index);
    }
}

thread_local! {
    static LEASES: RefCell<Vec<ThreadIndexLease>> = const { RefCell::new(Vec::new()) };
}

impl ThreadManager {
    pub(crate) fn new(max_threads: NonZero<usize>) -> Self {
        Self {
            max_threads: AtomicUsize::new(max_threads.get()),
            frozen: AtomicBool::new(false),
            indices: Mutex::new(IndexPool::default()),
        }
    }

    pub(crate) fn from_config(config: &Configuration) -> Self {
        Self::new(
            config
                .threading_max_count()
                .unwrap_or(NonZero::<usize>::MIN),
        )
    }

    /// A suggested cap for callers that want to use the whole machine: the available
    /// parallelism of the system, or 1 if that cannot be determined.
    ///
    /// This is not applied automatically. An unconfigured cap is 1.
    #[must_use]
    pub fn default_max_threads() -> NonZero<usize> {
        thread::available_parallelism().unwrap_or(NonZero::<usize>::MIN)
    }

    /// Maximal number of threads in the current run.
    #[must_use]
    pub fn max_threads(&self) -> usize {
        self.max_threads.load(Ordering::Relaxed)
    }

    /// Number of threads that currently hold an index, never less than one and never more
    /// than [`max_threads()`][Self::max_threads].
    #[must_use]
    pub fn current_threads(&self) -> usize {
        let in_use = self.indices.lock().expect(ERR_POISONED_LOCK).in_use;

        in_use.clamp(1, self.max_threads().max(1))
    }

    /// Index of the calling thread.
    ///
    /// The first call from a thread assigns the lowest free index. Later calls from the same
    /// thread return the same value without taking any lock.
    #[must_use]
    pub fn thread(&'static self) -> usize {
        self.thread_lease().0
    }

    /// Index of the calling thread plus the ID of the lease through which it holds the index.
    ///
    /// Lease IDs are never reused, so a thread that inherits the index of an exited thread
    /// can tell that state left at that index belongs to its predecessor.
    pub(crate) fn thread_lease(&'static self) -> (usize, u64) {
        LEASES.with_borrow_mut(|leases| {
            if let Some(lease) = leases.iter().find(|lease| ptr::eq(lease.manager, self)) {
                return (lease.index, lease.id);
            }

            let (index, id) = self.acquire();
            leases.push(ThreadIndexLease {
                manager: self,
                index,
                id,
            });

            (index, id)
        })
    }

    /// Changes the maximal number of threads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidThreadCount`] if `count` is zero and
    /// [`Error::ThreadCountFrozen`] if fixed per-thread storage has already been sized for the
    /// current cap and `count` differs from it.
    pub fn set_max_threads(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Err(Error::InvalidThreadCount);
        }

        // Taken to serialize with `freeze()`.
        let _pool = self.indices.lock().expect(ERR_POISONED_LOCK);

        let current = self.max_threads();

        if current == count {
            return Ok(());
        }

        if self.frozen.load(Ordering::Relaxed) {
            return Err(Error::ThreadCountFrozen {
                current,
                requested: count,
            });
        }

        tracing::debug!(from = current, to = count, "changing maximum thread count");
        self.max_threads.store(count, Ordering::Relaxed);

        Ok(())
    }

    /// Pins the cap at its current value and returns it. Called when fixed per-thread storage
    /// is allocated, because that storage cannot follow later changes.
    pub(crate) fn freeze(&self) -> usize {
        let _pool = self.indices.lock().expect(ERR_POISONED_LOCK);

        self.frozen.store(true, Ordering::Relaxed);
        self.max_threads()
    }

    fn acquire(&self) -> (usize, u64) {
        let mut pool = self.indices.lock().expect(ERR_POISONED_LOCK);

        let index = match pool.free.pop_first() {
            Some(index) => index,
            None => {
                let index = pool.next;
                pool.next = pool.next.checked_add(1).expect(
                    "thread index space exhausted - this indicates an unrealistic scenario",
                );
                index
            }
        };

        pool.in_use = pool.in_use.saturating_add(1);

        let id = pool.leases_issued;
        pool.leases_issued = pool
            .leases_issued
            .checked_add(1)
            .expect("thread lease IDs exhausted - this indicates an unrealistic scenario");

        (index, id)
    }

    fn release(&self, index: usize) {
        let mut pool = self.indices.lock().expect(ERR_POISONED_LOCK);

        pool.free.insert(index);
        pool.in_use = pool.in_use.saturating_sub(1);
    }
}
