use std::collections::{HashMap, hash_map};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, ThreadId};

use hash_hasher::HashBuildHasher;

use crate::ERR_POISONED_LOCK;
use crate::per_thread_value::{SlotInit, SlotStorage};

/// Slots allocated on first touch and keyed by thread ID.
///
/// A slot is never removed, so values written by threads that have since exited remain
/// visible to aggregation. The map therefore grows by one slot per distinct thread.
pub(crate) struct ElasticSlots<T> {
    init: RwLock<SlotInit<T>>,

    // The write lock is only held when a thread touches the value for the first time. Steady
    // state access only takes the read lock plus the uncontended per-slot mutex.
    slots: RwLock<HashMap<ThreadId, Arc<Mutex<T>>, HashBuildHasher>>,
}

impl<T> ElasticSlots<T> {
    fn current_slot(&self) -> Arc<Mutex<T>> {
        let thread_id = thread::current().id();

        {
            let slots = self.slots.read().expect(ERR_POISONED_LOCK);

            if let Some(slot) = slots.get(&thread_id) {
                return Arc::clone(slot);
            }
        }

        // Built outside the map lock because `init` is arbitrary user code.
        let init = Arc::clone(&self.init.read().expect(ERR_POISONED_LOCK));
        let slot = Arc::new(Mutex::new(init()));

        let mut slots = self.slots.write().expect(ERR_POISONED_LOCK);

        match slots.entry(thread_id) {
            hash_map::Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            hash_map::Entry::Vacant(vacant) => Arc::clone(vacant.insert(slot)),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.read().expect(ERR_POISONED_LOCK).len()
    }
}

impl<T> SlotStorage<T> for ElasticSlots<T> {
    fn new(init: SlotInit<T>) -> Self {
        Self {
            init: RwLock::new(init),
            slots: RwLock::new(HashMap::with_hasher(HashBuildHasher::default())),
        }
    }

    fn with_current<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let slot = self.current_slot();
        let mut value = slot.lock().expect(ERR_POISONED_LOCK);

        f(&mut value)
    }

    fn fold<B>(&self, init: B, mut f: impl FnMut(B, &T) -> B) -> B {
        let slots = self.slots.read().expect(ERR_POISONED_LOCK);

        slots.values().fold(init, |acc, slot| {
            let value = slot.lock().expect(ERR_POISONED_LOCK);
            f(acc, &value)
        })
    }

    fn reset_all(&self, init: SlotInit<T>) {
        let slots = self.slots.write().expect(ERR_POISONED_LOCK);

        for slot in slots.values() {
            *slot.lock().expect(ERR_POISONED_LOCK) = init();
        }

        *self.init.write().expect(ERR_POISONED_LOCK) = init;
    }
}

impl<T> fmt::Debug for ElasticSlots<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.slots.read().expect(ERR_POISONED_LOCK).len();

        f.debug_struct("ElasticSlots")
            .field("slots", &count)
            .finish_non_exhaustive()
    }
}
