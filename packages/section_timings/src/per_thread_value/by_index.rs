use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use crate::per_thread_value::{SlotInit, SlotStorage};
use crate::{ERR_POISONED_LOCK, ThreadManager, thread_manager};

/// One slot per thread index, allocated up front for the current thread count cap.
///
/// Each slot remembers the lease through which its thread holds the index. A thread that
/// inherits the index of an exited thread finds a foreign lease and starts over from a fresh
/// value. Until then, the value of the exited thread stays visible to aggregation.
pub(crate) struct FixedSlots<T> {
    manager: &'static ThreadManager,
    init: RwLock<SlotInit<T>>,
    slots: Box<[Mutex<Slot<T>>]>,
}

struct Slot<T> {
    // `None` until the first thread touches the slot.
    lease: Option<u64>,
    value: T,
}

impl<T> FixedSlots<T> {
    pub(crate) fn new_in(manager: &'static ThreadManager, init: SlotInit<T>) -> Self {
        let count = manager.freeze();

        let slots = (0..count)
            .map(|_| {
                Mutex::new(Slot {
                    lease: None,
                    value: init(),
                })
            })
            .collect();

        Self {
            manager,
            init: RwLock::new(init),
            slots,
        }
    }
}

impl<T> SlotStorage<T> for FixedSlots<T> {
    fn new(init: SlotInit<T>) -> Self {
        Self::new_in(thread_manager(), init)
    }

    fn with_current<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let (index, lease) = self.manager.thread_lease();

        let Some(slot) = self.slots.get(index) else {
            panic!(
                "thread index {index} has no slot: only {} concurrent threads are allowed by the thread count cap",
                self.slots.len()
            );
        };

        let mut slot = slot.lock().expect(ERR_POISONED_LOCK);

        if slot.lease != Some(lease) {
            if slot.lease.is_some() {
                let init = Arc::clone(&self.init.read().expect(ERR_POISONED_LOCK));
                slot.value = init();
            }

            slot.lease = Some(lease);
        }

        f(&mut slot.value)
    }

    fn fold<B>(&self, init: B, mut f: impl FnMut(B, &T) -> B) -> B {
        self.slots.iter().fold(init, |acc, slot| {
            let slot = slot.lock().expect(ERR_POISONED_LOCK);
            f(acc, &slot.value)
        })
    }

    fn reset_all(&self, init: SlotInit<T>) {
        // Replaced before the slots are touched, so `with_current()` never waits on the init
        // lock while this holds a slot lock.
        *self.init.write().expect(ERR_POISONED_LOCK) = Arc::clone(&init);

        for slot in self.slots.iter() {
            slot.lock().expect(ERR_POISONED_LOCK).value = init();
        }
    }
}

impl<T> fmt::Debug for FixedSlots<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedSlots")
            .field("slots", &self.slots.len())
            .finish_non_exhaustive()
    }
}
