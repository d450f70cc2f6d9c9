//! One independently mutable value per thread behind a single logical object.

use std::fmt;
use std::ops::Add;
use std::sync::Arc;

#[cfg(any(test, not(feature = "fixed-slots")))]
mod by_thread_id;
#[cfg(any(test, feature = "fixed-slots"))]
mod by_index;

#[cfg(not(feature = "fixed-slots"))]
type Slots<T> = by_thread_id::ElasticSlots<T>;
#[cfg(feature = "fixed-slots")]
type Slots<T> = by_index::FixedSlots<T>;

/// Builds the value of a slot that has not been touched yet.
pub(crate) type SlotInit<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// Storage strategy behind [`PerThreadValue`].
///
/// Implementations differ only in how slots are allocated and located; the observable
/// contract is the same.
pub(crate) trait SlotStorage<T>: Sized {
    fn new(init: SlotInit<T>) -> Self;

    /// Calls `f` with the calling thread's slot.
    fn with_current<R>(&self, f: impl FnOnce(&mut T) -> R) -> R;

    /// Folds over every allocated slot in unspecified order.
    fn fold<B>(&self, init: B, f: impl FnMut(B, &T) -> B) -> B;

    /// Overwrites every allocated slot with a fresh value from `init` and uses `init` for
    /// slots allocated later.
    fn reset_all(&self, init: SlotInit<T>);
}

/// A container holding one instance of `T` per thread.
///
/// Each thread that touches the value sees its own slot. There is no cross-thread visibility
/// except through explicit aggregation with [`accumulate()`][Self::accumulate] and
/// [`sum()`][Self::sum].
///
/// Two storage backends are available, selected at compile time:
///
/// * By default, slots are allocated lazily the first time a thread touches the value and are
///   keyed by thread ID. Slots of finished threads stay in place, so aggregation after
///   `join()` still sees their values. Slots are never removed: memory grows with the number
///   of distinct threads that ever touched the value, so a program that spawns one thread per
///   task should use a thread pool or the `fixed-slots` backend.
/// * With the `fixed-slots` feature, one slot per thread index up to
///   [`ThreadManager::max_threads()`][crate::ThreadManager::max_threads] is allocated up
///   front and looked up via [`ThreadManager::thread()`][crate::ThreadManager::thread]. The
///   first such allocation pins the thread count cap. Touching the value from more concurrent
///   threads than the cap allows panics. The slot of a finished thread keeps its value for
///   aggregation until a new thread receives the same index. That thread starts from a fresh
///   value, never from the value of its predecessor.
///
/// The type is intentionally not `Clone`.
///
/// # Examples
///
/// ```
/// use std::thread;
///
/// use section_timings::PerThreadValue;
///
/// let hits = PerThreadValue::new(0_u64);
///
/// hits.with_mut(|value| *value += 1);
///
/// thread::scope(|s| {
///     s.spawn(|| {
///         // A different thread starts from the prototype value.
///         assert_eq!(hits.get(), 0);
///         hits.with_mut(|value| *value += 10);
///     });
/// });
///
/// assert_eq!(hits.get(), 1);
/// # #[cfg(not(feature = "fixed-slots"))]
/// assert_eq!(hits.sum(), 11);
/// ```
///
/// # Reentrancy
///
/// The callbacks of [`with()`][Self::with] and [`with_mut()`][Self::with_mut] must not access
/// the same `PerThreadValue` again. The calling thread's slot is locked for the duration of
/// the callback.
pub struct PerThreadValue<T>
where
    T: Send,
{
    slots: Slots<T>,
}

impl<T> PerThreadValue<T>
where
    T: Send,
{
    /// Creates a value whose slots all start as clones of `prototype`.
    #[must_use]
    pub fn new(prototype: T) -> Self
    where
        T: Clone + Sync + 'static,
    {
        Self::with_init(move || prototype.clone())
    }

    /// Creates a value whose slots are each built by calling `init`.
    #[must_use]
    pub fn with_init(init: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            slots: Slots::new(Arc::new(init)),
        }
    }

    /// Calls `f` with a shared reference to the calling thread's value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.slots.with_current(|value| f(value))
    }

    /// Calls `f` with an exclusive reference to the calling thread's value.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.slots.with_current(f)
    }

    /// Returns a copy of the calling thread's value.
    #[must_use]
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Replaces the value of every thread with a clone of `value`. Threads that touch the value
    /// for the first time afterwards also start from `value`.
    pub fn set(&self, value: T)
    where
        T: Clone + Sync + 'static,
    {
        self.slots.reset_all(Arc::new(move || value.clone()));
    }

    /// Folds `op` over the values of all threads, starting from `init`.
    ///
    /// The order in which thread values are visited is unspecified.
    #[must_use]
    pub fn accumulate<B>(&self, init: B, op: impl FnMut(B, &T) -> B) -> B {
        self.slots.fold(init, op)
    }

    /// Adds up the values of all threads.
    #[must_use]
    pub fn sum(&self) -> T
    where
        T: Clone + Default + Add<Output = T>,
    {
        self.accumulate(T::default(), |total, value| total + value.clone())
    }
}

impl<T> fmt::Debug for PerThreadValue<T>
where
    T: Send + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self.accumulate(Vec::new(), |mut values, value| {
            values.push(format!("{value:?}"));
            values
        });

        f.debug_struct("PerThreadValue")
            .field("values", &values)
            .finish()
    }
}
