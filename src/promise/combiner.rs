//! Joining heterogeneous promises: the all-of combinator.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{MappedRwLockReadGuard, Mutex};

use super::Promise;
use crate::exec::TaskQueue;

/// Typed handle into a [`CombinedResult`], returned by
/// [`PromiseCombiner::add`].
///
/// Keys are plain data: copyable, usable before the underlying promise has
/// resolved (they only index into the eventual bundle), and only
/// constructible by the combiner that owns them.
pub struct CombinerKey<T> {
    key: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for CombinerKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for CombinerKey<T> {}

impl<T> std::fmt::Debug for CombinerKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CombinerKey").field(&self.key).finish()
    }
}

struct Entry {
    key: u32,
    /// Type-erased `Arc<Promise<T>>`; recovered by downcast through the
    /// typed key.
    promise: Arc<dyn Any + Send + Sync>,
    resolved: bool,
}

struct State {
    entries: Vec<Entry>,
    combine_requested: bool,
    finished: bool,
}

/// Joins N promises of possibly different result types into one promise that
/// resolves once every input has resolved, regardless of resolution order.
///
/// ```
/// # use std::sync::Arc;
/// # use tickflow::{Promise, PromiseCombiner, TaskQueue};
/// let queue = TaskQueue::new();
/// let combiner = PromiseCombiner::create();
///
/// let number = Promise::<u32>::create();
/// let name = Promise::<String>::create();
/// let number_key = combiner.add(&number, &queue);
/// let name_key = combiner.add(&name, &queue);
///
/// combiner.combine().on_success(
///     move |bundle| {
///         let n = *bundle.get(number_key);
///         let s = bundle.take(name_key);
///         assert_eq!((n, s.as_str()), (7, "seven"));
///     },
///     &queue,
/// );
///
/// name.resolve("seven".into());
/// number.resolve(7);
/// while queue.execute_next() {}
/// ```
///
/// Entries may only be added before [`combine`](PromiseCombiner::combine) is
/// requested, and combination may only be requested once; violating either
/// is a programmer error and panics.
pub struct PromiseCombiner {
    next_key: AtomicU32,
    state: Mutex<State>,
    combined: Arc<Promise<CombinedResult>>,
}

impl PromiseCombiner {
    pub fn create() -> Arc<Self> {
        Arc::new(Self {
            next_key: AtomicU32::new(1),
            state: Mutex::new(State {
                entries: Vec::new(),
                combine_requested: false,
                finished: false,
            }),
            combined: Promise::create_labeled("combiner"),
        })
    }

    /// Register a promise under a fresh typed key. An internal peek
    /// continuation (bound to `queue`) marks the entry resolved; the
    /// combiner itself is held weakly so an abandoned combiner does not keep
    /// its inputs alive.
    pub fn add<T: Send + Sync + 'static>(
        self: &Arc<Self>,
        promise: &Arc<Promise<T>>,
        queue: &Arc<TaskQueue>,
    ) -> CombinerKey<T> {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);

        {
            let mut state = self.state.lock();
            assert!(
                !state.combine_requested,
                "promise added to a combiner after combine() was requested"
            );
            state.entries.push(Entry {
                key,
                promise: Arc::clone(promise) as Arc<dyn Any + Send + Sync>,
                resolved: false,
            });
        }

        let combiner: Weak<Self> = Arc::downgrade(self);
        promise.on_success_labeled(
            move |_| {
                if let Some(combiner) = combiner.upgrade() {
                    combiner.mark_resolved(key);
                }
            },
            queue,
            "combiner-entry",
        );

        CombinerKey {
            key,
            _marker: PhantomData,
        }
    }

    /// Freeze the entry list and return the combined promise, which resolves
    /// once every registered entry has resolved (immediately if all of them
    /// already have, including the zero-entry case).
    ///
    /// Panics if combination was already requested.
    pub fn combine(self: &Arc<Self>) -> Arc<Promise<CombinedResult>> {
        let ready = {
            let mut state = self.state.lock();
            assert!(
                !state.combine_requested,
                "combine() requested twice on the same combiner"
            );
            state.combine_requested = true;
            state.entries.iter().all(|e| e.resolved)
        };

        if ready {
            self.finish();
        }
        Arc::clone(&self.combined)
    }

    /// Monadic-bind variant of [`combine`](PromiseCombiner::combine): feeds
    /// the result bundle into `map` and forwards the eventual value of the
    /// promise it produces.
    pub fn combine_chaining<U: Clone + Send + Sync + 'static>(
        self: &Arc<Self>,
        map: impl FnOnce(CombinedResult) -> Arc<Promise<U>> + Send + 'static,
        queue: &Arc<TaskQueue>,
    ) -> Arc<Promise<U>> {
        let derived = Promise::<U>::create();
        let target = Arc::clone(&derived);
        let inner_queue = Arc::clone(queue);
        self.combine().consume(
            move |bundle| {
                let inner = map(bundle);
                inner.on_success(move |v| target.resolve(v.clone()), &inner_queue);
            },
            queue,
        );
        derived
    }

    fn mark_resolved(self: &Arc<Self>, key: u32) {
        let all_resolved = {
            let mut state = self.state.lock();
            if let Some(entry) = state.entries.iter_mut().find(|e| e.key == key) {
                entry.resolved = true;
            }
            state.combine_requested && state.entries.iter().all(|e| e.resolved)
        };

        if all_resolved {
            self.finish();
        }
    }

    /// Resolve the combined promise exactly once.
    fn finish(self: &Arc<Self>) {
        let entries = {
            let mut state = self.state.lock();
            if state.finished {
                return;
            }
            state.finished = true;
            state
                .entries
                .iter()
                .map(|e| (e.key, Arc::clone(&e.promise)))
                .collect()
        };

        self.combined.resolve(CombinedResult { entries });
    }
}

/// The resolved bundle of a [`PromiseCombiner`]: synchronous, type-checked
/// lookup of every joined value.
///
/// Only ever observed through the combined promise, i.e. strictly after all
/// inputs have resolved, which is what makes the synchronous accessors
/// safe. Looking up a key that did not come from the owning combiner is a
/// programmer error and panics.
pub struct CombinedResult {
    entries: Vec<(u32, Arc<dyn Any + Send + Sync>)>,
}

impl CombinedResult {
    /// Borrow the value joined under `key`.
    pub fn get<T: Send + Sync + 'static>(
        &self,
        key: CombinerKey<T>,
    ) -> MappedRwLockReadGuard<'_, T> {
        self.promise_for(key).sync_get()
    }

    /// Move the value joined under `key` out of the bundle. May be called at
    /// most once per key.
    pub fn take<T: Send + Sync + 'static>(&self, key: CombinerKey<T>) -> T {
        self.promise_for(key).sync_take()
    }

    fn promise_for<T: Send + Sync + 'static>(&self, key: CombinerKey<T>) -> &Promise<T> {
        let (_, promise) = self
            .entries
            .iter()
            .find(|(k, _)| *k == key.key)
            .expect("combiner key does not belong to this result bundle");
        promise
            .downcast_ref::<Promise<T>>()
            .expect("combiner key type does not match its entry")
    }
}
