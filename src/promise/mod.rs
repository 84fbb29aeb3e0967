//! Single-assignment promises with ordered continuations.
//!
//! A [`Promise`] is the one asynchronous primitive in this crate: a value
//! that will be assigned exactly once, observed through continuations that
//! are scheduled onto caller-chosen [`TaskQueue`]s rather than run inline.
//! There is no polling and no thread blocking anywhere in the type.

pub mod combiner;

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};
use tracing::{error, warn};

use crate::exec::TaskQueue;

/// Unit resolution value for promises that only signal completion.
///
/// `Arc<Promise<Done>>` is the currency of job completion throughout the
/// scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Done;

/// A promise that is already resolved with [`Done`].
pub fn immediate_done() -> Arc<Promise<Done>> {
    Promise::immediate(Done)
}

struct PeekOp<T> {
    callback: Box<dyn FnOnce(&T) + Send + 'static>,
    label: String,
    queue: Arc<TaskQueue>,
}

struct ConsumeOp<T> {
    callback: Box<dyn FnOnce(T) + Send + 'static>,
    queue: Arc<TaskQueue>,
}

struct Continuations<T> {
    /// Peeks registered before resolution, in registration order.
    pending_peeks: VecDeque<PeekOp<T>>,
    /// Peeks scheduled but not yet run (includes everything still in
    /// `pending_peeks`). The consuming continuation may only fire once this
    /// hits zero.
    outstanding_peeks: usize,
    /// Cleared the moment a consuming continuation is registered; no further
    /// continuations of any kind are accepted after that.
    accepts_continuations: bool,
    consume_op: Option<ConsumeOp<T>>,
    consume_scheduled: bool,
}

/// A single-assignment asynchronous result.
///
/// The result is set exactly once with [`resolve`](Promise::resolve) and is
/// never changed afterwards (except for being moved out by the consuming
/// continuation). Readers register callbacks rather than blocking:
///
/// - [`on_success`](Promise::on_success) observes the value by reference and
///   may be registered any number of times; callbacks registered before
///   resolution fire in registration order.
/// - [`consume`](Promise::consume) receives the value by move, at most once
///   per promise, and only after every previously registered peek has run.
///
/// All callbacks are scheduled onto the [`TaskQueue`] given at registration,
/// never run inline on the resolving thread, which keeps the cooperative
/// scheduling model uniform. Every operation is thread-safe.
///
/// Promises are always handled as `Arc<Promise<T>>`; continuations keep a
/// clone of that `Arc` so the value stays alive until the scheduled work has
/// actually run.
pub struct Promise<T> {
    label: String,
    result: RwLock<Option<T>>,
    continuations: Mutex<Continuations<T>>,
}

impl<T: Send + Sync + 'static> Promise<T> {
    pub fn create() -> Arc<Self> {
        Self::create_labeled("")
    }

    /// Create an unresolved promise carrying a diagnostic label that shows up
    /// in misuse logs.
    pub fn create_labeled(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            result: RwLock::new(None),
            continuations: Mutex::new(Continuations {
                pending_peeks: VecDeque::new(),
                outstanding_peeks: 0,
                accepts_continuations: true,
                consume_op: None,
                consume_scheduled: false,
            }),
        })
    }

    /// A promise that is already resolved with `value`.
    pub fn immediate(value: T) -> Arc<Self> {
        let promise = Self::create();
        promise.resolve(value);
        promise
    }

    /// Assign the result. On success, every currently queued peek
    /// continuation is scheduled onto its bound queue in registration order,
    /// followed by the consuming continuation if one is registered and no
    /// peeks remain outstanding.
    ///
    /// Resolving twice is a logged no-op that leaves the first value intact.
    pub fn resolve(self: &Arc<Self>, value: T) {
        {
            let mut slot = self.result.write();
            if slot.is_some() {
                error!(
                    promise = %self.label,
                    "attempted to resolve an already-resolved promise"
                );
                return;
            }
            *slot = Some(value);
        }

        let mut state = self.continuations.lock();
        while let Some(op) = state.pending_peeks.pop_front() {
            self.schedule_peek(op);
        }
        self.maybe_schedule_consume(&mut state);
    }

    /// Register a callback observing the result by reference. If the promise
    /// is already resolved the callback is scheduled immediately onto
    /// `queue`; otherwise it is queued until resolution.
    ///
    /// Rejected with a warning once a consuming continuation has been
    /// registered.
    pub fn on_success(
        self: &Arc<Self>,
        callback: impl FnOnce(&T) + Send + 'static,
        queue: &Arc<TaskQueue>,
    ) {
        self.on_success_labeled(callback, queue, "");
    }

    /// [`on_success`](Promise::on_success) with a human-readable label for
    /// diagnostics.
    pub fn on_success_labeled(
        self: &Arc<Self>,
        callback: impl FnOnce(&T) + Send + 'static,
        queue: &Arc<TaskQueue>,
        label: impl Into<String>,
    ) {
        let label = label.into();
        let mut state = self.continuations.lock();
        if !state.accepts_continuations {
            warn!(
                promise = %self.label,
                op = %label,
                "peek continuation rejected: a finalizing callback is already \
                 registered on this promise"
            );
            return;
        }

        state.outstanding_peeks += 1;
        let op = PeekOp {
            callback: Box::new(callback),
            label,
            queue: Arc::clone(queue),
        };

        if self.result.read().is_some() {
            self.schedule_peek(op);
        } else {
            state.pending_peeks.push_back(op);
        }
    }

    /// Map the eventual value synchronously into a derived promise.
    pub fn then<U: Send + Sync + 'static>(
        self: &Arc<Self>,
        map: impl FnOnce(&T) -> U + Send + 'static,
        queue: &Arc<TaskQueue>,
    ) -> Arc<Promise<U>> {
        let derived = Promise::<U>::create();
        let target = Arc::clone(&derived);
        self.on_success(move |value| target.resolve(map(value)), queue);
        derived
    }

    /// Map the eventual value into another promise and forward that
    /// promise's eventual value (monadic bind).
    pub fn then_chain<U: Clone + Send + Sync + 'static>(
        self: &Arc<Self>,
        map: impl FnOnce(&T) -> Arc<Promise<U>> + Send + 'static,
        queue: &Arc<TaskQueue>,
    ) -> Arc<Promise<U>> {
        let derived = Promise::<U>::create();
        let target = Arc::clone(&derived);
        let inner_queue = Arc::clone(queue);
        self.on_success(
            move |value| {
                let inner = map(value);
                inner.on_success(move |v| target.resolve(v.clone()), &inner_queue);
            },
            queue,
        );
        derived
    }

    /// Register the single finalizing continuation, which receives the value
    /// by move. Fires only after resolution and after every peek registered
    /// before or at resolution time has run.
    ///
    /// A second consume, or any continuation registered afterwards, is a
    /// logged no-op.
    pub fn consume(
        self: &Arc<Self>,
        callback: impl FnOnce(T) + Send + 'static,
        queue: &Arc<TaskQueue>,
    ) {
        let mut state = self.continuations.lock();
        if !state.accepts_continuations {
            warn!(
                promise = %self.label,
                "consume rejected: a finalizing callback is already registered \
                 on this promise"
            );
            return;
        }

        state.accepts_continuations = false;
        state.consume_op = Some(ConsumeOp {
            callback: Box::new(callback),
            queue: Arc::clone(queue),
        });
        self.maybe_schedule_consume(&mut state);
    }

    /// True once the promise has resolved.
    pub fn is_finished(&self) -> bool {
        self.result.read().is_some()
    }

    /// Synchronous read of the resolved value.
    ///
    /// Only valid after external proof of resolution (e.g. inside a
    /// [`CombinedResult`](crate::promise::combiner::CombinedResult)); calling
    /// this on an unresolved promise is a programmer error and panics.
    pub fn sync_get(&self) -> MappedRwLockReadGuard<'_, T> {
        RwLockReadGuard::map(self.result.read(), |slot| {
            slot.as_ref()
                .expect("sync_get called on an unresolved promise")
        })
    }

    /// Synchronous move of the resolved value out of the promise. Same
    /// safety contract as [`sync_get`](Promise::sync_get); also panics if
    /// the value was already moved out.
    pub fn sync_take(&self) -> T {
        self.result
            .write()
            .take()
            .expect("sync_take called on an unresolved or already-consumed promise")
    }

    /// Hand a peek continuation to its bound queue. The scheduled task reads
    /// the (by now immutable) result, runs the callback, then retires itself
    /// from the outstanding count so a waiting finalizer can fire.
    fn schedule_peek(self: &Arc<Self>, op: PeekOp<T>) {
        let this = Arc::clone(self);
        let queue = Arc::clone(&op.queue);
        queue.add_task(move || {
            {
                let slot = this.result.read();
                match slot.as_ref() {
                    Some(value) => (op.callback)(value),
                    None => error!(
                        promise = %this.label,
                        op = %op.label,
                        "peek continuation ran before resolution; dropping"
                    ),
                }
            }

            let mut state = this.continuations.lock();
            state.outstanding_peeks -= 1;
            this.maybe_schedule_consume(&mut state);
        });
    }

    /// Schedule the consuming continuation if the promise has resolved, all
    /// peeks have run, and a finalizer is waiting.
    fn maybe_schedule_consume(self: &Arc<Self>, state: &mut Continuations<T>) {
        if state.outstanding_peeks != 0 || state.consume_scheduled {
            return;
        }
        if self.result.read().is_none() {
            return;
        }
        let Some(op) = state.consume_op.take() else {
            return;
        };
        state.consume_scheduled = true;

        let this = Arc::clone(self);
        op.queue.add_task(move || {
            match this.result.write().take() {
                Some(value) => (op.callback)(value),
                None => error!(
                    promise = %this.label,
                    "consuming continuation found no value; dropping"
                ),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pump(queue: &Arc<TaskQueue>) {
        while queue.execute_next() {}
    }

    #[test]
    fn resolves_and_notifies_pending_peek() {
        let queue = TaskQueue::new();
        let promise = Promise::<u32>::create();
        let seen = Arc::new(Mutex::new(None));

        let sink = Arc::clone(&seen);
        promise.on_success(move |v| *sink.lock() = Some(*v), &queue);
        assert!(!promise.is_finished());

        promise.resolve(7);
        assert!(promise.is_finished());
        // Nothing runs inline; the callback fires only when the queue is pumped.
        assert_eq!(*seen.lock(), None);

        pump(&queue);
        assert_eq!(*seen.lock(), Some(7));
    }

    #[test]
    fn peek_after_resolution_schedules_immediately() {
        let queue = TaskQueue::new();
        let promise = Promise::immediate("hello".to_string());

        let seen = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&seen);
        promise.on_success(move |v| sink.lock().push_str(v), &queue);

        pump(&queue);
        assert_eq!(*seen.lock(), "hello");
    }

    #[test]
    fn second_resolve_is_a_no_op() {
        let queue = TaskQueue::new();
        let promise = Promise::<u32>::create();
        promise.resolve(1);
        promise.resolve(2);

        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        promise.on_success(move |v| *sink.lock() = Some(*v), &queue);
        pump(&queue);

        assert_eq!(*seen.lock(), Some(1));
    }

    #[test]
    fn peeks_run_in_registration_order_then_consume() {
        let queue = TaskQueue::new();
        let promise = Promise::<u32>::create();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let log = Arc::clone(&log);
            promise.on_success(move |_| log.lock().push(format!("peek{i}")), &queue);
        }
        let consume_log = Arc::clone(&log);
        promise.consume(move |v| consume_log.lock().push(format!("consume{v}")), &queue);

        promise.resolve(9);
        pump(&queue);

        assert_eq!(
            *log.lock(),
            vec!["peek0", "peek1", "peek2", "consume9"]
        );
    }

    #[test]
    fn consume_on_resolved_promise_runs_after_pending_peeks() {
        let queue = TaskQueue::new();
        let promise = Promise::<u32>::create();
        let log = Arc::new(Mutex::new(Vec::new()));

        let peek_log = Arc::clone(&log);
        promise.on_success(move |_| peek_log.lock().push("peek"), &queue);
        promise.resolve(1);

        // The peek is scheduled but has not run; consume must still wait.
        let consume_log = Arc::clone(&log);
        promise.consume(move |_| consume_log.lock().push("consume"), &queue);

        pump(&queue);
        assert_eq!(*log.lock(), vec!["peek", "consume"]);
    }

    #[test]
    fn continuations_after_consume_are_rejected() {
        let queue = TaskQueue::new();
        let promise = Promise::<u32>::create();
        let count = Arc::new(AtomicUsize::new(0));

        let consumed = Arc::clone(&count);
        promise.consume(
            move |_| {
                consumed.fetch_add(1, Ordering::SeqCst);
            },
            &queue,
        );

        // Both of these are no-ops.
        let late_peek = Arc::clone(&count);
        promise.on_success(
            move |_| {
                late_peek.fetch_add(10, Ordering::SeqCst);
            },
            &queue,
        );
        let late_consume = Arc::clone(&count);
        promise.consume(
            move |_| {
                late_consume.fetch_add(100, Ordering::SeqCst);
            },
            &queue,
        );

        promise.resolve(5);
        pump(&queue);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn then_maps_into_derived_promise() {
        let queue = TaskQueue::new();
        let promise = Promise::<u32>::create();
        let doubled = promise.then(|v| v * 2, &queue);

        promise.resolve(21);
        pump(&queue);

        assert!(doubled.is_finished());
        assert_eq!(*doubled.sync_get(), 42);
    }

    #[test]
    fn then_chain_forwards_inner_promise() {
        let queue = TaskQueue::new();
        let promise = Promise::<u32>::create();
        let inner = Promise::<String>::create();

        let chained = {
            let inner = Arc::clone(&inner);
            promise.then_chain(move |_| inner, &queue)
        };

        promise.resolve(1);
        pump(&queue);
        assert!(!chained.is_finished());

        inner.resolve("done".to_string());
        pump(&queue);
        assert!(chained.is_finished());
        assert_eq!(*chained.sync_get(), "done");
    }

    #[test]
    fn sync_take_moves_the_value_out() {
        let promise = Promise::immediate(vec![1, 2, 3]);
        assert_eq!(promise.sync_take(), vec![1, 2, 3]);
    }
}
