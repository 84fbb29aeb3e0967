use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// A single queued unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Observer notified whenever a task lands on a queue.
///
/// Used by [`ExecutorThread`](crate::exec::ExecutorThread) to wake from an
/// idle sleep; the notification carries no payload and may be spurious.
pub trait QueueListener: Send + Sync {
    fn notify_task_added(&self);
}

/// A thread-safe FIFO of pending callables, drained cooperatively.
///
/// There is no implicit parallelism: tasks only run when someone calls
/// [`execute_next`](TaskQueue::execute_next). Any number of threads may pump
/// the same queue concurrently; the internal lock is the only point of
/// mutual exclusion, and it is never held while a task body runs.
///
/// Multiple independent queues usually exist at once (one per worker pool
/// plus one representing "main thread only" work), and promise continuations
/// are each bound to the queue they should execute on.
pub struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
    listeners: Mutex<Vec<Weak<dyn QueueListener>>>,
}

impl TaskQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(VecDeque::new()),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Enqueue a task at the back of the queue.
    pub fn add_task(&self, task: impl FnOnce() + Send + 'static) {
        self.tasks.lock().push_back(Box::new(task));

        let mut listeners = self.listeners.lock();
        listeners.retain(|l| match l.upgrade() {
            Some(l) => {
                l.notify_task_added();
                true
            }
            None => false,
        });
    }

    /// Remove and run exactly one task, FIFO order. Returns whether a task
    /// was available. The task body runs outside the queue lock.
    pub fn execute_next(&self) -> bool {
        let task = self.tasks.lock().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Register a listener to be poked on every enqueue. Held weakly; dead
    /// listeners are pruned lazily.
    pub fn add_listener(&self, listener: &Arc<dyn QueueListener>) {
        self.listeners.lock().push(Arc::downgrade(listener));
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}
