use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};

use super::task_queue::{QueueListener, TaskQueue};

/// How long an idle executor sleeps before re-scanning its queues. A wake
/// notification cuts the sleep short; the timeout only bounds the latency of
/// a notification lost between the scan and the sleep.
const IDLE_PARK: Duration = Duration::from_millis(2);

/// Owns one OS thread that pulls work from attached [`TaskQueue`]s.
///
/// The thread scans its queues round-robin and sleeps on a condvar when all
/// of them are empty, to be woken through the queue listener hook on the next
/// enqueue. Dropping the executor cancels the thread and joins it.
///
/// Thread pool management is deliberately this thin: the scheduler only
/// needs "something that can pull and run queued work", and applications
/// that already own worker threads can pump a [`TaskQueue`] directly
/// instead.
pub struct ExecutorThread {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

struct Shared {
    queues: RwLock<Vec<Arc<TaskQueue>>>,
    cancelled: AtomicBool,
    idle_lock: Mutex<()>,
    wake: Condvar,
}

impl QueueListener for Shared {
    fn notify_task_added(&self) {
        self.wake.notify_one();
    }
}

impl ExecutorThread {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            queues: RwLock::new(Vec::new()),
            cancelled: AtomicBool::new(false),
            idle_lock: Mutex::new(()),
            wake: Condvar::new(),
        });

        let worker = Arc::clone(&shared);
        let handle = std::thread::spawn(move || worker.run());

        Self {
            shared,
            handle: Some(handle),
        }
    }

    /// Convenience constructor: a fresh executor already pumping `queue`.
    pub fn with_queue(queue: &Arc<TaskQueue>) -> Self {
        let executor = Self::new();
        executor.add_queue(queue);
        executor
    }

    /// Attach a queue to this executor's round-robin scan.
    pub fn add_queue(&self, queue: &Arc<TaskQueue>) {
        let listener: Arc<dyn QueueListener> = Arc::clone(&self.shared) as _;
        queue.add_listener(&listener);
        self.shared.queues.write().push(Arc::clone(queue));
        self.shared.wake.notify_one();
    }
}

impl Default for ExecutorThread {
    fn default() -> Self {
        Self::new()
    }
}

impl Shared {
    fn run(&self) {
        while !self.cancelled.load(Ordering::Acquire) {
            let queues = self.queues.read().clone();

            let mut did_work = false;
            for queue in &queues {
                if queue.execute_next() {
                    did_work = true;
                }
            }

            if !did_work {
                let mut guard = self.idle_lock.lock();
                if self.cancelled.load(Ordering::Acquire) {
                    break;
                }
                self.wake.wait_for(&mut guard, IDLE_PARK);
            }
        }
    }
}

impl Drop for ExecutorThread {
    fn drop(&mut self) {
        self.shared.cancelled.store(true, Ordering::Release);
        self.shared.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn wait_until(deadline: Duration, cond: impl Fn() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn drains_attached_queue() {
        let queue = TaskQueue::new();
        let _executor = ExecutorThread::with_queue(&queue);

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            queue.add_task(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert!(wait_until(Duration::from_secs(2), || counter
            .load(Ordering::SeqCst)
            == 16));
    }

    #[test]
    fn round_robins_multiple_queues() {
        let a = TaskQueue::new();
        let b = TaskQueue::new();
        let executor = ExecutorThread::new();
        executor.add_queue(&a);
        executor.add_queue(&b);

        let counter = Arc::new(AtomicUsize::new(0));
        for queue in [&a, &b] {
            let counter = Arc::clone(&counter);
            queue.add_task(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert!(wait_until(Duration::from_secs(2), || counter
            .load(Ordering::SeqCst)
            == 2));
    }

    #[test]
    fn drop_joins_cleanly() {
        let queue = TaskQueue::new();
        let executor = ExecutorThread::with_queue(&queue);
        drop(executor);
        // The queue is still usable by cooperative pumping afterwards.
        queue.add_task(|| {});
        assert!(queue.execute_next());
    }
}
