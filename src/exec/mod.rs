//! Cooperative execution primitives: FIFO task queues and the worker thread
//! that pumps them.
//!
//! Nothing in this crate ever runs a callback inline; all deferred work lands
//! on a [`TaskQueue`] and happens only when some executor calls
//! [`TaskQueue::execute_next`]. That executor can be the scheduler's own
//! drain loop, an [`ExecutorThread`], or any thread the application owns.

mod executor_thread;
mod task_queue;

pub use executor_thread::ExecutorThread;
pub use task_queue::{QueueListener, Task, TaskQueue};
