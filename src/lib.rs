//! Cooperative dependency-graph job scheduling for real-time simulation loops.
//!
//! `tickflow` lets many independent units of simulation logic declare, up
//! front, exactly which pieces of shared state they read and write, and
//! guarantees that jobs only run concurrently when their declared access sets
//! cannot conflict. Everything is built on a small single-assignment promise
//! runtime drained cooperatively from plain FIFO task queues, so the owning
//! application stays in full control of its threads.
//!
//! The pieces, leaves first:
//!
//! - [`Promise`]: a single-assignment asynchronous result with ordered
//!   continuations and an at-most-once consuming finalizer.
//! - [`TaskQueue`]: a thread-safe FIFO of pending work, pumped by whoever
//!   calls [`TaskQueue::execute_next`] (e.g. an [`ExecutorThread`]).
//! - [`PromiseCombiner`]: joins N promises of different types into one
//!   promise of a result bundle with synchronous typed lookup.
//! - [`AccessDecl`]: a job's declared read/write footprint over the shared
//!   [`Store`], enforced at access time by [`StoreView`].
//! - [`SchedulerBuilder`] / [`Scheduler`]: turns capability-annotated jobs
//!   with explicit dependency edges into a validated, concurrently-executed
//!   job graph, built once and executed once per simulation tick.

// Core infrastructure
pub mod errors;

// Cooperative execution primitives
pub mod exec;
pub mod promise;

// Shared-state access control
pub mod access;
pub mod store;

// Job graph construction and execution
pub mod schedule;

// Re-exports for convenience
pub use access::{AccessDecl, SlotId, StoreView};
pub use errors::{ConflictKind, Result, ScheduleError};
pub use exec::{ExecutorThread, QueueListener, TaskQueue};
pub use promise::combiner::{CombinedResult, CombinerKey, PromiseCombiner};
pub use promise::{immediate_done, Done, Promise};
pub use schedule::{NodeBuilder, NodeHandle, NodeId, Scheduler, SchedulerBuilder};
pub use store::{Entity, Store};
