//! Capability declarations and the gated accessor over the shared store.
//!
//! A job's [`AccessDecl`] is pure data: the set of typed slots it intends to
//! read and write. It has no effect on its own; it is consumed by the
//! [`StoreView`] handed to the job (which asserts a matching capability
//! before permitting each typed access) and by the scheduler's build-time
//! conflict analysis, which refuses to build a graph where overlapping
//! declarations are left unordered.

mod decl;
mod view;

pub use decl::{AccessDecl, SlotId};
pub use view::{ComponentSet, StoreView};
