use std::any::{type_name, TypeId};
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

/// A [`TypeId`] together with the type's name, identifying one typed slot of
/// the shared store in declarations and diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct SlotId {
    id: TypeId,
    name: &'static str,
}

impl SlotId {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for SlotId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for SlotId {}

impl Hash for SlotId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

/// A job's declared read/write footprint over the shared store.
///
/// Built fluently and attached to a scheduler node:
///
/// ```
/// # use tickflow::AccessDecl;
/// struct Position;
/// struct Velocity;
/// struct FrameClock;
///
/// let decl = AccessDecl::new()
///     .writes::<Position>()
///     .reads::<Velocity>()
///     .ctx_reads::<FrameClock>();
/// assert!(decl.can_read::<Position>()); // a write implies a read
/// assert!(!decl.can_write::<Velocity>());
/// ```
///
/// The declaration is pure data; enforcement happens in
/// [`StoreView`](crate::access::StoreView) and in the scheduler's conflict
/// validation. With the `validation` feature disabled, every `can_*` query
/// returns true and the declaration is advisory only.
#[derive(Debug, Clone, Default)]
pub struct AccessDecl {
    allow_all: bool,
    reads: HashSet<SlotId>,
    writes: HashSet<SlotId>,
    ctx_reads: HashSet<SlotId>,
    ctx_writes: HashSet<SlotId>,
    evt_writes: HashSet<SlotId>,
    evt_consumes: HashSet<SlotId>,
}

impl AccessDecl {
    pub fn new() -> Self {
        Self::default()
    }

    /// An "allow everything" declaration for trusted or bootstrap code paths
    /// that sit outside the scheduled graph. Thin declarations carry no slot
    /// lists, so they are invisible to conflict analysis.
    pub fn thin() -> Self {
        Self {
            allow_all: true,
            ..Self::default()
        }
    }

    /// Declare a read of the `T` component slot.
    pub fn reads<T: 'static>(mut self) -> Self {
        self.reads.insert(SlotId::of::<T>());
        self
    }

    /// Declare a write of the `T` component slot (implies a read).
    pub fn writes<T: 'static>(mut self) -> Self {
        self.writes.insert(SlotId::of::<T>());
        self.reads.insert(SlotId::of::<T>());
        self
    }

    /// Declare a read of the `T` context singleton.
    pub fn ctx_reads<T: 'static>(mut self) -> Self {
        self.ctx_reads.insert(SlotId::of::<T>());
        self
    }

    /// Declare a write of the `T` context singleton (implies a read).
    pub fn ctx_writes<T: 'static>(mut self) -> Self {
        self.ctx_writes.insert(SlotId::of::<T>());
        self.ctx_reads.insert(SlotId::of::<T>());
        self
    }

    /// Declare enqueues onto the `T` event topic.
    pub fn evt_writes<T: 'static>(mut self) -> Self {
        self.evt_writes.insert(SlotId::of::<T>());
        self
    }

    /// Declare consumption of the `T` event topic.
    pub fn evt_consumes<T: 'static>(mut self) -> Self {
        self.evt_consumes.insert(SlotId::of::<T>());
        self
    }

    /// Union another declaration into this one. Used when a job delegates to
    /// subroutines carrying their own declared footprint.
    pub fn merge_in_decl(mut self, other: &AccessDecl) -> Self {
        self.allow_all |= other.allow_all;
        self.reads.extend(&other.reads);
        self.writes.extend(&other.writes);
        self.ctx_reads.extend(&other.ctx_reads);
        self.ctx_writes.extend(&other.ctx_writes);
        self.evt_writes.extend(&other.evt_writes);
        self.evt_consumes.extend(&other.evt_consumes);
        self
    }

    pub fn can_read<T: 'static>(&self) -> bool {
        self.allows(&self.reads, SlotId::of::<T>())
    }

    pub fn can_write<T: 'static>(&self) -> bool {
        self.allows(&self.writes, SlotId::of::<T>())
    }

    pub fn can_ctx_read<T: 'static>(&self) -> bool {
        self.allows(&self.ctx_reads, SlotId::of::<T>())
    }

    pub fn can_ctx_write<T: 'static>(&self) -> bool {
        self.allows(&self.ctx_writes, SlotId::of::<T>())
    }

    pub fn can_evt_write<T: 'static>(&self) -> bool {
        self.allows(&self.evt_writes, SlotId::of::<T>())
    }

    pub fn can_evt_consume<T: 'static>(&self) -> bool {
        self.allows(&self.evt_consumes, SlotId::of::<T>())
    }

    fn allows(&self, set: &HashSet<SlotId>, slot: SlotId) -> bool {
        if cfg!(not(feature = "validation")) {
            return true;
        }
        self.allow_all || set.contains(&slot)
    }

    // Slot listings for the scheduler's conflict analysis.

    pub fn list_reads(&self) -> &HashSet<SlotId> {
        &self.reads
    }
    pub fn list_writes(&self) -> &HashSet<SlotId> {
        &self.writes
    }
    pub fn list_ctx_reads(&self) -> &HashSet<SlotId> {
        &self.ctx_reads
    }
    pub fn list_ctx_writes(&self) -> &HashSet<SlotId> {
        &self.ctx_writes
    }
    pub fn list_evt_writes(&self) -> &HashSet<SlotId> {
        &self.evt_writes
    }
    pub fn list_evt_consumes(&self) -> &HashSet<SlotId> {
        &self.evt_consumes
    }
}
