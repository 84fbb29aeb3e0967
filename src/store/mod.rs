//! A minimal typed state store: per-entity components, context singletons,
//! and event topics.
//!
//! The scheduler treats this store as an opaque shared resource; jobs reach
//! it exclusively through the capability-gated
//! [`StoreView`](crate::access::StoreView). The raw accessors here are
//! deliberately unchecked; they are the delegation target of the view layer
//! and a convenience for tests and setup code that runs outside any
//! schedule.
//!
//! Every typed slot sits behind its own lock. Under a validated schedule
//! those locks are uncontended by construction: it is the scheduler's
//! build-time conflict analysis, not the locking, that keeps concurrent
//! jobs off the same slot.

use std::any::{Any, TypeId};
use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};

type ReadGuard<T> = ArcRwLockReadGuard<RawRwLock, T>;
type WriteGuard<T> = ArcRwLockWriteGuard<RawRwLock, T>;

type ComponentCell<T> = RwLock<HashMap<Entity, T>>;
type CtxCell<T> = RwLock<Option<T>>;
type EventCell<T> = Mutex<VecDeque<T>>;

/// Opaque entity id, minted monotonically by [`Store::create_entity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity(u64);

/// Shared mutable simulation state.
pub struct Store {
    next_entity: AtomicU64,
    components: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    contexts: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    events: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Store {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_entity: AtomicU64::new(0),
            components: RwLock::new(HashMap::new()),
            contexts: RwLock::new(HashMap::new()),
            events: RwLock::new(HashMap::new()),
        })
    }

    /// Mint a fresh entity id.
    pub fn create_entity(&self) -> Entity {
        Entity(self.next_entity.fetch_add(1, Ordering::Relaxed))
    }

    //
    // Components
    //

    /// Insert (or replace) the `T` component on `entity`.
    pub fn insert<T: Send + Sync + 'static>(&self, entity: Entity, value: T) {
        self.component_cell::<T>().write().insert(entity, value);
    }

    /// Read the `T` component on `entity`, if present.
    pub fn get<T: Send + Sync + 'static>(&self, entity: Entity) -> Option<ComponentRef<T>> {
        let guard = self.component_cell::<T>().read_arc();
        guard
            .contains_key(&entity)
            .then_some(ComponentRef { guard, entity })
    }

    /// Mutably borrow the `T` component on `entity`, if present.
    pub fn get_mut<T: Send + Sync + 'static>(&self, entity: Entity) -> Option<ComponentMut<T>> {
        let guard = self.component_cell::<T>().write_arc();
        guard
            .contains_key(&entity)
            .then_some(ComponentMut { guard, entity })
    }

    /// Detach and return the `T` component on `entity`.
    pub fn remove<T: Send + Sync + 'static>(&self, entity: Entity) -> Option<T> {
        self.component_cell::<T>().write().remove(&entity)
    }

    pub fn has<T: Send + Sync + 'static>(&self, entity: Entity) -> bool {
        self.component_cell::<T>().read().contains_key(&entity)
    }

    /// Entities currently carrying a `T` component, in ascending id order.
    pub fn entities_with<T: Send + Sync + 'static>(&self) -> Vec<Entity> {
        let mut entities: Vec<Entity> =
            self.component_cell::<T>().read().keys().copied().collect();
        entities.sort_unstable();
        entities
    }

    //
    // Context singletons
    //

    /// Set (or replace) the `T` context singleton.
    pub fn set_ctx<T: Send + Sync + 'static>(&self, value: T) {
        *self.ctx_cell::<T>().write() = Some(value);
    }

    pub fn ctx<T: Send + Sync + 'static>(&self) -> Option<CtxRef<T>> {
        let guard = self.ctx_cell::<T>().read_arc();
        guard.is_some().then_some(CtxRef { guard })
    }

    pub fn ctx_mut<T: Send + Sync + 'static>(&self) -> Option<CtxMut<T>> {
        let guard = self.ctx_cell::<T>().write_arc();
        guard.is_some().then_some(CtxMut { guard })
    }

    pub fn remove_ctx<T: Send + Sync + 'static>(&self) -> Option<T> {
        self.ctx_cell::<T>().write().take()
    }

    pub fn has_ctx<T: Send + Sync + 'static>(&self) -> bool {
        self.ctx_cell::<T>().read().is_some()
    }

    //
    // Event topics
    //

    /// Append an event to the `T` topic.
    pub fn push_event<T: Send + Sync + 'static>(&self, event: T) {
        self.event_cell::<T>().lock().push_back(event);
    }

    /// Remove and return every event currently queued on the `T` topic, in
    /// enqueue order.
    pub fn drain_events<T: Send + Sync + 'static>(&self) -> Vec<T> {
        self.event_cell::<T>().lock().drain(..).collect()
    }

    //
    // Slot cells
    //

    fn component_cell<T: Send + Sync + 'static>(&self) -> Arc<ComponentCell<T>> {
        Self::cell_in(&self.components, || ComponentCell::<T>::new(HashMap::new()))
    }

    fn ctx_cell<T: Send + Sync + 'static>(&self) -> Arc<CtxCell<T>> {
        Self::cell_in(&self.contexts, || CtxCell::<T>::new(None))
    }

    fn event_cell<T: Send + Sync + 'static>(&self) -> Arc<EventCell<T>> {
        Self::cell_in(&self.events, || EventCell::<T>::new(VecDeque::new()))
    }

    /// Fetch the typed cell for `C` out of a slot map, creating it on first
    /// touch. Cells are never removed, so the `Arc` stays valid for the
    /// store's lifetime.
    fn cell_in<C: Send + Sync + 'static>(
        slots: &RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
        init: impl FnOnce() -> C,
    ) -> Arc<C> {
        let type_id = TypeId::of::<C>();
        if let Some(cell) = slots.read().get(&type_id) {
            return Self::downcast_cell(cell);
        }

        let mut slots = slots.write();
        let cell = slots
            .entry(type_id)
            .or_insert_with(|| Arc::new(init()) as Arc<dyn Any + Send + Sync>);
        Self::downcast_cell(cell)
    }

    fn downcast_cell<C: Send + Sync + 'static>(cell: &Arc<dyn Any + Send + Sync>) -> Arc<C> {
        Arc::clone(cell)
            .downcast::<C>()
            .unwrap_or_else(|_| unreachable!("slot cell registered under a foreign TypeId"))
    }
}

/// Shared read borrow of one entity's `T` component.
pub struct ComponentRef<T> {
    guard: ReadGuard<HashMap<Entity, T>>,
    entity: Entity,
}

impl<T> Deref for ComponentRef<T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.guard
            .get(&self.entity)
            .expect("component detached while borrowed")
    }
}

/// Exclusive borrow of one entity's `T` component.
pub struct ComponentMut<T> {
    guard: WriteGuard<HashMap<Entity, T>>,
    entity: Entity,
}

impl<T> Deref for ComponentMut<T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.guard
            .get(&self.entity)
            .expect("component detached while borrowed")
    }
}

impl<T> DerefMut for ComponentMut<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard
            .get_mut(&self.entity)
            .expect("component detached while borrowed")
    }
}

/// Shared read borrow of the `T` context singleton.
pub struct CtxRef<T> {
    guard: ReadGuard<Option<T>>,
}

impl<T> Deref for CtxRef<T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.guard
            .as_ref()
            .expect("context value removed while borrowed")
    }
}

/// Exclusive borrow of the `T` context singleton.
pub struct CtxMut<T> {
    guard: WriteGuard<Option<T>>,
}

impl<T> Deref for CtxMut<T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.guard
            .as_ref()
            .expect("context value removed while borrowed")
    }
}

impl<T> DerefMut for CtxMut<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard
            .as_mut()
            .expect("context value removed while borrowed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, PartialEq)]
    struct Position(f32, f32);
    #[derive(Debug, PartialEq)]
    struct Velocity(f32, f32);
    #[derive(Debug, PartialEq)]
    struct FrameClock(u64);

    #[test]
    fn component_round_trip() {
        let store = Store::new();
        let e = store.create_entity();

        store.insert(e, Position(1.0, 2.0));
        assert!(store.has::<Position>(e));
        assert!(!store.has::<Velocity>(e));
        assert_eq!(*store.get::<Position>(e).unwrap(), Position(1.0, 2.0));

        store.get_mut::<Position>(e).unwrap().0 = 5.0;
        assert_eq!(*store.get::<Position>(e).unwrap(), Position(5.0, 2.0));

        assert_eq!(store.remove::<Position>(e), Some(Position(5.0, 2.0)));
        assert!(!store.has::<Position>(e));
    }

    #[test]
    fn entities_with_lists_in_id_order() {
        let store = Store::new();
        let a = store.create_entity();
        let b = store.create_entity();
        let c = store.create_entity();

        store.insert(c, Position(0.0, 0.0));
        store.insert(a, Position(0.0, 0.0));
        store.insert(b, Velocity(0.0, 0.0));

        assert_eq!(store.entities_with::<Position>(), vec![a, c]);
        assert_eq!(store.entities_with::<Velocity>(), vec![b]);
    }

    #[test]
    fn context_round_trip() {
        let store = Store::new();
        assert!(!store.has_ctx::<FrameClock>());

        store.set_ctx(FrameClock(1));
        assert_eq!(**store.ctx::<FrameClock>().as_ref().unwrap(), FrameClock(1));

        store.ctx_mut::<FrameClock>().unwrap().0 = 2;
        assert_eq!(store.remove_ctx::<FrameClock>(), Some(FrameClock(2)));
        assert!(!store.has_ctx::<FrameClock>());
    }

    #[test]
    fn events_drain_in_enqueue_order() {
        let store = Store::new();
        store.push_event(1u32);
        store.push_event(2u32);
        store.push_event(3u32);

        assert_eq!(store.drain_events::<u32>(), vec![1, 2, 3]);
        assert_eq!(store.drain_events::<u32>(), Vec::<u32>::new());
    }
}
