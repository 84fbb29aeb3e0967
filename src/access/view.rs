use std::any::type_name;
use std::sync::Arc;

use tracing::error;

use super::decl::AccessDecl;
use crate::store::{ComponentMut, ComponentRef, CtxMut, CtxRef, Entity, Store};

/// Capability-gated accessor over the shared [`Store`].
///
/// A view is constructed per job invocation from the job's declared
/// [`AccessDecl`]; every typed operation asserts the matching capability
/// before delegating to the store. An access outside the declared footprint
/// means the job lied to the scheduler about its footprint, which silently
/// invalidates the conflict analysis; it panics with the offending method
/// and type.
///
/// With the `validation` feature disabled the checks compile down to direct
/// delegation.
pub struct StoreView {
    store: Arc<Store>,
    decl: AccessDecl,
}

impl StoreView {
    pub fn new(store: Arc<Store>, decl: AccessDecl) -> Self {
        Self { store, decl }
    }

    /// An allow-everything view for trusted or bootstrap code paths.
    pub fn thin(store: Arc<Store>) -> Self {
        Self::new(store, AccessDecl::thin())
    }

    /// The declaration this view enforces.
    pub fn decl(&self) -> &AccessDecl {
        &self.decl
    }

    /// Mint a fresh entity.
    pub fn create(&self) -> Entity {
        self.store.create_entity()
    }

    //
    // Components
    //

    pub fn read<T: Send + Sync + 'static>(&self, entity: Entity) -> Option<ComponentRef<T>> {
        self.check::<T>(self.decl.can_read::<T>(), "read");
        self.store.get(entity)
    }

    pub fn write<T: Send + Sync + 'static>(&self, entity: Entity) -> Option<ComponentMut<T>> {
        self.check::<T>(self.decl.can_write::<T>(), "write");
        self.store.get_mut(entity)
    }

    pub fn has<T: Send + Sync + 'static>(&self, entity: Entity) -> bool {
        self.check::<T>(self.decl.can_read::<T>(), "has");
        self.store.has::<T>(entity)
    }

    /// Attach (or replace) the `T` component on `entity`.
    pub fn attach<T: Send + Sync + 'static>(&self, entity: Entity, value: T) {
        self.check::<T>(self.decl.can_write::<T>(), "attach");
        self.store.insert(entity, value);
    }

    pub fn remove<T: Send + Sync + 'static>(&self, entity: Entity) -> Option<T> {
        self.check::<T>(self.decl.can_write::<T>(), "remove");
        self.store.remove(entity)
    }

    /// Entities carrying every component type in the tuple `Q`, e.g.
    /// `view.entities::<(Position, Velocity)>()`. Requires read capability
    /// on each member; access to the components themselves still goes
    /// through [`read`](StoreView::read) / [`write`](StoreView::write).
    pub fn entities<Q: ComponentSet>(&self) -> Vec<Entity> {
        if cfg!(feature = "validation") {
            if let Some(slot) = Q::first_unreadable(&self.decl) {
                error!(method = "entities", slot, "capability check failed");
                panic!(
                    "capability check failed: entities over undeclared slot {slot}"
                );
            }
        }
        Q::matching_entities(&self.store)
    }

    //
    // Context singletons
    //

    pub fn ctx<T: Send + Sync + 'static>(&self) -> Option<CtxRef<T>> {
        self.check::<T>(self.decl.can_ctx_read::<T>(), "ctx");
        self.store.ctx()
    }

    pub fn mut_ctx<T: Send + Sync + 'static>(&self) -> Option<CtxMut<T>> {
        self.check::<T>(self.decl.can_ctx_write::<T>(), "mut_ctx");
        self.store.ctx_mut()
    }

    pub fn ctx_has<T: Send + Sync + 'static>(&self) -> bool {
        self.check::<T>(self.decl.can_ctx_read::<T>(), "ctx_has");
        self.store.has_ctx::<T>()
    }

    /// Set (or replace) the `T` context singleton.
    pub fn attach_ctx<T: Send + Sync + 'static>(&self, value: T) {
        self.check::<T>(self.decl.can_ctx_write::<T>(), "attach_ctx");
        self.store.set_ctx(value);
    }

    pub fn remove_ctx<T: Send + Sync + 'static>(&self) -> Option<T> {
        self.check::<T>(self.decl.can_ctx_write::<T>(), "remove_ctx");
        self.store.remove_ctx()
    }

    //
    // Event topics
    //

    pub fn enqueue_event<T: Send + Sync + 'static>(&self, event: T) {
        self.check::<T>(self.decl.can_evt_write::<T>(), "enqueue_event");
        self.store.push_event(event);
    }

    pub fn consume_events<T: Send + Sync + 'static>(&self) -> Vec<T> {
        self.check::<T>(self.decl.can_evt_consume::<T>(), "consume_events");
        self.store.drain_events()
    }

    fn check<T: 'static>(&self, allowed: bool, method: &'static str) {
        if cfg!(feature = "validation") && !allowed {
            let slot = type_name::<T>();
            error!(method, slot, "capability check failed");
            panic!(
                "capability check failed: {method}::<{slot}> not covered by \
                 this job's access declaration"
            );
        }
    }
}

/// Tuple of component types usable with [`StoreView::entities`].
///
/// Implemented for tuples of up to four `Send + Sync + 'static` component
/// types.
pub trait ComponentSet {
    /// Name of the first tuple member the declaration cannot read, if any.
    fn first_unreadable(decl: &AccessDecl) -> Option<&'static str>;

    /// Entities carrying every component in the set, in ascending id order.
    fn matching_entities(store: &Store) -> Vec<Entity>;
}

macro_rules! impl_component_set {
    ($first:ident $(, $rest:ident)*) => {
        impl<$first, $($rest,)*> ComponentSet for ($first, $($rest,)*)
        where
            $first: Send + Sync + 'static,
            $($rest: Send + Sync + 'static,)*
        {
            fn first_unreadable(decl: &AccessDecl) -> Option<&'static str> {
                if !decl.can_read::<$first>() {
                    return Some(type_name::<$first>());
                }
                $(
                    if !decl.can_read::<$rest>() {
                        return Some(type_name::<$rest>());
                    }
                )*
                None
            }

            fn matching_entities(store: &Store) -> Vec<Entity> {
                store
                    .entities_with::<$first>()
                    .into_iter()
                    .filter(|&_e| true $(&& store.has::<$rest>(_e))*)
                    .collect()
            }
        }
    };
}

impl_component_set!(A);
impl_component_set!(A, B);
impl_component_set!(A, B, C);
impl_component_set!(A, B, C, D);

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, PartialEq)]
    struct Position(i32);
    #[derive(Debug, PartialEq)]
    struct Velocity(i32);
    #[derive(Debug, PartialEq, Clone, Copy)]
    struct FrameClock(u64);
    #[derive(Debug, PartialEq)]
    struct Collision(u32);

    #[test]
    fn declared_accesses_delegate_to_store() {
        let store = Store::new();
        let view = StoreView::new(
            Arc::clone(&store),
            AccessDecl::new()
                .writes::<Position>()
                .reads::<Velocity>()
                .ctx_writes::<FrameClock>()
                .evt_writes::<Collision>()
                .evt_consumes::<Collision>(),
        );

        let e = view.create();
        view.attach(e, Position(1));
        store.insert(e, Velocity(4));

        let dv = view.read::<Velocity>(e).unwrap().0;
        view.write::<Position>(e).unwrap().0 += dv;
        assert_eq!(view.read::<Position>(e).unwrap().0, 5);

        view.attach_ctx(FrameClock(60));
        view.mut_ctx::<FrameClock>().unwrap().0 += 1;
        assert_eq!(view.ctx::<FrameClock>().unwrap().0, 61);

        view.enqueue_event(Collision(9));
        assert_eq!(view.consume_events::<Collision>(), vec![Collision(9)]);
    }

    #[test]
    fn entities_filters_by_full_tuple() {
        let store = Store::new();
        let view = StoreView::new(
            Arc::clone(&store),
            AccessDecl::new().reads::<Position>().reads::<Velocity>(),
        );

        let a = store.create_entity();
        let b = store.create_entity();
        store.insert(a, Position(0));
        store.insert(a, Velocity(0));
        store.insert(b, Position(0));

        assert_eq!(view.entities::<(Position, Velocity)>(), vec![a]);
        assert_eq!(view.entities::<(Position,)>(), vec![a, b]);
    }

    #[test]
    fn thin_view_allows_everything() {
        let store = Store::new();
        let view = StoreView::thin(store);
        let e = view.create();
        view.attach(e, Position(2));
        view.attach_ctx(FrameClock(0));
        view.enqueue_event(Collision(1));
        assert_eq!(view.consume_events::<Collision>(), vec![Collision(1)]);
    }

    #[cfg(feature = "validation")]
    mod gating {
        use super::*;

        #[test]
        #[should_panic(expected = "capability check failed")]
        fn undeclared_write_panics() {
            let store = Store::new();
            let view = StoreView::new(Arc::clone(&store), AccessDecl::new().reads::<Position>());
            let e = store.create_entity();
            store.insert(e, Position(0));
            let _ = view.write::<Position>(e);
        }

        #[test]
        #[should_panic(expected = "capability check failed")]
        fn undeclared_ctx_read_panics() {
            let store = Store::new();
            let view = StoreView::new(store, AccessDecl::new());
            let _ = view.ctx::<FrameClock>();
        }

        #[test]
        #[should_panic(expected = "capability check failed")]
        fn entities_over_undeclared_slot_panics() {
            let store = Store::new();
            let view = StoreView::new(store, AccessDecl::new().reads::<Position>());
            let _ = view.entities::<(Position, Velocity)>();
        }

        #[test]
        #[should_panic(expected = "capability check failed")]
        fn undeclared_event_consume_panics() {
            let store = Store::new();
            let view = StoreView::new(store, AccessDecl::new().evt_writes::<Collision>());
            let _ = view.consume_events::<Collision>();
        }
    }
}
