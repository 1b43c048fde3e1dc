//! Listener building blocks for tessera worlds.
//!
//! A world holds a single [`Listener`]. [`Callback`] turns a closure into one,
//! and [`Dispatch`] fans events out to several listeners, each filtered by
//! its own subscription.
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use tessera_ecs::prelude::*;
//! use tessera_listener::{Callback, Dispatch};
//!
//! let created = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&created);
//!
//! let mut dispatch = Dispatch::new();
//! dispatch.add(Callback::new(Subscription::ENTITY_CREATED, move |_, _| {
//!     counter.fetch_add(1, Ordering::Relaxed);
//! }));
//!
//! let mut world = World::new();
//! world.set_listener(Box::new(dispatch));
//! world.new_entity(&[]).unwrap();
//! assert_eq!(created.load(Ordering::Relaxed), 1);
//! ```

use std::fmt;

use tracing::trace;

use tessera_ecs::bitmask::Mask;
use tessera_ecs::event::{subscribes, EntityEvent, Listener, Subscription};
use tessera_ecs::world::World;

// ---------------------------------------------------------------------------
// Callback
// ---------------------------------------------------------------------------

/// A listener backed by a closure.
pub struct Callback<F> {
    callback: F,
    subscriptions: Subscription,
    components: Option<Mask>,
}

impl<F> Callback<F>
where
    F: FnMut(&World, &EntityEvent<'_>) + Send,
{
    /// Call `callback` for every event of the kinds in `subscriptions`.
    pub fn new(subscriptions: Subscription, callback: F) -> Self {
        Self {
            callback,
            subscriptions,
            components: None,
        }
    }

    /// Only receive events that involve at least one of `components`.
    pub fn with_components(mut self, components: Mask) -> Self {
        self.components = Some(components);
        self
    }
}

impl<F> fmt::Debug for Callback<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("subscriptions", &self.subscriptions)
            .field("components", &self.components)
            .finish_non_exhaustive()
    }
}

impl<F> Listener for Callback<F>
where
    F: FnMut(&World, &EntityEvent<'_>) + Send,
{
    fn notify(&mut self, world: &World, event: &EntityEvent<'_>) {
        (self.callback)(world, event);
    }

    fn subscriptions(&self) -> Subscription {
        self.subscriptions
    }

    fn components(&self) -> Option<&Mask> {
        self.components.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Forwards events to several listeners.
///
/// The dispatcher subscribes to the union of its children's kinds. Its
/// component restriction is the union of theirs, or none at all as soon as
/// one child is unrestricted. Each event only reaches the children that
/// subscribe to it themselves.
#[derive(Default)]
pub struct Dispatch {
    listeners: Vec<Box<dyn Listener>>,
    subscriptions: Subscription,
    components: Option<Mask>,
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("listeners", &self.listeners.len())
            .field("subscriptions", &self.subscriptions)
            .field("components", &self.components)
            .finish()
    }
}

impl Dispatch {
    /// An empty dispatcher. It subscribes to nothing until a listener is
    /// added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener.
    pub fn add(&mut self, listener: impl Listener + 'static) {
        self.add_boxed(Box::new(listener));
    }

    /// Add an already boxed listener.
    pub fn add_boxed(&mut self, listener: Box<dyn Listener>) {
        self.listeners.push(listener);
        self.recompute();
    }

    /// Number of child listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether there are no child listeners.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    fn recompute(&mut self) {
        self.subscriptions = self
            .listeners
            .iter()
            .fold(Subscription::empty(), |acc, l| acc | l.subscriptions());
        self.components = self
            .listeners
            .iter()
            .try_fold(Mask::ZERO, |acc, l| l.components().map(|mask| acc.or(mask)));
    }
}

impl Listener for Dispatch {
    fn notify(&mut self, world: &World, event: &EntityEvent<'_>) {
        for (index, listener) in self.listeners.iter_mut().enumerate() {
            let trigger = listener.subscriptions() & event.event_types;
            if subscribes(
                trigger,
                Some(&event.added),
                Some(&event.removed),
                listener.components(),
                event.old_relation,
                event.new_relation,
            ) {
                trace!(listener = index, entity = %event.entity, "dispatching event");
                listener.notify(world, event);
            }
        }
    }

    fn subscriptions(&self) -> Subscription {
        self.subscriptions
    }

    fn components(&self) -> Option<&Mask> {
        self.components.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
