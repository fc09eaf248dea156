//! Scoped instance locator for game runtimes
//!
//! Objects register themselves under their own type and are found again by
//! anyone holding the right scope, with registration and unregistration
//! events fanned out to subscribers. Scopes nest: per-object bindings
//! shadow the owning scene's container, which shadows the single global
//! one, and [`ScopeResolver::closest_for`] walks that chain so callers
//! never need to know in advance where a dependency lives.
//!
//! The locator never owns what it stores. Registrants keep their own
//! [`std::rc::Rc`] handles and unregister on teardown; the containers hold
//! weak references and treat a dead entry as stale. Everything runs on the
//! host's callback thread, so the crate is single-threaded by construction
//! and nothing here is `Send` or `Sync`.
//!
//! # Modules
//!
//! - [`container`]: the type-keyed multimap with listener fan-out.
//! - [`scopes`]: lazy per-scope container management and the shutdown latch.
//! - [`host`]: the injected window into the host engine's object hierarchy.
//!
//! # Example
//!
//! ```rust
//! use std::rc::Rc;
//! use locator_core::{Cardinality, ObjectId, SceneId, ScopeResolver, StaticSceneGraph};
//!
//! struct Enemy { hull: u32 }
//!
//! let graph = Rc::new(StaticSceneGraph::new());
//! graph.place(ObjectId(1), SceneId(0));
//! let resolver = ScopeResolver::new(graph.clone());
//!
//! // A scene scope comes into being on first access.
//! let scene = resolver.for_scene(SceneId(0));
//! let raider = Rc::new(Enemy { hull: 30 });
//! scene.register(&raider, Cardinality::Multiple);
//!
//! // Objects inside the scene resolve to the same container.
//! let nearby = resolver.closest_for(ObjectId(1));
//! assert_eq!(nearby.get_all::<Enemy>().len(), 1);
//! ```

pub mod container;
pub mod host;
pub mod scopes;

pub use container::{
    typed_listener, Cardinality, ErasedInstance, InstanceContainer, InstanceListener,
};
pub use host::{ObjectId, SceneGraph, SceneId, ScopeLabel, StaticSceneGraph};
pub use scopes::ScopeResolver;
