//! Host-engine vocabulary and the platform services the locator consumes
//!
//! The locator never owns or traverses the engine's object hierarchy itself.
//! It is handed a [`SceneGraph`] at construction time and asks it two
//! questions: who is an object's parent, and which scene does an object live
//! in. Everything else about the host (spawning, destruction, scene loading)
//! reaches the locator as explicit notification calls.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

/// Identifier for a live object in the host engine's hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a loaded scene in the host engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneId(pub u64);

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which scope a container serves. Carried by every container and attached
/// to its diagnostics so log lines identify the scope they came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeLabel {
    /// The process-wide container that survives scene transitions.
    Global,
    /// A container bound to one loaded scene.
    Scene(SceneId),
    /// A container bound to one hierarchy root.
    Object(ObjectId),
    /// A standalone container not managed by any resolver.
    Detached,
    /// The shared read-only container handed out after shutdown and for
    /// object lookups that find no binding.
    Inert,
}

impl fmt::Display for ScopeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeLabel::Global => write!(f, "global"),
            ScopeLabel::Scene(scene) => write!(f, "scene:{}", scene),
            ScopeLabel::Object(object) => write!(f, "object:{}", object),
            ScopeLabel::Detached => write!(f, "detached"),
            ScopeLabel::Inert => write!(f, "inert"),
        }
    }
}

/// Hierarchy and scene-membership queries answered by the host engine.
///
/// Implementations must present an acyclic parent graph; the resolver's
/// ancestry walk trusts that invariant.
pub trait SceneGraph {
    /// The parent of `object`, or `None` for a hierarchy root.
    fn parent(&self, object: ObjectId) -> Option<ObjectId>;

    /// The scene `object` belongs to, or `None` for objects outside any
    /// loaded scene (such as ones marked to survive scene transitions).
    fn scene_of(&self, object: ObjectId) -> Option<SceneId>;
}

/// Table-backed [`SceneGraph`] for tests and simple hosts.
///
/// Parent links and scene placements are plain lookup tables with interior
/// mutability, so a single shared handle can keep growing while the resolver
/// holds its own clone. Scene membership is inherited: an object without an
/// explicit placement reports the scene of its nearest placed ancestor.
#[derive(Default)]
pub struct StaticSceneGraph {
    parents: RefCell<HashMap<ObjectId, ObjectId>>,
    placements: RefCell<HashMap<ObjectId, SceneId>>,
}

impl StaticSceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `parent` as the parent of `child`, replacing any prior link.
    pub fn link(&self, child: ObjectId, parent: ObjectId) {
        self.parents.borrow_mut().insert(child, parent);
    }

    /// Place `object` directly in `scene`.
    pub fn place(&self, object: ObjectId, scene: SceneId) {
        self.placements.borrow_mut().insert(object, scene);
    }

    /// Drop all records for `object`, as a host would on destruction.
    pub fn remove(&self, object: ObjectId) {
        self.parents.borrow_mut().remove(&object);
        self.placements.borrow_mut().remove(&object);
    }
}

impl SceneGraph for StaticSceneGraph {
    fn parent(&self, object: ObjectId) -> Option<ObjectId> {
        self.parents.borrow().get(&object).copied()
    }

    fn scene_of(&self, object: ObjectId) -> Option<SceneId> {
        let placements = self.placements.borrow();
        let parents = self.parents.borrow();
        let mut cursor = Some(object);
        while let Some(id) = cursor {
            if let Some(scene) = placements.get(&id) {
                return Some(*scene);
            }
            cursor = parents.get(&id).copied();
        }
        None
    }
}
