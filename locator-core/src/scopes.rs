//! Scope management over instance containers
//!
//! One container per scope: a single global, one per scene, one per bound
//! object. Scene and global containers come into being on first access;
//! object containers only by explicit binding. The host drives teardown by
//! owner-destroyed notifications, and once the application signals its
//! intent to quit every accessor short-circuits to a shared inert
//! container, so nothing new is allocated during teardown and callers
//! never have to handle an absent scope.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::container::InstanceContainer;
use crate::host::{ObjectId, SceneGraph, SceneId, ScopeLabel};

#[derive(Default)]
struct ResolverState {
    global: Option<Rc<InstanceContainer>>,
    scenes: HashMap<SceneId, Rc<InstanceContainer>>,
    objects: HashMap<ObjectId, Rc<InstanceContainer>>,
    shutting_down: bool,
}

/// Hands out the [`InstanceContainer`] serving a given scope.
///
/// The resolver is explicitly constructed and owned by the host; the
/// injected [`SceneGraph`] is its only window into the object hierarchy.
/// All handles it returns are shared, so two callers asking for the same
/// scope always talk to the same container.
///
/// # Example
///
/// ```rust
/// use std::rc::Rc;
/// use locator_core::container::Cardinality;
/// use locator_core::host::{ObjectId, StaticSceneGraph};
/// use locator_core::scopes::ScopeResolver;
///
/// struct Hud;
///
/// let graph = Rc::new(StaticSceneGraph::new());
/// let resolver = ScopeResolver::new(graph);
///
/// let hud = Rc::new(Hud);
/// resolver.global().register(&hud, Cardinality::Singleton);
///
/// // Nothing narrower is bound, so resolution falls through to global.
/// assert!(resolver.closest_for(ObjectId(1)).get::<Hud>().is_some());
/// ```
pub struct ScopeResolver {
    graph: Rc<dyn SceneGraph>,
    state: RefCell<ResolverState>,
    inert: Rc<InstanceContainer>,
}

impl ScopeResolver {
    pub fn new(graph: Rc<dyn SceneGraph>) -> Self {
        Self {
            graph,
            state: RefCell::new(ResolverState::default()),
            inert: Rc::new(InstanceContainer::new(ScopeLabel::Inert)),
        }
    }

    /// Whether the shutdown latch has been set.
    pub fn is_shutting_down(&self) -> bool {
        self.state.borrow().shutting_down
    }

    /// The application-wide container, created on first access.
    ///
    /// Survives scene transitions by construction: scene teardown never
    /// touches it, only [`global_owner_destroyed`](Self::global_owner_destroyed)
    /// does.
    pub fn global(&self) -> Rc<InstanceContainer> {
        let mut state = self.state.borrow_mut();
        if state.shutting_down {
            return self.inert.clone();
        }
        state
            .global
            .get_or_insert_with(|| Rc::new(InstanceContainer::new(ScopeLabel::Global)))
            .clone()
    }

    /// The container for `scene`, created on first access.
    pub fn for_scene(&self, scene: SceneId) -> Rc<InstanceContainer> {
        let mut state = self.state.borrow_mut();
        if state.shutting_down {
            return self.inert.clone();
        }
        state
            .scenes
            .entry(scene)
            .or_insert_with(|| Rc::new(InstanceContainer::new(ScopeLabel::Scene(scene))))
            .clone()
    }

    /// The container bound to `object` or to its nearest bound ancestor.
    ///
    /// Never creates anything: an object with no binding anywhere in its
    /// ancestry gets the shared inert container, which is always safe to
    /// call.
    pub fn for_object(&self, object: ObjectId) -> Rc<InstanceContainer> {
        if self.is_shutting_down() {
            return self.inert.clone();
        }
        self.find_binding(object)
            .unwrap_or_else(|| self.inert.clone())
    }

    /// Narrowest-scope resolution for `object`.
    ///
    /// Preference order: a binding in the object's ancestry, then the
    /// container of the object's scene, then global. The scene and global
    /// steps create their container on demand, so the result is always a
    /// live scope unless the resolver is shutting down.
    pub fn closest_for(&self, object: ObjectId) -> Rc<InstanceContainer> {
        if self.is_shutting_down() {
            return self.inert.clone();
        }
        if let Some(bound) = self.find_binding(object) {
            return bound;
        }
        match self.graph.scene_of(object) {
            Some(scene) => self.for_scene(scene),
            None => self.global(),
        }
    }

    /// Configure the global container explicitly.
    ///
    /// When a global container already exists the pre-existing one wins and
    /// is returned; losing the race is diagnosed but not an error.
    pub fn install_global(&self, container: Rc<InstanceContainer>) -> Rc<InstanceContainer> {
        let mut state = self.state.borrow_mut();
        if state.shutting_down {
            debug!("global container install ignored during shutdown");
            return self.inert.clone();
        }
        match &state.global {
            Some(existing) => {
                if !Rc::ptr_eq(existing, &container) {
                    warn!("a global container is already configured; keeping the existing one");
                }
                existing.clone()
            }
            None => {
                state.global = Some(container.clone());
                container
            }
        }
    }

    /// Configure the container for `scene` explicitly. Same lost-race rule
    /// as [`install_global`](Self::install_global).
    pub fn install_scene(
        &self,
        scene: SceneId,
        container: Rc<InstanceContainer>,
    ) -> Rc<InstanceContainer> {
        let mut state = self.state.borrow_mut();
        if state.shutting_down {
            debug!("container install for scene {} ignored during shutdown", scene);
            return self.inert.clone();
        }
        match state.scenes.get(&scene) {
            Some(existing) => {
                if !Rc::ptr_eq(existing, &container) {
                    warn!(
                        "scene {} already has a container; keeping the existing one",
                        scene
                    );
                }
                existing.clone()
            }
            None => {
                state.scenes.insert(scene, container.clone());
                container
            }
        }
    }

    /// Bind a container to `object` explicitly. Same lost-race rule as
    /// [`install_global`](Self::install_global).
    pub fn install_object(
        &self,
        object: ObjectId,
        container: Rc<InstanceContainer>,
    ) -> Rc<InstanceContainer> {
        let mut state = self.state.borrow_mut();
        if state.shutting_down {
            debug!(
                "container install for object {} ignored during shutdown",
                object
            );
            return self.inert.clone();
        }
        match state.objects.get(&object) {
            Some(existing) => {
                if !Rc::ptr_eq(existing, &container) {
                    warn!(
                        "object {} already has a container; keeping the existing one",
                        object
                    );
                }
                existing.clone()
            }
            None => {
                state.objects.insert(object, container.clone());
                container
            }
        }
    }

    /// Create a fresh container and bind it to `object`.
    pub fn bind_object(&self, object: ObjectId) -> Rc<InstanceContainer> {
        if self.is_shutting_down() {
            debug!("object {} binding ignored during shutdown", object);
            return self.inert.clone();
        }
        let container = Rc::new(InstanceContainer::new(ScopeLabel::Object(object)));
        self.install_object(object, container)
    }

    /// Flip the shutdown latch. Monotonic: there is no way back.
    ///
    /// From here on every scope accessor returns the shared inert
    /// container. Handles callers already hold keep working; the host's
    /// owner-destroyed notifications unwind the recorded scopes as usual.
    pub fn begin_shutdown(&self) {
        let mut state = self.state.borrow_mut();
        if state.shutting_down {
            debug!("shutdown signalled twice");
            return;
        }
        state.shutting_down = true;
        debug!("scope resolver entered shutdown");
    }

    /// Host notification that the owner of the global container died.
    ///
    /// The recorded global is cleared only while it is still `container`,
    /// so a stale teardown cannot clobber a newer replacement.
    pub fn global_owner_destroyed(&self, container: &Rc<InstanceContainer>) {
        let mut state = self.state.borrow_mut();
        match &state.global {
            Some(current) if Rc::ptr_eq(current, container) => state.global = None,
            Some(_) => warn!("stale teardown of a replaced global container ignored"),
            None => debug!("teardown of an unrecorded global container ignored"),
        }
    }

    /// Host notification that the owner of `scene`'s container died.
    /// Pointer-guarded like [`global_owner_destroyed`](Self::global_owner_destroyed).
    pub fn scene_owner_destroyed(&self, scene: SceneId, container: &Rc<InstanceContainer>) {
        let mut state = self.state.borrow_mut();
        match state.scenes.get(&scene) {
            Some(current) if Rc::ptr_eq(current, container) => {
                state.scenes.remove(&scene);
            }
            Some(_) => warn!(
                "stale teardown of a replaced container for scene {} ignored",
                scene
            ),
            None => debug!("teardown of an unrecorded container for scene {} ignored", scene),
        }
    }

    /// Host notification that `object`'s binding component died.
    /// Pointer-guarded like [`global_owner_destroyed`](Self::global_owner_destroyed).
    pub fn object_binding_destroyed(&self, object: ObjectId, container: &Rc<InstanceContainer>) {
        let mut state = self.state.borrow_mut();
        match state.objects.get(&object) {
            Some(current) if Rc::ptr_eq(current, container) => {
                state.objects.remove(&object);
            }
            Some(_) => warn!(
                "stale teardown of a replaced container for object {} ignored",
                object
            ),
            None => debug!(
                "teardown of an unrecorded container for object {} ignored",
                object
            ),
        }
    }

    fn find_binding(&self, object: ObjectId) -> Option<Rc<InstanceContainer>> {
        let mut probe = Some(object);
        while let Some(current) = probe {
            // Borrow per hop; the host graph runs with no resolver borrow
            // held. Acyclic ancestry is a host invariant.
            if let Some(bound) = self.state.borrow().objects.get(&current) {
                return Some(bound.clone());
            }
            probe = self.graph.parent(current);
        }
        None
    }
}
