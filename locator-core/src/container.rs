//! Type-keyed instance container with registration event fan-out
//!
//! This is the leaf of the locator: a multimap from a key type to the
//! instances registered under it, plus per-key listener lists that fire on
//! registration and unregistration. The container knows nothing about
//! scopes, scenes, or the object hierarchy; [`crate::scopes::ScopeResolver`]
//! decides which container a caller should talk to.
//!
//! Storage is type-erased (`TypeId` to weak `dyn Any` handles) while the
//! whole public surface is generic over the key type, so the erasure never
//! leaks to callers. Entries are non-owning: registrants keep their own
//! `Rc` alive and are expected to unregister on teardown. An entry whose
//! last strong reference is gone is *stale*; lookups skip stale entries and
//! listener replay prunes them.

use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, error, warn};

use crate::host::ScopeLabel;

/// A type-erased strong handle to a registered instance.
pub type ErasedInstance = Rc<dyn Any>;

/// A callback invoked with the instance that was just registered or
/// unregistered. Listener identity is the `Rc` allocation, which is what
/// the `remove_*_listener` calls compare against.
pub type InstanceListener = Rc<dyn Fn(&ErasedInstance)>;

type WeakInstance = Weak<dyn Any>;

/// How many concurrent registrations a key admits.
///
/// Recorded at the first registration for a key and cleared when the key's
/// entry list empties; a later registration that declares the other
/// cardinality is diagnosed and the recorded one governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// At most one instance; a second distinct registration is refused.
    Singleton,
    /// Any number of instances, kept in registration order.
    Multiple,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::Singleton => write!(f, "singleton"),
            Cardinality::Multiple => write!(f, "multiple"),
        }
    }
}

/// Why a typed lookup produced nothing.
#[derive(Debug, thiserror::Error)]
pub(crate) enum LookupError {
    #[error("no live instance of {key} registered")]
    NotFound { key: &'static str },
    #[error("registered instance under {key} failed to downcast")]
    TypeMismatch { key: &'static str },
}

/// Wraps a typed callback into an [`InstanceListener`].
///
/// The wrapper downcasts each delivered instance before invoking the
/// callback. A mismatch is reported through the diagnostic channel and the
/// callback is not invoked; it is never skipped silently.
pub fn typed_listener<T, F>(callback: F) -> InstanceListener
where
    T: Any,
    F: Fn(&Rc<T>) + 'static,
{
    Rc::new(move |instance: &ErasedInstance| {
        match instance.clone().downcast::<T>() {
            Ok(typed) => callback(&typed),
            Err(_) => error!(
                "listener for {} received an instance of another type",
                type_name::<T>()
            ),
        }
    })
}

// Thin data pointers only; vtable pointers are not stable across codegen
// units and must not take part in identity.
fn same_instance(entry: &WeakInstance, instance: &ErasedInstance) -> bool {
    entry.as_ptr() as *const () == Rc::as_ptr(instance) as *const ()
}

struct KeySlot {
    cardinality: Cardinality,
    entries: Vec<WeakInstance>,
}

impl KeySlot {
    fn new(cardinality: Cardinality) -> Self {
        Self {
            cardinality,
            entries: Vec::new(),
        }
    }

    fn contains(&self, instance: &ErasedInstance) -> bool {
        self.entries.iter().any(|entry| same_instance(entry, instance))
    }
}

#[derive(Default)]
struct ContainerState {
    // A key is present iff its entry list is non-empty, so the cardinality
    // record lives and dies with the entries.
    slots: HashMap<TypeId, KeySlot>,
    registered: HashMap<TypeId, Vec<InstanceListener>>,
    unregistered: HashMap<TypeId, Vec<InstanceListener>>,
}

/// A per-scope mapping from key type to registered instances.
///
/// All operations take `&self`; the container is freely shared through
/// `Rc` handles on the engine's callback thread. Listeners are invoked
/// synchronously with no internal borrow held, so a listener may re-enter
/// the container from its own callback.
///
/// A container labelled [`ScopeLabel::Inert`] is the shared read-only
/// container the resolver hands out during shutdown: every mutation is a
/// no-op and every lookup misses, so callers never need to special-case
/// teardown.
///
/// # Example
///
/// ```rust
/// use std::rc::Rc;
/// use locator_core::container::{Cardinality, InstanceContainer};
/// use locator_core::host::ScopeLabel;
///
/// struct Physics { gravity: f32 }
///
/// let container = InstanceContainer::new(ScopeLabel::Detached);
/// let physics = Rc::new(Physics { gravity: -9.81 });
/// assert!(container.register(&physics, Cardinality::Singleton));
///
/// let found = container.get::<Physics>().unwrap();
/// assert_eq!(found.gravity, -9.81);
/// ```
pub struct InstanceContainer {
    label: ScopeLabel,
    state: RefCell<ContainerState>,
}

impl InstanceContainer {
    pub fn new(label: ScopeLabel) -> Self {
        Self {
            label,
            state: RefCell::new(ContainerState::default()),
        }
    }

    /// The scope this container serves, as used in its diagnostics.
    pub fn label(&self) -> ScopeLabel {
        self.label
    }

    /// Whether this is the shared read-only container.
    pub fn is_inert(&self) -> bool {
        self.label == ScopeLabel::Inert
    }

    /// Register `instance` under the key type `T`.
    ///
    /// Returns whether the instance was actually added. Re-registering the
    /// same allocation is an idempotent no-op; a second distinct instance
    /// under a Singleton key is refused with a warning and the prior
    /// registration stands. On success every registered-listener for `T`
    /// fires synchronously, in subscription order, with the new instance.
    ///
    /// The container keeps only a weak handle: the caller stays responsible
    /// for the instance's lifetime and should unregister it on teardown.
    pub fn register<T: Any>(&self, instance: &Rc<T>, cardinality: Cardinality) -> bool {
        if self.is_inert() {
            debug!("register of {} ignored by the inert container", type_name::<T>());
            return false;
        }
        let key = TypeId::of::<T>();
        let erased: ErasedInstance = instance.clone();
        let listeners = {
            let mut state = self.state.borrow_mut();
            match state.slots.get_mut(&key) {
                Some(slot) => {
                    if slot.cardinality != cardinality {
                        warn!(
                            "{} is registered with {} cardinality in {} scope; {} declaration ignored",
                            type_name::<T>(),
                            slot.cardinality,
                            self.label,
                            cardinality
                        );
                    }
                    if slot.contains(&erased) {
                        return false;
                    }
                    match slot.cardinality {
                        Cardinality::Singleton => {
                            warn!(
                                "conflicting singleton registration of {} in {} scope refused",
                                type_name::<T>(),
                                self.label
                            );
                            return false;
                        }
                        Cardinality::Multiple => slot.entries.push(Rc::downgrade(&erased)),
                    }
                }
                None => {
                    let mut slot = KeySlot::new(cardinality);
                    slot.entries.push(Rc::downgrade(&erased));
                    state.slots.insert(key, slot);
                }
            }
            state.registered.get(&key).cloned().unwrap_or_default()
        };
        for listener in &listeners {
            listener(&erased);
        }
        true
    }

    /// Remove `instance` from the key type `T`.
    ///
    /// Returns whether anything was removed. When the last entry for the
    /// key goes, the key's cardinality record goes with it, so the key can
    /// later be re-registered under either cardinality. On removal every
    /// unregistered-listener for `T` fires synchronously, in subscription
    /// order.
    pub fn unregister<T: Any>(&self, instance: &Rc<T>) -> bool {
        if self.is_inert() {
            debug!("unregister of {} ignored by the inert container", type_name::<T>());
            return false;
        }
        let key = TypeId::of::<T>();
        let erased: ErasedInstance = instance.clone();
        let listeners = {
            let mut state = self.state.borrow_mut();
            let Some(slot) = state.slots.get_mut(&key) else {
                return false;
            };
            let Some(position) = slot
                .entries
                .iter()
                .position(|entry| same_instance(entry, &erased))
            else {
                return false;
            };
            slot.entries.remove(position);
            if slot.entries.is_empty() {
                state.slots.remove(&key);
            }
            state.unregistered.get(&key).cloned().unwrap_or_default()
        };
        for listener in &listeners {
            listener(&erased);
        }
        true
    }

    /// The oldest live instance registered under `T`, with a warning
    /// diagnostic on a miss.
    pub fn get<T: Any>(&self) -> Option<Rc<T>> {
        match self.first_live::<T>() {
            Ok(instance) => Some(instance),
            Err(miss @ LookupError::NotFound { .. }) => {
                warn!("{} in {} scope", miss, self.label);
                None
            }
            Err(mismatch) => {
                error!("{} in {} scope", mismatch, self.label);
                None
            }
        }
    }

    /// Same lookup as [`get`](Self::get) without the miss diagnostic.
    pub fn try_get<T: Any>(&self) -> Option<Rc<T>> {
        match self.first_live::<T>() {
            Ok(instance) => Some(instance),
            Err(LookupError::NotFound { .. }) => None,
            Err(mismatch) => {
                error!("{} in {} scope", mismatch, self.label);
                None
            }
        }
    }

    /// All live instances registered under `T`, in registration order.
    ///
    /// An empty result is reported through the diagnostic channel. Calling
    /// this on a key recorded as Singleton completes normally but is
    /// diagnosed as a usage warning.
    pub fn get_all<T: Any>(&self) -> Vec<Rc<T>> {
        match self.collect_live::<T>() {
            Ok(live) => {
                if live.is_empty() {
                    warn!(
                        "{} in {} scope",
                        LookupError::NotFound {
                            key: type_name::<T>()
                        },
                        self.label
                    );
                }
                live
            }
            Err(mismatch) => {
                error!("{} in {} scope", mismatch, self.label);
                Vec::new()
            }
        }
    }

    /// Same lookup as [`get_all`](Self::get_all), returning `None` instead
    /// of an empty sequence. The Singleton usage warning still applies.
    pub fn try_get_all<T: Any>(&self) -> Option<Vec<Rc<T>>> {
        match self.collect_live::<T>() {
            Ok(live) => {
                if live.is_empty() {
                    None
                } else {
                    Some(live)
                }
            }
            Err(mismatch) => {
                error!("{} in {} scope", mismatch, self.label);
                None
            }
        }
    }

    /// Subscribe to registrations under `T` and replay the present.
    ///
    /// The listener is appended to the subscription list and then, before
    /// this call returns, invoked once per instance already registered
    /// under `T`, oldest first. Entries found dead during the replay are
    /// pruned with a warning and delivered to no listener; pruning is
    /// reference cleanup, not a logical unregistration, so it does not fire
    /// the unregistered listeners. The replay cursor only advances past
    /// live entries, which keeps the scan aligned while entries are pruned
    /// or while the listener itself mutates the container.
    pub fn add_registered_listener<T: Any>(&self, listener: InstanceListener) {
        if self.is_inert() {
            debug!(
                "registered-listener for {} ignored by the inert container",
                type_name::<T>()
            );
            return;
        }
        let key = TypeId::of::<T>();
        self.state
            .borrow_mut()
            .registered
            .entry(key)
            .or_default()
            .push(listener.clone());

        let mut cursor = 0;
        loop {
            let next = {
                let mut state = self.state.borrow_mut();
                let mut next = None;
                let mut drained = false;
                if let Some(slot) = state.slots.get_mut(&key) {
                    while cursor < slot.entries.len() {
                        match slot.entries[cursor].upgrade() {
                            Some(instance) => {
                                cursor += 1;
                                next = Some(instance);
                                break;
                            }
                            None => {
                                slot.entries.remove(cursor);
                                warn!(
                                    "pruned a dead {} entry during listener replay in {} scope; \
                                     its registrant never unregistered",
                                    type_name::<T>(),
                                    self.label
                                );
                            }
                        }
                    }
                    drained = slot.entries.is_empty();
                }
                if drained {
                    state.slots.remove(&key);
                }
                next
            };
            match next {
                Some(instance) => listener(&instance),
                None => break,
            }
        }
    }

    /// Subscribe to unregistrations under `T`. No replay is performed.
    pub fn add_unregistered_listener<T: Any>(&self, listener: InstanceListener) {
        if self.is_inert() {
            debug!(
                "unregistered-listener for {} ignored by the inert container",
                type_name::<T>()
            );
            return;
        }
        self.state
            .borrow_mut()
            .unregistered
            .entry(TypeId::of::<T>())
            .or_default()
            .push(listener);
    }

    /// Remove the first subscription matching `listener` by handle
    /// identity; no-op if it was never added.
    pub fn remove_registered_listener<T: Any>(&self, listener: &InstanceListener) {
        let mut state = self.state.borrow_mut();
        if let Some(listeners) = state.registered.get_mut(&TypeId::of::<T>()) {
            if let Some(position) = listeners.iter().position(|known| Rc::ptr_eq(known, listener)) {
                listeners.remove(position);
            }
        }
    }

    /// Counterpart of [`remove_registered_listener`](Self::remove_registered_listener)
    /// for the unregistration list.
    pub fn remove_unregistered_listener<T: Any>(&self, listener: &InstanceListener) {
        let mut state = self.state.borrow_mut();
        if let Some(listeners) = state.unregistered.get_mut(&TypeId::of::<T>()) {
            if let Some(position) = listeners.iter().position(|known| Rc::ptr_eq(known, listener)) {
                listeners.remove(position);
            }
        }
    }

    fn first_live<T: Any>(&self) -> Result<Rc<T>, LookupError> {
        let state = self.state.borrow();
        if let Some(slot) = state.slots.get(&TypeId::of::<T>()) {
            for entry in &slot.entries {
                let Some(instance) = entry.upgrade() else {
                    continue;
                };
                // register<T> stores entries under TypeId::of::<T>(), so
                // this arm is unreachable unless the erased storage was
                // corrupted; it still fails explicitly rather than pruning.
                return match instance.downcast::<T>() {
                    Ok(typed) => Ok(typed),
                    Err(_) => Err(LookupError::TypeMismatch {
                        key: type_name::<T>(),
                    }),
                };
            }
        }
        Err(LookupError::NotFound {
            key: type_name::<T>(),
        })
    }

    fn collect_live<T: Any>(&self) -> Result<Vec<Rc<T>>, LookupError> {
        let state = self.state.borrow();
        let Some(slot) = state.slots.get(&TypeId::of::<T>()) else {
            return Ok(Vec::new());
        };
        if slot.cardinality == Cardinality::Singleton {
            warn!(
                "bulk lookup of {} in {} scope, but the key is registered as a singleton",
                type_name::<T>(),
                self.label
            );
        }
        let mut live = Vec::new();
        for entry in &slot.entries {
            let Some(instance) = entry.upgrade() else {
                continue;
            };
            match instance.downcast::<T>() {
                Ok(typed) => live.push(typed),
                Err(_) => {
                    return Err(LookupError::TypeMismatch {
                        key: type_name::<T>(),
                    })
                }
            }
        }
        Ok(live)
    }
}
