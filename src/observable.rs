//! Runtime wrapper objects backing lowered reactive fields.
//!
//! An [`ObservableWrapper`] owns one slot holding the field value and a list of
//! subscriber callbacks (the owning view's re-render trigger). Wrappers joined
//! through [`ObservableWrapper::link`] share a *link group*: a write on any
//! member is assigned into every member's slot before any subscriber runs, so
//! no member ever observes a stale value after `set` returns.
//!
//! # Architecture
//!
//! Slots use `Rc<RefCell<..>>` for single-threaded shared ownership.
//! Subscribers are stored as `Weak` function pointers and cleaned up lazily
//! during notification; the strong side lives in the returned [`Subscription`].
//!
//! # Invariants
//!
//! 1. Subscribers of one slot are notified in registration order; slots of a
//!    group are notified in link order.
//! 2. A `set` issued while its group is already propagating is queued and
//!    applied after the current propagation step, in FIFO order.
//! 3. `Plain` wrappers store values but never notify.
//! 4. Every `set` notifies, even when the new value equals the old one.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Runtime flavour of a wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WrapperKind {
    Plain,
    OwnedSimple,
    OneWay,
    TwoWay,
    Shared,
}

impl WrapperKind {
    pub fn notifies(self) -> bool {
        self != WrapperKind::Plain
    }
}

type Callback<T> = dyn Fn(&T);

struct Slot<T> {
    value: RefCell<T>,
    kind: WrapperKind,
    subscribers: RefCell<Vec<Weak<Callback<T>>>>,
    group: RefCell<Rc<LinkGroup<T>>>,
}

impl<T> Slot<T> {
    fn notify(&self, value: &T) {
        if !self.kind.notifies() {
            return;
        }
        let live: Vec<Rc<Callback<T>>> = {
            let mut subs = self.subscribers.borrow_mut();
            subs.retain(|weak| weak.strong_count() > 0);
            subs.iter().filter_map(Weak::upgrade).collect()
        };
        for callback in live {
            callback(value);
        }
    }
}

struct LinkGroup<T> {
    members: RefCell<Vec<Weak<Slot<T>>>>,
    propagating: Cell<bool>,
    pending: RefCell<VecDeque<T>>,
}

impl<T> LinkGroup<T> {
    fn new() -> Self {
        LinkGroup {
            members: RefCell::new(Vec::new()),
            propagating: Cell::new(false),
            pending: RefCell::new(VecDeque::new()),
        }
    }

    fn live_members(&self) -> Vec<Rc<Slot<T>>> {
        let mut members = self.members.borrow_mut();
        members.retain(|weak| weak.strong_count() > 0);
        members.iter().filter_map(Weak::upgrade).collect()
    }
}

/// Resets the group's propagation flag even if a subscriber panics.
struct PropagationGuard<'g, T> {
    group: &'g LinkGroup<T>,
}

impl<T> Drop for PropagationGuard<'_, T> {
    fn drop(&mut self) {
        self.group.propagating.set(false);
    }
}

/// RAII guard returned by [`ObservableWrapper::subscribe`].
///
/// Dropping it removes the callback before the next notification cycle.
pub struct Subscription {
    _callback: Rc<dyn std::any::Any>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish()
    }
}

/// Reactive value holder with explicit get/set/subscribe operations.
///
/// Cloning shares the same slot; use [`link`](Self::link) to create a distinct
/// wrapper bound to this one.
pub struct ObservableWrapper<T: Clone + 'static> {
    slot: Rc<Slot<T>>,
}

impl<T: Clone + 'static> Clone for ObservableWrapper<T> {
    fn clone(&self) -> Self {
        ObservableWrapper {
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<T: Clone + 'static> ObservableWrapper<T> {
    pub fn new(kind: WrapperKind, value: T) -> Self {
        let group = Rc::new(LinkGroup::new());
        let slot = Rc::new(Slot {
            value: RefCell::new(value),
            kind,
            subscribers: RefCell::new(Vec::new()),
            group: RefCell::new(Rc::clone(&group)),
        });
        group.members.borrow_mut().push(Rc::downgrade(&slot));
        ObservableWrapper { slot }
    }

    pub fn kind(&self) -> WrapperKind {
        self.slot.kind
    }

    pub fn get(&self) -> T {
        self.slot.value.borrow().clone()
    }

    /// Borrow the current value without cloning. Calling `set` on the same
    /// group from inside `f` panics.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.slot.value.borrow())
    }

    /// Assign `value` to every wrapper in this link group, then notify.
    pub fn set(&self, value: T) {
        let group = Rc::clone(&self.slot.group.borrow());
        if group.propagating.get() {
            trace!(kind = ?self.slot.kind, "set queued behind running propagation");
            group.pending.borrow_mut().push_back(value);
            return;
        }

        group.propagating.set(true);
        let _guard = PropagationGuard { group: &group };
        let mut next = Some(value);
        while let Some(value) = next {
            let members = group.live_members();
            for member in &members {
                *member.value.borrow_mut() = value.clone();
            }
            for member in &members {
                member.notify(&value);
            }
            next = group.pending.borrow_mut().pop_front();
        }
    }

    /// Register `callback`; it runs after every `set` reaching this wrapper.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let strong: Rc<Callback<T>> = Rc::new(callback);
        self.slot
            .subscribers
            .borrow_mut()
            .push(Rc::downgrade(&strong));
        Subscription {
            _callback: Rc::new(strong),
        }
    }

    /// Create a new wrapper of `kind` sharing this wrapper's link group.
    ///
    /// The new wrapper starts with the current value; no copy is taken later.
    pub fn link(&self, kind: WrapperKind) -> Self {
        let group = Rc::clone(&self.slot.group.borrow());
        let slot = Rc::new(Slot {
            value: RefCell::new(self.get()),
            kind,
            subscribers: RefCell::new(Vec::new()),
            group: RefCell::new(Rc::clone(&group)),
        });
        group.members.borrow_mut().push(Rc::downgrade(&slot));
        ObservableWrapper { slot }
    }

    /// Independent wrapper of `kind` seeded with a copy of the current value.
    pub fn snapshot(&self, kind: WrapperKind) -> Self {
        Self::new(kind, self.get())
    }

    /// Number of live wrappers in this wrapper's link group, itself included.
    pub fn group_size(&self) -> usize {
        self.slot.group.borrow().live_members().len()
    }

    pub fn is_linked_with(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.slot.group.borrow(), &other.slot.group.borrow())
    }

    pub fn subscriber_count(&self) -> usize {
        self.slot
            .subscribers
            .borrow()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

impl<T: Clone + std::fmt::Debug + 'static> std::fmt::Debug for ObservableWrapper<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableWrapper")
            .field("kind", &self.slot.kind)
            .field("value", &*self.slot.value.borrow())
            .field("group_size", &self.group_size())
            .finish()
    }
}
