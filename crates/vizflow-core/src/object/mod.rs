//! Reference-counted objects with cycle-safe collection.
//!
//! Objects live in an [`ObjectDomain`], an arena addressed by generational
//! [`ObjectId`] handles. Every object carries a reference count; references
//! held *by another object* are recorded as explicit ownership edges so the
//! collector can find reference cycles that plain counting would leak.
//!
//! ```
//! use vizflow_core::ObjectDomain;
//!
//! let mut domain = ObjectDomain::new();
//! let actor = domain.insert("actor");
//! let mapper = domain.insert("mapper");
//!
//! // actor <-> mapper
//! domain.register(mapper, Some(actor));
//! domain.register(actor, Some(mapper));
//!
//! // Dropping the external references collects the whole cycle.
//! domain.unregister(actor, None);
//! domain.unregister(mapper, None);
//! assert!(domain.is_empty());
//! ```

mod collector;
mod domain;

use std::fmt;
use std::sync::{Arc, Mutex};

pub use collector::{CollectionReport, CollectorState, CollectorStats, DeferredCollection};
pub use domain::ObjectDomain;

/// Generational handle to an object in an [`ObjectDomain`].
///
/// A handle stays unique after its object is deleted: the slot may be reused,
/// but with a new generation, so a stale handle never aliases a new object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId {
    index: u32,
    generation: u32,
}

impl ObjectId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Returns the arena slot of this handle.
    pub fn index(self) -> u32 {
        self.index
    }

    /// Returns the slot generation this handle was issued for.
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// A handle that does not keep its object alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeakObject {
    id: ObjectId,
}

impl WeakObject {
    /// Returns the handle this weak reference points at, alive or not.
    pub fn id(&self) -> ObjectId {
        self.id
    }
}

/// Events an object reports to its observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectEvent {
    /// The object is about to be destroyed.
    Delete,
    /// The object was marked modified.
    Modified,
}

/// Identifies a registered observer so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverTag(u64);

/// An observer callback.
pub type ObserverCallback = Box<dyn FnMut(ObjectId, ObjectEvent) + Send>;

/// A domain shared across threads.
pub type SharedDomain<T> = Arc<Mutex<ObjectDomain<T>>>;
