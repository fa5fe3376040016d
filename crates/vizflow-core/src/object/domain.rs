//! Arena storage, reference counting and observers.

use std::collections::HashMap;

use super::collector::Collector;
use super::{
    CollectionReport, CollectorState, CollectorStats, DeferredCollection, ObjectEvent, ObjectId,
    ObserverCallback, ObserverTag, WeakObject,
};
use crate::error::{Result, VizflowError};
use crate::options::CollectorOptions;
use crate::timestamp::{ModifiedClock, TimeStamp};

struct Observer {
    tag: ObserverTag,
    event: ObjectEvent,
    callback: ObserverCallback,
}

pub(super) struct Entry<T> {
    pub(super) value: T,
    pub(super) count: usize,
    /// Outgoing ownership edges: target -> number of references held.
    pub(super) references: HashMap<ObjectId, usize>,
    observers: Vec<Observer>,
    modified: TimeStamp,
}

struct Slot<T> {
    generation: u32,
    entry: Option<Entry<T>>,
}

/// An arena of reference-counted objects forming one collection domain.
///
/// Domains are independent: each has its own collector state, so deferred
/// collection in one domain never affects another.
pub struct ObjectDomain<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
    next_tag: u64,
    clock: ModifiedClock,
    options: CollectorOptions,
    pub(super) collector: Collector,
}

impl<T> Default for ObjectDomain<T> {
    fn default() -> Self {
        Self::with_options(CollectorOptions::default())
    }
}

impl<T> ObjectDomain<T> {
    /// Creates an empty domain with default collector options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty domain.
    pub fn with_options(options: CollectorOptions) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            next_tag: 0,
            clock: ModifiedClock::new(),
            options,
            collector: Collector::default(),
        }
    }

    /// Returns the collector options of this domain.
    pub fn options(&self) -> &CollectorOptions {
        &self.options
    }

    /// Adds an object with a reference count of 1, held by the caller.
    pub fn insert(&mut self, value: T) -> ObjectId {
        let entry = Entry {
            value,
            count: 1,
            references: HashMap::new(),
            observers: Vec::new(),
            modified: self.clock.tick(),
        };
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            ObjectId::new(index, slot.generation)
        } else {
            let index = u32::try_from(self.slots.len()).expect("object arena exhausted");
            self.slots.push(Slot {
                generation: 0,
                entry: Some(entry),
            });
            ObjectId::new(index, 0)
        }
    }

    /// Returns whether `id` refers to an object that has not been destroyed.
    pub fn is_alive(&self, id: ObjectId) -> bool {
        self.entry(id).is_some()
    }

    /// Returns the number of live objects.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns true if the domain holds no live objects.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Gets the payload of a live object.
    pub fn get(&self, id: ObjectId) -> Option<&T> {
        self.entry(id).map(|e| &e.value)
    }

    /// Gets the payload of a live object mutably.
    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut T> {
        self.entry_mut(id).map(|e| &mut e.value)
    }

    /// Returns the current reference count, or `None` for a dead handle.
    pub fn reference_count(&self, id: ObjectId) -> Option<usize> {
        self.entry(id).map(|e| e.count)
    }

    /// Iterates over the live object handles.
    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.slots.iter().zip(0u32..).filter_map(|(slot, index)| {
            slot.entry
                .as_ref()
                .map(|_| ObjectId::new(index, slot.generation))
        })
    }

    /// Reports the references `id` holds on other objects, with multiplicity.
    pub fn references(&self, id: ObjectId) -> Vec<(ObjectId, usize)> {
        self.entry(id)
            .map(|e| e.references.iter().map(|(t, n)| (*t, *n)).collect())
            .unwrap_or_default()
    }

    /// Adds a reference to `id`.
    ///
    /// `owner` is the object that will hold the reference, or `None` when the
    /// reference is held from outside the domain.
    ///
    /// # Panics
    ///
    /// Panics if `id` or `owner` is dead, or if `id` has no references left.
    pub fn register(&mut self, id: ObjectId, owner: Option<ObjectId>) {
        if let Err(err) = self.try_register(id, owner) {
            panic!("register failed: {err}");
        }
    }

    /// Adds a reference to `id`, reporting dead handles as errors.
    pub fn try_register(&mut self, id: ObjectId, owner: Option<ObjectId>) -> Result<()> {
        if let Some(owner) = owner {
            if !self.is_alive(owner) {
                return Err(VizflowError::StaleObject(owner));
            }
        }
        let entry = self.entry_mut(id).ok_or(VizflowError::StaleObject(id))?;
        if entry.count == 0 {
            return Err(VizflowError::StaleObject(id));
        }
        entry.count += 1;
        if let Some(owner) = owner {
            if let Some(owner_entry) = self.entry_mut(owner) {
                *owner_entry.references.entry(id).or_insert(0) += 1;
            }
        }
        Ok(())
    }

    /// Releases a reference to `id` previously added with the same `owner`.
    ///
    /// When the count reaches zero outside deferred collection, the object is
    /// destroyed before this returns.
    ///
    /// # Panics
    ///
    /// Panics if a handle is dead or `owner` holds no reference to `id`.
    pub fn unregister(&mut self, id: ObjectId, owner: Option<ObjectId>) {
        if let Err(err) = self.try_unregister(id, owner) {
            panic!("unregister failed: {err}");
        }
    }

    /// Releases a reference to `id`, reporting misuse as errors.
    pub fn try_unregister(&mut self, id: ObjectId, owner: Option<ObjectId>) -> Result<()> {
        let count = self
            .entry(id)
            .map(|e| e.count)
            .ok_or(VizflowError::StaleObject(id))?;
        if count == 0 {
            return Err(VizflowError::StaleObject(id));
        }
        if let Some(owner) = owner {
            let owner_entry = self
                .entry_mut(owner)
                .ok_or(VizflowError::StaleObject(owner))?;
            match owner_entry.references.get_mut(&id) {
                Some(held) if *held > 1 => *held -= 1,
                Some(_) => {
                    owner_entry.references.remove(&id);
                }
                None => {
                    return Err(VizflowError::MissingReference {
                        target: id,
                        owner: owner.to_string(),
                    })
                }
            }
        }
        self.release(id, 1);
        self.settle(self.options.collect_on_unregister);
        Ok(())
    }

    /// Creates a weak handle to `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is dead.
    pub fn downgrade(&self, id: ObjectId) -> WeakObject {
        assert!(self.is_alive(id), "cannot downgrade deleted object {id}");
        WeakObject { id }
    }

    /// Turns a weak handle back into a counted reference held by `owner`.
    ///
    /// Returns `None` once the object has been destroyed or is waiting for
    /// collection with no references left.
    pub fn upgrade(&mut self, weak: &WeakObject, owner: Option<ObjectId>) -> Option<ObjectId> {
        self.try_register(weak.id, owner).ok().map(|()| weak.id)
    }

    /// Registers a callback for `event` on `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is dead.
    pub fn add_observer<F>(&mut self, id: ObjectId, event: ObjectEvent, callback: F) -> ObserverTag
    where
        F: FnMut(ObjectId, ObjectEvent) + Send + 'static,
    {
        self.next_tag += 1;
        let tag = ObserverTag(self.next_tag);
        let entry = self
            .entry_mut(id)
            .unwrap_or_else(|| panic!("cannot observe deleted object {id}"));
        entry.observers.push(Observer {
            tag,
            event,
            callback: Box::new(callback),
        });
        tag
    }

    /// Removes an observer. Returns false if it was not registered on `id`.
    pub fn remove_observer(&mut self, id: ObjectId, tag: ObserverTag) -> bool {
        let Some(entry) = self.entry_mut(id) else {
            return false;
        };
        let before = entry.observers.len();
        entry.observers.retain(|o| o.tag != tag);
        entry.observers.len() != before
    }

    /// Marks `id` modified and notifies its `Modified` observers.
    pub fn modified(&mut self, id: ObjectId) {
        let stamp = self.clock.tick();
        if let Some(entry) = self.entry_mut(id) {
            entry.modified = stamp;
            Self::notify(id, entry, ObjectEvent::Modified);
        }
    }

    /// Returns when `id` was last modified.
    pub fn modified_time(&self, id: ObjectId) -> Option<TimeStamp> {
        self.entry(id).map(|e| e.modified)
    }

    /// Enters deferred collection until the returned guard is dropped.
    pub fn defer_collection(&mut self) -> DeferredCollection<'_, T> {
        DeferredCollection::new(self)
    }

    /// Increments the deferred-collection nesting level.
    ///
    /// Prefer [`ObjectDomain::defer_collection`], which cannot be left
    /// unbalanced.
    pub fn push_deferred(&mut self) {
        self.collector.nesting += 1;
    }

    /// Decrements the nesting level, running a collection pass at zero.
    pub fn pop_deferred(&mut self) -> Result<CollectionReport> {
        if self.collector.nesting == 0 {
            return Err(VizflowError::UnbalancedCollection);
        }
        self.collector.nesting -= 1;
        if self.collector.nesting > 0 {
            return Ok(CollectionReport::default());
        }
        Ok(self.settle(true))
    }

    /// Runs a collection pass over every pending candidate now.
    pub fn collect(&mut self) -> CollectionReport {
        if self.collector.nesting > 0 {
            log::debug!("collection requested while deferred; postponing");
            return CollectionReport::default();
        }
        self.settle(true)
    }

    /// Returns the collector state.
    pub fn collector_state(&self) -> CollectorState {
        self.collector.state()
    }

    /// Returns cumulative collector statistics.
    pub fn collector_stats(&self) -> CollectorStats {
        self.collector.stats
    }

    /// Returns the number of candidates waiting for the next pass.
    pub fn pending_candidates(&self) -> usize {
        self.collector.candidates.len()
    }

    pub(super) fn entry(&self, id: ObjectId) -> Option<&Entry<T>> {
        let slot = self.slots.get(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.entry.as_ref()
    }

    fn entry_mut(&mut self, id: ObjectId) -> Option<&mut Entry<T>> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.entry.as_mut()
    }

    fn notify(id: ObjectId, entry: &mut Entry<T>, event: ObjectEvent) {
        for observer in entry.observers.iter_mut().filter(|o| o.event == event) {
            (observer.callback)(id, event);
        }
    }

    /// Drops `n` references to a live object and queues it for deletion or
    /// cycle checking.
    fn release(&mut self, id: ObjectId, n: usize) {
        let deferred = self.collector.nesting > 0;
        let Some(entry) = self.entry_mut(id) else {
            return;
        };
        debug_assert!(entry.count >= n, "reference count underflow on {id}");
        entry.count = entry.count.saturating_sub(n);
        if entry.count == 0 {
            if deferred {
                self.collector.add_candidate(id);
            } else {
                self.collector.zeroed.push(id);
            }
        } else if !entry.references.is_empty() {
            self.collector.add_candidate(id);
        }
    }

    /// Deletes zero-count objects and, when `cycles` is set, collects
    /// unreachable cycles until nothing is left to do. Candidates stay queued
    /// otherwise. No-op while deferred or already collecting.
    fn settle(&mut self, cycles: bool) -> CollectionReport {
        let mut report = CollectionReport::default();
        if self.collector.nesting > 0 || self.collector.collecting {
            return report;
        }
        self.collector.collecting = true;
        loop {
            if !self.collector.zeroed.is_empty() {
                let doomed: Vec<ObjectId> = self.collector.zeroed.drain(..).collect();
                report.collected += self.destroy(&doomed);
                continue;
            }
            if !cycles || self.collector.candidates.is_empty() {
                break;
            }
            let pass = self.collect_cycles();
            report.merge(&pass);
        }
        self.collector.collecting = false;
        if report.collected > 0 {
            log::debug!(
                "collected {} objects ({} components from {} candidates)",
                report.collected,
                report.components,
                report.candidates
            );
        }
        report
    }

    /// Destroys a set of objects together.
    ///
    /// Every `Delete` notification fires before any payload is dropped, so
    /// observers of a cycle never see a half-destroyed neighbour.
    pub(super) fn destroy(&mut self, doomed: &[ObjectId]) -> usize {
        let doomed: Vec<ObjectId> = doomed
            .iter()
            .copied()
            .filter(|id| self.is_alive(*id))
            .collect();
        for id in &doomed {
            if let Some(entry) = self.entry_mut(*id) {
                Self::notify(*id, entry, ObjectEvent::Delete);
            }
        }

        let mut released: Vec<(ObjectId, usize)> = Vec::new();
        for id in &doomed {
            let slot = &mut self.slots[id.index() as usize];
            if let Some(entry) = slot.entry.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(id.index());
                self.live -= 1;
                self.collector.remove_candidate(*id);
                released.extend(entry.references);
                // The payload drops here, after all notifications.
            }
        }

        for (target, n) in released {
            self.release(target, n);
        }
        doomed.len()
    }
}
