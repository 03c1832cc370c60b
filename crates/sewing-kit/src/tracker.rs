//! Provenance bookkeeping for steps.
//!
//! Records which step submitted which nested step and which plugins produced
//! a step. Both maps live outside the steps and are keyed on step identity;
//! parent links are weak so the tracker never keeps a step alive.
//!
//! Each entry also holds a weak handle to the keyed step. That pins the
//! allocation, so its address cannot be handed to a new step while the entry
//! exists, and entries whose step is gone are pruned on the next insert.

use crate::step::{StepKey, StepRef};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

type WeakStep = Weak<dyn crate::step::Step>;

struct Entry<T> {
    step: WeakStep,
    value: T,
}

impl<T> Entry<T> {
    fn new(step: &StepRef, value: T) -> Self {
        Self {
            step: Arc::downgrade(step),
            value,
        }
    }

    fn is_live(&self) -> bool {
        self.step.strong_count() > 0
    }
}

fn insert<T>(map: &mut HashMap<StepKey, Entry<T>>, step: &StepRef, value: T) {
    map.retain(|_, entry| entry.is_live());
    map.insert(StepKey::of(step), Entry::new(step, value));
}

#[derive(Default)]
pub struct StepTracker {
    parents: Mutex<HashMap<StepKey, Entry<WeakStep>>>,
    sources: Mutex<HashMap<StepKey, Entry<Vec<String>>>>,
}

impl std::fmt::Debug for StepTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepTracker")
            .field("parents", &self.parents.lock().len())
            .field("sources", &self.sources.lock().len())
            .finish()
    }
}

impl StepTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `parent` submitted `child`. A step is never recorded as
    /// its own parent.
    pub fn set_parent(&self, child: &StepRef, parent: &StepRef) {
        if Arc::ptr_eq(child, parent) {
            return;
        }
        insert(&mut *self.parents.lock(), child, Arc::downgrade(parent));
    }

    pub fn parent(&self, step: &StepRef) -> Option<StepRef> {
        self.parents
            .lock()
            .get(&StepKey::of(step))
            .and_then(|entry| entry.value.upgrade())
    }

    /// Ancestors of `step`, nearest first.
    pub fn ancestors(&self, step: &StepRef) -> Vec<StepRef> {
        let mut ancestors = Vec::new();
        let mut seen = HashSet::from([StepKey::of(step)]);
        let mut current = self.parent(step);

        while let Some(parent) = current {
            if !seen.insert(StepKey::of(&parent)) {
                break;
            }
            current = self.parent(&parent);
            ancestors.push(parent);
        }

        ancestors
    }

    /// Record the plugin chain that produced `step`, root plugin first.
    pub fn set_source(&self, step: &StepRef, plugins: Vec<String>) {
        if plugins.is_empty() {
            return;
        }
        insert(&mut *self.sources.lock(), step, plugins);
    }

    pub fn source(&self, step: &StepRef) -> Option<Vec<String>> {
        self.sources
            .lock()
            .get(&StepKey::of(step))
            .map(|entry| entry.value.clone())
    }
}
