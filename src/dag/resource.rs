// src/dag/resource.rs

//! Base node of the dependency graph.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::trace;

use crate::dag::dependency::Dependency;
use crate::errors::{JobdagError, Result};
use crate::sync::lock;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide monotonic resource identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    pub(crate) fn next() -> Self {
        ResourceId(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Anything that can sit at either end of a [`Dependency`].
///
/// Concrete resources (jobs, tokens) embed a [`ResourceNode`] that keeps the
/// weak back-references to the dependencies pointing *from* them.
pub trait Resource: Send + Sync + fmt::Debug {
    fn node(&self) -> &ResourceNode;

    fn id(&self) -> ResourceId {
        self.node().id()
    }

    /// Called by one of this resource's own dependencies when its
    /// satisfaction flipped.
    ///
    /// Only resources that have dependencies (jobs) can handle this.
    fn dependency_changed(&self, dependency: &Dependency, satisfied: bool) -> Result<()> {
        Err(JobdagError::assertion(format!(
            "resource {} cannot handle a change in dependency {dependency} (satisfied: {satisfied})",
            self.id()
        )))
    }

    /// Called when one of this resource's dependencies can never be
    /// satisfied again.
    fn dependency_failed(&self, dependency: &Dependency) -> Result<()> {
        Err(JobdagError::assertion(format!(
            "resource {} cannot handle the failure of dependency {dependency}",
            self.id()
        )))
    }
}

/// Identity plus the set of dependents of a resource.
///
/// Dependents are held weakly: a job strongly owns the dependencies it
/// declares, so a strong reference here would keep jobs alive forever.
#[derive(Debug)]
pub struct ResourceNode {
    id: ResourceId,
    dependents: Mutex<Vec<Weak<Dependency>>>,
}

impl Default for ResourceNode {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceNode {
    pub fn new() -> Self {
        Self {
            id: ResourceId::next(),
            dependents: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn add_dependent(&self, dependency: &Arc<Dependency>) {
        let mut dependents = lock(&self.dependents);
        let ptr = Arc::as_ptr(dependency);
        if !dependents.iter().any(|w| std::ptr::eq(w.as_ptr(), ptr)) {
            dependents.push(Arc::downgrade(dependency));
        }
    }

    /// Remove `dependency` from the dependents set, pruning expired entries
    /// along the way.
    pub fn remove_dependent(&self, dependency: *const Dependency) {
        let mut dependents = lock(&self.dependents);
        dependents.retain(|w| w.strong_count() > 0 && !std::ptr::eq(w.as_ptr(), dependency));
    }

    /// Live dependents; expired entries are dropped.
    pub fn dependents(&self) -> Vec<Arc<Dependency>> {
        let mut dependents = lock(&self.dependents);
        dependents.retain(|w| w.strong_count() > 0);
        dependents.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn dependent_count(&self) -> usize {
        self.dependents().len()
    }

    /// Re-check every live dependent of this resource.
    ///
    /// The dependents set is snapshotted first so that no lock is held while
    /// the checks run (a check may cascade back into the graph).
    pub fn notify_dependents(&self) {
        let dependents = self.dependents();
        trace!(resource = %self.id, count = dependents.len(), "notifying dependents");
        for dependency in dependents {
            dependency.check();
        }
    }
}
