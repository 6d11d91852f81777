// src/dag/dependency.rs

//! Observable edges of the dependency graph.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use tracing::{debug, warn};

use crate::dag::resource::Resource;
use crate::errors::{JobdagError, Result};
use crate::sync::lock;
use crate::token::CounterToken;

static NEXT_DEPENDENCY_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyId(u64);

impl DependencyId {
    fn next() -> Self {
        DependencyId(NEXT_DEPENDENCY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Satisfaction predicate of a dependency.
///
/// One implementation per kind of edge: "upstream job is done", "token has
/// capacity", or anything a caller wants to plug in.
pub trait Condition: Send + Sync + fmt::Debug {
    /// Is the dependency satisfied right now?
    ///
    /// An error is logged and treated as "not satisfied".
    fn satisfied(&self, dependency: &Dependency) -> Result<bool>;

    /// True when the condition can never become satisfied again.
    fn failed(&self) -> bool {
        false
    }

    /// Token and amount to claim before the dependent starts, if any.
    fn counter(&self) -> Option<(&Arc<CounterToken>, u32)> {
        None
    }
}

/// A directed edge `origin -> target`.
///
/// The target is held weakly: it is the job that declared (and strongly
/// owns) this dependency.
pub struct Dependency {
    id: DependencyId,
    origin: Arc<dyn Resource>,
    target: OnceLock<Weak<dyn Resource>>,
    condition: Box<dyn Condition>,
    last_satisfied: Mutex<bool>,
}

impl Dependency {
    pub fn new(origin: Arc<dyn Resource>, condition: impl Condition + 'static) -> Arc<Self> {
        Arc::new(Self {
            id: DependencyId::next(),
            origin,
            target: OnceLock::new(),
            condition: Box::new(condition),
            last_satisfied: Mutex::new(false),
        })
    }

    pub fn id(&self) -> DependencyId {
        self.id
    }

    pub fn origin(&self) -> &Arc<dyn Resource> {
        &self.origin
    }

    pub fn target(&self) -> Option<Arc<dyn Resource>> {
        self.target.get().and_then(Weak::upgrade)
    }

    /// Set the dependent resource; a dependency has exactly one target.
    pub(crate) fn attach(&self, target: Weak<dyn Resource>) -> Result<()> {
        self.target
            .set(target)
            .map_err(|_| JobdagError::argument(format!("dependency {self} already has a target")))
    }

    /// Result of the last [`Dependency::check`].
    pub fn last_satisfied(&self) -> bool {
        *lock(&self.last_satisfied)
    }

    pub fn counter(&self) -> Option<(&Arc<CounterToken>, u32)> {
        self.condition.counter()
    }

    /// Evaluate the predicate without recording or notifying anything.
    pub fn satisfied(&self) -> bool {
        match self.condition.satisfied(self) {
            Ok(s) => s,
            Err(err) => {
                warn!(dependency = %self, error = %err, "dependency predicate failed; treating as unsatisfied");
                false
            }
        }
    }

    /// Re-evaluate the predicate and notify the target of a change.
    ///
    /// The target hears about a value only when it differs from the last
    /// checked one. Concurrent checks of the same dependency are serialised.
    /// Returns the freshly computed value.
    pub fn check(&self) -> bool {
        let now = {
            let mut last = lock(&self.last_satisfied);
            let now = self.satisfied();
            debug!(dependency = %self, satisfied = now, was = *last, "checked dependency");

            if now != *last {
                match self.target() {
                    Some(target) => {
                        if let Err(err) = target.dependency_changed(self, now) {
                            warn!(dependency = %self, error = %err, "target rejected dependency change");
                        }
                    }
                    None => debug!(dependency = %self, "dependency has no live target"),
                }
                *last = now;
            }
            now
        };

        if !now && self.condition.failed() {
            if let Some(target) = self.target() {
                if let Err(err) = target.dependency_failed(self) {
                    warn!(dependency = %self, error = %err, "target rejected dependency failure");
                }
            }
        }

        now
    }
}

impl Drop for Dependency {
    fn drop(&mut self) {
        self.origin.node().remove_dependent(self as *const Dependency);
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target() {
            Some(target) => write!(f, "Dep[{} -> {}]", self.origin.id(), target.id()),
            None => write!(f, "Dep[{} -> ?]", self.origin.id()),
        }
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("id", &self.id)
            .field("origin", &self.origin.id())
            .field("condition", &self.condition)
            .finish_non_exhaustive()
    }
}
