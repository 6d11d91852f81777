// src/token.rs

//! Counted admission control.
//!
//! A [`CounterToken`] is a capacity semaphore that lives in the dependency
//! graph. Jobs declare a counted dependency on it; the dependency is
//! satisfied while there is room for the requested amount. The capacity
//! itself is reserved atomically with [`CounterToken::try_claim`] when the
//! job is dispatched, and returned when the [`TokenClaim`] is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::dag::dependency::{Condition, Dependency, DependencyId};
use crate::dag::resource::{Resource, ResourceNode};
use crate::errors::{JobdagError, Result};
use crate::sync::lock;

#[derive(Debug)]
struct TokenState {
    limit: u32,
    used: u32,
    claims: HashMap<DependencyId, u32>,
}

#[derive(Debug)]
pub struct CounterToken {
    node: ResourceNode,
    state: Mutex<TokenState>,
}

impl Resource for CounterToken {
    fn node(&self) -> &ResourceNode {
        &self.node
    }
}

impl CounterToken {
    pub fn new(limit: u32) -> Arc<Self> {
        Arc::new(Self {
            node: ResourceNode::new(),
            state: Mutex::new(TokenState {
                limit,
                used: 0,
                claims: HashMap::new(),
            }),
        })
    }

    pub fn limit(&self) -> u32 {
        lock(&self.state).limit
    }

    pub fn used(&self) -> u32 {
        lock(&self.state).used
    }

    /// Change the ceiling and re-check every dependent.
    ///
    /// Lowering the limit below the claimed amount does not revoke running
    /// claims; it only keeps new ones out until enough capacity returns.
    pub fn set_limit(&self, limit: u32) {
        {
            let mut state = lock(&self.state);
            debug!(token = %self.id(), from = state.limit, to = limit, "token limit changed");
            state.limit = limit;
        }
        self.node.notify_dependents();
    }

    /// A dependency satisfied while `amount` units of capacity are free.
    pub fn create_dependency(self: &Arc<Self>, amount: u32) -> Arc<Dependency> {
        let limit = self.limit();
        if amount > limit {
            warn!(token = %self.id(), amount, limit, "requested amount exceeds token limit, dependency can only be satisfied after a limit increase");
        }
        let origin: Arc<dyn Resource> = self.clone();
        Dependency::new(
            origin,
            CounterCondition {
                token: Arc::clone(self),
                amount,
            },
        )
    }

    /// Tokens only hand out counted dependencies.
    pub fn dependency(&self) -> Result<Arc<Dependency>> {
        Err(JobdagError::argument(
            "cannot make a simple dependency from a token, use create_dependency(amount)",
        ))
    }

    /// Atomically reserve `amount` units on behalf of `dependency`.
    ///
    /// Returns `None` when there is not enough free capacity. Dependents are
    /// re-checked after a successful claim so competing jobs see the change.
    pub fn try_claim(
        self: &Arc<Self>,
        dependency: DependencyId,
        amount: u32,
    ) -> Result<Option<TokenClaim>> {
        {
            let mut state = lock(&self.state);
            if state.claims.contains_key(&dependency) {
                return Err(JobdagError::assertion(format!(
                    "dependency {dependency:?} already holds a claim on token {}",
                    self.id()
                )));
            }
            let wanted = state.used.checked_add(amount);
            match wanted {
                Some(total) if total <= state.limit => {
                    state.used = total;
                    state.claims.insert(dependency, amount);
                    debug!(token = %self.id(), amount, used = state.used, limit = state.limit, "token claimed");
                }
                _ => {
                    debug!(token = %self.id(), amount, used = state.used, limit = state.limit, "token busy");
                    return Ok(None);
                }
            }
        }

        self.node.notify_dependents();
        Ok(Some(TokenClaim {
            token: Arc::clone(self),
            dependency,
            amount,
            released: false,
        }))
    }

    fn holds_claim(&self, dependency: DependencyId) -> bool {
        lock(&self.state).claims.contains_key(&dependency)
    }

    fn has_room_for(&self, amount: u32) -> bool {
        let state = lock(&self.state);
        state
            .used
            .checked_add(amount)
            .is_some_and(|total| total <= state.limit)
    }

    fn release(&self, dependency: DependencyId) {
        let released = {
            let mut state = lock(&self.state);
            match state.claims.remove(&dependency) {
                Some(amount) => {
                    state.used = state.used.saturating_sub(amount);
                    debug!(token = %self.id(), amount, used = state.used, "token released");
                    true
                }
                None => false,
            }
        };
        if released {
            self.node.notify_dependents();
        } else {
            warn!(token = %self.id(), ?dependency, "released a claim that was not held");
        }
    }
}

#[derive(Debug)]
struct CounterCondition {
    token: Arc<CounterToken>,
    amount: u32,
}

impl Condition for CounterCondition {
    fn satisfied(&self, dependency: &Dependency) -> Result<bool> {
        // A holder keeps seeing its own claim as satisfied.
        Ok(self.token.holds_claim(dependency.id()) || self.token.has_room_for(self.amount))
    }

    fn counter(&self) -> Option<(&Arc<CounterToken>, u32)> {
        Some((&self.token, self.amount))
    }
}

/// Capacity reserved on a [`CounterToken`]; returned on release or drop.
#[derive(Debug)]
#[must_use = "dropping a claim releases it immediately"]
pub struct TokenClaim {
    token: Arc<CounterToken>,
    dependency: DependencyId,
    amount: u32,
    released: bool,
}

impl TokenClaim {
    pub fn amount(&self) -> u32 {
        self.amount
    }

    pub fn token(&self) -> &Arc<CounterToken> {
        &self.token
    }

    pub fn release(mut self) {
        self.released = true;
        self.token.release(self.dependency);
    }
}

impl Drop for TokenClaim {
    fn drop(&mut self) {
        if !self.released {
            self.token.release(self.dependency);
        }
    }
}
