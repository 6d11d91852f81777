// src/dag/mod.rs

//! Dependency graph.
//!
//! - [`resource`] is the base node every participant embeds.
//! - [`dependency`] holds the observable edges and their predicates.
//! - [`graph`] is the static plan graph used for validation and submit order.

pub mod dependency;
pub mod graph;
pub mod resource;

pub use dependency::{Condition, Dependency, DependencyId};
pub use graph::DagGraph;
pub use resource::{Resource, ResourceId, ResourceNode};
