// src/dag/graph.rs

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::PlanFile;
use crate::errors::{JobdagError, Result};

/// Static job graph of a plan, keyed by job name.
///
/// Edges run from a dependency to the job that names it in `after`. Used
/// for cycle detection during validation and for the submission order.
#[derive(Debug, Clone)]
pub struct DagGraph<'a> {
    graph: DiGraphMap<&'a str, ()>,
}

impl<'a> DagGraph<'a> {
    pub fn from_plan(plan: &'a PlanFile) -> Self {
        Self::from_edges(
            plan.job
                .iter()
                .map(|(name, job)| (name.as_str(), job.after.as_slice())),
        )
    }

    /// Build from `(job, after)` pairs.
    ///
    /// Names that only appear in `after` become nodes as well; repeated
    /// entries collapse into one edge.
    pub fn from_edges<I>(edges: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [String])>,
    {
        let mut graph = DiGraphMap::new();
        for (name, after) in edges {
            graph.add_node(name);
            for dep in after {
                graph.add_edge(dep.as_str(), name, ());
            }
        }
        Self { graph }
    }

    /// Immediate dependencies of `name`, in declaration order.
    pub fn dependencies_of(&self, name: &'a str) -> Vec<&'a str> {
        if !self.graph.contains_node(name) {
            return Vec::new();
        }
        self.graph
            .neighbors_directed(name, Direction::Incoming)
            .collect()
    }

    /// Dependencies before dependents.
    pub fn topological_order(&self) -> Result<Vec<&'a str>> {
        toposort(&self.graph, None).map_err(|cycle| {
            JobdagError::DagCycle(format!(
                "cycle detected in job graph involving job '{}'",
                cycle.node_id()
            ))
        })
    }
}
