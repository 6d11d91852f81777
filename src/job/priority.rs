// src/job/priority.rs

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::dag::resource::ResourceId;

/// Ordering key of a ready job in the dispatch queue.
///
/// Fewer unsatisfied dependencies first, then earlier submission, then the
/// older resource. `Ord` is arranged so that the job to run first compares
/// *greatest*, which is what `BinaryHeap` pops.
///
/// The key is taken when a job becomes `READY`, and a job only gets there
/// with no unsatisfied dependency, so queue entries all carry `0` and the
/// dispatch order is submission time then resource id. A job that loses a
/// dependency while queued goes back to waiting and its entry turns stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobPriority {
    pub unsatisfied: usize,
    pub submitted_at: Option<DateTime<Utc>>,
    pub id: ResourceId,
}

impl Ord for JobPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .unsatisfied
            .cmp(&self.unsatisfied)
            .then_with(|| match (self.submitted_at, other.submitted_at) {
                (Some(a), Some(b)) => b.cmp(&a),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for JobPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
