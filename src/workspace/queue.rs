// src/workspace/queue.rs

//! Priority queue of ready jobs.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::trace;

use crate::job::{Job, JobPriority};
use crate::sync::lock;

/// A job that became ready, with the ticket it had at that moment.
///
/// The dispatcher drops entries whose ticket no longer matches the job's.
#[derive(Debug)]
pub(crate) struct ReadyEntry {
    pub priority: JobPriority,
    pub ticket: u64,
    pub job: Arc<Job>,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReadyEntry {}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.ticket.cmp(&self.ticket))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub(crate) struct ReadyQueue {
    heap: Mutex<BinaryHeap<ReadyEntry>>,
    notify: Notify,
}

impl ReadyQueue {
    pub fn push(&self, job: Arc<Job>, ticket: u64) {
        let priority = job.priority();
        trace!(locator = %job.locator(), ticket, "queueing ready job");
        lock(&self.heap).push(ReadyEntry {
            priority,
            ticket,
            job,
        });
        self.notify.notify_one();
    }

    pub fn pop(&self) -> Option<ReadyEntry> {
        lock(&self.heap).pop()
    }

    /// Wait for the best entry.
    pub async fn pop_wait(&self) -> ReadyEntry {
        loop {
            let notified = self.notify.notified();
            if let Some(entry) = self.pop() {
                return entry;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.heap).len()
    }
}
