//! In-memory job index and the time-ordered pending queue.
//!
//! Both live inside one [`Registry`] guarded by a single lock owned by the scheduler.
//! The lock is only held for map and heap manipulation.

use chrono::{DateTime, Utc};
use pkgdeploy_core::{JobHandle, JobId, Result};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

/// Every job known to the scheduler, by id.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: HashMap<JobId, JobHandle>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job. Returns false if a job with the same id is already present.
    pub fn put(&mut self, job: JobHandle) -> bool {
        if self.jobs.contains_key(&job.id()) {
            return false;
        }
        self.jobs.insert(job.id(), job);
        true
    }

    pub fn get(&self, id: JobId) -> Option<JobHandle> {
        self.jobs.get(&id).cloned()
    }

    pub fn remove(&mut self, id: JobId) -> Option<JobHandle> {
        self.jobs.remove(&id)
    }

    /// Handles of all jobs matching the predicate.
    pub fn select(&self, mut predicate: impl FnMut(&JobHandle) -> bool) -> Vec<JobHandle> {
        self.jobs.values().filter(|j| predicate(j)).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[derive(Debug)]
struct QueueEntry {
    execution_time: DateTime<Utc>,
    seq: u64,
    job: JobHandle,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.execution_time
            .cmp(&other.execution_time)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Min-heap of pending jobs keyed by the execution time they had when pushed.
///
/// Entries are not removed when a job is cancelled; consumers must check the
/// status of a popped job before acting on it. An entry whose time no longer
/// matches its job's execution time was superseded by [`ScheduledQueue::reschedule`]
/// and is dropped when it reaches the top.
#[derive(Debug, Default)]
pub struct ScheduledQueue {
    heap: BinaryHeap<Reverse<QueueEntry>>,
    next_seq: u64,
}

impl ScheduledQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, job: JobHandle) {
        let entry = QueueEntry {
            execution_time: job.execution_time(),
            seq: self.next_seq,
            job,
        };
        self.next_seq += 1;
        self.heap.push(Reverse(entry));
    }

    /// Execution time of the earliest entry.
    pub fn next_execution_time(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|Reverse(e)| e.execution_time)
    }

    /// Pop the earliest entry if it is due at `now`.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<JobHandle> {
        while self.next_execution_time().is_some_and(|t| t <= now) {
            let Reverse(entry) = self.heap.pop()?;
            if entry.execution_time == entry.job.execution_time() {
                return Some(entry.job);
            }
        }
        None
    }

    /// Move a `SCHEDULED` job to a new execution time. The job's previous entry
    /// becomes stale.
    pub fn reschedule(&mut self, job: JobHandle, execution_time: DateTime<Utc>) -> Result<()> {
        job.set_execution_time(execution_time)?;
        self.push(job);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Job index and pending queue, guarded together.
#[derive(Debug, Default)]
pub struct Registry {
    pub store: JobStore,
    pub queue: ScheduledQueue,
}
