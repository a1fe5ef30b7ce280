//! Path-conflict scheduling.
//!
//! A job claims the paths it touches. It starts only when no running job
//! holds an overlapping claim and no earlier queued job conflicts with it,
//! so jobs on the same path run in submission order. An exclusive claim
//! conflicts with everything.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use tracing::debug;

use retrace_core::paths_overlap;

use crate::task::TaskId;

/// Paths a job will touch.
#[derive(Debug, Clone, Default)]
pub struct Claim {
    paths: Vec<PathBuf>,
    exclusive: bool,
}

impl Claim {
    /// Claim a set of paths.
    pub fn paths(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            exclusive: false,
        }
    }

    /// Claim the whole engine.
    pub fn exclusive() -> Self {
        Self {
            paths: Vec::new(),
            exclusive: true,
        }
    }

    /// Check whether two claims cannot run at the same time.
    pub fn conflicts_with(&self, other: &Claim) -> bool {
        if self.exclusive || other.exclusive {
            return true;
        }
        self.paths
            .iter()
            .any(|a| other.paths.iter().any(|b| paths_overlap(a, b)))
    }
}

/// FIFO scheduler over path claims.
///
/// `T` is the payload handed back when a queued job is released.
#[derive(Debug)]
pub struct Scheduler<T> {
    running: HashMap<TaskId, Claim>,
    queue: VecDeque<(TaskId, Claim, T)>,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self {
            running: HashMap::new(),
            queue: VecDeque::new(),
        }
    }
}

impl<T> Scheduler<T> {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a job. Returns the payload back when it may start now.
    pub fn submit(&mut self, task: TaskId, claim: Claim, payload: T) -> Option<T> {
        let blocked = self.running.values().any(|c| c.conflicts_with(&claim))
            || self.queue.iter().any(|(_, c, _)| c.conflicts_with(&claim));

        if blocked {
            debug!(%task, queued = self.queue.len() + 1, "job queued behind conflicting work");
            self.queue.push_back((task, claim, payload));
            None
        } else {
            self.running.insert(task, claim);
            Some(payload)
        }
    }

    /// Mark `task` finished and release queued jobs that can now start.
    pub fn finish(&mut self, task: TaskId) -> Vec<(TaskId, T)> {
        self.running.remove(&task);

        let mut released = Vec::new();
        let mut still_queued: VecDeque<(TaskId, Claim, T)> = VecDeque::new();

        while let Some((id, claim, payload)) = self.queue.pop_front() {
            let blocked = self.running.values().any(|c| c.conflicts_with(&claim))
                || still_queued.iter().any(|(_, c, _)| c.conflicts_with(&claim));

            if blocked {
                still_queued.push_back((id, claim, payload));
            } else {
                self.running.insert(id, claim);
                released.push((id, payload));
            }
        }

        self.queue = still_queued;
        released
    }

    /// Remove a job that has not started yet.
    pub fn cancel_queued(&mut self, task: TaskId) -> Option<T> {
        let position = self.queue.iter().position(|(id, _, _)| *id == task)?;
        self.queue.remove(position).map(|(_, _, payload)| payload)
    }

    /// Check if `task` is waiting in the queue.
    pub fn is_queued(&self, task: TaskId) -> bool {
        self.queue.iter().any(|(id, _, _)| *id == task)
    }

    /// Number of running jobs.
    pub fn running(&self) -> usize {
        self.running.len()
    }

    /// Number of queued jobs.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(paths: &[&str]) -> Claim {
        Claim::paths(paths.iter().map(PathBuf::from).collect())
    }

    #[test]
    fn test_overlapping_job_waits() {
        let mut scheduler = Scheduler::new();
        assert!(scheduler.submit(TaskId(1), claim(&["/a"]), 1).is_some());
        assert!(scheduler.submit(TaskId(2), claim(&["/a/b"]), 2).is_none());
        assert!(scheduler.submit(TaskId(3), claim(&["/c"]), 3).is_some());

        assert!(scheduler.finish(TaskId(3)).is_empty());
        assert_eq!(scheduler.finish(TaskId(1)), vec![(TaskId(2), 2)]);
    }

    #[test]
    fn test_queue_preserves_order_on_same_path() {
        let mut scheduler = Scheduler::new();
        scheduler.submit(TaskId(1), claim(&["/a"]), 1);
        scheduler.submit(TaskId(2), claim(&["/a"]), 2);
        scheduler.submit(TaskId(3), claim(&["/a"]), 3);

        assert_eq!(scheduler.finish(TaskId(1)), vec![(TaskId(2), 2)]);
        assert_eq!(scheduler.finish(TaskId(2)), vec![(TaskId(3), 3)]);
    }

    #[test]
    fn test_exclusive_waits_for_everything() {
        let mut scheduler = Scheduler::new();
        scheduler.submit(TaskId(1), claim(&["/a"]), 1);
        scheduler.submit(TaskId(2), claim(&["/b"]), 2);
        assert!(scheduler.submit(TaskId(3), Claim::exclusive(), 3).is_none());
        assert!(scheduler.submit(TaskId(4), claim(&["/z"]), 4).is_none());

        assert!(scheduler.finish(TaskId(1)).is_empty());
        assert_eq!(scheduler.finish(TaskId(2)), vec![(TaskId(3), 3)]);
        assert_eq!(scheduler.finish(TaskId(3)), vec![(TaskId(4), 4)]);
    }

    #[test]
    fn test_cancel_queued() {
        let mut scheduler = Scheduler::new();
        scheduler.submit(TaskId(1), claim(&["/a"]), 1);
        scheduler.submit(TaskId(2), claim(&["/a"]), 2);

        assert_eq!(scheduler.cancel_queued(TaskId(2)), Some(2));
        assert!(!scheduler.is_queued(TaskId(2)));
        assert!(scheduler.finish(TaskId(1)).is_empty());
    }
}
