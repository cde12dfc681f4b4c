//! Named lists of sequential actions with success/failure reporting.
//!
//! A queue runs its jobs strictly in order and stops at the first failure.
//! The component that owns the queue executes the current action (usually
//! by sending a command and waiting for the result), then feeds the
//! outcome back via [`JobQueue::set_result`].

use crate::event::{ClientId, SingleSubject};
use alloc::vec::Vec;
use log::debug;

/// Outcome of a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobResult {
    #[default]
    Pending,
    Success,
    Failed,
}

#[derive(Debug)]
struct Job<A> {
    action: A,
    result: JobResult,
}

/// What happened to the queue after reporting a job result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStep<A> {
    /// The next job is ready to be executed.
    Next(A),
    /// The queue ran to completion or hit a failure; the registered
    /// observer must be notified with the final result.
    Finished(JobResult),
}

/// An ordered sequence of jobs with a single result observer.
#[derive(Debug)]
pub struct JobQueue<A: Copy> {
    name: &'static str,
    jobs: Vec<Job<A>>,
    /// Index of the job currently executing, valid while running.
    index: usize,
    running: bool,
    observer: SingleSubject,
}

impl<A: Copy> JobQueue<A> {
    pub fn new(name: &'static str, actions: &[A]) -> Self {
        Self {
            name,
            jobs: actions
                .iter()
                .map(|&action| Job {
                    action,
                    result: JobResult::Pending,
                })
                .collect(),
            index: 0,
            running: false,
            observer: SingleSubject::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Starts the queue from the first job. All job results are reset to
    /// `Pending`; a queue is never re-run with stale results.
    pub fn start(&mut self, observer: ClientId) -> Option<A> {
        debug!("[JOBS] Starting queue '{}'", self.name);
        for job in self.jobs.iter_mut() {
            job.result = JobResult::Pending;
        }
        self.index = 0;
        self.running = true;
        self.observer.unsubscribe();
        let _ = self.observer.subscribe(observer);
        self.jobs.first().map(|j| j.action)
    }

    /// Aborts the queue without notifying the observer.
    pub fn stop(&mut self) {
        self.running = false;
        self.observer.unsubscribe();
    }

    /// The action currently awaiting execution or a result.
    pub fn current(&self) -> Option<A> {
        if self.running {
            self.jobs.get(self.index).map(|j| j.action)
        } else {
            None
        }
    }

    /// Reports the result of the current job and advances the queue.
    ///
    /// Returns `None` when the queue is not running (e.g., stopped by a
    /// termination event while a command was in flight).
    pub fn set_result(&mut self, result: JobResult) -> Option<QueueStep<A>> {
        if !self.running {
            return None;
        }
        debug_assert!(result != JobResult::Pending);
        self.jobs[self.index].result = result;
        if result == JobResult::Failed {
            debug!("[JOBS] Queue '{}' failed at job {}", self.name, self.index);
            self.running = false;
            return Some(QueueStep::Finished(JobResult::Failed));
        }
        self.index += 1;
        match self.jobs.get(self.index) {
            Some(job) => Some(QueueStep::Next(job.action)),
            None => {
                debug!("[JOBS] Queue '{}' finished", self.name);
                self.running = false;
                Some(QueueStep::Finished(JobResult::Success))
            }
        }
    }

    /// Takes the observer registered at start; called exactly once after a
    /// `Finished` step.
    pub fn take_observer(&mut self) -> Option<ClientId> {
        self.observer.notify()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Action {
        A,
        B,
        C,
    }

    #[test]
    fn test_queue_runs_in_order() {
        let mut q = JobQueue::new("test", &[Action::A, Action::B, Action::C]);
        assert_eq!(q.start(ClientId::Starter), Some(Action::A));
        assert_eq!(
            q.set_result(JobResult::Success),
            Some(QueueStep::Next(Action::B))
        );
        assert_eq!(
            q.set_result(JobResult::Success),
            Some(QueueStep::Next(Action::C))
        );
        assert_eq!(
            q.set_result(JobResult::Success),
            Some(QueueStep::Finished(JobResult::Success))
        );
        assert!(!q.is_running());
        assert_eq!(q.take_observer(), Some(ClientId::Starter));
    }

    #[test]
    fn test_queue_stops_at_first_failure() {
        let mut q = JobQueue::new("test", &[Action::A, Action::B]);
        q.start(ClientId::Starter);
        assert_eq!(
            q.set_result(JobResult::Failed),
            Some(QueueStep::Finished(JobResult::Failed))
        );
        assert_eq!(q.current(), None);
    }

    #[test]
    fn test_restart_resets_results() {
        let mut q = JobQueue::new("test", &[Action::A]);
        q.start(ClientId::Starter);
        q.set_result(JobResult::Failed);
        let _ = q.take_observer();
        // A fresh run starts from the first job with a pending result.
        assert_eq!(q.start(ClientId::Starter), Some(Action::A));
        assert_eq!(
            q.set_result(JobResult::Success),
            Some(QueueStep::Finished(JobResult::Success))
        );
    }

    #[test]
    fn test_result_after_stop_is_ignored() {
        let mut q = JobQueue::new("test", &[Action::A]);
        q.start(ClientId::Starter);
        q.stop();
        assert_eq!(q.set_result(JobResult::Success), None);
        assert_eq!(q.take_observer(), None);
    }
}
