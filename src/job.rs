// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The memory-limited job runner (§5, §6): admits decode tasks only when
//! their estimated peak memory fits the configured budget. The real
//! scheduler (worker pool, priority classes) is out of scope (§1); this
//! module defines the trait plus a synchronous reference runner for tests.

use parking_lot::Mutex;

/// Scheduling priority a job is submitted at.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Priority {
    /// Decode tasks run at low priority (§4.D `try_start_decode`).
    Low,
}

/// Bounded-memory job queue consumed by [`crate::segment::Segment`] and
/// [`crate::cross_segment::CrossSegment`] decode tasks.
pub trait JobRunner: Send + Sync {
    /// Submits `run` for execution once `estimate` bytes fit the runner's
    /// remaining memory budget. Returns whether the job was admitted.
    ///
    /// If admitted, `run` is invoked exactly once. If rejected, `run` is
    /// dropped without ever being invoked; the caller must be prepared to
    /// retry submission later (e.g. by resetting whatever in-flight flag it
    /// set before calling this), since budget may free up over time.
    fn queue_job(&self, estimate: usize, priority: Priority, run: Box<dyn FnOnce() + Send>) -> bool;
}

/// A synchronous reference [`JobRunner`] that tracks an in-memory budget and
/// runs jobs inline, immediately, on the calling thread. Sufficient for
/// tests and single-threaded embedding; a production caller supplies a real
/// worker-pool-backed implementation.
pub struct InlineJobRunner {
    budget: usize,
    in_use: Mutex<usize>,
}

impl InlineJobRunner {
    /// Creates a runner with the given total memory budget in bytes.
    #[must_use]
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            in_use: Mutex::new(0),
        }
    }

    /// Returns whether `estimate` currently fits the remaining budget.
    #[must_use]
    pub fn admits(&self, estimate: usize) -> bool {
        *self.in_use.lock() + estimate <= self.budget
    }
}

impl JobRunner for InlineJobRunner {
    fn queue_job(&self, estimate: usize, _priority: Priority, run: Box<dyn FnOnce() + Send>) -> bool {
        if !self.admits(estimate) {
            log::debug!("decode job ({estimate} bytes) rejected: over memory budget");
            return false;
        }

        *self.in_use.lock() += estimate;
        run();
        *self.in_use.lock() -= estimate;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn runs_job_within_budget() {
        let runner = InlineJobRunner::new(1024);
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);

        runner.queue_job(
            512,
            Priority::Low,
            Box::new(move || ran2.store(true, Ordering::SeqCst)),
        );

        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn rejects_job_over_budget() {
        let runner = InlineJobRunner::new(100);
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);

        runner.queue_job(
            1000,
            Priority::Low,
            Box::new(move || ran2.store(true, Ordering::SeqCst)),
        );

        assert!(!ran.load(Ordering::SeqCst));
    }
}
