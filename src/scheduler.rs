use crate::promise::{Promise, PromiseState};
use crate::value::Value;
use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

/// A zero-argument unit of deferred work.
pub type Job = Box<dyn FnOnce()>;

/// Host notification for rejection tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionOperation {
    /// A cell rejected while no reaction was attached to it.
    Reject,
    /// A reaction was attached to a cell previously reported with `Reject`.
    Handle,
}

/// The "run later" capability the engine is built on.
///
/// `enqueue` must never run `job` before returning. Engine code calls it
/// whenever a reaction becomes runnable or a thenable has to be invoked.
pub trait Scheduler {
    fn enqueue(&self, job: Job);

    /// Unhandled-rejection hook. Hosts that do not report unhandled
    /// rejections can keep the default.
    fn track_rejection(&self, _promise: &Promise, _operation: RejectionOperation) {}
}

/// A rejection that no reaction has claimed.
#[derive(Debug, Clone, PartialEq)]
pub struct UnhandledRejection {
    pub promise_id: usize,
    pub reason: Value,
}

/// Deterministic FIFO job queue advanced manually by its owner.
#[derive(Default)]
pub struct TaskQueue {
    jobs: RefCell<VecDeque<(usize, Job)>>,
    next_job_id: Cell<usize>,
    executed: Cell<usize>,
    // Keyed by promise id; insertion order is report order.
    unhandled: RefCell<IndexMap<usize, Value>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.borrow().is_empty()
    }

    /// Total number of jobs run since creation.
    pub fn executed(&self) -> usize {
        self.executed.get()
    }

    /// Run the oldest queued job. Returns `false` if the queue was empty.
    pub fn run_next(&self) -> bool {
        // The borrow must end before the job runs: jobs enqueue more jobs.
        let next = self.jobs.borrow_mut().pop_front();
        match next {
            Some((id, job)) => {
                log::trace!("run_next: executing job id={id}");
                job();
                self.executed.set(self.executed.get() + 1);
                true
            }
            None => false,
        }
    }

    /// Run jobs, including ones enqueued along the way, until none remain.
    /// Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut count = 0;
        while self.run_next() {
            count += 1;
        }
        log::trace!("run_until_idle: queue drained after {count} jobs");
        count
    }

    /// Number of rejections currently without a handler.
    pub fn unhandled_count(&self) -> usize {
        self.unhandled.borrow().len()
    }

    /// Hand out (and forget) every rejection still unhandled, oldest first.
    pub fn take_unhandled_rejections(&self) -> Vec<UnhandledRejection> {
        let drained = std::mem::take(&mut *self.unhandled.borrow_mut());
        drained
            .into_iter()
            .map(|(promise_id, reason)| {
                log::warn!("unhandled rejection: promise id={promise_id} reason={reason}");
                UnhandledRejection { promise_id, reason }
            })
            .collect()
    }
}

impl Scheduler for TaskQueue {
    fn enqueue(&self, job: Job) {
        let id = self.next_job_id.get() + 1;
        self.next_job_id.set(id);
        let mut jobs = self.jobs.borrow_mut();
        jobs.push_back((id, job));
        log::trace!("enqueue: job id={id} queue_len={}", jobs.len());
    }

    fn track_rejection(&self, promise: &Promise, operation: RejectionOperation) {
        match operation {
            RejectionOperation::Reject => {
                if let PromiseState::Rejected(reason) = promise.state() {
                    log::debug!("track_rejection: promise id={} rejected without handler", promise.id());
                    self.unhandled.borrow_mut().insert(promise.id(), reason);
                }
            }
            RejectionOperation::Handle => {
                if self.unhandled.borrow_mut().shift_remove(&promise.id()).is_some() {
                    log::debug!("track_rejection: promise id={} handled late", promise.id());
                }
            }
        }
    }
}
