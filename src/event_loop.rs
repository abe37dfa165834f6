//! Host event loop: a [`TaskQueue`] for engine jobs plus wall-clock timers
//! backed by a background timer thread.
//!
//! Queued jobs always run before expired timers, so every reaction made
//! runnable by a timer callback completes before the next timer fires.

use crate::engine::Engine;
use crate::error::DeferredError;
use crate::promise::{Promise, PromiseState};
use crate::scheduler::{TaskQueue, UnhandledRejection};
use crate::timer_thread::{TimerId, TimerThread};
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PollResult {
    /// A job or a timer callback was executed.
    Executed,
    /// Nothing is runnable yet; the earliest timer is due after this long.
    Wait(Duration),
    /// No queued jobs and no pending timers.
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopConfig {
    /// Upper bound on jobs executed by one `run` call. `None` is unbounded.
    pub max_jobs_per_run: Option<usize>,
    /// Longest single blocking wait for a timer before re-polling.
    pub idle_wait_cap: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        LoopConfig {
            max_jobs_per_run: None,
            idle_wait_cap: Duration::from_millis(100),
        }
    }
}

/// Timer bookkeeping shared with callbacks that cancel timers.
#[derive(Default)]
struct Timers {
    callbacks: RefCell<HashMap<TimerId, (Instant, Box<dyn FnOnce()>)>>,
    next_id: Cell<usize>,
    thread: RefCell<Option<TimerThread>>,
}

impl Timers {
    fn with_thread<R>(&self, f: impl FnOnce(&TimerThread) -> Result<R, DeferredError>) -> Result<R, DeferredError> {
        let mut slot = self.thread.borrow_mut();
        if slot.is_none() {
            log::debug!("spawning timer thread");
            *slot = Some(TimerThread::spawn()?);
        }
        match slot.as_ref() {
            Some(thread) => f(thread),
            None => Err(DeferredError::TimerThread {
                message: "timer thread unavailable".to_string(),
            }),
        }
    }

    fn clear(&self, id: TimerId) -> bool {
        if self.callbacks.borrow_mut().remove(&id).is_none() {
            return false;
        }
        if let Some(thread) = self.thread.borrow().as_ref()
            && let Err(e) = thread.cancel(id)
        {
            log::warn!("clear_timeout: {e}");
        }
        true
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.callbacks.borrow().values().map(|(when, _)| *when).min()
    }

    /// Run the callback for an expired id, if it is still registered.
    fn fire(&self, id: TimerId) -> bool {
        let entry = self.callbacks.borrow_mut().remove(&id);
        match entry {
            Some((_, callback)) => {
                log::trace!("firing timer {id:?}");
                callback();
                true
            }
            None => false,
        }
    }
}

pub struct EventLoop {
    queue: Rc<TaskQueue>,
    engine: Engine,
    timers: Rc<Timers>,
    config: LoopConfig,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    pub fn new() -> Self {
        Self::with_config(LoopConfig::default())
    }

    pub fn with_config(config: LoopConfig) -> Self {
        let (engine, queue) = Engine::with_task_queue();
        EventLoop {
            queue,
            engine,
            timers: Rc::new(Timers::default()),
            config,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn queue(&self) -> &Rc<TaskQueue> {
        &self.queue
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.callbacks.borrow().len()
    }

    /// Run `callback` on this loop once `delay` has elapsed.
    pub fn set_timeout<F>(&self, delay: Duration, callback: F) -> Result<TimerId, DeferredError>
    where
        F: FnOnce() + 'static,
    {
        let id = TimerId(self.timers.next_id.get() + 1);
        self.timers.next_id.set(id.0);
        let when = Instant::now() + delay;
        self.timers.callbacks.borrow_mut().insert(id, (when, Box::new(callback)));
        if let Err(e) = self.timers.with_thread(|thread| thread.schedule(id, when)) {
            self.timers.callbacks.borrow_mut().remove(&id);
            return Err(e);
        }
        log::trace!("set_timeout: {id:?} in {delay:?}");
        Ok(id)
    }

    /// Cancel a pending timer. Returns `false` if it already fired or was
    /// cleared.
    pub fn clear_timeout(&self, id: TimerId) -> bool {
        self.timers.clear(id)
    }

    /// A cell fulfilled with `value` after `delay`.
    pub fn delay(&self, delay: Duration, value: impl Into<Value>) -> Result<Promise, DeferredError> {
        let deferred = self.engine.deferred();
        let value = value.into();
        let resolvers = deferred.resolvers();
        self.set_timeout(delay, move || resolvers.fulfill(value))?;
        Ok(deferred.promise())
    }

    /// A cell rejected with `reason` after `delay`.
    pub fn delay_reject(&self, delay: Duration, reason: impl Into<Value>) -> Result<Promise, DeferredError> {
        let deferred = self.engine.deferred();
        let reason = reason.into();
        let resolvers = deferred.resolvers();
        self.set_timeout(delay, move || resolvers.reject(reason))?;
        Ok(deferred.promise())
    }

    /// Race `promise` against a `TimedOut` rejection after `after`. The timer
    /// is cleared as soon as `promise` settles.
    pub fn timeout(&self, promise: &Promise, after: Duration) -> Result<Promise, DeferredError> {
        let deadline = self.engine.deferred();
        let resolvers = deadline.resolvers();
        let id = self.set_timeout(after, move || resolvers.reject(DeferredError::TimedOut { after }))?;

        // Weak: `promise` may be held by one of this loop's own timer callbacks.
        let on_value = Rc::downgrade(&self.timers);
        let on_reason = Rc::downgrade(&self.timers);
        promise.then_or(
            move |_| {
                if let Some(timers) = on_value.upgrade() {
                    timers.clear(id);
                }
                Ok(Value::Undefined)
            },
            move |_| {
                if let Some(timers) = on_reason.upgrade() {
                    timers.clear(id);
                }
                Ok(Value::Undefined)
            },
        );
        Ok(self.engine.race([Value::Promise(promise.clone()), Value::Promise(deadline.promise())]))
    }

    /// Execute at most one job or timer callback.
    pub fn poll(&self) -> Result<PollResult, DeferredError> {
        if self.queue.run_next() {
            return Ok(PollResult::Executed);
        }

        let Some(deadline) = self.timers.next_deadline() else {
            return Ok(PollResult::Empty);
        };

        let expired = match self.timers.thread.borrow().as_ref() {
            Some(thread) => thread.try_expired(),
            None => None,
        };
        if let Some(id) = expired
            && self.timers.fire(id)
        {
            return Ok(PollResult::Executed);
        }

        Ok(PollResult::Wait(deadline.saturating_duration_since(Instant::now())))
    }

    /// Poll until both the job queue and the timer set are empty. Returns the
    /// number of jobs and timer callbacks executed.
    pub fn run(&self) -> Result<usize, DeferredError> {
        self.run_while(|| true)
    }

    /// Poll until `promise` settles or the loop runs out of work, and return
    /// its state at that point.
    pub fn run_until_settled(&self, promise: &Promise) -> Result<PromiseState, DeferredError> {
        self.run_while(|| promise.is_pending())?;
        Ok(promise.state())
    }

    /// Hand out rejections that never gained a handler.
    pub fn take_unhandled_rejections(&self) -> Vec<UnhandledRejection> {
        self.queue.take_unhandled_rejections()
    }

    fn run_while(&self, mut keep_going: impl FnMut() -> bool) -> Result<usize, DeferredError> {
        let mut executed = 0usize;
        while keep_going() {
            if let Some(limit) = self.config.max_jobs_per_run
                && executed >= limit
            {
                if self.queue.is_empty() && self.pending_timers() == 0 {
                    break;
                }
                return Err(DeferredError::JobLimitExceeded { limit });
            }
            match self.poll()? {
                PollResult::Executed => executed += 1,
                PollResult::Wait(wait) => {
                    let wait = wait.min(self.config.idle_wait_cap).max(Duration::from_millis(1));
                    let expired = self.timers.with_thread(|thread| thread.wait_expired(wait))?;
                    if let Some(id) = expired
                        && self.timers.fire(id)
                    {
                        executed += 1;
                    }
                }
                PollResult::Empty => break,
            }
        }
        log::debug!("event loop ran {executed} jobs");
        Ok(executed)
    }
}
