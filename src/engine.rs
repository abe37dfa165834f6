use crate::promise::{Promise, Resolvers};
use crate::scheduler::{Scheduler, TaskQueue};
use crate::value::Value;
use std::rc::Rc;

/// Entry point for creating cells. Every cell created through an engine
/// schedules its work on the engine's scheduler.
#[derive(Clone)]
pub struct Engine {
    scheduler: Rc<dyn Scheduler>,
}

impl Engine {
    pub fn new(scheduler: Rc<dyn Scheduler>) -> Self {
        Engine { scheduler }
    }

    /// Engine over a fresh [`TaskQueue`]; the queue is returned so the
    /// caller can drive it.
    pub fn with_task_queue() -> (Engine, Rc<TaskQueue>) {
        let queue = Rc::new(TaskQueue::new());
        (Engine::new(queue.clone()), queue)
    }

    pub fn scheduler(&self) -> &Rc<dyn Scheduler> {
        &self.scheduler
    }

    /// Create a cell and run `resolver` synchronously with its capabilities.
    /// A resolver returning `Err` rejects the cell, unless it already used
    /// one of the capabilities.
    pub fn create<F>(&self, resolver: F) -> Promise
    where
        F: FnOnce(Resolvers) -> Result<(), Value>,
    {
        let promise = Promise::pending(self.scheduler.clone());
        let resolvers = Resolvers::new(promise.clone());
        if let Err(reason) = resolver(resolvers.clone()) {
            log::debug!("create: resolver for promise id={} raised {reason}", promise.id());
            resolvers.reject(reason);
        }
        promise
    }

    /// A pending cell with detached capabilities.
    pub fn deferred(&self) -> Deferred {
        let promise = Promise::pending(self.scheduler.clone());
        let resolvers = Resolvers::new(promise.clone());
        Deferred { promise, resolvers }
    }

    /// Return native cells unchanged; otherwise a new cell resolved with
    /// `value`, following it if it is thenable.
    pub fn resolve(&self, value: impl Into<Value>) -> Promise {
        match value.into() {
            Value::Promise(promise) => promise,
            value => {
                let promise = Promise::pending(self.scheduler.clone());
                promise.resolve_with(value);
                promise
            }
        }
    }

    /// A cell already rejected with `reason`; the reason is not assimilated.
    pub fn reject(&self, reason: impl Into<Value>) -> Promise {
        let promise = Promise::pending(self.scheduler.clone());
        promise.reject_with(reason.into());
        promise
    }
}

/// A pending cell together with its resolving capabilities.
#[derive(Debug, Clone)]
pub struct Deferred {
    promise: Promise,
    resolvers: Resolvers,
}

impl Deferred {
    pub fn promise(&self) -> Promise {
        self.promise.clone()
    }

    pub fn resolvers(&self) -> Resolvers {
        self.resolvers.clone()
    }

    pub fn fulfill(&self, value: impl Into<Value>) {
        self.resolvers.fulfill(value);
    }

    pub fn reject(&self, reason: impl Into<Value>) {
        self.resolvers.reject(reason);
    }

    pub fn into_parts(self) -> (Promise, Resolvers) {
        (self.promise, self.resolvers)
    }
}
