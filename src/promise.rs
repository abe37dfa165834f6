//! # Settlement cells
//!
//! A [`Promise`] is a shared handle to one settlement cell:
//! - state moves once, `Pending → Fulfilled` or `Pending → Rejected`
//! - reactions queued while pending are drained exactly once at settlement
//! - reactions attached after settlement are scheduled right away, never run
//!   inline
//!
//! Values handed to a resolution are probed with [`Value::thenability`]. Native
//! cells are adopted by attaching a pass-through reaction; foreign thenables
//! have their `then` invoked from a scheduled job with a fresh one-shot
//! [`Resolvers`] pair, so chains of thenables unwrap transitively.
//!
//! No `RefCell` borrow is ever held while user code runs: handlers only run
//! from scheduled jobs, and the rejection hook is called after the borrow is
//! released. Re-entering `fulfill`/`reject` on a cell that is settling is
//! therefore a no-op on an already settled cell.

use crate::error::DeferredError;
use crate::scheduler::{RejectionOperation, Scheduler};
use crate::value::{Thenability, Value};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Reaction callback. `Err` means the handler raised.
pub type Handler = Box<dyn FnOnce(Value) -> Result<Value, Value>>;

/// Monotonic id source so log lines and unhandled reports can name a cell.
static PROMISE_COUNTER: AtomicUsize = AtomicUsize::new(1);

#[derive(Debug, Clone, PartialEq)]
pub enum PromiseState {
    Pending,
    Fulfilled(Value),
    Rejected(Value),
}

/// Terminal outcome delivered to a reaction.
enum Settlement {
    Fulfilled(Value),
    Rejected(Value),
}

struct Reaction {
    on_fulfilled: Option<Handler>,
    on_rejected: Option<Handler>,
    derived: Promise,
}

impl Reaction {
    fn run(self, settlement: Settlement) {
        let Reaction {
            on_fulfilled,
            on_rejected,
            derived,
        } = self;
        match settlement {
            Settlement::Fulfilled(value) => match on_fulfilled {
                Some(handler) => derived.resolve_outcome(handler(value)),
                None => derived.settle(PromiseState::Fulfilled(value)),
            },
            Settlement::Rejected(reason) => match on_rejected {
                Some(handler) => derived.resolve_outcome(handler(reason)),
                None => derived.settle(PromiseState::Rejected(reason)),
            },
        }
    }
}

struct PromiseCell {
    state: PromiseState,
    reactions: Vec<Reaction>,
    // Set once any reaction is attached; drives rejection tracking.
    handled: bool,
}

/// Handle to a settlement cell. Cloning shares the cell.
#[derive(Clone)]
pub struct Promise {
    id: usize,
    cell: Rc<RefCell<PromiseCell>>,
    scheduler: Rc<dyn Scheduler>,
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.cell.try_borrow() {
            Ok(cell) => format!("{:?}", cell.state),
            Err(_) => "<borrowed>".to_string(),
        };
        f.debug_struct("Promise").field("id", &self.id).field("state", &state).finish()
    }
}

impl Promise {
    pub(crate) fn pending(scheduler: Rc<dyn Scheduler>) -> Promise {
        let id = PROMISE_COUNTER.fetch_add(1, Ordering::SeqCst);
        log::trace!("Promise::pending id={id}");
        Promise {
            id,
            cell: Rc::new(RefCell::new(PromiseCell {
                state: PromiseState::Pending,
                reactions: Vec::new(),
                handled: false,
            })),
            scheduler,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> PromiseState {
        self.cell.borrow().state.clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.cell.borrow().state, PromiseState::Pending)
    }

    /// Number of reactions waiting for settlement.
    pub fn pending_reactions(&self) -> usize {
        self.cell.borrow().reactions.len()
    }

    /// Identity comparison: true when both handles share one cell.
    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    /// Derive a new cell from this one. Absent handlers pass the settlement
    /// through unchanged; a handler returning `Ok` fulfills (or assimilates
    /// into) the derived cell, one returning `Err` rejects it.
    pub fn chain(&self, on_fulfilled: Option<Handler>, on_rejected: Option<Handler>) -> Promise {
        let derived = Promise::pending(self.scheduler.clone());
        self.add_reaction(Reaction {
            on_fulfilled,
            on_rejected,
            derived: derived.clone(),
        });
        derived
    }

    pub fn then<F>(&self, on_fulfilled: F) -> Promise
    where
        F: FnOnce(Value) -> Result<Value, Value> + 'static,
    {
        self.chain(Some(Box::new(on_fulfilled)), None)
    }

    pub fn then_or<F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise
    where
        F: FnOnce(Value) -> Result<Value, Value> + 'static,
        R: FnOnce(Value) -> Result<Value, Value> + 'static,
    {
        self.chain(Some(Box::new(on_fulfilled)), Some(Box::new(on_rejected)))
    }

    pub fn catch<R>(&self, on_rejected: R) -> Promise
    where
        R: FnOnce(Value) -> Result<Value, Value> + 'static,
    {
        self.chain(None, Some(Box::new(on_rejected)))
    }

    /// Run `on_finally` on either branch and pass the original settlement
    /// through. If the callback fails, or returns a thenable that rejects,
    /// the derived cell rejects with that reason instead.
    pub fn finally<F>(&self, on_finally: F) -> Promise
    where
        F: FnOnce() -> Result<Value, Value> + 'static,
    {
        let callback = Rc::new(Cell::new(Some(on_finally)));
        let on_fulfilled: Handler = {
            let callback = callback.clone();
            let scheduler = self.scheduler.clone();
            Box::new(move |value| finally_step(&callback, &scheduler, Ok(value)))
        };
        let on_rejected: Handler = {
            let scheduler = self.scheduler.clone();
            Box::new(move |reason| finally_step(&callback, &scheduler, Err(reason)))
        };
        self.chain(Some(on_fulfilled), Some(on_rejected))
    }

    fn add_reaction(&self, reaction: Reaction) {
        let mut cell = self.cell.borrow_mut();
        let newly_handled = !cell.handled;
        cell.handled = true;
        if matches!(cell.state, PromiseState::Pending) {
            cell.reactions.push(reaction);
            log::trace!("add_reaction: promise id={} now has {} reactions", self.id, cell.reactions.len());
            return;
        }
        let settlement = match &cell.state {
            PromiseState::Pending => return,
            PromiseState::Fulfilled(value) => Settlement::Fulfilled(value.clone()),
            PromiseState::Rejected(reason) => Settlement::Rejected(reason.clone()),
        };
        drop(cell);
        if newly_handled && matches!(settlement, Settlement::Rejected(_)) {
            self.scheduler.track_rejection(self, RejectionOperation::Handle);
        }
        self.schedule_reaction(reaction, settlement);
    }

    fn schedule_reaction(&self, reaction: Reaction, settlement: Settlement) {
        log::trace!(
            "schedule_reaction: source id={} derived id={}",
            self.id,
            reaction.derived.id
        );
        self.scheduler.enqueue(Box::new(move || reaction.run(settlement)));
    }

    /// Move out of `Pending` and schedule every queued reaction. A no-op on
    /// a settled cell.
    pub(crate) fn settle(&self, state: PromiseState) {
        let (reactions, unhandled) = {
            let mut cell = self.cell.borrow_mut();
            if !matches!(cell.state, PromiseState::Pending) {
                log::trace!("settle: promise id={} already settled, ignoring", self.id);
                return;
            }
            cell.state = state.clone();
            let reactions = std::mem::take(&mut cell.reactions);
            let unhandled = matches!(state, PromiseState::Rejected(_)) && !cell.handled;
            (reactions, unhandled)
        };

        match &state {
            PromiseState::Fulfilled(value) => log::debug!("settle: promise id={} fulfilled with {value}", self.id),
            PromiseState::Rejected(reason) => log::debug!("settle: promise id={} rejected with {reason}", self.id),
            PromiseState::Pending => {}
        }
        if unhandled {
            self.scheduler.track_rejection(self, RejectionOperation::Reject);
        }
        for reaction in reactions {
            let settlement = match &state {
                PromiseState::Fulfilled(value) => Settlement::Fulfilled(value.clone()),
                PromiseState::Rejected(reason) => Settlement::Rejected(reason.clone()),
                PromiseState::Pending => return,
            };
            self.schedule_reaction(reaction, settlement);
        }
    }

    pub(crate) fn reject_with(&self, reason: Value) {
        self.settle(PromiseState::Rejected(reason));
    }

    /// The resolution procedure: settle with `value`, or follow it if it is
    /// thenable.
    pub(crate) fn resolve_with(&self, value: Value) {
        if !self.is_pending() {
            log::trace!("resolve_with: promise id={} already settled, ignoring", self.id);
            return;
        }
        match value.thenability() {
            Thenability::Native(other) if other.ptr_eq(self) => {
                log::debug!("resolve_with: promise id={} resolved with itself", self.id);
                self.reject_with(Value::from(DeferredError::CyclicResolution));
            }
            Thenability::Native(other) => {
                log::trace!("resolve_with: promise id={} adopting promise id={}", self.id, other.id);
                other.add_reaction(Reaction {
                    on_fulfilled: None,
                    on_rejected: None,
                    derived: self.clone(),
                });
            }
            Thenability::Foreign(thenable) => {
                log::trace!("resolve_with: promise id={} assimilating foreign thenable", self.id);
                let resolvers = Resolvers::new(self.clone());
                self.scheduler.enqueue(Box::new(move || {
                    if let Err(reason) = thenable.then(resolvers.clone()) {
                        log::debug!("resolve_with: thenable raised {reason}");
                        resolvers.reject(reason);
                    }
                }));
            }
            Thenability::NotThenable => self.settle(PromiseState::Fulfilled(value)),
        }
    }

    fn resolve_outcome(&self, outcome: Result<Value, Value>) {
        match outcome {
            Ok(value) => self.resolve_with(value),
            Err(reason) => self.reject_with(reason),
        }
    }
}

fn finally_step<F>(callback: &Cell<Option<F>>, scheduler: &Rc<dyn Scheduler>, original: Result<Value, Value>) -> Result<Value, Value>
where
    F: FnOnce() -> Result<Value, Value>,
{
    let Some(on_finally) = callback.take() else {
        return original;
    };
    let result = on_finally()?;
    if matches!(result.thenability(), Thenability::NotThenable) {
        return original;
    }
    let waited = Promise::pending(scheduler.clone());
    waited.resolve_with(result);
    Ok(Value::Promise(waited.then(move |_| original)))
}

/// One-shot `fulfill`/`reject` capability pair for a cell.
///
/// Clones share the one-shot flag: across all clones, only the first call to
/// either method has an effect.
#[derive(Clone)]
pub struct Resolvers {
    promise: Promise,
    already_resolved: Rc<Cell<bool>>,
}

impl fmt::Debug for Resolvers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolvers")
            .field("promise", &self.promise.id)
            .field("already_resolved", &self.already_resolved.get())
            .finish()
    }
}

impl Resolvers {
    pub(crate) fn new(promise: Promise) -> Self {
        Resolvers {
            promise,
            already_resolved: Rc::new(Cell::new(false)),
        }
    }

    pub fn promise(&self) -> &Promise {
        &self.promise
    }

    /// Whether either capability has been used.
    pub fn is_resolved(&self) -> bool {
        self.already_resolved.get()
    }

    pub fn fulfill(&self, value: impl Into<Value>) {
        if self.already_resolved.replace(true) {
            log::trace!("Resolvers::fulfill: promise id={} already resolved, ignoring", self.promise.id);
            return;
        }
        self.promise.resolve_with(value.into());
    }

    /// Reject without assimilating `reason`.
    pub fn reject(&self, reason: impl Into<Value>) {
        if self.already_resolved.replace(true) {
            log::trace!("Resolvers::reject: promise id={} already resolved, ignoring", self.promise.id);
            return;
        }
        self.promise.reject_with(reason.into());
    }
}
