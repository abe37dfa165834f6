//! Aggregate combinators. Each input is first passed through
//! [`Engine::resolve`]; the combinators only use the public reaction API
//! from there on.

use crate::engine::Engine;
use crate::error::DeferredError;
use crate::promise::Promise;
use crate::value::Value;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::rc::Rc;

/// Per-index results plus the number of inputs still outstanding.
struct Countdown {
    slots: Vec<Value>,
    remaining: usize,
}

impl Countdown {
    fn new(len: usize) -> Rc<RefCell<Countdown>> {
        Rc::new(RefCell::new(Countdown {
            slots: vec![Value::Undefined; len],
            remaining: len,
        }))
    }

    /// Record `value` at `index`; yields every slot once the last one lands.
    fn record(&mut self, index: usize, value: Value) -> Option<Vec<Value>> {
        self.slots[index] = value;
        self.remaining -= 1;
        (self.remaining == 0).then(|| std::mem::take(&mut self.slots))
    }
}

fn settled_record(status: &str, key: &str, value: Value) -> Value {
    let mut record = IndexMap::new();
    record.insert("status".to_string(), Value::from(status));
    record.insert(key.to_string(), value);
    Value::Object(record)
}

impl Engine {
    /// Fulfill with every input's value in input order, or reject with the
    /// first rejection. Later settlements are observed and ignored.
    pub fn all<T: Into<Value>>(&self, items: impl IntoIterator<Item = T>) -> Promise {
        let items: Vec<Value> = items.into_iter().map(Into::into).collect();
        let (promise, resolvers) = self.deferred().into_parts();
        if items.is_empty() {
            resolvers.fulfill(Value::Array(Vec::new()));
            return promise;
        }
        log::trace!("all: promise id={} waiting on {} inputs", promise.id(), items.len());
        let countdown = Countdown::new(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let countdown = countdown.clone();
            let on_value = resolvers.clone();
            let on_reason = resolvers.clone();
            self.resolve(item).then_or(
                move |value| {
                    let done = countdown.borrow_mut().record(index, value);
                    if let Some(values) = done {
                        on_value.fulfill(Value::Array(values));
                    }
                    Ok(Value::Undefined)
                },
                move |reason| {
                    on_reason.reject(reason);
                    Ok(Value::Undefined)
                },
            );
        }
        promise
    }

    /// Settle like whichever input settles first. Never settles for an
    /// empty input.
    pub fn race<T: Into<Value>>(&self, items: impl IntoIterator<Item = T>) -> Promise {
        let (promise, resolvers) = self.deferred().into_parts();
        for item in items.into_iter().map(Into::into) {
            let on_value = resolvers.clone();
            let on_reason = resolvers.clone();
            self.resolve(item).then_or(
                move |value| {
                    on_value.fulfill(value);
                    Ok(Value::Undefined)
                },
                move |reason| {
                    on_reason.reject(reason);
                    Ok(Value::Undefined)
                },
            );
        }
        promise
    }

    /// Fulfill, once every input settled, with `{status, value}` or
    /// `{status, reason}` records in input order. Never rejects.
    pub fn all_settled<T: Into<Value>>(&self, items: impl IntoIterator<Item = T>) -> Promise {
        let items: Vec<Value> = items.into_iter().map(Into::into).collect();
        let (promise, resolvers) = self.deferred().into_parts();
        if items.is_empty() {
            resolvers.fulfill(Value::Array(Vec::new()));
            return promise;
        }
        let countdown = Countdown::new(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let on_value = (countdown.clone(), resolvers.clone());
            let on_reason = (countdown.clone(), resolvers.clone());
            self.resolve(item).then_or(
                move |value| {
                    let (countdown, resolvers) = on_value;
                    let done = countdown.borrow_mut().record(index, settled_record("fulfilled", "value", value));
                    if let Some(records) = done {
                        resolvers.fulfill(Value::Array(records));
                    }
                    Ok(Value::Undefined)
                },
                move |reason| {
                    let (countdown, resolvers) = on_reason;
                    let done = countdown.borrow_mut().record(index, settled_record("rejected", "reason", reason));
                    if let Some(records) = done {
                        resolvers.fulfill(Value::Array(records));
                    }
                    Ok(Value::Undefined)
                },
            );
        }
        promise
    }

    /// Fulfill with the first fulfillment; reject with an aggregate of every
    /// reason, in input order, if all inputs reject.
    pub fn any<T: Into<Value>>(&self, items: impl IntoIterator<Item = T>) -> Promise {
        let items: Vec<Value> = items.into_iter().map(Into::into).collect();
        let (promise, resolvers) = self.deferred().into_parts();
        if items.is_empty() {
            resolvers.reject(DeferredError::Aggregate { errors: Vec::new() });
            return promise;
        }
        let countdown = Countdown::new(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let countdown = countdown.clone();
            let on_value = resolvers.clone();
            let on_reason = resolvers.clone();
            self.resolve(item).then_or(
                move |value| {
                    on_value.fulfill(value);
                    Ok(Value::Undefined)
                },
                move |reason| {
                    let done = countdown.borrow_mut().record(index, reason);
                    if let Some(errors) = done {
                        on_reason.reject(DeferredError::Aggregate { errors });
                    }
                    Ok(Value::Undefined)
                },
            );
        }
        promise
    }
}
