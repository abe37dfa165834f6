use deferred::{Engine, Promise, PromiseState, Value};
use std::cell::RefCell;
use std::rc::Rc;

// Initialize logger for this integration test binary so `RUST_LOG` is honored.
// Using `ctor` ensures initialization runs before tests start.
#[ctor::ctor]
fn __init_test_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default()).is_test(true).try_init();
}

fn async_operation(engine: &Engine, value: Value) -> Promise {
    engine.create(|resolvers| {
        let n = f64::try_from(value)?;
        if n > 0.0 {
            resolvers.fulfill(n * 2.0);
        } else {
            resolvers.reject("negative value");
        }
        Ok(())
    })
}

#[cfg(test)]
mod deep_chain_tests {
    use super::*;

    #[test]
    fn test_deep_promise_chain_no_stack_overflow() {
        // Each step returns a fresh cell resolving to the previous value + 1.
        let depth = 200;
        let (engine, queue) = Engine::with_task_queue();
        let mut p = engine.resolve(0);
        for _ in 0..depth {
            let engine = engine.clone();
            p = p.then(move |x| {
                let next = f64::try_from(x)? + 1.0;
                Ok(Value::Promise(engine.create(|resolvers| {
                    resolvers.fulfill(next);
                    Ok(())
                })))
            });
        }
        queue.run_until_idle();
        assert_eq!(p.state(), PromiseState::Fulfilled(Value::from(depth)));
    }

    #[test]
    fn test_deep_adoption_chain_settles_from_the_bottom() {
        // Cell i is resolved with cell i+1; settling the last one unwinds all.
        let (engine, queue) = Engine::with_task_queue();
        let bottom = engine.deferred();
        let mut top = bottom.promise();
        for _ in 0..500 {
            let d = engine.deferred();
            d.fulfill(top);
            top = d.promise();
        }
        queue.run_until_idle();
        assert!(top.is_pending());
        bottom.fulfill("bottom");
        queue.run_until_idle();
        assert_eq!(top.state(), PromiseState::Fulfilled(Value::from("bottom")));
    }

    #[test]
    fn test_promise_then_with_closure() {
        let (engine, queue) = Engine::with_task_queue();
        let multiplier = 3.0;
        let offset = 10.0;
        let p = engine
            .resolve(5)
            .then(move |x| Ok(Value::from(f64::try_from(x)? * multiplier)))
            .then(move |y| Ok(Value::from(f64::try_from(y)? + offset)));
        queue.run_until_idle();
        assert_eq!(p.state(), PromiseState::Fulfilled(Value::from(25))); // 5 * 3 + 10
    }

    #[test]
    fn promise_complex_chain_another() {
        let (engine, queue) = Engine::with_task_queue();
        let cleanup = Rc::new(RefCell::new(Vec::new()));
        let log = cleanup.clone();
        let (first, second) = (engine.clone(), engine.clone());
        let p = engine
            .resolve(5)
            .then(move |v| Ok(Value::Promise(async_operation(&first, v))))
            .then(|result| Ok(Value::from(f64::try_from(result)? + 10.0)))
            .then(move |v| Ok(Value::Promise(async_operation(&second, v))))
            .catch(|err| Ok(Value::from(format!("error: {err}"))))
            .finally(move || {
                log.borrow_mut().push("finally: cleanup");
                Ok(Value::Undefined)
            });
        queue.run_until_idle();
        assert_eq!(p.state(), PromiseState::Fulfilled(Value::from(40)));
        assert_eq!(*cleanup.borrow(), vec!["finally: cleanup"]);
    }

    #[test]
    fn promise_complex_chain_rejects_on_negative() {
        let (engine, queue) = Engine::with_task_queue();
        let inner = engine.clone();
        let p = engine
            .resolve(-1)
            .then(move |v| Ok(Value::Promise(async_operation(&inner, v))))
            .then(|_| Ok(Value::from("unreachable")))
            .catch(|err| Ok(Value::from(format!("error: {err}"))));
        queue.run_until_idle();
        assert_eq!(p.state(), PromiseState::Fulfilled(Value::from("error: negative value")));
    }
}
