pub(crate) mod combinators;
pub(crate) mod engine;
pub(crate) mod error;
pub(crate) mod event_loop;
pub(crate) mod promise;
pub(crate) mod scheduler;
pub(crate) mod timer_thread;
pub(crate) mod value;

pub use engine::{Deferred, Engine};
pub use error::DeferredError;
pub use event_loop::{EventLoop, LoopConfig, PollResult};
pub use promise::{Handler, Promise, PromiseState, Resolvers};
pub use scheduler::{Job, RejectionOperation, Scheduler, TaskQueue, UnhandledRejection};
pub use timer_thread::TimerId;
pub use value::{FnThenable, Thenability, Thenable, Value};
