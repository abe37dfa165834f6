use crate::value::Value;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum DeferredError {
    #[error("Chaining cycle detected for promise")]
    CyclicResolution,

    #[error("Type error: {message}")]
    TypeError { message: String },

    #[error("All promises were rejected ({} reasons)", .errors.len())]
    Aggregate { errors: Vec<Value> },

    #[error("Operation timed out after {after:?}")]
    TimedOut { after: Duration },

    #[error("Event loop stopped after {limit} jobs with work still queued")]
    JobLimitExceeded { limit: usize },

    #[error("Timer thread error: {message}")]
    TimerThread { message: String },

    #[error("std::io error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DeferredError {
    /// Reasons collected by an aggregate rejection, in input order.
    pub fn aggregate_errors(&self) -> Option<&[Value]> {
        match self {
            DeferredError::Aggregate { errors } => Some(errors),
            _ => None,
        }
    }
}

impl PartialEq for DeferredError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DeferredError::CyclicResolution, DeferredError::CyclicResolution) => true,
            (DeferredError::TypeError { message: a }, DeferredError::TypeError { message: b }) => a == b,
            (DeferredError::Aggregate { errors: a }, DeferredError::Aggregate { errors: b }) => a == b,
            (DeferredError::TimedOut { after: a }, DeferredError::TimedOut { after: b }) => a == b,
            (DeferredError::JobLimitExceeded { limit: a }, DeferredError::JobLimitExceeded { limit: b }) => a == b,
            (DeferredError::TimerThread { message: a }, DeferredError::TimerThread { message: b }) => a == b,
            (DeferredError::IoError(a), DeferredError::IoError(b)) => a.kind() == b.kind(),
            _ => false,
        }
    }
}

// Macro that constructs a `DeferredError::TypeError` whose message is built
// from `format!`-style arguments.
#[macro_export]
macro_rules! raise_type_error {
    ($($arg:tt)*) => {
        $crate::DeferredError::TypeError {
            message: format!($($arg)*),
        }
    };
}
