use crate::error::DeferredError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, select, unbounded};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub(crate) usize);

#[derive(Debug)]
enum TimerCommand {
    Schedule { id: TimerId, when: Instant },
    Cancel(TimerId),
    Shutdown,
}

/// Background thread that reports timer ids once their deadline passes.
///
/// Only ids cross the thread boundary; callbacks stay with the owner on the
/// scheduling thread.
pub(crate) struct TimerThread {
    cmd_tx: Sender<TimerCommand>,
    expired_rx: Receiver<TimerId>,
}

impl TimerThread {
    pub(crate) fn spawn() -> Result<Self, DeferredError> {
        let (cmd_tx, cmd_rx) = unbounded::<TimerCommand>();
        let (expired_tx, expired_rx) = unbounded::<TimerId>();

        thread::Builder::new()
            .name("deferred-timer-thread".to_string())
            .spawn(move || timer_loop(cmd_rx, expired_tx))?;

        Ok(TimerThread { cmd_tx, expired_rx })
    }

    pub(crate) fn schedule(&self, id: TimerId, when: Instant) -> Result<(), DeferredError> {
        self.send(TimerCommand::Schedule { id, when })
    }

    pub(crate) fn cancel(&self, id: TimerId) -> Result<(), DeferredError> {
        self.send(TimerCommand::Cancel(id))
    }

    pub(crate) fn try_expired(&self) -> Option<TimerId> {
        self.expired_rx.try_recv().ok()
    }

    /// Block up to `wait` for the next expiry.
    pub(crate) fn wait_expired(&self, wait: Duration) -> Result<Option<TimerId>, DeferredError> {
        match self.expired_rx.recv_timeout(wait) {
            Ok(id) => Ok(Some(id)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(DeferredError::TimerThread {
                message: "timer thread exited".to_string(),
            }),
        }
    }

    fn send(&self, command: TimerCommand) -> Result<(), DeferredError> {
        self.cmd_tx.send(command).map_err(|e| DeferredError::TimerThread {
            message: format!("failed to send {:?}", e.into_inner()),
        })
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        if self.cmd_tx.send(TimerCommand::Shutdown).is_err() {
            log::debug!("timer thread already gone at shutdown");
        }
    }
}

fn timer_loop(cmd_rx: Receiver<TimerCommand>, expired_tx: Sender<TimerId>) {
    // min-heap of (deadline, id)
    let mut heap: BinaryHeap<Reverse<(Instant, TimerId)>> = BinaryHeap::new();
    let mut canceled: HashSet<TimerId> = HashSet::new();

    loop {
        let now = Instant::now();
        while let Some(Reverse((when, id))) = heap.peek().copied() {
            if when > now {
                break;
            }
            heap.pop();
            if canceled.remove(&id) {
                continue;
            }
            if let Err(e) = expired_tx.send(id) {
                log::warn!("Failed to send expired timer id: {e:?}");
                return;
            }
        }

        let command = match heap.peek() {
            Some(Reverse((when, _))) => {
                let wait = when.saturating_duration_since(Instant::now());
                select! {
                    recv(cmd_rx) -> msg => msg,
                    default(wait) => continue,
                }
            }
            None => cmd_rx.recv(),
        };

        match command {
            Ok(TimerCommand::Schedule { id, when }) => heap.push(Reverse((when, id))),
            Ok(TimerCommand::Cancel(id)) => {
                if heap.iter().any(|Reverse((_, pending))| *pending == id) {
                    canceled.insert(id);
                }
            }
            Ok(TimerCommand::Shutdown) | Err(_) => break,
        }
    }
    log::trace!("timer thread exiting with {} timers outstanding", heap.len());
}
