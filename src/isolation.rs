//! Deadline enforcement around a batch run.
//!
//! [`run_with_deadline`] moves a [`BatchRunner`] onto a dedicated worker
//! thread and aggregates the [`GameResult`](crate::game_interface::GameResult)s
//! it streams back over a channel. If the wall-clock deadline expires first,
//! the boundary raises the batch's [`CancelFlag`] and returns
//! [`ExecutionOutcome::TimedOut`] carrying whatever games completed before the
//! expiry; the in-flight game is discarded, never counted.
//!
//! Cancellation does not rely on the *submitted* code cooperating: every
//! decision callable receives the flag and the script interpreter checks it
//! (plus a fuel cap) on every evaluation step, so a raised flag is observed at
//! the next decision at the latest. The worker thread is always joined before
//! this module returns, so repeated timeouts cannot leak threads. Killing a
//! genuinely wedged host process is the external isolation host's contract,
//! not ours.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, trace, warn};

use crate::aggregator::{Aggregator, BatchResult};
use crate::batch_runner::{BatchRunner, WorkerMsg};

/// Shared cancellation trigger for one batch invocation.
///
/// Raised exactly once, by the deadline timer. Engines check it between
/// turns and every decision callable receives it so that even a slow
/// cooperative decider can bail out promptly.
#[derive(Debug, Default)]
pub struct CancelFlag(AtomicBool);

impl CancelFlag {
    /// Creates a lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// True once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Terminal outcome of one isolation-wrapped batch invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// All requested games ran to completion.
    Completed(BatchResult),
    /// The deadline fired first. Carries the aggregate of the games that did
    /// complete, or `None` if not even one game finished.
    TimedOut(Option<BatchResult>),
    /// The submission never ran (safety gate or load failure).
    Rejected(String),
    /// The engine itself failed outside any single strategy's turn. Partial
    /// results are withheld because engine state integrity is gone.
    Crashed(String),
}

impl ExecutionOutcome {
    /// The batch result, if this outcome carries one.
    pub fn batch_result(&self) -> Option<&BatchResult> {
        match self {
            ExecutionOutcome::Completed(r) => Some(r),
            ExecutionOutcome::TimedOut(r) => r.as_ref(),
            _ => None,
        }
    }
}

/// Runs `runner` to completion or until `deadline` expires, whichever comes
/// first. See the module docs for the exact timeout semantics.
pub fn run_with_deadline(runner: BatchRunner, deadline: Duration) -> ExecutionOutcome {
    let requested = runner.requested();
    let cancel = Arc::new(CancelFlag::new());
    let worker_flag = Arc::clone(&cancel);
    let (tx, rx) = mpsc::channel();

    let worker = thread::spawn(move || runner.run(&worker_flag, &tx));

    let expires_at = Instant::now() + deadline;
    let mut aggregator = Aggregator::new(requested);

    loop {
        let remaining = expires_at.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match rx.recv_timeout(remaining) {
            Ok(WorkerMsg::Game(result)) => {
                trace!(completed = aggregator.completed() + 1, "game completed");
                aggregator.observe(&result);
            }
            Ok(WorkerMsg::Done) => {
                let _ = worker.join();
                return ExecutionOutcome::Completed(aggregator.finish());
            }
            Ok(WorkerMsg::Fault(message)) => {
                cancel.cancel();
                let _ = worker.join();
                warn!(%message, "engine fault aborted the batch");
                return ExecutionOutcome::Crashed(message);
            }
            Ok(WorkerMsg::Interrupted) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => break,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return match worker.join() {
                    Err(panic) => ExecutionOutcome::Crashed(panic_message(panic)),
                    Ok(()) => {
                        ExecutionOutcome::Crashed("batch worker exited without reporting".into())
                    }
                };
            }
        }
    }

    // Deadline expired (or the worker acknowledged an earlier cancellation).
    cancel.cancel();

    // Drain until the worker's terminal message. Games finishing after the
    // expiry are discarded: only games completed before the deadline count.
    loop {
        match rx.recv() {
            Ok(WorkerMsg::Game(_)) => continue,
            Ok(_) | Err(_) => break,
        }
    }
    if let Err(panic) = worker.join() {
        return ExecutionOutcome::Crashed(panic_message(panic));
    }

    let completed = aggregator.completed();
    if completed == requested {
        // Every requested game finished before the expiry; the timer only
        // beat the Done message to the channel.
        return ExecutionOutcome::Completed(aggregator.finish());
    }
    info!(completed, requested, "batch timed out");
    if completed == 0 {
        ExecutionOutcome::TimedOut(None)
    } else {
        ExecutionOutcome::TimedOut(Some(aggregator.finish()))
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("batch worker panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("batch worker panicked: {s}")
    } else {
        "batch worker panicked".to_string()
    }
}
