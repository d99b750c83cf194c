//! Deadline scheduler thread
//!
//! Workers never self-timer: their loop blocks in the selector, so a
//! `Schedule` command is forwarded here. A single thread keeps a min-heap of
//! deadlines and delivers each wrapped command back to its worker's mailbox
//! when due.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info};

use crate::command::{WorkerCommand, WorkerRef};

/// Maximum time between polls even with no deadline pending
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A command waiting for its deadline
struct ScheduledCommand {
    deadline: Instant,
    seq: u64,
    worker: WorkerRef,
    command: WorkerCommand,
}

/// Queue entry; `BinaryHeap<Reverse<Pending>>` pops the soonest first
///
/// Equal deadlines fall back to the submission sequence so two commands
/// scheduled for the same instant keep their send order.
struct Pending(ScheduledCommand);

impl Pending {
    fn sort_key(&self) -> (Instant, u64) {
        (self.0.deadline, self.0.seq)
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// Cloneable handle for submitting deadlines
#[derive(Clone)]
pub struct TimerRef {
    tx: Sender<ScheduledCommand>,
    seq: Arc<AtomicU64>,
}

impl TimerRef {
    /// Deliver `command` to `worker` once `delay` has elapsed
    ///
    /// Best-effort: a stopped timer thread drops the request.
    pub fn schedule(&self, delay: Duration, worker: WorkerRef, command: WorkerCommand) {
        let request = ScheduledCommand {
            deadline: Instant::now() + delay,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            worker,
            command,
        };
        let _ = self.tx.send(request);
    }
}

/// Handle to the running timer thread
pub struct TimerThread {
    tx: Sender<ScheduledCommand>,
    seq: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TimerThread {
    /// Spawn the timer thread
    pub fn start() -> std::io::Result<Self> {
        let (tx, rx) = unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("nexio-timer".into())
            .spawn(move || run(rx, thread_shutdown))?;

        Ok(Self {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
            shutdown,
            handle: Some(handle),
        })
    }

    /// A submission handle for workers
    pub fn handle(&self) -> TimerRef {
        TimerRef {
            tx: self.tx.clone(),
            seq: Arc::clone(&self.seq),
        }
    }

    /// Request shutdown and wait for the thread to exit
    ///
    /// Pending deadlines are dropped.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(rx: Receiver<ScheduledCommand>, shutdown: Arc<AtomicBool>) {
    let mut queue: BinaryHeap<Reverse<Pending>> = BinaryHeap::new();

    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        // Fire everything due
        let now = Instant::now();
        while let Some(Reverse(next)) = queue.peek() {
            if next.0.deadline > now {
                break;
            }
            let Reverse(next) = queue.pop().unwrap();
            let entry = next.0;
            if entry.worker.send(entry.command).is_err() {
                debug!(worker = %entry.worker.id(), "dropped scheduled command for stopped worker");
            }
        }

        // Sleep until the next deadline (bounded so shutdown is noticed)
        let timeout = queue
            .peek()
            .map(|Reverse(next)| {
                next.0
                    .deadline
                    .saturating_duration_since(now)
                    .min(MAX_POLL_INTERVAL)
            })
            .unwrap_or(MAX_POLL_INTERVAL);

        match rx.recv_timeout(timeout) {
            Ok(request) => {
                queue.push(Reverse(Pending(request)));
                while let Ok(request) = rx.try_recv() {
                    queue.push(Reverse(Pending(request)));
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(pending = queue.len(), "timer thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexio_core::ItemId;

    use crate::command::test_support;

    #[test]
    fn test_delivers_in_deadline_order() {
        let timer = TimerThread::start().unwrap();
        let (wref, cmd_rx, _cb_rx, _selector) = test_support::worker_ref(0);

        // scheduled out of order; must arrive in deadline order
        timer.handle().schedule(
            Duration::from_millis(60),
            wref.clone(),
            WorkerCommand::Disconnect {
                id: ItemId::new(2),
            },
        );
        timer.handle().schedule(
            Duration::from_millis(10),
            wref,
            WorkerCommand::Disconnect {
                id: ItemId::new(1),
            },
        );

        let first = cmd_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        match first {
            WorkerCommand::Disconnect { id } => assert_eq!(id, ItemId::new(1)),
            other => panic!("unexpected command {}", other.name()),
        }
        let second = cmd_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        match second {
            WorkerCommand::Disconnect { id } => assert_eq!(id, ItemId::new(2)),
            other => panic!("unexpected command {}", other.name()),
        }

        timer.shutdown();
    }

    #[test]
    fn test_shutdown_joins() {
        let timer = TimerThread::start().unwrap();
        timer.shutdown();
    }
}
