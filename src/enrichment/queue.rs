//! Bounded single-consumer task queue.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{EnrichmentError, EnrichmentTask};

pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// How often blocked threads recheck cancellation.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs one task. Implementations check `cancel` around blocking calls.
pub trait TaskRunner: Send + Sync {
    fn run(&self, task: EnrichmentTask, cancel: &CancellationToken);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub submitted: usize,
    pub completed: usize,
    pub discarded: usize,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<EnrichmentTask>,
    in_flight: bool,
    closed: bool,
    stats: QueueStats,
}

impl QueueState {
    fn outstanding(&self) -> usize {
        self.pending.len() + usize::from(self.in_flight)
    }
}

struct Shared {
    state: Mutex<QueueState>,
    changed: Condvar,
}

/// FIFO of enrichment tasks with a fixed capacity of outstanding tasks,
/// queued plus in flight. The worker thread starts on the first submission.
pub struct EnrichmentQueue {
    shared: Arc<Shared>,
    capacity: usize,
    runner: Arc<dyn TaskRunner>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EnrichmentQueue {
    pub fn new(capacity: usize, runner: Arc<dyn TaskRunner>, cancel: CancellationToken) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                changed: Condvar::new(),
            }),
            capacity: capacity.max(1),
            runner,
            cancel,
            worker: Mutex::new(None),
        }
    }

    /// Enqueues `task`, blocking while the queue is full.
    pub fn submit(&self, task: EnrichmentTask) -> Result<(), EnrichmentError> {
        {
            let mut state = self.shared.state.lock().unwrap();
            loop {
                if self.cancel.is_cancelled() {
                    return Err(EnrichmentError::Cancelled);
                }
                if state.closed {
                    return Err(EnrichmentError::Closed);
                }
                if state.outstanding() < self.capacity {
                    break;
                }
                state = self
                    .shared
                    .changed
                    .wait_timeout(state, CANCEL_POLL_INTERVAL)
                    .unwrap()
                    .0;
            }
            debug!("Queued enrichment of {}", task);
            state.pending.push_back(task);
            state.stats.submitted += 1;
            self.shared.changed.notify_all();
        }
        self.ensure_worker();
        Ok(())
    }

    fn ensure_worker(&self) {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() {
            return;
        }
        let shared = self.shared.clone();
        let runner = self.runner.clone();
        let cancel = self.cancel.clone();
        let spawned = std::thread::Builder::new()
            .name("enrichment-worker".to_string())
            .spawn(move || worker_loop(shared, runner, cancel));
        match spawned {
            Ok(handle) => *worker = Some(handle),
            Err(e) => warn!("Failed to start enrichment worker: {}", e),
        }
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.state.lock().unwrap().stats
    }

    /// Tasks queued or running.
    pub fn outstanding(&self) -> usize {
        self.shared.state.lock().unwrap().outstanding()
    }

    /// Runs every queued task, then stops the worker.
    pub fn shutdown_and_wait(&self) -> QueueStats {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.closed = true;
            self.shared.changed.notify_all();
        }
        self.join_worker();
        self.stats()
    }

    /// Cancels the running task, discards queued ones and waits for the worker.
    pub fn request_cancel(&self) -> QueueStats {
        self.cancel.cancel();
        {
            let mut state = self.shared.state.lock().unwrap();
            state.closed = true;
            discard_pending(&mut state);
            self.shared.changed.notify_all();
        }
        self.join_worker();
        self.stats()
    }

    fn join_worker(&self) {
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Enrichment worker panicked");
            }
        }
    }
}

impl Drop for EnrichmentQueue {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().unwrap();
        if !state.closed {
            state.closed = true;
            discard_pending(&mut state);
            self.cancel.cancel();
            self.shared.changed.notify_all();
        }
    }
}

fn discard_pending(state: &mut QueueState) {
    let discarded = state.pending.len();
    if discarded > 0 {
        debug!("Discarding {} queued enrichment tasks", discarded);
    }
    state.stats.discarded += discarded;
    state.pending.clear();
}

fn worker_loop(shared: Arc<Shared>, runner: Arc<dyn TaskRunner>, cancel: CancellationToken) {
    loop {
        let task = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if cancel.is_cancelled() {
                    discard_pending(&mut state);
                    shared.changed.notify_all();
                    return;
                }
                if let Some(task) = state.pending.pop_front() {
                    state.in_flight = true;
                    break task;
                }
                if state.closed {
                    return;
                }
                state = shared
                    .changed
                    .wait_timeout(state, CANCEL_POLL_INTERVAL)
                    .unwrap()
                    .0;
            }
        };

        runner.run(task, &cancel);

        let mut state = shared.state.lock().unwrap();
        state.in_flight = false;
        state.stats.completed += 1;
        shared.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Instant;

    /// Records task ids, optionally blocking each task until released.
    struct RecordingRunner {
        ran: Mutex<Vec<i64>>,
        gate: Option<Mutex<mpsc::Receiver<()>>>,
        started: AtomicUsize,
    }

    impl RecordingRunner {
        fn new() -> Self {
            Self {
                ran: Mutex::new(vec![]),
                gate: None,
                started: AtomicUsize::new(0),
            }
        }

        fn gated() -> (Self, mpsc::Sender<()>) {
            let (tx, rx) = mpsc::channel();
            let mut runner = Self::new();
            runner.gate = Some(Mutex::new(rx));
            (runner, tx)
        }
    }

    impl TaskRunner for RecordingRunner {
        fn run(&self, task: EnrichmentTask, cancel: &CancellationToken) {
            self.started.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let gate = gate.lock().unwrap();
                loop {
                    if cancel.is_cancelled() {
                        return;
                    }
                    if gate.recv_timeout(Duration::from_millis(10)).is_ok() {
                        break;
                    }
                }
            }
            self.ran.lock().unwrap().push(task.id());
        }
    }

    fn task(id: i64) -> EnrichmentTask {
        EnrichmentTask::Artist {
            id,
            name: format!("artist {}", id),
        }
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn drains_in_fifo_order() {
        let runner = Arc::new(RecordingRunner::new());
        let queue = EnrichmentQueue::new(10, runner.clone(), CancellationToken::new());
        for id in 1..=25 {
            queue.submit(task(id)).unwrap();
        }
        let stats = queue.shutdown_and_wait();

        assert_eq!(*runner.ran.lock().unwrap(), (1..=25).collect::<Vec<_>>());
        assert_eq!(stats.completed, 25);
        assert_eq!(stats.discarded, 0);
        assert!(matches!(queue.submit(task(99)), Err(EnrichmentError::Closed)));
    }

    #[test]
    fn worker_starts_lazily() {
        let queue = EnrichmentQueue::new(
            10,
            Arc::new(RecordingRunner::new()),
            CancellationToken::new(),
        );
        assert!(queue.worker.lock().unwrap().is_none());
        assert_eq!(queue.shutdown_and_wait(), QueueStats::default());
    }

    #[test]
    fn submit_blocks_while_full() {
        let (runner, release) = RecordingRunner::gated();
        let runner = Arc::new(runner);
        let queue = Arc::new(EnrichmentQueue::new(
            3,
            runner.clone(),
            CancellationToken::new(),
        ));
        for id in 1..=3 {
            queue.submit(task(id)).unwrap();
        }
        wait_until(|| runner.started.load(Ordering::SeqCst) == 1);
        assert_eq!(queue.outstanding(), 3);

        let fourth_accepted = Arc::new(AtomicBool::new(false));
        let submitter = {
            let queue = queue.clone();
            let accepted = fourth_accepted.clone();
            std::thread::spawn(move || {
                queue.submit(task(4)).unwrap();
                accepted.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(150));
        assert!(!fourth_accepted.load(Ordering::SeqCst));
        assert!(queue.outstanding() <= 3);

        release.send(()).unwrap();
        submitter.join().unwrap();
        assert!(fourth_accepted.load(Ordering::SeqCst));

        for _ in 0..3 {
            release.send(()).unwrap();
        }
        let stats = queue.shutdown_and_wait();
        assert_eq!(stats.completed, 4);
        assert_eq!(*runner.ran.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn cancel_discards_queued_tasks() {
        let (runner, _release) = RecordingRunner::gated();
        let runner = Arc::new(runner);
        let queue = EnrichmentQueue::new(10, runner.clone(), CancellationToken::new());
        for id in 1..=5 {
            queue.submit(task(id)).unwrap();
        }
        wait_until(|| runner.started.load(Ordering::SeqCst) == 1);

        let stats = queue.request_cancel();
        assert_eq!(stats.discarded, 4);
        assert!(runner.ran.lock().unwrap().is_empty());
        assert!(matches!(queue.submit(task(6)), Err(EnrichmentError::Cancelled)));
    }

    #[test]
    fn parent_cancellation_unblocks_submit() {
        let (runner, _release) = RecordingRunner::gated();
        let parent = CancellationToken::new();
        let queue = Arc::new(EnrichmentQueue::new(
            1,
            Arc::new(runner),
            parent.child_token(),
        ));
        queue.submit(task(1)).unwrap();

        let blocked = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.submit(task(2)))
        };
        std::thread::sleep(Duration::from_millis(100));
        parent.cancel();

        assert!(matches!(
            blocked.join().unwrap(),
            Err(EnrichmentError::Cancelled)
        ));
        queue.request_cancel();
    }
}
