//! Run scheduler.
//!
//! Timer ticks and explicit triggers feed one bounded queue drained by a
//! single worker task, so at most one reconciliation executes at a time.
//! Each queued run is driven through the pure [`RunState`] machine: the
//! worker executes the actions it emits (execute, wait out a backoff, finish)
//! and publishes every state change on the run's [`RunHandle`].
//!
//! ```text
//! timer ──┐
//!         ├──► [ queue (bounded) ] ──► worker ──► RunExecutor::execute
//! trigger ┘                              │
//!                                        └── retry/backoff per RetryPolicy
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sync_core::{RetryPolicy, RunAction, RunEvent, RunState};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};

use crate::error::{Result, SchedulerError, SyncError};

const CANCELLED_BY_SHUTDOWN: &str = "cancelled by shutdown";

/// Work performed by each run.
#[async_trait]
pub trait RunExecutor: Send + Sync + 'static {
    /// Perform one attempt. Returns the number of rows changed.
    async fn execute(&self) -> Result<usize>;

    /// Record an attempt the scheduler abandoned after `budget`.
    fn record_timeout(&self, budget: Duration);

    /// Drop run history.
    fn clear_history(&self);
}

/// Runtime settings for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Polling period; `None` disables the timer.
    pub interval: Option<Duration>,
    /// Attempt limit and backoff.
    pub retry: RetryPolicy,
    /// Budget for a single attempt.
    pub run_timeout: Duration,
    /// How long `shutdown()` waits for the in-flight run.
    pub shutdown_grace: Duration,
    /// Maximum number of queued runs.
    pub queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Some(Duration::from_secs(30)),
            retry: RetryPolicy::default(),
            run_timeout: Duration::from_secs(120),
            shutdown_grace: Duration::from_secs(10),
            queue_capacity: 64,
        }
    }
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Runs queued and not yet picked up.
    #[serde(rename = "waitingCount")]
    pub waiting: u64,
    /// Runs held by the worker (0 or 1), including backoff waits.
    #[serde(rename = "activeCount")]
    pub active: u64,
    /// Runs that completed.
    #[serde(rename = "completedCount")]
    pub completed: u64,
    /// Runs that failed terminally.
    #[serde(rename = "failedCount")]
    pub failed: u64,
}

/// Queue counters.
///
/// Thread-safe via `AtomicU64`; no locks needed for incrementing.
#[derive(Debug, Default)]
struct QueueCounters {
    waiting: AtomicU64,
    active: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl QueueCounters {
    fn snapshot(&self) -> QueueStats {
        QueueStats {
            waiting: self.waiting.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn finished(&self, state: &RunState) {
        match state {
            RunState::Completed { .. } => self.completed.fetch_add(1, Ordering::Relaxed),
            _ => self.failed.fetch_add(1, Ordering::Relaxed),
        };
    }
}

/// Handle to a queued run.
#[derive(Debug, Clone)]
pub struct RunHandle {
    /// Run id, `sync-<unix millis>-<seq>`.
    pub id: String,
    state: watch::Receiver<RunState>,
}

impl RunHandle {
    /// Current state of the run.
    pub fn status(&self) -> RunState {
        self.state.borrow().clone()
    }

    /// Wait until the run completes or fails.
    pub async fn wait(mut self) -> RunState {
        if let Ok(state) = self.state.wait_for(RunState::is_terminal).await {
            return state.clone();
        }
        // Worker gone without a terminal state
        self.state.borrow().clone()
    }
}

enum Command {
    Run(QueuedRun),
    ClearHistory,
}

struct QueuedRun {
    id: String,
    state: Arc<watch::Sender<RunState>>,
}

/// State shared by the scheduler, the worker and the timer.
struct Shared {
    queue: mpsc::Sender<Command>,
    capacity: usize,
    accepting: AtomicBool,
    next_seq: AtomicU64,
    counters: QueueCounters,
    /// Status channel of the run the worker holds.
    in_flight: Mutex<Option<Arc<watch::Sender<RunState>>>>,
}

impl Shared {
    fn enqueue(&self) -> std::result::Result<RunHandle, SchedulerError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShuttingDown);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("sync-{}-{}", Utc::now().timestamp_millis(), seq);
        let (tx, rx) = watch::channel(RunState::new());
        let run = QueuedRun {
            id: id.clone(),
            state: Arc::new(tx),
        };

        self.counters.waiting.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.queue.try_send(Command::Run(run)) {
            self.counters.waiting.fetch_sub(1, Ordering::Relaxed);
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => SchedulerError::QueueFull {
                    capacity: self.capacity,
                },
                mpsc::error::TrySendError::Closed(_) => SchedulerError::ShuttingDown,
            });
        }

        tracing::debug!("Queued run {}", id);
        Ok(RunHandle { id, state: rx })
    }

    fn set_in_flight(&self, run: Option<Arc<watch::Sender<RunState>>>) {
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = run;
    }

    fn take_in_flight(&self) -> Option<Arc<watch::Sender<RunState>>> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Single-worker run scheduler.
pub struct Scheduler {
    shared: Arc<Shared>,
    executor: Arc<dyn RunExecutor>,
    config: SchedulerConfig,
    queue_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Command>>>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawn the worker and, if an interval is configured, the timer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<E: RunExecutor>(executor: Arc<E>, config: SchedulerConfig) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (queue, queue_rx) = mpsc::channel(capacity);
        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            queue,
            capacity,
            accepting: AtomicBool::new(true),
            next_seq: AtomicU64::new(1),
            counters: QueueCounters::default(),
            in_flight: Mutex::new(None),
        });
        let executor: Arc<dyn RunExecutor> = executor;

        let worker = tokio::spawn(run_worker(
            Arc::clone(&executor),
            Arc::clone(&queue_rx),
            Arc::clone(&shared),
            shutdown_rx,
            config.clone(),
        ));
        let ticker = config
            .interval
            .map(|period| spawn_ticker(Arc::clone(&shared), period));

        tracing::info!(
            "Scheduler started (interval: {:?}, max attempts: {})",
            config.interval,
            config.retry.max_attempts
        );

        Self {
            shared,
            executor,
            config,
            queue_rx,
            shutdown_tx,
            worker: Mutex::new(Some(worker)),
            ticker: Mutex::new(ticker),
        }
    }

    /// Enqueue a run and return immediately.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::QueueFull`] when the queue is at capacity,
    /// [`SchedulerError::ShuttingDown`] once `shutdown()` was called.
    pub fn trigger_run(&self) -> std::result::Result<RunHandle, SchedulerError> {
        self.shared.enqueue()
    }

    /// Ask the worker to drop run history between runs.
    ///
    /// # Errors
    ///
    /// Same as [`Scheduler::trigger_run`].
    pub fn clear_history(&self) -> std::result::Result<(), SchedulerError> {
        if !self.shared.accepting.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShuttingDown);
        }
        self.shared
            .queue
            .try_send(Command::ClearHistory)
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SchedulerError::QueueFull {
                    capacity: self.shared.capacity,
                },
                mpsc::error::TrySendError::Closed(_) => SchedulerError::ShuttingDown,
            })
    }

    /// Snapshot of the queue counters.
    pub fn queue_stats(&self) -> QueueStats {
        self.shared.counters.snapshot()
    }

    /// Stop the timer, refuse new triggers, let the in-flight run finish
    /// within the grace period, then cancel whatever is still queued.
    ///
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if !self.shared.accepting.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Scheduler shutting down");

        let ticker = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(ticker) = ticker {
            ticker.abort();
            let _ = ticker.await;
        }

        self.shutdown_tx.send_replace(true);

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut worker) = worker {
            let grace = self.config.shutdown_grace;
            if timeout(grace, &mut worker).await.is_err() {
                tracing::warn!("In-flight run still busy after {:?}, abandoning it", grace);
                worker.abort();
                let _ = worker.await;
                self.abandon_in_flight(grace);
            }
        }

        let mut queue_rx = self.queue_rx.lock().await;
        queue_rx.close();
        let mut cancelled = 0;
        while let Ok(command) = queue_rx.try_recv() {
            if let Command::Run(run) = command {
                self.shared.counters.waiting.fetch_sub(1, Ordering::Relaxed);
                let state = cancel(run.state.borrow().clone(), &self.config.retry);
                self.shared.counters.finished(&state);
                run.state.send_replace(state);
                cancelled += 1;
            }
        }

        tracing::info!(
            "Scheduler stopped ({} queued runs cancelled): {:?}",
            cancelled,
            self.queue_stats()
        );
    }

    fn abandon_in_flight(&self, grace: Duration) {
        let Some(run) = self.shared.take_in_flight() else {
            return;
        };
        self.executor.record_timeout(grace);
        let state = cancel(run.borrow().clone(), &self.config.retry);
        self.shared.counters.active.fetch_sub(1, Ordering::Relaxed);
        self.shared.counters.finished(&state);
        run.send_replace(state);
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for task in [&self.ticker, &self.worker] {
            if let Some(handle) = task.lock().unwrap_or_else(PoisonError::into_inner).take() {
                handle.abort();
            }
        }
    }
}

fn cancel(state: RunState, policy: &RetryPolicy) -> RunState {
    let (state, _) = state.on_event(
        RunEvent::Cancelled {
            reason: CANCELLED_BY_SHUTDOWN.to_string(),
        },
        policy,
    );
    state
}

/// Resolves once shutdown was signalled or the scheduler is gone.
async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn spawn_ticker(shared: Arc<Shared>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Run timer started (interval: {:?})", period);

        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            timer.tick().await;

            match shared.enqueue() {
                Ok(handle) => tracing::debug!("Timer queued run {}", handle.id),
                Err(SchedulerError::QueueFull { capacity }) => {
                    tracing::warn!("Run queue full ({}), skipping timer tick", capacity);
                }
                Err(SchedulerError::ShuttingDown) => break,
            }
        }
    })
}

async fn run_worker(
    executor: Arc<dyn RunExecutor>,
    queue_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Command>>>,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
    config: SchedulerConfig,
) {
    loop {
        let command = {
            let mut queue_rx = queue_rx.lock().await;
            tokio::select! {
                biased;
                _ = shutdown_signalled(&mut shutdown) => break,
                command = queue_rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            }
        };

        match command {
            Command::ClearHistory => executor.clear_history(),
            Command::Run(run) => {
                shared.counters.waiting.fetch_sub(1, Ordering::Relaxed);
                process_run(&executor, run, &shared, &mut shutdown, &config).await;
            }
        }
    }

    tracing::debug!("Scheduler worker exited");
}

async fn process_run(
    executor: &Arc<dyn RunExecutor>,
    run: QueuedRun,
    shared: &Shared,
    shutdown: &mut watch::Receiver<bool>,
    config: &SchedulerConfig,
) {
    let QueuedRun { id, state: status } = run;
    shared.counters.active.fetch_add(1, Ordering::Relaxed);
    shared.set_in_flight(Some(Arc::clone(&status)));

    let mut state = status.borrow().clone();
    let mut event = RunEvent::Started;

    loop {
        let (next, actions) = state.on_event(event, &config.retry);
        state = next;

        if state.is_terminal() {
            shared.set_in_flight(None);
            shared.counters.active.fetch_sub(1, Ordering::Relaxed);
            shared.counters.finished(&state);
        }
        status.send_replace(state.clone());

        let Some(action) = actions.into_iter().next() else {
            break;
        };

        event = match action {
            RunAction::Execute => {
                let attempt = match state {
                    RunState::Running { attempt } => attempt,
                    _ => 0,
                };
                tracing::info!("Run {} attempt {} started", id, attempt);
                attempt_once(executor, &id, config.run_timeout).await
            }
            RunAction::ScheduleRetry { delay } => {
                tracing::warn!("Run {} retrying in {:?}", id, delay);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => RunEvent::Started,
                    _ = shutdown_signalled(shutdown) => RunEvent::Cancelled {
                        reason: CANCELLED_BY_SHUTDOWN.to_string(),
                    },
                }
            }
            RunAction::Finish => {
                match &state {
                    RunState::Failed { attempts, error } => {
                        tracing::error!("Run {} failed after {} attempts: {}", id, attempts, error);
                    }
                    _ => tracing::info!("Run {} completed", id),
                }
                break;
            }
        };
    }
}

/// Aborts the attempt task when the worker stops waiting on it.
struct AttemptTask(JoinHandle<Result<usize>>);

impl Drop for AttemptTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs one attempt on its own task so a panicking executor fails the
/// attempt instead of the worker.
async fn attempt_once(executor: &Arc<dyn RunExecutor>, id: &str, budget: Duration) -> RunEvent {
    let mut task = AttemptTask(tokio::spawn({
        let executor = Arc::clone(executor);
        async move { executor.execute().await }
    }));

    match timeout(budget, &mut task.0).await {
        Ok(Err(join_error)) => {
            tracing::error!("Run {} attempt panicked: {}", id, join_error);
            RunEvent::Errored {
                error: format!("attempt panicked: {}", join_error),
            }
        }
        Ok(Ok(Ok(changed))) => {
            tracing::debug!("Run {} changed {} rows", id, changed);
            RunEvent::Succeeded
        }
        Ok(Ok(Err(e))) => {
            tracing::warn!("Run {} attempt failed: {}", id, e);
            RunEvent::Errored {
                error: e.to_string(),
            }
        }
        Err(_) => {
            executor.record_timeout(budget);
            let error = SyncError::Timeout {
                operation: format!("run {}", id),
                budget,
            };
            tracing::warn!("{}", error);
            RunEvent::Errored {
                error: error.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::sync::atomic::AtomicU32;
    use sync_types::Side;

    // =========================================================================
    // Test executor
    // =========================================================================

    #[derive(Default)]
    struct FakeExecutor {
        delay: Duration,
        fail_first: u32,
        calls: AtomicU32,
        running: AtomicU32,
        max_running: AtomicU32,
        timeouts: AtomicU32,
        clears: AtomicU32,
        started_at: Mutex<Vec<Instant>>,
    }

    impl FakeExecutor {
        fn new() -> Self {
            Self::default()
        }

        fn failing(fail_first: u32) -> Self {
            Self {
                fail_first,
                ..Self::default()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RunExecutor for FakeExecutor {
        async fn execute(&self) -> Result<usize> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.started_at.lock().unwrap().push(Instant::now());

            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(running, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.running.fetch_sub(1, Ordering::SeqCst);

            if call < self.fail_first {
                return Err(SyncError::Fetch {
                    side: Side::SideA,
                    source: StoreError::Unavailable("quota exceeded".into()),
                });
            }
            Ok(1)
        }

        fn record_timeout(&self, _budget: Duration) {
            // A timed-out attempt never reaches the decrement above
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.timeouts.fetch_add(1, Ordering::SeqCst);
        }

        fn clear_history(&self) {
            self.clears.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Executor whose attempts panic.
    #[derive(Default)]
    struct PanickingExecutor {
        calls: AtomicU32,
    }

    #[async_trait]
    impl RunExecutor for PanickingExecutor {
        async fn execute(&self) -> Result<usize> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            panic!("row store handed back garbage");
        }

        fn record_timeout(&self, _budget: Duration) {}

        fn clear_history(&self) {}
    }

    fn manual_config() -> SchedulerConfig {
        SchedulerConfig {
            interval: None,
            ..SchedulerConfig::default()
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    // =========================================================================
    // Triggering
    // =========================================================================

    #[tokio::test]
    async fn triggered_run_completes() {
        let executor = Arc::new(FakeExecutor::new());
        let scheduler = Scheduler::start(Arc::clone(&executor), manual_config());

        let handle = scheduler.trigger_run().unwrap();
        assert!(handle.id.starts_with("sync-"));

        let state = handle.wait().await;

        assert_eq!(state, RunState::Completed { attempts: 1 });
        assert_eq!(
            scheduler.queue_stats(),
            QueueStats {
                waiting: 0,
                active: 0,
                completed: 1,
                failed: 0,
            }
        );
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn run_ids_are_unique() {
        let scheduler = Scheduler::start(Arc::new(FakeExecutor::new()), manual_config());

        let first = scheduler.trigger_run().unwrap();
        let second = scheduler.trigger_run().unwrap();

        assert_ne!(first.id, second.id);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn at_most_one_run_executes() {
        let executor = Arc::new(FakeExecutor::slow(Duration::from_millis(50)));
        let scheduler = Scheduler::start(Arc::clone(&executor), manual_config());

        let handles: Vec<RunHandle> = (0..5).map(|_| scheduler.trigger_run().unwrap()).collect();

        wait_until(|| scheduler.queue_stats().active == 1).await;
        assert!(scheduler.queue_stats().waiting >= 3);

        for handle in handles {
            assert_eq!(handle.wait().await, RunState::Completed { attempts: 1 });
        }
        assert_eq!(executor.max_running.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.queue_stats().completed, 5);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_rejects_trigger() {
        let config = SchedulerConfig {
            queue_capacity: 1,
            ..manual_config()
        };
        let executor = Arc::new(FakeExecutor::slow(Duration::from_secs(5)));
        let scheduler = Scheduler::start(Arc::clone(&executor), config);

        scheduler.trigger_run().unwrap();
        wait_until(|| scheduler.queue_stats().active == 1).await;
        scheduler.trigger_run().unwrap();

        assert_eq!(
            scheduler.trigger_run().unwrap_err(),
            SchedulerError::QueueFull { capacity: 1 }
        );
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn timer_triggers_runs() {
        let config = SchedulerConfig {
            interval: Some(Duration::from_secs(30)),
            ..SchedulerConfig::default()
        };
        let executor = Arc::new(FakeExecutor::new());
        let scheduler = Scheduler::start(Arc::clone(&executor), config);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(executor.calls(), 0);

        tokio::time::sleep(Duration::from_secs(66)).await;
        assert_eq!(executor.calls(), 3);
        scheduler.shutdown().await;
    }

    // =========================================================================
    // Retries
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn failed_run_retries_with_backoff() {
        let executor = Arc::new(FakeExecutor::failing(2));
        let scheduler = Scheduler::start(Arc::clone(&executor), manual_config());

        let state = scheduler.trigger_run().unwrap().wait().await;

        assert_eq!(state, RunState::Completed { attempts: 3 });
        let started = executor.started_at.lock().unwrap().clone();
        assert_eq!(started.len(), 3);
        assert!(started[1] - started[0] >= Duration::from_secs(2));
        assert!(started[2] - started[1] >= Duration::from_secs(4));
        assert_eq!(scheduler.queue_stats().failed, 0);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_mark_run_failed() {
        let executor = Arc::new(FakeExecutor::failing(u32::MAX));
        let scheduler = Scheduler::start(Arc::clone(&executor), manual_config());

        let state = scheduler.trigger_run().unwrap().wait().await;

        assert!(matches!(
            state,
            RunState::Failed { attempts: 3, ref error } if error.contains("quota exceeded")
        ));
        assert_eq!(executor.calls(), 3);
        assert_eq!(scheduler.queue_stats().failed, 1);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_times_out() {
        let config = SchedulerConfig {
            run_timeout: Duration::from_secs(1),
            retry: RetryPolicy::new(1, Duration::from_secs(2)),
            ..manual_config()
        };
        let executor = Arc::new(FakeExecutor::slow(Duration::from_secs(60)));
        let scheduler = Scheduler::start(Arc::clone(&executor), config);

        let state = scheduler.trigger_run().unwrap().wait().await;

        assert!(matches!(
            state,
            RunState::Failed { attempts: 1, ref error } if error.contains("timed out")
        ));
        assert_eq!(executor.timeouts.load(Ordering::SeqCst), 1);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_attempt_fails_run_and_worker_survives() {
        let config = SchedulerConfig {
            retry: RetryPolicy::new(1, Duration::from_secs(2)),
            ..manual_config()
        };
        let executor = Arc::new(PanickingExecutor::default());
        let scheduler = Scheduler::start(Arc::clone(&executor), config);

        let first = scheduler.trigger_run().unwrap().wait().await;
        assert!(matches!(
            first,
            RunState::Failed { attempts: 1, ref error } if error.contains("panicked")
        ));

        let second = scheduler.trigger_run().unwrap().wait().await;
        assert!(matches!(second, RunState::Failed { attempts: 1, .. }));

        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
        let stats = scheduler.queue_stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.failed, 2);
        scheduler.shutdown().await;
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn shutdown_finishes_in_flight_and_cancels_queued() {
        let executor = Arc::new(FakeExecutor::slow(Duration::from_secs(1)));
        let scheduler = Scheduler::start(Arc::clone(&executor), manual_config());

        let first = scheduler.trigger_run().unwrap();
        wait_until(|| scheduler.queue_stats().active == 1).await;
        let second = scheduler.trigger_run().unwrap();

        scheduler.shutdown().await;

        assert_eq!(first.wait().await, RunState::Completed { attempts: 1 });
        assert_eq!(
            second.wait().await,
            RunState::Failed {
                attempts: 0,
                error: CANCELLED_BY_SHUTDOWN.to_string(),
            }
        );
        assert_eq!(executor.calls(), 1);
        assert_eq!(scheduler.trigger_run().unwrap_err(), SchedulerError::ShuttingDown);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_abandons_stuck_run_after_grace() {
        let executor = Arc::new(FakeExecutor::slow(Duration::from_secs(3600)));
        let scheduler = Scheduler::start(Arc::clone(&executor), manual_config());

        let handle = scheduler.trigger_run().unwrap();
        wait_until(|| scheduler.queue_stats().active == 1).await;

        let before = Instant::now();
        scheduler.shutdown().await;

        assert!(Instant::now() - before < Duration::from_secs(60));
        assert!(matches!(handle.wait().await, RunState::Failed { attempts: 1, .. }));
        assert_eq!(executor.timeouts.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.queue_stats().active, 0);
        assert_eq!(scheduler.queue_stats().failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_backoff() {
        let config = SchedulerConfig {
            retry: RetryPolicy::new(3, Duration::from_secs(60)),
            ..manual_config()
        };
        let executor = Arc::new(FakeExecutor::failing(u32::MAX));
        let scheduler = Scheduler::start(Arc::clone(&executor), config);

        let handle = scheduler.trigger_run().unwrap();
        wait_until(|| handle.status() == RunState::Queued { attempt: 2 }).await;

        scheduler.shutdown().await;

        assert_eq!(
            handle.wait().await,
            RunState::Failed {
                attempts: 1,
                error: CANCELLED_BY_SHUTDOWN.to_string(),
            }
        );
        assert_eq!(executor.calls(), 1);
    }

    #[tokio::test]
    async fn clear_history_reaches_executor() {
        let executor = Arc::new(FakeExecutor::new());
        let scheduler = Scheduler::start(Arc::clone(&executor), manual_config());

        scheduler.clear_history().unwrap();
        scheduler.trigger_run().unwrap().wait().await;

        assert_eq!(executor.clears.load(Ordering::SeqCst), 1);
        scheduler.shutdown().await;
    }
}
