//! The run lifecycle: worker pool, cancellation, timer and display wiring.
//!
//! An [`Engine`] owns everything belonging to one run: the counters, the
//! running flag, the worker tasks and the state machine
//! `Idle → Running → Stopping → Stopped`. Engines are independent; any number
//! can run side by side without shared state. Handles are cheap clones, so a
//! signal handler or a timer can stop a run from anywhere.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, warn};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;

pub mod display;

use crate::address::Target;
use crate::probe::{Probe, ProbeSession};
use crate::stats::{CountersView, StatsAggregator, Tally};
use display::{display_loop, ProgressSink};

/// Workers flush their local tally after this many probes.
const FLUSH_EVERY: u64 = 50;
/// Slack granted on top of the probe timeout when draining workers.
const DRAIN_GRACE: Duration = Duration::from_millis(500);
/// How long the drain waits for the display task after the workers are gone.
const DISPLAY_GRACE: Duration = Duration::from_secs(1);

/// Knobs for one run. All of them are fixed once the engine starts.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker count. Must be at least 1.
    pub threads: u16,
    /// Per-probe timeout. Must be non-zero; also bounds shutdown latency.
    pub probe_timeout: Duration,
    /// Run length; `None` runs until stopped externally.
    pub duration: Option<Duration>,
    /// Pause between consecutive probes of one worker. Zero means flat out.
    pub inter_call_delay: Duration,
    /// Pause between spawning consecutive workers.
    pub startup_stagger: Duration,
    /// Cadence of display snapshots.
    pub display_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: 10,
            probe_timeout: Duration::from_millis(1500),
            duration: None,
            inter_call_delay: Duration::from_millis(1),
            startup_stagger: Duration::from_millis(50),
            display_interval: Duration::from_millis(500),
        }
    }
}

/// Lifecycle states. Linear; a finished engine is never restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed, nothing spawned yet.
    Idle,
    /// Workers are probing.
    Running,
    /// The flag is down and the drain is in progress.
    Stopping,
    /// Drained; the final report is available.
    Stopped,
}

/// Everything that can go wrong talking to an engine.
///
/// Steady-state network failures never show up here; they are absorbed into
/// the statistics and only visible as a degraded success rate.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The configuration failed validation before anything spawned.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// `start` was called while a run is in progress.
    #[error("engine is already running")]
    AlreadyRunning,
    /// `start` was called on an engine that already completed its run.
    #[error("a finished engine cannot be restarted; create a new one")]
    Finished,
    /// `final_report` was called before the engine reached `Stopped`.
    #[error("the final report is only available once the engine has stopped")]
    NotStopped,
}

/// The single cancellation signal observed cooperatively by every worker.
///
/// Nothing else is ever broadcast to the pool: workers check this flag before
/// each probe and drain naturally, so shutdown latency is bounded by one
/// probe timeout.
#[derive(Debug, Default)]
pub struct RunFlag(AtomicBool);

impl RunFlag {
    /// Whether the run is still on.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Raises or clears the flag.
    pub fn set(&self, running: bool) {
        self.0.store(running, Ordering::SeqCst);
    }
}

struct EngineInner {
    config: EngineConfig,
    target: Arc<Target>,
    state: watch::Sender<EngineState>,
    run: Arc<RunFlag>,
    stats: Arc<StatsAggregator>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    display: Mutex<Option<Box<dyn ProgressSink>>>,
    display_task: tokio::sync::Mutex<Option<JoinHandle<Box<dyn ProgressSink>>>>,
    report: Mutex<Option<CountersView>>,
}

/// One probing or flooding run. Cloning yields another handle to the same run.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Creates an idle engine for the given target. Nothing spawns until
    /// [`start`](Self::start).
    #[must_use]
    pub fn new(config: EngineConfig, target: Target) -> Self {
        let (state, _) = watch::channel(EngineState::Idle);
        Self {
            inner: Arc::new(EngineInner {
                config,
                target: Arc::new(target),
                state,
                run: Arc::new(RunFlag::default()),
                stats: Arc::new(StatsAggregator::new()),
                workers: tokio::sync::Mutex::new(Vec::new()),
                display: Mutex::new(None),
                display_task: tokio::sync::Mutex::new(None),
                report: Mutex::new(None),
            }),
        }
    }

    /// Hands the engine a rendering sink for the display loop.
    ///
    /// Must be called before [`start`](Self::start); without a sink the run
    /// is silent and only snapshots tell its story.
    pub fn attach_display(&self, sink: Box<dyn ProgressSink>) {
        *lock(&self.inner.display) = Some(sink);
    }

    /// Validates the configuration and launches the run.
    ///
    /// Spawns the display loop, then the workers with the configured stagger
    /// between them, then the duration timer if one is configured. On a
    /// validation or state error nothing has been spawned and the counters
    /// are untouched.
    pub async fn start<P: Probe>(&self, probe: P) -> Result<(), EngineError> {
        let inner = &self.inner;
        inner.validate()?;

        let mut claim = Ok(());
        inner.state.send_if_modified(|state| match *state {
            EngineState::Idle => {
                *state = EngineState::Running;
                true
            }
            EngineState::Running | EngineState::Stopping => {
                claim = Err(EngineError::AlreadyRunning);
                false
            }
            EngineState::Stopped => {
                claim = Err(EngineError::Finished);
                false
            }
        });
        claim?;

        inner.stats.reset();
        inner.run.set(true);
        debug!(
            "starting {} workers against {} (timeout {:?}, delay {:?})",
            inner.config.threads, inner.target, inner.config.probe_timeout,
            inner.config.inter_call_delay
        );

        if let Some(sink) = lock(&inner.display).take() {
            let task = tokio::spawn(display_loop(
                Arc::clone(&inner.run),
                Arc::clone(&inner.stats),
                inner.config.display_interval,
                sink,
            ));
            *inner.display_task.lock().await = Some(task);
        }

        let probe = Arc::new(probe);
        let mut workers = inner.workers.lock().await;
        for worker_id in 0..inner.config.threads {
            if worker_id > 0 && !inner.config.startup_stagger.is_zero() {
                time::sleep(inner.config.startup_stagger).await;
            }
            workers.push(tokio::spawn(worker_loop(
                worker_id,
                Arc::clone(&probe),
                Arc::clone(&inner.target),
                inner.config.probe_timeout,
                inner.config.inter_call_delay,
                Arc::clone(&inner.run),
                Arc::clone(&inner.stats),
            )));
        }
        drop(workers);

        if let Some(duration) = inner.config.duration {
            // The timer holds a weak handle so an abandoned engine can still
            // be collected; an upgrade failure means nothing is left to stop.
            let weak = Arc::downgrade(inner);
            tokio::spawn(async move {
                time::sleep(duration).await;
                if let Some(inner) = weak.upgrade() {
                    debug!("duration of {duration:?} elapsed, stopping");
                    inner.shutdown().await;
                }
            });
        }

        Ok(())
    }

    /// Stops the run and waits for the drain to finish.
    ///
    /// Idempotent: the first caller performs the drain, concurrent callers
    /// wait for it, and stopping an engine that never started is a no-op.
    /// Safe to call from a timer, a signal handler task, or any other handle.
    pub async fn stop(&self) {
        self.inner.shutdown().await;
    }

    /// A consistent copy of the counters, pollable at any time.
    #[must_use]
    pub fn snapshot(&self) -> CountersView {
        self.inner.stats.snapshot()
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.inner.state.borrow()
    }

    /// The terminal snapshot captured when the run stopped.
    ///
    /// Stable across repeated calls; elapsed time is frozen at the stop.
    pub fn final_report(&self) -> Result<CountersView, EngineError> {
        if self.state() != EngineState::Stopped {
            return Err(EngineError::NotStopped);
        }
        (*lock(&self.inner.report)).ok_or(EngineError::NotStopped)
    }

    /// Parks the caller until the run reaches [`EngineState::Stopped`].
    pub async fn wait_stopped(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| *state == EngineState::Stopped).await;
    }
}

impl EngineInner {
    fn validate(&self) -> Result<(), EngineError> {
        if self.config.threads == 0 {
            return Err(EngineError::Config(
                "thread count must be at least 1".to_string(),
            ));
        }
        if self.config.probe_timeout.is_zero() {
            return Err(EngineError::Config(
                "probe timeout must be greater than zero".to_string(),
            ));
        }
        if self.target.port == 0 {
            return Err(EngineError::Config(
                "target port must be in the range 1-65535".to_string(),
            ));
        }
        Ok(())
    }

    async fn shutdown(&self) {
        let initiated = self.state.send_if_modified(|state| {
            if *state == EngineState::Running {
                *state = EngineState::Stopping;
                true
            } else {
                false
            }
        });
        if !initiated {
            // Idle or already stopped: nothing to do. Mid-drain: wait for the
            // first caller so both observe the same terminal state.
            if *self.state.borrow() == EngineState::Stopping {
                let mut rx = self.state.subscribe();
                let _ = rx.wait_for(|state| *state == EngineState::Stopped).await;
            }
            return;
        }

        self.run.set(false);
        debug!("stopping, draining workers");

        // Workers are mid-probe at worst, so the whole pool shares one
        // timeout-sized budget. Stragglers past that get aborted.
        let grace = self.config.probe_timeout + self.config.inter_call_delay + DRAIN_GRACE;
        let deadline = Instant::now() + grace;
        let mut workers = self.workers.lock().await;
        for (index, mut worker) in workers.drain(..).enumerate() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match time::timeout(remaining, &mut worker).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("worker {index} failed during drain: {e}"),
                Err(_) => {
                    warn!("worker {index} did not exit within {grace:?}, aborting");
                    worker.abort();
                }
            }
        }
        drop(workers);

        let terminal = self.stats.snapshot();
        *lock(&self.report) = Some(terminal);

        if let Some(mut task) = self.display_task.lock().await.take() {
            match time::timeout(DISPLAY_GRACE, &mut task).await {
                Ok(Ok(mut sink)) => sink.finish(&terminal),
                Ok(Err(e)) => warn!("display task failed: {e}"),
                Err(_) => {
                    warn!("display task did not exit, aborting");
                    task.abort();
                }
            }
        }

        self.state.send_replace(EngineState::Stopped);
        debug!(
            "stopped after {:.1}s: {} ops, {:.1}% success",
            terminal.elapsed_secs, terminal.total_ops, terminal.success_rate
        );
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        // Last handle gone mid-run: clear the flag so workers drain instead
        // of flooding forever with nobody to stop them.
        if matches!(
            *self.state.borrow(),
            EngineState::Running | EngineState::Stopping
        ) {
            self.run.set(false);
            debug!("engine dropped mid-run, workers will halt");
        }
    }
}

/// One worker: probe, record, flush, breathe, re-check the flag.
async fn worker_loop<P: Probe>(
    worker_id: u16,
    probe: Arc<P>,
    target: Arc<Target>,
    timeout: Duration,
    delay: Duration,
    run: Arc<RunFlag>,
    stats: Arc<StatsAggregator>,
) {
    let mut session = match probe.session(&target).await {
        Ok(session) => session,
        Err(e) => {
            // One dead worker does not stop the run; siblings keep going.
            warn!("worker {worker_id} could not acquire a session: {e}");
            return;
        }
    };
    debug!("worker {worker_id} up");

    let mut tally = Tally::default();
    while run.is_running() {
        let outcome = session.probe(&target, timeout).await;
        tally.record(outcome.bytes_transferred(), outcome.is_success());
        if tally.ops() >= FLUSH_EVERY {
            tally.flush(&stats);
        }
        if delay.is_zero() {
            // Stay cooperative even flat out, or the display and timer tasks
            // never get scheduled on a saturated runtime.
            tokio::task::yield_now().await;
        } else {
            time::sleep(delay).await;
        }
    }

    tally.flush(&stats);
    debug!("worker {worker_id} done");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
