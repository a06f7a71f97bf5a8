//! Hashed timing wheel for delayed tasks
//!
//! The failback strategy schedules its background retries on a
//! [`HashedWheelTimer`]. The timer trades precision for cheap scheduling: time
//! is cut into fixed ticks, and every pending task lives in one bucket of a
//! ring of buckets. A worker task wakes once per tick, moves newly submitted
//! timeouts into their buckets and runs the ones that are due.
//!
//! # Properties
//!
//! - **Fixed granularity**: a task never runs before its deadline, and at most
//!   one tick after it (plus the time earlier tasks in the same tick take).
//! - **Bounded ring**: the ring size is rounded up to a power of two; timeouts
//!   further away than one revolution wait a number of extra rounds.
//! - **Bounded pending count**: [`new_timeout`](HashedWheelTimer::new_timeout)
//!   is rejected once `max_pending` timeouts are waiting.
//! - **Cancellable**: each [`Timeout`] can be cancelled; [`stop`](HashedWheelTimer::stop)
//!   cancels everything still pending.
//!
//! Tasks run on the timer's own worker, one after another.
//!
//! # Example
//!
//! ```ignore
//! let timer = HashedWheelTimer::new("retry", Duration::from_millis(100), 64, 1000);
//! let timeout = timer.new_timeout(Arc::new(MyTask), Duration::from_secs(1))?;
//! timeout.cancel();
//! timer.stop();
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

/// Upper bound of timeouts moved into the wheel per tick.
const MAX_TRANSFER_PER_TICK: usize = 100_000;

/// Work executed when a [`Timeout`] expires.
#[async_trait]
pub trait TimerTask: Send + Sync {
    /// Runs the task. `timeout` is the handle that just expired; it gives
    /// access to the timer so the task can schedule itself again.
    async fn run(&self, timeout: Timeout);
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    #[error("Timer {0} is stopped")]
    Stopped(String),

    #[error("Number of pending timeouts ({pending}) is greater than or equal to maximum allowed pending timeouts ({max})")]
    TooManyPending { pending: usize, max: usize },

    #[error("Timer {0} requires a running tokio runtime")]
    NoRuntime(String),
}

const WORKER_INIT: u8 = 0;
const WORKER_STARTED: u8 = 1;
const WORKER_SHUTDOWN: u8 = 2;

const TIMEOUT_INIT: u8 = 0;
const TIMEOUT_CANCELLED: u8 = 1;
const TIMEOUT_EXPIRED: u8 = 2;

struct Shared {
    name: String,
    tick: Duration,
    wheel_len: usize,
    /// 0 means unbounded
    max_pending: usize,
    pending: AtomicUsize,
    state: AtomicU8,
    sender: mpsc::UnboundedSender<Timeout>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Timeout>>>,
    shutdown: Notify,
}

impl Shared {
    fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }
}

/// Hashed timing wheel timer.
///
/// Cloning the timer yields another handle to the same wheel.
#[derive(Clone)]
pub struct HashedWheelTimer {
    shared: Arc<Shared>,
}

impl HashedWheelTimer {
    /// Creates a new timer. The worker starts lazily with the first timeout.
    ///
    /// # Arguments
    /// * `name` - Name used in logs and errors
    /// * `tick` - Tick duration (clamped to at least 1ms)
    /// * `ticks_per_wheel` - Ring size, rounded up to a power of two
    /// * `max_pending` - Maximum number of pending timeouts, 0 for unbounded
    pub fn new(
        name: impl Into<String>,
        tick: Duration,
        ticks_per_wheel: usize,
        max_pending: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                tick: tick.max(Duration::from_millis(1)),
                wheel_len: ticks_per_wheel.clamp(1, 1 << 30).next_power_of_two(),
                max_pending,
                pending: AtomicUsize::new(0),
                state: AtomicU8::new(WORKER_INIT),
                sender,
                receiver: Mutex::new(Some(receiver)),
                shutdown: Notify::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn tick_duration(&self) -> Duration {
        self.shared.tick
    }

    /// Number of buckets in the ring.
    pub fn wheel_len(&self) -> usize {
        self.shared.wheel_len
    }

    /// Number of timeouts that are neither expired nor cancelled.
    pub fn pending_timeouts(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.state() == WORKER_SHUTDOWN
    }

    /// Schedules `task` to run once after `delay`.
    ///
    /// # Errors
    ///
    /// - `TimerError::Stopped` if the timer was stopped
    /// - `TimerError::TooManyPending` if `max_pending` timeouts are waiting
    /// - `TimerError::NoRuntime` if called outside a tokio runtime
    pub fn new_timeout(
        &self,
        task: Arc<dyn TimerTask>,
        delay: Duration,
    ) -> Result<Timeout, TimerError> {
        let shared = &self.shared;

        let pending = shared.pending.fetch_add(1, Ordering::AcqRel) + 1;
        if shared.max_pending > 0 && pending > shared.max_pending {
            shared.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(TimerError::TooManyPending {
                pending,
                max: shared.max_pending,
            });
        }

        if let Err(e) = self.start() {
            shared.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(e);
        }

        let timeout = Timeout {
            inner: Arc::new(TimeoutInner {
                deadline: Instant::now() + delay,
                task,
                state: AtomicU8::new(TIMEOUT_INIT),
                timer: Arc::downgrade(shared),
            }),
        };

        if shared.sender.send(timeout.clone()).is_err() {
            // Worker already exited
            shared.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(TimerError::Stopped(shared.name.clone()));
        }

        Ok(timeout)
    }

    /// Stops the timer and cancels every pending timeout.
    ///
    /// # Returns
    /// `true` on the first call, `false` if the timer was already stopped
    pub fn stop(&self) -> bool {
        let previous = self.shared.state.swap(WORKER_SHUTDOWN, Ordering::AcqRel);
        match previous {
            WORKER_SHUTDOWN => false,
            WORKER_STARTED => {
                self.shared.shutdown.notify_one();
                tracing::debug!(timer = %self.shared.name, "Timer stopped");
                true
            }
            _ => true,
        }
    }

    fn start(&self) -> Result<(), TimerError> {
        let shared = &self.shared;
        match shared.state() {
            WORKER_STARTED => return Ok(()),
            WORKER_SHUTDOWN => return Err(TimerError::Stopped(shared.name.clone())),
            _ => {}
        }

        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| TimerError::NoRuntime(shared.name.clone()))?;

        match shared.state.compare_exchange(
            WORKER_INIT,
            WORKER_STARTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                let receiver = shared.receiver.lock().take();
                let Some(receiver) = receiver else {
                    return Err(TimerError::Stopped(shared.name.clone()));
                };
                let start = Instant::now();

                let worker = Worker {
                    shared: shared.clone(),
                    receiver,
                    start,
                    wheel: (0..shared.wheel_len).map(|_| Vec::new()).collect(),
                    tick: 0,
                };
                handle.spawn(worker.run());
                tracing::debug!(
                    timer = %shared.name,
                    tick_ms = shared.tick.as_millis() as u64,
                    wheel = shared.wheel_len,
                    "Timer worker started"
                );
                Ok(())
            }
            Err(WORKER_STARTED) => Ok(()),
            Err(_) => Err(TimerError::Stopped(shared.name.clone())),
        }
    }
}

struct TimeoutInner {
    deadline: Instant,
    task: Arc<dyn TimerTask>,
    state: AtomicU8,
    timer: Weak<Shared>,
}

/// Handle to a scheduled task.
#[derive(Clone)]
pub struct Timeout {
    inner: Arc<TimeoutInner>,
}

impl Timeout {
    pub fn deadline(&self) -> Instant {
        self.inner.deadline
    }

    /// The task this timeout runs.
    pub fn task(&self) -> Arc<dyn TimerTask> {
        self.inner.task.clone()
    }

    /// The timer this timeout belongs to, if it still exists.
    pub fn timer(&self) -> Option<HashedWheelTimer> {
        self.inner
            .timer
            .upgrade()
            .map(|shared| HashedWheelTimer { shared })
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == TIMEOUT_CANCELLED
    }

    pub fn is_expired(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == TIMEOUT_EXPIRED
    }

    /// Cancels the timeout.
    ///
    /// # Returns
    /// `true` if the timeout was pending and is now cancelled
    pub fn cancel(&self) -> bool {
        if self.transition(TIMEOUT_CANCELLED) {
            if let Some(shared) = self.inner.timer.upgrade() {
                shared.pending.fetch_sub(1, Ordering::AcqRel);
            }
            return true;
        }
        false
    }

    fn expire(&self) -> bool {
        if self.transition(TIMEOUT_EXPIRED) {
            if let Some(shared) = self.inner.timer.upgrade() {
                shared.pending.fetch_sub(1, Ordering::AcqRel);
            }
            return true;
        }
        false
    }

    fn transition(&self, to: u8) -> bool {
        self.inner
            .state
            .compare_exchange(TIMEOUT_INIT, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

struct Entry {
    timeout: Timeout,
    remaining_rounds: u64,
}

struct Worker {
    shared: Arc<Shared>,
    receiver: mpsc::UnboundedReceiver<Timeout>,
    start: Instant,
    wheel: Vec<Vec<Entry>>,
    tick: u64,
}

impl Worker {
    async fn run(mut self) {
        let tick_nanos = self.tick_nanos();

        loop {
            let next = self.start + Duration::from_nanos(tick_nanos.saturating_mul(self.tick + 1));
            tokio::select! {
                _ = tokio::time::sleep_until(next) => {}
                _ = self.shared.shutdown.notified() => {}
            }

            if self.shared.state() == WORKER_SHUTDOWN {
                break;
            }

            self.transfer();
            self.expire_bucket().await;
            self.tick += 1;
        }

        self.cancel_all();
    }

    fn tick_nanos(&self) -> u64 {
        (self.shared.tick.as_nanos() as u64).max(1)
    }

    /// Moves newly submitted timeouts into their buckets.
    fn transfer(&mut self) {
        let tick_nanos = self.tick_nanos();
        let mask = (self.wheel.len() - 1) as u64;

        for _ in 0..MAX_TRANSFER_PER_TICK {
            let Ok(timeout) = self.receiver.try_recv() else {
                break;
            };
            if timeout.is_cancelled() {
                continue;
            }

            let offset = timeout
                .deadline()
                .saturating_duration_since(self.start)
                .as_nanos() as u64;
            let calculated = offset / tick_nanos;
            let remaining_rounds = calculated.saturating_sub(self.tick) / self.wheel.len() as u64;
            // Already overdue timeouts go into the current bucket
            let ticks = calculated.max(self.tick);
            let index = (ticks & mask) as usize;

            self.wheel[index].push(Entry {
                timeout,
                remaining_rounds,
            });
        }
    }

    async fn expire_bucket(&mut self) {
        let mask = (self.wheel.len() - 1) as u64;
        let index = (self.tick & mask) as usize;
        let bucket = std::mem::take(&mut self.wheel[index]);

        let mut due = Vec::new();
        for mut entry in bucket {
            if entry.timeout.is_cancelled() {
                continue;
            }
            if entry.remaining_rounds == 0 {
                due.push(entry.timeout);
            } else {
                entry.remaining_rounds -= 1;
                self.wheel[index].push(entry);
            }
        }

        for timeout in due {
            if timeout.expire() {
                timeout.task().run(timeout.clone()).await;
            }
        }
    }

    fn cancel_all(&mut self) {
        self.receiver.close();
        let mut cancelled = 0usize;
        while let Ok(timeout) = self.receiver.try_recv() {
            if timeout.cancel() {
                cancelled += 1;
            }
        }
        for bucket in self.wheel.iter_mut() {
            for entry in bucket.drain(..) {
                if entry.timeout.cancel() {
                    cancelled += 1;
                }
            }
        }
        tracing::debug!(
            timer = %self.shared.name,
            cancelled = cancelled,
            "Timer worker exited"
        );
    }
}
