#![forbid(unsafe_code)]

//! Dedicated timer thread.
//!
//! [`TimerThread`] implements [`Scheduler`] by moving every scheduled
//! callback onto one background thread. Callers never block: `schedule` and
//! `cancel` only enqueue a message, so stages may use them while propagating
//! and callbacks may use them from the timer thread itself.
//!
//! # Firing Rules
//!
//! - Callbacks run one at a time, earliest due first. Ties fire in
//!   scheduling order.
//! - Queued messages are applied before each firing, so a cancel that was
//!   enqueued before a task comes due always wins.
//! - A repeating task re-arms relative to its previous due time, never closer
//!   than [`TimerConfig::min_interval`]. A task that falls behind skips the
//!   missed ticks instead of firing a burst.
//! - A callback that panics is logged and discarded; the thread keeps
//!   running.
//!
//! # Shutdown
//!
//! Dropping the handle (or calling [`TimerThread::shutdown`]) discards every
//! pending task and joins the thread. When the last handle is dropped by one
//! of the thread's own callbacks the thread is left to exit by itself.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tether_core::{Callback, Scheduler, TaskHandle};
use tracing::{debug, warn};

const DEFAULT_THREAD_NAME: &str = "tether-timer";

/// Default lower bound on the period of repeating tasks.
const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Deadlines that overflow `Instant` are clamped this far ahead.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `from + delay`, clamped to [`FAR_FUTURE`] past `from` on overflow.
fn deadline_after(from: Instant, delay: Duration) -> Instant {
    from.checked_add(delay)
        .or_else(|| from.checked_add(FAR_FUTURE))
        .unwrap_or(from)
}

/// Settings for [`TimerThread::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerConfig {
    /// Name given to the spawned thread.
    pub thread_name: String,
    /// Repeating tasks never fire closer together than this.
    pub min_interval: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
            min_interval: DEFAULT_MIN_INTERVAL,
        }
    }
}

impl TimerConfig {
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Zero is raised to one nanosecond.
    #[must_use]
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }
}

/// Failures reported by [`TimerThread`].
#[derive(Debug)]
pub enum TimerError {
    /// The OS refused to spawn the timer thread.
    Spawn(io::Error),
    /// The timer thread is no longer running.
    ShutDown,
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(err) => write!(f, "failed to spawn timer thread: {err}"),
            Self::ShutDown => write!(f, "timer thread has shut down"),
        }
    }
}

impl std::error::Error for TimerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn(err) => Some(err),
            Self::ShutDown => None,
        }
    }
}

/// Messages sent from scheduling threads to the timer thread.
enum TimerMsg {
    Schedule {
        id: u64,
        due: Instant,
        interval: Option<Duration>,
        callback: Callback,
    },
    Cancel(u64),
    Shutdown,
}

/// Runs scheduled callbacks on a dedicated thread.
pub struct TimerThread {
    sender: mpsc::Sender<TimerMsg>,
    handle: Option<JoinHandle<()>>,
    next_id: AtomicU64,
    config: TimerConfig,
}

impl fmt::Debug for TimerThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerThread")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl TimerThread {
    /// Spawn the timer thread.
    pub fn start(config: TimerConfig) -> Result<Self, TimerError> {
        let (tx, rx) = mpsc::channel::<TimerMsg>();
        let handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || timer_loop(rx))
            .map_err(TimerError::Spawn)?;
        debug!(thread = %config.thread_name, "timer thread started");

        Ok(Self {
            sender: tx,
            handle: Some(handle),
            next_id: AtomicU64::new(0),
            config: TimerConfig {
                min_interval: config.min_interval.max(Duration::from_nanos(1)),
                ..config
            },
        })
    }

    #[must_use]
    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    /// Whether the thread is still processing messages.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Like [`Scheduler::schedule`], but reports a stopped thread instead of
    /// discarding the callback.
    pub fn try_schedule(
        &self,
        delay: Duration,
        repeats: bool,
        callback: Callback,
    ) -> Result<TaskHandle, TimerError> {
        let handle = TaskHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.send(TimerMsg::Schedule {
            id: handle.get(),
            due: deadline_after(Instant::now(), delay),
            interval: repeats.then(|| delay.max(self.config.min_interval)),
            callback,
        })?;
        Ok(handle)
    }

    /// Discard pending tasks and join the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn send(&self, msg: TimerMsg) -> Result<(), TimerError> {
        self.sender.send(msg).map_err(|_| TimerError::ShutDown)
    }

    fn stop(&mut self) {
        let _ = self.send(TimerMsg::Shutdown);
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!(thread = %self.config.thread_name, "timer thread panicked");
        }
    }
}

impl Scheduler for TimerThread {
    fn schedule(&self, delay: Duration, repeats: bool, callback: Callback) -> TaskHandle {
        match self.try_schedule(delay, repeats, callback) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(%err, "callback discarded");
                TaskHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed))
            }
        }
    }

    fn cancel(&self, handle: TaskHandle) {
        let _ = self.send(TimerMsg::Cancel(handle.get()));
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Task {
    due: Instant,
    interval: Option<Duration>,
    callback: Callback,
}

#[derive(Default)]
struct Timers {
    /// Due times keyed by task id. Entries whose task was cancelled stay
    /// until popped.
    queue: BinaryHeap<Reverse<(Instant, u64)>>,
    tasks: HashMap<u64, Task>,
}

impl Timers {
    /// Returns `false` on shutdown.
    fn apply(&mut self, msg: TimerMsg) -> bool {
        match msg {
            TimerMsg::Schedule {
                id,
                due,
                interval,
                callback,
            } => {
                self.queue.push(Reverse((due, id)));
                self.tasks.insert(
                    id,
                    Task {
                        due,
                        interval,
                        callback,
                    },
                );
            }
            TimerMsg::Cancel(id) => {
                self.tasks.remove(&id);
            }
            TimerMsg::Shutdown => return false,
        }
        true
    }

    fn next_due(&self) -> Option<Instant> {
        self.queue.peek().map(|Reverse((due, _))| *due)
    }

    fn pop_due(&mut self, now: Instant) -> Option<(u64, Task)> {
        loop {
            let &Reverse((due, id)) = self.queue.peek()?;
            if due > now {
                return None;
            }
            self.queue.pop();
            if let Some(task) = self.tasks.remove(&id) {
                return Some((id, task));
            }
        }
    }

    fn fire(&mut self, id: u64, mut task: Task) {
        if panic::catch_unwind(AssertUnwindSafe(|| (task.callback)())).is_err() {
            warn!(task = id, "timer callback panicked; task discarded");
            return;
        }
        let Some(interval) = task.interval else {
            return;
        };
        let now = Instant::now();
        task.due = deadline_after(task.due, interval);
        if task.due <= now {
            task.due = deadline_after(now, interval);
        }
        self.queue.push(Reverse((task.due, id)));
        self.tasks.insert(id, task);
    }
}

fn timer_loop(rx: mpsc::Receiver<TimerMsg>) {
    let mut timers = Timers::default();
    'run: loop {
        loop {
            match rx.try_recv() {
                Ok(msg) => {
                    if !timers.apply(msg) {
                        break 'run;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'run,
            }
        }

        if let Some((id, task)) = timers.pop_due(Instant::now()) {
            timers.fire(id, task);
            continue;
        }

        let received = match timers.next_due() {
            Some(due) => rx.recv_timeout(due.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(msg) => {
                if !timers.apply(msg) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(discarded = timers.tasks.len(), "timer thread stopped");
}
