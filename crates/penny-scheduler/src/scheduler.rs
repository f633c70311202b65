use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::schedule::Schedule;

struct ActiveTask {
    name: &'static str,
    abort: AbortHandle,
}

struct SchedulerState {
    /// Nested foreground starts are counted; background resumes at zero.
    foreground: AtomicUsize,
    last_message: Mutex<Instant>,
    active: Mutex<Option<ActiveTask>>,
    stop: CancellationToken,
}

/// Cloneable handle for the rest of the process: channels notify message
/// arrival and bracket foreground work, the entry point stops the loop.
#[derive(Clone)]
pub struct SchedulerHandle {
    state: Arc<SchedulerState>,
}

impl SchedulerHandle {
    /// Update the idle clock. Called for every incoming envelope.
    pub fn notify_message(&self) {
        *self.state.last_message.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }

    /// Foreground work is starting. Cancels the active background task, if
    /// any, before the caller proceeds to its own LLM work.
    pub fn notify_foreground_start(&self) {
        self.state.foreground.fetch_add(1, Ordering::SeqCst);
        let taken = self
            .state
            .active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(task) = taken {
            debug!(agent = task.name, "foreground start: cancelling background task");
            task.abort.abort();
        }
    }

    /// Foreground work finished. Background resumes once the counter
    /// returns to zero.
    pub fn notify_foreground_end(&self) {
        let prev = self.state.foreground.fetch_sub(1, Ordering::SeqCst);
        if prev == 0 {
            // Unbalanced end; clamp back rather than underflow.
            self.state.foreground.store(0, Ordering::SeqCst);
        }
    }

    pub fn stop(&self) {
        self.state.stop.cancel();
    }

    pub fn foreground_active(&self) -> bool {
        self.state.foreground.load(Ordering::SeqCst) > 0
    }

    pub fn has_active_task(&self) -> bool {
        self.state
            .active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }
}

/// Walks schedules in priority order on a fixed tick, running at most one
/// background agent at a time.
pub struct BackgroundScheduler {
    schedules: Vec<Schedule>,
    state: Arc<SchedulerState>,
    tick_interval: Duration,
    idle_threshold: Duration,
}

impl BackgroundScheduler {
    pub fn new(schedules: Vec<Schedule>, tick_interval: Duration, idle_threshold: Duration) -> Self {
        Self {
            schedules,
            state: Arc::new(SchedulerState {
                foreground: AtomicUsize::new(0),
                last_message: Mutex::new(Instant::now() - idle_threshold),
                active: Mutex::new(None),
                stop: CancellationToken::new(),
            }),
            tick_interval,
            idle_threshold,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Main loop. Returns only when the handle's `stop()` is called.
    pub async fn run(mut self) {
        info!(
            schedules = self.schedules.len(),
            tick_secs = self.tick_interval.as_secs_f64(),
            "background scheduler started"
        );
        loop {
            tokio::select! {
                _ = self.state.stop.cancelled() => {
                    info!("background scheduler stopping");
                    break;
                }
                _ = tokio::time::sleep(self.tick_interval) => {}
            }
            self.tick().await;
        }
    }

    fn is_idle(&self) -> bool {
        self.state
            .last_message
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .elapsed()
            >= self.idle_threshold
    }

    async fn tick(&mut self) {
        if self.state.foreground.load(Ordering::SeqCst) > 0 {
            return;
        }
        let is_idle = self.is_idle();

        for idx in 0..self.schedules.len() {
            if !self.schedules[idx].should_run(is_idle) {
                continue;
            }

            let name = self.schedules[idx].name();
            let agent = self.schedules[idx].agent();

            // Launch under the active-task lock so a concurrent foreground
            // start either blocks us from launching or sees the stored
            // handle and aborts it.
            let handle = {
                let mut active = self
                    .state
                    .active
                    .lock()
                    .unwrap_or_else(|p| p.into_inner());
                if self.state.foreground.load(Ordering::SeqCst) > 0 {
                    return;
                }
                let handle = tokio::spawn(async move { agent.execute().await });
                *active = Some(ActiveTask {
                    name,
                    abort: handle.abort_handle(),
                });
                handle
            };

            let result = handle.await;
            self.state
                .active
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .take();

            match result {
                Ok(Ok(did_work)) => {
                    self.schedules[idx].mark_complete();
                    if did_work {
                        debug!(agent = name, "background agent did work");
                        break;
                    }
                }
                Ok(Err(e)) => {
                    error!(agent = name, "background agent failed: {e}");
                    self.schedules[idx].mark_complete();
                }
                Err(join_err) if join_err.is_cancelled() => {
                    debug!(agent = name, "background task cancelled by foreground");
                    break;
                }
                Err(join_err) => {
                    error!(agent = name, "background task panicked: {join_err}");
                    self.schedules[idx].mark_complete();
                }
            }
        }
    }
}
