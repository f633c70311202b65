//! Scheduler behavior tests: preemption, foreground gating, priority walk.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use penny_scheduler::{Agent, AgentResult, BackgroundScheduler, Schedule};

/// Agent that blocks until released, recording start / completion / cancel.
struct SlowAgent {
    started: Notify,
    started_flag: AtomicBool,
    release: Notify,
    completed: AtomicBool,
    cancelled: AtomicBool,
}

impl SlowAgent {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Notify::new(),
            started_flag: AtomicBool::new(false),
            release: Notify::new(),
            completed: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        })
    }

    async fn wait_started(&self) {
        while !self.started_flag.load(Ordering::SeqCst) {
            let notified = self.started.notified();
            if self.started_flag.load(Ordering::SeqCst) {
                break;
            }
            let _ = tokio::time::timeout(Duration::from_millis(20), notified).await;
        }
    }
}

/// Sets the cancelled flag when the future is dropped before completing.
struct CancelGuard<'a> {
    agent: &'a SlowAgent,
    finished: bool,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.agent.cancelled.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Agent for SlowAgent {
    fn name(&self) -> &'static str {
        "slow_agent"
    }

    async fn execute(&self) -> AgentResult {
        self.started_flag.store(true, Ordering::SeqCst);
        self.started.notify_waiters();
        let mut guard = CancelGuard {
            agent: self,
            finished: false,
        };
        self.release.notified().await;
        guard.finished = true;
        self.completed.store(true, Ordering::SeqCst);
        Ok(true)
    }
}

/// Agent that returns a fixed value and counts executions.
struct SimpleAgent {
    name: &'static str,
    return_value: bool,
    execute_count: AtomicUsize,
}

impl SimpleAgent {
    fn new(name: &'static str, return_value: bool) -> Arc<Self> {
        Arc::new(Self {
            name,
            return_value,
            execute_count: AtomicUsize::new(0),
        })
    }

    fn count(&self) -> usize {
        self.execute_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for SimpleAgent {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn execute(&self) -> AgentResult {
        self.execute_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.return_value)
    }
}

const TICK: Duration = Duration::from_millis(10);

#[tokio::test]
async fn foreground_cancels_active_background_task() {
    let agent = SlowAgent::new();
    let scheduler = BackgroundScheduler::new(
        vec![Schedule::idle(agent.clone())],
        TICK,
        Duration::ZERO,
    );
    let handle = scheduler.handle();
    let run = tokio::spawn(scheduler.run());

    tokio::time::timeout(Duration::from_secs(2), agent.wait_started())
        .await
        .expect("agent should start");

    handle.notify_foreground_start();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(agent.cancelled.load(Ordering::SeqCst), "agent should be cancelled");
    assert!(!agent.completed.load(Ordering::SeqCst), "agent should not complete");
    assert!(!handle.has_active_task(), "active task should be cleared");

    handle.stop();
    let _ = run.await;
}

#[tokio::test]
async fn foreground_prevents_task_start() {
    let agent = SlowAgent::new();
    let scheduler = BackgroundScheduler::new(
        vec![Schedule::idle(agent.clone())],
        TICK,
        Duration::ZERO,
    );
    let handle = scheduler.handle();

    // Block background before starting the loop.
    handle.notify_foreground_start();
    let run = tokio::spawn(scheduler.run());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        !agent.started_flag.load(Ordering::SeqCst),
        "agent should not start while foreground is active"
    );

    // Release foreground; background should start.
    handle.notify_foreground_end();
    tokio::time::timeout(Duration::from_secs(2), agent.wait_started())
        .await
        .expect("agent should start after foreground ends");

    agent.release.notify_one();
    handle.stop();
    let _ = run.await;
}

#[tokio::test]
async fn nested_foreground_starts_gate_until_zero() {
    let agent = SlowAgent::new();
    let scheduler = BackgroundScheduler::new(
        vec![Schedule::idle(agent.clone())],
        TICK,
        Duration::ZERO,
    );
    let handle = scheduler.handle();
    handle.notify_foreground_start();
    handle.notify_foreground_start();
    let run = tokio::spawn(scheduler.run());

    handle.notify_foreground_end();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(
        !agent.started_flag.load(Ordering::SeqCst),
        "one of two foreground tasks still active"
    );

    handle.notify_foreground_end();
    tokio::time::timeout(Duration::from_secs(2), agent.wait_started())
        .await
        .expect("agent should start when counter reaches zero");

    agent.release.notify_one();
    handle.stop();
    let _ = run.await;
}

#[tokio::test]
async fn lower_priority_agent_runs_when_higher_has_no_work() {
    let agent_a = SimpleAgent::new("agent_a", false);
    let agent_b = SimpleAgent::new("agent_b", true);
    let scheduler = BackgroundScheduler::new(
        vec![
            Schedule::idle(agent_a.clone()),
            Schedule::idle(agent_b.clone()),
        ],
        TICK,
        Duration::ZERO,
    );
    let handle = scheduler.handle();
    let run = tokio::spawn(scheduler.run());

    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.stop();
    let _ = run.await;

    assert!(agent_a.count() > 0, "higher-priority agent should be called");
    assert!(
        agent_b.count() > 0,
        "lower-priority agent should run when higher returns false"
    );
}

#[tokio::test]
async fn did_work_stops_the_walk_for_this_tick() {
    let agent_a = SimpleAgent::new("agent_a", true);
    let agent_b = SimpleAgent::new("agent_b", true);
    let scheduler = BackgroundScheduler::new(
        vec![
            Schedule::idle(agent_a.clone()),
            Schedule::idle(agent_b.clone()),
        ],
        TICK,
        Duration::ZERO,
    );
    let handle = scheduler.handle();
    let run = tokio::spawn(scheduler.run());

    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.stop();
    let _ = run.await;

    assert!(agent_a.count() > 0);
    assert_eq!(
        agent_b.count(),
        0,
        "lower-priority agent should not run when higher does work"
    );
}

#[tokio::test]
async fn periodic_interval_gates_even_without_work() {
    let agent = SimpleAgent::new("idle_agent", false);
    let scheduler = BackgroundScheduler::new(
        vec![Schedule::periodic(agent.clone(), Duration::from_millis(500))],
        TICK,
        Duration::ZERO,
    );
    let handle = scheduler.handle();
    let run = tokio::spawn(scheduler.run());

    // Only the immediate first run fits in 300 ms.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(agent.count(), 1, "one execution before the interval elapses");

    // After the interval elapses the second run fires.
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(agent.count(), 2, "second execution after the interval");

    handle.stop();
    let _ = run.await;
}

#[tokio::test]
async fn idle_threshold_gates_idle_schedules() {
    let agent = SimpleAgent::new("idle_agent", false);
    let scheduler = BackgroundScheduler::new(
        vec![Schedule::idle(agent.clone())],
        TICK,
        Duration::from_millis(200),
    );
    let handle = scheduler.handle();
    // A message arrives right before startup — not idle yet.
    handle.notify_message();
    let run = tokio::spawn(scheduler.run());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(agent.count(), 0, "not idle yet");

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(agent.count() > 0, "idle threshold elapsed");

    handle.stop();
    let _ = run.await;
}

#[tokio::test]
async fn failing_agent_does_not_stop_the_scheduler() {
    struct FailingAgent;

    #[async_trait]
    impl Agent for FailingAgent {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn execute(&self) -> AgentResult {
            Err("boom".into())
        }
    }

    let fallback = SimpleAgent::new("fallback", true);
    let scheduler = BackgroundScheduler::new(
        vec![
            Schedule::idle(Arc::new(FailingAgent)),
            Schedule::idle(fallback.clone()),
        ],
        TICK,
        Duration::ZERO,
    );
    let handle = scheduler.handle();
    let run = tokio::spawn(scheduler.run());

    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.stop();
    let _ = run.await;

    assert!(
        fallback.count() > 0,
        "an erroring agent is treated as no-work and the walk continues"
    );
}
