use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

/// What a background agent reports back: `Ok(true)` when it did work,
/// `Ok(false)` when there was nothing to do. Errors are logged by the
/// scheduler and treated as "no work done".
pub type AgentResult = std::result::Result<bool, Box<dyn std::error::Error + Send + Sync>>;

/// A unit of background work the scheduler can run.
///
/// `execute` must be cancellation-safe: the scheduler aborts the task at its
/// next suspension point when foreground work arrives, and any effects
/// already committed to the store are kept.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Task name for logging.
    fn name(&self) -> &'static str;

    /// Run one cycle. Returns whether any work was done.
    async fn execute(&self) -> AgentResult;
}

/// Eligibility gate for one agent.
#[derive(Debug)]
pub enum Gate {
    /// Eligible once `every` has elapsed since the last completion,
    /// regardless of idleness. The first run fires immediately.
    Periodic {
        every: Duration,
        last_complete: Option<Instant>,
    },

    /// Eligible whenever the system is idle.
    Idle,
}

/// An agent paired with its gating policy, in scheduler priority order.
pub struct Schedule {
    agent: Arc<dyn Agent>,
    gate: Gate,
}

impl Schedule {
    pub fn periodic(agent: Arc<dyn Agent>, every: Duration) -> Self {
        Self {
            agent,
            gate: Gate::Periodic {
                every,
                last_complete: None,
            },
        }
    }

    pub fn idle(agent: Arc<dyn Agent>) -> Self {
        Self {
            agent,
            gate: Gate::Idle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.agent.name()
    }

    pub(crate) fn agent(&self) -> Arc<dyn Agent> {
        Arc::clone(&self.agent)
    }

    pub(crate) fn should_run(&self, is_idle: bool) -> bool {
        match &self.gate {
            Gate::Periodic {
                every,
                last_complete,
            } => match last_complete {
                None => true,
                Some(t) => t.elapsed() >= *every,
            },
            Gate::Idle => is_idle,
        }
    }

    /// Called after every completed run, whether or not the agent did work;
    /// periodic gates reset their timer here.
    pub(crate) fn mark_complete(&mut self) {
        if let Gate::Periodic { last_complete, .. } = &mut self.gate {
            *last_complete = Some(Instant::now());
        }
    }
}
