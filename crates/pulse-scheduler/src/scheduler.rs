//! Single-timer heartbeat scheduler
//!
//! All agents share one timer armed for the earliest `next_due_at`. When it
//! fires, every due agent is run in turn (gate, execute, notify), each agent's
//! next due time is pushed one interval past its completion, and the timer is
//! re-armed. Failures stay inside the agent that caused them. Stopping lets a
//! run already in flight finish but arms nothing new.

use pulse_channels::{Notifier, start_or_fallback};
use pulse_core::{
    AgentConfig, AgentSnapshot, AgentState, Executor, HeartbeatOutcome, HeartbeatResult,
    NotificationMessage, PulseError, Result,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::active_hours::{Clock, SystemClock, is_within_active_hours};

/// What started a heartbeat run
#[derive(Clone, Copy)]
enum Trigger<'a> {
    /// Timer firing; honours active hours, and shutdown suppresses delivery
    Scheduled(&'a CancellationToken),
    /// Operator request; bypasses active hours
    Manual,
}

struct TimerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    agents: RwLock<BTreeMap<String, AgentState>>,
    executor: Arc<Executor>,
    /// Swapped for a local sink if the configured one fails to start
    notifier: RwLock<Arc<dyn Notifier>>,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
    /// Serializes heartbeat runs so an agent never has two in flight
    run_lock: Mutex<()>,
}

/// Drives every agent's heartbeat off a single timer
pub struct HeartbeatScheduler {
    inner: Arc<Inner>,
    timer: Mutex<Option<TimerHandle>>,
}

impl HeartbeatScheduler {
    /// Create a scheduler using the host's local clock for active hours
    pub fn new(
        configs: Vec<AgentConfig>,
        executor: Arc<Executor>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        Self::with_clock(configs, executor, notifier, Arc::new(SystemClock))
    }

    /// Create a scheduler with a custom clock.
    ///
    /// Each agent's first heartbeat is due one interval from now.
    pub fn with_clock(
        configs: Vec<AgentConfig>,
        executor: Arc<Executor>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let now = Instant::now();
        let mut agents = BTreeMap::new();
        for config in configs {
            let id = config.agent_id.clone();
            if agents.insert(id.clone(), AgentState::new(config, now)).is_some() {
                return Err(PulseError::Config(format!("duplicate agent id '{}'", id)));
            }
        }

        Ok(Self {
            inner: Arc::new(Inner {
                agents: RwLock::new(agents),
                executor,
                notifier: RwLock::new(notifier),
                clock,
                running: AtomicBool::new(false),
                run_lock: Mutex::new(()),
            }),
            timer: Mutex::new(None),
        })
    }

    /// Start the notifier and arm the timer. A notifier that fails to start
    /// is replaced by a local sink. A second call while running is a no-op.
    pub async fn start(&self) {
        let mut timer = self.timer.lock().await;
        if timer.is_some() {
            warn!("Heartbeat scheduler is already running");
            return;
        }

        let notifier = start_or_fallback(self.inner.notifier().await).await;
        *self.inner.notifier.write().await = notifier;

        self.inner.running.store(true, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let inner = self.inner.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            inner.run_loop(token).await;
        });
        *timer = Some(TimerHandle { cancel, task });

        info!(
            "Heartbeat scheduler started with {} agent(s)",
            self.inner.agents.read().await.len()
        );
    }

    /// Cancel the timer, wait for an in-flight heartbeat to finish, then stop
    /// the notifier. Safe to call when not running.
    pub async fn stop(&self) {
        let Some(handle) = self.timer.lock().await.take() else {
            warn!("Heartbeat scheduler is not running");
            return;
        };

        handle.cancel.cancel();
        self.inner.running.store(false, Ordering::SeqCst);

        if let Err(e) = handle.task.await {
            warn!("Heartbeat loop ended abnormally: {}", e);
        }
        let notifier = self.inner.notifier().await;
        if let Err(e) = notifier.stop().await {
            warn!("Failed to stop {} notifier: {}", notifier.name(), e);
        }

        info!("Heartbeat scheduler stopped");
    }

    /// Name of the notifier deliveries go to
    pub async fn notifier_name(&self) -> String {
        self.inner.notifier().await.name().to_string()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Read-only view of every agent, ordered by id
    pub async fn get_agent_states(&self) -> Vec<AgentSnapshot> {
        let now = Instant::now();
        self.inner
            .agents
            .read()
            .await
            .values()
            .map(|state| state.snapshot(now))
            .collect()
    }

    /// Run one heartbeat for `agent_id` right away, outside its active hours
    /// if need be. The agent's next due time advances as for a timed run.
    pub async fn trigger_now(&self, agent_id: &str) -> Result<HeartbeatResult> {
        if !self.inner.agents.read().await.contains_key(agent_id) {
            return Err(PulseError::Config(format!("unknown agent '{}'", agent_id)));
        }

        let _guard = self.inner.run_lock.lock().await;
        info!("Manual heartbeat for agent {}", agent_id);
        self.inner
            .run_agent(agent_id, Trigger::Manual)
            .await
            .ok_or_else(|| PulseError::Config(format!("unknown agent '{}'", agent_id)))
    }
}

impl Inner {
    async fn notifier(&self) -> Arc<dyn Notifier> {
        self.notifier.read().await.clone()
    }

    async fn run_loop(&self, cancel: CancellationToken) {
        loop {
            let next_due = self
                .agents
                .read()
                .await
                .values()
                .map(|state| state.next_due_at)
                .min();

            let Some(due) = next_due else {
                debug!("No agents configured, heartbeat timer idle");
                cancel.cancelled().await;
                break;
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = sleep_until(due) => {}
            }

            self.execute_due_heartbeats(&cancel).await;

            if cancel.is_cancelled() {
                break;
            }
        }
        debug!("Heartbeat loop exited");
    }

    /// Run every agent that is due, earliest first
    async fn execute_due_heartbeats(&self, cancel: &CancellationToken) {
        let _guard = self.run_lock.lock().await;
        let now = Instant::now();

        let mut due: Vec<(Instant, String)> = self
            .agents
            .read()
            .await
            .values()
            .filter(|state| state.is_due(now))
            .map(|state| (state.next_due_at, state.agent_id.clone()))
            .collect();
        due.sort();

        debug!("Timer fired with {} agent(s) due", due.len());

        for (_, agent_id) in due {
            if cancel.is_cancelled() {
                debug!("Scheduler stopping, leaving remaining agents for later");
                break;
            }
            self.run_agent(&agent_id, Trigger::Scheduled(cancel)).await;
        }
    }

    /// Gate, execute and notify for one agent.
    ///
    /// Returns `None` when the engine was not called (outside active hours or
    /// unknown agent).
    async fn run_agent(&self, agent_id: &str, trigger: Trigger<'_>) -> Option<HeartbeatResult> {
        let state = self.agents.read().await.get(agent_id).cloned()?;

        if let Trigger::Scheduled(_) = trigger
            && !is_within_active_hours(
                state.config.active_hours.as_ref(),
                self.clock.minute_of_day(),
            )
        {
            debug!("Agent {} is outside its active hours, skipping", agent_id);
            if let Some(state) = self.agents.write().await.get_mut(agent_id) {
                state.advance(Instant::now());
                state.record(HeartbeatOutcome::SkippedInactive, None);
            }
            return None;
        }

        let result = self.executor.invoke(&state).await;

        let completed_at = Instant::now();
        let outcome = result.outcome();
        let error_text = result.error.as_ref().map(|e| e.to_string());

        if let Some(state) = self.agents.write().await.get_mut(agent_id) {
            state.advance(completed_at);
            if let Some(token) = &result.session_token {
                state.session_token = Some(token.clone());
            }
            state.record(outcome, error_text.clone());
        }

        match outcome {
            HeartbeatOutcome::Failed => {
                error!(
                    "Heartbeat for agent {} failed: {}",
                    agent_id,
                    error_text.as_deref().unwrap_or("unknown error")
                );
            }
            HeartbeatOutcome::Notified => {
                if let Trigger::Scheduled(cancel) = trigger
                    && cancel.is_cancelled()
                {
                    debug!(
                        "Scheduler stopped, dropping notification for agent {}",
                        agent_id
                    );
                } else {
                    self.deliver(agent_id, &result).await;
                }
            }
            other => debug!("Heartbeat for agent {}: {}", agent_id, other),
        }

        Some(result)
    }

    /// Send a notification. Delivery errors are logged and recorded on the
    /// agent, never propagated.
    async fn deliver(&self, agent_id: &str, result: &HeartbeatResult) {
        let message = NotificationMessage::new(
            agent_id,
            result.output.clone(),
            result.session_token.clone(),
        );

        let notifier = self.notifier().await;
        match notifier.send(&message).await {
            Ok(()) => debug!(
                "Notification {} for agent {} sent via {}",
                message.id,
                agent_id,
                notifier.name()
            ),
            Err(e) => {
                error!(
                    "Failed to send notification for agent {} via {}: {}",
                    agent_id,
                    notifier.name(),
                    e
                );
                if let Some(state) = self.agents.write().await.get_mut(agent_id) {
                    state.last_error = Some(format!("notification failed: {}", e));
                }
            }
        }
    }
}
