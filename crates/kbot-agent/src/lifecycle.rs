use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use kbot_core::{AgentRpcClient, Bus};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::client_factory::ClientFactory;
use crate::error::{AgentError, Result};
use crate::types::{AgentEvent, AgentLifecycleConfig, AgentLifecycleState, HealthSnapshot};

struct Inner {
    child: Option<Child>,
    client: Option<Arc<dyn AgentRpcClient>>,
    state: AgentLifecycleState,
    consecutive_failures: u32,
    recoveries_attempted: u32,
    last_probe_at: Option<chrono::DateTime<Utc>>,
    spawned_at: Option<chrono::DateTime<Utc>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            child: None,
            client: None,
            state: AgentLifecycleState::Idle,
            consecutive_failures: 0,
            recoveries_attempted: 0,
            last_probe_at: None,
            spawned_at: None,
        }
    }
}

/// Owns one spawned agent subprocess: spawn, periodic liveness probing via
/// `try_wait`, restart with a recovery budget, and escalation once that
/// budget is exhausted. The wire protocol to the process is supplied
/// externally through a [`ClientFactory`].
pub struct AgentLifecycle {
    config: AgentLifecycleConfig,
    client_factory: Arc<dyn ClientFactory>,
    inner: Mutex<Inner>,
    bus: Bus<AgentEvent>,
    monitoring: AtomicBool,
}

impl AgentLifecycle {
    pub fn new(config: AgentLifecycleConfig, client_factory: Arc<dyn ClientFactory>) -> Arc<Self> {
        Arc::new(Self {
            config,
            client_factory,
            inner: Mutex::new(Inner::new()),
            bus: Bus::new(),
            monitoring: AtomicBool::new(false),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.bus.subscribe()
    }

    pub async fn get_state(&self) -> AgentLifecycleState {
        self.inner.lock().await.state
    }

    pub async fn is_healthy(&self) -> bool {
        matches!(self.inner.lock().await.state, AgentLifecycleState::Healthy)
    }

    pub async fn get_client(&self) -> Option<Arc<dyn AgentRpcClient>> {
        self.inner.lock().await.client.clone()
    }

    pub async fn health_snapshot(&self) -> HealthSnapshot {
        let guard = self.inner.lock().await;
        HealthSnapshot {
            state: guard.state,
            consecutive_failures: guard.consecutive_failures,
            recoveries_attempted: guard.recoveries_attempted,
            last_probe_at: guard.last_probe_at,
            spawned_at: guard.spawned_at,
        }
    }

    fn transition(&self, guard: &mut Inner, to: AgentLifecycleState) {
        let from = guard.state;
        if from == to {
            return;
        }
        guard.state = to;
        self.bus.emit(AgentEvent::StateChange { from, to });
    }

    /// Spawns the configured command, wires up the RPC client, and starts the
    /// background health monitor. Errors if the process is already running.
    #[instrument(skip(self))]
    pub async fn spawn(self: &Arc<Self>) -> Result<()> {
        let mut guard = self.inner.lock().await;
        if guard.child.is_some() {
            return Err(AgentError::AlreadyRunning);
        }
        self.transition(&mut guard, AgentLifecycleState::Spawning);

        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(AgentError::SpawnFailed)?;

        let pid = child.id();
        let client = self.client_factory.build(&mut child);

        guard.client = Some(client);
        guard.spawned_at = Some(Utc::now());
        guard.consecutive_failures = 0;
        guard.recoveries_attempted = 0;
        guard.child = Some(child);
        self.transition(&mut guard, AgentLifecycleState::Healthy);
        self.bus.emit(AgentEvent::Spawned { pid });
        info!(pid, "agent:spawned");
        drop(guard);

        self.ensure_monitor();
        Ok(())
    }

    fn ensure_monitor(self: &Arc<Self>) {
        if self.monitoring.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        let handle: JoinHandle<()> = tokio::spawn(async move { this.monitor_loop().await });
        drop(handle);
    }

    async fn monitor_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.config.health_check_interval).await;

            let exited = {
                let mut guard = self.inner.lock().await;
                if matches!(
                    guard.state,
                    AgentLifecycleState::Terminated | AgentLifecycleState::Failed
                ) {
                    break;
                }
                guard.last_probe_at = Some(Utc::now());
                match guard.child.as_mut() {
                    None => break,
                    Some(child) => matches!(child.try_wait(), Ok(Some(_)) | Err(_)),
                }
            };

            if !exited {
                let mut guard = self.inner.lock().await;
                guard.consecutive_failures = 0;
                self.transition(&mut guard, AgentLifecycleState::Healthy);
                drop(guard);
                self.bus.emit(AgentEvent::HealthStatus { healthy: true, recovered: false });
                continue;
            }

            {
                let mut guard = self.inner.lock().await;
                guard.consecutive_failures += 1;
                guard.child = None;
                guard.client = None;
                self.transition(&mut guard, AgentLifecycleState::Unhealthy);
            }
            self.bus.emit(AgentEvent::HealthStatus { healthy: false, recovered: false });

            // A dead process is an unambiguous signal from `try_wait` — unlike a
            // flaky external health probe there is nothing to debounce, so every
            // exit immediately counts against the recovery budget.
            let recoveries = {
                let guard = self.inner.lock().await;
                guard.recoveries_attempted
            };
            if recoveries >= self.config.max_recoveries {
                let mut guard = self.inner.lock().await;
                self.transition(&mut guard, AgentLifecycleState::Failed);
                drop(guard);
                self.bus.emit(AgentEvent::Escalate {
                    reason: "exhausted recovery budget".to_string(),
                    context: serde_json::json!({ "recoveries_attempted": recoveries }),
                });
                warn!(recoveries, "agent:escalated");
                break;
            }

            {
                let mut guard = self.inner.lock().await;
                guard.recoveries_attempted += 1;
                self.transition(&mut guard, AgentLifecycleState::Recovering);
            }
            if let Err(err) = self.respawn().await {
                self.bus.emit(AgentEvent::Error {
                    message: err.to_string(),
                    context: serde_json::json!({}),
                });
                continue;
            }
            self.bus.emit(AgentEvent::HealthStatus { healthy: true, recovered: true });
        }
        self.monitoring.store(false, Ordering::SeqCst);
    }

    async fn respawn(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(AgentError::SpawnFailed)?;
        let pid = child.id();
        let client = self.client_factory.build(&mut child);
        guard.client = Some(client);
        guard.child = Some(child);
        guard.spawned_at = Some(Utc::now());
        guard.consecutive_failures = 0;
        self.transition(&mut guard, AgentLifecycleState::Healthy);
        drop(guard);
        self.bus.emit(AgentEvent::Spawned { pid });
        info!(pid, "agent:respawned");
        Ok(())
    }

    /// Sends SIGTERM, waits up to `graceful_stop_timeout`, then escalates to
    /// SIGKILL on the raw PID if the process is still alive.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let Some(mut child) = guard.child.take() else {
            return Err(AgentError::NotRunning);
        };
        self.transition(&mut guard, AgentLifecycleState::Stopping);
        guard.client = None;
        let pid = child.id();
        drop(guard);

        if let Some(raw_pid) = pid {
            #[cfg(unix)]
            unsafe {
                libc::kill(raw_pid as libc::pid_t, libc::SIGTERM);
            }
        }

        let exited = tokio::time::timeout(self.config.graceful_stop_timeout, child.wait()).await;
        if exited.is_err() {
            if let Some(raw_pid) = pid {
                #[cfg(unix)]
                unsafe {
                    libc::kill(raw_pid as libc::pid_t, libc::SIGKILL);
                }
            }
            let _ = child.wait().await;
        }

        let mut guard = self.inner.lock().await;
        self.transition(&mut guard, AgentLifecycleState::Terminated);
        info!("agent:stopped");
        Ok(())
    }
}
