use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::time::{sleep, Duration, Instant};
use tracing::{instrument, warn};

use kbot_core::Bus;

use crate::channel::Channel;
use crate::error::{ChannelError, Result};
use crate::types::{ChannelEvent, ChannelLifecycleConfig, ChannelStatus, LifecycleState};

/// Reconnect attempts are bounded independently of the health-check
/// failure threshold — a runaway adapter must not retry forever.
const RECONNECT_MAX_ATTEMPTS: u32 = 10;
const RECONNECT_BACKOFF_CAP: Duration = Duration::from_secs(300);
const RECONNECT_JITTER_FRACTION: f64 = 0.10;

struct SendJob {
    channel: String,
    text: String,
    reply_to: Option<String>,
    ack: oneshot::Sender<Result<String>>,
}

struct Inner {
    channel: Box<dyn Channel>,
    state: LifecycleState,
    consecutive_failures: u32,
}

/// Wraps a [`Channel`] adapter with the uniform operational concerns the
/// core expects from every platform: a periodic no-op health check,
/// reconnect-with-backoff on sustained failure, a retrying send queue, and
/// a bounded shutdown drain.
pub struct ChannelLifecycle {
    config: ChannelLifecycleConfig,
    inner: Mutex<Inner>,
    bus: Bus<ChannelEvent>,
    send_tx: mpsc::UnboundedSender<SendJob>,
    inflight: Arc<AtomicUsize>,
    draining: Arc<AtomicBool>,
    monitoring: AtomicBool,
}

impl ChannelLifecycle {
    pub fn new(channel: Box<dyn Channel>, config: ChannelLifecycleConfig) -> Arc<Self> {
        let (send_tx, send_rx) = mpsc::unbounded_channel::<SendJob>();
        let inflight = Arc::new(AtomicUsize::new(0));
        let draining = Arc::new(AtomicBool::new(false));

        let this = Arc::new(Self {
            config,
            inner: Mutex::new(Inner { channel, state: LifecycleState::Idle, consecutive_failures: 0 }),
            bus: Bus::new(),
            send_tx,
            inflight: inflight.clone(),
            draining: draining.clone(),
            monitoring: AtomicBool::new(false),
        });

        this.clone().spawn_send_consumer(send_rx, inflight, draining);
        this
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.bus.subscribe()
    }

    pub async fn state(&self) -> LifecycleState {
        self.inner.lock().await.state
    }

    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut guard = self.inner.lock().await;
            guard.channel.start().await?;
            guard.state = LifecycleState::Running;
            guard.consecutive_failures = 0;
        }
        self.bus.emit(ChannelEvent::Connected);
        self.ensure_monitor();
        Ok(())
    }

    fn ensure_monitor(self: &Arc<Self>) {
        if self.monitoring.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move { this.health_loop().await });
    }

    async fn health_loop(self: Arc<Self>) {
        loop {
            sleep(self.config.health_check_interval).await;

            let healthy = {
                let guard = self.inner.lock().await;
                if !matches!(guard.state, LifecycleState::Running | LifecycleState::Reconnecting) {
                    break;
                }
                matches!(guard.channel.status(), ChannelStatus::Connected)
            };

            if healthy {
                self.inner.lock().await.consecutive_failures = 0;
                continue;
            }

            let failures = {
                let mut guard = self.inner.lock().await;
                guard.consecutive_failures += 1;
                guard.consecutive_failures
            };
            if failures < self.config.reconnect_failure_threshold {
                continue;
            }

            if !self.reconnect().await {
                self.bus.emit(ChannelEvent::ReconnectExhausted);
                self.inner.lock().await.state = LifecycleState::Failed;
                break;
            }
        }
        self.monitoring.store(false, Ordering::Release);
    }

    /// Reconnects with exponential backoff and jitter — the same policy
    /// shape the teacher applies to initial connect — up to
    /// [`RECONNECT_MAX_ATTEMPTS`]. Returns whether it succeeded.
    async fn reconnect(self: &Arc<Self>) -> bool {
        self.inner.lock().await.state = LifecycleState::Reconnecting;

        let mut delay = self.config.reconnect_delay;
        for attempt in 1..=RECONNECT_MAX_ATTEMPTS {
            self.bus.emit(ChannelEvent::Reconnecting { attempt });
            let result = {
                let mut guard = self.inner.lock().await;
                let _ = guard.channel.stop().await;
                guard.channel.start().await
            };
            match result {
                Ok(()) => {
                    let mut guard = self.inner.lock().await;
                    guard.state = LifecycleState::Running;
                    guard.consecutive_failures = 0;
                    drop(guard);
                    self.bus.emit(ChannelEvent::Connected);
                    return true;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                    if attempt == RECONNECT_MAX_ATTEMPTS {
                        break;
                    }
                    let jitter_frac = rand::thread_rng().gen_range(0.0..RECONNECT_JITTER_FRACTION);
                    sleep(delay.mul_f64(1.0 + jitter_frac)).await;
                    delay = (delay * 2).min(RECONNECT_BACKOFF_CAP);
                }
            }
        }
        false
    }

    /// Enqueues an outbound send and awaits the queue consumer's retry
    /// outcome. Rejected immediately once shutdown has begun.
    #[instrument(skip(self, text))]
    pub async fn send(&self, channel: &str, text: &str, reply_to: Option<&str>) -> Result<String> {
        {
            let guard = self.inner.lock().await;
            if matches!(guard.state, LifecycleState::Stopping | LifecycleState::Stopped) {
                return Err(ChannelError::ShuttingDown);
            }
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        self.inflight.fetch_add(1, Ordering::AcqRel);
        self.send_tx
            .send(SendJob {
                channel: channel.to_string(),
                text: text.to_string(),
                reply_to: reply_to.map(str::to_string),
                ack: ack_tx,
            })
            .map_err(|_| ChannelError::ConsumerGone)?;
        ack_rx.await.map_err(|_| ChannelError::ConsumerGone)?
    }

    /// Best-effort edit of a previously sent message. Unlike [`Self::send`]
    /// this bypasses the retry queue: edits are a streaming-update nicety,
    /// not something worth backing off and retrying for.
    #[instrument(skip(self, text))]
    pub async fn edit(&self, channel: &str, message_id: &str, text: &str) -> Result<crate::types::EditOutcome> {
        let guard = self.inner.lock().await;
        if matches!(guard.state, LifecycleState::Stopping | LifecycleState::Stopped) {
            return Err(ChannelError::ShuttingDown);
        }
        guard.channel.edit_message(channel, message_id, text).await
    }

    /// Best-effort typing indicator; errors are the caller's to ignore.
    #[instrument(skip(self))]
    pub async fn send_typing(&self, channel: &str) -> Result<()> {
        let guard = self.inner.lock().await;
        if matches!(guard.state, LifecycleState::Stopping | LifecycleState::Stopped) {
            return Err(ChannelError::ShuttingDown);
        }
        guard.channel.send_typing(channel).await
    }

    fn spawn_send_consumer(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<SendJob>,
        inflight: Arc<AtomicUsize>,
        draining: Arc<AtomicBool>,
    ) {
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if draining.load(Ordering::Acquire) {
                    self.bus.emit(ChannelEvent::SendDropped { channel: job.channel.clone() });
                    let _ = job.ack.send(Err(ChannelError::ShuttingDown));
                    inflight.fetch_sub(1, Ordering::AcqRel);
                    continue;
                }

                let mut delay = self.config.send_backoff_start;
                let mut last_err = None;
                let mut sent = None;
                for attempt in 1..=self.config.send_max_attempts {
                    let result = {
                        let guard = self.inner.lock().await;
                        guard.channel.send_message(&job.channel, &job.text, job.reply_to.as_deref()).await
                    };
                    match result {
                        Ok(id) => {
                            sent = Some(id);
                            break;
                        }
                        Err(e) => {
                            warn!(attempt, channel = %job.channel, error = %e, "send attempt failed");
                            last_err = Some(e);
                            if attempt == self.config.send_max_attempts {
                                break;
                            }
                            sleep(delay).await;
                            delay = (delay * 2).min(self.config.send_backoff_cap);
                        }
                    }
                }

                match sent {
                    Some(id) => {
                        let _ = job.ack.send(Ok(id));
                    }
                    None => {
                        let err =
                            last_err.unwrap_or_else(|| ChannelError::SendFailed("exhausted retries".into()));
                        self.bus.emit(ChannelEvent::SendFailed {
                            channel: job.channel.clone(),
                            error: err.to_string(),
                        });
                        let _ = job.ack.send(Err(err));
                    }
                }
                inflight.fetch_sub(1, Ordering::AcqRel);
            }
        });
    }

    /// Stops intake, drains the send queue for up to `send_drain`, then
    /// disconnects the adapter. Anything still queued once the drain
    /// window elapses is rejected rather than attempted.
    #[instrument(skip(self))]
    pub async fn stop(self: &Arc<Self>) -> Result<()> {
        self.inner.lock().await.state = LifecycleState::Stopping;

        let deadline = Instant::now() + self.config.send_drain;
        while self.inflight.load(Ordering::Acquire) > 0 && Instant::now() < deadline {
            sleep(Duration::from_millis(20)).await;
        }
        self.draining.store(true, Ordering::Release);

        let result = {
            let mut guard = self.inner.lock().await;
            let r = guard.channel.stop().await;
            guard.state = LifecycleState::Stopped;
            r
        };
        self.bus.emit(ChannelEvent::Disconnected);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MessageHandler;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration as StdDuration;

    struct StubChannel {
        connected: Arc<AtomicBool>,
        send_fail_count: Arc<AtomicU32>,
        sends: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl Channel for StubChannel {
        fn platform(&self) -> &str {
            "stub"
        }

        async fn start(&mut self) -> Result<()> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn set_message_handler(&mut self, _handler: MessageHandler) {}

        async fn send_message(&self, channel: &str, text: &str, _reply_to: Option<&str>) -> Result<String> {
            if self.send_fail_count.load(Ordering::SeqCst) > 0 {
                self.send_fail_count.fetch_sub(1, Ordering::SeqCst);
                return Err(ChannelError::SendFailed("stub failure".into()));
            }
            let mut sends = self.sends.lock().unwrap();
            sends.push(format!("{channel}:{text}"));
            Ok(format!("msg-{}", sends.len()))
        }

        fn status(&self) -> ChannelStatus {
            if self.connected.load(Ordering::SeqCst) {
                ChannelStatus::Connected
            } else {
                ChannelStatus::Disconnected
            }
        }
    }

    fn fast_config() -> ChannelLifecycleConfig {
        ChannelLifecycleConfig {
            health_check_interval: StdDuration::from_millis(20),
            reconnect_delay: StdDuration::from_millis(5),
            reconnect_failure_threshold: 1,
            send_backoff_start: StdDuration::from_millis(5),
            send_backoff_cap: StdDuration::from_millis(10),
            send_max_attempts: 3,
            send_drain: StdDuration::from_millis(200),
        }
    }

    async fn wait_for<F: Fn() -> bool>(pred: F, timeout: StdDuration) {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if pred() {
                return;
            }
            sleep(StdDuration::from_millis(5)).await;
        }
        panic!("condition not met within timeout");
    }

    #[tokio::test]
    async fn start_reaches_running_and_emits_connected() {
        let channel = Box::new(StubChannel {
            connected: Arc::new(AtomicBool::new(false)),
            send_fail_count: Arc::new(AtomicU32::new(0)),
            sends: Arc::new(StdMutex::new(Vec::new())),
        });
        let lifecycle = ChannelLifecycle::new(channel, fast_config());
        let mut events = lifecycle.subscribe();
        lifecycle.start().await.unwrap();
        assert_eq!(lifecycle.state().await, LifecycleState::Running);
        assert!(matches!(events.recv().await.unwrap(), ChannelEvent::Connected));
    }

    #[tokio::test]
    async fn send_delivers_and_acks_platform_id() {
        let channel = Box::new(StubChannel {
            connected: Arc::new(AtomicBool::new(false)),
            send_fail_count: Arc::new(AtomicU32::new(0)),
            sends: Arc::new(StdMutex::new(Vec::new())),
        });
        let lifecycle = ChannelLifecycle::new(channel, fast_config());
        lifecycle.start().await.unwrap();
        let id = lifecycle.send("general", "hello", None).await.unwrap();
        assert!(id.starts_with("msg-"));
    }

    #[tokio::test]
    async fn send_retries_past_transient_failures_then_succeeds() {
        let send_fail_count = Arc::new(AtomicU32::new(2));
        let channel = Box::new(StubChannel {
            connected: Arc::new(AtomicBool::new(false)),
            send_fail_count: send_fail_count.clone(),
            sends: Arc::new(StdMutex::new(Vec::new())),
        });
        let lifecycle = ChannelLifecycle::new(channel, fast_config());
        lifecycle.start().await.unwrap();
        let id = lifecycle.send("general", "hi", None).await.unwrap();
        assert!(id.starts_with("msg-"));
        assert_eq!(send_fail_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stop_rejects_new_sends() {
        let channel = Box::new(StubChannel {
            connected: Arc::new(AtomicBool::new(false)),
            send_fail_count: Arc::new(AtomicU32::new(0)),
            sends: Arc::new(StdMutex::new(Vec::new())),
        });
        let lifecycle = ChannelLifecycle::new(channel, fast_config());
        lifecycle.start().await.unwrap();
        lifecycle.stop().await.unwrap();
        let err = lifecycle.send("general", "late", None).await.unwrap_err();
        assert!(matches!(err, ChannelError::ShuttingDown));
        assert_eq!(lifecycle.state().await, LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn health_check_reconnects_after_disconnect() {
        let connected = Arc::new(AtomicBool::new(false));
        let channel = Box::new(StubChannel {
            connected: connected.clone(),
            send_fail_count: Arc::new(AtomicU32::new(0)),
            sends: Arc::new(StdMutex::new(Vec::new())),
        });
        let lifecycle = ChannelLifecycle::new(channel, fast_config());
        let mut events = lifecycle.subscribe();
        lifecycle.start().await.unwrap();
        assert!(matches!(events.recv().await.unwrap(), ChannelEvent::Connected));

        // Simulate the adapter dropping its connection independently of the
        // lifecycle; the health loop should notice and reconnect it.
        connected.store(false, Ordering::SeqCst);

        wait_for(|| connected.load(Ordering::SeqCst), StdDuration::from_secs(2)).await;

        let deadline = Instant::now() + StdDuration::from_secs(2);
        loop {
            if lifecycle.state().await == LifecycleState::Running {
                break;
            }
            assert!(Instant::now() < deadline, "lifecycle never returned to Running");
            sleep(StdDuration::from_millis(5)).await;
        }
    }
}
