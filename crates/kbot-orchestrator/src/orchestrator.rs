use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

use kbot_agent::{AgentLifecycle, AgentLifecycleState};
use kbot_channels::ChannelRegistry;
use kbot_context::{ContextUsageTracker, UsageProbe};
use kbot_conversations::{AppendTurnInput, ConversationStore};
use kbot_core::{
    AgentSessionStatus, Bus, EventRange, NormalizedMessage, PromptRequest, Role, SessionEventType,
};
use kbot_dmpolicy::{AccessCheck, DmPolicyStore};
use kbot_lifecycle::SessionLifecycleManager;
use kbot_router::SessionRouter;
use kbot_sessions::{AppendEventInput, CreateSessionInput, SessionStore};
use kbot_transform::TransformerTable;

use crate::error::{OrchestratorError, Result};
use crate::sinks::{AnyCoalescer, ChannelEditSink, ChannelSendSink};
use crate::types::{BotState, OrchestratorEvent, PlatformCapabilities, SummaryProvider, WakeContext};

/// Everything one `Orchestrator` is wired against. Construction is a single
/// value so callers (the gateway binary) build it once from `KbotConfig`
/// and whatever adapters they've registered.
pub struct OrchestratorDeps {
    pub agent_type: String,
    pub router: Arc<SessionRouter>,
    pub lifecycle: Arc<SessionLifecycleManager>,
    pub agent: Arc<AgentLifecycle>,
    pub sessions: Arc<SessionStore>,
    pub conversations: Arc<ConversationStore>,
    pub dmpolicy: Arc<DmPolicyStore>,
    pub channels: Arc<ChannelRegistry>,
    pub transform: Arc<TransformerTable>,
    pub context_tracker: Arc<ContextUsageTracker>,
    pub usage_probe: Option<Arc<dyn UsageProbe>>,
    pub summary_provider: Option<Arc<dyn SummaryProvider>>,
    pub platform_capabilities: Arc<dyn PlatformCapabilities>,
    pub identity_prompt: Option<String>,
    pub escalation_channel: Option<String>,
    pub coalescer_config: kbot_coalescer::CoalescerConfig,
    pub agent_ready_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub inflight_poll: Duration,
    pub checkpoint_consumed_hook: Option<Arc<dyn Fn() + Send + Sync>>,
}

/// Wires the router, session lifecycle, agent process, channels, and
/// durable stores into the single `handleMessage` pipeline, plus the bot's
/// own start/stop state machine.
pub struct Orchestrator {
    deps: OrchestratorDeps,
    bus: Bus<OrchestratorEvent>,
    state: Mutex<BotState>,
    inflight: AtomicI64,
    last_active_channel: Mutex<Option<String>>,
    wake_context: Mutex<Option<WakeContext>>,
    escalation_forwarder_started: AtomicBool,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps) -> Arc<Self> {
        Arc::new(Self {
            deps,
            bus: Bus::new(),
            state: Mutex::new(BotState::Idle),
            inflight: AtomicI64::new(0),
            last_active_channel: Mutex::new(None),
            wake_context: Mutex::new(None),
            escalation_forwarder_started: AtomicBool::new(false),
        })
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<OrchestratorEvent> {
        self.bus.subscribe()
    }

    pub async fn state(&self) -> BotState {
        *self.state.lock().await
    }

    pub fn inflight_count(&self) -> i64 {
        self.inflight.load(Ordering::Acquire)
    }

    /// Loads a checkpoint's wake prompt so the next message this session
    /// handles sends it before any identity prompt. Consumed exactly once.
    pub async fn load_wake_context(&self, wake: WakeContext) {
        *self.wake_context.lock().await = Some(wake);
    }

    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if *state != BotState::Idle {
                return Err(OrchestratorError::InvalidStateTransition);
            }
            *state = BotState::Starting;
        }

        self.deps.channels.start_all().await;
        if let Err(e) = self.deps.agent.spawn().await {
            warn!(error = %e, "agent did not spawn eagerly at start; will retry on first message");
        }
        self.spawn_escalation_forwarder();

        *self.state.lock().await = BotState::Running;
        info!("orchestrator started");
        Ok(())
    }

    fn spawn_escalation_forwarder(self: &Arc<Self>) {
        if self.escalation_forwarder_started.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            let mut events = this.deps.agent.subscribe();
            while let Ok(event) = events.recv().await {
                if let kbot_agent::AgentEvent::Escalate { reason, context } = event {
                    this.escalate(reason, context).await;
                }
            }
        });
    }

    async fn escalate(&self, reason: String, metadata: serde_json::Value) {
        let target_channel = match self.deps.escalation_channel.clone() {
            Some(channel) => Some(channel),
            None => self.last_active_channel.lock().await.clone(),
        };
        warn!(reason = %reason, "agent escalation");
        self.bus.emit(OrchestratorEvent::Escalate {
            reason,
            metadata,
            target_channel,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Graceful shutdown: stop intake, drain in-flight work, mark active
    /// sessions completed, stop the agent. Idempotent past `idle`.
    #[instrument(skip(self))]
    pub async fn stop(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if matches!(*state, BotState::Stopped | BotState::Stopping) {
                return Ok(());
            }
            *state = BotState::Stopping;
        }

        // (a) no new intake.
        self.deps.channels.stop_all().await;

        // (b) drain in-flight work up to the configured timeout.
        let deadline = Instant::now() + self.deps.shutdown_timeout;
        while self.inflight.load(Ordering::Acquire) > 0 && Instant::now() < deadline {
            sleep(self.deps.inflight_poll).await;
        }
        let remaining = self.inflight.load(Ordering::Acquire);
        if remaining > 0 {
            warn!(remaining, "graceful shutdown: in-flight messages did not drain in time");
        }

        // (c) mark every active agent session completed and drop the
        // lifecycle entry.
        for (key, state) in self.deps.lifecycle.drain_all().await {
            if let Err(e) =
                self.deps.sessions.update_session_status(&state.acp_session_id, AgentSessionStatus::Completed)
            {
                warn!(key, error = %e, "failed to mark session completed during shutdown");
                self.bus.emit(OrchestratorEvent::Error { message: e.to_string() });
            }
        }

        // (d) stop the agent process.
        if let Err(e) = self.deps.agent.stop().await {
            warn!(error = %e, "error stopping agent during shutdown");
            self.bus.emit(OrchestratorEvent::Error { message: e.to_string() });
        }

        // (e) the durable stores are flushed on every write (atomic file
        // writes, fsynced append log) — there is no open handle to close.

        *self.state.lock().await = BotState::Stopped;
        info!("orchestrator stopped");
        Ok(())
    }

    /// Entry point adapters call with a raw platform payload: consults the
    /// transform table, then the DM-access policy, before handing the
    /// normalized message to `handle_message`.
    #[instrument(skip(self, raw))]
    pub async fn handle_raw_message(self: &Arc<Self>, platform: &str, raw: &serde_json::Value) {
        let Some(msg) = self.deps.transform.handle_raw_message(platform, raw) else {
            return;
        };

        match self.deps.dmpolicy.check_access(&msg.channel, &msg.sender.id, platform) {
            Ok(AccessCheck::Allowed) => {}
            Ok(AccessCheck::Pending(request)) => {
                debug!(request_id = %request.id, "message held pending DM pairing approval");
                return;
            }
            Err(e) => {
                error!(error = %e, "dm policy check failed, dropping message");
                self.bus.emit(OrchestratorEvent::Error { message: e.to_string() });
                return;
            }
        }

        self.handle_message(msg).await;
    }

    /// The core inbound pipeline: resolve the session, wait for the agent,
    /// restore or seed context, run the prompt, persist the turn.
    #[instrument(skip(self, msg), fields(message_id = %msg.id))]
    pub async fn handle_message(self: &Arc<Self>, msg: NormalizedMessage) {
        if self.state().await != BotState::Running {
            warn!("dropping message: orchestrator is not running");
            return;
        }

        let started_at = Instant::now();
        let platform = msg.sender.platform.clone();
        *self.last_active_channel.lock().await = Some(msg.channel.clone());
        self.inflight.fetch_add(1, Ordering::AcqRel);
        if let Some(lc) = self.deps.channels.get(&platform) {
            let _ = lc.send_typing(&msg.channel).await;
        }

        let result = self.process_message(&msg, &platform).await;

        self.inflight.fetch_sub(1, Ordering::AcqRel);
        let duration_ms = started_at.elapsed().as_millis() as u64;
        match result {
            Ok(()) => self.bus.emit(OrchestratorEvent::MessageProcessed { message_id: msg.id, duration_ms }),
            Err(e) => {
                warn!(error = %e, "message handling failed");
                self.bus.emit(OrchestratorEvent::MessageError { message_id: msg.id, error: e.to_string() });
            }
        }
    }

    async fn process_message(self: &Arc<Self>, msg: &NormalizedMessage, platform: &str) -> Result<()> {
        let session_entry = self.deps.router.resolve_session(msg, &self.deps.agent_type).await?;
        let session_key = session_entry.lock().await.key.format();

        let conv = self.deps.conversations.get_or_create_conversation(&session_key)?;
        let had_prior_turns = conv.turn_count > 0;

        self.ensure_agent_ready().await?;
        let client = self.deps.agent.get_client().await.ok_or(OrchestratorError::AgentUnavailable)?;

        let outcome = self
            .deps
            .lifecycle
            .get_or_create_session(
                &session_key,
                &self.deps.agent_type,
                client.as_ref(),
                &self.deps.conversations,
                &self.deps.sessions,
            )
            .await?;
        let sid = outcome.state.acp_session_id.clone();

        if outcome.is_new || outcome.was_rotated {
            let _ = self.deps.sessions.create_session(CreateSessionInput {
                id: sid.clone(),
                agent_type: self.deps.agent_type.clone(),
                conversation_id: Some(conv.id.clone()),
                session_key: Some(session_key.clone()),
            });
        }

        let user_event =
            self.deps.sessions.append_event(AppendEventInput::new(
                &sid,
                SessionEventType::PromptSent,
                json!({ "text": msg.text }),
            ))?;
        let user_turn = self.deps.conversations.append_turn(
            &conv.id,
            AppendTurnInput::new(Role::User, sid.clone(), EventRange { start_seq: user_event.seq, end_seq: user_event.seq })
                .with_message_id(msg.id.clone()),
        )?;
        if user_turn.was_duplicate {
            return Ok(());
        }

        let mut context_restored = false;

        if let Some(wake) = self.wake_context.lock().await.take() {
            let _ = client.prompt(PromptRequest::system(&sid, wake.prompt)).await;
            if let Some(hook) = &self.deps.checkpoint_consumed_hook {
                hook();
            }
        }

        if (outcome.was_rotated || outcome.was_recovered) && had_prior_turns {
            if let Some(provider) = &self.deps.summary_provider {
                let turns = self.deps.conversations.read_turns(&conv.id).unwrap_or_default();
                if let Some(summary) = provider.summarize(&conv.id, &turns).await {
                    let _ = client.prompt(PromptRequest::system(&sid, summary)).await;
                    context_restored = true;
                }
            }
        }

        if outcome.is_new && !context_restored {
            if let Some(identity) = &self.deps.identity_prompt {
                let _ = client.prompt(PromptRequest::system(&sid, identity.clone())).await;
            }
        }

        let channel_lifecycle = self.deps.channels.get(platform);
        let coalescer = channel_lifecycle.map(|lc| {
            if self.deps.platform_capabilities.supports_streaming(platform) {
                AnyCoalescer::Edit(kbot_coalescer::EditCoalescer::new(
                    self.deps.coalescer_config,
                    Arc::new(ChannelEditSink::new(lc, msg.channel.clone())),
                ))
            } else {
                AnyCoalescer::Buffered(kbot_coalescer::Coalescer::new(
                    self.deps.coalescer_config,
                    Arc::new(ChannelSendSink::new(lc, msg.channel.clone())),
                ))
            }
        });

        let mut updates = client.subscribe(&sid);
        let bus_sid = sid.clone();
        let consumer = async {
            let mut full_text = String::new();
            let mut first_seq: Option<u64> = None;
            let mut last_seq: Option<u64> = None;
            while let Some(update) = updates.recv().await {
                match update.session_update {
                    kbot_core::SessionUpdateKind::AgentMessageChunk => {
                        if let Some(content) = update.content.as_deref() {
                            full_text.push_str(content);
                            if let Some(c) = &coalescer {
                                c.push(&full_text);
                            }
                            if let Ok(event) = self.deps.sessions.append_event(AppendEventInput::new(
                                &sid,
                                SessionEventType::MessageChunk,
                                json!({ "session_update": "agent_message_chunk", "content": content }),
                            )) {
                                first_seq.get_or_insert(event.seq);
                                last_seq = Some(event.seq);
                            }
                        }
                    }
                    kbot_core::SessionUpdateKind::ToolCall | kbot_core::SessionUpdateKind::ToolCallUpdate => {
                        self.bus.emit(OrchestratorEvent::ToolUpdate {
                            session_id: bus_sid.clone(),
                            update: update.clone(),
                        });
                    }
                }
            }
            (full_text, first_seq, last_seq)
        };

        let (consumer_result, prompt_result) =
            tokio::join!(consumer, client.prompt(PromptRequest::user(&sid, msg.text.clone())));

        let (mut full_text, mut first_seq, mut last_seq) = consumer_result;

        let response = match prompt_result {
            Ok(response) => response,
            Err(e) => {
                if let Some(c) = &coalescer {
                    c.abort();
                }
                return Err(e.into());
            }
        };

        if let Some(c) = &coalescer {
            c.complete().await;
        }

        if full_text.is_empty() {
            if let Some(text) = response.text.filter(|t| !t.is_empty()) {
                if let Ok(event) = self.deps.sessions.append_event(AppendEventInput::new(
                    &sid,
                    SessionEventType::MessageChunk,
                    json!({ "session_update": "agent_message_chunk", "content": text }),
                )) {
                    first_seq.get_or_insert(event.seq);
                    last_seq = Some(event.seq);
                }
                full_text = text;
            }
        }

        if !full_text.is_empty() {
            let range = EventRange {
                start_seq: first_seq.unwrap_or(user_event.seq),
                end_seq: last_seq.unwrap_or(first_seq.unwrap_or(user_event.seq)),
            };
            self.deps.conversations.append_turn(&conv.id, AppendTurnInput::new(Role::Assistant, sid.clone(), range))?;
        }

        self.sample_context_usage(session_key, sid);

        Ok(())
    }

    /// Fire-and-forget: never lets a slow or failing probe hold up the
    /// message that triggered it.
    fn sample_context_usage(self: &Arc<Self>, session_key: String, session_id: String) {
        let Some(probe) = self.deps.usage_probe.clone() else { return };
        let this = self.clone();
        tokio::spawn(async move {
            if let Some(fraction) =
                this.deps.context_tracker.sample(&session_key, &session_id, probe.as_ref()).await
            {
                this.deps.lifecycle.update_context_usage(&session_key, fraction).await;
            }
        });
    }

    /// Polls agent readiness: `healthy` proceeds, `idle`/`failed` trigger a
    /// (re)spawn, `stopping`/`terminated` fail fast, anything else waits.
    async fn ensure_agent_ready(&self) -> Result<()> {
        let deadline = Instant::now() + self.deps.agent_ready_timeout;
        loop {
            match self.deps.agent.get_state().await {
                AgentLifecycleState::Healthy => return Ok(()),
                AgentLifecycleState::Idle | AgentLifecycleState::Failed => {
                    if let Err(e) = self.deps.agent.spawn().await {
                        debug!(error = %e, "spawn attempt during readiness wait did not start a new process");
                    }
                }
                AgentLifecycleState::Stopping | AgentLifecycleState::Terminated => {
                    return Err(OrchestratorError::AgentUnavailable);
                }
                AgentLifecycleState::Spawning | AgentLifecycleState::Unhealthy | AgentLifecycleState::Recovering => {}
            }
            if Instant::now() >= deadline {
                return Err(OrchestratorError::AgentReadyTimeout);
            }
            sleep(Duration::from_millis(50)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio::process::Child;
    use tokio::sync::mpsc;

    use kbot_agent::{AgentLifecycleConfig, ClientFactory};
    use kbot_channels::{Channel, ChannelLifecycleConfig, EditOutcome, MessageHandler};
    use kbot_core::{
        AgentRpcClient, NewSessionParams, PeerKind, PromptResponse, Role, Sender, SessionUpdate,
        SessionUpdateKind,
    };

    use super::*;
    use crate::types::StaticPlatformCapabilities;

    struct StubRpc {
        next_id: AtomicU32,
        reply: String,
    }

    impl StubRpc {
        fn new(reply: impl Into<String>) -> Self {
            Self { next_id: AtomicU32::new(0), reply: reply.into() }
        }
    }

    #[async_trait]
    impl AgentRpcClient for StubRpc {
        async fn new_session(&self, _params: NewSessionParams) -> kbot_core::rpc::Result<String> {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(format!("test-session-{n}"))
        }

        async fn prompt(&self, _req: PromptRequest) -> kbot_core::rpc::Result<PromptResponse> {
            Ok(PromptResponse { text: Some(self.reply.clone()) })
        }

        fn subscribe(&self, _session_id: &str) -> mpsc::Receiver<SessionUpdate> {
            let (tx, rx) = mpsc::channel(4);
            let chunk = self.reply.clone();
            tokio::spawn(async move {
                let _ = tx
                    .send(SessionUpdate {
                        session_update: SessionUpdateKind::AgentMessageChunk,
                        content: Some(chunk),
                        tool_call_id: None,
                        status: None,
                    })
                    .await;
            });
            rx
        }
    }

    struct StubClientFactory {
        reply: String,
    }

    impl ClientFactory for StubClientFactory {
        fn build(&self, _child: &mut Child) -> Arc<dyn AgentRpcClient> {
            Arc::new(StubRpc::new(self.reply.clone()))
        }
    }

    struct StubChannel {
        sent: Arc<StdMutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl Channel for StubChannel {
        fn platform(&self) -> &str {
            "stub"
        }

        async fn start(&mut self) -> kbot_channels::Result<()> {
            Ok(())
        }

        async fn stop(&mut self) -> kbot_channels::Result<()> {
            Ok(())
        }

        fn set_message_handler(&mut self, _handler: MessageHandler) {}

        async fn send_message(
            &self,
            channel: &str,
            text: &str,
            _reply_to: Option<&str>,
        ) -> kbot_channels::Result<String> {
            let mut sent = self.sent.lock().unwrap();
            sent.push((channel.to_string(), text.to_string()));
            Ok(format!("msg-{}", sent.len()))
        }

        async fn edit_message(
            &self,
            _channel: &str,
            message_id: &str,
            _text: &str,
        ) -> kbot_channels::Result<EditOutcome> {
            Ok(EditOutcome { edited_id: message_id.to_string(), overflow_ids: Vec::new() })
        }

        fn status(&self) -> kbot_channels::ChannelStatus {
            kbot_channels::ChannelStatus::Connected
        }
    }

    struct Harness {
        _dir: TempDir,
        sessions: Arc<SessionStore>,
        conversations: Arc<ConversationStore>,
        lifecycle: Arc<SessionLifecycleManager>,
        sent: Arc<StdMutex<Vec<(String, String)>>>,
    }

    fn build(reply: &str) -> (Arc<Orchestrator>, Harness) {
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionStore::new(dir.path()));
        let conversations = Arc::new(ConversationStore::new(dir.path()));
        let dmpolicy = Arc::new(DmPolicyStore::new(dir.path(), 60));
        let router = Arc::new(SessionRouter::new());
        router.add_agent("main");
        let lifecycle = Arc::new(SessionLifecycleManager::new(0.7));
        let agent = AgentLifecycle::new(
            AgentLifecycleConfig {
                command: "sleep".to_string(),
                args: vec!["5".to_string()],
                health_check_interval: Duration::from_millis(30),
                failure_threshold: 3,
                max_recoveries: 3,
                graceful_stop_timeout: Duration::from_millis(200),
            },
            Arc::new(StubClientFactory { reply: reply.to_string() }),
        );
        let channels = Arc::new(ChannelRegistry::new());
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let channel_lifecycle = kbot_channels::ChannelLifecycle::new(
            Box::new(StubChannel { sent: sent.clone() }),
            ChannelLifecycleConfig::default(),
        );
        channels.register("stub", channel_lifecycle);
        let transform = Arc::new(TransformerTable::new());
        let context_tracker = Arc::new(ContextUsageTracker::new(Default::default()));

        let deps = OrchestratorDeps {
            agent_type: "main".to_string(),
            router,
            lifecycle: lifecycle.clone(),
            agent,
            sessions: sessions.clone(),
            conversations: conversations.clone(),
            dmpolicy,
            channels,
            transform,
            context_tracker,
            usage_probe: None,
            summary_provider: None,
            platform_capabilities: Arc::new(StaticPlatformCapabilities::default()),
            identity_prompt: None,
            escalation_channel: None,
            coalescer_config: kbot_coalescer::CoalescerConfig::default(),
            agent_ready_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_millis(500),
            inflight_poll: Duration::from_millis(10),
            checkpoint_consumed_hook: None,
        };

        let orch = Orchestrator::new(deps);
        (orch, Harness { _dir: dir, sessions, conversations, lifecycle, sent })
    }

    fn message(id: &str, text: &str) -> NormalizedMessage {
        NormalizedMessage {
            id: id.to_string(),
            channel: "general".to_string(),
            text: text.to_string(),
            sender: Sender { id: "user-1".to_string(), platform: "stub".to_string(), display_name: None },
            timestamp: 0,
            metadata: None,
        }
    }

    fn session_key() -> String {
        kbot_core::SessionKey::new("main", "stub", PeerKind::User, "user-1").unwrap().format()
    }

    #[tokio::test]
    async fn start_requires_idle_state() {
        let (orch, _h) = build("hi");
        orch.start().await.unwrap();
        assert_eq!(orch.state().await, BotState::Running);
        assert!(matches!(orch.start().await, Err(OrchestratorError::InvalidStateTransition)));
        orch.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (orch, _h) = build("hi");
        orch.start().await.unwrap();
        orch.stop().await.unwrap();
        assert_eq!(orch.state().await, BotState::Stopped);
        orch.stop().await.unwrap();
        assert_eq!(orch.state().await, BotState::Stopped);
    }

    #[tokio::test]
    async fn happy_path_persists_user_and_assistant_turns() {
        let (orch, h) = build("hello back");
        orch.start().await.unwrap();
        orch.handle_message(message("m1", "hello")).await;

        let key = session_key();
        let conv = h.conversations.get_conversation_by_session_key(&key).unwrap().unwrap();
        let turns = h.conversations.read_turns(&conv.id).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[0].message_id.as_deref(), Some("m1"));
        assert_eq!(turns[1].role, Role::Assistant);

        assert_eq!(h.sent.lock().unwrap().len(), 1);
        assert_eq!(h.sent.lock().unwrap()[0].1, "hello back");

        orch.stop().await.unwrap();
    }

    #[tokio::test]
    async fn replaying_same_message_id_does_not_duplicate_user_turn() {
        let (orch, h) = build("reply");
        orch.start().await.unwrap();
        orch.handle_message(message("m1", "hello")).await;
        orch.handle_message(message("m1", "hello")).await;

        let key = session_key();
        let conv = h.conversations.get_conversation_by_session_key(&key).unwrap().unwrap();
        let turns = h.conversations.read_turns(&conv.id).unwrap();
        let user_turns = turns.iter().filter(|t| t.role == Role::User).count();
        assert_eq!(user_turns, 1);
        assert_eq!(turns.len(), 2, "replayed message must not re-prompt the agent or append a second assistant turn");

        orch.stop().await.unwrap();
    }

    #[tokio::test]
    async fn escalation_is_forwarded_with_last_active_channel() {
        let (orch, _h) = build("hi");
        orch.start().await.unwrap();
        let mut events = orch.subscribe();

        orch.handle_message(message("m1", "hello")).await;
        // drain the MessageProcessed event first.
        let _ = events.recv().await;

        orch.escalate("needs human".to_string(), serde_json::json!({"k": "v"})).await;

        let evt = events.recv().await.unwrap();
        match evt {
            OrchestratorEvent::Escalate { reason, target_channel, .. } => {
                assert_eq!(reason, "needs human");
                assert_eq!(target_channel.as_deref(), Some("general"));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        orch.stop().await.unwrap();
    }

    #[tokio::test]
    async fn graceful_shutdown_marks_active_sessions_completed() {
        let (orch, h) = build("hi");
        orch.start().await.unwrap();
        orch.handle_message(message("m1", "hello")).await;
        assert_eq!(h.lifecycle.active_key_count(), 1);

        orch.stop().await.unwrap();

        assert_eq!(h.lifecycle.active_key_count(), 0);
        let key = session_key();
        let conv = h.conversations.get_conversation_by_session_key(&key).unwrap().unwrap();
        let turns = h.conversations.read_turns(&conv.id).unwrap();
        let sid = turns[0].session_id.clone();
        let session = h.sessions.get_session(&sid).unwrap().unwrap();
        assert_eq!(session.status, kbot_core::AgentSessionStatus::Completed);
    }
}
