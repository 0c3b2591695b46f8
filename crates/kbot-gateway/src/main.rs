//! Thin binary wiring every component crate into one running process:
//! loads config, builds the durable stores, spawns the agent lifecycle,
//! wires the Discord channel adapter, and drives the orchestrator through
//! its start/stop state machine until `ctrl_c`.

mod checkpoint;
mod stdio_rpc;

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tracing::{error, info, warn};

use kbot_agent::{AgentLifecycle, AgentLifecycleConfig};
use kbot_channels::{Channel, ChannelLifecycle, ChannelLifecycleConfig, ChannelRegistry};
use kbot_context::{ContextTrackerConfig, ContextUsageTracker};
use kbot_conversations::ConversationStore;
use kbot_core::{config::KbotConfig, NormalizedMessage};
use kbot_discord::DiscordChannel;
use kbot_dmpolicy::DmPolicyStore;
use kbot_lifecycle::SessionLifecycleManager;
use kbot_orchestrator::{Orchestrator, OrchestratorDeps, StaticPlatformCapabilities};
use kbot_router::SessionRouter;
use kbot_sessions::SessionStore;
use kbot_transform::TransformerTable;

use stdio_rpc::StdioClientFactory;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kbot_gateway=info".into()),
        )
        .init();

    let config_path = std::env::var("KBOT_CONFIG").ok();
    let config = KbotConfig::load_from_file(config_path.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "config load failed, using defaults");
        KbotConfig::default()
    });

    if config.agent_command.is_empty() {
        anyhow::bail!("agent_command is not configured; set it in the config file");
    }
    if config.discord_bot_token.is_empty() {
        anyhow::bail!("discord_bot_token is not configured; set it in the config file");
    }

    let base_dir = PathBuf::from(&config.base_dir);

    let sessions = Arc::new(SessionStore::new(&base_dir));
    let conversations = Arc::new(ConversationStore::new(&base_dir));
    let dmpolicy = Arc::new(DmPolicyStore::new(&base_dir, config.pairing_ttl_mins as i64));

    match sessions.recover_orphaned_sessions() {
        Ok(n) if n > 0 => info!(count = n, "abandoned orphaned sessions from a prior run"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "orphaned-session recovery failed"),
    }

    let router = Arc::new(SessionRouter::new());
    router.add_agent("main");

    let lifecycle = Arc::new(SessionLifecycleManager::new(config.rotation_threshold));

    let agent = AgentLifecycle::new(
        AgentLifecycleConfig {
            command: config.agent_command.clone(),
            args: config.agent_args.clone(),
            health_check_interval: Duration::from_secs(config.health_check_interval_secs),
            failure_threshold: config.health_failure_threshold,
            max_recoveries: config.escalation_threshold,
            graceful_stop_timeout: Duration::from_secs(config.shutdown_timeout_secs),
        },
        Arc::new(StdioClientFactory),
    );

    let channels = Arc::new(ChannelRegistry::new());

    let orchestrator_cell: Arc<OnceLock<Arc<Orchestrator>>> = Arc::new(OnceLock::new());
    let dispatch_cell = orchestrator_cell.clone();
    let handler: kbot_channels::MessageHandler = Arc::new(move |msg: NormalizedMessage| {
        let cell = dispatch_cell.clone();
        tokio::spawn(async move {
            if let Some(orch) = cell.get() {
                orch.handle_message(msg).await;
            } else {
                warn!("dropped inbound message: orchestrator not yet initialized");
            }
        });
    });

    let mut discord_channel = DiscordChannel::new(
        config.discord_bot_token.clone(),
        config.discord_require_mention,
        config.discord_dm_allowed,
    );
    discord_channel.set_message_handler(handler);

    let channel_lifecycle_config = ChannelLifecycleConfig {
        health_check_interval: Duration::from_secs(config.health_check_interval_secs),
        reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
        reconnect_failure_threshold: config.reconnect_failure_threshold,
        send_backoff_start: Duration::from_millis(config.send_backoff_start_ms),
        send_backoff_cap: Duration::from_millis(config.send_backoff_cap_ms),
        send_max_attempts: config.send_max_attempts,
        send_drain: Duration::from_secs(config.send_drain_secs),
    };
    channels.register(
        "discord",
        ChannelLifecycle::new(Box::new(discord_channel) as Box<dyn Channel>, channel_lifecycle_config),
    );

    let transform = Arc::new(TransformerTable::new());
    let context_tracker = Arc::new(ContextUsageTracker::new(ContextTrackerConfig {
        debounce: Duration::from_secs(config.usage_probe_debounce_secs),
        probe_timeout: Duration::from_secs(config.usage_probe_timeout_secs),
    }));

    let deps = OrchestratorDeps {
        agent_type: "main".to_string(),
        router,
        lifecycle,
        agent,
        sessions,
        conversations,
        dmpolicy,
        channels,
        transform,
        context_tracker,
        usage_probe: None,
        summary_provider: None,
        platform_capabilities: Arc::new(StaticPlatformCapabilities::new(["discord"])),
        identity_prompt: None,
        escalation_channel: None,
        coalescer_config: kbot_coalescer::CoalescerConfig {
            max_len: config.coalescer_max_len,
            soft_limit: config.coalescer_soft_limit,
        },
        agent_ready_timeout: Duration::from_secs(config.agent_ready_timeout_secs),
        shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
        inflight_poll: Duration::from_millis(config.inflight_poll_ms),
        checkpoint_consumed_hook: Some(checkpoint::consumed_hook(base_dir.clone())),
    };

    let orchestrator = Orchestrator::new(deps);
    orchestrator_cell
        .set(orchestrator.clone())
        .unwrap_or_else(|_| unreachable!("orchestrator_cell set exactly once"));

    if let Some(wake) = checkpoint::load(&base_dir) {
        orchestrator.load_wake_context(wake).await;
    }

    orchestrator.start().await?;
    info!("kbot gateway running");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    if let Err(e) = orchestrator.stop().await {
        error!(error = %e, "error during shutdown");
    }

    Ok(())
}
