use figment::providers::{Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

fn default_base_dir() -> String {
    ".kbot".to_string()
}
fn default_health_check_interval_secs() -> u64 {
    30
}
fn default_health_failure_threshold() -> u32 {
    3
}
fn default_escalation_threshold() -> u32 {
    3
}
fn default_shutdown_timeout_secs() -> u64 {
    10
}
fn default_agent_ready_timeout_secs() -> u64 {
    30
}
fn default_inflight_poll_ms() -> u64 {
    100
}
fn default_rotation_threshold() -> f64 {
    0.7
}
fn default_usage_probe_debounce_secs() -> u64 {
    30
}
fn default_usage_probe_timeout_secs() -> u64 {
    10
}
fn default_pairing_ttl_mins() -> u64 {
    60
}
fn default_coalescer_max_len() -> usize {
    2000
}
fn default_coalescer_soft_limit() -> usize {
    1800
}
fn default_reconnect_delay_secs() -> u64 {
    5
}
fn default_reconnect_failure_threshold() -> u32 {
    3
}
fn default_send_backoff_start_ms() -> u64 {
    100
}
fn default_send_backoff_cap_ms() -> u64 {
    2000
}
fn default_send_max_attempts() -> u32 {
    5
}
fn default_send_drain_secs() -> u64 {
    30
}
fn default_agent_args() -> Vec<String> {
    Vec::new()
}
fn default_discord_dm_allowed() -> bool {
    true
}

/// Flat, well-typed configuration for every component in the bot — built once
/// at startup and handed to each component's constructor. Replaces the
/// deep "options object" pattern; components accept only the fields they
/// need, read out of this struct by the wiring code.
///
/// Deliberately does **not** own environment-variable parsing or CLI
/// argument parsing — those are external collaborators (spec §1). Loading a
/// TOML file with built-in defaults via `figment` is the only supported
/// config *source*; an operator's CLI/env layer may build and pass an
/// equivalent struct directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbotConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: String,

    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_health_failure_threshold")]
    pub health_failure_threshold: u32,
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: u32,

    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default = "default_agent_ready_timeout_secs")]
    pub agent_ready_timeout_secs: u64,
    #[serde(default = "default_inflight_poll_ms")]
    pub inflight_poll_ms: u64,

    #[serde(default = "default_rotation_threshold")]
    pub rotation_threshold: f64,

    #[serde(default = "default_usage_probe_debounce_secs")]
    pub usage_probe_debounce_secs: u64,
    #[serde(default = "default_usage_probe_timeout_secs")]
    pub usage_probe_timeout_secs: u64,

    #[serde(default = "default_pairing_ttl_mins")]
    pub pairing_ttl_mins: u64,

    #[serde(default = "default_coalescer_max_len")]
    pub coalescer_max_len: usize,
    #[serde(default = "default_coalescer_soft_limit")]
    pub coalescer_soft_limit: usize,

    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_reconnect_failure_threshold")]
    pub reconnect_failure_threshold: u32,

    #[serde(default = "default_send_backoff_start_ms")]
    pub send_backoff_start_ms: u64,
    #[serde(default = "default_send_backoff_cap_ms")]
    pub send_backoff_cap_ms: u64,
    #[serde(default = "default_send_max_attempts")]
    pub send_max_attempts: u32,
    #[serde(default = "default_send_drain_secs")]
    pub send_drain_secs: u64,

    /// The agent subprocess's executable. Empty means unconfigured — the
    /// binary refuses to start rather than spawning `""`.
    #[serde(default)]
    pub agent_command: String,
    #[serde(default = "default_agent_args")]
    pub agent_args: Vec<String>,

    #[serde(default)]
    pub discord_bot_token: String,
    #[serde(default)]
    pub discord_require_mention: bool,
    #[serde(default = "default_discord_dm_allowed")]
    pub discord_dm_allowed: bool,
}

impl Default for KbotConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            health_check_interval_secs: default_health_check_interval_secs(),
            health_failure_threshold: default_health_failure_threshold(),
            escalation_threshold: default_escalation_threshold(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            agent_ready_timeout_secs: default_agent_ready_timeout_secs(),
            inflight_poll_ms: default_inflight_poll_ms(),
            rotation_threshold: default_rotation_threshold(),
            usage_probe_debounce_secs: default_usage_probe_debounce_secs(),
            usage_probe_timeout_secs: default_usage_probe_timeout_secs(),
            pairing_ttl_mins: default_pairing_ttl_mins(),
            coalescer_max_len: default_coalescer_max_len(),
            coalescer_soft_limit: default_coalescer_soft_limit(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            reconnect_failure_threshold: default_reconnect_failure_threshold(),
            send_backoff_start_ms: default_send_backoff_start_ms(),
            send_backoff_cap_ms: default_send_backoff_cap_ms(),
            send_max_attempts: default_send_max_attempts(),
            send_drain_secs: default_send_drain_secs(),
            agent_command: String::new(),
            agent_args: default_agent_args(),
            discord_bot_token: String::new(),
            discord_require_mention: false,
            discord_dm_allowed: default_discord_dm_allowed(),
        }
    }
}

impl KbotConfig {
    /// Load from an optional TOML file, falling back to built-in defaults
    /// for anything the file doesn't specify (or if no file is given).
    pub fn load_from_file(path: Option<&str>) -> crate::error::Result<Self> {
        let mut figment = Figment::from(figment::providers::Serialized::defaults(
            KbotConfig::default(),
        ));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .extract()
            .map_err(|e| crate::error::CoreError::Validation(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_policies() {
        let cfg = KbotConfig::default();
        assert_eq!(cfg.rotation_threshold, 0.7);
        assert_eq!(cfg.coalescer_max_len, 2000);
        assert_eq!(cfg.coalescer_soft_limit, 1800);
        assert_eq!(cfg.pairing_ttl_mins, 60);
        assert_eq!(cfg.reconnect_failure_threshold, 3);
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let cfg = KbotConfig::load_from_file(None).unwrap();
        assert_eq!(cfg.base_dir, ".kbot");
    }
}
