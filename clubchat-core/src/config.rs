/// Runtime configuration.
///
/// Every field has a default taken from `club_protocol::limits`, so a config
/// file only needs to list what it overrides:
///
/// ```json
/// { "maxMessageBodyBytes": 2048, "resubscribe": { "maxDelayMs": 10000 } }
/// ```
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use club_protocol::limits::{
    MAX_CLUB_NAME_CHARS, MAX_MESSAGE_BODY_BYTES, MAX_PENDING_JOIN_REQUESTS,
    PROFILE_CACHE_CAPACITY,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("resubscribe initial delay ({initial}ms) exceeds max delay ({max}ms)")]
    DelayRange { initial: u64, max: u64 },

    #[error("Config parse error: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// ResubscribePolicy
// ---------------------------------------------------------------------------

/// Delay before re-subscribing a dropped live query: exponential from
/// `initial_delay_ms`, capped at `max_delay_ms`, plus up to `jitter_ms` of
/// random jitter.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct ResubscribePolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for ResubscribePolicy {
    fn default() -> Self {
        ResubscribePolicy {
            initial_delay_ms: 250,
            max_delay_ms: 30_000,
            jitter_ms: 250,
        }
    }
}

impl ResubscribePolicy {
    /// Base delay for the given attempt (0-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(20)).unwrap_or(u64::MAX);
        let ms = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        };
        self.base_delay(attempt) + Duration::from_millis(jitter)
    }
}

// ---------------------------------------------------------------------------
// ClubChatConfig
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct ClubChatConfig {
    pub max_message_body_bytes: usize,
    pub max_club_name_chars: usize,
    pub max_pending_join_requests: usize,
    pub profile_cache_capacity: usize,
    pub resubscribe: ResubscribePolicy,
}

impl Default for ClubChatConfig {
    fn default() -> Self {
        ClubChatConfig {
            max_message_body_bytes: MAX_MESSAGE_BODY_BYTES,
            max_club_name_chars: MAX_CLUB_NAME_CHARS,
            max_pending_join_requests: MAX_PENDING_JOIN_REQUESTS,
            profile_cache_capacity: PROFILE_CACHE_CAPACITY,
            resubscribe: ResubscribePolicy::default(),
        }
    }
}

impl ClubChatConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: ClubChatConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_body_bytes == 0 {
            return Err(ConfigError::Zero("maxMessageBodyBytes"));
        }
        if self.max_club_name_chars == 0 {
            return Err(ConfigError::Zero("maxClubNameChars"));
        }
        if self.max_pending_join_requests == 0 {
            return Err(ConfigError::Zero("maxPendingJoinRequests"));
        }
        if self.profile_cache_capacity == 0 {
            return Err(ConfigError::Zero("profileCacheCapacity"));
        }
        let policy = &self.resubscribe;
        if policy.initial_delay_ms > policy.max_delay_ms {
            return Err(ConfigError::DelayRange {
                initial: policy.initial_delay_ms,
                max: policy.max_delay_ms,
            });
        }
        Ok(())
    }
}

/// Load and validate a JSON config file.
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<ClubChatConfig> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = ClubChatConfig::from_json_str(&raw)
        .with_context(|| format!("invalid config {}", path.display()))?;
    log::info!("Loaded config from {}", path.display());
    Ok(config)
}
