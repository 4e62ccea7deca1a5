//! Proxy configuration surface.
//!
//! `ProxyConfig` is the single struct the rest of the proxy reads its knobs
//! from. It is built from defaults overridden by `CLOAK_`-prefixed
//! environment variables at startup; loading file formats is left to outer
//! tooling, which can deserialize the same struct.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Secret-scanner strictness preset.
///
/// The action taken for a finding is a deterministic function of the preset
/// and the finding's risk level; see [`crate::scanner::policy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompliancePreset {
    Strict,
    Standard,
    Permissive,
}

impl FromStr for CompliancePreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "standard" => Ok(Self::Standard),
            "permissive" => Ok(Self::Permissive),
            other => Err(format!("unknown compliance preset: {other}")),
        }
    }
}

/// Startup configuration for the proxy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Address the proxy listens on.
    pub listen_addr: String,
    /// Target of the upstream forward, e.g. `https://api.openai.com/v1`.
    pub upstream_url: String,
    /// Maximum lifetime of a mapping record in the store.
    pub mapping_ttl_seconds: u64,
    /// Enables the anti-hallucination system message.
    pub inject_prompt: bool,
    /// Token bucket size and per-second refill for the in-process limiter.
    pub rate_limit: u32,
    pub rate_limit_enabled: bool,
    pub cache_enabled: bool,
    pub cache_ttl_seconds: u64,
    pub cache_max_entries: usize,
    pub secret_scan_enabled: bool,
    /// Enables the fuzzy placeholder-variant recovery pass.
    pub fuzzy_enabled: bool,
    /// Minimum confidence for accepting bare placeholder variants.
    pub fuzzy_confidence_threshold: f32,
    pub request_timeout_seconds: u64,
    pub upstream_timeout_seconds: u64,
    pub stream_idle_timeout_seconds: u64,
    /// Upper bound on placeholder token length, shared by the grammar check
    /// and the stream buffer carry.
    pub max_placeholder_length: usize,
    /// Maximum accepted request body size in bytes.
    pub max_body_bytes: usize,
    /// Optional JSON file with additional regex detector patterns.
    pub custom_pattern_path: Option<String>,
    /// Optional directory of allowlist term files (one term per line).
    pub allowlist_dir: Option<String>,
    pub compliance_preset: CompliancePreset,
    /// Successful forwards allowed per rolling window; 0 disables the check.
    pub quota_per_hour: u64,
    pub quota_per_day: u64,
    pub quota_per_month: u64,
    /// Redis connection URL for the remote mapping-store backend.
    #[cfg(feature = "redis-store")]
    pub redis_url: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            upstream_url: "https://api.openai.com/v1".to_string(),
            mapping_ttl_seconds: 300,
            inject_prompt: true,
            rate_limit: 60,
            rate_limit_enabled: false,
            cache_enabled: false,
            cache_ttl_seconds: 300,
            cache_max_entries: 1024,
            secret_scan_enabled: true,
            fuzzy_enabled: true,
            fuzzy_confidence_threshold: 0.85,
            request_timeout_seconds: 120,
            upstream_timeout_seconds: 10,
            stream_idle_timeout_seconds: 30,
            max_placeholder_length: 25,
            max_body_bytes: 2 * 1024 * 1024,
            custom_pattern_path: None,
            allowlist_dir: None,
            compliance_preset: CompliancePreset::Standard,
            quota_per_hour: 0,
            quota_per_day: 0,
            quota_per_month: 0,
            #[cfg(feature = "redis-store")]
            redis_url: None,
        }
    }
}

/// Overrides a field from an environment variable when it parses.
fn override_from_env<T: FromStr>(key: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(key)
        && let Ok(parsed) = raw.parse()
    {
        *target = parsed;
    }
}

impl ProxyConfig {
    /// Builds the configuration from defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        override_from_env("CLOAK_LISTEN_ADDR", &mut cfg.listen_addr);
        override_from_env("CLOAK_UPSTREAM_URL", &mut cfg.upstream_url);
        override_from_env("CLOAK_MAPPING_TTL_SECONDS", &mut cfg.mapping_ttl_seconds);
        override_from_env("CLOAK_INJECT_PROMPT", &mut cfg.inject_prompt);
        override_from_env("CLOAK_RATE_LIMIT", &mut cfg.rate_limit);
        override_from_env("CLOAK_RATE_LIMIT_ENABLED", &mut cfg.rate_limit_enabled);
        override_from_env("CLOAK_CACHE_ENABLED", &mut cfg.cache_enabled);
        override_from_env("CLOAK_CACHE_TTL_SECONDS", &mut cfg.cache_ttl_seconds);
        override_from_env("CLOAK_CACHE_MAX_ENTRIES", &mut cfg.cache_max_entries);
        override_from_env("CLOAK_SECRET_SCAN_ENABLED", &mut cfg.secret_scan_enabled);
        override_from_env("CLOAK_FUZZY_ENABLED", &mut cfg.fuzzy_enabled);
        override_from_env(
            "CLOAK_FUZZY_CONFIDENCE_THRESHOLD",
            &mut cfg.fuzzy_confidence_threshold,
        );
        override_from_env(
            "CLOAK_REQUEST_TIMEOUT_SECONDS",
            &mut cfg.request_timeout_seconds,
        );
        override_from_env(
            "CLOAK_UPSTREAM_TIMEOUT_SECONDS",
            &mut cfg.upstream_timeout_seconds,
        );
        override_from_env(
            "CLOAK_STREAM_IDLE_TIMEOUT_SECONDS",
            &mut cfg.stream_idle_timeout_seconds,
        );
        override_from_env(
            "CLOAK_MAX_PLACEHOLDER_LENGTH",
            &mut cfg.max_placeholder_length,
        );
        override_from_env("CLOAK_MAX_BODY_BYTES", &mut cfg.max_body_bytes);
        override_from_env("CLOAK_COMPLIANCE_PRESET", &mut cfg.compliance_preset);
        override_from_env("CLOAK_QUOTA_PER_HOUR", &mut cfg.quota_per_hour);
        override_from_env("CLOAK_QUOTA_PER_DAY", &mut cfg.quota_per_day);
        override_from_env("CLOAK_QUOTA_PER_MONTH", &mut cfg.quota_per_month);

        if let Ok(path) = std::env::var("CLOAK_CUSTOM_PATTERN_PATH") {
            cfg.custom_pattern_path = Some(path);
        }
        if let Ok(dir) = std::env::var("CLOAK_ALLOWLIST_DIR") {
            cfg.allowlist_dir = Some(dir);
        }
        #[cfg(feature = "redis-store")]
        if let Ok(u) = std::env::var("CLOAK_REDIS_URL") {
            cfg.redis_url = Some(u);
        }

        cfg
    }

    pub fn mapping_ttl(&self) -> Duration {
        Duration::from_secs(self.mapping_ttl_seconds)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_seconds)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let cfg = ProxyConfig::default();
        assert_eq!(cfg.mapping_ttl_seconds, 300);
        assert!(cfg.inject_prompt);
        assert_eq!(cfg.fuzzy_confidence_threshold, 0.85);
        assert_eq!(cfg.request_timeout_seconds, 120);
        assert_eq!(cfg.upstream_timeout_seconds, 10);
        assert_eq!(cfg.stream_idle_timeout_seconds, 30);
        assert_eq!(cfg.max_placeholder_length, 25);
        assert_eq!(cfg.compliance_preset, CompliancePreset::Standard);
    }

    #[test]
    fn environment_overrides_apply() {
        unsafe {
            std::env::set_var("CLOAK_MAPPING_TTL_SECONDS", "60");
            std::env::set_var("CLOAK_INJECT_PROMPT", "false");
            std::env::set_var("CLOAK_COMPLIANCE_PRESET", "strict");
        }

        let cfg = ProxyConfig::from_env();
        assert_eq!(cfg.mapping_ttl_seconds, 60);
        assert!(!cfg.inject_prompt);
        assert_eq!(cfg.compliance_preset, CompliancePreset::Strict);

        unsafe {
            std::env::remove_var("CLOAK_MAPPING_TTL_SECONDS");
            std::env::remove_var("CLOAK_INJECT_PROMPT");
            std::env::remove_var("CLOAK_COMPLIANCE_PRESET");
        }
    }
}
