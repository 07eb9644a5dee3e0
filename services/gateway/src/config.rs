use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

// Gateway configuration sourced from environment variables, with YAML overrides.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    // TCP listener for producer sessions.
    pub listen_bind: SocketAddr,
    // Metrics HTTP listener bind address.
    pub metrics_bind: SocketAddr,
    // Max frame payload accepted from producers.
    pub max_frame_bytes: usize,
    // Session tunables shared by every connection.
    pub session: SessionConfig,
    // Token verification settings; no secret means tokens cannot be verified.
    pub token_issuer: String,
    pub token_audience: String,
    pub token_secret: Option<String>,
    pub token_leeway_secs: u64,
    // YAML topic catalogue served by the in-process directory.
    pub topics_file: Option<PathBuf>,
}

/// Per-session limits and policies.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_bytes_inflight: u64,
    pub max_reserve_requests_inflight: usize,
    pub require_credentials: bool,
    pub round_robin_partition_mapping: bool,
    pub binding_store_enabled: bool,
    // Period of the session wakeup timer.
    pub acl_check_interval: Duration,
    // Minimum spacing between two ACL re-checks.
    pub acl_retry_timeout: Duration,
    pub binding_refresh_interval: Duration,
    pub session_log_period: Duration,
    pub max_binding_retries: u32,
    // Cluster name reported in init acknowledgments.
    pub cluster: String,
}

pub const DEFAULT_MAX_BYTES_INFLIGHT: u64 = 1024 * 1024;
pub const DEFAULT_MAX_RESERVE_REQUESTS_INFLIGHT: usize = 5;
const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_ACL_CHECK_INTERVAL_MS: u64 = 5_000;
const DEFAULT_ACL_RETRY_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_BINDING_REFRESH_INTERVAL_MS: u64 = 60 * 60 * 1000;
const DEFAULT_SESSION_LOG_PERIOD_MS: u64 = 60 * 60 * 1000;
const DEFAULT_MAX_BINDING_RETRIES: u32 = 3;
const DEFAULT_TOKEN_LEEWAY_SECS: u64 = 30;

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_bytes_inflight: DEFAULT_MAX_BYTES_INFLIGHT,
            max_reserve_requests_inflight: DEFAULT_MAX_RESERVE_REQUESTS_INFLIGHT,
            require_credentials: false,
            round_robin_partition_mapping: true,
            binding_store_enabled: true,
            acl_check_interval: Duration::from_millis(DEFAULT_ACL_CHECK_INTERVAL_MS),
            acl_retry_timeout: Duration::from_millis(DEFAULT_ACL_RETRY_TIMEOUT_MS),
            binding_refresh_interval: Duration::from_millis(DEFAULT_BINDING_REFRESH_INTERVAL_MS),
            session_log_period: Duration::from_millis(DEFAULT_SESSION_LOG_PERIOD_MS),
            max_binding_retries: DEFAULT_MAX_BINDING_RETRIES,
            cluster: "local".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GatewayConfigOverride {
    listen_bind: Option<String>,
    metrics_bind: Option<String>,
    max_frame_bytes: Option<usize>,
    max_bytes_inflight: Option<u64>,
    max_reserve_requests_inflight: Option<usize>,
    require_credentials: Option<bool>,
    round_robin_partition_mapping: Option<bool>,
    binding_store_enabled: Option<bool>,
    acl_check_interval_ms: Option<u64>,
    acl_retry_timeout_ms: Option<u64>,
    binding_refresh_interval_ms: Option<u64>,
    session_log_period_ms: Option<u64>,
    max_binding_retries: Option<u32>,
    cluster: Option<String>,
    token_issuer: Option<String>,
    token_audience: Option<String>,
    token_secret: Option<String>,
    token_leeway_secs: Option<u64>,
    topics_file: Option<PathBuf>,
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_positive<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + Default,
{
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .filter(|value| *value > T::default())
        .unwrap_or(default)
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let listen_bind = std::env::var("SLUICE_LISTEN_BIND")
            .unwrap_or_else(|_| "0.0.0.0:7400".to_string())
            .parse()
            .with_context(|| "parse SLUICE_LISTEN_BIND")?;
        let metrics_bind = std::env::var("SLUICE_METRICS_BIND")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .with_context(|| "parse SLUICE_METRICS_BIND")?;
        let session = SessionConfig {
            max_bytes_inflight: env_positive(
                "SLUICE_MAX_BYTES_INFLIGHT",
                DEFAULT_MAX_BYTES_INFLIGHT,
            ),
            max_reserve_requests_inflight: env_positive(
                "SLUICE_MAX_RESERVE_REQUESTS_INFLIGHT",
                DEFAULT_MAX_RESERVE_REQUESTS_INFLIGHT,
            ),
            require_credentials: env_flag("SLUICE_REQUIRE_CREDENTIALS", false),
            round_robin_partition_mapping: env_flag("SLUICE_ROUND_ROBIN_PARTITIONS", true),
            binding_store_enabled: env_flag("SLUICE_BINDING_STORE_ENABLED", true),
            acl_check_interval: Duration::from_millis(env_positive(
                "SLUICE_ACL_CHECK_INTERVAL_MS",
                DEFAULT_ACL_CHECK_INTERVAL_MS,
            )),
            acl_retry_timeout: Duration::from_millis(env_positive(
                "SLUICE_ACL_RETRY_TIMEOUT_MS",
                DEFAULT_ACL_RETRY_TIMEOUT_MS,
            )),
            binding_refresh_interval: Duration::from_millis(env_positive(
                "SLUICE_BINDING_REFRESH_INTERVAL_MS",
                DEFAULT_BINDING_REFRESH_INTERVAL_MS,
            )),
            session_log_period: Duration::from_millis(env_positive(
                "SLUICE_SESSION_LOG_PERIOD_MS",
                DEFAULT_SESSION_LOG_PERIOD_MS,
            )),
            max_binding_retries: env_positive(
                "SLUICE_MAX_BINDING_RETRIES",
                DEFAULT_MAX_BINDING_RETRIES,
            ),
            cluster: std::env::var("SLUICE_CLUSTER").unwrap_or_else(|_| "local".to_string()),
        };
        Ok(Self {
            listen_bind,
            metrics_bind,
            max_frame_bytes: env_positive("SLUICE_MAX_FRAME_BYTES", DEFAULT_MAX_FRAME_BYTES),
            session,
            token_issuer: std::env::var("SLUICE_TOKEN_ISSUER")
                .unwrap_or_else(|_| "sluice-auth".to_string()),
            token_audience: std::env::var("SLUICE_TOKEN_AUDIENCE")
                .unwrap_or_else(|_| "sluice-gateway".to_string()),
            token_secret: std::env::var("SLUICE_TOKEN_SECRET")
                .ok()
                .filter(|value| !value.is_empty()),
            token_leeway_secs: std::env::var("SLUICE_TOKEN_LEEWAY_SECS")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(DEFAULT_TOKEN_LEEWAY_SECS),
            topics_file: std::env::var("SLUICE_TOPICS_FILE").ok().map(PathBuf::from),
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("SLUICE_GATEWAY_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read SLUICE_GATEWAY_CONFIG: {path}"))?;
            let override_cfg: GatewayConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse gateway config yaml")?;
            config.apply(override_cfg)?;
        }
        Ok(config)
    }

    fn apply(&mut self, over: GatewayConfigOverride) -> Result<()> {
        if let Some(value) = over.listen_bind {
            self.listen_bind = value.parse().with_context(|| "parse listen_bind")?;
        }
        if let Some(value) = over.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = over.max_frame_bytes
            && value > 0
        {
            self.max_frame_bytes = value;
        }
        let session = &mut self.session;
        if let Some(value) = over.max_bytes_inflight
            && value > 0
        {
            session.max_bytes_inflight = value;
        }
        if let Some(value) = over.max_reserve_requests_inflight
            && value > 0
        {
            session.max_reserve_requests_inflight = value;
        }
        if let Some(value) = over.require_credentials {
            session.require_credentials = value;
        }
        if let Some(value) = over.round_robin_partition_mapping {
            session.round_robin_partition_mapping = value;
        }
        if let Some(value) = over.binding_store_enabled {
            session.binding_store_enabled = value;
        }
        if let Some(value) = over.acl_check_interval_ms
            && value > 0
        {
            session.acl_check_interval = Duration::from_millis(value);
        }
        if let Some(value) = over.acl_retry_timeout_ms {
            session.acl_retry_timeout = Duration::from_millis(value);
        }
        if let Some(value) = over.binding_refresh_interval_ms
            && value > 0
        {
            session.binding_refresh_interval = Duration::from_millis(value);
        }
        if let Some(value) = over.session_log_period_ms
            && value > 0
        {
            session.session_log_period = Duration::from_millis(value);
        }
        if let Some(value) = over.max_binding_retries {
            session.max_binding_retries = value;
        }
        if let Some(value) = over.cluster {
            session.cluster = value;
        }
        if let Some(value) = over.token_issuer {
            self.token_issuer = value;
        }
        if let Some(value) = over.token_audience {
            self.token_audience = value;
        }
        if let Some(value) = over.token_secret {
            self.token_secret = Some(value).filter(|secret| !secret.is_empty());
        }
        if let Some(value) = over.token_leeway_secs {
            self.token_leeway_secs = value;
        }
        if let Some(value) = over.topics_file {
            self.topics_file = Some(value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    struct EnvGuard {
        key: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prev = std::env::var(key).ok();
            unsafe {
                std::env::set_var(key, value);
            }
            Self { key, prev }
        }

        fn unset(key: &'static str) -> Self {
            let prev = std::env::var(key).ok();
            unsafe {
                std::env::remove_var(key);
            }
            Self { key, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.prev {
                Some(value) => unsafe {
                    std::env::set_var(self.key, value);
                },
                None => unsafe {
                    std::env::remove_var(self.key);
                },
            }
        }
    }

    #[test]
    #[serial]
    fn defaults_without_env() -> Result<()> {
        let _g1 = EnvGuard::unset("SLUICE_LISTEN_BIND");
        let _g2 = EnvGuard::unset("SLUICE_MAX_BYTES_INFLIGHT");
        let _g3 = EnvGuard::unset("SLUICE_REQUIRE_CREDENTIALS");
        let _g4 = EnvGuard::unset("SLUICE_TOKEN_SECRET");
        let _g5 = EnvGuard::unset("SLUICE_GATEWAY_CONFIG");
        let config = GatewayConfig::from_env_or_yaml()?;
        assert_eq!(config.listen_bind.port(), 7400);
        assert_eq!(config.session.max_bytes_inflight, 1024 * 1024);
        assert_eq!(config.session.max_reserve_requests_inflight, 5);
        assert_eq!(config.session.max_binding_retries, 3);
        assert!(!config.session.require_credentials);
        assert!(config.session.binding_store_enabled);
        assert!(config.token_secret.is_none());
        Ok(())
    }

    #[test]
    #[serial]
    fn env_values_and_invalid_fallbacks() -> Result<()> {
        let _g1 = EnvGuard::set("SLUICE_MAX_BYTES_INFLIGHT", "4096");
        let _g2 = EnvGuard::set("SLUICE_MAX_RESERVE_REQUESTS_INFLIGHT", "0");
        let _g3 = EnvGuard::set("SLUICE_REQUIRE_CREDENTIALS", "yes");
        let _g4 = EnvGuard::set("SLUICE_ACL_CHECK_INTERVAL_MS", "not-a-number");
        let _g5 = EnvGuard::unset("SLUICE_GATEWAY_CONFIG");
        let config = GatewayConfig::from_env()?;
        assert_eq!(config.session.max_bytes_inflight, 4096);
        assert_eq!(config.session.max_reserve_requests_inflight, 5);
        assert!(config.session.require_credentials);
        assert_eq!(
            config.session.acl_check_interval,
            Duration::from_millis(DEFAULT_ACL_CHECK_INTERVAL_MS)
        );
        Ok(())
    }

    #[test]
    #[serial]
    fn invalid_bind_is_an_error() {
        let _g1 = EnvGuard::set("SLUICE_LISTEN_BIND", "nowhere");
        let err = GatewayConfig::from_env().expect_err("bad bind");
        assert!(err.to_string().contains("SLUICE_LISTEN_BIND"));
    }

    #[test]
    #[serial]
    fn yaml_overrides_env() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("sluice-config-{}", std::process::id()));
        fs::create_dir_all(&dir)?;
        let path = dir.join("gateway.yaml");
        fs::write(
            &path,
            "listen_bind: \"127.0.0.1:7500\"\nmax_bytes_inflight: 2048\nbinding_store_enabled: false\nmax_reserve_requests_inflight: 0\ntoken_secret: \"s3cret\"\ncluster: dc1\n",
        )?;
        let _g1 = EnvGuard::set("SLUICE_GATEWAY_CONFIG", path.to_str().expect("utf8 path"));
        let _g2 = EnvGuard::set("SLUICE_MAX_BYTES_INFLIGHT", "4096");
        let config = GatewayConfig::from_env_or_yaml()?;
        assert_eq!(config.listen_bind.port(), 7500);
        assert_eq!(config.session.max_bytes_inflight, 2048);
        assert!(!config.session.binding_store_enabled);
        assert_eq!(config.session.max_reserve_requests_inflight, 5);
        assert_eq!(config.token_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.session.cluster, "dc1");
        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    #[serial]
    fn missing_yaml_file_is_an_error() {
        let _g1 = EnvGuard::set("SLUICE_GATEWAY_CONFIG", "/nonexistent/sluice.yaml");
        let err = GatewayConfig::from_env_or_yaml().expect_err("missing file");
        assert!(err.to_string().contains("SLUICE_GATEWAY_CONFIG"));
    }
}
