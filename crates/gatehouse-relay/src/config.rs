//! Relay configuration loaded from environment variables.
//!
//! Configuration is resolved once at startup. Any malformed value aborts
//! startup so the relay never serves with a partially applied policy.

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};
use gatehouse_core::PolicyLimits;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen port (1-65535).
    pub port: u16,

    /// Interface to listen on.
    pub bind_host: String,

    /// SQLite database path.
    pub db_path: PathBuf,

    /// Timeout applied to plain HTTP requests and the upgrade handshake.
    pub http_timeout: Duration,

    /// Relay name shown in the capability document and status page.
    pub name: String,

    /// Relay description.
    pub description: String,

    /// Operator public key (may be empty).
    pub pubkey: String,

    /// Allowed event kinds in configured order (empty = all).
    pub allowed_kinds: Vec<u16>,

    /// Author whitelist (empty = everyone).
    pub whitelisted_pubkeys: HashSet<String>,

    /// Maximum content length in bytes (0 = unlimited).
    pub max_content_length: usize,

    /// Maximum number of tags per event (0 = unlimited).
    pub max_event_tags: usize,

    /// Verbose logging, including per-event persistence notices.
    pub debug: bool,

    /// Prometheus `/metrics` port (0 = disabled).
    pub metrics_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3334,
            bind_host: "0.0.0.0".to_string(),
            db_path: PathBuf::from("./gatehouse.db"),
            http_timeout: Duration::from_secs(30),
            name: "Gatehouse Relay".to_string(),
            description: "A configurable Nostr relay for debugging and testing".to_string(),
            pubkey: String::new(),
            allowed_kinds: Vec::new(),
            whitelisted_pubkeys: HashSet::new(),
            max_content_length: 250_000,
            max_event_tags: 2000,
            debug: false,
            metrics_port: 0,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (all have defaults):
    /// - `RELAY_PORT`: Listen port (default: 3334)
    /// - `RELAY_BIND_HOST`: Listen interface (default: "0.0.0.0")
    /// - `RELAY_DB_PATH`: SQLite path (default: "./gatehouse.db")
    /// - `RELAY_HTTP_TIMEOUT`: e.g. "30s", "500ms", "2m" (default: "30s")
    /// - `RELAY_NAME`, `RELAY_DESCRIPTION`, `RELAY_PUBKEY`: Relay identity
    /// - `RELAY_ALLOWED_KINDS`: Comma-separated kinds (default: all)
    /// - `RELAY_WHITELIST_PUBKEYS`: Comma-separated hex pubkeys (default: everyone)
    /// - `RELAY_MAX_CONTENT_LENGTH`: Bytes, 0 = unlimited (default: 250000)
    /// - `RELAY_MAX_EVENT_TAGS`: 0 = unlimited (default: 2000)
    /// - `RELAY_DEBUG`: "true"/"false" (default: false)
    /// - `RELAY_METRICS_PORT`: 0 = disabled (default: 0)
    pub fn from_env() -> anyhow::Result<Self> {
        let port: u16 = parse_var("RELAY_PORT", 3334)?;
        if port == 0 {
            bail!("RELAY_PORT must be between 1 and 65535");
        }

        let bind_host = std::env::var("RELAY_BIND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let db_path = std::env::var("RELAY_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./gatehouse.db"));

        let http_timeout = match non_empty_var("RELAY_HTTP_TIMEOUT") {
            Some(raw) => parse_duration(&raw).context("invalid RELAY_HTTP_TIMEOUT")?,
            None => Duration::from_secs(30),
        };
        if http_timeout.is_zero() {
            bail!("RELAY_HTTP_TIMEOUT must be greater than zero");
        }

        let name = std::env::var("RELAY_NAME").unwrap_or_else(|_| "Gatehouse Relay".to_string());

        let description = std::env::var("RELAY_DESCRIPTION").unwrap_or_else(|_| {
            "A configurable Nostr relay for debugging and testing".to_string()
        });

        let pubkey = std::env::var("RELAY_PUBKEY").unwrap_or_default();

        let allowed_kinds = split_list(&std::env::var("RELAY_ALLOWED_KINDS").unwrap_or_default())
            .map(|s| {
                s.parse::<u16>()
                    .with_context(|| format!("invalid kind {s:?} in RELAY_ALLOWED_KINDS"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let whitelisted_pubkeys: HashSet<String> =
            split_list(&std::env::var("RELAY_WHITELIST_PUBKEYS").unwrap_or_default())
                .map(str::to_lowercase)
                .collect();

        let max_content_length = parse_var("RELAY_MAX_CONTENT_LENGTH", 250_000)?;
        let max_event_tags = parse_var("RELAY_MAX_EVENT_TAGS", 2000)?;

        let debug = match non_empty_var("RELAY_DEBUG") {
            Some(raw) => parse_bool(&raw).context("invalid RELAY_DEBUG")?,
            None => false,
        };

        let metrics_port = parse_var("RELAY_METRICS_PORT", 0)?;

        Ok(Self {
            port,
            bind_host,
            db_path,
            http_timeout,
            name,
            description,
            pubkey,
            allowed_kinds,
            whitelisted_pubkeys,
            max_content_length,
            max_event_tags,
            debug,
            metrics_port,
        })
    }

    /// Socket address to bind, e.g. "0.0.0.0:3334".
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    pub fn whitelist_enabled(&self) -> bool {
        !self.whitelisted_pubkeys.is_empty()
    }

    /// The subset of configuration the admission policy enforces.
    pub fn policy_limits(&self) -> PolicyLimits {
        PolicyLimits {
            max_content_length: self.max_content_length,
            max_event_tags: self.max_event_tags,
            allowed_kinds: self.allowed_kinds.clone(),
            whitelisted_pubkeys: self.whitelisted_pubkeys.clone(),
        }
    }

    /// Log the effective configuration. Whitelist members are not logged.
    pub fn log_summary(&self) {
        tracing::info!(
            bind_addr = %self.bind_addr(),
            db_path = %self.db_path.display(),
            http_timeout_ms = self.http_timeout.as_millis() as u64,
            name = %self.name,
            allowed_kinds = ?self.allowed_kinds,
            whitelist_size = self.whitelisted_pubkeys.len(),
            max_content_length = self.max_content_length,
            max_event_tags = self.max_event_tags,
            debug = self.debug,
            metrics_port = self.metrics_port,
            "relay configuration loaded"
        );
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty_var(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid {key}: {raw:?}")),
        None => Ok(default),
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Accepts the usual boolean spellings: 1/t/true and 0/f/false, any case.
fn parse_bool(raw: &str) -> anyhow::Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Ok(true),
        "0" | "f" | "false" => Ok(false),
        _ => bail!("expected a boolean, got {raw:?}"),
    }
}

/// Parses "<n>ms", "<n>s", "<n>m", "<n>h" or a bare number of seconds.
fn parse_duration(raw: &str) -> anyhow::Result<Duration> {
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits
        .parse()
        .with_context(|| format!("expected a duration like \"30s\", got {raw:?}"))?;

    let duration = match unit {
        "" | "s" => Duration::from_secs(value),
        "ms" => Duration::from_millis(value),
        "m" => Duration::from_secs(value * 60),
        "h" => Duration::from_secs(value * 3600),
        _ => bail!("unknown duration unit {unit:?} in {raw:?}"),
    };
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize config tests that manipulate env vars.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "RELAY_PORT",
        "RELAY_BIND_HOST",
        "RELAY_DB_PATH",
        "RELAY_HTTP_TIMEOUT",
        "RELAY_NAME",
        "RELAY_DESCRIPTION",
        "RELAY_PUBKEY",
        "RELAY_ALLOWED_KINDS",
        "RELAY_WHITELIST_PUBKEYS",
        "RELAY_MAX_CONTENT_LENGTH",
        "RELAY_MAX_EVENT_TAGS",
        "RELAY_DEBUG",
        "RELAY_METRICS_PORT",
    ];

    /// Run `f` with exactly `vars` set among the relay keys.
    fn with_env_vars<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());

        let saved: Vec<_> = ENV_KEYS
            .iter()
            .map(|k| (*k, std::env::var(k).ok()))
            .collect();

        // SAFETY: Serialized by mutex; only test code touches these vars.
        unsafe {
            for k in ENV_KEYS {
                std::env::remove_var(k);
            }
            for (k, v) in vars {
                std::env::set_var(k, v);
            }
        }

        f();

        // SAFETY: Restoring original env state.
        unsafe {
            for (k, v) in &saved {
                match v {
                    Some(val) => std::env::set_var(k, val),
                    None => std::env::remove_var(k),
                }
            }
        }
    }

    #[test]
    fn config_defaults() {
        with_env_vars(&[], || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.port, 3334);
            assert_eq!(config.bind_addr(), "0.0.0.0:3334");
            assert_eq!(config.db_path, PathBuf::from("./gatehouse.db"));
            assert_eq!(config.http_timeout, Duration::from_secs(30));
            assert_eq!(config.name, "Gatehouse Relay");
            assert!(config.pubkey.is_empty());
            assert!(config.allowed_kinds.is_empty());
            assert!(!config.whitelist_enabled());
            assert_eq!(config.max_content_length, 250_000);
            assert_eq!(config.max_event_tags, 2000);
            assert!(!config.debug);
            assert_eq!(config.metrics_port, 0);

            let default = Config::default();
            assert_eq!(config.description, default.description);
            assert_eq!(config.policy_limits(), default.policy_limits());
        });
    }

    #[test]
    fn config_custom_values() {
        with_env_vars(
            &[
                ("RELAY_PORT", "7777"),
                ("RELAY_DB_PATH", "/tmp/relay.db"),
                ("RELAY_HTTP_TIMEOUT", "500ms"),
                ("RELAY_NAME", "Test Relay"),
                ("RELAY_DESCRIPTION", "for tests"),
                ("RELAY_PUBKEY", "abcd"),
                ("RELAY_ALLOWED_KINDS", "1, 30023,7"),
                ("RELAY_WHITELIST_PUBKEYS", "AAA,bbb,,"),
                ("RELAY_MAX_CONTENT_LENGTH", "0"),
                ("RELAY_MAX_EVENT_TAGS", "10"),
                ("RELAY_DEBUG", "TRUE"),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.port, 7777);
                assert_eq!(config.db_path, PathBuf::from("/tmp/relay.db"));
                assert_eq!(config.http_timeout, Duration::from_millis(500));
                assert_eq!(config.name, "Test Relay");
                assert_eq!(config.description, "for tests");
                assert_eq!(config.pubkey, "abcd");
                assert_eq!(config.allowed_kinds, vec![1, 30023, 7]);
                assert_eq!(config.whitelisted_pubkeys.len(), 2);
                assert!(config.whitelisted_pubkeys.contains("aaa"));
                assert_eq!(config.max_content_length, 0);
                assert_eq!(config.max_event_tags, 10);
                assert!(config.debug);
            },
        );
    }

    #[test]
    fn config_empty_lists_mean_no_restriction() {
        with_env_vars(
            &[("RELAY_ALLOWED_KINDS", ""), ("RELAY_WHITELIST_PUBKEYS", " , ")],
            || {
                let limits = Config::from_env().unwrap().policy_limits();
                assert!(limits.allowed_kinds.is_empty());
                assert!(!limits.whitelist_enabled());
            },
        );
    }

    #[test]
    fn config_rejects_port_zero() {
        with_env_vars(&[("RELAY_PORT", "0")], || {
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    fn config_rejects_port_out_of_range() {
        with_env_vars(&[("RELAY_PORT", "70000")], || {
            let err = Config::from_env().unwrap_err();
            assert!(err.to_string().contains("RELAY_PORT"));
        });
    }

    #[test]
    fn config_rejects_malformed_kind() {
        with_env_vars(&[("RELAY_ALLOWED_KINDS", "1,two,3")], || {
            let err = Config::from_env().unwrap_err();
            assert!(err.to_string().contains("RELAY_ALLOWED_KINDS"));
        });
    }

    #[test]
    fn config_rejects_negative_limit() {
        with_env_vars(&[("RELAY_MAX_EVENT_TAGS", "-1")], || {
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    fn config_rejects_bad_bool() {
        with_env_vars(&[("RELAY_DEBUG", "yes please")], || {
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    fn config_rejects_zero_timeout() {
        with_env_vars(&[("RELAY_HTTP_TIMEOUT", "0s")], || {
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    fn policy_limits_mirror_config() {
        with_env_vars(
            &[
                ("RELAY_ALLOWED_KINDS", "1"),
                ("RELAY_WHITELIST_PUBKEYS", "abc"),
                ("RELAY_MAX_CONTENT_LENGTH", "100"),
                ("RELAY_MAX_EVENT_TAGS", "5"),
            ],
            || {
                let limits = Config::from_env().unwrap().policy_limits();
                assert_eq!(limits.allowed_kinds, vec![1]);
                assert!(limits.whitelisted_pubkeys.contains("abc"));
                assert_eq!(limits.max_content_length, 100);
                assert_eq!(limits.max_event_tags, 5);
            },
        );
    }

    #[test]
    fn duration_parsing() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn bool_parsing() {
        for raw in ["1", "t", "T", "true", "True", "TRUE"] {
            assert!(parse_bool(raw).unwrap(), "{raw}");
        }
        for raw in ["0", "f", "F", "false", "False"] {
            assert!(!parse_bool(raw).unwrap(), "{raw}");
        }
        assert!(parse_bool("on").is_err());
    }
}
