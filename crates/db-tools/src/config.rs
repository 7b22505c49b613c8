//! Server configuration: defaults, environment, and command-line overrides.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::level_filters::LevelFilter;

use crate::error::{CoreError, CoreResult};
use crate::tools::CoordinatorConfig;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9001;
pub const DEFAULT_MOUNT_PATH: &str = "/db-tools";
pub const DEFAULT_LOG_FILE: &str = "logs/db_tools.log";
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

const DEFAULT_ALLOWED_ORIGINS: [&str; 6] = [
    "http://localhost",
    "http://127.0.0.1",
    "http://*",
    "https://localhost",
    "https://127.0.0.1",
    "vscode-file://vscode-app",
];
const DEFAULT_ALLOWED_HOSTS: [&str; 2] = ["localhost", "127.0.0.1"];

/// Wire transport served at the mount path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Plain request/response JSON over HTTP.
    Http,
}

impl FromStr for Transport {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "http" | "streamable-http" | "streamable_http" => Ok(Transport::Http),
            other => Err(CoreError::InvalidConfig(format!(
                "unsupported transport '{other}' (expected 'http')"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    pub level: LevelFilter,
    pub third_party_level: LevelFilter,
    /// `None` disables file output.
    pub file: Option<PathBuf>,
    pub max_bytes: u64,
    pub backup_count: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            third_party_level: LevelFilter::WARN,
            file: Some(PathBuf::from(DEFAULT_LOG_FILE)),
            max_bytes: 10 * 1024 * 1024,
            backup_count: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub transport: Transport,
    /// Normalized mount path: leading `/`, no trailing `/` (except root).
    pub path: String,
    /// Leave mutating tools out of the registry.
    pub read_only: bool,
    pub limits: CoordinatorConfig,
    pub allowed_origins: Vec<String>,
    /// Accepted `Host` header values; `*` accepts any.
    pub allowed_hosts: Vec<String>,
    /// How long in-flight requests may run after a shutdown signal.
    pub shutdown_grace: Duration,
    pub log: LogConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            transport: Transport::Http,
            path: DEFAULT_MOUNT_PATH.to_string(),
            read_only: true,
            limits: CoordinatorConfig::default(),
            allowed_origins: DEFAULT_ALLOWED_ORIGINS.iter().map(|s| s.to_string()).collect(),
            allowed_hosts: DEFAULT_ALLOWED_HOSTS.iter().map(|s| s.to_string()).collect(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            log: LogConfig::default(),
        }
    }
}

/// Values supplied on the command line; they win over the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub transport: Option<String>,
    pub path: Option<String>,
}

impl ServerConfig {
    /// Load from the process environment (call `dotenvy` first to pick up `.env`).
    pub fn from_env() -> CoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve variables; unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> CoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = ServerConfig::default();

        if let Some(host) = get("DB_TOOLS_HOST") {
            config.host = host.trim().to_string();
        }
        if let Some(port) = get("DB_TOOLS_PORT") {
            config.port = parse_number("DB_TOOLS_PORT", &port)?;
        }
        if let Some(transport) = get("DB_TOOLS_TRANSPORT") {
            config.transport = transport.parse()?;
        }
        if let Some(path) = get("DB_TOOLS_PATH") {
            config.path = normalize_mount_path(&path)?;
        }
        if let Some(read_only) = get("MCP_READ_ONLY") {
            config.read_only = parse_bool("MCP_READ_ONLY", &read_only)?;
        }

        if let Some(size) = get("MCP_MAX_POOL_SIZE") {
            config.limits.global_concurrency = parse_limit("MCP_MAX_POOL_SIZE", &size)?;
        }
        if let Some(size) = get("DB_TOOLS_TOOL_CONCURRENCY") {
            config.limits.tool_concurrency = parse_limit("DB_TOOLS_TOOL_CONCURRENCY", &size)?;
        }
        if let Some(depth) = get("DB_TOOLS_QUEUE_DEPTH") {
            config.limits.queue_depth = parse_number("DB_TOOLS_QUEUE_DEPTH", &depth)?;
        }
        if let Some(ms) = get("DB_TOOLS_TIMEOUT_MS") {
            let ms: u64 = parse_number("DB_TOOLS_TIMEOUT_MS", &ms)?;
            if ms == 0 {
                return Err(CoreError::InvalidConfig(
                    "DB_TOOLS_TIMEOUT_MS must be greater than zero".to_string(),
                ));
            }
            config.limits.default_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = get("DB_TOOLS_SHUTDOWN_GRACE_MS") {
            let ms: u64 = parse_number("DB_TOOLS_SHUTDOWN_GRACE_MS", &ms)?;
            config.shutdown_grace = Duration::from_millis(ms);
        }

        if let Some(origins) = get("ALLOWED_ORIGINS") {
            config.allowed_origins = split_list(&origins);
        }
        if let Some(hosts) = get("ALLOWED_HOSTS") {
            config.allowed_hosts = split_list(&hosts);
        }

        if let Some(level) = get("LOG_LEVEL") {
            config.log.level = parse_level("LOG_LEVEL", &level)?;
        }
        if let Some(level) = get("THIRD_PARTY_LOG_LEVEL") {
            config.log.third_party_level = parse_level("THIRD_PARTY_LOG_LEVEL", &level)?;
        }
        // An explicitly empty LOG_FILE turns file logging off.
        if let Some(file) = lookup("LOG_FILE") {
            let file = file.trim();
            config.log.file = (!file.is_empty()).then(|| PathBuf::from(file));
        }
        if let Some(bytes) = get("LOG_MAX_BYTES") {
            config.log.max_bytes = parse_number("LOG_MAX_BYTES", &bytes)?;
        }
        if let Some(count) = get("LOG_BACKUP_COUNT") {
            config.log.backup_count = parse_number("LOG_BACKUP_COUNT", &count)?;
        }

        Ok(config)
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> CoreResult<Self> {
        if let Some(host) = overrides.host {
            self.host = host;
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(transport) = overrides.transport {
            self.transport = transport.parse()?;
        }
        if let Some(path) = overrides.path {
            self.path = normalize_mount_path(&path)?;
        }
        Ok(self)
    }

    /// `host:port` as given; resolved by the listener.
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Strip trailing `/` from an absolute mount path.
pub fn normalize_mount_path(raw: &str) -> CoreResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidConfig("mount path must not be empty".to_string()));
    }
    if !trimmed.starts_with('/') || trimmed.contains(['?', '#', ' ']) {
        return Err(CoreError::InvalidConfig(format!("invalid mount path '{trimmed}'")));
    }
    let body = trimmed.trim_matches('/');
    if body.is_empty() {
        return Ok("/".to_string());
    }
    if body.split('/').any(|segment| segment.is_empty() || segment.starts_with(':') || segment.starts_with('*')) {
        return Err(CoreError::InvalidConfig(format!("invalid mount path '{trimmed}'")));
    }
    Ok(format!("/{body}"))
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> CoreResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| CoreError::InvalidConfig(format!("{key} must be a number, got '{raw}'")))
}

fn parse_limit(key: &str, raw: &str) -> CoreResult<usize> {
    let value: usize = parse_number(key, raw)?;
    if value == 0 {
        return Err(CoreError::InvalidConfig(format!("{key} must be greater than zero")));
    }
    Ok(value)
}

fn parse_bool(key: &str, raw: &str) -> CoreResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(CoreError::InvalidConfig(format!("{key} must be true or false, got '{raw}'"))),
    }
}

/// Accepts both `tracing` names and the `WARNING`/`CRITICAL` spellings.
pub fn parse_level(key: &str, raw: &str) -> CoreResult<LevelFilter> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Ok(LevelFilter::TRACE),
        "DEBUG" => Ok(LevelFilter::DEBUG),
        "INFO" => Ok(LevelFilter::INFO),
        "WARN" | "WARNING" => Ok(LevelFilter::WARN),
        "ERROR" | "CRITICAL" => Ok(LevelFilter::ERROR),
        "OFF" => Ok(LevelFilter::OFF),
        _ => Err(CoreError::InvalidConfig(format!("{key}: unknown log level '{raw}'"))),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(|item| item.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> CoreResult<ServerConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_match_deployment() {
        let config = load(&[]).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:9001");
        assert_eq!(config.path, "/db-tools");
        assert_eq!(config.transport, Transport::Http);
        assert!(config.read_only);
        assert_eq!(config.limits.global_concurrency, 10);
        assert_eq!(config.allowed_hosts, vec!["localhost", "127.0.0.1"]);
        assert_eq!(config.log.level, LevelFilter::INFO);
        assert_eq!(config.log.file, Some(PathBuf::from("logs/db_tools.log")));
        assert_eq!(config.shutdown_grace, Duration::from_secs(30));
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = load(&[
            ("DB_TOOLS_PORT", "8080"),
            ("DB_TOOLS_PATH", "/tools/"),
            ("MCP_READ_ONLY", "false"),
            ("MCP_MAX_POOL_SIZE", "3"),
            ("DB_TOOLS_QUEUE_DEPTH", "0"),
            ("DB_TOOLS_TIMEOUT_MS", "1500"),
            ("DB_TOOLS_SHUTDOWN_GRACE_MS", "250"),
            ("ALLOWED_HOSTS", "db.internal, localhost ,"),
            ("LOG_LEVEL", "warning"),
            ("THIRD_PARTY_LOG_LEVEL", "CRITICAL"),
            ("LOG_MAX_BYTES", "1024"),
            ("LOG_BACKUP_COUNT", "2"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.path, "/tools");
        assert!(!config.read_only);
        assert_eq!(config.limits.global_concurrency, 3);
        assert_eq!(config.limits.queue_depth, 0);
        assert_eq!(config.limits.default_timeout, Duration::from_millis(1500));
        assert_eq!(config.shutdown_grace, Duration::from_millis(250));
        assert_eq!(config.allowed_hosts, vec!["db.internal", "localhost"]);
        assert_eq!(config.log.level, LevelFilter::WARN);
        assert_eq!(config.log.third_party_level, LevelFilter::ERROR);
        assert_eq!(config.log.max_bytes, 1024);
        assert_eq!(config.log.backup_count, 2);
    }

    #[test]
    fn empty_log_file_disables_file_output() {
        let config = load(&[("LOG_FILE", "")]).unwrap();
        assert_eq!(config.log.file, None);
    }

    #[test]
    fn invalid_values_are_rejected() {
        for vars in [
            [("DB_TOOLS_PORT", "ninety")],
            [("MCP_MAX_POOL_SIZE", "0")],
            [("MCP_READ_ONLY", "maybe")],
            [("LOG_LEVEL", "LOUD")],
            [("DB_TOOLS_TRANSPORT", "sse")],
            [("DB_TOOLS_TIMEOUT_MS", "0")],
            [("DB_TOOLS_SHUTDOWN_GRACE_MS", "-1")],
            [("DB_TOOLS_PATH", "/a//b")],
        ] {
            assert!(
                matches!(load(&vars), Err(CoreError::InvalidConfig(_))),
                "{vars:?} should be rejected"
            );
        }
    }

    #[test]
    fn cli_overrides_win() {
        let config = load(&[("DB_TOOLS_HOST", "10.0.0.1"), ("DB_TOOLS_PORT", "8000")])
            .unwrap()
            .with_overrides(ConfigOverrides {
                host: Some("127.0.0.1".to_string()),
                port: Some(9100),
                transport: Some("streamable-http".to_string()),
                path: Some("/db".to_string()),
            })
            .unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:9100");
        assert_eq!(config.path, "/db");
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        let config = ServerConfig {
            host: "::".to_string(),
            ..ServerConfig::default()
        };
        assert_eq!(config.bind_addr(), "[::]:9001");
    }

    #[test]
    fn mount_path_normalization() {
        assert_eq!(normalize_mount_path("/db-tools").unwrap(), "/db-tools");
        assert_eq!(normalize_mount_path("/db-tools/").unwrap(), "/db-tools");
        assert!(normalize_mount_path("db-tools").is_err());
        assert_eq!(normalize_mount_path("/api/v1/").unwrap(), "/api/v1");
        assert_eq!(normalize_mount_path("/").unwrap(), "/");
        assert!(normalize_mount_path("  ").is_err());
        assert!(normalize_mount_path("/a b").is_err());
        assert!(normalize_mount_path("/:tool").is_err());
    }

    #[test]
    fn transport_parsing() {
        assert_eq!("HTTP".parse::<Transport>().unwrap(), Transport::Http);
        assert!("stdio".parse::<Transport>().is_err());
    }
}
