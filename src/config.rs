//! Configuration module for the quiz server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::generator::GeneratorLimits;
use crate::session::SessionTimeouts;
use clap::Parser;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the quiz server
#[derive(Parser, Debug)]
#[command(name = "calc-quiz")]
#[command(version = "0.1.0")]
#[command(about = "Serves one arithmetic assignment per TCP connection", long_about = None)]
pub struct CliArgs {
    /// Address to listen on, as <host>:<port> (IPv6 literals are not supported)
    pub listen: Option<String>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Listen backlog for connections waiting behind the active session
    #[arg(short, long)]
    pub backlog: Option<i32>,

    /// Seconds a client has to answer an assignment
    #[arg(short = 't', long)]
    pub response_timeout: Option<u64>,

    /// Seconds a client has to acknowledge the greeting (default: no limit)
    #[arg(long)]
    pub handshake_timeout: Option<u64>,

    /// Seed for the problem generator (default: from OS entropy)
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    pub listen: Option<String>,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: None,
            backlog: default_backlog(),
        }
    }
}

/// Session deadlines in seconds
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_response_timeout")]
    pub response_timeout: u64,
    pub handshake_timeout: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout: default_response_timeout(),
            handshake_timeout: None,
        }
    }
}

/// Problem generator configuration
#[derive(Debug, Deserialize)]
pub struct GeneratorConfig {
    pub seed: Option<u64>,
    #[serde(default = "default_integer_max")]
    pub integer_max: i32,
    #[serde(default = "default_real_max")]
    pub real_max: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: None,
            integer_max: default_integer_max(),
            real_max: default_real_max(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_backlog() -> i32 {
    5
}

fn default_response_timeout() -> u64 {
    5
}

fn default_integer_max() -> i32 {
    GeneratorLimits::default().integer_max
}

fn default_real_max() -> f64 {
    GeneratorLimits::default().real_max
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A `<host>:<port>` listen address, split at the first colon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenSpec {
    pub host: String,
    pub port: u16,
}

impl ListenSpec {
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidListen(spec.to_string(), reason.to_string());

        let (host, port) = spec
            .split_once(':')
            .ok_or_else(|| invalid("expected <host>:<port>"))?;

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        if port.contains(':') {
            return Err(invalid("IPv6 literals are not supported"));
        }

        let port = port
            .parse()
            .map_err(|_| invalid("port must be a number between 0 and 65535"))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ListenSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: ListenSpec,
    pub backlog: i32,
    pub timeouts: SessionTimeouts,
    pub seed: Option<u64>,
    pub limits: GeneratorLimits,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::try_parse().map_err(ConfigError::Cli)?;

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence) and validate.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = cli
            .listen
            .or(toml_config.server.listen)
            .ok_or(ConfigError::MissingListen)?;

        let response_timeout = cli
            .response_timeout
            .unwrap_or(toml_config.session.response_timeout);
        if response_timeout == 0 {
            return Err(ConfigError::Invalid(
                "response timeout must be at least 1 second".to_string(),
            ));
        }

        let backlog = cli.backlog.unwrap_or(toml_config.server.backlog);
        if backlog < 1 {
            return Err(ConfigError::Invalid("backlog must be positive".to_string()));
        }

        let limits = GeneratorLimits {
            integer_max: toml_config.generator.integer_max,
            real_max: toml_config.generator.real_max,
        };
        if limits.integer_max < 2 {
            return Err(ConfigError::Invalid(
                "generator.integer_max must be at least 2".to_string(),
            ));
        }
        if !limits.real_max.is_finite() || limits.real_max <= 0.0 {
            return Err(ConfigError::Invalid(
                "generator.real_max must be a positive number".to_string(),
            ));
        }

        Ok(Config {
            listen: ListenSpec::parse(&listen)?,
            backlog,
            timeouts: SessionTimeouts {
                handshake: cli
                    .handshake_timeout
                    .or(toml_config.session.handshake_timeout)
                    .map(Duration::from_secs),
                response: Duration::from_secs(response_timeout),
            },
            seed: cli.seed.or(toml_config.generator.seed),
            limits,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    Cli(clap::Error),
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    MissingListen,
    InvalidListen(String, String),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Cli(e) => write!(f, "{}", e),
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::MissingListen => {
                write!(f, "No listen address given (expected <host>:<port>)")
            }
            ConfigError::InvalidListen(spec, reason) => {
                write!(f, "Invalid listen address '{}': {}", spec, reason)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("calc-quiz").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, None);
        assert_eq!(config.server.backlog, 5);
        assert_eq!(config.session.response_timeout, 5);
        assert_eq!(config.session.handshake_timeout, None);
        assert_eq!(config.generator.integer_max, 100);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:5000"
            backlog = 16

            [session]
            response_timeout = 10
            handshake_timeout = 30

            [generator]
            seed = 99
            integer_max = 1000
            real_max = 10.0

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.as_deref(), Some("0.0.0.0:5000"));
        assert_eq!(config.server.backlog, 16);
        assert_eq!(config.session.response_timeout, 10);
        assert_eq!(config.session.handshake_timeout, Some(30));
        assert_eq!(config.generator.seed, Some(99));
        assert_eq!(config.generator.integer_max, 1000);
        assert_eq!(config.generator.real_max, 10.0);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_positional_listen_only() {
        let config = Config::merge(cli(&["localhost:5000"]), TomlConfig::default()).unwrap();
        assert_eq!(
            config.listen,
            ListenSpec {
                host: "localhost".to_string(),
                port: 5000
            }
        );
        assert_eq!(config.backlog, 5);
        assert_eq!(config.timeouts, SessionTimeouts::default());
        assert_eq!(config.seed, None);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            listen = "0.0.0.0:5000"
            [session]
            response_timeout = 10
            [generator]
            seed = 1
            [logging]
            level = "warn"
            "#,
        )
        .unwrap();

        let config = Config::merge(
            cli(&["127.0.0.1:6000", "-t", "3", "--seed", "2", "--log-level", "debug"]),
            toml_config,
        )
        .unwrap();
        assert_eq!(config.listen.port, 6000);
        assert_eq!(config.timeouts.response, Duration::from_secs(3));
        assert_eq!(config.seed, Some(2));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_explicit_info_log_level_overrides_toml() {
        let toml_debug = || -> TomlConfig { toml::from_str("[logging]\nlevel = \"debug\"").unwrap() };

        let config = Config::merge(cli(&["127.0.0.1:6000", "--log-level", "info"]), toml_debug()).unwrap();
        assert_eq!(config.log_level, "info");

        let config = Config::merge(cli(&["127.0.0.1:6000"]), toml_debug()).unwrap();
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_toml_supplies_listen() {
        let toml_config: TomlConfig = toml::from_str("[server]\nlisten = \"example.com:80\"").unwrap();
        let config = Config::merge(cli(&[]), toml_config).unwrap();
        assert_eq!(config.listen.to_string(), "example.com:80");
    }

    #[test]
    fn test_missing_listen() {
        assert!(matches!(
            Config::merge(cli(&[]), TomlConfig::default()),
            Err(ConfigError::MissingListen)
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            Config::merge(cli(&["h:1", "-t", "0"]), TomlConfig::default()),
            Err(ConfigError::Invalid(_))
        ));

        let toml_config: TomlConfig = toml::from_str("[generator]\ninteger_max = 1").unwrap();
        assert!(matches!(
            Config::merge(cli(&["h:1"]), toml_config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_listen_spec_parsing() {
        assert_eq!(
            ListenSpec::parse("127.0.0.1:4950").unwrap(),
            ListenSpec {
                host: "127.0.0.1".to_string(),
                port: 4950
            }
        );
        assert_eq!(ListenSpec::parse("localhost:0").unwrap().port, 0);
    }

    #[test]
    fn test_listen_spec_errors() {
        for spec in ["localhost", ":5000", "localhost:", "localhost:http", "localhost:70000"] {
            assert!(
                matches!(ListenSpec::parse(spec), Err(ConfigError::InvalidListen(..))),
                "{spec} should be rejected"
            );
        }
    }

    #[test]
    fn test_ipv6_literal_rejected() {
        match ListenSpec::parse("::1:5000") {
            Err(ConfigError::InvalidListen(_, reason)) => assert_eq!(reason, "missing host"),
            other => panic!("unexpected: {:?}", other),
        }
        match ListenSpec::parse("fe80::1:5000") {
            Err(ConfigError::InvalidListen(_, reason)) => {
                assert_eq!(reason, "IPv6 literals are not supported")
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
