//! YAML configuration loading, environment interpolation and validation.
//!
//! `parse_config` reads the file, substitutes `${NAME}` placeholders from the
//! environment, deserializes, and finalizes: defaults are applied and every
//! field the dispatcher relies on is validated so the rest of the process can
//! trust the config blindly.

use std::{collections::HashSet, env, fs, sync::LazyLock, time::Duration};

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::balancer::{Kind, P2cParams};

pub const DEFAULT_CONFIG_PATH: &str = "~/.config/rpcgate/rpcgate.yaml";

const DEFAULT_SERVER_PORT: u16 = 8080;
const DEFAULT_METRICS_PORT: u16 = 9090;
const DEFAULT_METRICS_PATH: &str = "/metrics";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can not read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("can not parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("env variable '{0}' referenced in config is not set")]
    MissingEnv(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub port: Option<u16>,
    /// Default balancer kind for chains that do not set their own.
    #[serde(default)]
    pub balancer_type: Option<String>,
    /// Default P2C-EWMA parameters for chains that do not set their own.
    #[serde(default)]
    pub p2cewma: Option<P2cEwmaConfig>,
    #[serde(default)]
    pub logger: LoggerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub clients: ClientsConfig,
    #[serde(default)]
    pub rpcs: Vec<RpcConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggerConfig {
    /// One of trace, debug, info, warn, error. Empty means info.
    #[serde(default)]
    pub level: Option<String>,
    /// "json" or "inline" (console). Empty means inline.
    #[serde(default)]
    pub format: Option<String>,
    /// "stdout" or "none". Empty means stdout.
    #[serde(default)]
    pub writer: Option<String>,
    #[serde(default)]
    pub no_color: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientsConfig {
    /// Only meaningful for the basic auth type.
    #[serde(default)]
    pub auth_required: bool,
    /// "basic" or "query". Empty means basic.
    #[serde(default, rename = "type")]
    pub auth_type: Option<String>,
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    pub name: String,
    #[serde(default)]
    pub chain_id: i64,
    #[serde(default)]
    pub balancer_type: Option<String>,
    #[serde(default)]
    pub p2cewma: Option<P2cEwmaConfig>,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub conn_url: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct P2cEwmaConfig {
    #[serde(default = "default_smooth")]
    pub smooth: f64,
    #[serde(default = "default_load_normalizer")]
    pub load_normalizer: f64,
    #[serde(default = "default_penalty_decay")]
    pub penalty_decay: f64,
    #[serde(default = "default_cooldown_timeout_ms")]
    pub cooldown_timeout_ms: u64,
}

fn default_smooth() -> f64 {
    0.3
}
fn default_load_normalizer() -> f64 {
    8.0
}
fn default_penalty_decay() -> f64 {
    0.8
}
fn default_cooldown_timeout_ms() -> u64 {
    10_000
}

impl Default for P2cEwmaConfig {
    fn default() -> Self {
        Self {
            smooth: default_smooth(),
            load_normalizer: default_load_normalizer(),
            penalty_decay: default_penalty_decay(),
            cooldown_timeout_ms: default_cooldown_timeout_ms(),
        }
    }
}

impl P2cEwmaConfig {
    pub fn params(&self) -> P2cParams {
        P2cParams {
            smooth: self.smooth,
            load_normalizer: self.load_normalizer,
            penalty_decay: self.penalty_decay,
            cooldown: Duration::from_millis(self.cooldown_timeout_ms),
        }
    }
}

impl Config {
    pub fn server_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SERVER_PORT)
    }

    pub fn metrics_port(&self) -> u16 {
        self.metrics.port.unwrap_or(DEFAULT_METRICS_PORT)
    }

    pub fn metrics_path(&self) -> String {
        match self.metrics.path.as_deref() {
            None | Some("") => DEFAULT_METRICS_PATH.to_string(),
            Some(path) => format!("/{}", path.trim_start_matches('/')),
        }
    }

    /// Applies global fallbacks and validates every section. Consumes and
    /// returns the config so callers only ever hold a finalized one.
    pub fn finalize(mut self) -> Result<Self, ConfigError> {
        let global_kind = resolve_balancer_kind(self.balancer_type.as_deref(), "global")?;
        self.balancer_type = Some(global_kind.as_str().to_string());
        if let Some(p2c) = &self.p2cewma {
            validate_p2c(p2c, "global")?;
        }

        validate_logger(&self.logger)?;
        validate_clients(&self.clients)?;

        let mut names = HashSet::new();
        let rpcs = std::mem::take(&mut self.rpcs);
        let mut finalized = Vec::with_capacity(rpcs.len());
        for mut rpc in rpcs {
            if rpc.name.is_empty() {
                return Err(ConfigError::Invalid("rpc name must not be empty".to_string()));
            }
            if !names.insert(rpc.name.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "rpc[{}].name is not unique",
                    rpc.name
                )));
            }
            if rpc.providers.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "rpc[{}] has no providers",
                    rpc.name
                )));
            }

            let kind = match rpc.balancer_type.as_deref() {
                None | Some("") => global_kind,
                Some(s) => resolve_balancer_kind(Some(s), &rpc.name)?,
            };
            rpc.balancer_type = Some(kind.as_str().to_string());

            if rpc.p2cewma.is_none() {
                rpc.p2cewma = self.p2cewma;
            }
            if let Some(p2c) = &rpc.p2cewma {
                validate_p2c(p2c, &rpc.name)?;
            }

            validate_providers(&rpc, kind)?;
            finalized.push(rpc);
        }
        self.rpcs = finalized;

        Ok(self)
    }
}

impl RpcConfig {
    /// The validated balancer kind. Only meaningful after `finalize`.
    pub fn balancer_kind(&self) -> Kind {
        self.balancer_type
            .as_deref()
            .and_then(Kind::parse)
            .unwrap_or(Kind::P2cEwma)
    }

    /// The resolved P2C parameters. Only meaningful after `finalize`.
    pub fn p2c_params(&self) -> P2cParams {
        self.p2cewma.unwrap_or_default().params()
    }
}

/// Reads, interpolates, parses and finalizes the config at `path`. An empty
/// path falls back to [`DEFAULT_CONFIG_PATH`].
pub fn parse_config(path: &str) -> Result<Config, ConfigError> {
    let path = if path.is_empty() { DEFAULT_CONFIG_PATH } else { path };
    let path = expand_home(path);

    let raw = fs::read_to_string(&path)?;
    let raw = replace_placeholders_with_env(&raw)?;
    let cfg: Config = serde_yaml::from_str(&raw)?;
    cfg.finalize()
}

/// Expands a leading `~/` using `$HOME`.
fn expand_home(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => match env::var("HOME") {
            Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
            Err(_) => path.to_string(),
        },
        None => path.to_string(),
    }
}

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("static placeholder regex"));

/// Substitutes `${NAME}` placeholders with environment values. An unset
/// variable is a hard error rather than an empty string.
fn replace_placeholders_with_env(raw: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(raw.len());
    let mut last = 0;
    for caps in PLACEHOLDER_RE.captures_iter(raw) {
        let whole = caps.get(0).expect("regex match");
        let key = &caps[1];
        let value = env::var(key).map_err(|_| ConfigError::MissingEnv(key.to_string()))?;
        out.push_str(&raw[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }
    out.push_str(&raw[last..]);
    Ok(out)
}

fn resolve_balancer_kind(value: Option<&str>, scope: &str) -> Result<Kind, ConfigError> {
    match value {
        None | Some("") => Ok(Kind::P2cEwma),
        Some(s) => Kind::parse(s).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "rpc[{scope}].balancer_type incorrect, must be one of \
                 'p2cewma', 'round-robin', 'least-connection' or empty"
            ))
        }),
    }
}

fn validate_p2c(cfg: &P2cEwmaConfig, scope: &str) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&cfg.smooth) {
        return Err(ConfigError::Invalid(format!(
            "rpc[{scope}].p2cewma.smooth incorrect, must be [0;1], got: {}",
            cfg.smooth
        )));
    }
    if !(0.0..=1.0).contains(&cfg.penalty_decay) {
        return Err(ConfigError::Invalid(format!(
            "rpc[{scope}].p2cewma.penalty_decay incorrect, must be [0;1], got: {}",
            cfg.penalty_decay
        )));
    }
    if cfg.load_normalizer <= 0.0 {
        return Err(ConfigError::Invalid(format!(
            "rpc[{scope}].p2cewma.load_normalizer incorrect, must be > 0, got: {}",
            cfg.load_normalizer
        )));
    }
    if cfg.cooldown_timeout_ms == 0 {
        return Err(ConfigError::Invalid(format!(
            "rpc[{scope}].p2cewma.cooldown_timeout_ms incorrect, must be > 0"
        )));
    }
    Ok(())
}

fn validate_logger(cfg: &LoggerConfig) -> Result<(), ConfigError> {
    match cfg.level.as_deref() {
        None | Some("") | Some("trace" | "debug" | "info" | "warn" | "error") => {}
        Some(level) => {
            return Err(ConfigError::Invalid(format!(
                "logger.level incorrect, got '{level}', must be one of \
                 'trace', 'debug', 'info', 'warn', 'error' or empty"
            )))
        }
    }
    match cfg.format.as_deref() {
        None | Some("" | "json" | "inline") => {}
        Some(_) => {
            return Err(ConfigError::Invalid(
                "logger.format incorrect, must be one of 'json', 'inline' or empty".to_string(),
            ))
        }
    }
    match cfg.writer.as_deref() {
        None | Some("" | "stdout" | "none") => {}
        Some(_) => {
            return Err(ConfigError::Invalid(
                "logger.writer incorrect, must be one of 'stdout', 'none' or empty".to_string(),
            ))
        }
    }
    Ok(())
}

fn validate_clients(cfg: &ClientsConfig) -> Result<(), ConfigError> {
    match cfg.auth_type.as_deref() {
        None | Some("" | "basic" | "query") => Ok(()),
        Some(_) => Err(ConfigError::Invalid(
            "clients.type incorrect, must be one of 'basic', 'query' or empty".to_string(),
        )),
    }
}

fn validate_providers(rpc: &RpcConfig, kind: Kind) -> Result<(), ConfigError> {
    let mut http = 0;
    let mut ws = 0;
    for provider in &rpc.providers {
        let url = provider.conn_url.as_str();
        if url.starts_with("http://") || url.starts_with("https://") {
            http += 1;
        } else if url.starts_with("ws://") || url.starts_with("wss://") {
            if kind == Kind::P2cEwma {
                return Err(ConfigError::Invalid(format!(
                    "rpc[{}].balancer_type is unsupported for websocket",
                    rpc.name
                )));
            }
            ws += 1;
        } else {
            return Err(ConfigError::Invalid(format!(
                "rpc[{}].provider[{}].conn_url scheme invalid: {}",
                rpc.name, provider.name, url
            )));
        }
    }
    if http > 0 && ws > 0 {
        return Err(ConfigError::Invalid(format!(
            "rpc[{}] has both http and websocket connections",
            rpc.name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(yaml: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{yaml}").unwrap();
        file
    }

    fn parse(yaml: &str) -> Result<Config, ConfigError> {
        let file = write_config(yaml);
        parse_config(file.path().to_str().unwrap())
    }

    const MINIMAL: &str = r#"
rpcs:
  - name: eth
    chain_id: 1
    providers:
      - name: alpha
        conn_url: http://a.example
      - name: beta
        conn_url: http://b.example
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = parse(MINIMAL).unwrap();
        assert_eq!(cfg.server_port(), 8080);
        assert_eq!(cfg.metrics_port(), 9090);
        assert_eq!(cfg.metrics_path(), "/metrics");
        assert!(!cfg.metrics.enabled);

        let rpc = &cfg.rpcs[0];
        assert_eq!(rpc.balancer_kind(), Kind::P2cEwma);
        let params = rpc.p2c_params();
        assert_eq!(params.cooldown, Duration::from_secs(10));
        assert!((params.smooth - 0.3).abs() < 1e-9);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(matches!(parse_config("/nonexistent/rpcgate.yaml"), Err(ConfigError::Read(_))));
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        assert!(matches!(parse("port: [not a port"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn env_placeholders_are_substituted() {
        std::env::set_var("RPCGATE_TEST_URL", "http://from-env.example");
        let cfg = parse(
            r#"
rpcs:
  - name: eth
    chain_id: 1
    providers:
      - name: alpha
        conn_url: ${RPCGATE_TEST_URL}
"#,
        )
        .unwrap();
        assert_eq!(cfg.rpcs[0].providers[0].conn_url, "http://from-env.example");
    }

    #[test]
    fn missing_env_placeholder_is_an_error() {
        std::env::remove_var("RPCGATE_TEST_UNSET");
        let err = parse(
            r#"
rpcs:
  - name: eth
    chain_id: 1
    providers:
      - name: alpha
        conn_url: ${RPCGATE_TEST_UNSET}
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(key) if key == "RPCGATE_TEST_UNSET"));
    }

    #[test]
    fn duplicate_chain_names_are_rejected() {
        let err = parse(
            r#"
rpcs:
  - name: eth
    providers: [{name: a, conn_url: http://a}]
  - name: eth
    providers: [{name: b, conn_url: http://b}]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("not unique")));
    }

    #[test]
    fn chain_without_providers_is_rejected() {
        let err = parse("rpcs:\n  - name: eth\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("no providers")));
    }

    #[test]
    fn unknown_balancer_kind_is_rejected() {
        let err = parse(
            r#"
rpcs:
  - name: eth
    balancer_type: weighted
    providers: [{name: a, conn_url: http://a}]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("balancer_type")));
    }

    #[test]
    fn websocket_providers_reject_p2cewma() {
        let err = parse(
            r#"
rpcs:
  - name: eth
    providers: [{name: a, conn_url: ws://a}]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("websocket")));

        let cfg = parse(
            r#"
rpcs:
  - name: eth
    balancer_type: round-robin
    providers: [{name: a, conn_url: ws://a}]
"#,
        )
        .unwrap();
        assert_eq!(cfg.rpcs[0].balancer_kind(), Kind::RoundRobin);
    }

    #[test]
    fn mixed_http_and_ws_providers_are_rejected() {
        let err = parse(
            r#"
rpcs:
  - name: eth
    balancer_type: least-connection
    providers:
      - {name: a, conn_url: ws://a}
      - {name: b, conn_url: http://b}
"#,
        )
        .unwrap_err();
        assert!(
            matches!(err, ConfigError::Invalid(msg) if msg.contains("both http and websocket"))
        );
    }

    #[test]
    fn invalid_scheme_is_rejected() {
        let err = parse(
            r#"
rpcs:
  - name: eth
    providers: [{name: a, conn_url: ftp://a}]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("scheme invalid")));
    }

    #[test]
    fn global_p2c_params_are_inherited_per_chain() {
        let cfg = parse(
            r#"
p2cewma:
  smooth: 0.5
  cooldown_timeout_ms: 2000
rpcs:
  - name: eth
    chain_id: 1
    providers: [{name: a, conn_url: http://a}]
  - name: arb
    chain_id: 42161
    p2cewma:
      smooth: 0.1
    providers: [{name: b, conn_url: http://b}]
"#,
        )
        .unwrap();
        let inherited = cfg.rpcs[0].p2c_params();
        assert!((inherited.smooth - 0.5).abs() < 1e-9);
        assert_eq!(inherited.cooldown, Duration::from_millis(2000));

        // A chain-local block replaces the global one wholesale.
        let local = cfg.rpcs[1].p2c_params();
        assert!((local.smooth - 0.1).abs() < 1e-9);
        assert_eq!(local.cooldown, Duration::from_secs(10));
    }

    #[test]
    fn p2c_parameter_ranges_are_validated() {
        for yaml in [
            "p2cewma: {smooth: 1.5}\n",
            "p2cewma: {penalty_decay: -0.1}\n",
            "p2cewma: {load_normalizer: 0}\n",
            "p2cewma: {cooldown_timeout_ms: 0}\n",
        ] {
            let full = format!("{yaml}{MINIMAL}");
            assert!(
                matches!(parse(&full), Err(ConfigError::Invalid(_))),
                "expected rejection for {yaml}"
            );
        }
    }

    #[test]
    fn metrics_path_is_normalized() {
        let cfg = parse(&format!("metrics:\n  enabled: true\n  path: stats\n{MINIMAL}")).unwrap();
        assert_eq!(cfg.metrics_path(), "/stats");

        let cfg = parse(&format!("metrics:\n  path: /stats\n{MINIMAL}")).unwrap();
        assert_eq!(cfg.metrics_path(), "/stats");
    }

    #[test]
    fn clients_type_is_validated() {
        let err = parse(&format!("clients:\n  type: oauth\n{MINIMAL}")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("clients.type")));

        let cfg = parse(&format!(
            "clients:\n  type: basic\n  auth_required: true\n  clients:\n    - {{login: admin, password: test}}\n{MINIMAL}"
        ))
        .unwrap();
        assert!(cfg.clients.auth_required);
        assert_eq!(cfg.clients.clients[0].login, "admin");
    }

    #[test]
    fn logger_settings_are_validated() {
        let err = parse(&format!("logger:\n  level: loud\n{MINIMAL}")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("logger.level")));

        let err = parse(&format!("logger:\n  format: xml\n{MINIMAL}")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("logger.format")));

        let err = parse(&format!("logger:\n  writer: file\n{MINIMAL}")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("logger.writer")));

        let cfg = parse(&format!("logger:\n  level: debug\n  format: json\n{MINIMAL}")).unwrap();
        assert_eq!(cfg.logger.level.as_deref(), Some("debug"));
    }
}
