//! Agent configuration: defaults, overridden by `CAMWATCH_*` environment
//! variables, overridden by command-line flags.

use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::health::{default_checks, Check};

pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing value for {0}")]
    MissingValue(String),
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
    #[error("unexpected argument {0:?} (try --help)")]
    UnexpectedArgument(String),
    #[error("reading thresholds file {path}: {source}")]
    ThresholdsIo {
        path: String,
        source: std::io::Error,
    },
    #[error("parsing thresholds file {path}: {source}")]
    ThresholdsJson {
        path: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub service_name: String,
    pub bind: IpAddr,
    pub port: u16,
    pub proc_root: PathBuf,
    pub disk_path: PathBuf,
    pub vapix_enabled: bool,
    pub vapix_url: String,
    pub fetch_timeout: Duration,
    pub temperature_ttl: Duration,
    pub device_info_ttl: Duration,
    pub credentials_file: Option<PathBuf>,
    pub thresholds_file: Option<PathBuf>,
    pub dependency_paths: Vec<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            service_name: "camwatch".into(),
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            proc_root: PathBuf::from("/proc"),
            disk_path: PathBuf::from("/"),
            vapix_enabled: true,
            vapix_url: "http://127.0.0.1".into(),
            fetch_timeout: Duration::from_secs(5),
            temperature_ttl: Duration::from_secs(60),
            device_info_ttl: Duration::from_secs(300),
            credentials_file: None,
            thresholds_file: None,
            dependency_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Run(AgentConfig),
    Help(String),
}

pub fn usage(prog: &str) -> String {
    format!(
        "Usage: {prog} [--port PORT|-p PORT] [--bind ADDR] [--proc-root DIR] [--disk-path PATH]\n\
         \x20      [--vapix-url URL] [--no-vapix] [--credentials FILE] [--thresholds FILE]\n\
         \x20      [--dependency PATH]...\n\
         Environment: CAMWATCH_PORT, CAMWATCH_BIND, CAMWATCH_PROC_ROOT, CAMWATCH_DISK_PATH,\n\
         \x20            CAMWATCH_VAPIX (0 disables), CAMWATCH_VAPIX_URL, CAMWATCH_FETCH_TIMEOUT_MS,\n\
         \x20            CAMWATCH_TEMP_TTL_SECS, CAMWATCH_DEVICE_TTL_SECS, CAMWATCH_CREDENTIALS_FILE,\n\
         \x20            CAMWATCH_THRESHOLDS, CAMWATCH_DEPENDENCY_PATHS (colon separated),\n\
         \x20            CAMWATCH_VAPIX_USER / CAMWATCH_VAPIX_PASSWORD, RUST_LOG"
    )
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn millis(key: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_value::<u64>(key, value).map(Duration::from_millis)
}

fn secs(key: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_value::<u64>(key, value).map(Duration::from_secs)
}

impl AgentConfig {
    /// Apply `CAMWATCH_*` variables through `env` (usually `std::env::var`).
    pub fn apply_env<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = env("CAMWATCH_PORT") {
            self.port = parse_value("CAMWATCH_PORT", &v)?;
        }
        if let Some(v) = env("CAMWATCH_BIND") {
            self.bind = parse_value("CAMWATCH_BIND", &v)?;
        }
        if let Some(v) = env("CAMWATCH_PROC_ROOT") {
            self.proc_root = PathBuf::from(v);
        }
        if let Some(v) = env("CAMWATCH_DISK_PATH") {
            self.disk_path = PathBuf::from(v);
        }
        if let Some(v) = env("CAMWATCH_VAPIX") {
            self.vapix_enabled = v != "0";
        }
        if let Some(v) = env("CAMWATCH_VAPIX_URL") {
            self.vapix_url = v;
        }
        if let Some(v) = env("CAMWATCH_FETCH_TIMEOUT_MS") {
            self.fetch_timeout = millis("CAMWATCH_FETCH_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = env("CAMWATCH_TEMP_TTL_SECS") {
            self.temperature_ttl = secs("CAMWATCH_TEMP_TTL_SECS", &v)?;
        }
        if let Some(v) = env("CAMWATCH_DEVICE_TTL_SECS") {
            self.device_info_ttl = secs("CAMWATCH_DEVICE_TTL_SECS", &v)?;
        }
        if let Some(v) = env("CAMWATCH_CREDENTIALS_FILE") {
            self.credentials_file = Some(PathBuf::from(v));
        }
        if let Some(v) = env("CAMWATCH_THRESHOLDS") {
            self.thresholds_file = Some(PathBuf::from(v));
        }
        if let Some(v) = env("CAMWATCH_DEPENDENCY_PATHS") {
            self.dependency_paths = v
                .split(':')
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "CAMWATCH_FETCH_TIMEOUT_MS".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }

    /// Apply command-line flags. The first item is the program name.
    pub fn apply_args<I>(mut self, args: I) -> Result<Invocation, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut it = args.into_iter();
        let prog = it.next().unwrap_or_else(|| "camwatch_agent".into());
        while let Some(arg) = it.next() {
            // accept both "--flag value" and "--flag=value"
            let (flag, inline) = match arg.split_once('=') {
                Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
                _ => (arg.clone(), None),
            };
            let mut value = |name: &str| {
                inline
                    .clone()
                    .or_else(|| it.next())
                    .ok_or_else(|| ConfigError::MissingValue(name.to_string()))
            };
            match flag.as_str() {
                "-h" | "--help" => return Ok(Invocation::Help(usage(&prog))),
                "-p" | "--port" => self.port = parse_value("--port", &value("--port")?)?,
                "--bind" => self.bind = parse_value("--bind", &value("--bind")?)?,
                "--proc-root" => self.proc_root = PathBuf::from(value("--proc-root")?),
                "--disk-path" => self.disk_path = PathBuf::from(value("--disk-path")?),
                "--vapix-url" => {
                    self.vapix_url = value("--vapix-url")?;
                    self.vapix_enabled = true;
                }
                "--no-vapix" => self.vapix_enabled = false,
                "--credentials" => {
                    self.credentials_file = Some(PathBuf::from(value("--credentials")?))
                }
                "--thresholds" => {
                    self.thresholds_file = Some(PathBuf::from(value("--thresholds")?))
                }
                "--dependency" => self
                    .dependency_paths
                    .push(PathBuf::from(value("--dependency")?)),
                _ => return Err(ConfigError::UnexpectedArgument(arg)),
            }
        }
        Ok(Invocation::Run(self))
    }
}

/// Defaults, then environment, then flags.
pub fn load<I, F>(args: I, env: F) -> Result<Invocation, ConfigError>
where
    I: IntoIterator<Item = String>,
    F: Fn(&str) -> Option<String>,
{
    let mut cfg = AgentConfig::default();
    cfg.apply_env(env)?;
    cfg.apply_args(args)
}

/// Checks from a JSON array of `{name, warning, critical, direction}`, or the
/// built-in set when no file is configured.
pub fn load_checks(path: Option<&Path>) -> Result<Vec<Check>, ConfigError> {
    let Some(path) = path else {
        return Ok(default_checks());
    };
    let data = fs::read_to_string(path).map_err(|source| ConfigError::ThresholdsIo {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| ConfigError::ThresholdsJson {
        path: path.display().to_string(),
        source,
    })
}
