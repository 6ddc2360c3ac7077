use std::collections::HashSet;
use std::env::VarError;
use std::fmt::{Debug, Formatter};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use std::{fs, io};
use clap::error::ErrorKind;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use thiserror::Error;
use tracing::Level;
use url::Url;
use crate::dns::gandi::DEFAULT_API_URL;
use crate::dns::RecordType;
use crate::gateway::livebox::DEFAULT_GATEWAY_URL;

const DEFAULT_CONFIG_PATH: &str = "/etc/livebox-gandi-ddns/config.toml";
const DEFAULT_INTERVAL: Duration = Duration::from_secs(10800);

/// Update the DNS records of Gandi registered domains with the WAN IP of a Livebox.
#[derive(Debug, Parser)]
#[command(name = "livebox-gandi-ddns", version, about)]
pub struct Args {
    /// The Gandi API token to use.
    #[arg(long, env = "GANDI_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    /// A comma separated list of domains to update.
    #[arg(long, env = "GANDI_DOMAINS", value_delimiter = ',')]
    domains: Vec<String>,

    /// Only update records of these types (comma separated, default: all).
    #[arg(long, value_delimiter = ',')]
    records: Vec<RecordType>,

    /// The log level to display.
    #[arg(long = "log", value_enum, ignore_case = true)]
    log_level: Option<LogLevel>,

    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// Keep running and check the records periodically.
    #[arg(long)]
    daemon: bool,

    /// Time between two checks in daemon mode, in seconds or as a duration like "3h".
    #[arg(long, value_parser = parse_interval)]
    interval: Option<Duration>,

    /// Compute the updates but do not push them.
    #[arg(long)]
    dry_run: bool,

    /// Use this IP instead of asking the Livebox.
    #[arg(long)]
    set_ip: Option<IpAddr>,

    /// Stop at the first domain that fails instead of checking the others.
    #[arg(long)]
    fail_fast: bool,

    #[arg(long, env = "GANDI_API_URL")]
    api_url: Option<Url>,

    #[arg(long, env = "LIVEBOX_URL")]
    gateway_url: Option<Url>,

    /// Configuration file to read before applying the flags.
    #[arg(long, env = "LIVEBOX_GANDI_DDNS_CONFIG")]
    config: Option<String>,
}

fn parse_interval(s: &str) -> Result<Duration, humantime::DurationError> {
    match s.trim().parse::<u64>() {
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(_) => humantime::parse_duration(s.trim()),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(try_from = "String")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    #[value(alias = "warn")]
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn level(&self) -> Level {
        match self {
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warning => Level::WARN,
            LogLevel::Error | LogLevel::Critical => Level::ERROR,
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        <LogLevel as ValueEnum>::from_str(&value, true)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(try_from = "String")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl TryFrom<String> for LogFormat {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        <LogFormat as ValueEnum>::from_str(&value, true)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Interval {
    Seconds(u64),
    Human(String),
}

/// Settings read from the TOML configuration file. Keys mirror the flags.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileSettings {
    api_token: Option<String>,
    domains: Option<Vec<String>>,
    records: Option<Vec<RecordType>>,
    log: Option<LogLevel>,
    log_format: Option<LogFormat>,
    daemon: Option<bool>,
    interval: Option<Interval>,
    dry_run: Option<bool>,
    set_ip: Option<IpAddr>,
    fail_fast: Option<bool>,
    api_url: Option<String>,
    gateway_url: Option<String>,
}

impl FileSettings {
    /// Reads the file given on the command line, or the system-wide one if
    /// it exists.
    pub fn load(path: Option<&str>) -> Result<Self, SettingsError> {
        match path {
            Some(path) => Self::read(&shellexpand::full(path)?),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::read(DEFAULT_CONFIG_PATH),
            None => Ok(Self::default()),
        }
    }

    fn read(path: &str) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path)
            .map_err(|source| SettingsError::ReadFile { path: path.to_owned(), source })?;

        toml::from_str(&content)
            .map_err(|source| SettingsError::ParseFile { path: path.to_owned(), source })
    }
}

pub struct Settings {
    pub api_token: String,
    pub domains: Vec<String>,
    /// `None` allows every record type.
    pub record_types: Option<HashSet<RecordType>>,
    pub log_level: LogLevel,
    pub log_format: LogFormat,
    pub daemon: bool,
    pub interval: Duration,
    pub dry_run: bool,
    pub custom_ip: Option<IpAddr>,
    pub fail_fast: bool,
    pub api_url: Url,
    pub gateway_url: Url,
}

impl Settings {
    pub fn new() -> Result<Self, SettingsError> {
        let args = Args::try_parse().map_err(SettingsError::from_clap)?;
        let file = FileSettings::load(args.config.as_deref())?;

        Self::from_sources(args, file)
    }

    /// Merges the command line (flags and environment) over the file.
    pub fn from_sources(args: Args, file: FileSettings) -> Result<Self, SettingsError> {
        let api_token = args.api_token
            .or(file.api_token)
            .filter(|t| !t.trim().is_empty())
            .ok_or(SettingsError::MissingApiToken)?;

        let domains = if args.domains.is_empty() {
            file.domains.unwrap_or_default()
        } else {
            args.domains
        };
        let mut seen = HashSet::new();
        let domains: Vec<String> = domains.into_iter()
            .map(|d| d.trim().to_owned())
            .filter(|d| !d.is_empty() && seen.insert(d.clone()))
            .collect();
        if domains.is_empty() {
            return Err(SettingsError::MissingDomains);
        }

        let records = if args.records.is_empty() {
            file.records.unwrap_or_default()
        } else {
            args.records
        };
        let record_types = (!records.is_empty()).then(|| records.into_iter().collect());

        let interval = match (args.interval, file.interval) {
            (Some(interval), _) => interval,
            (None, Some(Interval::Seconds(secs))) => Duration::from_secs(secs),
            (None, Some(Interval::Human(s))) => parse_interval(&s)
                .map_err(|e| SettingsError::BadInterval(s, e))?,
            (None, None) => DEFAULT_INTERVAL,
        };
        if interval.is_zero() {
            return Err(SettingsError::ZeroInterval);
        }

        let api_url = match (args.api_url, file.api_url) {
            (Some(url), _) => url,
            (None, Some(url)) => Url::parse(&url)?,
            (None, None) => Url::parse(DEFAULT_API_URL)?,
        };
        let gateway_url = match (args.gateway_url, file.gateway_url) {
            (Some(url), _) => url,
            (None, Some(url)) => Url::parse(&url)?,
            (None, None) => Url::parse(DEFAULT_GATEWAY_URL)?,
        };

        Ok(Self {
            api_token,
            domains,
            record_types,
            log_level: args.log_level.or(file.log).unwrap_or_default(),
            log_format: args.log_format.or(file.log_format).unwrap_or_default(),
            daemon: args.daemon || file.daemon.unwrap_or(false),
            interval,
            dry_run: args.dry_run || file.dry_run.unwrap_or(false),
            custom_ip: args.set_ip.or(file.set_ip),
            fail_fast: args.fail_fast || file.fail_fast.unwrap_or(false),
            api_url,
            gateway_url,
        })
    }
}

impl Debug for Settings {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("api_token", &"<redacted>")
            .field("domains", &self.domains)
            .field("record_types", &self.record_types)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("daemon", &self.daemon)
            .field("interval", &self.interval)
            .field("dry_run", &self.dry_run)
            .field("custom_ip", &self.custom_ip)
            .field("fail_fast", &self.fail_fast)
            .field("api_url", &self.api_url.as_str())
            .field("gateway_url", &self.gateway_url.as_str())
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("{0}")]
    InvalidArgs(clap::Error),
    #[error("the GANDI_API_TOKEN environment variable is not set")]
    MissingApiToken,
    #[error("the GANDI_DOMAINS environment variable is not set")]
    MissingDomains,
    #[error("the update interval must be greater than zero")]
    ZeroInterval,
    #[error("invalid interval {0:?}: {1}")]
    BadInterval(String, humantime::DurationError),
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),
    #[error(transparent)]
    ExpandError(#[from] shellexpand::LookupError<VarError>),
    #[error("failed to read {path}: {source}")]
    ReadFile { path: String, source: io::Error },
    #[error("failed to parse {path}: {source}")]
    ParseFile { path: String, source: toml::de::Error },
}

impl SettingsError {
    /// Wraps a command line error. Help and version requests are printed and
    /// exit the process right away.
    fn from_clap(e: clap::Error) -> Self {
        match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
            _ => SettingsError::InvalidArgs(e),
        }
    }
}
