//! Configuration of the daemon.

use std::{env, fmt, fs, io};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use log::{LevelFilter, info};
use serde::de;
use serde::{Deserialize, Deserializer};
use url::Url;
use crate::constants::{
    DEFAULT_MIN_RUN_INTERVAL, DEFAULT_SOURCE_TIMEOUT, DEFAULT_SOURCE_URI,
    ROAHIST_DEFAULT_CONFIG_FILE, ROAHIST_ENV_LOG_LEVEL, ROAHIST_SERVER_APP,
};


//------------ Options -------------------------------------------------------

/// The command line options of the daemon.
#[derive(clap::Parser)]
#[command(
    version,
    about = "Records the history of published Route Origin Authorizations.",
)]
pub struct Options {
    /// Path to the config file
    #[arg(
        short, long,
        value_name = "FILE",
        default_value = ROAHIST_DEFAULT_CONFIG_FILE,
    )]
    pub config: PathBuf,

    /// Run a single ingestion, print its status, and exit
    #[arg(long)]
    pub once: bool,
}


//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults;

impl ConfigDefaults {
    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
    }

    fn port() -> u16 {
        8081
    }

    fn storage_uri() -> Url {
        Url::parse("local://./data").expect("valid default URI")
    }

    fn source_uri() -> Url {
        Url::parse(DEFAULT_SOURCE_URI).expect("valid default URI")
    }

    fn source_timeout() -> u64 {
        DEFAULT_SOURCE_TIMEOUT.as_secs()
    }

    fn min_run_interval() -> u64 {
        DEFAULT_MIN_RUN_INTERVAL.as_secs() / 60
    }

    pub fn log_level() -> LevelFilter {
        match env::var(ROAHIST_ENV_LOG_LEVEL) {
            Ok(level) => match LevelFilter::from_str(&level) {
                Ok(level) => level,
                Err(_) => {
                    eprintln!(
                        "Unrecognized value for log level in env var {}",
                        ROAHIST_ENV_LOG_LEVEL
                    );
                    ::std::process::exit(1);
                }
            },
            _ => LevelFilter::Info,
        }
    }

    fn log_type() -> LogType {
        LogType::Stderr
    }

    fn log_file() -> PathBuf {
        PathBuf::from("./roahist.log")
    }

    fn syslog_facility() -> String {
        "daemon".to_string()
    }
}


//------------ Config --------------------------------------------------------

/// The configuration of the daemon.
///
/// Every field has a default, so an empty config file is a valid config.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "ConfigDefaults::ip")]
    pub ip: IpAddr,

    #[serde(default = "ConfigDefaults::port")]
    pub port: u16,

    /// Where to keep the history.
    ///
    /// Can also be given as `data_dir` with a plain path.
    #[serde(
        alias = "data_dir",
        default = "ConfigDefaults::storage_uri",
        deserialize_with = "deserialize_storage_uri"
    )]
    pub storage_uri: Url,

    /// The URI of the JSON export of all published ROAs.
    #[serde(default = "ConfigDefaults::source_uri")]
    pub source_uri: Url,

    /// The timeout for fetching the ROAs in seconds.
    #[serde(default = "ConfigDefaults::source_timeout")]
    pub source_timeout: u64,

    /// The minimum time between two runs in minutes.
    #[serde(default = "ConfigDefaults::min_run_interval")]
    pub min_run_interval: u64,

    /// The time between scheduled runs in minutes.
    ///
    /// If missing, runs only happen when triggered via the API.
    #[serde(default)]
    pub ingest_interval: Option<u64>,

    #[serde(
        default = "ConfigDefaults::log_level",
        deserialize_with = "deserialize_level_filter"
    )]
    pub log_level: LevelFilter,

    #[serde(default = "ConfigDefaults::log_type")]
    pub log_type: LogType,

    #[serde(default = "ConfigDefaults::log_file")]
    pub log_file: PathBuf,

    #[serde(default = "ConfigDefaults::syslog_facility")]
    pub syslog_facility: String,

    #[serde(default)]
    pub pid_file: Option<PathBuf>,
}

impl Config {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout)
    }

    pub fn min_run_interval(&self) -> Duration {
        Duration::from_secs(self.min_run_interval * 60)
    }

    pub fn ingest_interval(&self) -> Option<Duration> {
        self.ingest_interval.map(|minutes| Duration::from_secs(minutes * 60))
    }

    pub fn pid_file(&self) -> Option<&Path> {
        self.pid_file.as_deref()
    }
}

/// # Loading
impl Config {
    /// Creates the config at startup.
    ///
    /// Reads the config file named in the options, initializes logging,
    /// and verifies the config.
    pub fn create(options: &Options) -> Result<Self, ConfigError> {
        let config = match Self::read_config(&options.config) {
            Ok(config) => config,
            Err(ConfigError::Io(_))
                if options.config == Path::new(ROAHIST_DEFAULT_CONFIG_FILE) =>
            {
                return Err(ConfigError::other(
                    "Cannot find config file. Please use --config to \
                     specify its location."
                ))
            }
            Err(err) => {
                return Err(ConfigError::Other(format!(
                    "Error parsing config file: {}, error: {}",
                    options.config.display(), err
                )))
            }
        };
        config.init_logging()?;
        info!(
            "{} uses configuration file: {}",
            ROAHIST_SERVER_APP, options.config.display()
        );
        config.verify().map_err(|err| {
            ConfigError::Other(format!(
                "Error parsing config file: {}, error: {}",
                options.config.display(), err
            ))
        })?;
        Ok(config)
    }

    pub fn read_config(path: &Path) -> Result<Self, ConfigError> {
        Self::parse_str(&fs::read_to_string(path)?)
    }

    pub fn parse_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(Into::into)
    }

    pub fn verify(&self) -> Result<(), ConfigError> {
        if !matches!(self.source_uri.scheme(), "http" | "https") {
            return Err(ConfigError::Other(format!(
                "source_uri must be an HTTP or HTTPS URI, found {}",
                self.source_uri
            )))
        }
        if self.source_timeout == 0 {
            return Err(ConfigError::other("source_timeout must be at least 1"))
        }
        if self.min_run_interval == 0 {
            return Err(ConfigError::other(
                "min_run_interval must be at least 1"
            ))
        }
        if let Some(interval) = self.ingest_interval {
            if interval < self.min_run_interval {
                return Err(ConfigError::other(
                    "ingest_interval must not be smaller than min_run_interval"
                ))
            }
        }
        Ok(())
    }
}

/// # Logging
impl Config {
    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match self.log_type {
            LogType::File => self.file_logger(&self.log_file),
            LogType::Stderr => self.stderr_logger(),
            LogType::Syslog => self.syslog_logger(),
        }
    }

    /// Creates a stderr logger.
    fn stderr_logger(&self) -> Result<(), ConfigError> {
        self.fern_logger().chain(io::stderr()).apply().map_err(|err| {
            ConfigError::Other(format!(
                "Failed to init stderr logging: {err}"
            ))
        })
    }

    /// Creates a file logger using the file provided by `path`.
    fn file_logger(&self, path: &Path) -> Result<(), ConfigError> {
        let file = fern::log_file(path).map_err(|err| {
            ConfigError::Other(format!(
                "Failed to open log file '{}': {}", path.display(), err
            ))
        })?;
        self.fern_logger().chain(file).apply().map_err(|err| {
            ConfigError::Other(format!("Failed to init file logging: {err}"))
        })
    }

    /// Creates a syslog logger.
    #[cfg(unix)]
    fn syslog_logger(&self) -> Result<(), ConfigError> {
        let facility = syslog::Facility::from_str(
            &self.syslog_facility
        ).map_err(|_| ConfigError::other("Invalid syslog_facility"))?;
        let process = env::current_exe().ok().and_then(|path| {
            path.file_name()
                .and_then(std::ffi::OsStr::to_str)
                .map(ToString::to_string)
        }).unwrap_or_else(|| String::from("roahist"));
        let formatter = syslog::Formatter3164 {
            facility,
            hostname: None,
            process,
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter.clone())
            .or_else(|_| syslog::tcp(formatter.clone(), ("127.0.0.1", 601)))
            .or_else(|_| {
                syslog::udp(formatter, ("127.0.0.1", 0), ("127.0.0.1", 514))
            });
        match logger {
            Ok(logger) => {
                self.fern_logger().chain(logger).apply().map_err(|err| {
                    ConfigError::Other(format!("Failed to init syslog: {err}"))
                })
            }
            Err(err) => {
                Err(ConfigError::Other(format!(
                    "Cannot connect to syslog: {err}"
                )))
            }
        }
    }

    #[cfg(not(unix))]
    fn syslog_logger(&self) -> Result<(), ConfigError> {
        Err(ConfigError::other("syslog is only supported on Unix systems"))
    }

    /// Creates and returns a fern logger with log level tweaks.
    fn fern_logger(&self) -> fern::Dispatch {
        // suppress overly noisy logging
        let framework_level = self.log_level.min(LevelFilter::Warn);

        let show_target = self.log_level == LevelFilter::Trace
            || self.log_level == LevelFilter::Debug;

        fern::Dispatch::new()
            .format(move |out, message, record| {
                if show_target {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        message
                    ))
                }
                else {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        message
                    ))
                }
            })
            .level(self.log_level)
            .level_for("hyper", framework_level)
            .level_for("hyper_util", framework_level)
            .level_for("mio", framework_level)
            .level_for("reqwest", framework_level)
            .level_for("rustls", framework_level)
            .level_for("want", framework_level)
            .level_for("h2", framework_level)
    }
}


//------------ Deserializers -------------------------------------------------

/// Deserializes the storage URI.
///
/// Accepts either a URI or a plain path which is turned into a `local:`
/// URI.
fn deserialize_storage_uri<'de, D>(d: D) -> Result<Url, D::Error>
where D: Deserializer<'de> {
    let string = String::deserialize(d)?;
    storage_uri_from_str(&string).map_err(de::Error::custom)
}

fn storage_uri_from_str(s: &str) -> Result<Url, url::ParseError> {
    if s.contains("://") || s.starts_with("memory:") {
        Url::parse(s)
    }
    else {
        Url::parse(&format!("local://{s}"))
    }
}

fn deserialize_level_filter<'de, D>(d: D) -> Result<LevelFilter, D::Error>
where D: Deserializer<'de> {
    let string = String::deserialize(d)?;
    LevelFilter::from_str(&string).map_err(de::Error::custom)
}


//------------ LogType -------------------------------------------------------

/// The target to log to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogType {
    Stderr,
    File,
    Syslog,
}

impl<'de> Deserialize<'de> for LogType {
    fn deserialize<D>(d: D) -> Result<LogType, D::Error>
    where D: Deserializer<'de> {
        let string = String::deserialize(d)?;
        match string.as_str() {
            "stderr" => Ok(LogType::Stderr),
            "file" => Ok(LogType::File),
            "syslog" => Ok(LogType::Syslog),
            _ => Err(de::Error::custom(format!(
                "expected \"stderr\", \"file\", or \"syslog\", \
                 found: \"{string}\""
            ))),
        }
    }
}


//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Toml(toml::de::Error),
    Other(String),
}

impl ConfigError {
    pub fn other(s: &str) -> ConfigError {
        ConfigError::Other(s.to_string())
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::Io(err) => err.fmt(f),
            ConfigError::Toml(err) => err.fmt(f),
            ConfigError::Other(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for ConfigError { }

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Toml(err)
    }
}


//============ Tests =========================================================
