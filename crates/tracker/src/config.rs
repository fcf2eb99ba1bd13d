//! Typed configuration: built-in defaults, overlaid by an optional INI-like
//! config file, overlaid by CLI flags (§4.6). The CLI surface mirrors the
//! distilled spec's flags one-for-one; the file format is hand-rolled since
//! the wire format it reads is explicitly INI-like, not TOML, even though
//! the in-memory record the rest of the core consumes is the same
//! `Serialize`/`Deserialize` type `--print-config` dumps via `toml`.

use std::fmt;
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

/// Verbosity, in the original's 0..4 scheme: 0 is the quietest *logging*
/// level (only errors), 4 disables logging entirely.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
pub enum LogLevel {
    Error = 0,
    Warning = 1,
    Log = 2,
    Debug = 3,
    None = 4,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Error,
            1 => Self::Warning,
            2 => Self::Log,
            3 => Self::Debug,
            _ => Self::None,
        }
    }

    pub fn bump(self) -> Self {
        Self::from_u8((self as u8 + 1).min(4))
    }

    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            Self::Error => log::LevelFilter::Error,
            Self::Warning => log::LevelFilter::Warn,
            Self::Log => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::None => log::LevelFilter::Off,
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Warning
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub address: SocketAddr,
    /// `listen()` backlog; defaults to the dispatcher's task-slot count.
    pub listen_backlog: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 1337),
            listen_backlog: 128,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub worker_count: usize,
    pub task_slots: usize,
    pub max_sleep_us: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            task_slots: 128,
            max_sleep_us: 10_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub capacity: usize,
    pub ttl_seconds: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            capacity: 65536,
            ttl_seconds: 1800,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub directory: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            directory: PathBuf::from("log"),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub dispatcher: DispatcherConfig,
    pub registry: RegistryConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Apply CLI-flag overrides on top of whatever the config file (or
    /// defaults) already set. CLI always wins (§4.6).
    fn apply_cli(mut self, args: &CliArgs) -> Self {
        if let Some(port) = args.port {
            self.network.address.set_port(port);
        }
        if let Some(max_conn) = args.max_conn {
            self.dispatcher.worker_count = max_conn;
        }
        if let Some(ttl) = args.cache_time {
            self.registry.ttl_seconds = ttl;
        }
        if let Some(level) = args.resolved_verbosity(self.logging.level) {
            self.logging.level = level;
        }

        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config file {path:?} at line {line}: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: &'static str,
    },
    #[error("invalid value for {key:?}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// The handful of keys the INI-like config file recognizes (§4.6); `None`
/// means "not set in this file", leaving the built-in default (or an
/// earlier-merged value) in place.
#[derive(Debug, Default, PartialEq, Eq)]
struct FileConfig {
    port: Option<u16>,
    verbose: Option<u8>,
    max_conn: Option<usize>,
    cache_time: Option<u64>,
}

/// A small hand-written scanner over `[section]` headers and `key = value`
/// pairs, grounded in the original's INI-like format rather than pulled in
/// via a general-purpose INI crate: the recognized key set is fixed and
/// small (§9 design notes apply the same reasoning to the protocol parser).
fn parse_ini(path: &Path, contents: &str) -> Result<FileConfig, ConfigError> {
    let mut cfg = FileConfig::default();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.split(['#', ';']).next().unwrap_or("").trim();

        if line.is_empty() || line.starts_with('[') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigError::Parse {
                path: path.to_path_buf(),
                line: idx + 1,
                reason: "expected 'key = value'",
            });
        };

        let key = key.trim();
        let value = value.trim();

        match key {
            "port" => {
                cfg.port = Some(value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                })?)
            }
            "verbose" => {
                cfg.verbose = Some(value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                })?)
            }
            "max-conn" => {
                cfg.max_conn = Some(value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                })?)
            }
            "cache-time" => {
                cfg.cache_time = Some(value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                })?)
            }
            _ => continue,
        }
    }

    Ok(cfg)
}

impl FileConfig {
    fn into_config(self) -> Config {
        let mut config = Config::default();

        if let Some(port) = self.port {
            config.network.address.set_port(port);
        }
        if let Some(verbose) = self.verbose {
            config.logging.level = LogLevel::from_u8(verbose);
        }
        if let Some(max_conn) = self.max_conn {
            config.dispatcher.worker_count = max_conn;
        }
        if let Some(cache_time) = self.cache_time {
            config.registry.ttl_seconds = cache_time;
        }

        config
    }
}

/// Raw CLI flags (§6 / §4.6), parsed with `clap`'s derive API exactly as
/// the teacher's binaries do.
#[derive(Parser, Debug)]
#[command(name = "peer-tracker", about = "Peer-discovery tracker for a file-sharing swarm")]
pub struct CliArgs {
    /// Verbosity 0..4 (0=ERROR .. 4=NONE). Repeating the bare flag bumps
    /// the level upward by one each time.
    #[arg(short = 'v', long = "verbose", num_args = 0..=1, default_missing_value = "bump")]
    verbose: Option<String>,

    #[arg(short = 'p', long = "port")]
    port: Option<u16>,

    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    #[arg(short = 'm', long = "max-conn")]
    max_conn: Option<usize>,

    #[arg(short = 't', long = "cache-time")]
    cache_time: Option<u64>,

    /// Serialize the fully resolved configuration to stdout as TOML and
    /// exit without starting the tracker.
    #[arg(long = "print-config")]
    pub print_config: bool,
}

impl CliArgs {
    fn resolved_verbosity(&self, current: LogLevel) -> Option<LogLevel> {
        match self.verbose.as_deref() {
            None => None,
            Some("bump") => Some(current.bump()),
            Some(value) => value.parse::<u8>().ok().map(LogLevel::from_u8),
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            toml::to_string_pretty(self).unwrap_or_else(|_| "<unserializable config>".to_string())
        )
    }
}

/// Resolve CLI args + an optional config file into a single `Config`,
/// CLI-over-file-over-defaults (§4.6).
pub fn resolve(args: &CliArgs) -> Result<Config, ConfigError> {
    let base = match &args.config {
        Some(path) => {
            let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            parse_ini(path, &contents)?.into_config()
        }
        None => Config::default(),
    };

    Ok(base.apply_cli(args))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> CliArgs {
        CliArgs {
            verbose: None,
            port: None,
            config: None,
            max_conn: None,
            cache_time: None,
            print_config: false,
        }
    }

    #[test]
    fn defaults_when_nothing_set() {
        let cfg = resolve(&args()).unwrap();
        assert_eq!(cfg.network.address.port(), 1337);
        assert_eq!(cfg.registry.ttl_seconds, 1800);
    }

    #[test]
    fn cli_overrides_defaults() {
        let mut a = args();
        a.port = Some(4444);
        a.cache_time = Some(60);

        let cfg = resolve(&a).unwrap();
        assert_eq!(cfg.network.address.port(), 4444);
        assert_eq!(cfg.registry.ttl_seconds, 60);
    }

    #[test]
    fn file_sets_values_cli_still_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.conf");
        fs::write(
            &path,
            "[tracker]\nport = 5555\nmax-conn = 16\ncache-time = 900\n",
        )
        .unwrap();

        let mut a = args();
        a.config = Some(path);
        a.port = Some(9999);

        let cfg = resolve(&a).unwrap();
        assert_eq!(cfg.network.address.port(), 9999, "cli wins over file");
        assert_eq!(cfg.dispatcher.worker_count, 16, "file wins over default");
        assert_eq!(cfg.registry.ttl_seconds, 900);
    }

    #[test]
    fn verbose_bare_flag_bumps_one_level() {
        let mut a = args();
        a.verbose = Some("bump".to_string());

        let cfg = resolve(&a).unwrap();
        assert_eq!(cfg.logging.level, LogLevel::default().bump());
    }

    #[test]
    fn verbose_explicit_value_sets_level() {
        let mut a = args();
        a.verbose = Some("3".to_string());

        let cfg = resolve(&a).unwrap();
        assert_eq!(cfg.logging.level, LogLevel::Debug);
    }

    #[test]
    fn ini_parser_ignores_comments_and_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.conf");
        fs::write(
            &path,
            "[tracker]\n; a comment\nport = 2222 # inline note\nunused = yes\n",
        )
        .unwrap();

        let cfg = parse_ini(&path, &fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(cfg.port, Some(2222));
    }

    #[test]
    fn ini_parser_rejects_lines_without_equals() {
        let err = parse_ini(Path::new("x"), "not-a-kv-line\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { line: 1, .. }));
    }
}
