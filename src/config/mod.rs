//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{CacheConfig, OutputForm};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "fragcache";
const ENV_PREFIX: &str = "FRAGCACHE";

/// Command-line arguments for the fragcache binary.
#[derive(Debug, Parser)]
#[command(
    name = "fragcache",
    version,
    about = "Inspect and invalidate the widget fragment cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "FRAGCACHE_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath,
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Invalidate every fragment stored under the given tags.
    Expire(ExpireArgs),
    /// Print the current token of a tag.
    Token(TokenArgs),
    /// Print the cache key a widget call resolves to.
    Key(KeyArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ExpireArgs {
    #[arg(value_name = "TAG", required = true)]
    pub tags: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct TokenArgs {
    #[arg(value_name = "TAG")]
    pub tag: String,
}

#[derive(Debug, Args, Clone)]
pub struct KeyArgs {
    /// Template identity of the widget.
    #[arg(long)]
    pub template: String,

    /// Type name of the widget.
    #[arg(long = "type-name", value_name = "NAME")]
    pub type_name: String,

    #[arg(long, value_enum, default_value_t = FormArg::Html)]
    pub form: FormArg,

    /// Locale to derive the key for; defaults to `cache.default_locale`.
    #[arg(long)]
    pub locale: Option<String>,

    /// Widget tag; repeat for several.
    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,

    /// Call arguments, each a JSON value.
    #[arg(value_name = "ARG_JSON")]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormArg {
    Html,
    Data,
}

impl From<FormArg> for OutputForm {
    fn from(form: FormArg) -> Self {
        match form {
            FormArg::Html => OutputForm::Html,
            FormArg::Data => OutputForm::Data,
        }
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Force JSON logging output.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the cache driver.
    #[arg(long = "cache-driver", value_name = "DRIVER", global = true)]
    pub cache_driver: Option<String>,

    /// Override the directory used by the file driver.
    #[arg(
        long = "cache-dir",
        value_name = "PATH",
        value_hint = ValueHint::DirPath,
        global = true
    )]
    pub cache_dir: Option<PathBuf>,

    /// Switch caching on or off.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub cache_enabled: Option<bool>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(driver) = overrides.cache_driver.as_ref() {
            self.cache.driver = Some(driver.clone());
        }
        if let Some(dir) = overrides.cache_dir.as_ref() {
            self.cache.file_directory = Some(dir.clone());
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { logging, cache } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();

    let driver = match cache.driver {
        Some(driver) => non_empty(driver, "cache.driver")?,
        None => defaults.driver,
    };

    let memory_capacity = match cache.memory_capacity {
        Some(capacity) => NonZeroUsize::new(capacity)
            .ok_or_else(|| LoadError::invalid("cache.memory_capacity", "must be greater than zero"))?
            .get(),
        None => defaults.memory_capacity,
    };

    let file_directory = cache.file_directory.unwrap_or(defaults.file_directory);
    if file_directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "cache.file_directory",
            "path must not be empty",
        ));
    }

    let default_locale = match cache.default_locale {
        Some(locale) => non_empty(locale, "cache.default_locale")?,
        None => defaults.default_locale,
    };

    Ok(CacheConfig {
        enabled: cache.enabled.unwrap_or(defaults.enabled),
        driver,
        memory_capacity,
        file_directory,
        default_locale,
    })
}

fn non_empty(value: String, key: &'static str) -> Result<String, LoadError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LoadError::invalid(key, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    driver: Option<String>,
    memory_capacity: Option<usize>,
    file_directory: Option<PathBuf>,
    default_locale: Option<String>,
}
