//! Shared CLI core functionality
//!
//! Argument groups, configuration loading, error type, output helpers and the
//! text presentation of a record session. The `powerlog` binary is a thin
//! layer over this crate so the rendering and config rules can be tested
//! without a node.

use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::Path;

use powerlog_core::PowerLogError;
use powerlog_ethereum::EthereumError;

pub mod config;
pub mod formatters;
pub mod storage;

pub use config::{PowerlogConfig, DEFAULT_CONFIG_FILE, DEFAULT_RPC_URL};
pub use formatters::{
    format_date, format_timestamp, render_record, render_record_detail, render_session,
    RecordView, SessionView,
};
pub use storage::FileSignatureStorage;

/// Common CLI arguments shared by every subcommand
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (pretty, json, toml)
    #[arg(short, long, global = true, default_value = "pretty")]
    pub format: OutputFormat,

    /// Output file (stdout if not specified)
    #[arg(short, long, global = true)]
    pub output: Option<String>,

    /// TOML configuration file
    #[arg(long, global = true, env = "POWERLOG_CONFIG")]
    pub config: Option<String>,

    /// JSON-RPC endpoint of the chain to use
    #[arg(long, global = true, env = "POWERLOG_RPC_URL")]
    pub rpc_url: Option<String>,

    /// Hex private key of the account; read-only when absent
    #[arg(long, global = true, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Cache signed decryption authorizations in this file (kept in memory otherwise)
    #[arg(long, global = true, env = "POWERLOG_SIGNATURE_FILE")]
    pub signature_file: Option<String>,
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable text
    #[value(name = "pretty")]
    #[default]
    Pretty,
    /// Pretty-printed JSON
    #[value(name = "json")]
    Json,
    /// TOML document
    #[value(name = "toml")]
    Toml,
}

/// Common result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// Common error type for CLI operations
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("{0}")]
    PowerLog(#[from] PowerLogError),

    #[error("{0}")]
    Ethereum(#[from] EthereumError),
}

impl CliError {
    /// Input rejections become `InvalidArgument`; anything else keeps its core variant
    pub fn from_core(err: PowerLogError) -> Self {
        match err {
            PowerLogError::InvalidInput(msg) => CliError::InvalidArgument(msg),
            other => CliError::PowerLog(other),
        }
    }
}

/// Common CLI utilities
pub struct CliUtils;

impl CliUtils {
    /// Read a file and return its contents
    pub fn read_file<P: AsRef<Path>>(path: P) -> CliResult<String> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CliError::FileNotFound(path.to_string_lossy().to_string()));
        }

        fs::read_to_string(path).map_err(CliError::Io)
    }

    /// Write content to a file or stdout
    pub fn write_output(content: &str, output_path: Option<&str>) -> CliResult<()> {
        match output_path {
            Some(path) => {
                fs::write(path, content).map_err(CliError::Io)?;
                tracing::debug!("Output written to: {}", path);
            }
            None => {
                print!("{}", content);
                if !content.ends_with('\n') {
                    println!();
                }
            }
        }
        Ok(())
    }

    /// Format a JSON value for the machine-readable output formats
    pub fn format_json(value: &Value, format: &OutputFormat) -> CliResult<String> {
        match format {
            OutputFormat::Pretty | OutputFormat::Json => {
                serde_json::to_string_pretty(value).map_err(CliError::Json)
            }
            OutputFormat::Toml => match value {
                Value::Object(obj) => {
                    toml::to_string_pretty(obj).map_err(|e| CliError::Processing(e.to_string()))
                }
                // TOML documents are tables; wrap scalars and arrays
                other => {
                    let wrapped = serde_json::json!({ "value": other });
                    toml::to_string_pretty(&wrapped)
                        .map_err(|e| CliError::Processing(e.to_string()))
                }
            },
        }
    }

    /// Render `value` as `text` for pretty output, or serialize it otherwise
    pub fn render<T: Serialize>(value: &T, text: impl FnOnce() -> String, format: &OutputFormat) -> CliResult<String> {
        match format {
            OutputFormat::Pretty => Ok(text()),
            other => Self::format_json(&serde_json::to_value(value)?, other),
        }
    }

    /// Create output directory if it doesn't exist
    pub fn ensure_output_dir<P: AsRef<Path>>(path: P) -> CliResult<()> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path).map_err(CliError::Io)?;
        }
        Ok(())
    }

    /// Parse a strictly positive integer argument before anything touches the network
    pub fn positive_integer(name: &str, raw: &str) -> CliResult<u64> {
        powerlog_core::parse_positive_integer(name, raw).map_err(CliError::from_core)
    }

    /// Parse a comma-separated list of positive integers
    pub fn positive_integer_list(name: &str, raw: &str) -> CliResult<Vec<u64>> {
        raw.split(',')
            .map(|part| Self::positive_integer(name, part))
            .collect()
    }
}

/// Install the global `tracing` subscriber
///
/// Logs go to stderr so stdout stays parseable in json/toml mode.
#[cfg(feature = "std")]
pub fn init_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    // A second init (e.g. in tests) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Macro for consistent error handling across CLI commands
#[macro_export]
macro_rules! cli_error {
    ($($arg:tt)*) => {
        return Err($crate::CliError::Processing(format!($($arg)*)).into())
    };
}
