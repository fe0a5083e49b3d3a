use std::collections::HashMap;
use std::io::Write;
use log::{debug, info, LevelFilter};
use serde::{Deserialize, Serialize};
use env_logger::{Builder, Target, WriteStyle};

/// Logging subsystems that can be given their own level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoggingSubsystem {
    /// Everything in this crate
    #[serde(rename = "main")]
    Main,
    /// TTL caches
    #[serde(rename = "cache")]
    Cache,
    /// Rate-limited request queue
    #[serde(rename = "queue")]
    Queue,
    /// Upstream catalog client
    #[serde(rename = "catalog")]
    Catalog,
    /// Artist reconciliation and credit cleaning
    #[serde(rename = "reconciler")]
    Reconciler,
    /// HTTP client operations
    #[serde(rename = "http")]
    Http,
    /// Configuration loading and parsing
    #[serde(rename = "config")]
    Config,
    /// Third-party dependencies
    #[serde(rename = "deps")]
    Dependencies,
}

impl LoggingSubsystem {
    /// Get the module prefix for this subsystem
    pub fn module_prefix(&self) -> &'static str {
        match self {
            LoggingSubsystem::Main => "labelmeta",
            LoggingSubsystem::Cache => "labelmeta::helpers::ttlcache",
            LoggingSubsystem::Queue => "labelmeta::helpers::request_queue",
            LoggingSubsystem::Catalog => "labelmeta::helpers::catalog",
            LoggingSubsystem::Reconciler => "labelmeta::helpers::reconciler,labelmeta::helpers::artistsplitter",
            LoggingSubsystem::Http => "labelmeta::helpers::http_client,reqwest,hyper",
            LoggingSubsystem::Config => "labelmeta::config",
            LoggingSubsystem::Dependencies => "tokio,mio,rustls",
        }
    }

    /// Get all available subsystems
    pub fn all() -> Vec<LoggingSubsystem> {
        vec![
            LoggingSubsystem::Main,
            LoggingSubsystem::Cache,
            LoggingSubsystem::Queue,
            LoggingSubsystem::Catalog,
            LoggingSubsystem::Reconciler,
            LoggingSubsystem::Http,
            LoggingSubsystem::Config,
            LoggingSubsystem::Dependencies,
        ]
    }

    fn parse(name: &str) -> Option<LoggingSubsystem> {
        match name.to_lowercase().as_str() {
            "main" => Some(LoggingSubsystem::Main),
            "cache" => Some(LoggingSubsystem::Cache),
            "queue" => Some(LoggingSubsystem::Queue),
            "catalog" => Some(LoggingSubsystem::Catalog),
            "reconciler" => Some(LoggingSubsystem::Reconciler),
            "http" => Some(LoggingSubsystem::Http),
            "config" => Some(LoggingSubsystem::Config),
            "deps" | "dependencies" => Some(LoggingSubsystem::Dependencies),
            _ => None,
        }
    }
}

/// Logging configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Global log level (off, error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Target for log output (stdout, stderr)
    #[serde(default = "default_target")]
    pub target: String,

    #[serde(default = "default_timestamps")]
    pub timestamps: bool,

    #[serde(default = "default_colors")]
    pub colors: bool,

    /// Subsystem-specific log levels; unknown names are used as module paths
    #[serde(default)]
    pub subsystems: HashMap<String, String>,

    #[serde(default)]
    pub include_module_path: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_target() -> String {
    "stderr".to_string()
}

fn default_timestamps() -> bool {
    true
}

fn default_colors() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            target: default_target(),
            timestamps: default_timestamps(),
            colors: default_colors(),
            subsystems: HashMap::new(),
            include_module_path: false,
        }
    }
}

impl LoggingConfig {
    /// Load logging configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self, String> {
        serde_json::from_str(json)
            .map_err(|e| format!("Failed to parse logging config JSON: {}", e))
    }

    /// Convert string log level to LevelFilter
    fn parse_log_level(level: &str) -> LevelFilter {
        match level.to_lowercase().as_str() {
            "off" => LevelFilter::Off,
            "error" => LevelFilter::Error,
            "warn" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "debug" => LevelFilter::Debug,
            "trace" => LevelFilter::Trace,
            _ => {
                eprintln!("Warning: Unknown log level '{}', defaulting to 'info'", level);
                LevelFilter::Info
            }
        }
    }

    /// Module-level filters as (module, level) pairs, sorted for stable output
    fn module_filters(&self) -> Vec<(String, String)> {
        let mut filters = Vec::new();
        for (name, level) in &self.subsystems {
            match LoggingSubsystem::parse(name) {
                Some(subsystem) => {
                    for prefix in subsystem.module_prefix().split(',') {
                        filters.push((prefix.trim().to_string(), level.clone()));
                    }
                }
                None => filters.push((name.clone(), level.clone())),
            }
        }
        filters.sort();
        filters
    }

    /// Build the filter string in env_logger syntax
    pub fn build_filter_string(&self) -> String {
        let mut filter_parts = vec![self.level.clone()];
        for (module, level) in self.module_filters() {
            filter_parts.push(format!("{}={}", module, level));
        }
        filter_parts.join(",")
    }

    /// Initialize the logger with this configuration
    pub fn initialize_logger(&self) -> Result<(), String> {
        let filter_string = self.build_filter_string();

        let mut builder = Builder::new();
        builder.parse_env("RUST_LOG");
        builder.filter(None, Self::parse_log_level(&self.level));
        for (module, level) in self.module_filters() {
            builder.filter(Some(&module), Self::parse_log_level(&level));
        }

        builder.write_style(if self.colors { WriteStyle::Auto } else { WriteStyle::Never });

        match self.target.to_lowercase().as_str() {
            "stdout" => {
                builder.target(Target::Stdout);
            }
            "stderr" => {
                builder.target(Target::Stderr);
            }
            _ => return Err(format!("Unknown logging target: {}", self.target)),
        }

        let include_module_path = self.include_module_path;
        let timestamps = self.timestamps;

        builder.format(move |buf, record| {
            let mut output = String::new();

            if timestamps {
                output.push_str(&format!("[{}] ", chrono::Local::now().format("%Y-%m-%d %H:%M:%S")));
            }

            output.push_str(&format!("[{}] ", record.level()));

            if include_module_path {
                if let Some(module) = record.module_path() {
                    output.push_str(&format!("[{}] ", module));
                }
            }

            output.push_str(&format!("{}", record.args()));

            writeln!(buf, "{}", output)
        });

        builder.try_init()
            .map_err(|e| format!("Failed to initialize logger: {}", e))?;

        info!("Logging initialized with filter: {}", filter_string);
        Ok(())
    }
}

/// Initialize logging from the application config, raising the level for
/// `--debug` / `--verbose` style flags
pub fn initialize_logging_with_level_override(config: &LoggingConfig, debug_mode: bool) -> Result<(), String> {
    let mut config = config.clone();
    if debug_mode {
        config.level = "debug".to_string();
    }
    config.initialize_logger()?;
    if debug_mode {
        debug!("Debug logging enabled via command line");
    }
    Ok(())
}
