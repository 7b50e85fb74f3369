use crate::cli::{Cli, OutputFormat};
use crate::converter::{ConverterOptions, CsvFormat, LineEnding};
use crate::file_discovery::FileDiscovery;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

const ENV_PREFIX: &str = "FIAS_XML_CSV_";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub conversion: ConversionConfig,
    pub schema: SchemaConfig,
    pub csv: CsvConfig,
    pub output: OutputConfig,
    pub files: FileConfig,
}

/// Conversion scheduling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConversionConfig {
    /// Number of files converted concurrently
    pub threads: Option<usize>,
    /// Show progress indicators
    pub show_progress: bool,
    /// Log a progress line every this many records
    pub progress_interval: u64,
}

/// Schema source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SchemaConfig {
    /// Directory of XSD files; without one every file is sampled
    pub directory: Option<PathBuf>,
}

/// Output file layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CsvConfig {
    pub delimiter: char,
    pub quote: char,
    pub line_ending: LineEnding,
    pub utf8_bom: bool,
}

/// Report configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format
    pub format: OutputFormatConfig,
    /// Verbose output
    pub verbose: bool,
    /// Quiet mode (errors only)
    pub quiet: bool,
}

/// File processing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    /// File extensions to process
    pub extensions: Vec<String>,
    /// Include patterns (glob syntax)
    pub include_patterns: Vec<String>,
    /// Exclude patterns (glob syntax)
    pub exclude_patterns: Vec<String>,
    /// Maximum directory depth below the input directory (None = unlimited)
    pub max_depth: Option<usize>,
    /// Follow symbolic links while walking the input directory
    pub follow_symlinks: bool,
}

/// Output format configuration (serializable version of CLI OutputFormat)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormatConfig {
    #[default]
    Human,
    Json,
    Summary,
}

impl From<OutputFormat> for OutputFormatConfig {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Human => OutputFormatConfig::Human,
            OutputFormat::Json => OutputFormatConfig::Json,
            OutputFormat::Summary => OutputFormatConfig::Summary,
        }
    }
}

impl From<OutputFormatConfig> for OutputFormat {
    fn from(format: OutputFormatConfig) -> Self {
        match format {
            OutputFormatConfig::Human => OutputFormat::Human,
            OutputFormatConfig::Json => OutputFormat::Json,
            OutputFormatConfig::Summary => OutputFormat::Summary,
        }
    }
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            threads: None,
            show_progress: false,
            progress_interval: 10_000,
        }
    }
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            delimiter: ';',
            quote: '"',
            line_ending: LineEnding::Crlf,
            utf8_bom: true,
        }
    }
}

impl CsvConfig {
    /// Byte-level format; delimiter and quote must be ASCII
    pub fn to_format(&self) -> Result<CsvFormat> {
        let byte = |c: char, what: &str| {
            u8::try_from(c)
                .ok()
                .filter(u8::is_ascii)
                .ok_or_else(|| {
                    ConfigError::Validation(format!(
                        "CSV {} must be an ASCII character: {:?}",
                        what, c
                    ))
                })
        };

        Ok(CsvFormat {
            delimiter: byte(self.delimiter, "delimiter")?,
            quote: byte(self.quote, "quote")?,
            line_ending: self.line_ending,
            utf8_bom: self.utf8_bom,
        })
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormatConfig::Human,
            verbose: false,
            quiet: false,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["xml".to_string()],
            include_patterns: vec![],
            exclude_patterns: vec![],
            max_depth: None,
            follow_symlinks: false,
        }
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        let mut config = Config::default();

        if let Some(config_path) = &cli.config {
            let file_config = Self::load_from_file(config_path).await?;
            config = Self::merge_configs(config, file_config);
        } else if let Some(found_config) = Self::find_config_file().await? {
            config = Self::merge_configs(config, found_config);
        }

        config = Self::apply_environment_overrides(config)?;
        config = Self::merge_with_cli(config, cli);

        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                // Try TOML first, then JSON
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    Ok(serde_json::from_str(&content)?)
                }
            }
        }
    }

    /// Find configuration file in standard locations
    pub async fn find_config_file() -> Result<Option<Config>> {
        let config_names = [
            "fias-xml-csv.toml",
            "fias-xml-csv.json",
            ".fias-xml-csv.toml",
            ".fias-xml-csv.json",
        ];

        for name in &config_names {
            let path = PathBuf::from(name);
            if path.exists() {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("fias-xml-csv");
            for name in &config_names {
                let path = app_config_dir.join(name);
                if path.exists() {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> Result<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        let var = |name: &str| env.get(&format!("{}{}", ENV_PREFIX, name));

        if let Some(threads) = var("THREADS") {
            config.conversion.threads = Some(parse_env("THREADS", &threads)?);
        }
        if let Some(interval) = var("PROGRESS_INTERVAL") {
            config.conversion.progress_interval = parse_env("PROGRESS_INTERVAL", &interval)?;
        }

        if let Some(directory) = var("SCHEMA_DIR") {
            config.schema.directory = Some(PathBuf::from(directory));
        }

        if let Some(delimiter) = var("DELIMITER") {
            // Not trimmed, a tab is a valid delimiter
            config.csv.delimiter = delimiter
                .parse()
                .map_err(|_| invalid_env("DELIMITER", &delimiter))?;
        }
        if let Some(line_ending) = var("LINE_ENDING") {
            config.csv.line_ending = match line_ending.to_lowercase().as_str() {
                "lf" => LineEnding::Lf,
                "crlf" => LineEnding::Crlf,
                _ => return Err(invalid_env("LINE_ENDING", &line_ending)),
            };
        }
        if let Some(bom) = var("UTF8_BOM") {
            config.csv.utf8_bom = parse_env("UTF8_BOM", &bom)?;
        }

        if let Some(verbose) = var("VERBOSE") {
            config.output.verbose = parse_env("VERBOSE", &verbose)?;
        }
        if let Some(quiet) = var("QUIET") {
            config.output.quiet = parse_env("QUIET", &quiet)?;
        }
        if let Some(format) = var("FORMAT") {
            config.output.format = match format.to_lowercase().as_str() {
                "human" => OutputFormatConfig::Human,
                "json" => OutputFormatConfig::Json,
                "summary" => OutputFormatConfig::Summary,
                _ => return Err(invalid_env("FORMAT", &format)),
            };
        }

        if let Some(extensions) = var("EXTENSIONS") {
            config.files.extensions = split_list(&extensions);
        }
        if let Some(depth) = var("MAX_DEPTH") {
            config.files.max_depth = Some(parse_env("MAX_DEPTH", &depth)?);
        }
        if let Some(follow) = var("FOLLOW_SYMLINKS") {
            config.files.follow_symlinks = parse_env("FOLLOW_SYMLINKS", &follow)?;
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration; only flags given on the command line win
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if cli.threads.is_some() {
            config.conversion.threads = cli.threads;
        }
        if cli.progress {
            config.conversion.show_progress = true;
        }

        if let Some(schemas) = &cli.schemas {
            config.schema.directory = Some(schemas.clone());
        }

        if cli.lf {
            config.csv.line_ending = LineEnding::Lf;
        }
        if cli.no_bom {
            config.csv.utf8_bom = false;
        }

        if let Some(format) = cli.output_format {
            config.output.format = format.into();
        }
        if cli.verbose || cli.debug {
            config.output.verbose = true;
            config.output.quiet = false;
        }
        if cli.quiet {
            config.output.quiet = true;
            config.output.verbose = false;
        }

        if let Some(extensions) = cli.get_extensions() {
            config.files.extensions = extensions;
        }
        if !cli.include_patterns.is_empty() {
            config.files.include_patterns = cli.include_patterns.clone();
        }
        if !cli.exclude_patterns.is_empty() {
            config.files.exclude_patterns = cli.exclude_patterns.clone();
        }
        if cli.max_depth.is_some() {
            config.files.max_depth = cli.max_depth;
        }
        if cli.follow_symlinks {
            config.files.follow_symlinks = true;
        }

        config
    }

    /// Merge two configurations (second takes precedence for set values)
    pub fn merge_configs(mut base: Config, override_config: Config) -> Config {
        if override_config.conversion.threads.is_some() {
            base.conversion.threads = override_config.conversion.threads;
        }
        base.conversion.show_progress = override_config.conversion.show_progress;
        base.conversion.progress_interval = override_config.conversion.progress_interval;

        if override_config.schema.directory.is_some() {
            base.schema.directory = override_config.schema.directory;
        }

        base.csv = override_config.csv;

        base.output.format = override_config.output.format;
        base.output.verbose = override_config.output.verbose;
        base.output.quiet = override_config.output.quiet;

        if !override_config.files.extensions.is_empty() {
            base.files.extensions = override_config.files.extensions;
        }
        if !override_config.files.include_patterns.is_empty() {
            base.files.include_patterns = override_config.files.include_patterns;
        }
        if !override_config.files.exclude_patterns.is_empty() {
            base.files.exclude_patterns = override_config.files.exclude_patterns;
        }
        if override_config.files.max_depth.is_some() {
            base.files.max_depth = override_config.files.max_depth;
        }
        base.files.follow_symlinks = override_config.files.follow_symlinks;

        base
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if let Some(threads) = config.conversion.threads {
            if threads == 0 {
                return Err(ConfigError::Validation(
                    "Number of threads must be greater than 0".to_string(),
                ));
            }
            if threads > 1000 {
                return Err(ConfigError::Validation(
                    "Number of threads cannot exceed 1000".to_string(),
                ));
            }
        }

        if config.conversion.progress_interval == 0 {
            return Err(ConfigError::Validation(
                "Progress interval must be greater than 0".to_string(),
            ));
        }

        let format = config.csv.to_format()?;
        if format.delimiter == format.quote {
            return Err(ConfigError::Validation(
                "CSV delimiter and quote must differ".to_string(),
            ));
        }
        if matches!(format.delimiter, b'\r' | b'\n') || matches!(format.quote, b'\r' | b'\n') {
            return Err(ConfigError::Validation(
                "CSV delimiter and quote cannot be line breaks".to_string(),
            ));
        }

        if config.output.verbose && config.output.quiet {
            return Err(ConfigError::Validation(
                "Cannot enable both verbose and quiet modes".to_string(),
            ));
        }

        if config.files.extensions.is_empty() {
            return Err(ConfigError::Validation(
                "At least one file extension must be specified".to_string(),
            ));
        }

        for ext in &config.files.extensions {
            if ext.contains('/') || ext.contains('\\') || ext.contains('.') {
                return Err(ConfigError::Validation(format!(
                    "Invalid file extension: {}",
                    ext
                )));
            }
        }

        Ok(())
    }

    /// Get the effective thread count
    pub fn get_thread_count(config: &Config) -> usize {
        config.conversion.threads.unwrap_or_else(num_cpus::get)
    }

    /// Input file discovery for a validated configuration
    pub fn file_discovery(config: &Config) -> crate::error::Result<FileDiscovery> {
        Ok(FileDiscovery::new()
            .with_extensions(config.files.extensions.clone())
            .with_include_patterns(config.files.include_patterns.clone())?
            .with_exclude_patterns(config.files.exclude_patterns.clone())?
            .with_max_depth(config.files.max_depth)
            .with_follow_symlinks(config.files.follow_symlinks))
    }

    /// Converter settings derived from a validated configuration
    pub fn converter_options(config: &Config) -> Result<ConverterOptions> {
        Ok(ConverterOptions {
            csv: config.csv.to_format()?,
            progress_interval: config.conversion.progress_interval,
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| invalid_env(name, value))
}

fn invalid_env(name: &str, value: &str) -> ConfigError {
    ConfigError::Environment(format!("Invalid {}{} value: {}", ENV_PREFIX, name, value))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
