use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only show critical errors
    Quiet,
    /// Show standard information
    #[default]
    Normal,
    /// Show detailed information
    Verbose,
    /// Show all available debugging information
    Debug,
}

/// Report format for the conversion summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable report
    Human,
    /// Machine-readable JSON
    Json,
    /// One-line summary
    Summary,
}

/// Convert address-registry XML exports to delimited text
#[derive(Parser, Debug, Clone)]
#[command(name = "fias-xml-csv")]
#[command(about = "Convert FIAS/GAR XML to ';'-delimited CSV, laid out by XSD schemas")]
#[command(version)]
pub struct Cli {
    /// XML file or directory to convert
    #[arg(required_unless_present = "list_schemas")]
    pub input: Option<PathBuf>,

    /// Output file or directory
    #[arg(
        short = 'o',
        long = "output",
        help = "Output file or directory (default: 'csv' for a directory, <input>.csv for a file)"
    )]
    pub output: Option<PathBuf>,

    /// Directory of XSD schemas
    #[arg(short = 's', long = "schemas", help = "Directory with XSD schema files")]
    pub schemas: Option<PathBuf>,

    /// Number of files converted concurrently
    #[arg(
        short = 't',
        long = "threads",
        help = "Number of files converted concurrently"
    )]
    pub threads: Option<usize>,

    /// File extensions to process (comma-separated)
    #[arg(
        short = 'e',
        long = "extensions",
        help = "File extensions to process (e.g., 'xml')"
    )]
    pub extensions: Option<String>,

    /// Include file patterns (glob syntax)
    #[arg(long = "include", action = clap::ArgAction::Append)]
    pub include_patterns: Vec<String>,

    /// Exclude file patterns (glob syntax)
    #[arg(long = "exclude", action = clap::ArgAction::Append)]
    pub exclude_patterns: Vec<String>,

    /// Report format
    #[arg(short = 'f', long = "format", value_enum)]
    pub output_format: Option<OutputFormat>,

    /// Configuration file (TOML or JSON)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Maximum directory depth to descend into
    #[arg(long = "max-depth")]
    pub max_depth: Option<usize>,

    /// Follow symbolic links while walking the input directory
    #[arg(long = "follow-symlinks")]
    pub follow_symlinks: bool,

    /// Terminate rows with LF instead of CRLF
    #[arg(long = "lf")]
    pub lf: bool,

    /// Do not start output files with a UTF-8 byte order mark
    #[arg(long = "no-bom")]
    pub no_bom: bool,

    /// Show progress indicators
    #[arg(long = "progress")]
    pub progress: bool,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", help = "Enable verbose output")]
    pub verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(
        short = 'q',
        long = "quiet",
        help = "Quiet mode",
        conflicts_with_all = ["verbose", "debug"]
    )]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(long = "debug")]
    pub debug: bool,

    /// Print the resolved schema table as JSON and exit
    #[arg(long = "list-schemas", requires = "schemas")]
    pub list_schemas: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn get_extensions(&self) -> Option<Vec<String>> {
        self.extensions.as_ref().map(|extensions| {
            extensions
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else if self.debug {
            VerbosityLevel::Debug
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(input) = &self.input
            && !input.exists()
        {
            return Err(format!("Path does not exist: {}", input.display()));
        }
        if let Some(schemas) = &self.schemas
            && !schemas.is_dir()
        {
            return Err(format!(
                "Schema directory does not exist: {}",
                schemas.display()
            ));
        }
        if let Some(threads) = self.threads
            && threads == 0
        {
            return Err("Number of threads must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Where output goes when `--output` is not given
    pub fn default_output(input: &Path) -> PathBuf {
        if input.is_dir() {
            PathBuf::from("csv")
        } else {
            input.with_extension("csv")
        }
    }
}
