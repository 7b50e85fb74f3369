use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use chrono::Utc;
use tracing::{error, info};

use fias_xml_csv::config::Config;
use fias_xml_csv::output::render_schema_table;
use fias_xml_csv::{
    BatchConfig, BatchSummary, CancellationToken, Cli, ConfigManager, ConversionError,
    ConversionOutcome, ConversionProgress, DirectoryConverter, Output, ProgressCallback,
    SchemaResolver, SchemaTable, VerbosityLevel, XmlToCsvConverter, logging,
};

/// Exit status after Ctrl-C
const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    if let Err(e) = logging::init_logging(cli.verbosity()) {
        eprintln!("Warning: {}", e);
    }

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            if err
                .downcast_ref::<ConversionError>()
                .is_some_and(ConversionError::is_cancellation)
            {
                eprintln!("Cancelled");
                return ExitCode::from(EXIT_CANCELLED);
            }
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    cli.validate().map_err(anyhow::Error::msg)?;

    let config = ConfigManager::load_config(&cli)
        .await
        .context("Failed to load configuration")?;

    let table = match &config.schema.directory {
        Some(dir) => SchemaResolver::new()
            .resolve(dir)
            .await
            .with_context(|| format!("Failed to resolve schemas in {}", dir.display()))?,
        None => {
            info!("No schema directory configured, columns will be sampled");
            SchemaTable::empty()
        }
    };

    if cli.list_schemas {
        println!("{}", render_schema_table(&table)?);
        return Ok(ExitCode::SUCCESS);
    }

    let input = cli.input.clone().context("No input path given")?;
    let output_path = cli
        .output
        .clone()
        .unwrap_or_else(|| Cli::default_output(&input));

    let converter = XmlToCsvConverter::with_options(
        table.into_shared(),
        ConfigManager::converter_options(&config)?,
    );

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            watcher.cancel();
        }
    });

    let verbosity = report_verbosity(&cli, &config);
    let output = Output::new(verbosity).with_format(config.output.format.into());

    let summary = if input.is_dir() {
        convert_directory(converter, &config, &input, &output_path, cancel, verbosity).await?
    } else {
        convert_single_file(&converter, &input, &output_path, &cancel).await?
    };

    print!("{}", output.render(&summary)?);

    Ok(if summary.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn convert_directory(
    converter: XmlToCsvConverter,
    config: &Config,
    input: &Path,
    output_path: &Path,
    cancel: CancellationToken,
    verbosity: VerbosityLevel,
) -> anyhow::Result<BatchSummary> {
    let discovery = ConfigManager::file_discovery(config)?;

    let walker = DirectoryConverter::new(converter)
        .with_discovery(discovery)
        .with_config(BatchConfig {
            max_concurrent_conversions: ConfigManager::get_thread_count(config),
            ..BatchConfig::default()
        })
        .with_cancellation(cancel);

    let progress_callback: Option<ProgressCallback> = if config.conversion.show_progress {
        let progress_output = Output::new(verbosity);
        Some(Arc::new(move |progress: ConversionProgress| {
            eprintln!("{}", progress_output.format_progress(&progress));
        }))
    } else {
        None
    };

    Ok(walker
        .convert_directory_with_progress(input, output_path, progress_callback)
        .await?)
}

async fn convert_single_file(
    converter: &XmlToCsvConverter,
    input: &Path,
    output_path: &Path,
    cancel: &CancellationToken,
) -> anyhow::Result<BatchSummary> {
    let target = single_file_target(input, output_path);
    let started_at = Utc::now();
    let start = Instant::now();

    let outcome = match converter.convert_file(input, &target, cancel).await {
        Ok(records) => ConversionOutcome::converted(
            input.to_path_buf(),
            target,
            records,
            start.elapsed(),
        ),
        Err(err) if err.is_cancellation() => return Err(err.into()),
        Err(err) => {
            error!(file = %input.display(), error = %err, "Conversion failed");
            ConversionOutcome::failed(input.to_path_buf(), target, &err, start.elapsed())
        }
    };

    Ok(BatchSummary::aggregate(
        vec![outcome],
        started_at,
        start.elapsed(),
    ))
}

/// An existing directory receives `<stem>.csv`; anything else is the file itself
fn single_file_target(input: &Path, output_path: &Path) -> PathBuf {
    if output_path.is_dir() {
        let stem = input.file_stem().unwrap_or_default().to_string_lossy();
        output_path.join(format!("{}.csv", stem))
    } else {
        output_path.to_path_buf()
    }
}

fn report_verbosity(cli: &Cli, config: &Config) -> VerbosityLevel {
    if config.output.quiet {
        VerbosityLevel::Quiet
    } else if cli.debug {
        VerbosityLevel::Debug
    } else if config.output.verbose {
        VerbosityLevel::Verbose
    } else {
        VerbosityLevel::Normal
    }
}
