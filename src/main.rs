use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tui_snapshots::capture::{CaptureConfig, CaptureRequest, Capturer, OutputFormat};
use tui_snapshots::compare::{ComparisonReport, ComparisonStatus, compare_paths};
use tui_snapshots::driver::{AppSource, AutomationDriver, MockDriver, PtyDriver, PtyDriverConfig, TerminalSize};
use tui_snapshots::interaction::validate_sequence;
use tui_snapshots::plugins::{LoggingPlugin, PluginPipeline, ValidationPlugin};
use tui_snapshots::{config, quality};

/// TUI Snapshots - visual regression testing for terminal applications
#[derive(Parser, Debug)]
#[command(
    name = "tui-snapshots",
    about = "Scripted capture and snapshot comparison for terminal applications",
    after_help = "ENVIRONMENT VARIABLES:\n\
        TUI_SNAPSHOTS_OUTPUT_DIR         Base directory for artifacts\n\
        TUI_SNAPSHOTS_CACHE_TTL          Cache entry lifetime (seconds)\n\
        TUI_SNAPSHOTS_SESSION_TIMEOUT    Driver session timeout (seconds)\n\
        TUI_SNAPSHOTS_INTERACTION_DELAY  Delay between interactions (ms)\n\
        TUI_SNAPSHOTS_THRESHOLD          Default comparison threshold\n\
        TUI_SNAPSHOTS_DEFAULT_SIZE       Default terminal size\n\
        RUST_LOG                         Log filter (overrides --verbose)"
)]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run an application through an interaction script and export artifacts
    Capture {
        /// Path to the binary to capture
        #[arg(short, long)]
        binary: PathBuf,

        /// Label for this screen; names the artifact directory
        #[arg(short, long, default_value = "capture")]
        context: String,

        /// Interaction, repeatable: click:#id, type:text, press:key, hover:label, wait:seconds
        #[arg(short, long = "interaction")]
        interactions: Vec<String>,

        /// Artifact format: vector, raster or both
        #[arg(short, long, default_value = "vector")]
        format: OutputFormat,

        /// Write artifacts here instead of <output-base>/apps/<app>/<context>
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Base directory for organised artifacts
        #[arg(long, env = "TUI_SNAPSHOTS_OUTPUT_DIR", default_value = config::DEFAULT_OUTPUT_DIR)]
        output_base: PathBuf,

        /// Terminal size: compact (80x24), standard (120x40), large (160x50), xl (200x60), or WxH
        #[arg(long, short = 's', env = "TUI_SNAPSHOTS_DEFAULT_SIZE", default_value = "standard")]
        size: String,

        /// Whole session timeout in seconds
        #[arg(long, env = "TUI_SNAPSHOTS_SESSION_TIMEOUT", default_value_t = config::DEFAULT_SESSION_TIMEOUT)]
        timeout: u64,

        /// Do not read or populate the result cache
        #[arg(long)]
        no_cache: bool,

        /// Use the scripted in-process driver instead of launching the binary
        #[arg(long)]
        dry_run: bool,

        /// Print quality scores for the primary artifact
        #[arg(long)]
        quality: bool,

        /// Output the result as JSON
        #[arg(long)]
        json: bool,

        /// Arguments to pass to the binary
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Compare baseline artifacts against current ones
    Compare {
        /// Baseline file or directory
        baseline: PathBuf,

        /// Current file or directory
        current: PathBuf,

        /// Minimum similarity for a pair to pass
        #[arg(short, long, env = "TUI_SNAPSHOTS_THRESHOLD", default_value_t = config::DEFAULT_THRESHOLD)]
        threshold: f64,

        /// Compare directories recursively
        #[arg(short, long)]
        recursive: bool,

        /// Write the JSON report to this file
        #[arg(long)]
        output_report: Option<PathBuf>,

        /// Print the JSON report instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Check an interaction script without running anything
    Validate {
        /// Interactions to check
        #[arg(required = true)]
        interactions: Vec<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(args.verbose);

    match args.command {
        Commands::Capture {
            binary,
            context,
            interactions,
            format,
            output,
            output_base,
            size,
            timeout,
            no_cache,
            dry_run,
            quality,
            json,
            args: binary_args,
        } => {
            let term_size = TerminalSize::parse(&size)
                .ok_or_else(|| format!("Invalid terminal size '{}'. Use: compact, standard, large, xl, or WxH", size))?;

            let app = AppSource::new(binary.to_string_lossy())
                .args(binary_args)
                .size(term_size);
            let mut request = CaptureRequest::new(app)
                .context(context)
                .interactions(interactions)
                .output_format(format)
                .use_cache(!no_cache);
            if let Some(dir) = output {
                request = request.output_dir(dir);
            }

            let capture_config = CaptureConfig::default()
                .output_dir(output_base)
                .session_timeout(Duration::from_secs(timeout));
            let plugins = PluginPipeline::new()
                .with(Arc::new(LoggingPlugin))
                .with(Arc::new(ValidationPlugin::default()));
            let output = CaptureOutput { json, quality };

            if dry_run {
                let capturer = Capturer::new(MockDriver::new())
                    .config(capture_config)
                    .plugins(plugins);
                run_capture(&capturer, request, output).await
            } else {
                let driver = PtyDriver::new(PtyDriverConfig::new().raster_enabled(true));
                let capturer = Capturer::new(driver).config(capture_config).plugins(plugins);
                run_capture(&capturer, request, output).await
            }
        }

        Commands::Compare {
            baseline,
            current,
            threshold,
            recursive,
            output_report,
            json,
        } => {
            let report = compare_paths(&baseline, &current, threshold, recursive)?;
            if let Some(path) = &output_report {
                report.write_json(path)?;
            }
            if json {
                println!("{}", report.to_json()?);
            } else {
                print_report(&report);
            }
            Ok(ExitCode::from(report.exit_code() as u8))
        }

        Commands::Validate { interactions } => {
            let report = validate_sequence(&interactions);
            for command in &report.validated {
                println!("  ok     {}", command);
            }
            for invalid in &report.errors {
                println!("  error  position {}: {}", invalid.index + 1, invalid.error);
            }
            if report.is_valid() {
                println!("All {} interaction(s) valid", report.total);
                Ok(ExitCode::SUCCESS)
            } else {
                println!();
                for suggestion in &report.suggestions {
                    println!("  hint: {}", suggestion);
                }
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

struct CaptureOutput {
    json: bool,
    quality: bool,
}

async fn run_capture<D: AutomationDriver>(
    capturer: &Capturer<D>,
    request: CaptureRequest,
    output: CaptureOutput,
) -> Result<ExitCode, Box<dyn Error>> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let result = capturer.capture_with_cancel(request, &cancel).await?;
    let metrics = output.quality.then(|| quality::assess(&result));

    if output.json {
        let mut value = serde_json::to_value(&result)?;
        if let (Some(metrics), Some(obj)) = (metrics, value.as_object_mut()) {
            obj.insert("quality".to_string(), serde_json::to_value(metrics)?);
        }
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else if result.success {
        println!(
            "Captured {} ({} bytes{})",
            result.context,
            result.size_bytes,
            if result.cache_hit { ", cached" } else { "" }
        );
        for path in result.artifact_paths() {
            println!("  {}", path.display());
        }
        for warning in &result.warnings {
            println!("  warning: {}", warning);
        }
        if let Some(metrics) = metrics {
            println!(
                "  quality: {:.2} (size {:.2}, complexity {:.2}, structure {:.2}, completeness {:.2})",
                metrics.overall_score,
                metrics.file_size_score,
                metrics.content_complexity_score,
                metrics.structure_score,
                metrics.completeness_score
            );
        }
    } else {
        eprintln!(
            "Capture failed: {}",
            result.error_message.as_deref().unwrap_or("unknown error")
        );
    }

    Ok(if result.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn print_report(report: &ComparisonReport) {
    println!("{:<40} {:>10}  {}", "File", "Similarity", "Status");
    for record in &report.results {
        let (similarity, status) = match record.status {
            ComparisonStatus::Missing => ("N/A".to_string(), "missing".to_string()),
            ComparisonStatus::Passed => (format!("{:.3}", record.similarity), "passed".to_string()),
            ComparisonStatus::Failed => (
                format!("{:.3}", record.similarity),
                format!("below threshold ({:.3})", report.threshold),
            ),
        };
        println!("{:<40} {:>10}  {}", record.name(), similarity, status);
    }

    let summary = report.summary;
    if report.all_passed() {
        println!("\nAll {} comparisons passed", summary.total);
    } else {
        println!("\n{} of {} comparisons failed", summary.failed, summary.total);
    }
}
