//! DocTest - documentation tester CLI
//!
//! The `doctest` command extracts fenced code blocks from markdown documents
//! and executes them.
//!
//! ## Commands
//!
//! - `run`: Execute every block and print failures
//! - `validate`: Check document structure without executing anything
//! - `watch`: Re-run documents as they change
//! - `report`: Execute and render a report (json, markdown, text, junit)
//!
//! Exit status is 0 on success, 1 when a test fails, a document cannot be
//! parsed or validation finds errors, and 2 when the configuration is
//! invalid.

use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn, Level};

use doctest_core::{
    render_report, ConfigError, ConfigOverrides, DocTestConfig, Document, MarkdownParser,
    ReportFormat, RunSummary, TestStatus, Validator,
};
use doctest_runner::{
    CancelSource, Executor, RunnerRegistry, WatchEvent, WatchSession, Watcher,
};

/// Pattern used when no files are given.
const DEFAULT_PATTERN: &str = "**/*.md";

/// Directories never searched by the default pattern.
const IGNORED_DIRS: &[&str] = &["node_modules", "target"];

#[derive(Parser)]
#[command(name = "doctest")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Execute and validate fenced code blocks in documentation", long_about = None)]
struct Cli {
    /// Config file (default: ./doctest.toml when present)
    #[arg(short, long, global = true, env = "DOCTEST_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print captured output of failing blocks and enable trace logs
    #[arg(long, global = true)]
    debug: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone, Default)]
struct RunArgs {
    /// Files or glob patterns (default: **/*.md)
    files: Vec<String>,

    /// Per-block timeout in milliseconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Maximum number of blocks executing at once
    #[arg(short = 'j', long)]
    workers: Option<usize>,

    /// Only run blocks whose `<file>:<line>` name or language matches this regex
    #[arg(short, long)]
    filter: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum ValidateFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute code blocks and report failures
    Run {
        #[command(flatten)]
        args: RunArgs,
    },

    /// Check document structure without executing blocks
    Validate {
        /// Files or glob patterns (default: **/*.md)
        files: Vec<String>,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: ValidateFormat,
    },

    /// Watch documents and re-run them on change
    Watch {
        #[command(flatten)]
        args: RunArgs,
    },

    /// Execute code blocks and render a report
    Report {
        #[command(flatten)]
        args: RunArgs,

        /// Report format: json, markdown, text or junit
        #[arg(long, default_value = "markdown")]
        format: ReportFormat,

        /// Write the report to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.debug {
        Level::TRACE
    } else if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    doctest_core::init_tracing(cli.json, level);

    match execute(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// Run the selected command. `Ok(false)` means the command completed but
/// found failures.
async fn execute(cli: Cli) -> Result<bool> {
    let global = ConfigOverrides {
        debug: cli.debug,
        verbose: cli.verbose,
        ..ConfigOverrides::default()
    };

    match cli.command {
        Commands::Run { args } => {
            let config = load_config(cli.config.as_deref(), overrides(&args, global))?;
            cmd_run(config, &args.files).await
        }
        Commands::Validate { files, format } => {
            let config = load_config(cli.config.as_deref(), global)?;
            cmd_validate(config, &files, format).await
        }
        Commands::Watch { args } => {
            let config = load_config(cli.config.as_deref(), overrides(&args, global))?;
            cmd_watch(config, &args.files).await
        }
        Commands::Report {
            args,
            format,
            output,
        } => {
            let config = load_config(cli.config.as_deref(), overrides(&args, global))?;
            cmd_report(config, &args.files, format, output.as_deref()).await
        }
    }
}

fn overrides(args: &RunArgs, global: ConfigOverrides) -> ConfigOverrides {
    ConfigOverrides {
        timeout_ms: args.timeout,
        max_workers: args.workers,
        filter: args.filter.clone(),
        ..global
    }
}

/// Configuration errors exit with 2, everything else with 1.
fn exit_code_for(error: &anyhow::Error) -> u8 {
    if error.chain().any(|cause| cause.is::<ConfigError>()) {
        2
    } else {
        1
    }
}

fn load_config(path: Option<&Path>, overrides: ConfigOverrides) -> Result<DocTestConfig> {
    let config = match path {
        Some(path) => DocTestConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => {
            let cwd = std::env::current_dir().context("Failed to read current directory")?;
            DocTestConfig::discover(&cwd).context("Failed to load doctest.toml")?
        }
    };
    config
        .with_overrides(overrides)
        .context("Invalid configuration")
}

/// Expand file arguments into document paths, in argument order without
/// duplicates. Literal paths are kept even when missing so the run can
/// report them.
fn expand_paths(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let defaulted = patterns.is_empty();
    let patterns: Vec<&str> = if defaulted {
        vec![DEFAULT_PATTERN]
    } else {
        patterns.iter().map(String::as_str).collect()
    };

    let mut seen = BTreeSet::new();
    let mut paths = Vec::new();
    for pattern in patterns {
        if !is_glob(pattern) {
            let path = PathBuf::from(pattern);
            if seen.insert(path.clone()) {
                paths.push(path);
            }
            continue;
        }

        let entries =
            glob::glob(pattern).with_context(|| format!("Invalid glob pattern `{}`", pattern))?;
        let mut matched = 0usize;
        for entry in entries {
            match entry {
                Ok(path) if path.is_file() => {
                    if defaulted && is_ignored(&path) {
                        continue;
                    }
                    matched += 1;
                    if seen.insert(path.clone()) {
                        paths.push(path);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "unreadable path while expanding pattern"),
            }
        }
        if matched == 0 {
            warn!(pattern = %pattern, "pattern matched no files");
        }
    }
    Ok(paths)
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Hidden directories and build output are skipped by the default pattern.
fn is_ignored(path: &Path) -> bool {
    path.components().any(|component| match component {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            name.starts_with('.') || IGNORED_DIRS.contains(&name.as_ref())
        }
        _ => false,
    })
}

/// Run `paths`, cancelling outstanding blocks on Ctrl-C.
async fn run_until_interrupted(executor: &Executor, paths: &[PathBuf]) -> Result<RunSummary> {
    let source = CancelSource::new();
    let token = source.token();
    let run = executor.run_paths(paths, &token);
    tokio::pin!(run);

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    let mut interrupted = false;
    let summary = loop {
        tokio::select! {
            summary = &mut run => break summary,
            _ = &mut interrupt, if !interrupted => {
                warn!("interrupted, cancelling outstanding blocks");
                interrupted = true;
                source.cancel();
            }
        }
    };
    summary.context("Run did not complete")
}

/// Execute code blocks and print failures
async fn cmd_run(config: DocTestConfig, files: &[String]) -> Result<bool> {
    let paths = expand_paths(files)?;
    if paths.is_empty() {
        println!("No documents found.");
        return Ok(true);
    }

    let (verbose, debug) = (config.verbose, config.debug);
    let executor = Executor::new(config);
    info!(documents = paths.len(), "running documents");
    let summary = run_until_interrupted(&executor, &paths).await?;

    print!("{}", render_run(&summary, verbose, debug)?);
    Ok(summary.success())
}

/// Console rendering of a run: every result when verbose, failures only
/// otherwise.
fn render_run(summary: &RunSummary, verbose: bool, debug: bool) -> Result<String> {
    if verbose && !debug {
        return Ok(render_report(summary, ReportFormat::Text)?);
    }

    let mut out = String::new();
    let shown: Vec<_> = if verbose {
        summary.results.iter().collect()
    } else {
        summary.failures().collect()
    };
    for result in shown {
        let label = match result.status {
            TestStatus::Passed => "PASS",
            TestStatus::Failed => "FAIL",
            TestStatus::Skipped => "SKIP",
        };
        out.push_str(&format!(
            "{} {} [{}] ({} ms)\n",
            label,
            result.name(),
            result.language,
            result.duration_ms
        ));
        if let Some(error) = &result.error {
            out.push_str(&format!(
                "    {} at {}:{}: {}\n",
                error.kind, result.block.file, error.line, error.message
            ));
        }
        if debug {
            if let Some(output) = &result.output {
                for line in output.lines() {
                    out.push_str(&format!("    | {}\n", line));
                }
            }
        }
    }
    for failure in &summary.document_errors {
        let location = match failure.line {
            Some(line) => format!("{}:{}", failure.file, line),
            None => failure.file.clone(),
        };
        out.push_str(&format!("ERROR {}: {}\n", location, failure.message));
    }

    out.push_str(&format!(
        "{} passed, {} failed, {} skipped ({} total) in {} ms\n",
        summary.passed, summary.failed, summary.skipped, summary.total, summary.duration_ms
    ));
    Ok(out)
}

/// Check document structure without executing blocks
async fn cmd_validate(
    config: DocTestConfig,
    files: &[String],
    format: ValidateFormat,
) -> Result<bool> {
    let paths = expand_paths(files)?;

    let mut documents = Vec::with_capacity(paths.len());
    let mut unreadable = Vec::new();
    for path in &paths {
        match Document::load_async(path).await {
            Ok(document) => documents.push(document),
            Err(e) => unreadable.push(e.to_string()),
        }
    }

    let registry = RunnerRegistry::from_config(&config);
    let validator = Validator::new(
        Arc::new(MarkdownParser::new(config.parse_options())),
        config.validation.clone(),
    )
    .with_known_languages(registry.languages());
    let report = validator.validate(&documents);

    match format {
        ValidateFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        ValidateFormat::Text => print!("{}", report.render_text()),
    }
    for message in &unreadable {
        eprintln!("error[io] {}", message);
    }

    Ok(report.is_valid && unreadable.is_empty())
}

/// Watch documents and re-run them on change
async fn cmd_watch(config: DocTestConfig, files: &[String]) -> Result<bool> {
    let paths = expand_paths(files)?;
    if paths.is_empty() {
        anyhow::bail!("No documents to watch");
    }

    let (verbose, debug) = (config.verbose, config.debug);
    let settings = config.watch.clone();
    let executor = Arc::new(Executor::new(config));
    let mut session = Watcher::spawn(paths.clone(), settings, executor);
    println!(
        "Watching {} document(s). Press Ctrl-C to stop.",
        paths.len()
    );

    let outcome = watch_until(&mut session, tokio::signal::ctrl_c(), |event| {
        match event {
            WatchEvent::FileChanged { path } => {
                println!("\nChange detected: {}", path.display());
            }
            WatchEvent::RunComplete(summary) => {
                print!("{}", render_run(&summary, verbose, debug)?);
            }
            WatchEvent::Error(e) => eprintln!("watch: {}", e),
        }
        Ok(())
    })
    .await;

    session.stop().await;
    outcome.map(|()| true)
}

/// Feed session events to `on_event` until the session ends or `shutdown`
/// resolves. `shutdown` is polled across iterations, never recreated.
async fn watch_until<S, F>(session: &mut WatchSession, shutdown: S, mut on_event: F) -> Result<()>
where
    S: Future,
    F: FnMut(WatchEvent) -> Result<()>,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            event = session.next_event() => match event {
                Some(event) => on_event(event)?,
                None => return Ok(()),
            },
            _ = &mut shutdown => return Ok(()),
        }
    }
}

/// Execute code blocks and render a report
async fn cmd_report(
    config: DocTestConfig,
    files: &[String],
    format: ReportFormat,
    output: Option<&Path>,
) -> Result<bool> {
    let paths = expand_paths(files)?;
    let executor = Executor::new(config);
    let summary = run_until_interrupted(&executor, &paths).await?;
    let rendered = render_report(&summary, format).context("Failed to render report")?;

    match output {
        Some(path) => {
            std::fs::write(path, &rendered)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            println!(
                "Wrote {} report to {} ({} passed, {} failed, {} skipped)",
                format,
                path.display(),
                summary.passed,
                summary.failed,
                summary.skipped
            );
        }
        None => print!("{}", rendered),
    }
    Ok(summary.success())
}
