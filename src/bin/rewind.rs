//! # Rewind CLI - labeled snapshots from the terminal
//!
//! A small command-line front end for the Rewind library.
//!
//! ## Usage
//! ```bash
//! # Capture the current directory
//! rewind capture -l "before refactor" -t wip
//!
//! # List snapshots
//! rewind list
//!
//! # Restore one (an unambiguous id prefix is enough)
//! rewind restore before-refactor-2024
//!
//! # Rename or delete
//! rewind rename <id> "known good"
//! rewind delete <id>
//! ```

use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use rewind::utils::format_bytes;
use rewind::{
    CaptureOptions, ProgressCallback, ProgressEvent, RestoreOptions, RestoreOutcome, Result,
    Rewind, RewindBuilder, RewindConfig, RewindError,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Rewind CLI - capture and restore directory snapshots
#[derive(Parser)]
#[command(name = "rewind")]
#[command(version)]
#[command(about = "Capture labeled snapshots of a directory and roll back to them")]
#[command(long_about = None)]
struct Cli {
    /// Path to directory (defaults to current)
    #[arg(short, long, global = true)]
    path: Option<PathBuf>,

    /// Storage directory (defaults to <path>/.rewind)
    #[arg(short, long, global = true)]
    storage: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Exclusion pattern (repeatable, added to the configured ones)
    #[arg(short, long, global = true)]
    exclude: Vec<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a snapshot
    #[command(alias = "cp")]
    Capture {
        /// Snapshot label
        #[arg(short, long)]
        label: String,

        /// Description
        #[arg(short, long)]
        message: Option<String>,

        /// Tag (repeatable)
        #[arg(short, long)]
        tag: Vec<String>,
    },

    /// Restore a snapshot
    #[command(alias = "rs")]
    Restore {
        /// Snapshot ID or unique prefix
        snapshot: String,

        /// Copy in batches
        #[arg(long)]
        batch: bool,

        /// Files per batch (implies --batch)
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// List snapshots
    #[command(alias = "ls")]
    List,

    /// Delete a snapshot
    #[command(alias = "rm")]
    Delete {
        /// Snapshot ID or unique prefix
        snapshot: String,
    },

    /// Change a snapshot's label
    Rename {
        /// Snapshot ID or unique prefix
        snapshot: String,

        /// New label
        label: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> Result<()> {
    let root_path = cli.path.unwrap_or_else(|| PathBuf::from("."));
    let storage_path = cli
        .storage
        .unwrap_or_else(|| root_path.join(rewind::config::DEFAULT_STORAGE_DIR));

    let mut config = match &cli.config {
        Some(path) => RewindConfig::load(path)?,
        None => RewindConfig::default(),
    };
    config.exclude_patterns.extend(cli.exclude);

    let rewind = RewindBuilder::new()
        .config(config)
        .build(root_path, storage_path)?;

    match cli.command {
        Commands::Capture {
            label,
            message,
            tag,
        } => cmd_capture(&rewind, label, message, tag),
        Commands::Restore {
            snapshot,
            batch,
            batch_size,
        } => cmd_restore(&rewind, snapshot, batch, batch_size),
        Commands::List => cmd_list(&rewind),
        Commands::Delete { snapshot } => cmd_delete(&rewind, snapshot),
        Commands::Rename { snapshot, label } => cmd_rename(&rewind, snapshot, label),
    }
}

/// Capture a snapshot of the tracked root
fn cmd_capture(
    rewind: &Rewind,
    label: String,
    message: Option<String>,
    tags: Vec<String>,
) -> Result<()> {
    println!("{}", "Capturing snapshot...".blue().bold());

    let bar = progress_bar();
    let options = CaptureOptions {
        description: message,
        tags,
        progress_callback: Some(progress_callback(bar.clone())),
    };
    let result = rewind.capture(&label, options);
    bar.finish_and_clear();
    let result = result?;

    println!(
        "{} Captured {}",
        "✓".green().bold(),
        result.record.id.yellow().bold()
    );
    println!("  Label: {}", result.record.label.cyan());
    if let Some(description) = &result.record.description {
        println!("  Description: {}", description.cyan());
    }
    println!("  Files: {}", result.files_captured.to_string().cyan());
    println!("  Size: {}", format_bytes(result.bytes_copied).cyan());
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(result.duration_ms))
            .to_string()
            .cyan()
    );
    if result.is_partial() {
        println!(
            "  Failed: {} files",
            result.files_failed.to_string().red()
        );
    }
    print_warnings(&result.warnings);

    Ok(())
}

/// Restore a snapshot into the tracked root
fn cmd_restore(
    rewind: &Rewind,
    snapshot: String,
    batch: bool,
    batch_size: Option<usize>,
) -> Result<()> {
    let id = resolve_id(rewind, &snapshot)?;
    println!("{} {}", "Restoring snapshot".blue().bold(), id.yellow());

    let bar = progress_bar();
    let options = RestoreOptions {
        batch_mode: batch || batch_size.is_some(),
        batch_size,
        progress_callback: Some(progress_callback(bar.clone())),
        ..Default::default()
    };
    let result = rewind.restore(&id, options);
    bar.finish_and_clear();
    let result = result?;

    let mark = match result.outcome {
        RestoreOutcome::Completed => "✓".green().bold(),
        RestoreOutcome::Partial => "!".yellow().bold(),
        RestoreOutcome::Cancelled => "✗".red().bold(),
    };
    println!("{} {}", mark, result.summary());
    println!("  Restored: {}", result.files_restored.to_string().cyan());
    println!("  Removed: {}", result.files_removed.to_string().cyan());
    if result.batches > 1 {
        println!("  Batches: {}", result.batches.to_string().cyan());
    }
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(result.duration_ms))
            .to_string()
            .cyan()
    );
    print_warnings(&result.warnings);

    Ok(())
}

/// List every snapshot, oldest first
fn cmd_list(rewind: &Rewind) -> Result<()> {
    let snapshots = rewind.list();
    if snapshots.is_empty() {
        println!("{}", "No snapshots yet".dimmed());
        return Ok(());
    }

    println!("{}", format!("{} snapshots", snapshots.len()).bold());
    for record in &snapshots {
        println!("  {}", record.display_format());
        if let Some(description) = &record.description {
            println!("    {}", description.dimmed());
        }
    }
    Ok(())
}

/// Delete a snapshot
fn cmd_delete(rewind: &Rewind, snapshot: String) -> Result<()> {
    let id = resolve_id(rewind, &snapshot)?;
    let outcome = rewind.delete(&id)?;

    println!(
        "{} Deleted {} ({})",
        "✓".green().bold(),
        outcome.record.id.yellow(),
        outcome.record.label
    );
    if let Some(warning) = outcome.warning {
        print_warnings(&[warning]);
    }
    Ok(())
}

/// Rename a snapshot
fn cmd_rename(rewind: &Rewind, snapshot: String, label: String) -> Result<()> {
    let id = resolve_id(rewind, &snapshot)?;
    let record = rewind.rename(&id, &label)?;
    println!(
        "{} {} is now labeled {}",
        "✓".green().bold(),
        record.id.yellow(),
        record.label.cyan()
    );
    Ok(())
}

/// Resolve an exact id or a unique prefix
fn resolve_id(rewind: &Rewind, query: &str) -> Result<String> {
    let snapshots = rewind.list();
    if snapshots.iter().any(|r| r.id == query) {
        return Ok(query.to_string());
    }

    let matches: Vec<&str> = snapshots
        .iter()
        .filter(|r| r.id.starts_with(query))
        .map(|r| r.id.as_str())
        .collect();
    match matches.as_slice() {
        [only] => Ok(only.to_string()),
        [] => Err(RewindError::NotFound(query.to_string())),
        _ => Err(RewindError::internal(format!(
            "'{}' matches {} snapshots; use a longer prefix",
            query,
            matches.len()
        ))),
    }
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner:.green} {msg:<16} [{bar:30.cyan/blue}] {pos}/{len}")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}

fn progress_callback(bar: ProgressBar) -> ProgressCallback {
    Arc::new(move |event: &ProgressEvent| match event {
        ProgressEvent::PhaseStarted { phase, total } => {
            bar.set_message(phase.to_string());
            bar.set_length(total.unwrap_or(0) as u64);
            bar.set_position(0);
        }
        ProgressEvent::Progress(info) => bar.set_position(info.processed as u64),
    })
}

fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        println!("  {} {}", "warning:".yellow(), warning);
    }
}
