//! shadowd - Shadow Migration Supervisor
//!
//! Entry point for the daemon and the `stat` listener.

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use colored::Colorize;
use shadowd::config::{CliArgs, Command, StatArgs, SupervisorConfig};
use shadowd::registry::MigrationStat;
use shadowd::stats::StatusListener;
use shadowd::supervisor;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = CliArgs::parse();

    match args.command {
        Command::Run(run_args) => {
            // A refresh or quit arriving during startup must not kill the
            // process.
            supervisor::ignore_startup_signals()
                .context("Failed to set signal dispositions")?;
            setup_logging(args.verbose);
            let config =
                SupervisorConfig::from_args(&run_args).context("Invalid configuration")?;
            supervisor::run(config)
        }
        Command::Stat(stat_args) => {
            setup_logging(args.verbose);
            stat(&stat_args)
        }
    }
}

fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("shadowd=debug,warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shadowd=info,warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Register as a listener and print every batch the supervisor publishes.
///
/// Ctrl-C or a termination signal removes the queue, which ends the blocked
/// receive; the listener file is removed on the way out.
fn stat(args: &StatArgs) -> Result<()> {
    let config = SupervisorConfig::from_stat_args(args).context("Invalid configuration")?;
    let mut listener = StatusListener::register(
        &config.status_dir,
        &config.listener_prefix,
        config.ipc_project_id,
    )
    .context("Failed to register status listener")?;

    let stopping = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stopping);
    let interrupt = listener.interrupter();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
        interrupt.fire();
    })
    .context("Failed to set Ctrl+C handler")?;

    let mut received = 0usize;
    while args.count.is_none_or(|count| received < count) {
        let batch = match listener.receive_batch() {
            Ok(batch) => batch,
            Err(_) if stopping.load(Ordering::SeqCst) => {
                debug!("Interrupted, unregistering listener");
                break;
            }
            Err(e) => return Err(e).context("Failed to receive migration status"),
        };
        received += 1;

        if args.json {
            println!("{}", serde_json::to_string(&batch)?);
        } else {
            print_batch(&batch);
        }
    }
    Ok(())
}

fn print_batch(batch: &[MigrationStat]) {
    println!(
        "{}",
        Local::now().format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
    );
    if batch.is_empty() {
        println!("  {}", "no active migrations".dimmed());
        return;
    }

    println!(
        "  {:<32} {:>14} {:>14} {:>6} {:>8}  {}",
        "DATASET".bold(),
        "XFERRED".bold(),
        "REMAINING".bold(),
        "ERRORS".bold(),
        "ELAPSED".bold(),
        "STATE".bold()
    );
    for stat in batch {
        let state = if stat.complete {
            "complete".green()
        } else {
            "migrating".yellow()
        };
        let errors = if stat.errors > 0 {
            stat.errors.to_string().red()
        } else {
            stat.errors.to_string().normal()
        };
        println!(
            "  {:<32} {:>14} {:>14} {:>6} {:>7}s  {}",
            stat.dataset, stat.xferred, stat.remaining, errors, stat.elapsed, state
        );
    }
}
