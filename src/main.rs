mod config;
mod error;
mod events;
mod os;
mod run;

use std::{error::Error as _, path::PathBuf, process, sync::Arc};

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand, ValueHint};
use config::{AppConfig, ProgramSet, default_config_path, write_sample};
use crossbeam::channel;
use error::RunError;
use events::TracingSink;
use os::Platform;
use run::{RunReport, ShutdownCause, TerminationOutcome};
use tracing::Level;

#[derive(Debug, Parser)]
#[command(
    name = "pitcrew",
    version,
    about = "pitcrew: start your sim racing helpers, keep them out of the way, close them when the sim exits",
    long_about = "No subcommand or run: launch every configured helper, then the main program, and close the helpers again once it exits.",
    after_help = "Config is read from the platform config dir (pitcrew/pitcrew.toml) or the path provided via --config."
)]
struct Cli {
    /// Path to config TOML (or .json)
    #[arg(short, long, value_name = "PATH", global = true, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Launch and supervise the configured programs (default)
    Run,
    /// Validate the config and print the launch plan without starting anything
    Check,
    /// Write a commented sample config
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },
    /// Show the pitcrew version and exit
    Version,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = try_main(cli) {
        eprintln!("error: {err}");
        let mut source = err.source();
        while let Some(cause) = source {
            eprintln!("  caused by: {cause}");
            source = cause.source();
        }
        process::exit(err.exit_code());
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();
}

fn try_main(cli: Cli) -> Result<(), RunError> {
    let config_path = cli.config.unwrap_or_else(default_config_path);

    match cli.command.unwrap_or(Command::Run) {
        Command::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Init { force } => {
            write_sample(&config_path, force)?;
            println!("wrote sample config to {}", config_path.display());
            Ok(())
        }
        Command::Check => {
            let cfg = AppConfig::load(&config_path)?;
            let programs = cfg.validate()?;
            print_plan(&programs);
            Ok(())
        }
        Command::Run => {
            let _lock = run::acquire_launch_lock()?;
            tracing::debug!(lock = %run::launch_lock_path().display(), "launch lock held");

            let cfg = AppConfig::load(&config_path)?;
            let (stop_tx, stop_rx) = channel::unbounded();
            run::spawn_signal_listener(stop_tx).context("failed to listen for stop signals")?;

            let report = run::run_programs(&cfg, Platform::native(), Arc::new(TracingSink), &stop_rx)?;
            log_report(&report);
            Ok(())
        }
    }
}

fn print_plan(programs: &ProgramSet) {
    println!("launch order:");
    for (index, spec) in programs.launch_order().enumerate() {
        let kind = if spec.role == config::Role::Main {
            "main".to_string()
        } else {
            spec.startup.label().to_string()
        };
        if spec.arguments.is_empty() {
            println!("  {}. {} [{kind}] {}", index + 1, spec.name, spec.path.display());
        } else {
            println!(
                "  {}. {} [{kind}] {} {}",
                index + 1,
                spec.name,
                spec.path.display(),
                spec.arguments
            );
        }
    }
}

fn log_report(report: &RunReport) {
    let cause = match report.cause {
        ShutdownCause::LivenessLost => "main program exited".to_string(),
        ShutdownCause::StopRequested(reason) => reason.label().to_string(),
    };
    let failed = report
        .terminated
        .iter()
        .filter(|(_, outcome)| matches!(outcome, TerminationOutcome::Failed(_)))
        .count();
    tracing::info!(
        %cause,
        launched = report.launched.len(),
        closed = report.terminated.len() - failed,
        failed,
        "pitcrew: exiting (normal)"
    );
}
