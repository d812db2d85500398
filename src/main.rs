//! template-ops - render and apply configuration templates to device fleets
//!
//! This is the main entry point for the template-ops CLI.

mod cli;

use anyhow::Result;
use cli::commands::{CommandContext, Runnable};
use cli::{Cli, Commands};
use std::fs::OpenOptions;
use std::sync::Arc;
use template_ops::config::{Config, LoggingConfig};
use tracing::error;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

/// Application version information
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Summary printed for unanticipated errors without --debug
const ERROR_SUMMARY: &str = "Error during execution, use --debug/see log";

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse_args();

    if cli.color_disabled() {
        colored::control::set_override(false);
    }

    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(e.exit_code());
        }
    };

    // Initialize logging based on verbosity and config
    if let Err(e) = init_logging(cli.verbosity(), &config.logging) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    if cli.verbosity() >= 2 {
        eprintln!("template-ops v{}", VERSION);
    }

    let mut ctx = CommandContext::new(&cli, config);

    let result = match &cli.command {
        Commands::Render(args) => args.run(&mut ctx).await,
        Commands::Profile(args) => args.run(&mut ctx).await,
        Commands::MultiProfile(args) => args.run(&mut ctx).await,
        Commands::List(args) => args.run(&mut ctx).await,
        Commands::Show(args) => args.run(&mut ctx).await,
    };

    let exit_code = match result {
        Ok(code) => code,
        Err(e) => report_error(&e, cli.debug),
    };

    std::process::exit(exit_code);
}

/// Log and print a command failure, returning the exit code
fn report_error(err: &anyhow::Error, debug: bool) -> i32 {
    error!(error = ?err, "Command failed");

    let known = err.downcast_ref::<template_ops::Error>();
    if debug {
        eprintln!("{:?}", err);
    } else if let Some(e) = known.filter(|e| e.is_stage_fatal()) {
        eprintln!("{}", e);
    } else {
        eprintln!("{}", ERROR_SUMMARY);
    }

    known.map_or(1, template_ops::Error::exit_code)
}

/// Initialize logging from verbosity and the logging config section.
///
/// `RUST_LOG` wins over both.
fn init_logging(verbosity: u8, logging: &LoggingConfig) -> Result<()> {
    let level = match verbosity {
        0 => logging.level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (writer, ansi) = match &logging.log_path {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            (BoxMakeWriter::new(Arc::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = if logging.json {
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_filter(env_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_ansi(ansi)
            .with_target(verbosity >= 3)
            .with_writer(writer)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry().with(layer).try_init()?;
    Ok(())
}
