//! maint-tools - Main entry point

use std::io::Read;
use std::process::ExitCode;

use anyhow::Context;

use tracing::{debug, error, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use maint_tools::cli::{Cli, Commands};
use maint_tools::command_runner::SystemRunner;
use maint_tools::config::ToolsConfig;
use maint_tools::{
    affected, copy_mtime, debdiff, dpkg_which, process_guard, sanity, schroot_wrapper, shellcheck,
    timelapse, userlint,
};

/// Initialize the logger; `RUST_LOG` overrides the level picked by the flags.
fn init_logger(cli: &Cli) {
    let level = if cli.verbose {
        LevelFilter::DEBUG
    } else if cli.quiet {
        LevelFilter::WARN
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(true)
        .init();
}

/// Programs a subcommand cannot work without.
fn required_binaries(command: &Commands) -> &'static [&'static str] {
    match command {
        Commands::FindAffected(args) if args.summary || args.export_json.is_some() => &[],
        Commands::FindAffected(_) | Commands::SchrootWrapper(_) => &["schroot"],
        Commands::Userlint(_) => &["git"],
        Commands::DpkgWhich { .. } => &["dpkg"],
        Commands::Shellcheck { .. } => &["shellcheck"],
        Commands::SaveDebdiff(_) | Commands::Timelapse(_) | Commands::CopyMtime { .. } => &[],
    }
}

fn run(cli: Cli, config: &ToolsConfig) -> anyhow::Result<i32> {
    let runner = SystemRunner::new();
    let code = match cli.command {
        Commands::FindAffected(args) => {
            let options = args.into_options(&config.find_affected);
            affected::run(&runner, &options)
                .with_context(|| format!("find-affected with database {}", options.db.display()))?
        }
        Commands::SchrootWrapper(args) => {
            let options = args
                .into_options(&config.schroot_wrapper)
                .context("Failed to determine schroot-wrapper defaults")?;
            schroot_wrapper::run(&runner, &options)
                .with_context(|| format!("schroot session of {}", options.chroot))?
        }
        Commands::SaveDebdiff(args) => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("Failed to read the debdiff from stdin")?;
            debdiff::run(&runner, &input, &args.into())?
        }
        Commands::Timelapse(args) => timelapse::run(&runner, &args.into())?,
        Commands::Userlint(args) => userlint::run(&runner, &args.directory)
            .with_context(|| format!("Failed to lint {}", args.directory.display()))?,
        Commands::DpkgWhich { commands } => dpkg_which::run(&runner, &commands)?,
        Commands::CopyMtime { source, targets } => {
            copy_mtime::copy_mtime(&source, &targets)
                .with_context(|| format!("Failed to copy mtime of {}", source.display()))?;
            0
        }
        Commands::Shellcheck { files } => shellcheck::run(&runner, &files, cli.verbose)?,
    };
    Ok(code)
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_logger(&cli);

    // Terminate open schroot sessions and children on SIGINT/SIGTERM
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    debug!("Signal handlers initialized");

    let config = match ToolsConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let check = sanity::verify_binaries(required_binaries(&cli.command));
    if !check.is_ok() {
        error!("{}", check.error_message());
        return ExitCode::FAILURE;
    }

    match run(cli, &config) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
