//! archstrap - Main entry point
//!
//! Thin front-end: parse arguments, set up logging and signal handling, then
//! hand over to the library's pipeline or one of its single-phase tools.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use archstrap::cli::{Cli, Commands, ToolCommands};
use archstrap::command::{CommandRunner, DryRunRunner, SystemRunner};
use archstrap::config_file::{Credentials, ProvisioningConfig};
use archstrap::context::ProvisioningContext;
use archstrap::hardware::HardwareInfo;
use archstrap::installer::{AssumeYes, CommandInstaller, Confirmation, StdinConfirmation};
use archstrap::logic::bootloader::{BootloaderThemeInstaller, GRUB_DEFAULTS};
use archstrap::logic::gpu::GpuDriverConfigurer;
use archstrap::patch::ConfigFilePatcher;
use archstrap::pipeline::ProvisioningPipeline;
use archstrap::{process_guard, sanity};

/// Initialize the logger with appropriate settings
fn init_logger(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    // RUST_LOG overrides the flag
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_logger(cli.verbose);
    info!("archstrap starting up");

    // Child commands are stopped if we receive SIGINT/SIGTERM/SIGHUP
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    debug!("Signal handlers initialized");

    let result = match cli.command {
        Commands::Install {
            config,
            credentials,
            yes,
        } => run_install(&config, &credentials, yes, cli.dry_run),
        Commands::Validate {
            config,
            credentials,
        } => run_validate(&config, credentials.as_deref()),
        Commands::Tools { tool } => run_tool_command(&tool, cli.dry_run),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("✗ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn runner_for(dry_run: bool) -> Box<dyn CommandRunner> {
    if dry_run {
        info!("Dry-run mode: commands are logged, not executed");
        Box::new(DryRunRunner::new())
    } else {
        Box::new(SystemRunner::new())
    }
}

/// Headless end-to-end provisioning
fn run_install(
    config_path: &Path,
    credentials_path: &Path,
    assume_yes: bool,
    dry_run: bool,
) -> anyhow::Result<ExitCode> {
    let config = ProvisioningConfig::load_from_file(config_path)?;
    let credentials = Credentials::load_from_file(credentials_path)?;

    let hardware = HardwareInfo::detect();
    info!("Detected hardware: {}", hardware);

    let ctx = ProvisioningContext::new(config, credentials, hardware.firmware)
        .context("Configuration rejected")?;
    info!("Configuration validated for {} firmware", ctx.firmware());

    let checks = sanity::verify_environment(dry_run);
    if !checks.is_ok() {
        eprintln!("{}", checks);
        return Ok(ExitCode::FAILURE);
    }

    let runner = runner_for(dry_run);
    let installer = CommandInstaller::new(runner.as_ref());
    let confirmation: &dyn Confirmation = if assume_yes {
        &AssumeYes
    } else {
        &StdinConfirmation
    };

    let pipeline = ProvisioningPipeline::new(
        &ctx,
        runner.as_ref(),
        &installer,
        &installer,
        confirmation,
    );

    match pipeline.run() {
        Ok(report) => {
            println!("{}", report);
            if report.is_degraded() {
                warn!("{}", report.summary());
            } else {
                info!("{}", report.summary());
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            println!("{}", failure.report);
            error!("{}", failure);
            eprintln!("✗ Provisioning stopped at {}: {}", failure.step, failure.error);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn run_validate(config_path: &Path, credentials_path: Option<&Path>) -> anyhow::Result<ExitCode> {
    info!("Validating configuration file: {:?}", config_path);
    let config = ProvisioningConfig::load_from_file(config_path)?;
    let firmware = config
        .firmware
        .unwrap_or_else(archstrap::hardware::detect_firmware_mode);

    if let Err(e) = config.validate(firmware) {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        return Ok(ExitCode::FAILURE);
    }
    if let Some(path) = credentials_path {
        let credentials = Credentials::load_from_file(path)?;
        if let Err(e) = credentials.require_for(&config) {
            eprintln!("✗ Credentials incomplete: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    }

    println!(
        "✓ Configuration is valid ({} firmware, {} partitions on {})",
        firmware,
        config.disk_layout.partitions.len(),
        config.disk_layout.device.display()
    );
    Ok(ExitCode::SUCCESS)
}

/// Run tool command
fn run_tool_command(tool: &ToolCommands, dry_run: bool) -> anyhow::Result<ExitCode> {
    let runner = runner_for(dry_run);
    match tool {
        ToolCommands::SetKey { file, key, value } => {
            let outcome = ConfigFilePatcher::with_dry_run(dry_run)
                .set_or_append_key(file, key, value)?;
            if outcome.changed() {
                println!("✓ {} updated", file.display());
            } else {
                println!("✓ {} already sets {}", file.display(), key);
            }
        }
        ToolCommands::Gpu { root } => {
            let report = GpuDriverConfigurer::new(runner.as_ref()).enable_kms(root)?;
            println!(
                "✓ NVIDIA KMS enabled (MODULES {}, kernel cmdline {})",
                if report.modules.changed() { "patched" } else { "already set" },
                if report.cmdline.changed() { "patched" } else { "already set" },
            );
        }
        ToolCommands::Theme { root, name, repo } => {
            let mut theme = archstrap::config_file::ThemeConfig::default();
            if let Some(name) = name {
                theme.name = name.clone();
            }
            if let Some(repo) = repo {
                theme.repo_url = repo.clone();
            }
            let installer = BootloaderThemeInstaller::new(runner.as_ref());
            installer.install_packages(root)?;
            match installer.install_theme(root, &theme)? {
                Some(found) => println!("✓ GRUB_THEME set to {}", found.target_path.display()),
                None => println!(
                    "⚠ No {} found under {}; {} left unchanged",
                    theme.descriptor,
                    theme.theme_dir.display(),
                    GRUB_DEFAULTS
                ),
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
