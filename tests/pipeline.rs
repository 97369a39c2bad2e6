//! End-to-end pipeline runs against a temporary target root.
//!
//! Commands never reach the system: a fake runner records them, and fake
//! disk/base installers stand in for the destructive phases.

mod common;

use std::fs;
use std::os::unix::fs::PermissionsExt;

use archstrap::command::DryRunRunner;
use archstrap::error::ProvisionError;
use archstrap::install_state::ProvisionStage;
use archstrap::pipeline::{ProvisioningPipeline, StepId, StepOutcome};
use common::{FakeConfirmation, FakeInstaller, FakeRunner, GRUB_DEFAULTS, MKINITCPIO, Target};

// =============================================================================
// Happy path
// =============================================================================

#[test]
fn test_full_run_reaches_done_and_themes_grub() {
    let target = Target::new().with_installed_theme();
    let ctx = common::context(target.config());
    let runner = FakeRunner::new();
    let installer = FakeInstaller::default();
    let confirm = FakeConfirmation::yes();

    let report = ProvisioningPipeline::new(&ctx, &runner, &installer, &installer, &confirm)
        .run()
        .expect("run succeeds");

    assert_eq!(report.final_stage, ProvisionStage::Done);
    assert!(!report.is_degraded(), "{}", report);
    assert_eq!(report.summary(), "provisioning complete");
    assert_eq!(installer.prepared.get(), 1);
    assert_eq!(installer.based.get(), 1);
    assert_eq!(confirm.shown.borrow().len(), 1);

    assert_eq!(
        report.theme.as_deref(),
        Some(std::path::Path::new(common::THEME_DESCRIPTOR))
    );
    let grub = target.read("/etc/default/grub");
    assert!(grub.ends_with("GRUB_THEME=\"/boot/grub/themes/tela/theme.txt\"\n"));
    assert_eq!(target.read("/etc/hostname"), "archbox\n");

    let sudoers = target.path("/etc/sudoers.d/10-wheel");
    let mode = fs::metadata(&sudoers).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o440);

    for step in [StepId::Encryption, StepId::Network, StepId::GpuDriver] {
        assert!(
            matches!(report.outcome(step), Some(StepOutcome::NotApplicable(_))),
            "{} should not apply",
            step
        );
    }
    assert_eq!(report.outcome(StepId::AurHelper), Some(&StepOutcome::Succeeded));
    assert!(runner.ran("makepkg"));
}

#[test]
fn test_theme_not_found_still_completes() {
    let target = Target::new();
    let ctx = common::context(target.config());
    let runner = FakeRunner::new();
    let installer = FakeInstaller::default();
    let confirm = FakeConfirmation::yes();

    let report = ProvisioningPipeline::new(&ctx, &runner, &installer, &installer, &confirm)
        .run()
        .expect("missing theme never fails the run");

    assert_eq!(report.final_stage, ProvisionStage::Done);
    assert_eq!(report.outcome(StepId::BootloaderTheme), Some(&StepOutcome::Succeeded));
    assert!(report.theme.is_none());
    assert_eq!(target.read("/etc/default/grub"), GRUB_DEFAULTS);
}

// =============================================================================
// Fatal failures
// =============================================================================

#[test]
fn test_declined_confirmation_never_touches_the_disk() {
    let target = Target::new();
    let ctx = common::context(target.config());
    let runner = FakeRunner::new();
    let installer = FakeInstaller::default();
    let confirm = FakeConfirmation::no();

    let failure = ProvisioningPipeline::new(&ctx, &runner, &installer, &installer, &confirm)
        .run()
        .unwrap_err();

    assert_eq!(failure.step, StepId::Filesystem);
    assert!(matches!(failure.error, ProvisionError::DestructiveStepAborted { .. }));
    assert_eq!(failure.report.final_stage, ProvisionStage::Failed);
    assert_eq!(installer.prepared.get(), 0);
    assert_eq!(installer.based.get(), 0);
    assert!(runner.recorded().is_empty());
    assert!(confirm.shown.borrow()[0].contains("/dev/nvme0n1"));
}

#[test]
fn test_base_install_failure_stops_everything_after_it() {
    let target = Target::new();
    let ctx = common::context(target.config());
    let runner = FakeRunner::new();
    let installer = FakeInstaller::failing_base();
    let confirm = FakeConfirmation::yes();

    let failure = ProvisioningPipeline::new(&ctx, &runner, &installer, &installer, &confirm)
        .run()
        .unwrap_err();

    assert_eq!(failure.step, StepId::BaseSystem);
    assert_eq!(failure.stage, ProvisionStage::BaseInstalled);
    assert!(matches!(failure.error, ProvisionError::ExternalCommandFailed { .. }));
    for step in [StepId::Bootloader, StepId::Network, StepId::User] {
        assert!(failure.report.outcome(step).is_none(), "{} ran", step);
    }
    assert!(runner.recorded().is_empty());
    assert!(!target.path("/etc/hostname").exists());
}

#[test]
fn test_missing_grub_defaults_is_fatal_even_for_best_effort_steps() {
    let target = Target::new().with_installed_theme();
    fs::remove_file(target.path("/etc/default/grub")).unwrap();
    let ctx = common::context(target.config());
    let runner = FakeRunner::new();
    let installer = FakeInstaller::default();
    let confirm = FakeConfirmation::yes();

    let failure = ProvisioningPipeline::new(&ctx, &runner, &installer, &installer, &confirm)
        .run()
        .unwrap_err();

    assert_eq!(failure.step, StepId::BootloaderTheme);
    assert!(matches!(failure.error, ProvisionError::ConfigNotFound { .. }));
}

// =============================================================================
// Degraded runs
// =============================================================================

#[test]
fn test_theme_clone_failure_degrades_but_later_phases_run() {
    let target = Target::new();
    let ctx = common::context(target.config());
    let runner = FakeRunner::new().failing_on("grub2-themes");
    let installer = FakeInstaller::default();
    let confirm = FakeConfirmation::yes();

    let report = ProvisioningPipeline::new(&ctx, &runner, &installer, &installer, &confirm)
        .run()
        .expect("theme failure is not fatal");

    assert_eq!(report.final_stage, ProvisionStage::Done);
    assert!(report.is_degraded());
    assert_eq!(report.failed_count(), 1);
    assert_eq!(report.summary(), "base system ready, 1 optional phases failed");
    assert!(matches!(
        report.outcome(StepId::BootloaderTheme),
        Some(StepOutcome::Failed(_))
    ));
    assert_eq!(report.outcome(StepId::User), Some(&StepOutcome::Succeeded));
    assert_eq!(report.outcome(StepId::Dotfiles), Some(&StepOutcome::Succeeded));
    assert!(runner.ran_program("stow"));
}

#[test]
fn test_bootloader_failure_blocks_theme_and_gpu() {
    let target = Target::new();
    let config = target.config_with(|json| json["gpu_driver"] = "nvidia".into());
    let ctx = common::context(config);
    let runner = FakeRunner::new().failing_on("grub-install");
    let installer = FakeInstaller::default();
    let confirm = FakeConfirmation::yes();

    let report = ProvisioningPipeline::new(&ctx, &runner, &installer, &installer, &confirm)
        .run()
        .unwrap();

    assert!(matches!(report.outcome(StepId::Bootloader), Some(StepOutcome::Failed(_))));
    assert!(matches!(report.outcome(StepId::BootloaderTheme), Some(StepOutcome::Blocked(_))));
    assert!(matches!(report.outcome(StepId::GpuDriver), Some(StepOutcome::Blocked(_))));
    assert_eq!(report.final_stage, ProvisionStage::Done);
    assert_eq!(target.read("/etc/mkinitcpio.conf"), MKINITCPIO);
}

#[test]
fn test_user_failure_blocks_dotfiles_and_aur_helper() {
    let target = Target::new();
    let ctx = common::context(target.config());
    let runner = FakeRunner::new().failing_on("useradd");
    let installer = FakeInstaller::default();
    let confirm = FakeConfirmation::yes();

    let report = ProvisioningPipeline::new(&ctx, &runner, &installer, &installer, &confirm)
        .run()
        .unwrap();

    assert!(matches!(report.outcome(StepId::Dotfiles), Some(StepOutcome::Blocked(_))));
    assert!(matches!(report.outcome(StepId::AurHelper), Some(StepOutcome::Blocked(_))));
    assert!(!runner.ran_program("stow"));
    assert!(!runner.ran("makepkg"));
}

#[test]
fn test_aur_helper_runs_when_dotfiles_disabled() {
    let target = Target::new();
    let config = target.config_with(|json| json["dotfiles"] = serde_json::Value::Null);
    let ctx = common::context(config);
    let runner = FakeRunner::new();
    let installer = FakeInstaller::default();
    let confirm = FakeConfirmation::yes();

    let report = ProvisioningPipeline::new(&ctx, &runner, &installer, &installer, &confirm)
        .run()
        .unwrap();

    assert!(matches!(report.outcome(StepId::Dotfiles), Some(StepOutcome::NotApplicable(_))));
    assert_eq!(report.outcome(StepId::AurHelper), Some(&StepOutcome::Succeeded));
    assert!(!runner.ran_program("stow"));
    assert!(runner.ran("makepkg"));

    let aur_install = runner
        .runs_of("pacman")
        .into_iter()
        .find(|spec| spec.mentions("base-devel"))
        .expect("build tooling installed");
    assert!(!aur_install.mentions("stow"));
    assert!(!aur_install.mentions("fontconfig"));
    assert!(!target.path("/etc/sudoers.d/99-archstrap-aur-build").exists());
}

// =============================================================================
// Configuration-driven phases
// =============================================================================

#[test]
fn test_nvidia_patches_initramfs_and_cmdline() {
    let target = Target::new();
    let config = target.config_with(|json| json["gpu_driver"] = "nvidia".into());
    let ctx = common::context(config);
    let runner = FakeRunner::new();
    let installer = FakeInstaller::default();
    let confirm = FakeConfirmation::yes();

    let report = ProvisioningPipeline::new(&ctx, &runner, &installer, &installer, &confirm)
        .run()
        .unwrap();

    assert_eq!(report.outcome(StepId::GpuDriver), Some(&StepOutcome::Succeeded));
    let mkinitcpio = target.read("/etc/mkinitcpio.conf");
    assert!(mkinitcpio.contains("\nMODULES=(nvidia nvidia_modeset nvidia_uvm nvidia_drm)\n"));
    assert!(mkinitcpio.contains("\nBINARIES=()\n"));
    let grub = target.read("/etc/default/grub");
    assert!(grub.contains("GRUB_CMDLINE_LINUX_DEFAULT=\"nvidia_drm.modeset=1 loglevel=3 quiet\""));
    assert!(runner.ran("nvidia-dkms"));
}

#[test]
fn test_encrypted_root_gets_kernel_parameters() {
    let target = Target::new();
    let config = target.config_with(|json| {
        json["encryption"] = serde_json::json!({ "mountpoints": ["/"] });
    });
    let ctx = common::context(config);
    let runner = FakeRunner::new();
    let installer = FakeInstaller::default();
    let confirm = FakeConfirmation::yes();

    let report = ProvisioningPipeline::new(&ctx, &runner, &installer, &installer, &confirm)
        .run()
        .unwrap();

    assert_eq!(report.outcome(StepId::Encryption), Some(&StepOutcome::Succeeded));
    let grub = target.read("/etc/default/grub");
    assert!(grub.contains(
        "GRUB_CMDLINE_LINUX=\"cryptdevice=UUID=0a1b2c3d-4e5f-6789-abcd-ef0123456789:cryptroot root=/dev/mapper/cryptroot\""
    ));
    assert!(runner.ran("/dev/nvme0n1p3"));
}

#[test]
fn test_network_section_enables_service() {
    let target = Target::new();
    let config = target.config_with(|json| {
        json["network"] = serde_json::json!({ "mode": "iwd" });
    });
    let ctx = common::context(config);
    let runner = FakeRunner::new();
    let installer = FakeInstaller::default();
    let confirm = FakeConfirmation::yes();

    let report = ProvisioningPipeline::new(&ctx, &runner, &installer, &installer, &confirm)
        .run()
        .unwrap();

    assert_eq!(report.outcome(StepId::Network), Some(&StepOutcome::Succeeded));
    assert!(runner.ran("systemd-resolved"));
}

#[test]
fn test_dry_run_leaves_target_untouched() {
    let target = Target::new().with_installed_theme();
    let ctx = common::context(target.config_with(|json| json["gpu_driver"] = "nvidia".into()));
    let runner = DryRunRunner::new();
    let installer = FakeInstaller::default();
    let confirm = FakeConfirmation::yes();

    let report = ProvisioningPipeline::new(&ctx, &runner, &installer, &installer, &confirm)
        .run()
        .unwrap();

    assert_eq!(report.final_stage, ProvisionStage::Done);
    assert_eq!(target.read("/etc/default/grub"), GRUB_DEFAULTS);
    assert_eq!(target.read("/etc/mkinitcpio.conf"), MKINITCPIO);
    assert!(!target.path("/etc/hostname").exists());
    assert!(!target.path("/etc/sudoers.d/10-wheel").exists());
    assert!(!runner.recorded().is_empty());
}
