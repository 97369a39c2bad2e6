//! The provisioning pipeline.
//!
//! Runs the steps below strictly in order, driving a `StageTracker` forward
//! as each one finishes.
//!
//! | Step             | Stage              | Policy   | Requires   |
//! |------------------|--------------------|----------|------------|
//! | disk-layout      | DiskConfigured     | abort    |            |
//! | encryption       | Encrypted          | abort    |            |
//! | filesystem       | FilesystemPrepared | abort    | confirmation |
//! | base-system      | BaseInstalled      | abort    |            |
//! | hostname         | HostnameSet        | continue |            |
//! | bootloader       | BootloaderAdded    | continue |            |
//! | bootloader-theme | BootloaderAdded    | continue | bootloader |
//! | network          | NetworkConfigured  | continue |            |
//! | profile          | ProfileApplied     | continue |            |
//! | gpu-driver       | ProfileApplied     | continue | bootloader |
//! | user             | UserCreated        | continue |            |
//! | dotfiles         | DotfilesLinked     | continue | user       |
//! | aur-helper       | AurHelperInstalled | continue | dotfiles   |
//!
//! A step that does not apply to this run (no encryption, no network
//! section, no GPU driver...) is recorded as not applicable and its stage is
//! passed over. A step whose requirement failed is recorded as blocked.
//! `ConfigNotFound`, `WritePermissionDenied` and `DestructiveStepAborted`
//! abort the run whatever the step's policy.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use strum::{Display, EnumIter, IntoEnumIterator};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::command::CommandRunner;
use crate::config_file::ENCRYPTION_PASSWORD;
use crate::context::ProvisioningContext;
use crate::engine::storage::{StoragePlan, calculate_storage_plan};
use crate::error::{ProvisionError, Result};
use crate::install_state::{ProvisionStage, StageTracker};
use crate::installer::{BaseInstaller, Confirmation, DiskPreparer};
use crate::logic::bootloader::BootloaderThemeInstaller;
use crate::logic::gpu::GpuDriverConfigurer;
use crate::logic::system::SystemConfigurator;
use crate::logic::theme::ThemeDescriptor;
use crate::logic::user_env::UserEnvironmentBootstrapper;
use crate::types::{AurHelper, GpuDriver};

// ============================================================================
// Steps
// ============================================================================

/// What happens to the run when a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailurePolicy {
    /// Fail the whole run
    Abort,
    /// Record the failure and move on
    Continue,
}

/// Pipeline steps in declared order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumIter)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StepId {
    DiskLayout,
    Encryption,
    Filesystem,
    BaseSystem,
    Hostname,
    Bootloader,
    BootloaderTheme,
    Network,
    Profile,
    GpuDriver,
    User,
    Dotfiles,
    AurHelper,
}

impl StepId {
    /// Stage the tracker reaches once this step has run
    pub const fn stage(self) -> ProvisionStage {
        match self {
            Self::DiskLayout => ProvisionStage::DiskConfigured,
            Self::Encryption => ProvisionStage::Encrypted,
            Self::Filesystem => ProvisionStage::FilesystemPrepared,
            Self::BaseSystem => ProvisionStage::BaseInstalled,
            Self::Hostname => ProvisionStage::HostnameSet,
            Self::Bootloader | Self::BootloaderTheme => ProvisionStage::BootloaderAdded,
            Self::Network => ProvisionStage::NetworkConfigured,
            Self::Profile | Self::GpuDriver => ProvisionStage::ProfileApplied,
            Self::User => ProvisionStage::UserCreated,
            Self::Dotfiles => ProvisionStage::DotfilesLinked,
            Self::AurHelper => ProvisionStage::AurHelperInstalled,
        }
    }

    pub const fn policy(self) -> FailurePolicy {
        if self.stage().is_mandatory() {
            FailurePolicy::Abort
        } else {
            FailurePolicy::Continue
        }
    }

    /// Step that must have succeeded (or not applied) for this one to run
    pub const fn requires(self) -> Option<StepId> {
        match self {
            Self::BootloaderTheme | Self::GpuDriver => Some(Self::Bootloader),
            Self::Dotfiles => Some(Self::User),
            Self::AurHelper => Some(Self::Dotfiles),
            _ => None,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::DiskLayout => "Planning disk layout",
            Self::Encryption => "Checking encryption parameters",
            Self::Filesystem => "Partitioning and formatting",
            Self::BaseSystem => "Installing base system",
            Self::Hostname => "Setting hostname",
            Self::Bootloader => "Installing bootloader",
            Self::BootloaderTheme => "Installing bootloader theme",
            Self::Network => "Configuring network",
            Self::Profile => "Applying profile",
            Self::GpuDriver => "Configuring GPU driver",
            Self::User => "Creating user",
            Self::Dotfiles => "Linking dotfiles",
            Self::AurHelper => "Installing AUR helper",
        }
    }
}

/// How a step ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StepOutcome {
    Succeeded,
    /// Nothing to do for this configuration
    NotApplicable(String),
    /// Not run because a required step did not succeed
    Blocked(String),
    Failed(String),
}

impl StepOutcome {
    fn ran(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "ok"),
            Self::NotApplicable(reason) => write!(f, "skipped ({})", reason),
            Self::Blocked(reason) => write!(f, "blocked ({})", reason),
            Self::Failed(cause) => write!(f, "FAILED: {}", cause),
        }
    }
}

// ============================================================================
// Report
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseRecord {
    pub step: StepId,
    pub stage: ProvisionStage,
    pub outcome: StepOutcome,
}

/// Summary of a run that reached `Done`, or of a run up to its failure
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningReport {
    pub phases: Vec<PhaseRecord>,
    pub final_stage: ProvisionStage,
    /// `GRUB_THEME` as written into the target, when a theme was resolved
    pub theme: Option<PathBuf>,
}

impl ProvisioningReport {
    pub fn outcome(&self, step: StepId) -> Option<&StepOutcome> {
        self.phases
            .iter()
            .find(|p| p.step == step)
            .map(|p| &p.outcome)
    }

    pub fn failed_count(&self) -> usize {
        self.phases
            .iter()
            .filter(|p| matches!(p.outcome, StepOutcome::Failed(_)))
            .count()
    }

    /// Done, but at least one best-effort phase failed
    pub fn is_degraded(&self) -> bool {
        self.failed_count() > 0
    }

    pub fn summary(&self) -> String {
        if self.is_degraded() {
            format!(
                "base system ready, {} optional phases failed",
                self.failed_count()
            )
        } else {
            "provisioning complete".to_string()
        }
    }
}

impl fmt::Display for ProvisioningReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for phase in &self.phases {
            writeln!(f, "  {:<18} {}", phase.step.to_string(), phase.outcome)?;
        }
        if let Some(ref theme) = self.theme {
            writeln!(f, "  theme: {}", theme.display())?;
        }
        write!(f, "{}", self.summary())
    }
}

/// A fatal step failure
#[derive(Debug, Error)]
#[error("{step} failed ({stage}): {error}")]
pub struct PipelineFailure {
    pub step: StepId,
    pub stage: ProvisionStage,
    #[source]
    pub error: ProvisionError,
    /// What ran before the failure
    pub report: ProvisioningReport,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Collaborators and inputs for one run.
pub struct ProvisioningPipeline<'a> {
    ctx: &'a ProvisioningContext,
    runner: &'a dyn CommandRunner,
    disk: &'a dyn DiskPreparer,
    base: &'a dyn BaseInstaller,
    confirmation: &'a dyn Confirmation,
}

/// Derived state accumulated while the steps run
struct RunState {
    tracker: StageTracker,
    plan: Option<StoragePlan>,
    theme: Option<ThemeDescriptor>,
    phases: Vec<PhaseRecord>,
}

impl RunState {
    fn report(&self) -> ProvisioningReport {
        ProvisioningReport {
            phases: self.phases.clone(),
            final_stage: self.tracker.current_stage(),
            theme: self.theme.as_ref().map(|t| t.target_path.clone()),
        }
    }

    fn outcome(&self, step: StepId) -> Option<&StepOutcome> {
        self.phases
            .iter()
            .find(|p| p.step == step)
            .map(|p| &p.outcome)
    }

    /// `Err(reason)` when `step`'s requirement chain did not succeed.
    /// A requirement that did not apply passes its own requirement through.
    fn requirement_met(&self, step: StepId) -> std::result::Result<(), String> {
        let Some(required) = step.requires() else {
            return Ok(());
        };
        match self.outcome(required) {
            Some(StepOutcome::Succeeded) => Ok(()),
            Some(StepOutcome::NotApplicable(_)) => self.requirement_met(required),
            _ => Err(format!("{} did not succeed", required)),
        }
    }

    fn plan(&self) -> Result<&StoragePlan> {
        self.plan
            .as_ref()
            .ok_or_else(|| ProvisionError::Transition("storage plan not computed".to_string()))
    }
}

impl<'a> ProvisioningPipeline<'a> {
    pub fn new(
        ctx: &'a ProvisioningContext,
        runner: &'a dyn CommandRunner,
        disk: &'a dyn DiskPreparer,
        base: &'a dyn BaseInstaller,
        confirmation: &'a dyn Confirmation,
    ) -> Self {
        Self {
            ctx,
            runner,
            disk,
            base,
            confirmation,
        }
    }

    /// Run every step. `Ok` means every mandatory step completed; check
    /// `is_degraded` on the report for best-effort failures.
    pub fn run(&self) -> std::result::Result<ProvisioningReport, PipelineFailure> {
        let mut state = RunState {
            tracker: StageTracker::new(),
            plan: None,
            theme: None,
            phases: Vec::new(),
        };

        for step in StepId::iter() {
            info!("==> [{}] {}", step, step.description());

            let outcome = match self.precheck(&state, step) {
                Some(skipped) => skipped,
                None => match self.execute(&mut state, step) {
                    Ok(()) => StepOutcome::Succeeded,
                    Err(err) if step.policy() == FailurePolicy::Abort || err.is_always_fatal() => {
                        return Err(self.abort(state, step, err));
                    }
                    Err(err) => {
                        warn!("[{}] failed, continuing: {}", step, err);
                        StepOutcome::Failed(err.to_string())
                    }
                },
            };

            if let StepOutcome::NotApplicable(ref reason) | StepOutcome::Blocked(ref reason) =
                outcome
            {
                info!("[{}] skipped: {}", step, reason);
            }
            let ran = outcome.ran();
            state.phases.push(PhaseRecord {
                step,
                stage: step.stage(),
                outcome,
            });

            if ran && step.stage().order() > state.tracker.current_stage().order() {
                if let Err(err) = state.tracker.transition_to(step.stage()) {
                    return Err(self.abort(state, step, err.into()));
                }
            }
        }

        if let Err(err) = state.tracker.transition_to(ProvisionStage::Done) {
            return Err(self.abort(state, StepId::AurHelper, err.into()));
        }

        let report = state.report();
        if report.is_degraded() {
            warn!("{}", report.summary());
        } else {
            info!("{}", report.summary());
        }
        Ok(report)
    }

    fn abort(&self, mut state: RunState, step: StepId, err: ProvisionError) -> PipelineFailure {
        error!("[{}] fatal: {}", step, err);
        state.phases.push(PhaseRecord {
            step,
            stage: step.stage(),
            outcome: StepOutcome::Failed(err.to_string()),
        });
        if let Err(transition) = state.tracker.fail() {
            warn!("{}", transition);
        }
        PipelineFailure {
            step,
            stage: step.stage(),
            error: err,
            report: state.report(),
        }
    }

    /// `Some(outcome)` when the step must not run
    fn precheck(&self, state: &RunState, step: StepId) -> Option<StepOutcome> {
        if let Some(reason) = self.not_applicable(step) {
            return Some(StepOutcome::NotApplicable(reason.to_string()));
        }
        state.requirement_met(step).err().map(StepOutcome::Blocked)
    }

    fn not_applicable(&self, step: StepId) -> Option<&'static str> {
        let config = self.ctx.config();
        match step {
            StepId::Encryption if config.encryption.is_none() => Some("no encryption configured"),
            StepId::BootloaderTheme if !config.theme.enabled => Some("theme disabled"),
            StepId::Network if config.network.is_none() => Some("no network section"),
            StepId::GpuDriver if config.gpu_driver == GpuDriver::None => Some("no GPU driver selected"),
            StepId::Dotfiles if config.dotfiles.is_none() => Some("dotfiles disabled"),
            StepId::AurHelper if config.aur_helper == AurHelper::None => Some("no AUR helper selected"),
            _ => None,
        }
    }

    fn execute(&self, state: &mut RunState, step: StepId) -> Result<()> {
        let ctx = self.ctx;
        let config = ctx.config();
        let root = ctx.root();

        match step {
            StepId::DiskLayout => {
                let plan =
                    calculate_storage_plan(&config.disk_layout, config.encryption.as_ref(), root)?;
                info!("{}", plan.summary());
                state.plan = Some(plan);
            }
            StepId::Encryption => {
                ctx.credentials().get(ENCRYPTION_PASSWORD)?;
                if let Some(ref encryption) = config.encryption {
                    encryption.validate(&config.disk_layout)?;
                    for mountpoint in &encryption.mountpoints {
                        info!("{} will be LUKS2-encrypted", mountpoint.display());
                    }
                }
            }
            StepId::Filesystem => {
                let summary = state.plan()?.summary();
                if !self.confirmation.confirm(&summary)? {
                    return Err(ProvisionError::DestructiveStepAborted {
                        step: step.to_string(),
                    });
                }
                state.tracker.confirm_destructive_operations();
                self.disk.prepare(ctx, state.plan()?)?;
            }
            StepId::BaseSystem => self.base.install_base(ctx, state.plan()?)?,
            StepId::Hostname => {
                SystemConfigurator::new(self.runner, root).set_hostname(&config.hostname)?
            }
            StepId::Bootloader => BootloaderThemeInstaller::new(self.runner)
                .install_bootloader(ctx, &state.plan()?.root)?,
            StepId::BootloaderTheme => {
                state.theme =
                    BootloaderThemeInstaller::new(self.runner).install_theme(root, &config.theme)?;
            }
            StepId::Network => {
                if let Some(network) = config.network {
                    SystemConfigurator::new(self.runner, root).configure_network(network.mode)?;
                }
            }
            StepId::Profile => {
                SystemConfigurator::new(self.runner, root).apply_profile(&config.profile)?
            }
            StepId::GpuDriver => {
                if let Some(report) = GpuDriverConfigurer::new(self.runner).configure(
                    root,
                    config.gpu_driver,
                    &config.kernels,
                )? {
                    info!(
                        "KMS patch: modules changed={}, cmdline changed={}",
                        report.modules.changed(),
                        report.cmdline.changed()
                    );
                }
            }
            StepId::User => SystemConfigurator::new(self.runner, root)
                .create_user(&config.user, ctx.credentials())?,
            StepId::Dotfiles => {
                if let Some(ref dotfiles) = config.dotfiles {
                    UserEnvironmentBootstrapper::new(self.runner, root, &config.user)
                        .link_dotfiles(dotfiles)?;
                }
            }
            StepId::AurHelper => {
                UserEnvironmentBootstrapper::new(self.runner, root, &config.user)
                    .install_aur_helper(config.aur_helper)?;
            }
        }
        Ok(())
    }
}
