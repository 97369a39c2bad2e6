//! Provisioning stage machine
//!
//! The authoritative record of how far a run has progressed. Transitions
//! are forward-only and one stage at a time; the only permitted jump is
//! over stages marked optional (encryption, network, dotfiles, AUR helper)
//! whose phase does not apply to this run.
//!
//! # Stage Flow
//!
//! ```text
//! Pending
//!     ↓
//! DiskConfigured
//!     ↓
//! Encrypted            (optional)
//!     ↓
//! FilesystemPrepared   (destructive: needs confirmation)
//!     ↓
//! BaseInstalled
//!     ↓
//! HostnameSet
//!     ↓
//! BootloaderAdded
//!     ↓
//! NetworkConfigured    (optional)
//!     ↓
//! ProfileApplied
//!     ↓
//! UserCreated
//!     ↓
//! DotfilesLinked       (optional)
//!     ↓
//! AurHelperInstalled   (optional)
//!     ↓
//! Done
//!
//! (Any non-terminal stage can transition to Failed)
//! ```
//!
//! A stage means "this phase has finished", not "this phase succeeded":
//! best-effort phases move the machine forward even when they fail, and the
//! outcome lives in the pipeline's report.

use std::fmt;
use std::time::SystemTime;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Provisioning stages in sequential order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum ProvisionStage {
    Pending = 0,
    /// Disk layout validated and bound to the target disk
    DiskConfigured = 1,
    /// Encryption parameters validated and the passphrase available
    Encrypted = 2,
    /// Partitions created, formatted (and LUKS-opened). Destructive.
    FilesystemPrepared = 3,
    /// Layout mounted, base packages installed, fstab written
    BaseInstalled = 4,
    HostnameSet = 5,
    BootloaderAdded = 6,
    NetworkConfigured = 7,
    ProfileApplied = 8,
    UserCreated = 9,
    DotfilesLinked = 10,
    AurHelperInstalled = 11,
    /// Terminal success (possibly degraded)
    Done = 12,
    /// Terminal failure
    Failed = 255,
}

impl ProvisionStage {
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Entering this stage destroys data on the target disk
    #[inline]
    pub const fn is_destructive(self) -> bool {
        matches!(self, Self::FilesystemPrepared)
    }

    /// Stages that may be jumped over when their phase does not apply
    #[inline]
    pub const fn is_optional(self) -> bool {
        matches!(
            self,
            Self::Encrypted | Self::NetworkConfigured | Self::DotfilesLinked | Self::AurHelperInstalled
        )
    }

    /// Up to and including `BaseInstalled`, any failure aborts the run
    #[inline]
    pub const fn is_mandatory(self) -> bool {
        self.order() <= Self::BaseInstalled.order()
    }

    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::DiskConfigured),
            Self::DiskConfigured => Some(Self::Encrypted),
            Self::Encrypted => Some(Self::FilesystemPrepared),
            Self::FilesystemPrepared => Some(Self::BaseInstalled),
            Self::BaseInstalled => Some(Self::HostnameSet),
            Self::HostnameSet => Some(Self::BootloaderAdded),
            Self::BootloaderAdded => Some(Self::NetworkConfigured),
            Self::NetworkConfigured => Some(Self::ProfileApplied),
            Self::ProfileApplied => Some(Self::UserCreated),
            Self::UserCreated => Some(Self::DotfilesLinked),
            Self::DotfilesLinked => Some(Self::AurHelperInstalled),
            Self::AurHelperInstalled => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::DiskConfigured => "Disk layout configured",
            Self::Encrypted => "Encryption configured",
            Self::FilesystemPrepared => "Filesystems prepared",
            Self::BaseInstalled => "Base system installed",
            Self::HostnameSet => "Hostname set",
            Self::BootloaderAdded => "Bootloader added",
            Self::NetworkConfigured => "Network configured",
            Self::ProfileApplied => "Profile applied",
            Self::UserCreated => "User created",
            Self::DotfilesLinked => "Dotfiles linked",
            Self::AurHelperInstalled => "AUR helper installed",
            Self::Done => "Done",
            Self::Failed => "Failed",
        }
    }

    /// All stages in order (excluding Failed)
    pub const fn all_stages() -> &'static [Self] {
        &[
            Self::Pending,
            Self::DiskConfigured,
            Self::Encrypted,
            Self::FilesystemPrepared,
            Self::BaseInstalled,
            Self::HostnameSet,
            Self::BootloaderAdded,
            Self::NetworkConfigured,
            Self::ProfileApplied,
            Self::UserCreated,
            Self::DotfilesLinked,
            Self::AurHelperInstalled,
            Self::Done,
        ]
    }
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur during stage transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageTransitionError {
    /// Attempted to jump over a stage that is not optional
    #[error("Cannot skip from {from} to {to} ({skipped} is not optional)")]
    SkippedStage {
        from: ProvisionStage,
        to: ProvisionStage,
        skipped: ProvisionStage,
    },

    #[error("Cannot go backwards from {from} to {to} (provisioning is forward-only)")]
    BackwardTransition {
        from: ProvisionStage,
        to: ProvisionStage,
    },

    #[error("Cannot transition from terminal stage {from}")]
    FromTerminalState { from: ProvisionStage },

    /// Entering a destructive stage without operator confirmation
    #[error("Stage {stage} requires explicit confirmation (destructive operation)")]
    MissingConfirmation { stage: ProvisionStage },

    #[error("Already at stage {stage}")]
    AlreadyAtStage { stage: ProvisionStage },

    /// `Failed` is entered through `fail()`
    #[error("Use fail() to enter the Failed stage")]
    FailedViaTransition,
}

/// Owns the current stage and validates every transition.
///
/// ```
/// use archstrap::install_state::{ProvisionStage, StageTracker};
///
/// let mut tracker = StageTracker::new();
/// tracker.advance().unwrap();
/// assert_eq!(tracker.current_stage(), ProvisionStage::DiskConfigured);
///
/// // Encrypted is optional, FilesystemPrepared still needs confirmation
/// assert!(tracker.transition_to(ProvisionStage::FilesystemPrepared).is_err());
/// tracker.confirm_destructive_operations();
/// tracker.transition_to(ProvisionStage::FilesystemPrepared).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct StageTracker {
    current: ProvisionStage,
    failed_at: Option<ProvisionStage>,
    /// (stage, seconds since UNIX_EPOCH) for every stage entered
    stage_history: Vec<(ProvisionStage, u64)>,
    destructive_confirmed: bool,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            current: ProvisionStage::Pending,
            failed_at: None,
            stage_history: Vec::with_capacity(ProvisionStage::all_stages().len()),
            destructive_confirmed: false,
        }
    }

    #[inline]
    pub fn current_stage(&self) -> ProvisionStage {
        self.current
    }

    /// Stage the run was in when it failed
    #[inline]
    pub fn failed_at(&self) -> Option<ProvisionStage> {
        self.failed_at
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.current == ProvisionStage::Done
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        self.current == ProvisionStage::Failed
    }

    pub fn stage_history(&self) -> &[(ProvisionStage, u64)] {
        &self.stage_history
    }

    /// One-way flag; there is no way to revoke a confirmation.
    pub fn confirm_destructive_operations(&mut self) {
        self.destructive_confirmed = true;
    }

    #[inline]
    pub fn is_destructive_confirmed(&self) -> bool {
        self.destructive_confirmed
    }

    /// Move to the immediately following stage.
    pub fn advance(&mut self) -> Result<ProvisionStage, StageTransitionError> {
        let next = self
            .current
            .next()
            .ok_or(StageTransitionError::FromTerminalState { from: self.current })?;
        self.transition_to(next)
    }

    /// Move to `target`, jumping only over optional stages.
    pub fn transition_to(
        &mut self,
        target: ProvisionStage,
    ) -> Result<ProvisionStage, StageTransitionError> {
        if self.current.is_terminal() {
            return Err(StageTransitionError::FromTerminalState { from: self.current });
        }
        if target == ProvisionStage::Failed {
            return Err(StageTransitionError::FailedViaTransition);
        }
        if target == self.current {
            return Err(StageTransitionError::AlreadyAtStage { stage: target });
        }
        if target.order() < self.current.order() {
            return Err(StageTransitionError::BackwardTransition {
                from: self.current,
                to: target,
            });
        }

        // Every stage strictly between current and target must be optional
        let mut cursor = self.current.next();
        while let Some(stage) = cursor {
            if stage == target {
                break;
            }
            if !stage.is_optional() {
                return Err(StageTransitionError::SkippedStage {
                    from: self.current,
                    to: target,
                    skipped: stage,
                });
            }
            debug!("Skipping optional stage: {}", stage);
            cursor = stage.next();
        }

        if target.is_destructive() && !self.destructive_confirmed {
            return Err(StageTransitionError::MissingConfirmation { stage: target });
        }

        self.record_stage_transition(target);
        self.current = target;
        Ok(target)
    }

    /// Enter `Failed`, remembering where the run was.
    pub fn fail(&mut self) -> Result<(), StageTransitionError> {
        if self.current.is_terminal() {
            return Err(StageTransitionError::FromTerminalState { from: self.current });
        }
        warn!("Provisioning failed during: {}", self.current);
        self.failed_at = Some(self.current);
        self.record_stage_transition(ProvisionStage::Failed);
        self.current = ProvisionStage::Failed;
        Ok(())
    }

    fn record_stage_transition(&mut self, stage: ProvisionStage) {
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.stage_history.push((stage, timestamp));
    }
}

impl From<StageTransitionError> for crate::error::ProvisionError {
    fn from(err: StageTransitionError) -> Self {
        crate::error::ProvisionError::Transition(err.to_string())
    }
}
