//! archstrap library
//!
//! Provisions a fresh Arch Linux installation end-to-end: storage, base
//! system, themed bootloader, networking, users and a personal environment.
//! The binary is a thin clap front-end over `pipeline::ProvisioningPipeline`.

pub mod cli;
pub mod command;
pub mod commands;
pub mod config_file;
pub mod context;
pub mod engine;
pub mod error;
pub mod hardware;
pub mod install_state;
pub mod installer;
pub mod logic;
pub mod patch;
pub mod pipeline;
pub mod process_guard;
pub mod profiles;
pub mod sanity;
pub mod types;

// Re-export main types for convenience
pub use command::{CommandArgs, CommandOutput, CommandRunner, CommandSpec, DryRunRunner, SystemRunner};
pub use config_file::{Credentials, ProvisioningConfig};
pub use context::ProvisioningContext;
pub use error::{ProvisionError, Result};
pub use install_state::{ProvisionStage, StageTracker, StageTransitionError};
pub use installer::{
    AssumeYes, BaseInstaller, CommandInstaller, Confirmation, DiskPreparer, StdinConfirmation,
};
pub use patch::{ConfigFilePatcher, PatchOutcome};
pub use pipeline::{PipelineFailure, ProvisioningPipeline, ProvisioningReport, StepId, StepOutcome};
pub use process_guard::{ChildRegistry, CommandProcessGroup};

// Hardware detection
pub use hardware::{FirmwareMode, HardwareInfo, NetworkState};

// Storage engine
pub use engine::storage::{StorageOp, StoragePlan, calculate_storage_plan};

// Phase logic
pub use logic::bootloader::BootloaderThemeInstaller;
pub use logic::gpu::GpuDriverConfigurer;
pub use logic::theme::{ThemeDescriptor, ThemeResolver};
pub use logic::user_env::UserEnvironmentBootstrapper;
