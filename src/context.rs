//! The run's immutable inputs.
//!
//! Built once from the configuration payload, the credentials payload and
//! hardware detection, then passed by reference to every phase.

use std::path::{Component, Path, PathBuf};

use crate::config_file::{Credentials, ProvisioningConfig};
use crate::error::Result;
use crate::hardware::FirmwareMode;

#[derive(Debug, Clone)]
pub struct ProvisioningContext {
    config: ProvisioningConfig,
    credentials: Credentials,
    firmware: FirmwareMode,
}

impl ProvisioningContext {
    /// Validate `config` against `detected` firmware (unless the config
    /// overrides it) and check that every needed secret is present.
    pub fn new(
        config: ProvisioningConfig,
        credentials: Credentials,
        detected: FirmwareMode,
    ) -> Result<Self> {
        let firmware = config.firmware.unwrap_or(detected);
        config.validate(firmware)?;
        credentials.require_for(&config)?;
        Ok(Self {
            config,
            credentials,
            firmware,
        })
    }

    pub fn config(&self) -> &ProvisioningConfig {
        &self.config
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn firmware(&self) -> FirmwareMode {
        self.firmware
    }

    /// Where the target is mounted on the host (usually `/mnt`)
    pub fn root(&self) -> &Path {
        &self.config.mountpoint
    }

    /// Host path of an absolute in-target path: `/etc/hostname` becomes
    /// `/mnt/etc/hostname`.
    pub fn target_path(&self, in_target: impl AsRef<Path>) -> PathBuf {
        target_path(self.root(), in_target.as_ref())
    }

    pub fn username(&self) -> &str {
        &self.config.user.username
    }
}

/// Join an in-target path onto `root`, ignoring its leading `/`.
pub fn target_path(root: &Path, in_target: &Path) -> PathBuf {
    let relative: PathBuf = in_target
        .components()
        .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
        .collect();
    root.join(relative)
}

/// The in-target view of a host path under `root`: `/mnt/boot/x` becomes
/// `/boot/x`. `None` when `host` is outside `root`.
pub fn in_target_path(root: &Path, host: &Path) -> Option<PathBuf> {
    host.strip_prefix(root)
        .ok()
        .map(|rel| Path::new("/").join(rel))
}
