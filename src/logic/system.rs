//! Post-base system configuration: hostname, networking, profile packages
//! and the primary user account.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::command::{CommandArgs, CommandRunner};
use crate::commands::pacman::PacmanInstallArgs;
use crate::commands::system::SystemctlEnableArgs;
use crate::commands::user::{ChpasswdArgs, CopyTreeArgs, MkdirArgs, UseraddArgs};
use crate::config_file::{Credentials, ProfileConfig, ROOT_PASSWORD, USER_PASSWORD, UserConfig};
use crate::context::target_path;
use crate::error::Result;
use crate::patch::write_atomic;
use crate::types::NetworkMode;

/// Live-ISO network configuration copied by `NetworkMode::CopyIso`
const ISO_NETWORK_DIRS: &[&str] = &["/etc/systemd/network", "/var/lib/iwd"];

const SUDOERS_DROP_IN: &str = "/etc/sudoers.d/10-wheel";
const SUDOERS_RULE: &str = "%wheel ALL=(ALL:ALL) ALL\n";

pub struct SystemConfigurator<'a> {
    runner: &'a dyn CommandRunner,
    root: PathBuf,
}

impl<'a> SystemConfigurator<'a> {
    pub fn new(runner: &'a dyn CommandRunner, root: &Path) -> Self {
        Self {
            runner,
            root: root.to_path_buf(),
        }
    }

    fn run_in_target(&self, args: &dyn CommandArgs) -> Result<()> {
        self.runner
            .run(&args.to_spec().in_chroot(&self.root))
            .map(|_| ())
    }

    fn write_file(&self, in_target: &str, contents: &str, mode: u32) -> Result<()> {
        let path = target_path(&self.root, Path::new(in_target));
        if self.runner.is_dry_run() {
            info!("[dry-run] would write {} ({:o})", path.display(), mode);
            return Ok(());
        }
        write_atomic(&path, contents, Some(mode))
    }

    fn install(&self, packages: Vec<String>) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        self.run_in_target(&PacmanInstallArgs::new(packages))
    }

    fn enable(&self, units: Vec<String>) -> Result<()> {
        if units.is_empty() {
            return Ok(());
        }
        self.run_in_target(&SystemctlEnableArgs::new(units))
    }

    pub fn set_hostname(&self, hostname: &str) -> Result<()> {
        info!("Setting hostname to {}", hostname);
        self.write_file("/etc/hostname", &format!("{}\n", hostname), 0o644)
    }

    pub fn configure_network(&self, mode: NetworkMode) -> Result<()> {
        info!("Configuring network: {}", mode);
        self.install(mode.packages().iter().map(|p| p.to_string()).collect())?;

        if mode == NetworkMode::CopyIso {
            for dir in ISO_NETWORK_DIRS {
                let source = Path::new(dir);
                if !self.runner.is_dry_run() && !source.is_dir() {
                    info!("{} not present on the live system, nothing to copy", dir);
                    continue;
                }
                let destination = target_path(&self.root, source);
                self.runner.run(
                    &MkdirArgs {
                        path: destination.clone(),
                    }
                    .to_spec(),
                )?;
                self.runner.run(
                    &CopyTreeArgs {
                        source: source.to_path_buf(),
                        destination,
                    }
                    .to_spec(),
                )?;
            }
        }

        self.enable(mode.services().iter().map(|s| s.to_string()).collect())
    }

    /// Profile packages plus extras, then the profile's and the configured
    /// services.
    pub fn apply_profile(&self, profile: &ProfileConfig) -> Result<()> {
        info!("Applying profile {} ({})", profile.profile, profile.profile.description());
        let mut packages: Vec<String> = profile
            .profile
            .packages()
            .iter()
            .map(|p| p.to_string())
            .collect();
        packages.extend(profile.extra_packages.iter().cloned());
        self.install(packages)?;

        let mut services: Vec<String> = profile
            .profile
            .services()
            .into_iter()
            .map(str::to_string)
            .collect();
        for extra in &profile.services {
            if !services.contains(extra) {
                services.push(extra.clone());
            }
        }
        self.enable(services)
    }

    /// Create the account, set both passwords through stdin and grant the
    /// wheel group sudo when requested.
    pub fn create_user(&self, user: &UserConfig, credentials: &Credentials) -> Result<()> {
        info!("Creating user {}", user.username);
        self.run_in_target(&UseraddArgs {
            username: user.username.clone(),
            groups: user.groups.clone(),
            shell: user.shell.clone(),
            create_home: true,
        })?;
        self.run_in_target(&ChpasswdArgs {
            username: user.username.clone(),
            password: credentials.get(USER_PASSWORD)?.to_string(),
        })?;
        self.run_in_target(&ChpasswdArgs {
            username: "root".to_string(),
            password: credentials.get(ROOT_PASSWORD)?.to_string(),
        })?;

        if user.sudo {
            self.write_file(SUDOERS_DROP_IN, SUDOERS_RULE, 0o440)?;
        }
        Ok(())
    }
}
