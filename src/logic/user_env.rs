//! Personal environment bootstrap for the primary user.
//!
//! Runs after the user exists. Everything that touches the home directory
//! runs as that user via `arch-chroot -u` with `HOME` pointing at their home,
//! so the files end up owned by them and `makepkg` (which refuses to run as
//! root) works.
//!
//! `makepkg -si` calls `sudo pacman`, and nobody is there to type a password.
//! For the length of the build the user gets a NOPASSWD rule limited to
//! pacman, removed again whether the build succeeds or not.
//!
//! # Failure Policy
//!
//! Each sub-step fails its own phase. Nothing here undoes earlier phases;
//! the base system stays bootable whatever happens.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::command::{CommandArgs, CommandRunner};
use crate::commands::git::GitCloneArgs;
use crate::commands::pacman::PacmanInstallArgs;
use crate::commands::user::{CopyTreeArgs, FcCacheArgs, MakepkgArgs, MkdirArgs, StowArgs};
use crate::config_file::{DotfilesConfig, UserConfig};
use crate::context::target_path;
use crate::error::{ProvisionError, Result};
use crate::patch::write_atomic;
use crate::profiles::{AUR_BUILD_PACKAGES, USER_ENV_PACKAGES};
use crate::types::AurHelper;

/// Checkout directory name inside the user's home
pub const DOTFILES_DIR: &str = "dotfiles";

/// Top-level dotfiles directory holding fonts rather than a stow package
pub const FONTS_DIR: &str = "fonts";

/// Sorts after the wheel drop-in so its rule takes precedence
pub const BUILD_SUDOERS_DROP_IN: &str = "/etc/sudoers.d/99-archstrap-aur-build";

/// Keeps the build-time sudoers rule in place until dropped
struct BuildSudoersGrant {
    path: Option<PathBuf>,
}

impl BuildSudoersGrant {
    fn grant(runner: &dyn CommandRunner, root: &Path, username: &str) -> Result<Self> {
        let path = target_path(root, Path::new(BUILD_SUDOERS_DROP_IN));
        if runner.is_dry_run() {
            info!("[dry-run] would let {} run pacman unprompted during the build", username);
            return Ok(Self { path: None });
        }
        let rule = format!("{username} ALL=(root) NOPASSWD: /usr/bin/pacman\n");
        write_atomic(&path, &rule, Some(0o440))?;
        debug!("Wrote {}", path.display());
        Ok(Self { path: Some(path) })
    }
}

impl Drop for BuildSudoersGrant {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) => warn!("Could not remove {}: {}; delete it by hand", path.display(), e),
            }
        }
    }
}

/// What the dotfiles phase did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DotfilesReport {
    /// Stow packages linked into the home directory
    pub linked: Vec<String>,
    pub fonts_installed: bool,
}

pub struct UserEnvironmentBootstrapper<'a> {
    runner: &'a dyn CommandRunner,
    root: PathBuf,
    user: &'a UserConfig,
}

impl<'a> UserEnvironmentBootstrapper<'a> {
    /// Bootstrap `user` inside the target mounted at `root`
    pub fn new(runner: &'a dyn CommandRunner, root: &Path, user: &'a UserConfig) -> Self {
        Self {
            runner,
            root: root.to_path_buf(),
            user,
        }
    }

    fn run_as_user(&self, args: &dyn CommandArgs) -> Result<()> {
        let home = ("HOME".to_string(), self.home().display().to_string());
        self.runner
            .run(
                &args
                    .to_spec()
                    .envs(vec![home])
                    .in_chroot_as(&self.root, &self.user.username),
            )
            .map(|_| ())
    }

    fn home(&self) -> PathBuf {
        self.user.home()
    }

    /// Install `packages` inside the target as root
    fn install_packages(&self, packages: &[&str]) -> Result<()> {
        self.runner.run(
            &PacmanInstallArgs::new(packages.iter().copied())
                .to_spec()
                .in_chroot(&self.root),
        )?;
        Ok(())
    }

    /// Clone the dotfiles into `~/dotfiles`, stow every package and install
    /// bundled fonts.
    pub fn link_dotfiles(&self, dotfiles: &DotfilesConfig) -> Result<DotfilesReport> {
        self.install_packages(USER_ENV_PACKAGES)?;

        let checkout = self.home().join(DOTFILES_DIR);
        let mut clone = GitCloneArgs::new(&dotfiles.repo_url, &checkout);
        clone.branch = dotfiles.branch.clone();
        info!("Cloning dotfiles for {}", self.user.username);
        self.run_as_user(&clone)?;

        let host_checkout = target_path(&self.root, &checkout);
        let mut report = DotfilesReport::default();

        match self.stow_packages(&host_checkout)? {
            Some(packages) if !packages.is_empty() => {
                self.run_as_user(&StowArgs {
                    directory: checkout.clone(),
                    target: self.home(),
                    packages: packages.clone(),
                })?;
                info!("Linked {} dotfiles packages: {}", packages.len(), packages.join(" "));
                report.linked = packages;
            }
            Some(_) => warn!("Dotfiles repository has no packages to link"),
            None => {}
        }

        if dotfiles.install_fonts {
            report.fonts_installed = self.install_fonts(&checkout, &host_checkout)?;
        }
        Ok(report)
    }

    /// Non-hidden top-level directories of the checkout, sorted. `None` in
    /// dry-run mode when the checkout was never actually cloned.
    fn stow_packages(&self, host_checkout: &Path) -> Result<Option<Vec<String>>> {
        let entries = match fs::read_dir(host_checkout) {
            Ok(entries) => entries,
            Err(e) if self.runner.is_dry_run() => {
                info!(
                    "[dry-run] {} not readable ({}), skipping stow",
                    host_checkout.display(),
                    e
                );
                return Ok(None);
            }
            // A missing checkout is a failed clone, not a missing system config
            Err(e) => {
                warn!("Cannot read dotfiles checkout {}", host_checkout.display());
                return Err(ProvisionError::Io(e));
            }
        };

        let mut packages = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || name == FONTS_DIR {
                continue;
            }
            if entry.path().is_dir() {
                packages.push(name);
            }
        }
        packages.sort();
        Ok(Some(packages))
    }

    /// Copy `fonts/` into `~/.local/share/fonts` and rebuild the font cache.
    /// Returns false when the repository has no fonts directory.
    fn install_fonts(&self, checkout: &Path, host_checkout: &Path) -> Result<bool> {
        if !host_checkout.join(FONTS_DIR).is_dir() {
            info!("No {} directory in dotfiles, skipping font install", FONTS_DIR);
            return Ok(false);
        }
        let fonts_dest = self.home().join(".local/share/fonts");
        self.run_as_user(&MkdirArgs {
            path: fonts_dest.clone(),
        })?;
        self.run_as_user(&CopyTreeArgs {
            source: checkout.join(FONTS_DIR),
            destination: fonts_dest,
        })?;
        self.run_as_user(&FcCacheArgs { verbose: true })?;
        Ok(true)
    }

    /// Clone `helper` from the AUR into the home directory and build it with
    /// `makepkg -si`. Returns false when no helper is selected.
    pub fn install_aur_helper(&self, helper: AurHelper) -> Result<bool> {
        let Some(url) = helper.repo_url() else {
            info!("No AUR helper selected, skipping");
            return Ok(false);
        };
        let build_dir = self.home().join(helper.to_string());
        info!("Installing AUR helper {} for {}", helper, self.user.username);
        self.install_packages(AUR_BUILD_PACKAGES)?;
        self.run_as_user(&GitCloneArgs::new(url, &build_dir))?;

        let _grant = BuildSudoersGrant::grant(self.runner, &self.root, &self.user.username)?;
        self.run_as_user(&MakepkgArgs { build_dir })?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ExecScope;
    use crate::command::testing::ScriptedRunner;
    use std::os::unix::fs::PermissionsExt;

    fn user() -> UserConfig {
        serde_json::from_str(r#"{ "username": "geoff" }"#).unwrap()
    }

    fn checkout_with(root: &Path, dirs: &[&str]) {
        for d in dirs {
            fs::create_dir_all(root.join("home/geoff/dotfiles").join(d)).unwrap();
        }
        fs::write(root.join("home/geoff/dotfiles/README.md"), "dots").unwrap();
    }

    #[test]
    fn test_stows_visible_directories_as_user() {
        let root = tempfile::tempdir().unwrap();
        checkout_with(root.path(), &["zsh", "nvim", ".git", "fonts"]);
        let runner = ScriptedRunner::new();
        let user = user();
        let report = UserEnvironmentBootstrapper::new(&runner, root.path(), &user)
            .link_dotfiles(&DotfilesConfig::default())
            .unwrap();

        assert_eq!(report.linked, vec!["nvim", "zsh"]);
        assert!(report.fonts_installed);
        assert_eq!(
            runner.programs(),
            vec!["pacman", "git", "stow", "mkdir", "cp", "fc-cache"]
        );
        let recorded = runner.recorded();
        assert!(matches!(recorded[0].scope(), ExecScope::Chroot { .. }));
        for spec in &recorded[1..] {
            assert!(
                matches!(spec.scope(), ExecScope::ChrootAsUser { user, .. } if user == "geoff"),
                "{}",
                spec.display()
            );
        }
        assert!(recorded[1].mentions("/home/geoff/dotfiles"));
    }

    #[test]
    fn test_fonts_skipped_without_fonts_dir() {
        let root = tempfile::tempdir().unwrap();
        checkout_with(root.path(), &["zsh"]);
        let runner = ScriptedRunner::new();
        let user = user();
        let report = UserEnvironmentBootstrapper::new(&runner, root.path(), &user)
            .link_dotfiles(&DotfilesConfig::default())
            .unwrap();
        assert!(!report.fonts_installed);
        assert!(!runner.programs().contains(&"fc-cache".to_string()));
    }

    #[test]
    fn test_missing_checkout_is_an_error_outside_dry_run() {
        let root = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let user = user();
        let err = UserEnvironmentBootstrapper::new(&runner, root.path(), &user)
            .link_dotfiles(&DotfilesConfig::default())
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Io(_)));
        assert!(!err.is_always_fatal());
    }

    #[test]
    fn test_stow_conflict_fails_phase() {
        let root = tempfile::tempdir().unwrap();
        checkout_with(root.path(), &["zsh"]);
        let runner = ScriptedRunner::new().failing_on("stow");
        let user = user();
        let err = UserEnvironmentBootstrapper::new(&runner, root.path(), &user)
            .link_dotfiles(&DotfilesConfig::default())
            .unwrap_err();
        assert!(matches!(err, ProvisionError::ExternalCommandFailed { .. }));
    }

    fn target_with_sudoers() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("etc/sudoers.d")).unwrap();
        root
    }

    #[test]
    fn test_aur_helper_clone_then_build() {
        let root = target_with_sudoers();
        let runner = ScriptedRunner::new();
        let user = user();
        let installed = UserEnvironmentBootstrapper::new(&runner, root.path(), &user)
            .install_aur_helper(AurHelper::Paru)
            .unwrap();
        assert!(installed);
        assert_eq!(runner.programs(), vec!["pacman", "git", "env"]);
        let recorded = runner.recorded();
        assert_eq!(
            recorded[0].arguments().to_vec(),
            vec!["-S", "--noconfirm", "--needed", "base-devel", "git"]
        );
        assert!(matches!(recorded[0].scope(), ExecScope::Chroot { .. }));
        assert!(recorded[1].mentions("https://aur.archlinux.org/paru.git"));
        assert!(recorded[1].mentions("/home/geoff/paru"));
        assert!(recorded[2].mentions("makepkg"));
    }

    #[test]
    fn test_user_commands_carry_home() {
        let root = target_with_sudoers();
        let runner = ScriptedRunner::new();
        let user = user();
        UserEnvironmentBootstrapper::new(&runner, root.path(), &user)
            .install_aur_helper(AurHelper::Yay)
            .unwrap();
        for spec in runner.recorded() {
            let home = spec.env_vars().iter().find(|(k, _)| k == "HOME");
            match spec.scope() {
                ExecScope::ChrootAsUser { .. } => {
                    assert_eq!(home.map(|(_, v)| v.as_str()), Some("/home/geoff"))
                }
                _ => assert!(home.is_none(), "{}", spec.display()),
            }
        }
    }

    #[test]
    fn test_build_grant_is_pacman_only_and_removed_on_drop() {
        let root = target_with_sudoers();
        let runner = ScriptedRunner::new();
        let drop_in = root.path().join("etc/sudoers.d/99-archstrap-aur-build");
        {
            let _grant = BuildSudoersGrant::grant(&runner, root.path(), "geoff").unwrap();
            assert_eq!(
                fs::read_to_string(&drop_in).unwrap(),
                "geoff ALL=(root) NOPASSWD: /usr/bin/pacman\n"
            );
            let mode = fs::metadata(&drop_in).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o440);
        }
        assert!(!drop_in.exists());
    }

    #[test]
    fn test_build_grant_removed_after_build() {
        let root = target_with_sudoers();
        let runner = ScriptedRunner::new();
        let user = user();
        UserEnvironmentBootstrapper::new(&runner, root.path(), &user)
            .install_aur_helper(AurHelper::Paru)
            .unwrap();
        assert!(!root.path().join("etc/sudoers.d/99-archstrap-aur-build").exists());
    }

    #[test]
    fn test_build_grant_removed_when_makepkg_fails() {
        let root = target_with_sudoers();
        let runner = ScriptedRunner::new().failing_on("makepkg");
        let user = user();
        let err = UserEnvironmentBootstrapper::new(&runner, root.path(), &user)
            .install_aur_helper(AurHelper::Paru)
            .unwrap_err();
        assert!(matches!(err, ProvisionError::ExternalCommandFailed { .. }));
        assert!(!root.path().join("etc/sudoers.d/99-archstrap-aur-build").exists());
    }

    #[test]
    fn test_build_grant_skipped_in_dry_run() {
        let root = target_with_sudoers();
        let runner = crate::command::DryRunRunner::new();
        let user = user();
        UserEnvironmentBootstrapper::new(&runner, root.path(), &user)
            .install_aur_helper(AurHelper::Paru)
            .unwrap();
        assert!(fs::read_dir(root.path().join("etc/sudoers.d")).unwrap().next().is_none());
        assert_eq!(runner.recorded().len(), 3);
    }

    #[test]
    fn test_no_aur_helper_runs_nothing() {
        let root = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let user = user();
        let installed = UserEnvironmentBootstrapper::new(&runner, root.path(), &user)
            .install_aur_helper(AurHelper::None)
            .unwrap();
        assert!(!installed);
        assert!(runner.recorded().is_empty());
    }
}
