//! Type-safe arguments for account creation and user-space operations.
//!
//! Everything except `useradd`/`chpasswd` is meant to run as the target
//! user (`arch-chroot -u <user>`) so the files it creates are owned by
//! that user. `makepkg` refuses to run as root anyway.

use std::path::PathBuf;

use crate::command::CommandArgs;

// ============================================================================
// Accounts
// ============================================================================

/// `useradd -m -G <groups> -s <shell> <username>`
#[derive(Debug, Clone)]
pub struct UseraddArgs {
    pub username: String,
    pub groups: Vec<String>,
    pub shell: String,
    pub create_home: bool,
}

impl CommandArgs for UseraddArgs {
    fn program(&self) -> String {
        "useradd".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.create_home {
            args.push("-m".to_string());
        }
        if !self.groups.is_empty() {
            args.push("-G".to_string());
            args.push(self.groups.join(","));
        }
        args.push("-s".to_string());
        args.push(self.shell.clone());
        args.push(self.username.clone());
        args
    }
}

/// `chpasswd`, fed `user:password` on stdin.
///
/// The password never appears in argv or in logs.
#[derive(Clone)]
pub struct ChpasswdArgs {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ChpasswdArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChpasswdArgs")
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .finish()
    }
}

impl CommandArgs for ChpasswdArgs {
    fn program(&self) -> String {
        "chpasswd".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![]
    }

    fn stdin_payload(&self) -> Option<String> {
        Some(format!("{}:{}\n", self.username, self.password))
    }
}

// ============================================================================
// Dotfiles and fonts
// ============================================================================

/// `stow -d <dir> -t <target> <package>...`
///
/// Stow refuses to overwrite existing files, so a conflict is a non-zero
/// exit rather than a silent clobber.
#[derive(Debug, Clone)]
pub struct StowArgs {
    pub directory: PathBuf,
    pub target: PathBuf,
    pub packages: Vec<String>,
}

impl CommandArgs for StowArgs {
    fn program(&self) -> String {
        "stow".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![
            "-d".to_string(),
            self.directory.display().to_string(),
            "-t".to_string(),
            self.target.display().to_string(),
        ];
        args.extend(self.packages.iter().cloned());
        args
    }
}

/// `mkdir -p <path>`
#[derive(Debug, Clone)]
pub struct MkdirArgs {
    pub path: PathBuf,
}

impl CommandArgs for MkdirArgs {
    fn program(&self) -> String {
        "mkdir".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-p".to_string(), self.path.display().to_string()]
    }
}

/// `cp -r <source>/. <destination>`: copies the contents of `source`,
/// hidden files included, without needing shell globbing.
#[derive(Debug, Clone)]
pub struct CopyTreeArgs {
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl CommandArgs for CopyTreeArgs {
    fn program(&self) -> String {
        "cp".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-r".to_string(),
            self.source.join(".").display().to_string(),
            self.destination.display().to_string(),
        ]
    }
}

/// `fc-cache -f`
#[derive(Debug, Clone, Default)]
pub struct FcCacheArgs {
    pub verbose: bool,
}

impl CommandArgs for FcCacheArgs {
    fn program(&self) -> String {
        "fc-cache".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        if self.verbose {
            vec!["-fv".to_string()]
        } else {
            vec!["-f".to_string()]
        }
    }
}

// ============================================================================
// AUR helper
// ============================================================================

/// `env -C <build_dir> makepkg -si --noconfirm`
///
/// `env -C` changes directory without a shell.
#[derive(Debug, Clone)]
pub struct MakepkgArgs {
    pub build_dir: PathBuf,
}

impl CommandArgs for MakepkgArgs {
    fn program(&self) -> String {
        "env".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-C".to_string(),
            self.build_dir.display().to_string(),
            "makepkg".to_string(),
            "-si".to_string(),
            "--noconfirm".to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_useradd_args() {
        let args = UseraddArgs {
            username: "geoff".into(),
            groups: vec!["wheel".into(), "video".into()],
            shell: "/bin/bash".into(),
            create_home: true,
        };
        assert_eq!(
            args.to_cli_args(),
            vec!["-m", "-G", "wheel,video", "-s", "/bin/bash", "geoff"]
        );
    }

    #[test]
    fn test_chpasswd_keeps_password_off_argv() {
        let args = ChpasswdArgs {
            username: "geoff".into(),
            password: "s3cret".into(),
        };
        assert!(args.to_cli_args().is_empty());
        assert_eq!(args.stdin_payload().as_deref(), Some("geoff:s3cret\n"));
        assert!(!format!("{:?}", args).contains("s3cret"));
        assert!(!args.to_spec().display().contains("s3cret"));
    }

    #[test]
    fn test_stow_lists_packages() {
        let args = StowArgs {
            directory: PathBuf::from("/home/geoff/dotfiles"),
            target: PathBuf::from("/home/geoff"),
            packages: vec!["nvim".into(), "wezterm".into()],
        };
        assert_eq!(
            args.to_cli_args(),
            vec!["-d", "/home/geoff/dotfiles", "-t", "/home/geoff", "nvim", "wezterm"]
        );
    }

    #[test]
    fn test_copy_tree_copies_contents() {
        let args = CopyTreeArgs {
            source: PathBuf::from("/home/geoff/dotfiles/fonts"),
            destination: PathBuf::from("/home/geoff/.local/share/fonts"),
        };
        assert_eq!(args.to_cli_args()[1], "/home/geoff/dotfiles/fonts/.");
    }

    #[test]
    fn test_makepkg_runs_in_build_dir() {
        let args = MakepkgArgs {
            build_dir: PathBuf::from("/home/geoff/paru"),
        };
        assert_eq!(args.program(), "env");
        assert_eq!(
            args.to_cli_args(),
            vec!["-C", "/home/geoff/paru", "makepkg", "-si", "--noconfirm"]
        );
    }
}
