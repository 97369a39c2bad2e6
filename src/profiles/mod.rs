//! Installation profiles and the package sets each phase installs.
//!
//! Package lists live in Rust so a typo shows up in a unit test rather than
//! as a failed `pacman` call halfway through a run.
//!
//! | Profile  | Display manager | Extra services |
//! |----------|-----------------|----------------|
//! | Minimal  | none            | none           |
//! | Server   | none            | sshd           |
//! | Gnome    | gdm             | none           |
//! | Kde      | sddm            | none           |
//! | Hyprland | sddm            | none           |

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Always installed by `pacstrap`, in addition to the chosen kernels.
///
/// `sudo` is here rather than in a profile because user creation writes a
/// sudoers drop-in regardless of profile.
pub const BASE_PACKAGES: &[&str] = &["base", "linux-firmware", "sudo"];

/// Installed by the bootloader phase. `git` is needed to fetch the theme.
pub const BOOTLOADER_PACKAGES: &[&str] = &["grub", "efibootmgr", "os-prober", "git"];

/// Tooling the dotfiles bootstrap relies on inside the target.
pub const USER_ENV_PACKAGES: &[&str] = &["git", "stow", "fontconfig", "base-devel"];

/// What `makepkg` needs to fetch and build an AUR helper.
pub const AUR_BUILD_PACKAGES: &[&str] = &["base-devel", "git"];

/// What kind of system the profile phase turns the base install into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(EnumIter, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Profile {
    /// Base system only; nothing installed by the profile phase.
    #[default]
    Minimal,
    /// Headless machine reachable over SSH.
    Server,
    Gnome,
    Kde,
    /// Hyprland Wayland compositor with a small set of companions.
    Hyprland,
}

impl Profile {
    pub fn packages(&self) -> &'static [&'static str] {
        match self {
            Profile::Minimal => &[],
            Profile::Server => &["openssh", "vim", "htop"],
            Profile::Gnome => &["gnome", "gnome-tweaks", "gdm", "pipewire", "pipewire-pulse"],
            Profile::Kde => &[
                "plasma-meta",
                "konsole",
                "dolphin",
                "sddm",
                "pipewire",
                "pipewire-pulse",
            ],
            Profile::Hyprland => &[
                "hyprland",
                "xdg-desktop-portal-hyprland",
                "waybar",
                "wofi",
                "mako",
                "wl-clipboard",
                "sddm",
                "pipewire",
                "pipewire-pulse",
                "polkit-kde-agent",
            ],
        }
    }

    /// Display manager unit to enable, if the profile has a GUI
    pub fn display_manager(&self) -> Option<&'static str> {
        match self {
            Profile::Minimal | Profile::Server => None,
            Profile::Gnome => Some("gdm"),
            Profile::Kde | Profile::Hyprland => Some("sddm"),
        }
    }

    /// Every unit the profile phase enables (display manager included)
    pub fn services(&self) -> Vec<&'static str> {
        let mut services: Vec<&'static str> = match self {
            Profile::Server => vec!["sshd"],
            _ => Vec::new(),
        };
        services.extend(self.display_manager());
        services
    }

    pub fn description(&self) -> &'static str {
        match self {
            Profile::Minimal => "Base system without additional packages",
            Profile::Server => "Headless system with SSH",
            Profile::Gnome => "GNOME desktop environment",
            Profile::Kde => "KDE Plasma desktop",
            Profile::Hyprland => "Hyprland Wayland compositor (tiling)",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_only_minimal_is_empty() {
        for profile in Profile::iter() {
            assert_eq!(
                profile.packages().is_empty(),
                profile == Profile::Minimal,
                "{:?}",
                profile
            );
        }
    }

    #[test]
    fn test_display_manager_is_installed_by_profile() {
        for profile in Profile::iter() {
            if let Some(dm) = profile.display_manager() {
                assert!(profile.packages().contains(&dm), "{:?} lacks {}", profile, dm);
            }
        }
    }

    #[test]
    fn test_services() {
        assert!(Profile::Minimal.services().is_empty());
        assert_eq!(Profile::Server.services(), vec!["sshd"]);
        assert_eq!(Profile::Gnome.services(), vec!["gdm"]);
    }

    #[test]
    fn test_profile_parsing() {
        assert_eq!("hyprland".parse::<Profile>().unwrap(), Profile::Hyprland);
        let parsed: Profile = serde_json::from_str("\"kde\"").unwrap();
        assert_eq!(parsed, Profile::Kde);
    }

    #[test]
    fn test_bootloader_packages_include_git() {
        assert!(BOOTLOADER_PACKAGES.contains(&"git"));
        assert!(USER_ENV_PACKAGES.contains(&"stow"));
    }

    #[test]
    fn test_aur_build_packages_leave_out_dotfiles_tooling() {
        assert!(AUR_BUILD_PACKAGES.contains(&"base-devel"));
        assert!(AUR_BUILD_PACKAGES.contains(&"git"));
        assert!(!AUR_BUILD_PACKAGES.contains(&"stow"));
        assert!(!AUR_BUILD_PACKAGES.contains(&"fontconfig"));
    }
}
