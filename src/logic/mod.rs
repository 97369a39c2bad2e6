//! Phase logic: turns configuration choices into commands and file patches
//! against the mounted target.
//!
//! # Modules
//!
//! - `theme` - locating an installed bootloader theme descriptor
//! - `bootloader` - GRUB install, kernel parameters and theming
//! - `gpu` - driver packages and NVIDIA kernel mode setting
//! - `system` - hostname, networking, profile packages, user account
//! - `user_env` - dotfiles, fonts and AUR helper as the target user

pub mod bootloader;
pub mod gpu;
pub mod system;
pub mod theme;
pub mod user_env;
