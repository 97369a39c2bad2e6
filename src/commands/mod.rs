//! Type-safe argument structs for every external program the provisioner runs.
//!
//! Each struct implements `CommandArgs`, mapping its fields to the exact flags
//! the program expects. Callers turn them into a `CommandSpec` with
//! `to_spec()` and pick the execution scope (host, chroot, chroot-as-user).

pub mod boot;
pub mod disk;
pub mod git;
pub mod pacman;
pub mod system;
pub mod user;
