use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// archstrap - provision a themed Arch Linux system from a config file
#[derive(Parser)]
#[command(name = "archstrap")]
#[command(about = "Partition, install and personalise an Arch Linux system in one run")]
#[command(version)]
pub struct Cli {
    /// Dry-run mode: log every command and file change instead of
    /// performing it.
    ///
    /// Config files that already exist are still read so the logged diffs
    /// are realistic; nothing on disk is modified.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Debug-level logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full provisioning pipeline
    Install {
        /// Path to the JSON configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Path to the JSON credentials file
        #[arg(long)]
        credentials: PathBuf,

        /// Skip the confirmation prompt before the disk is wiped
        #[arg(short, long)]
        yes: bool,
    },
    /// Validate a configuration file (and optionally its credentials)
    Validate {
        /// Path to the JSON configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Also check that every secret the config needs is present
        #[arg(long)]
        credentials: Option<PathBuf>,
    },
    /// Individual phases, runnable against an already mounted target
    Tools {
        #[command(subcommand)]
        tool: ToolCommands,
    },
}

#[derive(Subcommand)]
pub enum ToolCommands {
    /// Set KEY=VALUE in a shell-style config file, appending when absent
    SetKey {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(short, long)]
        key: String,
        #[arg(long)]
        value: String,
    },
    /// Enable NVIDIA kernel mode setting in a mounted target
    Gpu {
        /// Where the target is mounted
        #[arg(short, long, default_value = "/mnt")]
        root: PathBuf,
    },
    /// Install a GRUB theme into a mounted target
    Theme {
        /// Where the target is mounted
        #[arg(short, long, default_value = "/mnt")]
        root: PathBuf,
        /// Theme name passed to the theme's install script
        #[arg(short, long)]
        name: Option<String>,
        /// Git URL of the theme repository
        #[arg(long)]
        repo: Option<String>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_install_flags() {
        let cli = Cli::try_parse_from([
            "archstrap",
            "--dry-run",
            "install",
            "--config",
            "c.json",
            "--credentials",
            "s.json",
            "--yes",
        ])
        .unwrap();
        assert!(cli.dry_run);
        match cli.command {
            Commands::Install { config, yes, .. } => {
                assert_eq!(config, PathBuf::from("c.json"));
                assert!(yes);
            }
            _ => panic!("expected install"),
        }
    }

    #[test]
    fn test_theme_tool_defaults_root() {
        let cli = Cli::try_parse_from(["archstrap", "tools", "theme", "--name", "vimix"]).unwrap();
        match cli.command {
            Commands::Tools {
                tool: ToolCommands::Theme { root, name, repo },
            } => {
                assert_eq!(root, PathBuf::from("/mnt"));
                assert_eq!(name.as_deref(), Some("vimix"));
                assert!(repo.is_none());
            }
            _ => panic!("expected tools theme"),
        }
    }

    #[test]
    fn test_install_requires_credentials() {
        assert!(Cli::try_parse_from(["archstrap", "install", "--config", "c.json"]).is_err());
    }
}
