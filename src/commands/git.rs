//! Git clone arguments.

use std::path::PathBuf;

use crate::command::CommandArgs;

/// Type-safe arguments for `git clone`.
///
/// # Field to Flag Mapping
///
/// | Rust Field    | CLI Flag   | Notes |
/// |---------------|------------|-------|
/// | `repo_url`    | positional | Repository URL |
/// | `destination` | positional | Clone target directory |
/// | `branch`      | `--branch` | Optional branch |
/// | `depth`       | `--depth`  | Optional shallow clone depth |
#[derive(Debug, Clone)]
pub struct GitCloneArgs {
    pub repo_url: String,
    pub destination: PathBuf,
    pub branch: Option<String>,
    pub depth: Option<u32>,
}

impl GitCloneArgs {
    pub fn new(repo_url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            repo_url: repo_url.into(),
            destination: destination.into(),
            branch: None,
            depth: None,
        }
    }
}

impl CommandArgs for GitCloneArgs {
    fn program(&self) -> String {
        "git".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["clone".to_string()];
        if let Some(ref branch) = self.branch {
            args.push("--branch".to_string());
            args.push(branch.clone());
        }
        if let Some(depth) = self.depth {
            args.push("--depth".to_string());
            args.push(depth.to_string());
        }
        args.push(self.repo_url.clone());
        args.push(self.destination.display().to_string());
        args
    }
}
