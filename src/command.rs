//! Typed external command execution.
//!
//! Every external program the provisioner touches goes through a
//! `CommandRunner`. Callers describe the invocation as a `CommandSpec`
//! (program plus an argument *list*, never a shell string), usually built by
//! one of the typed argument structs in `crate::commands`.
//!
//! Commands that must run inside the installed system are wrapped in
//! `arch-chroot <root>`; commands that must run as the target user use
//! `arch-chroot -u <user> <root>` so files end up owned by that user.
//!
//! # Failure contract
//!
//! A non-zero exit, death by signal, or failure to spawn is returned as
//! `ProvisionError::ExternalCommandFailed`. Callers never inspect exit codes
//! themselves.

use crate::error::{ProvisionError, Result};
use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use std::cell::RefCell;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Where a command executes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecScope {
    /// Directly on the live/host system
    Host,
    /// Inside the target root via `arch-chroot`, as root
    Chroot { root: PathBuf },
    /// Inside the target root via `arch-chroot -u <user>`
    ChrootAsUser { root: PathBuf, user: String },
}

/// A fully described external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    stdin: Option<String>,
    scope: ExecScope,
    capture_stdout: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
            scope: ExecScope::Host,
            capture_stdout: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, env: Vec<(String, String)>) -> Self {
        self.env.extend(env);
        self
    }

    /// Feed `payload` to the command's stdin. The payload is never logged.
    pub fn stdin(mut self, payload: impl Into<String>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    /// Capture stdout instead of letting it stream to the terminal
    pub fn capture_stdout(mut self) -> Self {
        self.capture_stdout = true;
        self
    }

    /// Run inside the target root as root
    pub fn in_chroot(mut self, root: &Path) -> Self {
        self.scope = ExecScope::Chroot {
            root: root.to_path_buf(),
        };
        self
    }

    /// Run inside the target root as an unprivileged user
    pub fn in_chroot_as(mut self, root: &Path, user: &str) -> Self {
        self.scope = ExecScope::ChrootAsUser {
            root: root.to_path_buf(),
            user: user.to_string(),
        };
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn scope(&self) -> &ExecScope {
        &self.scope
    }

    pub fn env_vars(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn has_stdin(&self) -> bool {
        self.stdin.is_some()
    }

    /// The complete argv as executed, including any `arch-chroot` prefix
    pub fn argv(&self) -> Vec<String> {
        let mut argv = match &self.scope {
            ExecScope::Host => Vec::new(),
            ExecScope::Chroot { root } => {
                vec!["arch-chroot".to_string(), root.display().to_string()]
            }
            ExecScope::ChrootAsUser { root, user } => vec![
                "arch-chroot".to_string(),
                "-u".to_string(),
                user.clone(),
                root.display().to_string(),
            ],
        };
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Human-readable command line for logs and error messages
    pub fn display(&self) -> String {
        let mut line = self
            .argv()
            .iter()
            .map(|a| quote_for_display(a))
            .collect::<Vec<_>>()
            .join(" ");
        if self.stdin.is_some() {
            line.push_str(" <<< [redacted]");
        }
        line
    }

    /// True if any argv element contains `needle`
    pub fn mentions(&self, needle: &str) -> bool {
        self.argv().iter().any(|a| a.contains(needle))
    }
}

fn quote_for_display(arg: &str) -> String {
    if arg.is_empty() || arg.contains(char::is_whitespace) || arg.contains('"') {
        format!("'{}'", arg.replace('\'', r"'\''"))
    } else {
        arg.to_string()
    }
}

/// Result of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Captured stdout (empty unless capture was requested)
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Exit code (None if terminated by signal)
    pub exit_code: Option<i32>,
}

/// Trait implemented by argument structs that describe one external command.
///
/// The struct definition is the contract: field names map to exact flags in
/// `to_cli_args`, so a renamed flag is a compile error rather than a runtime
/// surprise on a half-provisioned disk.
pub trait CommandArgs {
    /// Program to execute (name on `PATH` or absolute path)
    fn program(&self) -> String;

    /// Arguments exactly as the program expects them
    fn to_cli_args(&self) -> Vec<String>;

    /// Extra environment variables
    fn get_env_vars(&self) -> Vec<(String, String)> {
        vec![]
    }

    /// Secret payload written to stdin
    fn stdin_payload(&self) -> Option<String> {
        None
    }

    /// Whether the command can destroy data on the target
    fn is_destructive(&self) -> bool {
        false
    }

    fn to_spec(&self) -> CommandSpec {
        let mut spec = CommandSpec::new(self.program())
            .args(self.to_cli_args())
            .envs(self.get_env_vars());
        if let Some(payload) = self.stdin_payload() {
            spec = spec.stdin(payload);
        }
        spec
    }
}

/// Executes command specs.
///
/// Implementations must block until the command finishes and must return
/// `ExternalCommandFailed` for any unsuccessful exit.
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Whether commands actually mutate the system
    fn is_dry_run(&self) -> bool {
        false
    }
}

/// Runs commands on the real system
#[derive(Debug, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let argv = spec.argv();
        let shown = spec.display();
        info!("Running: {}", shown);

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .stdout(if spec.capture_stdout {
                Stdio::piped()
            } else {
                Stdio::inherit()
            })
            .stderr(Stdio::piped())
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .in_new_process_group();
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| ProvisionError::command_failed(&shown, None, e.to_string()))?;
        let pid = child.id();
        lock_registry().register(pid);

        // Dropping the pipe after the write closes the child's stdin
        let stdin_error = match (spec.stdin.as_ref(), child.stdin.take()) {
            (Some(payload), Some(mut pipe)) => pipe.write_all(payload.as_bytes()).err(),
            _ => None,
        };

        let waited = child.wait_with_output();
        lock_registry().unregister(pid);
        let output =
            waited.map_err(|e| ProvisionError::command_failed(&shown, None, e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code();

        if !output.status.success() {
            return Err(ProvisionError::command_failed(shown, exit_code, stderr));
        }
        if let Some(e) = stdin_error {
            // A secret the program never read means the step did not happen
            return Err(ProvisionError::command_failed(
                shown,
                exit_code,
                format!("writing stdin failed: {e}"),
            ));
        }

        debug!("{} exited successfully", spec.program);
        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}

fn lock_registry() -> std::sync::MutexGuard<'static, ChildRegistry> {
    ChildRegistry::global()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Logs and records commands without executing anything.
///
/// Backs the `--dry-run` flag, and doubles as a recorder in tests.
#[derive(Debug, Default)]
pub struct DryRunRunner {
    recorded: RefCell<Vec<CommandSpec>>,
}

impl DryRunRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every spec passed to `run`, in order
    pub fn recorded(&self) -> Vec<CommandSpec> {
        self.recorded.borrow().clone()
    }
}

impl CommandRunner for DryRunRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        info!("[dry-run] {}", spec.display());
        self.recorded.borrow_mut().push(spec.clone());
        Ok(CommandOutput {
            exit_code: Some(0),
            ..CommandOutput::default()
        })
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_argv_is_program_plus_args() {
        let spec = CommandSpec::new("grub-mkconfig").args(["-o", "/boot/grub/grub.cfg"]);
        assert_eq!(spec.argv(), vec!["grub-mkconfig", "-o", "/boot/grub/grub.cfg"]);
    }

    #[test]
    fn test_chroot_argv_prefixes_arch_chroot() {
        let spec = CommandSpec::new("mkinitcpio")
            .arg("-P")
            .in_chroot(Path::new("/mnt"));
        assert_eq!(spec.argv(), vec!["arch-chroot", "/mnt", "mkinitcpio", "-P"]);
    }

    #[test]
    fn test_user_scope_drops_privileges() {
        let spec = CommandSpec::new("git")
            .args(["clone", "https://example.com/dots.git", "/home/geoff/dotfiles"])
            .in_chroot_as(Path::new("/mnt"), "geoff");
        assert_eq!(
            &spec.argv()[..4],
            &["arch-chroot", "-u", "geoff", "/mnt"]
        );
        assert_eq!(spec.program(), "git");
    }

    #[test]
    fn test_display_redacts_stdin_and_quotes_spaces() {
        let spec = CommandSpec::new("chpasswd").stdin("geoff:hunter2");
        let shown = spec.display();
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("[redacted]"));

        let spec = CommandSpec::new("echo").arg("two words");
        assert_eq!(spec.display(), "echo 'two words'");
    }

    #[test]
    fn test_dry_run_records_without_executing() {
        let runner = DryRunRunner::new();
        runner
            .run(&CommandSpec::new("definitely-not-a-real-binary"))
            .expect("dry run never fails");
        assert_eq!(runner.recorded().len(), 1);
        assert!(runner.is_dry_run());
    }

    #[test]
    fn test_system_runner_reports_exit_code() {
        let runner = SystemRunner::new();
        let err = runner
            .run(&CommandSpec::new("sh").args(["-c", "echo boom >&2; exit 3"]))
            .unwrap_err();
        match err {
            ProvisionError::ExternalCommandFailed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert!(stderr.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_system_runner_captures_stdout_and_feeds_stdin() {
        let runner = SystemRunner::new();
        let output = runner
            .run(&CommandSpec::new("cat").stdin("hello").capture_stdout())
            .expect("cat succeeds");
        assert_eq!(output.stdout, "hello");
        assert_eq!(output.exit_code, Some(0));
    }

    #[test]
    fn test_unread_stdin_is_command_failure() {
        let runner = SystemRunner::new();
        let err = runner
            .run(&CommandSpec::new("true").stdin("x".repeat(1 << 20)))
            .unwrap_err();
        match err {
            ProvisionError::ExternalCommandFailed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, Some(0));
                assert!(stderr.contains("writing stdin failed"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_spawn_failure_is_command_failure() {
        let runner = SystemRunner::new();
        let err = runner
            .run(&CommandSpec::new("/nonexistent/archstrap-test-binary"))
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::ExternalCommandFailed { exit_code: None, .. }
        ));
    }
}
