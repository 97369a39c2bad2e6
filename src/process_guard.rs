//! Child process lifecycle for provisioning commands
//!
//! Provisioning runs long, destructive children (`sgdisk --zap-all`,
//! `cryptsetup luksFormat`, `pacstrap`). If the provisioner itself is killed
//! those children must not keep mutating the target on their own, so every
//! child is:
//!
//! - started as the leader of a fresh process group,
//! - armed with `PR_SET_PDEATHSIG` so the kernel signals it when we die,
//! - tracked in a registry that the signal handler drains on SIGINT/SIGTERM/SIGHUP.
//!
//! Draining sends SIGTERM to each group, waits out a grace period and then
//! SIGKILLs whatever is left.

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::BTreeSet;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

static REGISTRY: OnceLock<Mutex<ChildRegistry>> = OnceLock::new();

/// Set of process-group leaders spawned by the runner that have not exited yet
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: BTreeSet<u32>,
    draining: bool,
}

impl ChildRegistry {
    /// The process-wide registry used by the command runner and signal handler
    pub fn global() -> &'static Mutex<ChildRegistry> {
        REGISTRY.get_or_init(|| Mutex::new(ChildRegistry::default()))
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        debug!("tracking child pid {}", pid);
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        debug!("child pid {} finished", pid);
    }

    pub fn len(&self) -> usize {
        self.pids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }

    /// Terminate every tracked process group.
    ///
    /// Only the first call does anything; later calls return immediately.
    pub fn drain(&mut self, grace: Duration) {
        if self.draining {
            return;
        }
        self.draining = true;

        if self.pids.is_empty() {
            return;
        }

        info!("Stopping {} running child command(s)", self.pids.len());
        let pids: Vec<u32> = self.pids.iter().copied().collect();

        for &pid in &pids {
            if let Err(e) = signal_group(pid, Signal::SIGTERM) {
                warn!("SIGTERM to group {} failed ({}), signalling pid directly", pid, e);
                let _ = signal_pid(pid, Signal::SIGTERM);
            }
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if pids.iter().all(|&pid| !is_alive(pid)) {
                self.pids.clear();
                info!("All child commands exited");
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for &pid in pids.iter().filter(|&&pid| is_alive(pid)) {
            warn!("Child group {} ignored SIGTERM, sending SIGKILL", pid);
            if signal_group(pid, Signal::SIGKILL).is_err() {
                let _ = signal_pid(pid, Signal::SIGKILL);
            }
        }
        self.pids.clear();
    }
}

fn signal_pid(pid: u32, sig: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), sig)
}

/// A negative pid addresses the whole process group
fn signal_group(pgid: u32, sig: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), sig)
}

/// Zombies count as dead: they hold a pid but run nothing
fn is_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => {
            // The state field follows the parenthesised command name
            let state = stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next());
            !matches!(state, Some("Z") | Some("X"))
        }
        Err(_) => true,
    }
}

/// Install SIGINT/SIGTERM/SIGHUP handlers that drain the registry and exit.
///
/// Call once at startup, before the first command is spawned.
pub fn init_signal_handlers() -> std::io::Result<()> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            warn!("Received signal {}, stopping child commands", sig);
            if let Ok(mut registry) = ChildRegistry::global().lock() {
                registry.drain(Duration::from_secs(3));
            }
            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Extension trait putting a `Command` into its own process group
pub trait CommandProcessGroup {
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;

        self.process_group(0);
        // SAFETY: the closure only calls prctl, which is async-signal-safe
        unsafe {
            self.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}
