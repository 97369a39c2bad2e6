//! Service management inside the target.

use crate::command::CommandArgs;

/// `systemctl enable <unit>...`, run inside the target via `arch-chroot`.
#[derive(Debug, Clone)]
pub struct SystemctlEnableArgs {
    pub units: Vec<String>,
}

impl SystemctlEnableArgs {
    pub fn new<I, S>(units: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            units: units.into_iter().map(Into::into).collect(),
        }
    }
}

impl CommandArgs for SystemctlEnableArgs {
    fn program(&self) -> String {
        "systemctl".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["enable".to_string()];
        args.extend(self.units.iter().cloned());
        args
    }
}
