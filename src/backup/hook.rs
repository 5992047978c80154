//! Shell hook commands run around backups and restores.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use std::process::{Command, Stdio};
use tracing::{debug, info};
use validator::ValidationError;

pub static WORLD_PLACEHOLDER: &str = "{world}";

/// A shell command template; `{world}` is replaced by the data set name.
#[derive(Clone, Debug, Display, From, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HookCommand(String);

impl From<&str> for HookCommand {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl HookCommand {
    pub fn render(&self, world: &str) -> String {
        self.0.replace(WORLD_PLACEHOLDER, world)
    }

    /// Runs the rendered command through `sh -c`.
    ///
    /// Output is discarded unless `verbose`; in a dry run the command is only logged.
    pub fn run(&self, world: &str, dry_run: bool, verbose: bool) -> Result<()> {
        let command = self.render(world);
        if dry_run {
            info!("Would run hook command `{}`", command);
            return Ok(());
        }
        debug!("Running hook command `{}`", command);
        let stdio = || if verbose { Stdio::inherit() } else { Stdio::null() };
        let status = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdout(stdio())
            .stderr(stdio())
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::HookFailed {
                command,
                code: status.code(),
            })
        }
    }
}

/// Rejects templates referencing placeholders other than `{world}`.
pub fn validate_hook_template(hook: &HookCommand) -> std::result::Result<(), ValidationError> {
    let mut rest = hook.0.as_str();
    while let Some(start) = rest.find('{') {
        let after = &rest[start..];
        let Some(end) = after.find('}') else {
            return Err(ValidationError::new("InvalidHookCommand")
                .with_message(format!("Unclosed placeholder in {:?}", hook.0).into()));
        };
        let placeholder = &after[..=end];
        if placeholder != WORLD_PLACEHOLDER {
            return Err(ValidationError::new("InvalidHookCommand").with_message(
                format!(
                    "Unknown placeholder {placeholder} in {:?}, only {WORLD_PLACEHOLDER} is supported",
                    hook.0
                )
                .into(),
            ));
        }
        rest = &after[end + 1..];
    }
    Ok(())
}
