//! Populates backups from live data with an rsync-compatible program, and
//! restores them the other way round.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::store::retain_group::RetainGroup;
use crate::backup::store::snapshot::Backup;
use bon::Builder;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{debug, info};
use validator::Validate;

fn default_program() -> String {
    "rsync".to_string()
}

#[derive(Clone, Debug, PartialEq, Eq, Builder, Validate, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    #[serde(default = "default_program")]
    #[builder(default = default_program(), into)]
    #[validate(length(min = 1))]
    pub program: String,
    /// Passed before the standard flags.
    #[serde(default)]
    #[builder(default)]
    pub extra_flags: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

pub struct SyncCommand {
    config: Arc<SyncConfig>,
    source: PathBuf,
    retain_group: RetainGroup,
    verbose: bool,
}

fn with_trailing_slash(path: &Path) -> OsString {
    let mut s = path.as_os_str().to_os_string();
    if !s.as_encoded_bytes().ends_with(b"/") {
        s.push("/");
    }
    s
}

impl SyncCommand {
    /// `source` is the live directory; backups land in `retain_group`.
    pub fn new<P: Into<PathBuf>>(
        config: Arc<SyncConfig>,
        source: P,
        retain_group: RetainGroup,
        verbose: bool,
    ) -> Self {
        Self {
            config,
            source: source.into(),
            retain_group,
            verbose,
        }
    }

    fn base_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.config.extra_flags.iter().map(OsString::from).collect();
        args.push("-a".into());
        args.push("--delete".into());
        if self.verbose {
            args.push("-v".into());
        }
        args
    }

    fn run_program(&self, args: Vec<OsString>) -> Result<()> {
        let command = std::iter::once(OsStr::new(&self.config.program))
            .chain(args.iter().map(OsString::as_os_str))
            .map(OsStr::to_string_lossy)
            .join(" ");
        if self.retain_group.mode().is_dry_run() {
            info!("Would run `{}`", command);
            return Ok(());
        }
        debug!("Running `{}`", command);
        let stdio = || if self.verbose { Stdio::inherit() } else { Stdio::null() };
        let status = Command::new(&self.config.program)
            .args(&args)
            .stdout(stdio())
            .stderr(stdio())
            .status()
            .map_err(Error::from)
            .with_msg(format!("Starting `{command}` failed"))?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::SyncFailed {
                command,
                code: status.code(),
            })
        }
    }

    /// Backs `source` up into a new backup stamped `now`.
    pub fn run_blocking(&self, now: DateTime<Utc>) -> Result<Backup> {
        let backup = self.retain_group.new_empty_backup(now)?;
        self.sync_into(backup)
    }

    /// Like [`Self::run_blocking`] with an explicit timestamp text.
    pub fn run_blocking_named(&self, timestamp: &str) -> Result<Backup> {
        let backup = self.retain_group.new_backup_named(timestamp)?;
        self.sync_into(backup)
    }

    /// Syncs into the in-progress `backup`, hard linking unchanged files
    /// against the group's latest backup. On failure the in-progress
    /// directory stays behind for cleanup.
    fn sync_into(&self, mut backup: Backup) -> Result<Backup> {
        let mut args = self.base_args();
        if let Some(latest) = self.retain_group.get_latest_backup()? {
            let mut link_dest = OsString::from("--link-dest=");
            link_dest.push(latest.directory());
            args.push(link_dest);
        }
        args.push(self.source.clone().into());
        args.push(backup.directory().clone().into());

        self.run_program(args)?;
        backup.finalize()?;
        self.retain_group.update_latest_link(&backup)?;
        self.retain_group.collection().update_latest_link(&backup)?;
        info!("Backup {} complete", backup);
        Ok(backup)
    }

    /// Syncs `<backup>/<collection>/<subdir>/` onto `<source>/<subdir>/`.
    pub fn run_restore(&self, backup: &Backup, subdir: &Path) -> Result<()> {
        let from = backup
            .directory()
            .join(backup.collection_name().as_ref())
            .join(subdir);
        let to = self.source.join(subdir);
        let mut args = self.base_args();
        args.push(with_trailing_slash(&from));
        args.push(with_trailing_slash(&to));
        self.run_program(args)
            .with_msg(format!("Restoring {backup} to {to:?} failed"))
    }
}
