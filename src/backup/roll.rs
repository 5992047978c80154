//! Entry point tying config, store, runner and process lock together.

use crate::backup::backup_config::BackupRollConfig;
use crate::backup::lock::{LockGuard, PidLock};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::runner::{BackupRunner, RestoreHooks, RestoreScope};
use crate::backup::select::{RestoreRequest, RestoreSelection};
use crate::backup::store::snapshot::Backup;
use crate::backup::store::{AccessMode, Store};
use crate::backup::validate::validate_world_name;
use bon::Builder;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use getset::Getters;
use std::sync::Arc;
use tracing::info;

/// Fallback formats for restore times, tried after the store's own format.
static WHEN_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

#[derive(Clone, Debug, Builder)]
pub struct RollOptions {
    /// Log instead of creating, renaming, deleting or running anything.
    #[builder(default)]
    pub simulate: bool,
    #[builder(default)]
    pub verbose: bool,
    /// Without the PID file the roll is read-only.
    #[builder(default = true)]
    pub use_pid_file: bool,
    /// Poll for the lock instead of failing when it is held.
    #[builder(default)]
    pub wait_for_lock: bool,
    /// Empty means every configured world.
    #[builder(default)]
    pub selected_worlds: Vec<String>,
}

impl Default for RollOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// What [`BackupRoll::do_activity`] runs, in this order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Activity {
    pub cleanup: bool,
    pub backup: bool,
    pub rotation: bool,
}

impl Default for Activity {
    fn default() -> Self {
        Self {
            cleanup: false,
            backup: true,
            rotation: true,
        }
    }
}

#[derive(Getters)]
pub struct BackupRoll {
    #[getset(get = "pub")]
    config: Arc<BackupRollConfig>,
    #[getset(get = "pub")]
    options: RollOptions,
    #[getset(get = "pub")]
    selected_worlds: Vec<String>,
    #[getset(get = "pub")]
    runner: BackupRunner,
    lock: PidLock,
}

/// Parses a restore time; a bare date means the end of that day.
pub fn parse_when(when: &str, date_format: &str) -> Result<DateTime<Utc>> {
    let when = when.trim();
    std::iter::once(date_format)
        .chain(WHEN_FORMATS)
        .find_map(|format| NaiveDateTime::parse_from_str(when, format).ok())
        .map(Ok)
        .unwrap_or_else(|| {
            NaiveDate::parse_from_str(when, "%Y-%m-%d")
                .map(|date| date.and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)))
        })
        .map(|dt| dt.and_utc())
        .map_err(Error::from)
        .with_msg(format!("Can't parse time {when:?}"))
}

impl BackupRoll {
    pub fn new(config: Arc<BackupRollConfig>, options: RollOptions) -> Result<Self> {
        let selected_worlds: Vec<String> = if options.selected_worlds.is_empty() {
            config.worlds().keys().cloned().collect()
        } else {
            options.selected_worlds.clone()
        };
        if selected_worlds.is_empty() {
            return Err(Error::Config(
                "No world selected and none found in the config. Nothing to do.".into(),
            ));
        }
        for world in &selected_worlds {
            validate_world_name(world).map_err(|e| Error::Config(e.to_string()))?;
        }

        let mode = if !options.use_pid_file {
            AccessMode::ReadOnly
        } else if options.simulate {
            AccessMode::DryRun
        } else {
            AccessMode::ReadWrite
        };
        let store = Store::new(
            config.backup_folder().to_path_buf(),
            config.date_format().clone(),
            mode,
        );
        let verbose = options.verbose || options.simulate;
        Ok(Self {
            runner: BackupRunner::new(config.clone(), store, verbose),
            lock: PidLock::new(config.pid_file().to_path_buf()),
            selected_worlds,
            options,
            config,
        })
    }

    /// Read-only unless the roll uses the PID file.
    pub fn store(&self) -> &Store {
        self.runner.store()
    }

    fn lock(&self) -> Result<LockGuard> {
        if !self.options.use_pid_file {
            return Err(Error::StoreReadonly(
                "Can't lock a readonly backup roll. Enable the PID file for write operations.".into(),
            ));
        }
        if self.options.wait_for_lock {
            self.lock.acquire_blocking(*self.config.lock_poll_interval())
        } else {
            self.lock.acquire()
        }
    }

    /// Runs `f` under the process lock, releasing it on every path.
    fn locked<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let guard = self.lock()?;
        let res = f();
        match (res, guard.release()) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_error)) => Err(e.chain(release_error)),
        }
    }

    pub fn do_activity(&self, activity: Activity) -> Result<()> {
        self.do_activity_at(activity, Utc::now())
    }

    /// Cleanup, backup, rotation over the selected worlds, as `activity` asks.
    pub fn do_activity_at(&self, activity: Activity, now: DateTime<Utc>) -> Result<()> {
        self.locked(|| {
            if activity.cleanup {
                let removed = self.runner.cleanup_worlds(&self.selected_worlds)?;
                info!("Removed {} unfinished backups", removed);
            }
            if activity.backup {
                self.runner.backup_worlds(&self.selected_worlds, now)?;
            }
            if activity.rotation {
                self.runner.rotate_worlds(&self.selected_worlds, now)?;
            }
            Ok(())
        })
    }

    pub fn do_restore(&self, backup: &Backup, scope: RestoreScope, hooks: RestoreHooks) -> Result<()> {
        self.locked(|| self.runner.restore_world(backup, scope, hooks))
    }

    /// Takes the lock, lets `choose` drive a [`RestoreSelection`] and restores
    /// what it returns. `Ok(false)` when nothing was chosen.
    pub fn restore_selected<F>(&self, choose: F) -> Result<bool>
    where
        F: FnOnce(RestoreSelection<'_>) -> Result<Option<RestoreRequest>>,
    {
        self.locked(|| match choose(RestoreSelection::new(&self.runner)?)? {
            Some(request) => {
                self.runner
                    .restore_world(&request.backup, request.scope, request.hooks)?;
                Ok(true)
            }
            None => Ok(false),
        })
    }

    /// The most recent finalized backup of `world` taken at or before `when`.
    pub fn find_backup(&self, world: &str, when: &str) -> Result<Backup> {
        let target = parse_when(when, self.config.date_format())?;
        let backups = self.runner.get_collection(world)?.all_backups()?;
        backups
            .range(..=target)
            .next_back()
            .map(|(_, backup)| backup.clone())
            .ok_or_else(|| {
                Error::BackupNotFound(format!("world {world} has no backup at or before {when}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::backup_config::test_support::test_config;
    use crate::backup::result_error::error::ErrorKind;
    use crate::backup::store::retain_group::RetainGroupName;
    use crate::backup::sync::test_support::sync_log_lines;
    use chrono::TimeZone;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn roll(temp_dir: &TempDir, overrides: serde_json::Value, options: RollOptions) -> BackupRoll {
        BackupRoll::new(Arc::new(test_config(temp_dir.path(), overrides)), options).unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 6, h, m, 0).unwrap()
    }

    #[test]
    fn test_parse_when() {
        let fmt = "%Y-%m-%d_%H-%M-%S";
        assert_eq!(parse_when("2024-03-06_10-20-30", fmt).unwrap(), at(10, 20) + chrono::Duration::seconds(30));
        assert_eq!(parse_when("2024-03-06 10:20", fmt).unwrap(), at(10, 20));
        assert_eq!(
            parse_when(" 2024-03-06 ", fmt).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 6, 23, 59, 59).unwrap()
        );
        assert_eq!(parse_when("yesterday", fmt).unwrap_err().kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_world_selection() {
        let temp_dir = TempDir::new().unwrap();
        let roll_all = roll(&temp_dir, json!({}), RollOptions::default());
        assert_eq!(roll_all.selected_worlds(), &vec!["alpha".to_string(), "beta".to_string()]);

        let roll_one = roll(
            &temp_dir,
            json!({}),
            RollOptions::builder().selected_worlds(vec!["beta".into()]).build(),
        );
        assert_eq!(roll_one.selected_worlds(), &vec!["beta".to_string()]);

        let config = Arc::new(test_config(temp_dir.path(), json!({"worlds": {}})));
        let err = BackupRoll::new(config, RollOptions::default()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_selected_world_names_are_validated() {
        let temp_dir = TempDir::new().unwrap();
        let config = Arc::new(test_config(temp_dir.path(), json!({})));
        for world in ["../escape", "alpha/../../escape", "latest"] {
            let options = RollOptions::builder()
                .selected_worlds(vec![world.to_string()])
                .build();
            let err = BackupRoll::new(config.clone(), options).err().unwrap();
            assert_eq!(err.kind(), ErrorKind::Config, "{world}");
        }

        let all = roll(&temp_dir, json!({}), RollOptions::default());
        let err = all.runner().get_collection("../escape").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        let cleanup = Activity {
            cleanup: true,
            backup: false,
            rotation: false,
        };
        all.do_activity_at(cleanup, at(9, 0)).unwrap();
        assert!(!temp_dir.path().join("escape").exists());
    }

    #[test]
    fn test_activity_backs_up_rotates_and_unlocks() {
        let temp_dir = TempDir::new().unwrap();
        let roll = roll(&temp_dir, json!({}), RollOptions::default());
        roll.do_activity_at(Activity::default(), at(9, 0)).unwrap();
        roll.do_activity_at(Activity::default(), at(13, 0)).unwrap();

        let alpha = roll.runner().get_collection("alpha").unwrap();
        let recent = alpha.get_retain_group(RetainGroupName::Recent).unwrap();
        assert_eq!(recent.list_backups().unwrap().len(), 2);
        let daily = alpha.get_retain_group(RetainGroupName::Daily).unwrap();
        assert_eq!(daily.list_backups().unwrap().len(), 1);
        assert_eq!(sync_log_lines(temp_dir.path()).len(), 4);
        assert!(!roll.config().pid_file().exists());
    }

    #[test]
    fn test_held_lock_blocks_activity() {
        let temp_dir = TempDir::new().unwrap();
        let roll = roll(&temp_dir, json!({}), RollOptions::default());
        fs::write(roll.config().pid_file(), "1").unwrap();

        let err = roll.do_activity_at(Activity::default(), at(9, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LockHeld);
        assert!(sync_log_lines(temp_dir.path()).is_empty());
        assert_eq!(fs::read_to_string(roll.config().pid_file()).unwrap(), "1");
    }

    #[test]
    fn test_failure_still_releases_lock() {
        let temp_dir = TempDir::new().unwrap();
        let roll = roll(&temp_dir, json!({"sync": {"program": "false"}}), RollOptions::default());
        let err = roll.do_activity_at(Activity::default(), at(9, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SyncFailed);
        assert!(!roll.config().pid_file().exists());
    }

    #[test]
    fn test_readonly_roll_refuses_writes() {
        let temp_dir = TempDir::new().unwrap();
        let roll = roll(
            &temp_dir,
            json!({}),
            RollOptions::builder().use_pid_file(false).build(),
        );
        assert_eq!(roll.store().mode(), AccessMode::ReadOnly);
        let err = roll.do_activity_at(Activity::default(), at(9, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreReadonly);
        assert!(!roll.config().pid_file().exists());
        assert!(!temp_dir.path().join("backup").exists());
    }

    #[test]
    fn test_simulate_takes_lock_but_changes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let roll = roll(
            &temp_dir,
            json!({}),
            RollOptions::builder().simulate(true).build(),
        );
        let activity = Activity {
            cleanup: true,
            backup: true,
            rotation: true,
        };
        roll.do_activity_at(activity, at(15, 0)).unwrap();
        assert!(!temp_dir.path().join("backup").exists());
        assert!(sync_log_lines(temp_dir.path()).is_empty());
        assert!(!roll.config().pid_file().exists());

        fs::write(roll.config().pid_file(), "1").unwrap();
        assert_eq!(
            roll.do_activity_at(activity, at(15, 0)).unwrap_err().kind(),
            ErrorKind::LockHeld
        );
    }

    #[test]
    fn test_find_backup_and_restore() {
        let temp_dir = TempDir::new().unwrap();
        let roll = roll(&temp_dir, json!({}), RollOptions::default());
        let only_backup = Activity {
            cleanup: false,
            backup: true,
            rotation: false,
        };
        roll.do_activity_at(only_backup, at(9, 0)).unwrap();
        let live = temp_dir.path().join("worlds/alpha/level.dat");
        fs::write(&live, "second").unwrap();
        roll.do_activity_at(only_backup, at(11, 0)).unwrap();

        let first = roll.find_backup("alpha", "2024-03-06 10:30").unwrap();
        assert_eq!(first.name().as_ref(), "alpha_2024-03-06T09:00:00");
        let last = roll.find_backup("alpha", "2024-03-06").unwrap();
        assert_eq!(last.name().as_ref(), "alpha_2024-03-06T11:00:00");
        let err = roll.find_backup("alpha", "2024-03-05").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackupNotFound);

        roll.do_restore(&first, RestoreScope::WorldOnly, RestoreHooks::default())
            .unwrap();
        assert_eq!(fs::read_to_string(&live).unwrap(), "alpha");
        assert!(!roll.config().pid_file().exists());

        let readonly = BackupRoll::new(
            roll.config().clone(),
            RollOptions::builder().use_pid_file(false).build(),
        )
        .unwrap();
        let found = readonly.find_backup("alpha", "2024-03-06 09:00").unwrap();
        assert_eq!(found.name(), first.name());
        assert_eq!(
            readonly.find_backup("gamma", "2024-03-06").unwrap_err().kind(),
            ErrorKind::CollectionNotFound
        );
    }

    #[test]
    fn test_restore_selected_holds_lock_while_choosing() {
        let temp_dir = TempDir::new().unwrap();
        let roll = roll(&temp_dir, json!({}), RollOptions::default());
        roll.do_activity_at(Activity::default(), at(9, 0)).unwrap();
        let live = temp_dir.path().join("worlds/alpha/level.dat");
        fs::write(&live, "changed").unwrap();

        let restored = roll
            .restore_selected(|mut selection| {
                assert!(roll.config().pid_file().exists());
                for index in [0, 0, 0, 0, 0, 0, 0] {
                    selection.select(index)?;
                }
                Ok(selection.outcome())
            })
            .unwrap();
        assert!(restored);
        assert_eq!(fs::read_to_string(&live).unwrap(), "alpha");
        assert!(!roll.config().pid_file().exists());

        let aborted = roll
            .restore_selected(|mut selection| {
                selection.back();
                Ok(selection.outcome())
            })
            .unwrap();
        assert!(!aborted);
    }

    #[test]
    fn test_restore_selected_opens_no_menu_when_locked() {
        let temp_dir = TempDir::new().unwrap();
        let roll = roll(&temp_dir, json!({}), RollOptions::default());
        fs::write(roll.config().pid_file(), "1").unwrap();
        let mut opened = false;
        let err = roll
            .restore_selected(|_| {
                opened = true;
                Ok(None)
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LockHeld);
        assert!(!opened);
        assert!(!temp_dir.path().join("backup").exists());
    }

    #[test]
    fn test_wait_for_lock_polls_until_free() {
        let temp_dir = TempDir::new().unwrap();
        let roll = roll(
            &temp_dir,
            json!({}),
            RollOptions::builder().wait_for_lock(true).build(),
        );
        let guard = PidLock::new(roll.config().pid_file().to_path_buf())
            .acquire()
            .unwrap();
        let releaser = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(100));
            guard.release().unwrap();
        });
        roll.do_activity_at(Activity::default(), at(9, 0)).unwrap();
        releaser.join().unwrap();
    }
}
