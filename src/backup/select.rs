//! Navigation model behind the interactive restore menus.
//!
//! Each [`Screen`] offers a title and a list of items. Picking an item moves
//! forward, [`RestoreSelection::back`] moves one screen back. Rendering and
//! input are left to the caller.

use crate::backup::hook::HookCommand;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::runner::{BackupRunner, RestoreHooks, RestoreScope};
use crate::backup::store::collection::Collection;
use crate::backup::store::retain_group::RetainGroup;
use crate::backup::store::snapshot::Backup;
use derive_more::Display;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Screen {
    Worlds,
    RetainGroups,
    Backups,
    PreRestoreHook,
    PostRestoreHook,
    Scope,
    Confirm,
    Done,
    Aborted,
}

/// A confirmed restore.
#[derive(Clone, Debug)]
pub struct RestoreRequest {
    pub backup: Backup,
    pub scope: RestoreScope,
    pub hooks: RestoreHooks,
}

static SCOPES: [RestoreScope; 2] = [RestoreScope::WorldOnly, RestoreScope::Everything];

pub struct RestoreSelection<'a> {
    runner: &'a BackupRunner,
    screen: Screen,
    worlds: Vec<Collection>,
    groups: Vec<RetainGroup>,
    backups: Vec<Backup>,
    world: Option<Collection>,
    backup: Option<Backup>,
    hooks: RestoreHooks,
    scope: RestoreScope,
}

fn hook_items(command: Option<&HookCommand>, world: &str, what: &str) -> Vec<String> {
    match command {
        Some(command) => vec![
            format!("Run `{}`", command.render(world)),
            format!("Don't run the {what} command"),
        ],
        None => vec![format!("No {what} command configured")],
    }
}

impl<'a> RestoreSelection<'a> {
    /// Starts on the world list, holding every collection in the store.
    pub fn new(runner: &'a BackupRunner) -> Result<Self> {
        let worlds = runner
            .store()
            .list_collections()?
            .iter()
            .map(|collection| runner.get_collection(collection.name()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            runner,
            screen: Screen::Worlds,
            worlds,
            groups: Vec::new(),
            backups: Vec::new(),
            world: None,
            backup: None,
            hooks: RestoreHooks::default(),
            scope: RestoreScope::default(),
        })
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.screen, Screen::Done | Screen::Aborted)
    }

    fn world_name(&self) -> &str {
        self.world.as_ref().map(|w| &**w.name()).unwrap_or_default()
    }

    fn pre_restore_command(&self) -> Option<&HookCommand> {
        self.runner.config().pre_restore_command().as_ref()
    }

    fn post_restore_command(&self) -> Option<&HookCommand> {
        self.runner.config().post_restore_command().as_ref()
    }

    pub fn title(&self) -> String {
        match self.screen {
            Screen::Worlds => "Select a world to restore backups from".to_string(),
            Screen::RetainGroups => format!("Select a backup group of world '{}'", self.world_name()),
            Screen::Backups => "Select a backup".to_string(),
            Screen::PreRestoreHook => "Do you want to run the pre-restore command?".to_string(),
            Screen::PostRestoreHook => {
                "Do you want to run the post-restore command after restore?".to_string()
            }
            Screen::Scope => "What do you want to restore?".to_string(),
            Screen::Confirm => {
                let backup = self
                    .backup
                    .as_ref()
                    .map(|b| b.name().to_string())
                    .unwrap_or_default();
                format!(
                    "Please confirm your selection:\n  Restore {}\n  to {:?}.\n  Run pre-restore hook: {}.\n  Run post-restore hook: {}.\n  Only restore world subdirectory: {}",
                    backup,
                    self.runner.config().world_dir(self.world_name()),
                    self.hooks.run_pre,
                    self.hooks.run_post,
                    self.scope == RestoreScope::WorldOnly,
                )
            }
            Screen::Done => "Restore selected".to_string(),
            Screen::Aborted => "Restore aborted".to_string(),
        }
    }

    /// Menu entries of the current screen; empty once finished.
    pub fn items(&self) -> Vec<String> {
        match self.screen {
            Screen::Worlds => self.worlds.iter().map(|w| w.name().to_string()).collect(),
            Screen::RetainGroups => self.groups.iter().map(|g| g.name().to_string()).collect(),
            Screen::Backups => self.backups.iter().map(|b| b.name().to_string()).collect(),
            Screen::PreRestoreHook => {
                hook_items(self.pre_restore_command(), self.world_name(), "pre-restore")
            }
            Screen::PostRestoreHook => {
                hook_items(self.post_restore_command(), self.world_name(), "post-restore")
            }
            Screen::Scope => vec![
                "Only restore the world subdirectory".to_string(),
                "Restore everything".to_string(),
            ],
            Screen::Confirm => vec![
                "Confirm. Run restore now!".to_string(),
                "No! Abort!".to_string(),
            ],
            Screen::Done | Screen::Aborted => Vec::new(),
        }
    }

    /// Picks item `index` of the current screen and moves forward.
    ///
    /// An out of range index leaves the selection untouched.
    pub fn select(&mut self, index: usize) -> Result<()> {
        let count = self.items().len();
        if index >= count {
            return Err(Error::InvalidSelection { index, count });
        }
        self.screen = match self.screen {
            Screen::Worlds => {
                let world = self.worlds[index].clone();
                self.groups = world.list_retain_groups()?;
                self.world = Some(world);
                Screen::RetainGroups
            }
            Screen::RetainGroups => {
                self.backups = self.groups[index].list_backups()?;
                Screen::Backups
            }
            Screen::Backups => {
                self.backup = Some(self.backups[index].clone());
                Screen::PreRestoreHook
            }
            Screen::PreRestoreHook => {
                self.hooks.run_pre = self.pre_restore_command().is_some() && index == 0;
                Screen::PostRestoreHook
            }
            Screen::PostRestoreHook => {
                self.hooks.run_post = self.post_restore_command().is_some() && index == 0;
                Screen::Scope
            }
            Screen::Scope => {
                self.scope = SCOPES[index];
                Screen::Confirm
            }
            Screen::Confirm if index == 0 => Screen::Done,
            Screen::Confirm => Screen::Aborted,
            finished @ (Screen::Done | Screen::Aborted) => finished,
        };
        Ok(())
    }

    /// Returns to the previous screen; backing out of the world list aborts.
    pub fn back(&mut self) {
        self.screen = match self.screen {
            Screen::Worlds => Screen::Aborted,
            Screen::RetainGroups => Screen::Worlds,
            Screen::Backups => Screen::RetainGroups,
            Screen::PreRestoreHook => Screen::Backups,
            Screen::PostRestoreHook => Screen::PreRestoreHook,
            Screen::Scope => Screen::PostRestoreHook,
            Screen::Confirm => Screen::Scope,
            finished @ (Screen::Done | Screen::Aborted) => finished,
        };
    }

    /// The confirmed restore, once the selection is done.
    pub fn outcome(&self) -> Option<RestoreRequest> {
        match self.screen {
            Screen::Done => self.backup.clone().map(|backup| RestoreRequest {
                backup,
                scope: self.scope,
                hooks: self.hooks,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::backup_config::test_support::test_config;
    use crate::backup::result_error::error::ErrorKind;
    use crate::backup::store::{AccessMode, Store};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn runner(temp_dir: &TempDir, overrides: serde_json::Value) -> BackupRunner {
        let config = test_config(temp_dir.path(), overrides);
        let store = Store::new(
            config.backup_folder().to_path_buf(),
            config.date_format().clone(),
            AccessMode::ReadWrite,
        );
        let runner = BackupRunner::new(Arc::new(config), store, false);
        for hour in [9, 11] {
            runner
                .backup_world("alpha", Utc.with_ymd_and_hms(2024, 3, 6, hour, 0, 0).unwrap())
                .unwrap();
        }
        runner
    }

    #[test]
    fn test_walk_to_confirmed_restore() {
        let temp_dir = TempDir::new().unwrap();
        let runner = runner(&temp_dir, json!({"pre_restore_command": "stop {world}"}));
        let mut selection = RestoreSelection::new(&runner).unwrap();

        assert_eq!(selection.items(), vec!["alpha"]);
        selection.select(0).unwrap();
        assert_eq!(selection.screen(), Screen::RetainGroups);
        assert_eq!(selection.title(), "Select a backup group of world 'alpha'");
        assert_eq!(selection.items()[0], "recent");
        selection.select(0).unwrap();
        assert_eq!(
            selection.items(),
            vec!["alpha_2024-03-06T09:00:00", "alpha_2024-03-06T11:00:00"]
        );
        selection.select(1).unwrap();

        assert_eq!(
            selection.items(),
            vec!["Run `stop alpha`", "Don't run the pre-restore command"]
        );
        selection.select(0).unwrap();
        assert_eq!(selection.items(), vec!["No post-restore command configured"]);
        selection.select(0).unwrap();
        assert_eq!(selection.screen(), Screen::Scope);
        selection.select(1).unwrap();

        assert_eq!(selection.screen(), Screen::Confirm);
        let title = selection.title();
        assert!(title.contains("Restore alpha_2024-03-06T11:00:00"), "{title}");
        assert!(title.contains("Run pre-restore hook: true."), "{title}");
        assert!(title.contains("Only restore world subdirectory: false"), "{title}");
        assert!(selection.outcome().is_none());
        selection.select(0).unwrap();

        assert!(selection.is_finished());
        let request = selection.outcome().unwrap();
        assert_eq!(request.backup.name().as_ref(), "alpha_2024-03-06T11:00:00");
        assert_eq!(request.scope, RestoreScope::Everything);
        assert_eq!(
            request.hooks,
            RestoreHooks {
                run_pre: true,
                run_post: false
            }
        );
    }

    #[test]
    fn test_back_walks_to_abort() {
        let temp_dir = TempDir::new().unwrap();
        let runner = runner(&temp_dir, json!({}));
        let mut selection = RestoreSelection::new(&runner).unwrap();
        selection.select(0).unwrap();
        selection.select(0).unwrap();
        assert_eq!(selection.screen(), Screen::Backups);

        selection.back();
        assert_eq!(selection.screen(), Screen::RetainGroups);
        selection.back();
        assert_eq!(selection.screen(), Screen::Worlds);
        selection.back();
        assert_eq!(selection.screen(), Screen::Aborted);
        selection.back();
        assert_eq!(selection.screen(), Screen::Aborted);
        assert!(selection.items().is_empty());
        assert!(selection.outcome().is_none());
    }

    #[test]
    fn test_abort_at_confirm() {
        let temp_dir = TempDir::new().unwrap();
        let runner = runner(&temp_dir, json!({}));
        let mut selection = RestoreSelection::new(&runner).unwrap();
        for index in [0, 0, 0, 0, 0, 0] {
            selection.select(index).unwrap();
        }
        assert_eq!(selection.screen(), Screen::Confirm);
        selection.back();
        assert_eq!(selection.screen(), Screen::Scope);
        selection.select(0).unwrap();
        selection.select(1).unwrap();
        assert_eq!(selection.screen(), Screen::Aborted);
        assert!(selection.outcome().is_none());
    }

    #[test]
    fn test_out_of_range_choice_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let runner = runner(&temp_dir, json!({}));
        let mut selection = RestoreSelection::new(&runner).unwrap();
        let err = selection.select(5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSelection);
        assert_eq!(selection.screen(), Screen::Worlds);
    }
}
