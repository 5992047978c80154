//! Per-world orchestration of hooks, sync, cleanup, rotation and restore.

use crate::backup::backup_config::BackupRollConfig;
use crate::backup::hook::HookCommand;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::rotation::BackupRotation;
use crate::backup::store::collection::Collection;
use crate::backup::store::retain_group::RetainGroupName;
use crate::backup::store::snapshot::Backup;
use crate::backup::store::Store;
use crate::backup::sync::{SyncCommand, SyncConfig};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Snapshot subdirectory restored by [`RestoreScope::WorldOnly`] when present.
pub static WORLD_SUBDIR: &str = "world";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RestoreScope {
    /// Only the `world` subdirectory, or everything when the snapshot has none.
    #[default]
    WorldOnly,
    Everything,
}

/// Which of the configured restore hooks to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RestoreHooks {
    pub run_pre: bool,
    pub run_post: bool,
}

impl Default for RestoreHooks {
    fn default() -> Self {
        Self {
            run_pre: true,
            run_post: true,
        }
    }
}

pub struct BackupRunner {
    config: Arc<BackupRollConfig>,
    store: Store,
    sync: Arc<SyncConfig>,
    verbose: bool,
}

impl BackupRunner {
    pub fn new(config: Arc<BackupRollConfig>, store: Store, verbose: bool) -> Self {
        Self {
            sync: Arc::new(config.sync().clone()),
            config,
            store,
            verbose,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &Arc<BackupRollConfig> {
        &self.config
    }

    fn dry_run(&self) -> bool {
        self.store.mode().is_dry_run()
    }

    /// Opens the collection of `world` with its configured prefix and suffix.
    pub fn get_collection(&self, world: &str) -> Result<Collection> {
        let world_config = self.config.world(world);
        self.store.get_collection_with(
            world,
            world_config.and_then(|w| w.prefix.as_deref()),
            world_config.and_then(|w| w.suffix.as_deref()),
        )
    }

    fn run_hook(&self, hook: Option<&HookCommand>, world: &str) -> Result<()> {
        match hook {
            Some(hook) => hook.run(world, self.dry_run(), self.verbose),
            None => Ok(()),
        }
    }

    /// Pre-hook, sync into `recent`, post-hook. Any failure runs the fail-hook
    /// and is returned.
    pub fn backup_world(&self, world: &str, now: DateTime<Utc>) -> Result<Backup> {
        info!("Running backup for world {}", world);
        let res = self.try_backup_world(world, now);
        if let Err(e) = &res {
            error!("Backup of world {} failed: {}", world, e);
            if let Err(hook_error) = self.run_hook(self.config.fail_backup_command().as_ref(), world) {
                warn!("Fail-backup command for world {} failed too: {}", world, hook_error);
            }
        }
        res
    }

    fn try_backup_world(&self, world: &str, now: DateTime<Utc>) -> Result<Backup> {
        self.run_hook(self.config.pre_backup_command().as_ref(), world)
            .with_msg(format!("Pre-backup command for world {world} failed"))?;
        let recent = self.get_collection(world)?.get_retain_group(RetainGroupName::Recent)?;
        let backup = SyncCommand::new(self.sync.clone(), self.config.world_dir(world), recent, self.verbose)
            .run_blocking(now)?;
        self.run_hook(self.config.post_backup_command().as_ref(), world)
            .with_msg(format!("Post-backup command for world {world} failed"))?;
        Ok(backup)
    }

    /// Backs up each world in turn, stopping at the first failure.
    pub fn backup_worlds<S: AsRef<str>>(&self, worlds: &[S], now: DateTime<Utc>) -> Result<Vec<Backup>> {
        worlds
            .iter()
            .map(|world| self.backup_world(world.as_ref(), now))
            .collect()
    }

    /// Deletes in-progress backups left behind in any group of `world`.
    pub fn cleanup_world(&self, world: &str) -> Result<usize> {
        let mut removed = 0;
        for group in self.get_collection(world)?.list_retain_groups()? {
            for backup in group.list_in_progress_backups()? {
                info!("Removing unfinished backup {}", backup);
                backup.delete()?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn cleanup_worlds<S: AsRef<str>>(&self, worlds: &[S]) -> Result<usize> {
        worlds
            .iter()
            .map(|world| self.cleanup_world(world.as_ref()))
            .sum()
    }

    /// Promotes and evicts; `false` when the world has no retention plan.
    pub fn rotate_world(&self, world: &str, now: DateTime<Utc>) -> Result<bool> {
        let Some(plan) = self.config.retention_plan(world) else {
            debug!("World {} has no retention plan, not rotating", world);
            return Ok(false);
        };
        BackupRotation::new(self.get_collection(world)?, plan).rotate(now)?;
        Ok(true)
    }

    pub fn rotate_worlds<S: AsRef<str>>(&self, worlds: &[S], now: DateTime<Utc>) -> Result<()> {
        for world in worlds {
            self.rotate_world(world.as_ref(), now)?;
        }
        Ok(())
    }

    /// Subdirectory of `<backup>/<world>` that `scope` restores; empty means all of it.
    pub fn restore_subdir(backup: &Backup, scope: RestoreScope) -> &'static str {
        let world = backup.collection_name();
        match scope {
            RestoreScope::WorldOnly
                if backup.directory().join(world.as_ref()).join(WORLD_SUBDIR).is_dir() =>
            {
                WORLD_SUBDIR
            }
            _ => "",
        }
    }

    /// Pre-restore hook, sync back onto the live world, post-restore hook.
    pub fn restore_world(&self, backup: &Backup, scope: RestoreScope, hooks: RestoreHooks) -> Result<()> {
        let world = backup.collection_name().to_string();
        let subdir = Self::restore_subdir(backup, scope);
        info!("Restoring world {} from {}", world, backup);

        if hooks.run_pre {
            self.run_hook(self.config.pre_restore_command().as_ref(), &world)
                .with_msg(format!("Pre-restore command for world {world} failed"))?;
        }
        SyncCommand::new(
            self.sync.clone(),
            self.config.world_dir(&world),
            backup.retain_group().clone(),
            self.verbose,
        )
        .run_restore(backup, Path::new(subdir))?;
        if hooks.run_post {
            self.run_hook(self.config.post_restore_command().as_ref(), &world)
                .with_msg(format!("Post-restore command for world {world} failed"))?;
        }
        info!("Restore of world {} complete", world);
        Ok(())
    }
}
