use crate::backup::hook::{validate_hook_template, HookCommand};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::retention::RetentionPlan;
use crate::backup::store::DEFAULT_DATE_FORMAT;
use crate::backup::sync::SyncConfig;
use crate::backup::validate::{validate_date_format, validate_dir_if_exists, validate_world_name};
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use validator::{Validate, ValidationError};

fn default_date_format() -> Arc<str> {
    DEFAULT_DATE_FORMAT.into()
}

fn default_lock_poll_interval() -> Duration {
    Duration::from_secs(1)
}

/// Per-world settings.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Worlds without a plan are backed up but never rotated.
    pub keep: Option<RetentionPlan>,
    /// Backup name prefix, `<world>_` when unset.
    pub prefix: Option<String>,
    pub suffix: Option<String>,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Getters)]
#[getset(get = "pub")]
pub struct BackupRollConfig {
    /// Root of the backup store.
    #[serde(alias = "backupfolder")]
    #[validate(custom(function = validate_dir_if_exists))]
    backup_folder: Arc<Path>,
    /// Parent directory of the live worlds.
    #[serde(alias = "worldfolder")]
    world_folder: Arc<Path>,
    #[serde(alias = "pidfile")]
    pid_file: Arc<Path>,
    #[serde(alias = "dateformat", default = "default_date_format")]
    #[validate(custom(function = validate_date_format))]
    date_format: Arc<str>,
    #[serde(default)]
    #[validate(custom(function = validate_worlds))]
    worlds: BTreeMap<String, WorldConfig>,
    #[validate(custom(function = validate_hook_template))]
    pre_backup_command: Option<HookCommand>,
    #[validate(custom(function = validate_hook_template))]
    post_backup_command: Option<HookCommand>,
    #[validate(custom(function = validate_hook_template))]
    fail_backup_command: Option<HookCommand>,
    #[validate(custom(function = validate_hook_template))]
    pre_restore_command: Option<HookCommand>,
    #[validate(custom(function = validate_hook_template))]
    post_restore_command: Option<HookCommand>,
    #[serde(default)]
    #[validate(nested)]
    sync: SyncConfig,
    #[serde(default = "default_lock_poll_interval", with = "humantime_serde")]
    lock_poll_interval: Duration,
}

fn validate_worlds(worlds: &BTreeMap<String, WorldConfig>) -> std::result::Result<(), ValidationError> {
    for (name, world) in worlds {
        validate_world_name(name)?;
        for affix in [&world.prefix, &world.suffix].into_iter().flatten() {
            if affix.contains('/') {
                return Err(ValidationError::new("InvalidAffix").with_message(
                    format!("Prefix and suffix of world {name:?} must not contain '/'").into(),
                ));
            }
        }
    }

    Ok(())
}

impl BackupRollConfig {
    /// Reads and validates a config file; `.yml`/`.yaml` files are YAML, anything else JSON.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(Error::from)
            .with_msg(format!("Opening config {:?} failed", path))?;
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yml") || ext.eq_ignore_ascii_case("yaml"));
        let config: Self = if is_yaml {
            serde_yml::from_reader(file)
                .map_err(Error::from)
                .with_msg(format!("Parse YAML config failed: {:?}", path))?
        } else {
            serde_json::from_reader(file)
                .map_err(Error::from)
                .with_msg(format!("Parse JSON config failed: {:?}", path))?
        };
        config.validated().with_msg(format!("Config validation failed: {:?}", path))
    }

    /// Validates, then anchors `backup_folder` at the working directory.
    pub fn validated(mut self) -> Result<Self> {
        self.validate()?;
        // rsync resolves a relative `--link-dest` against the destination.
        self.backup_folder = std::path::absolute(&self.backup_folder)
            .map_err(Error::from)
            .with_msg(format!("Resolving backup folder {:?} failed", self.backup_folder))?
            .into();
        Ok(self)
    }

    pub fn world(&self, name: &str) -> Option<&WorldConfig> {
        self.worlds.get(name)
    }

    /// Live directory of `world`.
    pub fn world_dir(&self, world: &str) -> PathBuf {
        self.world_folder.join(world)
    }

    pub fn retention_plan(&self, world: &str) -> Option<RetentionPlan> {
        self.world(world).and_then(|w| w.keep)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::BackupRollConfig;
    use crate::backup::sync::test_support::fake_sync_config;
    use serde_json::json;
    use std::path::Path;

    /// Config rooted at `root` with worlds `alpha` (rotated) and `beta` (not
    /// rotated), both present on disk, syncing through the fake rsync.
    /// Top-level keys of `overrides` replace the defaults.
    pub fn test_config(root: &Path, overrides: serde_json::Value) -> BackupRollConfig {
        for world in ["alpha", "beta"] {
            let dir = root.join("worlds").join(world);
            std::fs::create_dir_all(dir.join("region")).unwrap();
            std::fs::write(dir.join("level.dat"), world).unwrap();
        }
        let mut raw = json!({
            "backup_folder": root.join("backup"),
            "world_folder": root.join("worlds"),
            "pid_file": root.join("backuproll.pid"),
            "worlds": {
                "alpha": {"keep": {"recent": 2, "daily": 2}},
                "beta": {}
            },
            "sync": fake_sync_config(root),
            "lock_poll_interval": "10ms"
        });
        if let Some(overrides) = overrides.as_object() {
            for (key, value) in overrides {
                raw[key] = value.clone();
            }
        }
        serde_json::from_value::<BackupRollConfig>(raw)
            .unwrap()
            .validated()
            .unwrap()
    }
}
