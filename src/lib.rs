//! # backuproll
//!
//! Rolling, hardlinked backups of Minecraft worlds.
//!
//! ## Features
//!
//! - **Incremental Snapshots**: rsync with `--link-dest` against the latest backup
//! - **Tiered Retention**: recent, daily, weekly and monthly groups with per-tier keep counts
//! - **Hooks**: shell commands around backup and restore, with `{world}` substitution
//! - **Single Instance**: PID file lock with stale lock takeover
//! - **Streaming Archives**: tar snapshots streamed through a bounded buffer, optionally gzip or xz compressed
//!
//! ## Quick Start
//!
//! ```no_run
//! use backuproll::backup::backup_config::BackupRollConfig;
//! use backuproll::backup::roll::{Activity, BackupRoll, RollOptions};
//!
//! let config = BackupRollConfig::load("/opt/wurstmineberg/config/backuproll2.json")?;
//! let roll = BackupRoll::new(std::sync::Arc::new(config), RollOptions::default())?;
//! roll.do_activity(Activity::default())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
