use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::store::collection::Collection;
use crate::backup::store::snapshot::Backup;
use crate::backup::store::{read_dir_if_exists, replace_symlink, AccessMode, LATEST_LINK};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use derive_more::Display;
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// The fixed set of retain groups a collection may hold.
///
/// The first four form the promotion chain; `pre-update` and `reverted` are
/// filled by hand and never promoted or evicted.
#[derive(
    Clone, Copy, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum RetainGroupName {
    #[display("recent")]
    Recent,
    #[display("daily")]
    Daily,
    #[display("weekly")]
    Weekly,
    #[display("monthly")]
    Monthly,
    #[display("pre-update")]
    PreUpdate,
    #[display("reverted")]
    Reverted,
}

impl RetainGroupName {
    pub const TIERS: [RetainGroupName; 4] = [
        RetainGroupName::Recent,
        RetainGroupName::Daily,
        RetainGroupName::Weekly,
        RetainGroupName::Monthly,
    ];

    pub const MANUAL: [RetainGroupName; 2] = [RetainGroupName::PreUpdate, RetainGroupName::Reverted];

    pub const ALL: [RetainGroupName; 6] = [
        RetainGroupName::Recent,
        RetainGroupName::Daily,
        RetainGroupName::Weekly,
        RetainGroupName::Monthly,
        RetainGroupName::PreUpdate,
        RetainGroupName::Reverted,
    ];

    pub fn is_tier(&self) -> bool {
        Self::TIERS.contains(self)
    }
}

impl FromStr for RetainGroupName {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.to_string() == s)
            .ok_or_else(|| Error::InvalidRetainGroup(s.to_string()))
    }
}

/// Calendar period a tier keeps one representative for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Period {
    Day(NaiveDate),
    IsoWeek { year: i32, week: u32 },
    Month { year: i32, month: u32 },
}

impl Period {
    /// The period of `date` as seen by `group`; manual groups have none.
    pub fn of(group: RetainGroupName, date: NaiveDate) -> Option<Period> {
        match group {
            RetainGroupName::Recent | RetainGroupName::Daily => Some(Period::Day(date)),
            RetainGroupName::Weekly => {
                let week = date.iso_week();
                Some(Period::IsoWeek {
                    year: week.year(),
                    week: week.week(),
                })
            }
            RetainGroupName::Monthly => Some(Period::Month {
                year: date.year(),
                month: date.month(),
            }),
            RetainGroupName::PreUpdate | RetainGroupName::Reverted => None,
        }
    }
}

#[derive(Clone, Getters, CopyGetters)]
pub struct RetainGroup {
    #[getset(get = "pub")]
    collection: Collection,
    #[getset(get_copy = "pub")]
    name: RetainGroupName,
    #[getset(get = "pub")]
    directory: Arc<Path>,
    #[getset(get = "pub")]
    prefix: Arc<str>,
    #[getset(get = "pub")]
    suffix: Arc<str>,
}

impl Debug for RetainGroup {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<RetainGroup '{}' of collection '{}'>",
            self.name,
            self.collection.name()
        )
    }
}

impl RetainGroup {
    pub(crate) fn open(
        collection: Collection,
        name: RetainGroupName,
        prefix: Arc<str>,
        suffix: Arc<str>,
    ) -> Result<Self> {
        let directory: Arc<Path> = collection.directory().join(name.to_string()).into();
        if collection.store().mode().creates_dirs() && !directory.exists() {
            fs::create_dir_all(&directory)
                .map_err(Error::from)
                .with_msg(format!("Creating retain group directory {:?} failed", directory))?;
        }
        Ok(Self {
            collection,
            name,
            directory,
            prefix,
            suffix,
        })
    }

    pub fn date_format(&self) -> &str {
        self.collection.store().date_format()
    }

    pub fn mode(&self) -> AccessMode {
        self.collection.store().mode()
    }

    /// Loads the backup stored under directory `dir_name`, if it exists.
    pub fn get_backup(&self, dir_name: &str) -> Result<Option<Backup>> {
        if !self.directory.join(dir_name).exists() {
            return Ok(None);
        }
        Backup::from_dir_name(self.clone(), dir_name).map(Some)
    }

    /// Every backup including in-progress ones, oldest first.
    ///
    /// Directories whose names don't parse are skipped with a warning.
    pub fn list_all_backups(&self) -> Result<Vec<Backup>> {
        let mut backups = Vec::new();
        for entry in read_dir_if_exists(&self.directory)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Ok(dir_name) = entry.file_name().into_string() else {
                warn!("Skipping non UTF-8 entry {:?}", entry.path());
                continue;
            };
            if !dir_name.starts_with(self.prefix.as_ref()) {
                continue;
            }
            match Backup::from_dir_name(self.clone(), &dir_name) {
                Ok(backup) => backups.push(backup),
                Err(e) => warn!("Skipping {:?} in {:?}: {}", dir_name, self, e),
            }
        }
        backups.sort_by_key(|b| *b.timestamp());
        Ok(backups)
    }

    pub fn list_backups(&self) -> Result<Vec<Backup>> {
        Ok(self
            .list_all_backups()?
            .into_iter()
            .filter(|b| !b.in_progress())
            .collect())
    }

    pub fn list_in_progress_backups(&self) -> Result<Vec<Backup>> {
        Ok(self
            .list_all_backups()?
            .into_iter()
            .filter(|b| b.in_progress())
            .collect())
    }

    pub fn get_latest_backup(&self) -> Result<Option<Backup>> {
        Ok(self.list_backups()?.pop())
    }

    /// Finalized backups falling into the same period as `date`.
    pub fn get_backups_for_period(&self, date: NaiveDate) -> Result<Vec<Backup>> {
        let period = Period::of(self.name, date)
            .ok_or_else(|| Error::InvalidRetainGroup(self.name.to_string()))?;
        Ok(self
            .list_backups()?
            .into_iter()
            .filter(|b| Period::of(self.name, b.timestamp().date()) == Some(period))
            .collect())
    }

    /// Starts an in-progress backup named `<prefix><timestamp><suffix>`.
    pub fn new_backup_named(&self, timestamp: &str) -> Result<Backup> {
        self.new_backup_with_name(&format!("{}{}{}", self.prefix, timestamp, self.suffix))
    }

    /// Starts an in-progress backup stamped with `now` in the store's date format.
    pub fn new_empty_backup(&self, now: DateTime<Utc>) -> Result<Backup> {
        self.new_backup_named(&now.format(self.date_format()).to_string())
    }

    pub(crate) fn new_backup_with_name(&self, name: &str) -> Result<Backup> {
        self.mode().check_writable("create new backup")?;
        Backup::new_in_progress(self.clone(), name)
    }

    /// Repoints `<group>/latest` at `backup`.
    pub fn update_latest_link(&self, backup: &Backup) -> Result<()> {
        let link = self.directory.join(LATEST_LINK);
        let target = PathBuf::from(backup.dir_name());
        match self.mode() {
            AccessMode::ReadOnly => self.mode().check_writable("update latest link"),
            AccessMode::DryRun => {
                info!("Would point {:?} at {:?}", link, target);
                Ok(())
            }
            AccessMode::ReadWrite => replace_symlink(&link, &target),
        }
    }
}
