use crate::backup::result_error::result::Result;
use crate::backup::store::retain_group::{RetainGroup, RetainGroupName};
use crate::backup::store::snapshot::Backup;
use crate::backup::store::{read_dir_if_exists, replace_symlink, AccessMode, Store, LATEST_LINK};
use chrono::{DateTime, Utc};
use getset::Getters;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// All retain groups of one data set (world).
#[derive(Clone, Getters)]
#[getset(get = "pub")]
pub struct Collection {
    store: Store,
    name: Arc<str>,
    directory: Arc<Path>,
    prefix: Arc<str>,
    suffix: Arc<str>,
}

impl Debug for Collection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Collection at {:?}>", self.directory)
    }
}

impl Collection {
    /// Opens the collection; a writable store gets the full group skeleton.
    pub(crate) fn open(
        store: Store,
        name: &str,
        prefix: Option<&str>,
        suffix: Option<&str>,
    ) -> Result<Self> {
        let collection = Self {
            directory: store.directory().join(name).into(),
            prefix: prefix
                .filter(|p| !p.is_empty())
                .map(Arc::from)
                .unwrap_or_else(|| format!("{name}_").into()),
            suffix: suffix.unwrap_or_default().into(),
            name: name.into(),
            store,
        };
        if collection.store.mode().creates_dirs() {
            for group in RetainGroupName::ALL {
                collection.get_retain_group(group)?;
            }
        }
        Ok(collection)
    }

    pub fn get_retain_group(&self, name: RetainGroupName) -> Result<RetainGroup> {
        RetainGroup::open(self.clone(), name, self.prefix.clone(), self.suffix.clone())
    }

    /// Looks a group up by its directory name, failing with `InvalidRetainGroup`.
    pub fn retain_group(&self, name: &str) -> Result<RetainGroup> {
        self.get_retain_group(name.parse()?)
    }

    /// Groups present on disk, in chain order then manual groups.
    pub fn list_retain_groups(&self) -> Result<Vec<RetainGroup>> {
        let mut names = Vec::new();
        for entry in read_dir_if_exists(&self.directory)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            match file_name.to_str().map(str::parse::<RetainGroupName>) {
                Some(Ok(name)) => names.push(name),
                _ => warn!("Ignoring unknown retain group {:?} in {:?}", file_name, self),
            }
        }
        names.sort();
        names
            .into_iter()
            .map(|name| self.get_retain_group(name))
            .collect()
    }

    /// Repoints `<collection>/latest` at `backup` through its group directory.
    pub fn update_latest_link(&self, backup: &Backup) -> Result<()> {
        let link = self.directory.join(LATEST_LINK);
        let target = PathBuf::from(backup.retain_group().name().to_string()).join(backup.dir_name());
        match self.store.mode() {
            AccessMode::ReadOnly => self.store.mode().check_writable("update latest link"),
            AccessMode::DryRun => {
                info!("Would point {:?} at {:?}", link, target);
                Ok(())
            }
            AccessMode::ReadWrite => replace_symlink(&link, &target),
        }
    }

    /// Finalized backups of every group keyed by timestamp.
    ///
    /// Promoted copies share their source's timestamp; the highest group wins.
    pub fn all_backups(&self) -> Result<BTreeMap<DateTime<Utc>, Backup>> {
        let mut backups = BTreeMap::new();
        for group in self.list_retain_groups()? {
            for backup in group.list_backups()? {
                backups.insert(backup.timestamp_utc(), backup);
            }
        }
        Ok(backups)
    }
}
