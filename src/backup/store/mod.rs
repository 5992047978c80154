//! On-disk backup store.
//!
//! ```text
//! <store>/<collection>/<group>/<prefix><timestamp><suffix>[.in-progress]/...
//! <store>/<collection>/<group>/latest -> <backup-dir>
//! <store>/<collection>/latest -> <group>/<backup-dir>
//! ```
//!
//! Finalized backups are never modified in place, they are only renamed in
//! or deleted, so enumerating and streaming need no lock.

pub mod collection;
pub mod retain_group;
pub mod snapshot;

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::store::collection::Collection;
use crate::backup::validate::validate_world_name;
use getset::{CopyGetters, Getters};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub static DEFAULT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
pub static IN_PROGRESS_SUFFIX: &str = ".in-progress";
pub static LATEST_LINK: &str = "latest";

/// How the engine may touch the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Creates directories on demand and performs every mutation.
    #[default]
    ReadWrite,
    /// Never creates anything; every mutation fails with `StoreReadonly`.
    ReadOnly,
    /// Never creates, renames or deletes; mutations are logged and succeed.
    DryRun,
}

impl AccessMode {
    pub fn creates_dirs(&self) -> bool {
        *self == AccessMode::ReadWrite
    }

    pub fn is_dry_run(&self) -> bool {
        *self == AccessMode::DryRun
    }

    pub fn is_readonly(&self) -> bool {
        *self == AccessMode::ReadOnly
    }

    /// Fails with `StoreReadonly` describing `action` when mutations are forbidden.
    pub fn check_writable(&self, action: &str) -> Result<()> {
        if self.is_readonly() {
            Err(Error::StoreReadonly(format!(
                "Can't {action}. Store is readonly."
            )))
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Debug, Getters, CopyGetters)]
pub struct Store {
    #[getset(get = "pub")]
    directory: Arc<Path>,
    #[getset(get = "pub")]
    date_format: Arc<str>,
    #[getset(get_copy = "pub")]
    mode: AccessMode,
}

impl Store {
    pub fn new<P: Into<PathBuf>, S: Into<Arc<str>>>(
        directory: P,
        date_format: S,
        mode: AccessMode,
    ) -> Self {
        Self {
            directory: directory.into().into(),
            date_format: date_format.into(),
            mode,
        }
    }

    /// Opens a collection with the default `<name>_` prefix and no suffix.
    pub fn get_collection(&self, name: &str) -> Result<Collection> {
        self.get_collection_with(name, None, None)
    }

    pub fn get_collection_with(
        &self,
        name: &str,
        prefix: Option<&str>,
        suffix: Option<&str>,
    ) -> Result<Collection> {
        check_collection_name(name)?;
        let path = self.directory.join(name);
        if !path.exists() {
            match self.mode {
                AccessMode::ReadOnly => return Err(Error::CollectionNotFound(name.to_string())),
                AccessMode::DryRun => info!("Would create collection directory {:?}", path),
                AccessMode::ReadWrite => fs::create_dir_all(&path)
                    .map_err(Error::from)
                    .with_msg(format!("Creating collection directory {:?} failed", path))?,
            }
        }
        Collection::open(self.clone(), name, prefix, suffix)
    }

    pub fn list_collections(&self) -> Result<Vec<Collection>> {
        let mut names = Vec::new();
        for entry in read_dir_if_exists(&self.directory)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if check_collection_name(&name).is_ok() => names.push(name),
                Ok(name) => warn!("Skipping directory {:?}, not a valid world name", name),
                Err(name) => warn!("Skipping collection with non UTF-8 name {:?}", name),
            }
        }
        names.sort();
        names.iter().map(|name| self.get_collection(name)).collect()
    }
}

/// Collections are plain directories right below the store root.
fn check_collection_name(name: &str) -> Result<()> {
    validate_world_name(name).map_err(|e| Error::Config(e.to_string()))
}

/// Like `fs::read_dir`, but a missing directory reads as empty.
pub(crate) fn read_dir_if_exists(
    dir: &Path,
) -> Result<Box<dyn Iterator<Item = io::Result<fs::DirEntry>>>> {
    match fs::read_dir(dir) {
        Ok(entries) => Ok(Box::new(entries)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Box::new(std::iter::empty())),
        Err(e) => Err(Error::from(e).with_msg(format!("Listing {:?} failed", dir))),
    }
}

/// Points `link` at `target`, swapping the old link out with a single rename.
pub(crate) fn replace_symlink(link: &Path, target: &Path) -> Result<()> {
    let file_name = link
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| LATEST_LINK.to_string());
    let tmp = link.with_file_name(format!(".{}.tmp-{}", file_name, std::process::id()));
    match fs::remove_file(&tmp) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    std::os::unix::fs::symlink(target, &tmp)
        .and_then(|_| fs::rename(&tmp, link))
        .map_err(Error::from)
        .with_msg(format!("Pointing {:?} at {:?} failed", link, target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::result_error::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_readonly_store_does_not_create_collection() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::new(temp_dir.path(), DEFAULT_DATE_FORMAT, AccessMode::ReadOnly);
        let err = store.get_collection("world").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CollectionNotFound);
        assert!(!temp_dir.path().join("world").exists());
    }

    #[test]
    fn test_dry_run_store_creates_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::new(temp_dir.path(), DEFAULT_DATE_FORMAT, AccessMode::DryRun);
        let collection = store.get_collection("world").unwrap();
        assert_eq!(collection.name().as_ref(), "world");
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_collection_names_stay_inside_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::new(
            temp_dir.path().join("store"),
            DEFAULT_DATE_FORMAT,
            AccessMode::ReadWrite,
        );
        for name in ["../escape", "a/b", "latest", ""] {
            let err = store.get_collection(name).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Config, "{name:?}");
        }
        assert!(!temp_dir.path().join("escape").exists());
        assert!(!temp_dir.path().join("store").exists());
    }

    #[test]
    fn test_list_collections() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::new(temp_dir.path(), DEFAULT_DATE_FORMAT, AccessMode::ReadWrite);
        store.get_collection("beta").unwrap();
        store.get_collection("alpha").unwrap();
        fs::write(temp_dir.path().join("stray-file"), "x").unwrap();

        let readonly = Store::new(temp_dir.path(), DEFAULT_DATE_FORMAT, AccessMode::ReadOnly);
        let names: Vec<_> = readonly
            .list_collections()
            .unwrap()
            .into_iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_list_collections_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::new(
            temp_dir.path().join("missing"),
            DEFAULT_DATE_FORMAT,
            AccessMode::ReadOnly,
        );
        assert!(store.list_collections().unwrap().is_empty());
    }

    #[test]
    fn test_replace_symlink_swaps_target() {
        let temp_dir = TempDir::new().unwrap();
        let link = temp_dir.path().join("latest");
        replace_symlink(&link, Path::new("a")).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), Path::new("a"));
        replace_symlink(&link, Path::new("b")).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), Path::new("b"));
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_check_writable() {
        assert!(AccessMode::ReadWrite.check_writable("x").is_ok());
        assert!(AccessMode::DryRun.check_writable("x").is_ok());
        let err = AccessMode::ReadOnly
            .check_writable("delete backup")
            .unwrap_err();
        assert_eq!(err.to_string(), "Can't delete backup. Store is readonly.");
    }
}
