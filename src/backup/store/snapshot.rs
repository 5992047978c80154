use crate::backup::compress::Compression;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::store::retain_group::{RetainGroup, RetainGroupName};
use crate::backup::store::{AccessMode, IN_PROGRESS_SUFFIX};
use crate::backup::tar::TarStream;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use getset::{CopyGetters, Getters};
use std::fmt::{Debug, Display, Formatter};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Default chunk buffer for streamed archives.
pub static DEFAULT_STREAM_BUFFER_SIZE: usize = 10 * 1024 * 1024;

/// One snapshot directory inside a retain group.
#[derive(Clone, Getters, CopyGetters)]
pub struct Backup {
    #[getset(get = "pub")]
    retain_group: RetainGroup,
    #[getset(get = "pub")]
    name: Arc<str>,
    #[getset(get = "pub")]
    directory: PathBuf,
    #[getset(get_copy = "pub")]
    in_progress: bool,
    #[getset(get = "pub")]
    timestamp: NaiveDateTime,
}

impl Debug for Backup {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Backup {}>", self)
    }
}

impl Display for Backup {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.in_progress {
            write!(f, "<IN PROGRESS> ")?;
        }
        write!(
            f,
            "'{}' in retain group '{}' of collection '{}'",
            self.name,
            self.retain_group.name(),
            self.retain_group.collection().name()
        )
    }
}

/// Parses the timestamp out of `<prefix><timestamp><suffix>`.
///
/// Date-only formats are accepted and read as midnight.
pub fn parse_backup_name(
    name: &str,
    prefix: &str,
    suffix: &str,
    date_format: &str,
) -> Result<NaiveDateTime> {
    let malformed = || Error::MalformedBackupName {
        name: name.to_string(),
        format: format!("{prefix}{date_format}{suffix}"),
    };
    let timestamp = name
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(suffix))
        .ok_or_else(malformed)?;
    NaiveDateTime::parse_from_str(timestamp, date_format)
        .or_else(|_| {
            NaiveDate::parse_from_str(timestamp, date_format)
                .map(|date| date.and_time(NaiveTime::MIN))
        })
        .map_err(|_| malformed())
}

impl Backup {
    /// Loads a backup from its directory name, which may carry the
    /// in-progress marker.
    pub(crate) fn from_dir_name(retain_group: RetainGroup, dir_name: &str) -> Result<Self> {
        let (name, in_progress) = match dir_name.strip_suffix(IN_PROGRESS_SUFFIX) {
            Some(name) => (name, true),
            None => (dir_name, false),
        };
        Self::new(retain_group, name, in_progress)
    }

    fn new(retain_group: RetainGroup, name: &str, in_progress: bool) -> Result<Self> {
        let timestamp = parse_backup_name(
            name,
            retain_group.prefix(),
            retain_group.suffix(),
            retain_group.date_format(),
        )?;
        let dir_name = if in_progress {
            format!("{name}{IN_PROGRESS_SUFFIX}")
        } else {
            name.to_string()
        };
        Ok(Self {
            directory: retain_group.directory().join(dir_name),
            name: name.into(),
            in_progress,
            timestamp,
            retain_group,
        })
    }

    /// Creates the in-progress directory eagerly unless the store is a dry run.
    pub(crate) fn new_in_progress(retain_group: RetainGroup, name: &str) -> Result<Self> {
        let backup = Self::new(retain_group, name, true)?;
        match backup.mode() {
            AccessMode::ReadWrite => fs::create_dir_all(&backup.directory)
                .map_err(Error::from)
                .with_msg(format!("Creating {:?} failed", backup.directory))?,
            _ => info!("Would create directory {:?}", backup.directory),
        }
        Ok(backup)
    }

    fn mode(&self) -> AccessMode {
        self.retain_group.mode()
    }

    /// Directory name on disk, including the in-progress marker.
    pub fn dir_name(&self) -> String {
        if self.in_progress {
            format!("{}{}", self.name, IN_PROGRESS_SUFFIX)
        } else {
            self.name.to_string()
        }
    }

    pub fn timestamp_utc(&self) -> DateTime<Utc> {
        self.timestamp.and_utc()
    }

    pub fn collection_name(&self) -> &Arc<str> {
        self.retain_group.collection().name()
    }

    pub fn retain_group_name(&self) -> RetainGroupName {
        self.retain_group.name()
    }

    /// Renames the in-progress directory to its final name. Happens once.
    pub fn finalize(&mut self) -> Result<()> {
        self.mode().check_writable("finalize backup")?;
        if !self.in_progress {
            return Err(Error::AlreadyFinalized(self.name.to_string()));
        }
        let final_dir = self.retain_group.directory().join(self.name.as_ref());
        if self.mode().is_dry_run() {
            info!("Would rename {:?} to {:?}", self.directory, final_dir);
        } else {
            fs::rename(&self.directory, &final_dir)
                .map_err(Error::from)
                .with_msg(format!("Finalizing {self} failed"))?;
        }
        self.directory = final_dir;
        self.in_progress = false;
        Ok(())
    }

    /// Removes the backup directory tree for good.
    pub fn delete(self) -> Result<()> {
        self.mode().check_writable("delete backup")?;
        if self.mode().is_dry_run() {
            info!("Would delete {}", self);
            return Ok(());
        }
        info!("Deleting {}", self);
        fs::remove_dir_all(&self.directory)
            .map_err(Error::from)
            .with_msg(format!("Deleting {self} failed"))
    }

    /// Archive root inside the snapshot; the collection name when `subdir` is unset.
    pub fn archive_root(&self, subdir: Option<&Path>) -> PathBuf {
        match subdir {
            Some(subdir) => self.directory.join(subdir),
            None => self.directory.join(self.collection_name().as_ref()),
        }
    }

    /// Streams an archive of the backup (or `subdir` of it) in chunks.
    ///
    /// Dropping the returned stream before it ends stops the producer before
    /// its next entry.
    pub fn tar_file_generator(
        &self,
        subdir: Option<&Path>,
        buffer_size: usize,
        compression: Compression,
    ) -> Result<TarStream> {
        TarStream::spawn(self.archive_root(subdir), buffer_size, compression)
            .with_msg(format!("Streaming archive of {self} failed"))
    }

    /// Writes a complete archive of the backup to `file_path`.
    pub fn create_tar_file<P: AsRef<Path>>(
        &self,
        file_path: P,
        subdir: Option<&Path>,
        compression: Compression,
    ) -> Result<()> {
        let file_path = file_path.as_ref();
        let mut writer = BufWriter::new(File::create(file_path)?);
        for chunk in self.tar_file_generator(subdir, DEFAULT_STREAM_BUFFER_SIZE, compression)? {
            writer.write_all(&chunk?)?;
        }
        writer.flush()?;
        info!("Wrote archive of {} to {:?}", self, file_path);
        Ok(())
    }
}
