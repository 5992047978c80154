//! Promotion of backups up the `recent → daily → weekly → monthly` chain and
//! eviction of whatever exceeds each tier's keep-count.

use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use crate::backup::retention::RetentionPlan;
use crate::backup::store::collection::Collection;
use crate::backup::store::retain_group::{Period, RetainGroup, RetainGroupName};
use crate::backup::store::snapshot::Backup;
use crate::backup::store::IN_PROGRESS_SUFFIX;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike, Utc};
use function_name::named;
use std::fmt::{Debug, Formatter};
use std::fs;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Hour (UTC) before which the current day's recent backups are not promoted yet.
static PROMOTION_HOUR: u32 = 12;
/// A daily representative is preferably taken before this hour.
static DAILY_CUTOFF_HOUR: u32 = 13;

#[derive(Clone)]
pub struct BackupRotation {
    collection: Collection,
    plan: RetentionPlan,
}

impl Debug for BackupRotation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "<BackupRotation of {:?} keeping {:?}>", self.collection, self.plan)
    }
}

/// Index of the backup to promote into `to` for the period containing `date`.
///
/// `timestamps` must be sorted ascending. Daily picks the latest candidate before
/// 13:00 and falls back to the earliest of the day; weekly and monthly pick the
/// earliest of the period.
pub fn select_promotion_index(
    timestamps: &[NaiveDateTime],
    to: RetainGroupName,
    date: NaiveDate,
) -> Option<usize> {
    if !to.is_tier() || to == RetainGroupName::Recent {
        return None;
    }
    let period = Period::of(to, date)?;
    let mut candidates = timestamps
        .iter()
        .enumerate()
        .filter(|(_, ts)| Period::of(to, ts.date()) == Some(period));
    let first = candidates.next()?;
    if to != RetainGroupName::Daily {
        return Some(first.0);
    }
    std::iter::once(first)
        .chain(candidates)
        .filter(|(_, ts)| ts.hour() < DAILY_CUTOFF_HOUR)
        .last()
        .map_or(Some(first.0), |(i, _)| Some(i))
}

/// Mirrors `source` into `dest` with file content hard linked; symlinks are recreated.
pub fn hardlink_tree(source: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    for entry in WalkDir::new(source).min_depth(1).follow_links(false) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| Error::from(std::io::Error::other(e)))?;
        let target = dest.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            std::os::unix::fs::symlink(fs::read_link(entry.path())?, &target)?;
        } else {
            fs::hard_link(entry.path(), &target)
                .map_err(Error::from)
                .with_msg(format!("Linking {:?} to {:?} failed", entry.path(), target))?;
        }
    }
    Ok(())
}

impl BackupRotation {
    pub fn new(collection: Collection, plan: RetentionPlan) -> Self {
        Self { collection, plan }
    }

    /// First enabled tier above `tier`, skipping disabled ones.
    pub fn next_tier(&self, tier: RetainGroupName) -> Option<RetainGroupName> {
        RetainGroupName::TIERS
            .into_iter()
            .skip_while(|t| *t != tier)
            .skip(1)
            .find(|t| self.plan.is_enabled(*t))
    }

    /// Whether `from` owes its next tier a representative for the period of `date`.
    ///
    /// Recent backups of the current day wait until midday so more candidates
    /// can accumulate.
    pub fn should_promote(
        &self,
        from: RetainGroupName,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if from == RetainGroupName::Recent
            && now.date_naive() <= date
            && now.hour() < PROMOTION_HOUR
        {
            return Ok(false);
        }
        match self.next_tier(from) {
            None => Ok(false),
            Some(to) => Ok(self
                .collection
                .get_retain_group(to)?
                .get_backups_for_period(date)?
                .is_empty()),
        }
    }

    pub fn select_promotion_backup(
        &self,
        from: &RetainGroup,
        to: RetainGroupName,
        date: NaiveDate,
    ) -> Result<Option<Backup>> {
        let mut backups = from.list_backups()?;
        let timestamps: Vec<_> = backups.iter().map(|b| *b.timestamp()).collect();
        Ok(select_promotion_index(&timestamps, to, date).map(|i| backups.swap_remove(i)))
    }

    /// Copies `backup` into `to` under the same name and repoints `to`'s latest link.
    ///
    /// The copy is assembled in an in-progress directory and renamed into place.
    pub fn promote_backup(&self, backup: &Backup, to: &RetainGroup) -> Result<Backup> {
        to.mode().check_writable("promote backup")?;
        if let Some(existing) = to.get_backup(backup.name())? {
            debug!("{} already promoted", existing);
            return Ok(existing);
        }
        if let Some(stale) = to.get_backup(&format!("{}{}", backup.name(), IN_PROGRESS_SUFFIX))? {
            stale.delete()?;
        }

        info!("Promoting {} to retain group '{}'", backup, to.name());
        let mut promoted = to.new_backup_with_name(backup.name())?;
        if to.mode().is_dry_run() {
            info!("Would hard link {:?} into {:?}", backup.directory(), promoted.directory());
        } else {
            hardlink_tree(backup.directory(), promoted.directory())
                .with_msg(format!("Promoting {backup} failed"))?;
        }
        promoted.finalize()?;
        to.update_latest_link(&promoted)?;
        Ok(promoted)
    }

    /// Promotes into every tier still missing a representative for the day of `now`.
    pub fn promote_backups(&self, now: DateTime<Utc>) -> Result<Vec<Backup>> {
        let date = now.date_naive();
        let mut promoted = Vec::new();
        for from in RetainGroupName::TIERS {
            if !self.should_promote(from, date, now)? {
                continue;
            }
            let Some(to) = self.next_tier(from) else {
                continue;
            };
            debug!("A '{}' backup should be promoted", to);
            let from_group = self.collection.get_retain_group(from)?;
            match self.select_promotion_backup(&from_group, to, date)? {
                Some(backup) => {
                    let to_group = self.collection.get_retain_group(to)?;
                    promoted.push(self.promote_backup(&backup, &to_group)?);
                }
                None => info!(
                    "Can't find a '{}' backup to promote to '{}'. Try later.",
                    from, to
                ),
            }
        }
        Ok(promoted)
    }

    /// Oldest backups beyond each tier's keep-count. Manual groups are never listed.
    pub fn list_backups_to_delete(&self) -> Result<Vec<Backup>> {
        let mut to_delete = Vec::new();
        for tier in RetainGroupName::TIERS {
            let keep = self.plan.keep(tier).unwrap_or(usize::MAX);
            let backups = self.collection.get_retain_group(tier)?.list_backups()?;
            let excess = backups.len().saturating_sub(keep);
            to_delete.extend(backups.into_iter().take(excess));
        }
        Ok(to_delete)
    }

    /// Evicts everything [`Self::list_backups_to_delete`] reports, attempting every deletion.
    pub fn cleanup_backups(&self) -> Result<()> {
        let errors = self
            .list_backups_to_delete()?
            .into_iter()
            .filter_map(|backup| backup.delete().err())
            .collect();
        convert_error_vec(errors)
    }

    /// Promote, then evict.
    #[named]
    pub fn rotate(&self, now: DateTime<Utc>) -> Result<()> {
        info!("Rotating backups of collection '{}'", self.collection.name());
        self.promote_backups(now)
            .and_then(|_| self.cleanup_backups())
            .with_debug_object_and_fn_name(self.clone(), function_path!())
    }
}
