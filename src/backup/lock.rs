//! Single-instance lock backed by a PID file.

use crate::backup::result_error::error::{Error, ErrorKind};
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fmt::{Debug, Formatter};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Gives up on taking over a stale PID file after this many lost races.
static MAX_ACQUIRE_ATTEMPTS: usize = 8;
static SIBLING_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Probes `pid` with signal 0. A process we may not signal still counts as alive.
pub fn is_process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(_) => true,
    }
}

/// Content of the PID file at `path`, `None` if there is none.
fn read_pid_file(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::from(e).with_msg(format!("Reading PID file {:?} failed", path))),
    }
}

fn parse_pid(content: &str) -> Option<i32> {
    content.trim().parse().ok()
}

fn sibling(path: &Path, tag: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let n = SIBLING_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{file_name}.{tag}-{}-{n}", std::process::id()))
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[derive(Clone)]
pub struct PidLock {
    path: Arc<Path>,
}

impl Debug for PidLock {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "<PidLock at {:?}>", self.path)
    }
}

impl PidLock {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into().into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID recorded in the lock file, if present and parseable.
    pub fn holder(&self) -> Result<Option<i32>> {
        Ok(read_pid_file(&self.path)?.as_deref().and_then(parse_pid))
    }

    /// Takes the lock without blocking.
    ///
    /// Fails with `LockHeld` while the recorded process is alive. A stale or
    /// unparseable PID file is taken over.
    pub fn acquire(&self) -> Result<LockGuard> {
        let pid = std::process::id();
        for _ in 0..MAX_ACQUIRE_ATTEMPTS {
            if self.try_create(pid)? {
                debug!("Acquired {:?}", self);
                return Ok(LockGuard {
                    path: self.path.clone(),
                    pid,
                    released: false,
                });
            }
            let Some(content) = read_pid_file(&self.path)? else {
                continue;
            };
            match parse_pid(&content) {
                Some(holder) if is_process_alive(holder) => {
                    return Err(Error::LockHeld { pid: Some(holder) })
                }
                holder => {
                    warn!(
                        "Taking over stale PID file {:?} (recorded PID {:?})",
                        self.path, holder
                    );
                    self.remove_stale(&content)?;
                }
            }
        }
        Err(Error::LockHeld { pid: None })
    }

    /// Polls [`Self::acquire`] every `poll_interval` until the lock is free.
    pub fn acquire_blocking(&self, poll_interval: Duration) -> Result<LockGuard> {
        loop {
            match self.acquire() {
                Err(e) if e.kind() == ErrorKind::LockHeld => {
                    debug!("{}, retrying in {:?}", e, poll_interval);
                    std::thread::sleep(poll_interval);
                }
                res => return res,
            }
        }
    }

    /// Publishes a fully written PID file under the lock path, failing if one exists.
    fn try_create(&self, pid: u32) -> Result<bool> {
        let tmp = sibling(&self.path, "tmp");
        fs::write(&tmp, pid.to_string())
            .map_err(Error::from)
            .with_msg(format!("Writing PID file {:?} failed", tmp))?;
        let res = fs::hard_link(&tmp, &self.path);
        remove_if_exists(&tmp)?;
        match res {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(Error::from(e).with_msg(format!("Creating PID file {:?} failed", self.path))),
        }
    }

    /// Moves the stale file aside and deletes it, unless someone replaced it
    /// with a live one meanwhile, in which case it is put back.
    fn remove_stale(&self, expected: &str) -> Result<()> {
        let tombstone = sibling(&self.path, "stale");
        match fs::rename(&self.path, &tombstone) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        if read_pid_file(&tombstone)?.as_deref() != Some(expected) {
            return put_back(&tombstone, &self.path);
        }
        remove_if_exists(&tombstone)?;
        Ok(())
    }
}

/// Returns a live PID file moved aside by mistake to `path`.
///
/// If another process created a lock file in the meantime, the moved file
/// stays at `tombstone` and the lock counts as held.
fn put_back(tombstone: &Path, path: &Path) -> Result<()> {
    match fs::hard_link(tombstone, path) {
        Ok(()) => Ok(remove_if_exists(tombstone)?),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            let holder = read_pid_file(tombstone)?.as_deref().and_then(parse_pid);
            warn!(
                "PID file {:?} was replaced while taking it over, leaving {:?} in place",
                path, tombstone
            );
            Err(Error::LockHeld { pid: holder })
        }
        Err(e) => Err(Error::from(e).with_msg(format!("Restoring PID file {:?} failed", path))),
    }
}

/// Held lock; the PID file is removed on drop.
pub struct LockGuard {
    path: Arc<Path>,
    pid: u32,
    released: bool,
}

impl Debug for LockGuard {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "<LockGuard {:?} held by {}>", self.path, self.pid)
    }
}

impl LockGuard {
    /// Removes the PID file, failing with `NotLocked` if it no longer records us.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.unlock()
    }

    fn unlock(&self) -> Result<()> {
        match read_pid_file(&self.path)?.as_deref().and_then(parse_pid) {
            Some(pid) if pid as i64 == self.pid as i64 => {
                fs::remove_file(&self.path)?;
                debug!("Released {:?}", self.path);
                Ok(())
            }
            _ => Err(Error::NotLocked(self.path.to_path_buf())),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.unlock() {
                warn!("Releasing process lock failed: {}", e);
            }
        }
    }
}
