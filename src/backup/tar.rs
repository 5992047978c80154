use crate::backup::byte_fifo::{ByteFifo, FifoWriter};
use crate::backup::compress::{Compression, CompressorBuilder};
use crate::backup::finish::Finish;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use std::io::{BufWriter, IntoInnerError};
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use walkdir::WalkDir;

/// Size of each chunk handed to the consumer.
pub static CHUNK_SIZE: usize = 100 * 1024;
/// Below this fill ratio the consumer yields so the producer can catch up.
static LOW_WATER_RATIO: f64 = 0.2;

#[derive(Default)]
struct ProducerState {
    done: AtomicBool,
    abort: Arc<AtomicBool>,
    error: Mutex<Option<Error>>,
}

/// Lazily produced archive, yielded in chunks of at most [`CHUNK_SIZE`] bytes.
///
/// A producer thread writes tar data into a bounded [`ByteFifo`] which
/// `next()` drains. Single use: once dropped the producer is told to stop
/// before its next entry and the stream cannot be resumed.
pub struct TarStream {
    fifo: Arc<ByteFifo>,
    state: Arc<ProducerState>,
    handle: Option<JoinHandle<()>>,
    low_water: usize,
    finished: bool,
}

impl TarStream {
    pub fn spawn<P: Into<PathBuf>>(
        root: P,
        buffer_size: usize,
        compression: Compression,
    ) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::from(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{:?} is not a directory", root),
            )));
        }

        let fifo = Arc::new(ByteFifo::new(buffer_size)?);
        let state = Arc::new(ProducerState::default());

        let producer_fifo = fifo.clone();
        let producer_state = state.clone();
        let handle = std::thread::Builder::new()
            .name("tarfile".into())
            .spawn(move || {
                let res = write_archive(&root, compression, producer_fifo, &producer_state.abort);
                if let Err(e) = res {
                    if producer_state.abort.load(Ordering::Acquire) {
                        tracing::debug!("Archive producer for {:?} stopped: {}", root, e);
                    } else {
                        *producer_state
                            .error
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner) = Some(e);
                    }
                }
                producer_state.done.store(true, Ordering::Release);
            })?;

        Ok(Self {
            fifo,
            state,
            handle: Some(handle),
            low_water: (buffer_size as f64 * LOW_WATER_RATIO) as usize,
            finished: false,
        })
    }

    fn finish(&mut self) -> Option<Result<Vec<u8>>> {
        self.finished = true;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                return Some(Err(Error::from(std::io::Error::other(
                    "archive producer thread panicked",
                ))));
            }
        }
        self.state
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(Err)
    }
}

impl Iterator for TarStream {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            let done = self.state.done.load(Ordering::Acquire);
            let data = self.fifo.read(CHUNK_SIZE);
            if self.fifo.len() < self.low_water {
                std::thread::yield_now();
            }
            if !data.is_empty() {
                return Some(Ok(data));
            }
            if done && self.fifo.is_empty() {
                return self.finish();
            }
            std::thread::yield_now();
        }
    }
}

impl FusedIterator for TarStream {}

impl Drop for TarStream {
    fn drop(&mut self) {
        if !self.finished {
            self.state.abort.store(true, Ordering::Release);
        }
    }
}

/// Producer side: walks `root` and appends every entry below it.
///
/// The abort flag is checked before each entry; an entry already being
/// written is finished unless the buffer stays full.
fn write_archive(
    root: &Path,
    compression: Compression,
    fifo: Arc<ByteFifo>,
    abort: &Arc<AtomicBool>,
) -> Result<()> {
    let writer = compression.build_compressor(BufWriter::new(FifoWriter::new(fifo, abort.clone())))?;
    let mut builder = ::tar::Builder::new(BufWriter::new(writer));
    builder.follow_symlinks(false);

    let mut entry_count = 0usize;
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        if abort.load(Ordering::Acquire) {
            return Err(Error::ArchiveAborted);
        }
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| Error::from(std::io::Error::other(e)))?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        builder
            .append_path_with_name(entry.path(), relative)
            .map_err(Error::from)
            .with_msg(format!("Adding {:?} to archive failed", entry.path()))?;
        entry_count += 1;
    }
    tracing::debug!("Archived {} entries from {:?}", entry_count, root);

    builder
        .into_inner()?
        .into_inner()
        .map_err(IntoInnerError::into_error)?
        .finish()?
        .into_inner()
        .map_err(IntoInnerError::into_error)?;
    Ok(())
}
