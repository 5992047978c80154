//! Fixed-capacity circular byte buffer shared between an archive producer
//! thread and the consumer draining it.
//!
//! Reads and writes are partial: a write into a full buffer stores only what
//! fits and a read from an empty buffer returns nothing. Callers retry, which
//! is how backpressure reaches the producer.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use std::fmt::{Debug, Formatter};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

struct FifoState {
    buf: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
    len: usize,
}

impl FifoState {
    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn free(&self) -> usize {
        self.capacity() - self.len
    }
}

pub struct ByteFifo {
    state: Mutex<FifoState>,
}

impl Debug for ByteFifo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ByteFifo")
            .field("capacity", &state.capacity())
            .field("len", &state.len)
            .finish()
    }
}

impl ByteFifo {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::BufferResize {
                requested: 0,
                buffered: 0,
            });
        }
        Ok(Self {
            state: Mutex::new(FifoState {
                buf: vec![0; capacity],
                read_pos: 0,
                write_pos: 0,
                len: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, FifoState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores as much of `data` as fits and returns how many bytes were taken.
    pub fn write(&self, data: &[u8]) -> usize {
        let mut state = self.lock();
        let to_write = data.len().min(state.free());
        if to_write == 0 {
            return 0;
        }

        let capacity = state.capacity();
        let write_pos = state.write_pos;
        let first = to_write.min(capacity - write_pos);
        state.buf[write_pos..write_pos + first].copy_from_slice(&data[..first]);
        let second = to_write - first;
        if second > 0 {
            state.buf[..second].copy_from_slice(&data[first..to_write]);
        }

        state.write_pos = (write_pos + to_write) % capacity;
        state.len += to_write;
        to_write
    }

    /// Takes up to `max_bytes` from the front of the buffer.
    pub fn read(&self, max_bytes: usize) -> Vec<u8> {
        let mut state = self.lock();
        let to_read = max_bytes.min(state.len);
        let mut out = Vec::with_capacity(to_read);
        if to_read == 0 {
            return out;
        }

        let capacity = state.capacity();
        let read_pos = state.read_pos;
        let first = to_read.min(capacity - read_pos);
        out.extend_from_slice(&state.buf[read_pos..read_pos + first]);
        let second = to_read - first;
        if second > 0 {
            out.extend_from_slice(&state.buf[..second]);
        }

        state.read_pos = (read_pos + to_read) % capacity;
        state.len -= to_read;
        out
    }

    pub fn len(&self) -> usize {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    pub fn free(&self) -> usize {
        self.lock().free()
    }

    /// Changes the capacity, keeping buffered bytes in order.
    pub fn resize(&self, new_size: usize) -> Result<()> {
        let mut state = self.lock();
        if new_size == 0 || new_size < state.len {
            return Err(Error::BufferResize {
                requested: new_size,
                buffered: state.len,
            });
        }

        let len = state.len;
        let capacity = state.capacity();
        let mut buf = vec![0; new_size];
        let first = len.min(capacity - state.read_pos);
        buf[..first].copy_from_slice(&state.buf[state.read_pos..state.read_pos + first]);
        buf[first..len].copy_from_slice(&state.buf[..len - first]);

        state.buf = buf;
        state.read_pos = 0;
        state.write_pos = len % new_size;
        Ok(())
    }
}

/// Blocking [`io::Write`] adapter over a shared [`ByteFifo`].
///
/// A write spins (yielding the thread) until at least one byte fits. Once the
/// abort flag is raised a write that cannot make progress fails with
/// `BrokenPipe`, since nobody is left to drain the buffer.
pub struct FifoWriter {
    fifo: Arc<ByteFifo>,
    abort: Arc<AtomicBool>,
}

impl FifoWriter {
    pub fn new(fifo: Arc<ByteFifo>, abort: Arc<AtomicBool>) -> Self {
        Self { fifo, abort }
    }
}

impl io::Write for FifoWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let written = self.fifo.write(buf);
            if written > 0 {
                return Ok(written);
            }
            if self.abort.load(Ordering::Acquire) {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "archive consumer went away",
                ));
            }
            std::thread::yield_now();
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn pattern(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(ByteFifo::new(0).is_err());
    }

    #[test]
    fn test_partial_write_when_full() {
        let fifo = ByteFifo::new(8).unwrap();
        assert_eq!(fifo.write(&[1; 5]), 5);
        assert_eq!(fifo.free(), 3);
        assert_eq!(fifo.write(&[2; 5]), 3);
        assert_eq!(fifo.write(&[3; 1]), 0);
        assert_eq!(fifo.len(), 8);
        assert_eq!(fifo.read(100), vec![1, 1, 1, 1, 1, 2, 2, 2]);
        assert!(fifo.is_empty());
        assert!(fifo.read(4).is_empty());
    }

    #[test]
    fn test_wrap_around_preserves_order() {
        let fifo = ByteFifo::new(7).unwrap();
        let data = pattern(1000);
        let write_sizes = [3usize, 5, 1, 7, 2];
        let read_sizes = [4usize, 1, 6, 2];
        let mut written = 0;
        let mut out = Vec::new();
        let mut step = 0;
        while out.len() < data.len() {
            if written < data.len() {
                let end = (written + write_sizes[step % write_sizes.len()]).min(data.len());
                written += fifo.write(&data[written..end]);
            }
            out.extend(fifo.read(read_sizes[step % read_sizes.len()]));
            step += 1;
        }
        assert_eq!(out, data);
    }

    #[test]
    fn test_resize_keeps_buffered_bytes() {
        let fifo = ByteFifo::new(6).unwrap();
        fifo.write(&[1, 2, 3, 4]);
        fifo.read(3);
        fifo.write(&[5, 6, 7, 8]);
        assert_eq!(fifo.len(), 5);

        fifo.resize(10).unwrap();
        assert_eq!(fifo.capacity(), 10);
        assert_eq!(fifo.write(&[9, 10]), 2);
        assert_eq!(fifo.read(100), vec![4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_resize_rejects_too_small() {
        let fifo = ByteFifo::new(6).unwrap();
        fifo.write(&[1, 2, 3, 4]);
        assert!(matches!(
            fifo.resize(3),
            Err(Error::BufferResize {
                requested: 3,
                buffered: 4
            })
        ));
        assert!(fifo.resize(0).is_err());
        fifo.resize(4).unwrap();
        assert_eq!(fifo.free(), 0);
        assert_eq!(fifo.read(4), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_writer_thread_round_trip() {
        let fifo = Arc::new(ByteFifo::new(16).unwrap());
        let abort = Arc::new(AtomicBool::new(false));
        let data = pattern(10_000);
        let expected = data.clone();

        let producer_fifo = fifo.clone();
        let producer_abort = abort.clone();
        let handle = std::thread::spawn(move || {
            let mut writer = FifoWriter::new(producer_fifo, producer_abort);
            for chunk in data.chunks(37) {
                writer.write_all(chunk).unwrap();
            }
        });

        let mut out = Vec::new();
        while out.len() < expected.len() {
            out.extend(fifo.read(11));
            std::thread::yield_now();
        }
        handle.join().unwrap();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_writer_fails_when_aborted_and_full() {
        let fifo = Arc::new(ByteFifo::new(4).unwrap());
        let abort = Arc::new(AtomicBool::new(true));
        let mut writer = FifoWriter::new(fifo.clone(), abort);
        assert_eq!(writer.write(&[1, 2, 3]).unwrap(), 3);
        let err = writer.write_all(&[4, 5, 6]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
