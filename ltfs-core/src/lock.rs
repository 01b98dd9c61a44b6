//! Multi-reader/single-writer lock with a "long lock" writer mode (C2).
//!
//! Adapted from [`ltfs_tools::process_locker::ProcessLocker`]'s guard/`Drop`
//! idiom -- that lock serializes *processes* via `fcntl`; this one serializes
//! *threads* within one process via [`std::sync::{Mutex, Condvar}`] and adds
//! the long-writer/short-reader-rejection behavior the index commit path
//! needs (spec §4.2).
//!
//! Three mutexes, acquired in this order relative to each other:
//! - `write_exclusive`: held for the whole duration of any writer (long or
//!   short), and by the first reader to arrive while no writer holds it.
//! - `reading`: held by the first concurrent reader; later readers only
//!   bump the reader count.
//! - `state`: a small mutex guarding `readers` and `long_lock`, never held
//!   across a blocking acquire of the other two.

use std::sync::{Condvar, Mutex, MutexGuard};

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapeLockError {
    /// A long writer is active or pending; `acquire_read_short` refuses to
    /// wait for it the way `acquire_read` would.
    #[error("long lock active")]
    LongLock,
    /// `try_acquire_write` found the lock already held.
    #[error("lock busy")]
    WouldBlock,
}

struct State {
    readers: usize,
    long_lock: bool,
}

/// The lock itself. Wrap in `Arc` to share across threads.
pub struct IndexLock {
    state: Mutex<State>,
    state_changed: Condvar,
    write_exclusive: Mutex<()>,
    reading: Mutex<()>,
}

impl Default for IndexLock {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                readers: 0,
                long_lock: false,
            }),
            state_changed: Condvar::new(),
            write_exclusive: Mutex::new(()),
            reading: Mutex::new(()),
        }
    }

    fn wait_not_long_locked<'a>(&'a self, mut guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        while guard.long_lock {
            guard = self.state_changed.wait(guard).unwrap();
        }
        guard
    }
}

/// RAII guard for a read acquisition. Dropping it releases the reader slot,
/// and the `reading` mutex if this was the last reader.
pub struct ReadGuard<'a> {
    lock: &'a IndexLock,
    /// Held only by the reader that first acquired `write_exclusive`/`reading`.
    write_exclusive: Option<MutexGuard<'a, ()>>,
    reading: Option<MutexGuard<'a, ()>>,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock().unwrap();
        state.readers -= 1;
        if state.readers == 0 {
            // dropping self.reading / self.write_exclusive below releases them
        }
        drop(state);
        self.reading.take();
        self.write_exclusive.take();
        self.lock.state_changed.notify_all();
    }
}

/// RAII guard for a write acquisition, short or long.
pub struct WriteGuard<'a> {
    lock: &'a IndexLock,
    write_exclusive: Option<MutexGuard<'a, ()>>,
    reading: Option<MutexGuard<'a, ()>>,
    long: bool,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock().unwrap();
        if self.long {
            state.long_lock = false;
        }
        drop(state);
        self.reading.take();
        self.write_exclusive.take();
        self.lock.state_changed.notify_all();
    }
}

impl IndexLock {
    /// Block until a read lock is available, waiting out any active or
    /// pending long writer.
    pub fn acquire_read(&self) -> ReadGuard<'_> {
        let mut state = self.state.lock().unwrap();
        state = self.wait_not_long_locked(state);

        state.readers += 1;
        let first_reader = state.readers == 1;
        drop(state);

        let (write_exclusive, reading) = if first_reader {
            (
                Some(self.write_exclusive.lock().unwrap()),
                Some(self.reading.lock().unwrap()),
            )
        } else {
            (None, None)
        };

        ReadGuard {
            lock: self,
            write_exclusive,
            reading,
        }
    }

    /// Like [`Self::acquire_read`], but fails immediately with
    /// [`TapeLockError::LongLock`] instead of waiting if a long writer is
    /// active or pending.
    pub fn acquire_read_short(&self) -> Result<ReadGuard<'_>, TapeLockError> {
        let mut state = self.state.lock().unwrap();
        if state.long_lock {
            return Err(TapeLockError::LongLock);
        }

        state.readers += 1;
        let first_reader = state.readers == 1;
        drop(state);

        let (write_exclusive, reading) = if first_reader {
            (
                Some(self.write_exclusive.lock().unwrap()),
                Some(self.reading.lock().unwrap()),
            )
        } else {
            (None, None)
        };

        Ok(ReadGuard {
            lock: self,
            write_exclusive,
            reading,
        })
    }

    fn acquire_write_inner(&self, long: bool) -> WriteGuard<'_> {
        if long {
            let mut state = self.state.lock().unwrap();
            state.long_lock = true;
            drop(state);
        }

        let write_exclusive = self.write_exclusive.lock().unwrap();
        let reading = self.reading.lock().unwrap();

        WriteGuard {
            lock: self,
            write_exclusive: Some(write_exclusive),
            reading: Some(reading),
            long,
        }
    }

    /// Block until a plain (short) write lock is available.
    pub fn acquire_write(&self) -> WriteGuard<'_> {
        self.acquire_write_inner(false)
    }

    /// Block until a write lock is available, setting the long-lock bit
    /// first so that new `acquire_read_short` callers start failing
    /// immediately rather than queueing behind this writer.
    pub fn acquire_write_long(&self) -> WriteGuard<'_> {
        self.acquire_write_inner(true)
    }

    /// Non-blocking write acquisition.
    pub fn try_acquire_write(&self) -> Result<WriteGuard<'_>, TapeLockError> {
        let write_exclusive = self
            .write_exclusive
            .try_lock()
            .map_err(|_| TapeLockError::WouldBlock)?;
        let reading = self
            .reading
            .try_lock()
            .map_err(|_| TapeLockError::WouldBlock)?;

        Ok(WriteGuard {
            lock: self,
            write_exclusive: Some(write_exclusive),
            reading: Some(reading),
            long: false,
        })
    }

    /// Downgrade a write guard to a read guard. Releases `reading` before
    /// `write_exclusive`: a reader blocked in `acquire_read` has already
    /// bumped `readers` and is waiting on `write_exclusive.lock()`, so
    /// `write_exclusive` must still be held when `reading` lets go, or that
    /// reader would grab `write_exclusive` and then block forever on
    /// `reading`, which this guard would still be holding.
    pub fn downgrade_write_to_read<'a>(&'a self, mut guard: WriteGuard<'a>) -> ReadGuard<'a> {
        let mut state = self.state.lock().unwrap();
        state.readers += 1;
        if guard.long {
            state.long_lock = false;
        }
        drop(state);
        self.state_changed.notify_all();

        // Order matters: drop `reading` first, then `write_exclusive`.
        guard.reading.take();
        guard.write_exclusive.take();
        // defuse WriteGuard::drop: it already performed the state update.
        guard.long = false;
        std::mem::forget(guard);

        ReadGuard {
            lock: self,
            write_exclusive: None,
            reading: None,
        }
    }

    pub fn release_read(&self, guard: ReadGuard<'_>) {
        drop(guard);
    }

    pub fn release_write(&self, guard: WriteGuard<'_>) {
        drop(guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn read_locks_are_shared() {
        let lock = Arc::new(IndexLock::new());
        let g1 = lock.acquire_read();
        let g2 = lock.acquire_read_short().unwrap();
        drop(g1);
        drop(g2);
    }

    #[test]
    fn long_write_blocks_short_read() {
        let lock = Arc::new(IndexLock::new());
        let w = lock.acquire_write_long();
        assert_eq!(
            lock.acquire_read_short().unwrap_err(),
            TapeLockError::LongLock
        );
        drop(w);
        lock.acquire_read_short().unwrap();
    }

    #[test]
    fn downgrade_lets_blocked_reader_in() {
        let lock = Arc::new(IndexLock::new());
        let w = lock.acquire_write_long();

        let reader_done = Arc::new(AtomicBool::new(false));
        let reader_done2 = reader_done.clone();
        let lock2 = Arc::clone(&lock);
        let handle = thread::spawn(move || {
            let _g = lock2.acquire_read();
            reader_done2.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!reader_done.load(Ordering::SeqCst));

        let _r = lock.downgrade_write_to_read(w);
        handle.join().unwrap();
        assert!(reader_done.load(Ordering::SeqCst));
    }
}
