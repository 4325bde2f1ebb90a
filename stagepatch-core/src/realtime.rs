//! State shared between the control thread and the audio callback.
//!
//! The control side may block. The realtime side never does: it uses
//! `try_lock` and, if the control side holds the lock, drops the unit of
//! work (a MIDI batch or an audio block) and counts the drop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

pub struct RtShared<T> {
    inner: Arc<Mutex<T>>,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for RtShared<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            dropped: Arc::clone(&self.dropped),
        }
    }
}

impl<T> RtShared<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(value)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Control side: blocking lock.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }

    /// Control side: run `f` under the lock.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Realtime side: run `f` only if the lock is free right now.
    /// Returns `None` (and counts a drop) on contention.
    pub fn try_with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        match self.inner.try_lock() {
            Some(mut guard) => Some(f(&mut guard)),
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Units of work dropped on the realtime side so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn try_with_runs_when_uncontended() {
        let shared = RtShared::new(1);
        assert_eq!(shared.try_with(|v| *v + 1), Some(2));
        assert_eq!(shared.dropped(), 0);
    }

    #[test]
    fn try_with_returns_immediately_under_held_lock() {
        let shared = RtShared::new(0u32);
        let control = shared.clone();
        let (locked_tx, locked_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            let mut guard = control.lock();
            *guard = 5;
            locked_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        });

        locked_rx.recv().unwrap();
        let start = Instant::now();
        let result = shared.try_with(|v| *v);
        let elapsed = start.elapsed();
        release_tx.send(()).unwrap();
        handle.join().unwrap();

        assert_eq!(result, None);
        assert!(elapsed < Duration::from_millis(1), "realtime read blocked for {:?}", elapsed);
        assert_eq!(shared.dropped(), 1);
        assert_eq!(shared.try_with(|v| *v), Some(5));
    }
}
