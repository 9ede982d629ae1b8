// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Condvar, Mutex,
};

/// A cancel handle is handed to the audio device thread when the engine
/// starts. The device blocks on it for the life of the stream; cancelling it
/// is how the engine tears the stream down.
#[derive(Clone)]
pub struct CancelHandle {
    /// True once the owning engine has asked the device to stop.
    cancelled: Arc<Mutex<bool>>,
    /// Wakes the waiting device thread on cancel or failure.
    condvar: Arc<Condvar>,
}

impl CancelHandle {
    /// Creates a new cancel handle.
    pub fn new() -> CancelHandle {
        CancelHandle {
            cancelled: Arc::new(Mutex::new(false)),
            condvar: Arc::new(Condvar::new()),
        }
    }

    /// Returns true if the handle has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock().expect("Error getting lock")
    }

    /// Blocks until the handle is cancelled or `failed` becomes true.
    pub fn wait(&self, failed: &Arc<AtomicBool>) {
        let _unused = self
            .condvar
            .wait_while(
                self.cancelled.lock().expect("Error getting lock"),
                |cancelled| !*cancelled && !failed.load(Ordering::Relaxed),
            )
            .expect("Error getting lock");
    }

    /// Wakes any waiter so it can re-check its failure flag.
    pub fn notify(&self) {
        self.condvar.notify_all();
    }

    /// Cancels the handle, waking all waiters.
    pub fn cancel(&self) {
        let mut cancelled = self.cancelled.lock().expect("Error getting lock");
        if !*cancelled {
            *cancelled = true;
            self.condvar.notify_all();
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        CancelHandle::new()
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use super::*;

    #[test]
    fn test_cancel_wakes_waiter() {
        let cancel_handle = CancelHandle::new();
        assert!(!cancel_handle.is_cancelled());

        let join = {
            let cancel_handle = cancel_handle.clone();
            thread::spawn(move || cancel_handle.wait(&Arc::new(AtomicBool::new(false))))
        };

        cancel_handle.cancel();
        assert!(join.join().is_ok());
        assert!(cancel_handle.is_cancelled());
    }

    #[test]
    fn test_failure_wakes_waiter() {
        let cancel_handle = CancelHandle::new();
        let failed = Arc::new(AtomicBool::new(true));

        let join = {
            let cancel_handle = cancel_handle.clone();
            let failed = failed.clone();
            thread::spawn(move || cancel_handle.wait(&failed))
        };

        assert!(join.join().is_ok());
        assert!(!cancel_handle.is_cancelled());
    }
}
