// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lifecycle handling for the background threads that feed the RIB event
//! loop (idle timers and the like).

use crate::lock;
use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::{Builder, JoinHandle},
};

/// Status of a managed child thread.
#[derive(Debug, Default)]
pub enum ThreadState {
    #[default]
    Ready,
    Running(JoinHandle<()>),
}

impl ThreadState {
    pub fn is_running(&self) -> bool {
        matches!(self, ThreadState::Running(_))
    }
}

/// A background thread bundled with its stop flag. The thread body receives
/// the flag and is expected to poll it; dropping the `ManagedThread` raises
/// the flag and joins the thread.
#[derive(Debug, Default)]
pub struct ManagedThread {
    state: Mutex<ThreadState>,
    stop: Arc<AtomicBool>,
}

impl ManagedThread {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `body` on a named thread. Calling this on a thread that is
    /// already running is a no-op.
    pub fn spawn<F>(&self, name: &str, body: F) -> io::Result<()>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let mut state = lock!(self.state);
        if state.is_running() {
            return Ok(());
        }
        let stop = self.stop.clone();
        let handle = Builder::new()
            .name(name.to_string())
            .spawn(move || body(stop))?;
        *state = ThreadState::Running(handle);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        lock!(self.state).is_running()
    }

    /// Raise the stop flag without waiting for the thread to exit.
    pub fn signal_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for ManagedThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);

        let mut state = lock!(self.state);
        if let ThreadState::Running(handle) =
            std::mem::replace(&mut *state, ThreadState::Ready)
        {
            drop(state);
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod test {
    use super::ManagedThread;
    use std::sync::atomic::Ordering;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    #[test]
    fn drop_stops_and_joins() {
        let (tx, rx) = channel();
        {
            let t = ManagedThread::new();
            t.spawn("test-worker", move |stop| {
                while !stop.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(5));
                }
                tx.send(()).expect("send exit");
            })
            .expect("spawn");
            assert!(t.is_running());
        }
        rx.recv_timeout(Duration::from_secs(5))
            .expect("worker exited on drop");
    }
}
