// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A worker thread for the deferred autoconfiguration tasks.
//!
//! Hand a [`WorkerSignal`] to the subsystem as its [`TaskNotify`]
//! provider and give a clone of it to [`Worker::spawn()`]. Every kick
//! wakes the worker, which then drains the task queue with the
//! subsystem lock dropped around each call into the address manager.

use super::Nd;
use crate::ddi::sync::KCondvar;
use crate::ddi::sync::KMutex;
use crate::provider::TaskNotify;
use alloc::sync::Arc;
use std::io;
use std::thread;
use std::thread::JoinHandle;

#[derive(Default)]
struct SignalState {
    kicked: bool,
    shutdown: bool,
}

#[derive(Default)]
struct SignalInner {
    state: KMutex<SignalState>,
    cv: KCondvar,
}

/// The wakeup channel between the subsystem and its worker.
#[derive(Clone, Default)]
pub struct WorkerSignal {
    inner: Arc<SignalInner>,
}

impl WorkerSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until kicked. Returns `false` once the worker should
    /// exit.
    fn wait(&self) -> bool {
        let mut state = self.inner.state.lock();
        while !state.kicked && !state.shutdown {
            state = self.inner.cv.wait(state);
        }
        state.kicked = false;
        !state.shutdown
    }

    fn shutdown(&self) {
        self.inner.state.lock().shutdown = true;
        self.inner.cv.notify_all();
    }
}

impl TaskNotify for WorkerSignal {
    fn kick(&self) {
        self.inner.state.lock().kicked = true;
        self.inner.cv.notify_one();
    }
}

/// A thread running [`Nd::run_tasks()`] whenever it is kicked. The
/// thread is stopped and joined on drop.
pub struct Worker {
    signal: WorkerSignal,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(nd: Arc<Nd>, signal: WorkerSignal) -> io::Result<Self> {
        let sig = signal.clone();
        let handle =
            thread::Builder::new().name("nd6-task".into()).spawn(move || {
                // Anything queued before the worker existed.
                nd.run_tasks();
                while sig.wait() {
                    nd.run_tasks();
                }
            })?;

        Ok(Self { signal, handle: Some(handle) })
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.signal.shutdown();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
