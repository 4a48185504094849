// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 locmux contributors

//! Dedicated worker thread for listener fan-out.
//!
//! Enabled-state listeners run off the coarse lock on this thread so a
//! slow listener cannot stall registration churn.

use std::thread;

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;

type Job = Box<dyn FnOnce() + Send>;

pub(crate) struct Worker {
    sender: Sender<Job>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Worker {
    pub fn new(name: &str) -> Self {
        let (sender, receiver) = channel::unbounded::<Job>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    job();
                }
            })
            .expect("failed to spawn worker thread");
        Self {
            sender,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queue a job; jobs run in submission order.
    pub fn submit(&self, job: Job) {
        if self.sender.send(job).is_err() {
            log::warn!("[Worker::submit] worker already shut down, dropping job");
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Disconnect the channel so the thread drains and exits.
        let (empty_sender, _) = channel::bounded(0);
        drop(std::mem::replace(&mut self.sender, empty_sender));
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}
