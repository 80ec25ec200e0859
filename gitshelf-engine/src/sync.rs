/* This Source Code Form is subject to the terms of the Mozilla Public
License, v. 2.0. If a copy of the MPL was not distributed with this
file, You can obtain one at https://mozilla.org/MPL/2.0/. */

/*! background replication of the document.

A [`SyncMachine`] owns one worker thread, which owns the
[`Synchronizer`]. Local writes call [`SyncMachine::trigger`], which never
waits for the remote. The machine is in one of three states:

* idle: nothing known to be unreplicated
* syncing: an attempt is in flight
* pending retry: the last attempt failed, a snapshot is kept and a retry
  is scheduled

A trigger while syncing is dropped, not queued. A failed attempt started
by a write is retried after [`RetryPolicy::initial`]; a failed retry is
retried after [`RetryPolicy::subsequent`], for as long as the machine
runs. Each retry re-reads the document from disk. */
use crate::document::DocumentStore;
use crate::record::Collection;
use crate::shared::FLResult;
use chrono::{DateTime, Utc};
use gitshelf_git::Synchronizer;
use log::{debug, info, trace, warn};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/** delays before retrying a failed sync */
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /** after a failed attempt that was started by a write */
    pub initial: Duration,
    /** after a failed retry */
    pub subsequent: Duration,
}
impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(30),
            subsequent: Duration::from_secs(5 * 60),
        }
    }
}

/** what callers can see of the replication state */
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub has_pending_changes: bool,
    pub sync_in_progress: bool,
    pub last_sync_attempt: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct SyncState {
    syncing: bool,
    /** the collection as it was when the last attempt failed */
    pending: Option<Collection>,
    last_attempt_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    next_retry_at: Option<DateTime<Utc>>,
}

struct Shared {
    state: Mutex<SyncState>,
    /** signalled whenever an attempt finishes */
    idle: Condvar,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Attempt {
    Write,
    Retry,
}

enum Command {
    Sync { attempt: Attempt, message: String },
    RetryDue,
    Shutdown,
}

/** the replication state machine for one document */
pub struct SyncMachine {
    shared: Arc<Shared>,
    sender: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}
impl SyncMachine {
    /** start the worker thread */
    pub fn start(
        store: DocumentStore,
        synchronizer: Box<dyn Synchronizer>,
        policy: RetryPolicy,
    ) -> FLResult<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(SyncState::default()),
            idle: Condvar::new(),
        });
        let (sender, receiver) = channel();
        debug!(
            "starting sync worker for {} ({:?})",
            synchronizer.trace_descr(),
            &policy
        );
        let worker = Worker {
            shared: shared.clone(),
            store,
            synchronizer,
            policy,
            receiver,
            retry_at: None,
        };
        let handle = thread::Builder::new()
            .name("gitshelf-sync".to_owned())
            .spawn(move || worker.run())?;
        Ok(Self {
            shared,
            sender,
            worker: Some(handle),
        })
    }
    /** start an attempt unless one is in flight. Returns whether an attempt was started. */
    pub fn trigger(&self, message: &str) -> bool {
        let mut state = self.shared.state.lock();
        if state.syncing {
            debug!("sync in progress, dropping trigger ({})", message);
            return false;
        }
        if self.worker.is_none() {
            warn!("sync worker stopped, not replicating ({})", message);
            return false;
        }
        state.syncing = true;
        let command = Command::Sync {
            attempt: Attempt::Write,
            message: message.to_owned(),
        };
        if self.sender.send(command).is_err() {
            warn!("sync worker gone, not replicating ({})", message);
            state.syncing = false;
            return false;
        }
        true
    }
    pub fn status(&self) -> SyncStatus {
        let state = self.shared.state.lock();
        SyncStatus {
            has_pending_changes: state.pending.is_some(),
            sync_in_progress: state.syncing,
            last_sync_attempt: state.last_attempt_at,
            last_error: state.last_error.clone(),
            next_retry_at: state.next_retry_at,
        }
    }
    /** the snapshot kept from the last failed attempt */
    pub fn pending_snapshot(&self) -> Option<Collection> {
        self.shared.state.lock().pending.clone()
    }
    /** wait until no attempt is in flight. Returns false on timeout. */
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.syncing {
            if self.shared.idle.wait_until(&mut state, deadline).timed_out() {
                return !state.syncing;
            }
        }
        true
    }
    /** stop the worker once any attempt in flight (or already queued) has finished. Scheduled retries are dropped. */
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.worker.take() {
            trace!("stopping sync worker");
            let _ = self.sender.send(Command::Shutdown);
            if handle.join().is_err() {
                warn!("sync worker panicked");
            }
            if self.shared.state.lock().pending.is_some() {
                warn!("sync worker stopped with unreplicated changes");
            }
        }
    }
}
impl Drop for SyncMachine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/** runs attempts on the background thread */
struct Worker {
    shared: Arc<Shared>,
    store: DocumentStore,
    synchronizer: Box<dyn Synchronizer>,
    policy: RetryPolicy,
    receiver: Receiver<Command>,
    /** when the scheduled retry is due */
    retry_at: Option<Instant>,
}
impl Worker {
    fn run(mut self) {
        trace!("sync worker running");
        while let Some(command) = self.next_command() {
            match command {
                Command::Sync { attempt, message } => self.attempt(attempt, &message),
                Command::RetryDue => self.retry(),
                Command::Shutdown => break,
            }
        }
        trace!("sync worker done");
    }
    /** wait for the next command, or for the retry to fall due. None once the machine has gone. */
    fn next_command(&mut self) -> Option<Command> {
        match self.retry_at {
            None => self.receiver.recv().ok(),
            Some(at) => {
                let now = Instant::now();
                if at <= now {
                    return Some(Command::RetryDue);
                }
                match self.receiver.recv_timeout(at - now) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => Some(Command::RetryDue),
                    Err(RecvTimeoutError::Disconnected) => None,
                }
            }
        }
    }
    fn retry(&mut self) {
        self.retry_at = None;
        {
            let mut state = self.shared.state.lock();
            if state.syncing {
                // a write got in first; its attempt is already queued
                trace!("retry superseded by a write");
                return;
            }
            if state.pending.is_none() {
                state.next_retry_at = None;
                return;
            }
            state.syncing = true;
        }
        self.attempt(Attempt::Retry, "retry unreplicated changes");
    }
    fn attempt(&mut self, attempt: Attempt, message: &str) {
        debug!("sync attempt ({:?}): {}", attempt, message);
        {
            let mut state = self.shared.state.lock();
            state.last_attempt_at = Some(Utc::now());
            state.next_retry_at = None;
        }
        let snapshot = self.store.read_collection();
        let result = match &snapshot {
            Ok(_) => self.synchronizer.sync(message).map_err(|e| e.to_string()),
            Err(e) => Err(format!("could not read document: {}", e)),
        };
        let mut state = self.shared.state.lock();
        state.syncing = false;
        match result {
            Ok(()) => {
                if state.pending.take().is_some() {
                    info!("unreplicated changes now synced");
                }
                state.last_error = None;
                self.retry_at = None;
                debug!("synced: {}", message);
            }
            Err(text) => {
                let delay = match attempt {
                    Attempt::Write => self.policy.initial,
                    Attempt::Retry => self.policy.subsequent,
                };
                warn!(
                    "sync failed ({}), retrying in {}s: {}",
                    message,
                    delay.as_secs_f64(),
                    &text
                );
                match snapshot {
                    Ok(collection) => state.pending = Some(collection),
                    // the document is unreadable; keep any earlier snapshot
                    Err(_) => {
                        let _ = state.pending.get_or_insert_with(Collection::new);
                    }
                }
                state.last_error = Some(text);
                self.retry_at = Some(Instant::now() + delay);
                state.next_retry_at = chrono::Duration::from_std(delay)
                    .ok()
                    .map(|d| Utc::now() + d);
            }
        }
        drop(state);
        self.shared.idle.notify_all();
    }
}
