/* This Source Code Form is subject to the terms of the Mozilla Public
License, v. 2.0. If a copy of the MPL was not distributed with this
file, You can obtain one at https://mozilla.org/MPL/2.0/. */

/*!

The `gitshelf_engine` crate keeps small collections of named records in
a YAML document and replicates the document to a git repository.

## Records

Each [`Record`] has an `id`, a `name` and an `isActive` flag. Other
fields are kept untouched, so one engine serves many kinds of record
(tags, categories, ...), one document per kind.

## Writes and replication

A [`RecordRepository`] applies each change to the local document first
and reports success as soon as the document has been written. It then
asks its [`sync::SyncMachine`] to replicate the document in the
background. Failed replication is retried; its state is visible through
[`RecordRepository::sync_status`].

The engine contains the following modules:

* [`document`] -- reads and writes the whole collection
* [`record`] -- the record types and their validation
* [`repository`] -- the CRUD operations
* [`shared`] -- errors and tracing
* [`sync`] -- background replication and retries

*/
#[macro_use]
extern crate quick_error;
pub extern crate gitshelf_git;

pub mod document;
pub mod record;
pub mod repository;
#[macro_use]
pub mod shared;
pub mod sync;

pub use crate::document::DocumentStore;
pub use crate::record::{
    Collection, Record, RecordInput, RecordPatch, MAX_ID_LENGTH, MAX_NAME_LENGTH,
};
pub use crate::repository::RecordRepository;
pub use crate::shared::{FLResult, NullResult, ShelfError, Tracer};
pub use crate::sync::{RetryPolicy, SyncMachine, SyncStatus};
use gitshelf_git::{SyncError, SyncOptions};
use log::trace;

/** everything needed to open a [`RecordRepository`] */
#[derive(Debug, Clone)]
pub struct ShelfOptions {
    /** kind of record, used in commit messages */
    pub kind: String,
    /** where the document lives and how it is replicated */
    pub sync_options: SyncOptions,
    pub retry_policy: RetryPolicy,
}
impl ShelfOptions {
    pub fn new(kind: &str, sync_options: SyncOptions) -> Self {
        Self {
            kind: kind.to_owned(),
            sync_options,
            retry_policy: RetryPolicy::default(),
        }
    }
    /** check the options before anything is opened */
    pub fn validate(&self) -> NullResult {
        trace!("validating options for {}", &self.kind);
        if self.kind.trim().is_empty() {
            return Err(ShelfError::Config("kind must not be empty".to_owned()));
        }
        self.sync_options.validate().map_err(config_error)
    }
}

/** a replication setup error found while opening */
pub(crate) fn config_error(err: SyncError) -> ShelfError {
    match err {
        SyncError::Config(text) => ShelfError::Config(text),
        e if e.is_config() => ShelfError::Config(e.to_string()),
        e => ShelfError::from(e),
    }
}
