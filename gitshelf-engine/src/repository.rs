/* This Source Code Form is subject to the terms of the Mozilla Public
License, v. 2.0. If a copy of the MPL was not distributed with this
file, You can obtain one at https://mozilla.org/MPL/2.0/. */

/*! the CRUD façade over one collection */
use crate::document::DocumentStore;
use crate::record::{
    name_key, name_taken, validate_extra, validate_id, validate_name, Collection, Record,
    RecordInput, RecordPatch, ID_PATTERN,
};
use crate::shared::{FLResult, NullResult, ShelfError};
use crate::sync::{RetryPolicy, SyncMachine, SyncStatus};
use crate::{config_error, shelf_trace, ShelfOptions};
use gitshelf_git::{GitSynchronizer, Synchronizer};
use log::{debug, trace};
use regex::Regex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/** the records of one kind.

Every change loads the whole collection, checks the request, writes the
whole collection back and then asks the [`SyncMachine`] to replicate it.
A change has succeeded once the local write has; replication failures
only show in [`RecordRepository::sync_status`]. */
pub struct RecordRepository {
    /** kind of record, e.g. "tags" */
    kind: String,
    store: DocumentStore,
    sync: SyncMachine,
    id_pattern: Regex,
}
impl RecordRepository {
    /** open a repository replicated with git as configured */
    pub fn open(opts: &ShelfOptions) -> FLResult<Self> {
        shelf_trace!(&format!("opening {} repository", &opts.kind));
        opts.validate()?;
        let synchronizer = GitSynchronizer::open(&opts.sync_options).map_err(config_error)?;
        let store = DocumentStore::new(&opts.sync_options.work_dir, &opts.sync_options.file_name);
        Self::with_synchronizer(
            &opts.kind,
            store,
            Box::new(synchronizer),
            opts.retry_policy.clone(),
        )
    }
    /** open a repository replicated by any [`Synchronizer`] */
    pub fn with_synchronizer(
        kind: &str,
        store: DocumentStore,
        synchronizer: Box<dyn Synchronizer>,
        policy: RetryPolicy,
    ) -> FLResult<Self> {
        // creates the document if it is missing
        let existing = store.read_collection()?;
        trace!("{} {} found in {:?}", existing.len(), kind, store.path());
        let sync = SyncMachine::start(store.clone(), synchronizer, policy)?;
        Ok(Self {
            kind: kind.to_owned(),
            store,
            sync,
            id_pattern: Regex::new(ID_PATTERN)?,
        })
    }
    pub fn kind(&self) -> &str {
        &self.kind
    }
    pub fn document_path(&self) -> PathBuf {
        self.store.path()
    }
    /* ### Reading */
    /** all records, in order */
    pub fn list(&self) -> FLResult<Collection> {
        self.store.read_collection()
    }
    pub fn find_by_id(&self, id: &str) -> FLResult<Option<Record>> {
        Ok(self.list()?.into_iter().find(|r| r.id == id))
    }
    /** find by name, ignoring case and surrounding space */
    pub fn find_by_name(&self, name: &str) -> FLResult<Option<Record>> {
        let key = name_key(name);
        Ok(self.list()?.into_iter().find(|r| name_key(&r.name) == key))
    }
    /* ### Changing */
    /** add a record at the end of the collection */
    pub fn create(&mut self, input: RecordInput) -> FLResult<Record> {
        shelf_trace!(&format!("creating {} {:?}", &self.kind, &input.id));
        let id = validate_id(&self.id_pattern, &input.id)?;
        let name = validate_name(&input.name)?;
        validate_extra(&input.extra)?;
        let mut collection = self.store.read_collection()?;
        if collection.iter().any(|r| r.id == id) {
            return Err(ShelfError::DuplicateId(id));
        }
        if name_taken(&collection, &name, None) {
            return Err(ShelfError::DuplicateName(name));
        }
        let record = Record {
            id,
            name,
            is_active: input.is_active,
            extra: input.extra,
        };
        collection.push(record.clone());
        self.save(&collection, &format!("create {} {}", &self.kind, &record.id))?;
        Ok(record)
    }
    /** change a record; its id never changes */
    pub fn update(&mut self, id: &str, patch: RecordPatch) -> FLResult<Record> {
        shelf_trace!(&format!("updating {} {:?}", &self.kind, id));
        validate_extra(&patch.extra)?;
        let mut collection = self.store.read_collection()?;
        let pos = collection
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| ShelfError::NotFound(id.to_owned()))?;
        if let Some(other) = &patch.id {
            if other != id {
                debug!("ignoring id {:?} in update of {:?}", other, id);
            }
        }
        let name = match &patch.name {
            Some(n) => {
                let n = validate_name(n)?;
                if name_taken(&collection, &n, Some(id)) {
                    return Err(ShelfError::DuplicateName(n));
                }
                Some(n)
            }
            None => None,
        };
        patch.apply_to(&mut collection[pos], name);
        let record = collection[pos].clone();
        self.save(&collection, &format!("update {} {}", &self.kind, id))?;
        Ok(record)
    }
    pub fn delete(&mut self, id: &str) -> NullResult {
        shelf_trace!(&format!("deleting {} {:?}", &self.kind, id));
        let mut collection = self.store.read_collection()?;
        let pos = collection
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| ShelfError::NotFound(id.to_owned()))?;
        let _ = collection.remove(pos);
        self.save(&collection, &format!("delete {} {}", &self.kind, id))
    }
    /** put the records in the order given. Records not mentioned keep
    their relative order after those that are; unknown or repeated ids
    are ignored. */
    pub fn reorder(&mut self, ids: &[String]) -> NullResult {
        shelf_trace!(&format!("reordering {}", &self.kind));
        let collection = self.store.read_collection()?;
        let reordered = reorder_records(&collection, ids);
        if reordered == collection {
            trace!("order unchanged, nothing to write");
            return Ok(());
        }
        self.save(&reordered, &format!("reorder {}", &self.kind))
    }
    /** write locally, then ask for replication */
    fn save(&mut self, collection: &[Record], message: &str) -> NullResult {
        self.store.write_collection(collection)?;
        let _started = self.sync.trigger(message);
        Ok(())
    }
    /* ### Replication */
    pub fn sync_status(&self) -> SyncStatus {
        self.sync.status()
    }
    /** replicate now, unless an attempt is already in flight */
    pub fn sync_now(&self) -> bool {
        self.sync.trigger(&format!("sync {}", &self.kind))
    }
    /** wait for an attempt in flight to finish. Returns false on timeout. */
    pub fn wait_for_sync(&self, timeout: Duration) -> bool {
        self.sync.wait_until_idle(timeout)
    }
    /** stop background replication; scheduled retries are dropped */
    pub fn shutdown(&mut self) {
        self.sync.shutdown();
    }
}

/** the records in the order of `ids`, followed by the others */
pub(crate) fn reorder_records(collection: &[Record], ids: &[String]) -> Collection {
    let mut placed: HashSet<&str> = HashSet::new();
    let mut result = Collection::with_capacity(collection.len());
    for id in ids {
        if placed.contains(id.as_str()) {
            continue;
        }
        if let Some(r) = collection.iter().find(|r| &r.id == id) {
            let _ = placed.insert(r.id.as_str());
            result.push(r.clone());
        }
    }
    result.extend(
        collection
            .iter()
            .filter(|r| !placed.contains(r.id.as_str()))
            .cloned(),
    );
    result
}
