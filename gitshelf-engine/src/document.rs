/* This Source Code Form is subject to the terms of the Mozilla Public
License, v. 2.0. If a copy of the MPL was not distributed with this
file, You can obtain one at https://mozilla.org/MPL/2.0/. */

/*! the collection as one YAML document on local disk */
use crate::record::{name_key, Collection, Record};
use crate::shared::{FLResult, NullResult, ShelfError};
use crate::{shelf_error, shelf_trace};
use log::{debug, trace};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/** reads and writes a whole [`Collection`] at a time.

There is no locking: one process is assumed to own the document. */
#[derive(Debug, Clone)]
pub struct DocumentStore {
    /** the working directory */
    dir: PathBuf,
    /** the document, relative to `dir` */
    file_name: String,
}
impl DocumentStore {
    pub fn new(dir: &Path, file_name: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            file_name: file_name.to_owned(),
        }
    }
    /** full path of the document */
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
    /** path of the document within the working directory */
    pub fn file_name(&self) -> &str {
        &self.file_name
    }
    /** read the collection, creating an empty document if there is none */
    pub fn read_collection(&self) -> FLResult<Collection> {
        shelf_trace!("reading collection");
        let path = self.path();
        if !path.exists() {
            debug!("no document at {:?}, creating an empty one", &path);
            let empty = Collection::new();
            self.write_collection(&empty)?;
            return Ok(empty);
        }
        let text = slurp::read_all_to_string(&path)?;
        self.decode(&text)
    }
    /** replace the document with `collection` */
    pub fn write_collection(&self, collection: &[Record]) -> NullResult {
        shelf_trace!("writing collection");
        let path = self.path();
        let text = serde_yaml::to_string(collection)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.temp_path()?;
        fs::write(&tmp, text.as_bytes())?;
        fs::rename(&tmp, &path)?;
        trace!("wrote {} records to {:?}", collection.len(), &path);
        Ok(())
    }
    /** sibling file used while writing */
    fn temp_path(&self) -> FLResult<PathBuf> {
        let path = self.path();
        let name = path
            .file_name()
            .ok_or_else(|| shelf_error!(&format!("no file name in {:?}", &path)))?
            .to_string_lossy()
            .to_string();
        Ok(path.with_file_name(format!(".{}.tmp", name)))
    }
    /** parse and check the text of a document */
    pub(crate) fn decode(&self, text: &str) -> FLResult<Collection> {
        if text.trim().is_empty() {
            return Ok(Collection::new());
        }
        let collection: Collection = serde_yaml::from_str(text)
            .map_err(|e| self.bad_document(&e.to_string()))?;
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for record in &collection {
            if !ids.insert(record.id.as_str()) {
                return Err(self.bad_document(&format!("duplicate id {:?}", &record.id)));
            }
            if !names.insert(name_key(&record.name)) {
                return Err(self.bad_document(&format!("duplicate name {:?}", &record.name)));
            }
        }
        Ok(collection)
    }
    fn bad_document(&self, reason: &str) -> ShelfError {
        ShelfError::Document(self.path().display().to_string(), reason.to_owned())
    }
}
