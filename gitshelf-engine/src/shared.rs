/* This Source Code Form is subject to the terms of the Mozilla Public
License, v. 2.0. If a copy of the MPL was not distributed with this
file, You can obtain one at https://mozilla.org/MPL/2.0/. */

/*! shared things that are used in more than one module */
use log::trace;

#[macro_export]
macro_rules! shelf_error {
    ($msg:expr) => {
        $crate::ShelfError::new(&format!(
            "error {} at {}:{}:{}",
            $msg,
            file!(),
            line!(),
            column!()
        ))
    };
}

quick_error! {
#[derive(Debug)]
/** Error found in the record store */
pub enum ShelfError {
    /// the id is not acceptable
    InvalidId(id: String, reason: String) {
        display("invalid id {:?}: {}", id, reason)
    }
    /// the name is not acceptable
    InvalidName(name: String, reason: String) {
        display("invalid name {:?}: {}", name, reason)
    }
    /// an extra field uses the name of a record field
    ReservedField(key: String) {
        display("{:?} is a record field and cannot be set as an extra field", key)
    }
    /// another record already has this id
    DuplicateId(id: String) {
        display("a record with id {:?} already exists", id)
    }
    /// another record already has this name (ignoring case)
    DuplicateName(name: String) {
        display("a record named {:?} already exists", name)
    }
    /// no record has this id
    NotFound(id: String) {
        display("no record with id {:?}", id)
    }
    /// the document on disk is not a valid collection
    Document(path: String, reason: String) {
        display("bad document {}: {}", path, reason)
    }
    /// invalid or missing configuration
    Config(text: String) {
        display("configuration error: {}", text)
    }
    /// replication setup error
    Sync(err: gitshelf_git::SyncError) {
        from()
        source(err)
        display("replication error: {}", err)
    }
    /// internal IO error
    Io(err: std::io::Error) {
        from()
        source(err)
        display("io error: {}", err)
    }
    Yaml(err: serde_yaml::Error) {
        from()
        source(err)
        display("yaml error: {}", err)
    }
    Regex(err: regex::Error) {
        from()
        source(err)
        display("regex error: {}", err)
    }
    /// error in the engine
    Engine(msg: String) {
        from()
        display("{}", msg)
    }
} }
impl ShelfError {
    pub fn new(txt: &str) -> ShelfError {
        ShelfError::Engine(txt.to_string())
    }
    /** whether the error was a rejected request, found before anything was written */
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ShelfError::InvalidId(_, _)
                | ShelfError::InvalidName(_, _)
                | ShelfError::ReservedField(_)
                | ShelfError::DuplicateId(_)
                | ShelfError::DuplicateName(_)
        )
    }
    pub fn is_not_found(&self) -> bool {
        matches!(self, ShelfError::NotFound(_))
    }
}
/// [Result] type for this package
pub type FLResult<T> = std::result::Result<T, ShelfError>;

pub type NullResult = Result<(), ShelfError>;

/** output start and end messages */
pub struct Tracer {
    descr: String,
}
impl Tracer {
    pub fn new(descr: &str, loc: &str) -> Self {
        trace!("starting {} at {}", descr, loc);
        Self {
            descr: descr.to_owned(),
        }
    }
}
impl Drop for Tracer {
    fn drop(&mut self) {
        trace!("{} done.", self.descr);
    }
}
#[macro_export]
macro_rules! shelf_trace {
    ($descr:expr) => {
        let _tracer = $crate::Tracer::new($descr, concat!(file!(), ":", line!()));
    };
}
