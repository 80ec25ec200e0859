/* This Source Code Form is subject to the terms of the Mozilla Public
License, v. 2.0. If a copy of the MPL was not distributed with this
file, You can obtain one at https://mozilla.org/MPL/2.0/. */

/*! synchronisation errors and results */
use git2::{ErrorClass, ErrorCode};
use std::fmt;

#[macro_export]
/** create an error with a string message */
macro_rules! sync_error {
    ($msg:expr) => {
        $crate::SyncError::new(&format!(
            "sync error: {} at {}:{}:{}",
            $msg,
            file!(),
            line!(),
            column!()
        ))
    };
}

/** the step of a synchronisation at which an error was found */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStep {
    Open,
    Stage,
    Commit,
    Pull,
    Push,
}
impl fmt::Display for SyncStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStep::Open => "open",
            SyncStep::Stage => "stage",
            SyncStep::Commit => "commit",
            SyncStep::Pull => "pull",
            SyncStep::Push => "push",
        };
        write!(f, "{}", s)
    }
}

quick_error! {
    #[derive(Debug)]
    /** Error found while replicating the document to the remote repository */
    pub enum SyncError {
        /// the remote refused our credentials
        Auth(step: SyncStep, err: git2::Error) {
            source(err)
            display("{} failed, authentication rejected: {}", step, err.message())
        }
        /// the remote could not be reached
        Network(step: SyncStep, err: git2::Error) {
            source(err)
            display("{} failed, network error: {}", step, err.message())
        }
        /// any other error found by git2
        Git(step: SyncStep, err: git2::Error) {
            source(err)
            display("{} failed: {}", step, err.message())
        }
        /// pulling produced a merge with conflicts
        Conflict(paths: String) {
            display("pull would conflict in: {}", paths)
        }
        /// the document changed after it was committed, so the pull left it alone
        Dirty(path: String) {
            display("{} has uncommitted changes, pull not applied", path)
        }
        /// the remote rejected the update of a reference
        Rejected(refname: String, reason: String) {
            display("push of {} rejected: {}", refname, reason)
        }
        /// invalid or missing configuration
        Config(text: String) {
            display("configuration error: {}", text)
        }
        /// bad remote URL
        Url(err: url::ParseError) {
            from()
            source(err)
            display("bad remote url: {}", err)
        }
        /// internal IO error
        Io(err: std::io::Error) {
            from()
            source(err)
            display("io error: {}", err)
        }
        /// error found by gitshelf git control
        Repo(text: String) {
            from()
            display("{}", text)
        }
    }
}
impl SyncError {
    pub fn new(text: &str) -> SyncError {
        SyncError::Repo(text.to_owned())
    }
    /** classify a git2 error found during `step` */
    pub fn classify(step: SyncStep, err: git2::Error) -> SyncError {
        match (err.code(), err.class()) {
            (ErrorCode::Auth, _) | (ErrorCode::Certificate, _) => SyncError::Auth(step, err),
            (ErrorCode::Conflict, _) | (ErrorCode::MergeConflict, _) => {
                SyncError::Conflict(err.message().to_owned())
            }
            (_, ErrorClass::Net) | (_, ErrorClass::Http) | (_, ErrorClass::Ssl) => {
                SyncError::Network(step, err)
            }
            (_, ErrorClass::Ssh) if err.message().contains("authentication") => {
                SyncError::Auth(step, err)
            }
            _ => SyncError::Git(step, err),
        }
    }
    /** whether this error is a fault in the configuration rather than in the remote */
    pub fn is_config(&self) -> bool {
        matches!(self, SyncError::Config(_) | SyncError::Url(_))
    }
}

/** map git2 errors found at a particular step */
pub(crate) trait AtStep<T> {
    fn at(self, step: SyncStep) -> SyncResult<T>;
}
impl<T> AtStep<T> for Result<T, git2::Error> {
    fn at(self, step: SyncStep) -> SyncResult<T> {
        self.map_err(|e| SyncError::classify(step, e))
    }
}

/// a result with payload
pub type SyncResult<T> = Result<T, SyncError>;
/// a result with no payload
pub type NullResult = SyncResult<()>;
