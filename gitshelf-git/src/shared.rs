/* This Source Code Form is subject to the terms of the Mozilla Public
License, v. 2.0. If a copy of the MPL was not distributed with this
file, You can obtain one at https://mozilla.org/MPL/2.0/. */

/*! shared code for replicating to a git repository */

use crate::error::{NullResult, SyncError, SyncResult};
use log::{debug, trace};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;
use url::Url;

/** host used to build remote URLs from an owner and repository name */
pub const DEFAULT_HOST: &str = "https://github.com/";
/** user name sent with a token over HTTPS */
pub const TOKEN_USER: &str = "x-access-token";

#[derive(Clone)]
/** data for creating a new [`crate::GitSynchronizer`] */
pub struct SyncOptions {
    /** local working directory (a git working tree) */
    pub work_dir: Box<Path>,
    /** the document file name within the working directory */
    pub file_name: String,
    /** owner of the remote repository */
    pub owner: String,
    /** name of the remote repository */
    pub repo_name: String,
    /** branch to commit to and push */
    pub branch: String,
    /** access token used as the HTTPS password */
    pub token: String,
    /** name of the remote to pull/push */
    pub remote: String,
    /** URL of the remote, overriding the one built from owner and repository name */
    pub remote_url: Option<String>,
    /** name for git commits */
    pub committer_name: String,
    /** email for git commits */
    pub committer_email: String,
    /** whether to pull the branch before pushing */
    pub pull_before_push: bool,
}
impl SyncOptions {
    pub fn new() -> Self {
        Self::default()
    }
    /** check that nothing required is missing. A missing token is fatal here, never retried later. */
    pub fn validate(&self) -> NullResult {
        let required = [
            ("token", &self.token),
            ("branch", &self.branch),
            ("file name", &self.file_name),
            ("remote", &self.remote),
        ];
        for (what, value) in required.iter() {
            if value.trim().is_empty() {
                return Err(SyncError::Config(format!("{} must not be empty", what)));
            }
        }
        if self.remote_url.is_none() {
            if self.owner.trim().is_empty() {
                return Err(SyncError::Config("owner must not be empty".to_owned()));
            }
            if self.repo_name.trim().is_empty() {
                return Err(SyncError::Config(
                    "repository name must not be empty".to_owned(),
                ));
            }
        }
        if Path::new(&self.file_name).is_absolute() {
            return Err(SyncError::Config(format!(
                "file name {} must be relative to the working directory",
                &self.file_name
            )));
        }
        let _ = self.url()?;
        Ok(())
    }
    /** the URL of the remote repository */
    pub fn url(&self) -> SyncResult<String> {
        match &self.remote_url {
            Some(u) => Ok(u.clone()),
            None => {
                let base = Url::parse(DEFAULT_HOST)?;
                let url = base.join(&format!("{}/{}.git", self.owner.trim(), self.repo_name.trim()))?;
                Ok(url.to_string())
            }
        }
    }
    /** full path of the document */
    pub fn document_path(&self) -> PathBuf {
        self.work_dir.join(&self.file_name)
    }
}
impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("data").into_boxed_path(),
            file_name: "records.yaml".to_owned(),
            owner: "".to_owned(),
            repo_name: "".to_owned(),
            branch: "main".to_owned(),
            token: "".to_owned(),
            remote: "origin".to_owned(),
            remote_url: None,
            committer_name: "gitshelf".to_owned(),
            committer_email: "gitshelf@users.noreply.github.com".to_owned(),
            pull_before_push: true,
        }
    }
}
impl fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOptions")
            .field("work_dir", &self.work_dir)
            .field("file_name", &self.file_name)
            .field("owner", &self.owner)
            .field("repo_name", &self.repo_name)
            .field("branch", &self.branch)
            .field("token", &if self.token.is_empty() { "" } else { "***" })
            .field("remote", &self.remote)
            .field("remote_url", &self.remote_url)
            .field("committer_name", &self.committer_name)
            .field("committer_email", &self.committer_email)
            .field("pull_before_push", &self.pull_before_push)
            .finish()
    }
}

/** time an operation and output start and end messages */
pub struct Timer {
    start: Instant,
    descr: String,
}
impl Timer {
    pub fn new(descr: &str, loc: &str) -> Self {
        trace!("starting {} at {}", descr, loc);
        Self {
            start: Instant::now(),
            descr: descr.to_owned(),
        }
    }
}
impl Drop for Timer {
    fn drop(&mut self) {
        debug!(
            "{} took {}s.",
            self.descr,
            self.start.elapsed().as_millis() as f64 / 1000.0
        );
    }
}
#[macro_export]
macro_rules! sync_timer {
    ($descr:expr) => {
        let _timer = $crate::Timer::new($descr, concat!(file!(), ":", line!()));
    };
}
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
macro_rules! sync_trace {
    ($descr:expr) => {
        let _tracer = $crate::Tracer::new($descr, concat!(file!(), ":", line!()));
    };
}
