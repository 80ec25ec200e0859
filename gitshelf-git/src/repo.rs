/* This Source Code Form is subject to the terms of the Mozilla Public
License, v. 2.0. If a copy of the MPL was not distributed with this
file, You can obtain one at https://mozilla.org/MPL/2.0/. */

/*! replication of the document to a git repository */
use crate::error::{AtStep, NullResult, SyncError, SyncResult, SyncStep};
use crate::shared::{SyncOptions, TOKEN_USER};
use crate::{sync_timer, sync_trace};
use git2::build::CheckoutBuilder;
use git2::{
    Commit, Cred, CredentialType, ErrorCode, FetchOptions, Oid, PushOptions, Remote,
    RemoteCallbacks, Repository, RepositoryInitOptions, Signature, Status, Tree,
};
use git2_credentials::CredentialHandler;
use log::{debug, trace};
use std::cell::RefCell;
use std::path::Path;

/** maximum number of credentials offered to the remote per operation */
const MAX_TRIES: u8 = 5;

/** something that can replicate the local document somewhere durable */
pub trait Synchronizer: Send {
    /** stage, commit and push the document; `message` describes the change */
    fn sync(&mut self, message: &str) -> NullResult;
    /** a description for diagnostic traces */
    fn trace_descr(&self) -> String;
}

/** how a pull changed the local branch */
#[derive(Debug, PartialEq, Eq)]
pub enum PullOutcome {
    /** nothing on the remote branch yet */
    NoUpstream,
    AlreadyUpToDate,
    FastForward,
    Merged,
}

/** A git working directory replicated to a remote */
pub struct GitSynchronizer {
    /** the Git repository */
    repo: Repository,
    /** the document file, relative to the working directory */
    file_name: String,
    /** name of the remote */
    remote: String,
    /** the branch to use */
    branch: String,
    /** token for the remote */
    token: String,
    committer_name: String,
    committer_email: String,
    pull_before_push: bool,
}
impl GitSynchronizer {
    /** open the working directory, initialising a repository there if necessary */
    pub fn open(opts: &SyncOptions) -> SyncResult<GitSynchronizer> {
        sync_trace!("open synchronizer");
        opts.validate()?;
        trace!("options {:?}", opts);
        let repo = match Repository::open(&opts.work_dir) {
            Ok(r) => r,
            Err(e) if e.code() == ErrorCode::NotFound => Self::init(opts)?,
            Err(e) => return Err(SyncError::classify(SyncStep::Open, e)),
        };
        if repo.is_bare() {
            return Err(SyncError::Config(format!(
                "{:?} is a bare repository, a working directory is required",
                &opts.work_dir
            )));
        }
        let synchronizer = Self::new(repo, opts);
        synchronizer.ensure_remote(&opts.url()?)?;
        Ok(synchronizer)
    }
    /** initialise a new repository with HEAD on the configured branch */
    fn init(opts: &SyncOptions) -> SyncResult<Repository> {
        sync_timer!(&format!("init repo {:?}", &opts.work_dir));
        std::fs::create_dir_all(&opts.work_dir)?;
        let mut init_opts = RepositoryInitOptions::new();
        init_opts.initial_head(&opts.branch);
        Repository::init_opts(&opts.work_dir, &init_opts).at(SyncStep::Open)
    }
    /** clone the configured branch of the remote into a new working
    directory (a Git clone, not a Rust clone). The remote's own HEAD is not
    consulted, so it may be unborn or name another branch. */
    pub fn clone_into(opts: &SyncOptions) -> SyncResult<GitSynchronizer> {
        sync_timer!("clone repo");
        opts.validate()?;
        if Repository::open(&opts.work_dir).is_ok() {
            return Err(SyncError::Config(format!(
                "{:?} is already a repository",
                &opts.work_dir
            )));
        }
        let url = opts.url()?;
        debug!("cloning {} to {:?}...", &url, &opts.work_dir);
        let mut synchronizer = Self::new(Self::init(opts)?, opts);
        synchronizer.ensure_remote(&url)?;
        let outcome = synchronizer.pull()?;
        trace!("cloned ({:?}).", outcome);
        Ok(synchronizer)
    }
    /** create a new synchronizer object */
    fn new(repo: Repository, opts: &SyncOptions) -> GitSynchronizer {
        Self {
            repo,
            file_name: opts.file_name.clone(),
            remote: opts.remote.clone(),
            branch: opts.branch.clone(),
            token: opts.token.clone(),
            committer_name: opts.committer_name.clone(),
            committer_email: opts.committer_email.clone(),
            pull_before_push: opts.pull_before_push,
        }
    }
    /** make sure the remote exists and points at `url` */
    fn ensure_remote(&self, url: &str) -> NullResult {
        match self.repo.find_remote(&self.remote) {
            Ok(r) => {
                if r.url() != Some(url) {
                    debug!("remote {} now points at {}", &self.remote, url);
                    self.repo.remote_set_url(&self.remote, url).at(SyncStep::Open)?;
                }
            }
            Err(e) if e.code() == ErrorCode::NotFound => {
                let _ = self.repo.remote(&self.remote, url).at(SyncStep::Open)?;
            }
            Err(e) => return Err(SyncError::classify(SyncStep::Open, e)),
        }
        Ok(())
    }
    /** the state of the repository, for debugging */
    pub fn state(&self) -> String {
        format!("{:?}", self.repo.state())
    }
    /** name of the required branch for git */
    fn refname(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }
    /** name of the remote tracking branch */
    fn tracking_refname(&self) -> String {
        format!("refs/remotes/{}/{}", self.remote, self.branch)
    }
    /** the commit at HEAD, or none for a new repository */
    fn head_commit(&self) -> SyncResult<Option<Commit<'_>>> {
        match self.repo.head() {
            Ok(head) => Ok(Some(head.peel_to_commit().at(SyncStep::Commit)?)),
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                Ok(None)
            }
            Err(e) => Err(SyncError::classify(SyncStep::Commit, e)),
        }
    }
    fn signature(&self) -> SyncResult<Signature<'static>> {
        Signature::now(&self.committer_name, &self.committer_email).at(SyncStep::Commit)
    }
    /* ### Stage and commit */
    /** stage the document and return the oid of the resulting tree */
    pub fn stage(&mut self) -> SyncResult<Oid> {
        sync_trace!("staging");
        let mut index = self.repo.index().at(SyncStep::Stage)?;
        index
            .add_path(Path::new(&self.file_name))
            .at(SyncStep::Stage)?;
        index.write().at(SyncStep::Stage)?;
        index.write_tree().at(SyncStep::Stage)
    }
    /** commit a staged tree unless it matches HEAD. Returns the new commit, if any. */
    pub fn commit(&mut self, tree_oid: Oid, message: &str) -> SyncResult<Option<Oid>> {
        sync_trace!("committing");
        let parent = self.head_commit()?;
        if let Some(p) = &parent {
            if p.tree_id() == tree_oid {
                trace!("tree unchanged since {}, nothing to commit", p.id());
                return Ok(None);
            }
        }
        let tree = self.repo.find_tree(tree_oid).at(SyncStep::Commit)?;
        let signature = self.signature()?;
        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        let full_message = format!(
            "{} ({})",
            message,
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        );
        let commit_oid = self
            .repo
            .commit(
                Some("HEAD"),
                &signature,
                &signature,
                &full_message,
                &tree,
                &parents,
            )
            .at(SyncStep::Commit)?;
        debug!("committed {} ({})", commit_oid, &full_message);
        Ok(Some(commit_oid))
    }
    /* ### Remotes and remote (server) repositories */
    fn find_remote(&self) -> SyncResult<Remote<'_>> {
        self.repo.find_remote(&self.remote).at(SyncStep::Open)
    }
    /** fetch the branch and bring it into the local branch */
    pub fn pull(&mut self) -> SyncResult<PullOutcome> {
        sync_timer!("pull repo");
        {
            let mut remote = self.find_remote()?;
            let mut fetch_options = FetchOptions::new();
            fetch_options.remote_callbacks(Self::remote_callbacks(&self.token));
            let refspec = format!("+{}:{}", self.refname(), self.tracking_refname());
            trace!("fetching {}...", &refspec);
            match remote.fetch(&[refspec.as_str()], Some(&mut fetch_options), None) {
                Ok(()) => {}
                // an empty remote has no branch to fetch
                Err(e) if e.code() == ErrorCode::NotFound => return Ok(PullOutcome::NoUpstream),
                Err(e) => return Err(SyncError::classify(SyncStep::Pull, e)),
            }
        }
        let their_ref = match self.repo.find_reference(&self.tracking_refname()) {
            Ok(r) => r,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(PullOutcome::NoUpstream),
            Err(e) => return Err(SyncError::classify(SyncStep::Pull, e)),
        };
        let their_annotated = self
            .repo
            .reference_to_annotated_commit(&their_ref)
            .at(SyncStep::Pull)?;
        let (analysis, _preference) = self
            .repo
            .merge_analysis(&[&their_annotated])
            .at(SyncStep::Pull)?;
        if analysis.is_up_to_date() {
            trace!("already up to date");
            return Ok(PullOutcome::AlreadyUpToDate);
        }
        self.check_document_clean()?;
        let their_oid = their_annotated.id();
        if analysis.is_fast_forward() || analysis.is_unborn() {
            debug!("fast forward to {}", their_oid);
            let their_tree = self
                .repo
                .find_commit(their_oid)
                .and_then(|c| c.tree())
                .at(SyncStep::Pull)?;
            self.checkout_tree(&their_tree)?;
            self.repo
                .reference(&self.refname(), their_oid, true, "pull: fast-forward")
                .at(SyncStep::Pull)?;
            self.repo.set_head(&self.refname()).at(SyncStep::Pull)?;
            return Ok(PullOutcome::FastForward);
        }
        self.merge(their_oid)?;
        Ok(PullOutcome::Merged)
    }
    /** merge a fetched commit into HEAD, refusing to leave conflicts */
    fn merge(&self, their_oid: Oid) -> NullResult {
        sync_trace!("merging");
        let our_commit = self
            .head_commit()?
            .ok_or_else(|| sync_error!("merge with no local commit"))?;
        let their_commit = self.repo.find_commit(their_oid).at(SyncStep::Pull)?;
        let mut index = self
            .repo
            .merge_commits(&our_commit, &their_commit, None)
            .at(SyncStep::Pull)?;
        if index.has_conflicts() {
            let mut paths = vec![];
            for conflict in index.conflicts().at(SyncStep::Pull)? {
                let conflict = conflict.at(SyncStep::Pull)?;
                let entry = conflict.our.or(conflict.their).or(conflict.ancestor);
                if let Some(e) = entry {
                    paths.push(String::from_utf8_lossy(&e.path).to_string());
                }
            }
            debug!("merge conflicts in {:?}", &paths);
            return Err(SyncError::Conflict(paths.join(", ")));
        }
        let tree_oid = index.write_tree_to(&self.repo).at(SyncStep::Pull)?;
        let tree = self.repo.find_tree(tree_oid).at(SyncStep::Pull)?;
        self.checkout_tree(&tree)?;
        let signature = self.signature()?;
        let message = format!(
            "merge {}/{} into {}",
            &self.remote, &self.branch, &self.branch
        );
        let merge_oid = self
            .repo
            .commit(
                Some("HEAD"),
                &signature,
                &signature,
                &message,
                &tree,
                &[&our_commit, &their_commit],
            )
            .at(SyncStep::Pull)?;
        debug!("merge commit {}", merge_oid);
        Ok(())
    }
    /** fail if the document differs from HEAD, which means a local write
    landed after this sync committed */
    fn check_document_clean(&self) -> NullResult {
        match self.repo.status_file(Path::new(&self.file_name)) {
            Ok(status) if status.is_empty() || status == Status::IGNORED => Ok(()),
            Ok(status) => {
                debug!("{} is {:?}, not pulling into it", &self.file_name, status);
                Err(SyncError::Dirty(self.file_name.clone()))
            }
            Err(e) if e.code() == ErrorCode::NotFound => Ok(()),
            Err(e) => Err(SyncError::classify(SyncStep::Pull, e)),
        }
    }
    /** update the working directory and index to `tree`, before HEAD moves.
    Files modified since HEAD are never overwritten. */
    fn checkout_tree(&self, tree: &Tree<'_>) -> NullResult {
        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        self.repo
            .checkout_tree(tree.as_object(), Some(&mut checkout))
            .map_err(|e| match e.code() {
                ErrorCode::Conflict | ErrorCode::MergeConflict => {
                    SyncError::Dirty(self.file_name.clone())
                }
                _ => SyncError::classify(SyncStep::Pull, e),
            })
    }
    /** push the local branch to the remote */
    pub fn push(&mut self) -> NullResult {
        sync_timer!("push repo");
        let mut remote = self.find_remote()?;
        let rejection: RefCell<Option<(String, String)>> = RefCell::new(None);
        {
            let mut cb = Self::remote_callbacks(&self.token);
            cb.push_update_reference(|refname, status| {
                if let Some(reason) = status {
                    *rejection.borrow_mut() = Some((refname.to_owned(), reason.to_owned()));
                }
                Ok(())
            });
            let mut push_options = PushOptions::new();
            push_options.remote_callbacks(cb);
            let refspec = format!("{}:{}", self.refname(), self.refname());
            trace!("pushing {}...", &refspec);
            remote
                .push(&[refspec.as_str()], Some(&mut push_options))
                .at(SyncStep::Push)?;
        }
        if let Some((refname, reason)) = rejection.into_inner() {
            return Err(SyncError::Rejected(refname, reason));
        }
        trace!("pushed.");
        Ok(())
    }
    /** set the remote callbacks for a repo access. In particular, offer the token as credentials. */
    fn remote_callbacks<'a>(token: &str) -> RemoteCallbacks<'a> {
        let mut cb = RemoteCallbacks::new();
        let token = token.to_owned();
        let mut handler = git2::Config::open_default().ok().map(CredentialHandler::new);
        let mut try_count: u8 = 0;
        cb.credentials(move |url, username, allowed| {
            try_count += 1;
            trace!(
                "{}: looking for credential (url {}, user {:?}, type {:?})",
                try_count,
                url,
                username,
                allowed
            );
            if try_count > MAX_TRIES {
                return Err(git2::Error::new(
                    ErrorCode::Auth,
                    git2::ErrorClass::Callback,
                    "too many credential attempts",
                ));
            }
            if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) && try_count == 1 {
                return Cred::userpass_plaintext(TOKEN_USER, &token);
            }
            match handler.as_mut() {
                Some(h) => h.try_next_credential(url, username, allowed),
                None => Cred::default(),
            }
        });
        cb
    }
    /** a description identifying the synchronizer for use in diagnostic traces */
    fn describe(&self) -> String {
        format!(
            "{} on {}/{} ({})",
            &self.file_name,
            &self.remote,
            &self.branch,
            self.repo
                .workdir()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "??".to_owned())
        )
    }
}
impl Synchronizer for GitSynchronizer {
    fn sync(&mut self, message: &str) -> NullResult {
        sync_timer!(&format!("sync {}", message));
        let tree_oid = self.stage()?;
        let _ = self.commit(tree_oid, message)?;
        if self.pull_before_push {
            let outcome = self.pull()?;
            trace!("pull outcome {:?}", outcome);
        }
        self.push()
    }
    fn trace_descr(&self) -> String {
        self.describe()
    }
}
impl Drop for GitSynchronizer {
    fn drop(&mut self) {
        trace!("dropping synchronizer, repo state {}", self.state());
    }
}
