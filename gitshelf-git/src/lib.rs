/* This Source Code Form is subject to the terms of the Mozilla Public
License, v. 2.0. If a copy of the MPL was not distributed with this
file, You can obtain one at https://mozilla.org/MPL/2.0/. */

/*! `gitshelf git` replicates a single document to a remote git repository.

The document lives in a git working directory. A [`GitSynchronizer`]
stages it, commits it with a timestamped message and a fixed committer
identity, optionally pulls the configured branch, and pushes the branch
using a token credential.

Every failure is returned as a [`SyncError`], classified by the
[`SyncStep`] at which it was found. Nothing is retried here; callers own
the retry policy.

A pull that would conflict is reported as [`SyncError::Conflict`] and
left for the user to resolve outside this crate.
 */

#[macro_use]
extern crate quick_error;

#[macro_use]
mod error;
mod repo;
#[macro_use]
mod shared;

pub use crate::error::{NullResult, SyncError, SyncResult, SyncStep};
pub use crate::repo::{GitSynchronizer, PullOutcome, Synchronizer};
pub use crate::shared::{SyncOptions, Timer, Tracer, DEFAULT_HOST, TOKEN_USER};
