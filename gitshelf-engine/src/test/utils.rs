/* This Source Code Form is subject to the terms of the Mozilla Public
License, v. 2.0. If a copy of the MPL was not distributed with this
file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//* useful functions used in the tests
use super::*;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

/** what a [`ScriptedSynchronizer`] was asked to do, shared with the test */
#[derive(Clone, Default)]
pub(crate) struct Script {
    /** the document text seen by each call */
    seen: Arc<Mutex<Vec<String>>>,
    /** calls still to fail */
    failures: Arc<AtomicUsize>,
}
impl Script {
    pub(crate) fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }
    pub(crate) fn calls(&self) -> usize {
        self.seen.lock().expect("poisoned").len()
    }
    pub(crate) fn last_seen(&self) -> Option<String> {
        self.seen.lock().expect("poisoned").last().cloned()
    }
}

/** a synchronizer that records the document instead of pushing it */
pub(crate) struct ScriptedSynchronizer {
    path: PathBuf,
    script: Script,
    /** when present, each call waits for a message first */
    gate: Option<Receiver<()>>,
}
impl Synchronizer for ScriptedSynchronizer {
    fn sync(&mut self, message: &str) -> gitshelf_git::NullResult {
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
        let text = fs::read_to_string(&self.path).unwrap_or_default();
        self.script.seen.lock().expect("poisoned").push(text);
        trace(&format!("scripted sync: {}", message));
        let left = self.script.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.script.failures.store(left - 1, Ordering::SeqCst);
            return Err(SyncError::new("simulated network error"));
        }
        Ok(())
    }
    fn trace_descr(&self) -> String {
        format!("scripted {:?}", &self.path)
    }
}

/** a scripted synchronizer for the document of `store` */
pub(crate) fn scripted(store: &DocumentStore) -> (ScriptedSynchronizer, Script) {
    let script = Script::default();
    let synchronizer = ScriptedSynchronizer {
        path: store.path(),
        script: script.clone(),
        gate: None,
    };
    (synchronizer, script)
}
/** milliseconds from the last attempt to the scheduled retry */
pub(crate) fn retry_gap(status: &SyncStatus) -> i64 {
    match (status.last_sync_attempt, status.next_retry_at) {
        (Some(attempt), Some(retry)) => (retry - attempt).num_milliseconds(),
        _ => panic!("no retry scheduled: {:?}", status),
    }
}
/** retries fast enough for tests */
pub(crate) fn quick_policy(initial_ms: u64, subsequent_ms: u64) -> RetryPolicy {
    RetryPolicy {
        initial: Duration::from_millis(initial_ms),
        subsequent: Duration::from_millis(subsequent_ms),
    }
}
/** a repository over a fresh directory, replicated by a script */
pub(crate) fn scripted_repository(policy: RetryPolicy) -> (RecordRepository, Script, PathBuf) {
    let dir = temp_dir_path();
    let store = DocumentStore::new(&dir, DOC);
    let (synchronizer, script) = scripted(&store);
    let repo = RecordRepository::with_synchronizer("tags", store, Box::new(synchronizer), policy)
        .expect("could not open repository");
    (repo, script, dir)
}
/** as [`scripted_repository`], but every sync waits to be let through */
pub(crate) fn gated_repository() -> (RecordRepository, Script, Sender<()>) {
    let dir = temp_dir_path();
    let store = DocumentStore::new(&dir, DOC);
    let script = Script::default();
    let (sender, receiver) = channel();
    let synchronizer = ScriptedSynchronizer {
        path: store.path(),
        script: script.clone(),
        gate: Some(receiver),
    };
    let repo = RecordRepository::with_synchronizer(
        "tags",
        store,
        Box::new(synchronizer),
        RetryPolicy::default(),
    )
    .expect("could not open repository");
    (repo, script, sender)
}
/** poll until `cond` holds; false on timeout */
pub(crate) fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}
pub(crate) fn doc_text(repo: &RecordRepository) -> String {
    fs::read_to_string(repo.document_path()).expect("no document")
}
pub(crate) fn ids(repo: &RecordRepository) -> Vec<String> {
    repo.list()
        .expect("could not list")
        .into_iter()
        .map(|r| r.id)
        .collect()
}
pub(crate) fn bare_remote() -> PathBuf {
    let path = temp_dir_path();
    let _ = git2::Repository::init_bare(&path).expect("could not create bare remote");
    path
}
pub(crate) fn remote_doc(remote: &Path, branch: &str) -> Option<String> {
    let repo = git2::Repository::open_bare(remote).ok()?;
    let oid = repo.refname_to_id(&format!("refs/heads/{}", branch)).ok()?;
    let commit = repo.find_commit(oid).ok()?;
    let entry = commit.tree().ok()?.get_path(Path::new(DOC)).ok()?;
    let blob = repo.find_blob(entry.id()).ok()?;
    Some(String::from_utf8_lossy(blob.content()).to_string())
}
pub(crate) fn temp_dir_path() -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push("gitshelf-engine-test-".to_string() + &rand_text(8));
    path
}
const IDENT_CHAR: &str = "abcdefghijklmnopqrstuvwxyz0123456789";
pub(crate) fn rand_text(l: u8) -> String {
    (0..l)
        .map(|_n| {
            let rnum = rand::thread_rng().gen_range(0, IDENT_CHAR.len());
            IDENT_CHAR.char_indices().nth(rnum).unwrap().1
        })
        .collect()
}
