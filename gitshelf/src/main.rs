/* This Source Code Form is subject to the terms of the Mozilla Public
License, v. 2.0. If a copy of the MPL was not distributed with this
file, You can obtain one at https://mozilla.org/MPL/2.0/. */

/*! `gitshelf` is the command-line program for the record store.

## gitshelf

gitshelf keeps small collections of named records (tags, categories,
...) in a YAML document inside a git working directory, and replicates
the document to a remote repository in the background.

Most of the functionality is in [`gitshelf_engine`]; this program

* reads configuration from the command line, the environment or a configuration file;
* opens a [`gitshelf_engine::RecordRepository`] for one kind of record;
* runs one command against it and prints the result as YAML or JSON;
* waits (for a bounded time) for replication before it exits.

*/
#[macro_use]
extern crate serde_derive;
extern crate config;
extern crate structopt;
use ansi_term::Colour::*;
use ansi_term::Style;
use gitshelf_engine::{
    RecordInput, RecordPatch, RecordRepository, RetryPolicy, ShelfError, ShelfOptions,
};
use gitshelf_git::{GitSynchronizer, SyncOptions};
use log::{debug, warn};
use serde::Serialize;
use serde_yaml::Value;
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;
#[macro_use]
extern crate quick_error;
quick_error! {
#[derive(Debug)]
/** An error found in the main program */
    pub enum GitshelfError {
        /// record store error
        Engine(err: ShelfError) {from() source(err) display("{}", err)}
        /// replication error
        Sync(err: gitshelf_git::SyncError) {from() source(err) display("{}", err)}
        /// error with configuration file
        Config(err: config::ConfigError) {from() source(err) display("configuration file: {}", err)}
        /// output error
        Json(err: serde_json::Error) {from() source(err) display("json: {}", err)}
        /// output or field error
        Yaml(err: serde_yaml::Error) {from() source(err) display("yaml: {}", err)}
    /// error
    Internal(msg: String) {from() display("{}", msg)}
    }}
impl GitshelfError {
    pub fn new(txt: &str) -> Self {
        Self::Internal(txt.to_string())
    }
}
type NullResult = Result<(), GitshelfError>;

#[derive(StructOpt)]
#[structopt(name = "gitshelf", about = "Keep named records in a git repository")]
/// Options from the command line
pub struct Opt {
    #[structopt(flatten)]
    settings: Settings,
    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt, Deserialize)]
/// Settings, from the command line or a configuration file
pub struct Settings {
    /// kind of record (used in commit messages)
    #[structopt(short = "k", long = "kind", default_value = "records")]
    kind: String,
    /// path to the git working directory
    #[structopt(parse(from_os_str), short = "r", long = "repo", default_value = "data")]
    work_dir: PathBuf,
    /// the document within the working directory
    #[structopt(short = "f", long = "file", default_value = "records.yaml")]
    file_name: String,
    /// owner of the remote repository
    #[structopt(short = "o", long = "owner", default_value = "")]
    owner: String,
    /// name of the remote repository
    #[structopt(short = "n", long = "name", default_value = "")]
    repo_name: String,
    ///Repository branch
    #[structopt(short = "b", long = "branch", default_value = "main")]
    branch: String,
    /// access token
    #[structopt(
        short = "t",
        long = "token",
        env = "GITSHELF_TOKEN",
        hide_env_values = true,
        default_value = ""
    )]
    token: String,
    ///Repository remote
    #[structopt(long = "remote", default_value = "origin")]
    remote: String,
    /// URL for the remote (instead of one built from owner and name)
    #[structopt(short = "u", long = "url")]
    url: Option<String>,
    /// name for git commits
    #[structopt(long = "committer", default_value = "gitshelf")]
    committer_name: String,
    /// email for git commits
    #[structopt(
        short = "e",
        long = "email",
        default_value = "gitshelf@users.noreply.github.com"
    )]
    committer_email: String,
    /// push without pulling first
    #[structopt(long = "no-pull")]
    no_pull: bool,
    /// seconds before retrying a failed sync
    #[structopt(long = "retry", default_value = "30")]
    retry_initial_secs: u64,
    /// seconds between later retries
    #[structopt(long = "retry-again", default_value = "300")]
    retry_subsequent_secs: u64,
    /// longest wait for replication before exiting, in seconds
    #[structopt(short = "w", long = "wait", default_value = "30")]
    wait_secs: u64,
    /// print JSON instead of YAML
    #[structopt(long = "json")]
    json: bool,
    /// verbose
    #[structopt(short = "v", long = "verbose")]
    verbose: bool,
    /// configuration file (will override all values)
    #[structopt(parse(from_os_str), short = "c", long = "config", default_value = "")]
    config: PathBuf,
}
impl Settings {
    fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            work_dir: self.work_dir.clone().into_boxed_path(),
            file_name: self.file_name.clone(),
            owner: self.owner.clone(),
            repo_name: self.repo_name.clone(),
            branch: self.branch.clone(),
            token: self.token.clone(),
            remote: self.remote.clone(),
            remote_url: self.url.clone(),
            committer_name: self.committer_name.clone(),
            committer_email: self.committer_email.clone(),
            pull_before_push: !self.no_pull,
        }
    }
    fn shelf_options(&self) -> ShelfOptions {
        ShelfOptions {
            kind: self.kind.clone(),
            sync_options: self.sync_options(),
            retry_policy: RetryPolicy {
                initial: Duration::from_secs(self.retry_initial_secs),
                subsequent: Duration::from_secs(self.retry_subsequent_secs),
            },
        }
    }
}

#[derive(StructOpt, Debug)]
/// What to do
pub enum Command {
    /// list all records
    List,
    /// show one record
    Show { id: String },
    /// find a record by name
    Find { name: String },
    /// add a record
    Create {
        #[structopt(long = "id")]
        id: String,
        #[structopt(long = "name")]
        name: String,
        #[structopt(long = "inactive")]
        inactive: bool,
        /// extra field, as key=value (value is YAML)
        #[structopt(long = "field", parse(try_from_str = parse_field))]
        fields: Vec<(String, String)>,
    },
    /// change a record
    Update {
        id: String,
        #[structopt(long = "name")]
        name: Option<String>,
        #[structopt(long = "active")]
        active: Option<bool>,
        /// extra field, as key=value (value is YAML)
        #[structopt(long = "field", parse(try_from_str = parse_field))]
        fields: Vec<(String, String)>,
    },
    /// remove a record
    Delete { id: String },
    /// put records in order; records not named follow
    Reorder { ids: Vec<String> },
    /// show the replication state
    Status,
    /// replicate now
    Sync,
    /// clone the remote into the working directory
    Clone,
}

fn main() {
    env_logger::init();
    if let Err(e) = actual_main() {
        eprintln!("gitshelf: {}", e);
        std::process::exit(1);
    }
}
fn actual_main() -> NullResult {
    let opt = Opt::from_args();
    let settings = settings(opt.settings)?;
    let verbose = settings.verbose;
    if verbose {
        trace(Black.on(White), &format!("options: {:?}", settings.shelf_options()));
    }
    if let Command::Clone = opt.command {
        let sync = GitSynchronizer::clone_into(&settings.sync_options())?;
        if verbose {
            trace(Blue.on(White), &format!("cloned, repo state {}", sync.state()));
        }
        return Ok(());
    }
    let mut repo = RecordRepository::open(&settings.shelf_options())?;
    let result = run_command(&mut repo, opt.command, &settings);
    finish(&mut repo, &settings);
    result
}
/** the settings from the command line, or from the configuration file if one is named */
fn settings(from_args: Settings) -> Result<Settings, GitshelfError> {
    let config_filename = from_args
        .config
        .to_str()
        .ok_or_else(|| GitshelfError::new("bad config file name"))?;
    if config_filename == "" {
        return Ok(from_args);
    }
    if from_args.verbose {
        trace(Blue.on(White), "getting config from file");
    }
    let mut config = config::Config::default();
    config.set_default("kind", "records")?;
    config.set_default("work_dir", "data")?;
    config.set_default("file_name", "records.yaml")?;
    config.set_default("owner", "")?;
    config.set_default("repo_name", "")?;
    config.set_default("branch", "main")?;
    // a token from the environment still applies unless the file has one
    config.set_default("token", from_args.token.as_str())?;
    config.set_default("remote", "origin")?;
    config.set_default("url", None as Option<String>)?;
    config.set_default("committer_name", "gitshelf")?;
    config.set_default("committer_email", "gitshelf@users.noreply.github.com")?;
    config.set_default("no_pull", false)?;
    config.set_default("retry_initial_secs", 30_i64)?;
    config.set_default("retry_subsequent_secs", 300_i64)?;
    config.set_default("wait_secs", 30_i64)?;
    config.set_default("json", from_args.json)?;
    config.set_default("verbose", from_args.verbose)?;
    config.set_default("config", config_filename)?;
    let _ = config.merge(config::File::with_name(config_filename))?;
    Ok(config.try_into()?)
}
fn run_command(repo: &mut RecordRepository, command: Command, settings: &Settings) -> NullResult {
    debug!("running {:?}", &command);
    match command {
        Command::List => print(&repo.list()?, settings),
        Command::Show { id } => match repo.find_by_id(&id)? {
            Some(record) => print(&record, settings),
            None => Err(ShelfError::NotFound(id).into()),
        },
        Command::Find { name } => match repo.find_by_name(&name)? {
            Some(record) => print(&record, settings),
            None => Err(GitshelfError::new(&format!("no record named {:?}", &name))),
        },
        Command::Create {
            id,
            name,
            inactive,
            fields,
        } => {
            let mut input = RecordInput::new(&id, &name);
            input.is_active = !inactive;
            for (k, v) in fields {
                input = input.with_field(&k, field_value(&v)?);
            }
            print(&repo.create(input)?, settings)
        }
        Command::Update {
            id,
            name,
            active,
            fields,
        } => {
            let mut patch = RecordPatch::new();
            patch.name = name;
            patch.is_active = active;
            for (k, v) in fields {
                patch = patch.with_field(&k, field_value(&v)?);
            }
            print(&repo.update(&id, patch)?, settings)
        }
        Command::Delete { id } => Ok(repo.delete(&id)?),
        Command::Reorder { ids } => Ok(repo.reorder(&ids)?),
        Command::Status => print(&repo.sync_status(), settings),
        Command::Sync => {
            if !repo.sync_now() {
                debug!("sync already in progress");
            }
            let _ = repo.wait_for_sync(Duration::from_secs(settings.wait_secs));
            print(&repo.sync_status(), settings)
        }
        Command::Clone => Err(GitshelfError::new("clone needs no open repository")),
    }
}
/** wait for replication to finish (within limits), then stop it */
fn finish(repo: &mut RecordRepository, settings: &Settings) {
    if !repo.wait_for_sync(Duration::from_secs(settings.wait_secs)) {
        warn!("gave up waiting for replication after {}s", settings.wait_secs);
    }
    let status = repo.sync_status();
    if status.has_pending_changes {
        trace(
            Red.on(White),
            &format!(
                "changes not yet replicated: {}",
                status.last_error.unwrap_or_default()
            ),
        );
    }
    repo.shutdown();
    if settings.verbose {
        trace(Blue.on(White), "finished.");
    }
}
fn print<T: Serialize>(value: &T, settings: &Settings) -> NullResult {
    let text = if settings.json {
        serde_json::to_string_pretty(value)? + "\n"
    } else {
        serde_yaml::to_string(value)?
    };
    print!("{}", text);
    Ok(())
}
fn parse_field(s: &str) -> Result<(String, String), String> {
    match s.find('=') {
        Some(pos) if pos > 0 => Ok((s[..pos].to_string(), s[pos + 1..].to_string())),
        _ => Err(format!("expected key=value, got {:?}", s)),
    }
}
/** a field value, read as YAML so that numbers and flags keep their type */
fn field_value(text: &str) -> Result<Value, GitshelfError> {
    if text.is_empty() {
        return Ok(Value::String(String::new()));
    }
    Ok(serde_yaml::from_str(text)?)
}
fn trace(style: Style, s: &str) {
    eprintln!("gitshelf {}", style.paint(s));
}
