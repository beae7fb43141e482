//! Tracker for packages hit by the `py3clean` non-UTF-8 locale bug.
//!
//! Setup for the chroot:
//!
//! ```text
//! apt install -y locales
//! locale-gen fr_FR fr_FR.UTF-8
//! ```

pub mod db;
pub mod driver;
pub mod probe;
pub mod record;

use crate::apt_lists::AptLists;
use crate::command_runner::CommandRunner;
use crate::error::Result;
use std::path::PathBuf;
use std::time::Duration;

pub use db::AffectionDb;
pub use probe::{AptProbe, LocaleEncoding, ProbeOutcome};
pub use record::{PackageRecord, Summary};

/// Settings of one `find-affected` run.
#[derive(Debug, Clone)]
pub struct FindAffectedOptions {
    pub architecture: String,
    pub chroot: String,
    /// Re-read the APT lists even if the database is populated
    pub update: bool,
    pub only: String,
    pub section: String,
    pub timeout: Duration,
    /// Retry inconclusive results that took at most this many seconds
    pub retry: f64,
    pub db: PathBuf,
    pub apt_lists: PathBuf,
    /// Print counts and exit
    pub summary: bool,
    pub export_json: Option<PathBuf>,
}

impl Default for FindAffectedOptions {
    fn default() -> Self {
        Self {
            architecture: "amd64".to_string(),
            chroot: "noble-locale".to_string(),
            update: false,
            only: ".*".to_string(),
            section: ".*".to_string(),
            timeout: Duration::from_secs(3600),
            retry: 0.0,
            db: PathBuf::from("affected.sqlite3"),
            apt_lists: PathBuf::from(crate::apt_lists::DEFAULT_LISTS_DIR),
            summary: false,
            export_json: None,
        }
    }
}

/// Run `find-affected`; returns the process exit code.
pub fn run<R: CommandRunner + ?Sized>(runner: &R, options: &FindAffectedOptions) -> Result<i32> {
    let mut db = AffectionDb::open(&options.db)?;

    if options.summary {
        println!("{}", db.summary()?);
        return Ok(0);
    }
    if let Some(path) = &options.export_json {
        db.export_json(path)?;
        return Ok(0);
    }

    if options.update || db.is_empty()? {
        db.add_from_apt_lists(&AptLists::new(&options.apt_lists), &options.architecture)?;
    }
    db.process_matching(
        runner,
        &options.chroot,
        &options.only,
        &options.section,
        options.retry,
        options.timeout,
    )?;
    Ok(0)
}
