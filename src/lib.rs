//! Maintainer tools library
//!
//! Helpers for Debian and Ubuntu package maintenance: probing packages for
//! the py3clean locale bug inside schroot sessions, saving debdiffs,
//! rendering timelapse videos and a few small lookups. Every external
//! program is driven through [`CommandRunner`] so tools can be tested
//! against scripted output.

pub mod affected;
pub mod apt_lists;
pub mod cli;
pub mod command_args;
pub mod command_runner;
pub mod config;
pub mod copy_mtime;
pub mod debdiff;
pub mod dpkg_which;
pub mod error;
pub mod process_guard;
pub mod sanity;
pub mod schroot;
pub mod schroot_wrapper;
pub mod shellcheck;
pub mod timelapse;
pub mod userlint;

// Re-export main types for convenience
pub use affected::{AffectionDb, FindAffectedOptions, PackageRecord, ProbeOutcome, Summary};
pub use apt_lists::{AptLists, BinaryPackage};
pub use command_args::CommandArgs;
pub use command_runner::{CommandOutput, CommandRunner, ExecError, Invocation, SystemRunner};
pub use config::ToolsConfig;
pub use error::{Result, ToolsError};
pub use process_guard::ChildRegistry;
pub use schroot::SchrootSession;
pub use timelapse::Size;
