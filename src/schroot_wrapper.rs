//! Interactive schroot session with extra packages and sources.
//!
//! Begins a session, optionally enables `-proposed` and PPAs, installs the
//! requested packages and drops into a shell. The session is ended when the
//! shell exits, and its exit code is passed on.

use crate::command_runner::CommandRunner;
use crate::error::{Result, ToolsError};
use crate::schroot::SchrootSession;
use std::path::Path;
use tracing::{info, warn};

pub const DEFAULT_PROPOSED_URI: &str = "http://archive.ubuntu.com/ubuntu";
pub const DEFAULT_PROPOSED_COMPONENTS: &[&str] = &["main", "universe"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperOptions {
    pub chroot: String,
    /// Working directory of the shell
    pub directory: String,
    pub user: String,
    pub packages: Vec<String>,
    pub enable_proposed: bool,
    pub proposed_uri: String,
    pub proposed_components: Vec<String>,
    pub ppas: Vec<String>,
}

/// Split comma and/or whitespace separated values.
pub fn split_list<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    values
        .iter()
        .flat_map(|value| {
            value
                .as_ref()
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// `VERSION_CODENAME` from an os-release file.
pub fn version_codename(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .filter_map(|line| line.split_once('='))
        .find(|(key, _)| key.trim() == "VERSION_CODENAME")
        .map(|(_, value)| value.trim().trim_matches(['"', '\'']).to_string())
        .filter(|codename| !codename.is_empty())
        .ok_or_else(|| {
            ToolsError::config(format!("no VERSION_CODENAME in {}", path.display()))
        })
}

/// Codename of the running system, the default chroot.
pub fn default_chroot() -> Result<String> {
    let os_release = Path::new("/etc/os-release");
    if os_release.exists() {
        version_codename(os_release)
    } else {
        version_codename(Path::new("/usr/lib/os-release"))
    }
}

/// Name of the effective user.
pub fn current_user() -> Result<String> {
    let uid = nix::unistd::geteuid();
    match nix::unistd::User::from_uid(uid) {
        Ok(Some(user)) => Ok(user.name),
        Ok(None) => Err(ToolsError::config(format!("no passwd entry for uid {}", uid))),
        Err(e) => Err(ToolsError::config(format!("looking up uid {}: {}", uid, e))),
    }
}

/// Suite of a chroot named `<suite>[-<flavour>]`.
fn chroot_suite(chroot: &str) -> &str {
    chroot.split('-').next().unwrap_or(chroot)
}

/// Run the wrapper; returns the shell's exit code.
pub fn run<R: CommandRunner + ?Sized>(runner: &R, options: &WrapperOptions) -> Result<i32> {
    let mut session = SchrootSession::begin(runner, &options.chroot)?;

    let mut directory = options.directory.clone();
    if !session.directory_exists(&directory)? {
        let home = session.home_directory(&options.user)?;
        warn!(
            "Directory {} does not exist in chroot {}. Falling back to {}.",
            directory, options.chroot, home
        );
        if !session.directory_exists(&home)? {
            info!("Creating home directory {} for {}", home, options.user);
            session.create_directory(&home, &options.user)?;
        }
        directory = home;
    }

    if options.enable_proposed {
        session.enable_proposed(
            &options.proposed_uri,
            chroot_suite(&options.chroot),
            &options.proposed_components,
        )?;
    }
    for ppa in &options.ppas {
        session.add_ppa(ppa)?;
    }
    session.install_packages(&options.packages)?;

    let code = session.shell(&directory, &options.user)?;
    session.end()?;
    Ok(code)
}
