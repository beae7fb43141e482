//! Save a debdiff read from stdin under its canonical name
//! `<source>_<version>.debdiff`.
//!
//! Source and version come from the first entry added to
//! `debian/changelog` by the diff.

use crate::command_runner::{CommandRunner, Invocation};
use crate::error::Result;
use debian_packaging::package_version::PackageVersion;
use regex::Regex;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DebdiffError {
    #[error("debian/changelog not found in the debdiff")]
    ChangelogNotFound,

    #[error("no new version found in debian/changelog of the debdiff")]
    MissingVersion,

    #[error("{} already exists with different content (use --force to overwrite)", .0.display())]
    Exists(PathBuf),
}

/// Added lines per target file of a unified diff.
///
/// Hunk headers are honoured, so an added line starting with `++` is not
/// mistaken for a file header.
fn added_lines(diff: &str) -> Vec<(String, Vec<&str>)> {
    let mut files: Vec<(String, Vec<&str>)> = Vec::new();
    let mut old_remaining = 0usize;
    let mut new_remaining = 0usize;

    for line in diff.lines() {
        if old_remaining > 0 || new_remaining > 0 {
            match line.chars().next() {
                Some('+') => {
                    new_remaining = new_remaining.saturating_sub(1);
                    if let Some((_, added)) = files.last_mut() {
                        added.push(&line[1..]);
                    }
                }
                Some('-') => old_remaining = old_remaining.saturating_sub(1),
                Some('\\') => {}
                _ => {
                    old_remaining = old_remaining.saturating_sub(1);
                    new_remaining = new_remaining.saturating_sub(1);
                }
            }
            continue;
        }

        if let Some(target) = line.strip_prefix("+++ ") {
            let path = target.split('\t').next().unwrap_or(target).trim_end();
            // Strip the leading `<package>-<version>/` (or `b/`) component.
            let path = path.split_once('/').map_or(path, |(_, rest)| rest);
            files.push((path.to_string(), Vec::new()));
        } else if let Some(header) = line.strip_prefix("@@ ") {
            if let Some((old, new)) = parse_hunk_header(header) {
                old_remaining = old;
                new_remaining = new;
            }
        }
    }
    files
}

/// Line counts from `-a,b +c,d @@`; a missing count means 1.
fn parse_hunk_header(header: &str) -> Option<(usize, usize)> {
    let mut ranges = header.split_whitespace();
    let count = |range: &str| -> Option<usize> {
        match range.split_once(',') {
            Some((_, count)) => count.parse().ok(),
            None => Some(1),
        }
    };
    let old = count(ranges.next()?.strip_prefix('-')?)?;
    let new = count(ranges.next()?.strip_prefix('+')?)?;
    Some((old, new))
}

/// Version without the `epoch:` prefix.
///
/// Strings that are not Debian versions are returned unchanged.
pub fn strip_epoch(version: &str) -> Cow<'_, str> {
    match PackageVersion::parse(version) {
        Ok(parsed) if parsed.epoch().is_some() => Cow::Owned(match parsed.debian_revision() {
            Some(revision) => format!("{}-{}", parsed.upstream_version(), revision),
            None => parsed.upstream_version().to_string(),
        }),
        _ => Cow::Borrowed(version),
    }
}

/// `<source>_<version without epoch>.debdiff`
pub fn derive_filename(diff: &str) -> Result<String> {
    let files = added_lines(diff);
    let (_, changelog) = files
        .iter()
        .find(|(path, _)| path == "debian/changelog")
        .ok_or(DebdiffError::ChangelogNotFound)?;

    let header = Regex::new(r"^(\S+) \(([^)]+)\)")?;
    let captures = changelog
        .iter()
        .find_map(|line| header.captures(line))
        .ok_or(DebdiffError::MissingVersion)?;
    Ok(format!(
        "{}_{}.debdiff",
        &captures[1],
        strip_epoch(&captures[2])
    ))
}

/// Write `content` to `path`.
///
/// An existing file with identical content is left untouched. Different
/// content is only replaced with `overwrite`.
pub fn save(path: &Path, content: &str, overwrite: bool) -> Result<()> {
    if let Ok(existing) = std::fs::read_to_string(path) {
        if existing == content {
            info!("{} already exists with the same content.", path.display());
            return Ok(());
        }
        if !overwrite {
            return Err(DebdiffError::Exists(path.to_path_buf()).into());
        }
    }
    std::fs::write(path, content)?;
    info!("Saved debdiff to {}", path.display());
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    pub directory: PathBuf,
    pub force: bool,
    /// Open the saved file with `xdg-open`
    pub open: bool,
}

/// Save the debdiff `input`; returns the process exit code.
pub fn run<R: CommandRunner + ?Sized>(runner: &R, input: &str, options: &SaveOptions) -> Result<i32> {
    if input.is_empty() {
        error!("No debdiff provided on stdin.");
        return Ok(1);
    }

    let path = options.directory.join(derive_filename(input)?);
    if let Err(e) = save(&path, input, options.force) {
        error!("{}", e);
        return Ok(1);
    }

    if options.open {
        let output = runner.run(
            &Invocation::new("xdg-open")
                .arg(path.to_string_lossy())
                .foreground(),
        )?;
        if !output.success() {
            error!("xdg-open {} failed with exit code {}", path.display(), output.exit_code());
        }
    }
    Ok(0)
}
