//! Find the package shipping a command found in `PATH`.

use crate::command_runner::{CommandRunner, Invocation};
use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The same path on the other side of the usr-merge
/// (`/usr/bin/x` ↔ `/bin/x`).
pub fn usr_merge_counterpart(path: &Path) -> Option<PathBuf> {
    if let Ok(rest) = path.strip_prefix("/usr") {
        let counterpart = Path::new("/").join(rest);
        return (counterpart != Path::new("/")).then_some(counterpart);
    }
    if path.is_absolute() {
        let rest = path.strip_prefix("/").ok()?;
        return Some(Path::new("/usr").join(rest));
    }
    None
}

/// `dpkg -S <path>`; the matching line on success.
fn dpkg_search<R: CommandRunner + ?Sized>(runner: &R, path: &Path) -> Result<Option<String>> {
    let output = runner.run(&Invocation::new("dpkg").arg("-S").arg(path.to_string_lossy()))?;
    if !output.success() {
        debug!("dpkg -S {}: {}", path.display(), output.stderr_text().trim());
        return Ok(None);
    }
    Ok(output
        .stdout_text()
        .lines()
        .next()
        .map(|line| line.trim().to_string()))
}

/// Look up the package owning `path`, trying its usr-merge counterpart and
/// its canonical path when dpkg does not know it.
pub fn dpkg_which_path<R: CommandRunner + ?Sized>(runner: &R, path: &Path) -> Result<Option<String>> {
    let mut candidates = vec![path.to_path_buf()];
    candidates.extend(usr_merge_counterpart(path));
    if let Ok(canonical) = std::fs::canonicalize(path) {
        if !candidates.contains(&canonical) {
            candidates.push(canonical);
        }
    }

    for candidate in candidates {
        if let Some(found) = dpkg_search(runner, &candidate)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

/// Package line (`pkg: /path`) for `command`, or `None`.
pub fn dpkg_which<R: CommandRunner + ?Sized>(runner: &R, command: &str) -> Result<Option<String>> {
    let Ok(path) = which::which(command) else {
        debug!("{} not found in PATH", command);
        return Ok(None);
    };
    dpkg_which_path(runner, &path)
}

/// Print the package of each command; returns 1 if any was not found.
pub fn run<R: CommandRunner + ?Sized>(runner: &R, commands: &[String]) -> Result<i32> {
    let mut code = 0;
    for command in commands {
        match dpkg_which(runner, command)? {
            Some(found) => println!("{}", found),
            None => code = 1,
        }
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_runner::ScriptedRunner;

    #[test]
    fn test_usr_merge_counterpart() {
        assert_eq!(
            usr_merge_counterpart(Path::new("/usr/bin/ls")),
            Some(PathBuf::from("/bin/ls"))
        );
        assert_eq!(
            usr_merge_counterpart(Path::new("/sbin/e2fsck")),
            Some(PathBuf::from("/usr/sbin/e2fsck"))
        );
        assert_eq!(usr_merge_counterpart(Path::new("/usr")), None);
        assert_eq!(usr_merge_counterpart(Path::new("bin/ls")), None);
    }

    #[test]
    fn test_fallback_to_non_usr_path() {
        let runner = ScriptedRunner::new()
            .respond_output(
                ["dpkg", "-S", "/usr/bin/maint-tools-ls"],
                crate::command_runner::CommandOutput {
                    code: Some(1),
                    stdout: Vec::new(),
                    stderr: b"dpkg-query: no path found matching pattern /usr/bin/maint-tools-ls"
                        .to_vec(),
                },
            )
            .respond(["dpkg", "-S", "/bin/maint-tools-ls"], 0, "coreutils: /bin/maint-tools-ls\n");

        assert_eq!(
            dpkg_which_path(&runner, Path::new("/usr/bin/maint-tools-ls")).expect("lookup"),
            Some("coreutils: /bin/maint-tools-ls".to_string())
        );
        assert_eq!(runner.call_count(), 2);
    }

    #[test]
    fn test_manually_installed_binary() {
        let runner = ScriptedRunner::new()
            .respond(["dpkg", "-S", "/sbin/maint-tools-manual"], 1, "")
            .respond(["dpkg", "-S", "/usr/sbin/maint-tools-manual"], 1, "");

        assert_eq!(
            dpkg_which_path(&runner, Path::new("/sbin/maint-tools-manual")).expect("lookup"),
            None
        );
        assert!(runner.uncalled().is_empty());
    }

    #[test]
    fn test_command_not_in_path() {
        let runner = ScriptedRunner::new();
        assert_eq!(
            dpkg_which(&runner, "maint-tools-non-existing-binary").expect("lookup"),
            None
        );
        assert_eq!(runner.call_count(), 0);
    }
}
