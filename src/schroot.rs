//! schroot session handling
//!
//! A [`SchrootSession`] owns one `schroot -b` session. It is ended with
//! [`SchrootSession::end`]; a session that is dropped without being ended
//! (early return, error) is ended best-effort from `Drop`.

use crate::affected::probe::{AptProbe, LocaleEncoding, ProbeOutcome};
use crate::command_args::CommandArgs;
use crate::command_runner::{CommandOutput, CommandRunner, ExecError, Invocation};
use crate::error::{Result, ToolsError};
use crate::process_guard::ChildRegistry;
use regex::Regex;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info};

/// Options for a command run inside the session.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub directory: String,
    pub user: String,
    pub timeout: Option<Duration>,
    pub stdin: Option<Vec<u8>>,
    /// Turn a non-zero exit into an error
    pub check: bool,
    /// Inherit the terminal instead of capturing output
    pub foreground: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            directory: "/".to_string(),
            user: "root".to_string(),
            timeout: None,
            stdin: None,
            check: true,
            foreground: false,
        }
    }
}

impl RunOptions {
    pub fn unchecked() -> Self {
        Self {
            check: false,
            ..Self::default()
        }
    }

    pub fn foreground() -> Self {
        Self {
            foreground: true,
            ..Self::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A running schroot session.
pub struct SchrootSession<'r, R: CommandRunner + ?Sized> {
    runner: &'r R,
    chroot: String,
    session: Option<String>,
    /// Whether `apt-get update` ran since the last sources change
    apt_lists_fresh: bool,
    ppa_tooling_installed: bool,
}

impl<'r, R: CommandRunner + ?Sized> SchrootSession<'r, R> {
    /// Begin a session of `chroot` (`schroot -c <chroot> -b`).
    pub fn begin(runner: &'r R, chroot: &str) -> Result<Self> {
        let output = runner
            .run(&Invocation::from_argv(["schroot", "-c", chroot, "-b"]))?
            .ensure_success(&format!("Beginning schroot session for {}", chroot))?;
        let session = output.stdout_text().trim().to_string();
        if session.is_empty() {
            return Err(ToolsError::command_failed(format!(
                "schroot returned no session id for {}",
                chroot
            )));
        }
        debug!("Began schroot session {} of {}", session, chroot);
        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.register_session(&session);
        }

        Ok(Self {
            runner,
            chroot: chroot.to_string(),
            session: Some(session),
            apt_lists_fresh: false,
            ppa_tooling_installed: false,
        })
    }

    pub fn chroot(&self) -> &str {
        &self.chroot
    }

    pub fn session_id(&self) -> &str {
        self.session.as_deref().unwrap_or_default()
    }

    fn invocation(&self, cmd: &[String], options: &RunOptions) -> Invocation {
        let mut invocation = Invocation::from_argv([
            "schroot",
            "-c",
            self.session_id(),
            "-d",
            options.directory.as_str(),
            "-u",
            options.user.as_str(),
            "-r",
        ]);
        if !cmd.is_empty() {
            invocation = invocation.arg("--").args(cmd.iter().cloned());
        }
        if let Some(stdin) = &options.stdin {
            invocation = invocation.stdin_bytes(stdin.clone());
        }
        if options.foreground {
            invocation = invocation.foreground();
        }
        invocation.timeout(options.timeout)
    }

    /// Run `cmd` inside the session.
    ///
    /// An empty `cmd` opens the user's login shell.
    pub fn run<S: AsRef<str>>(&self, cmd: &[S], options: &RunOptions) -> Result<CommandOutput> {
        let cmd: Vec<String> = cmd.iter().map(|s| s.as_ref().to_string()).collect();
        let invocation = self.invocation(&cmd, options);
        info!("Running: {}", invocation.display());
        let output = self.runner.run(&invocation)?;
        if options.check {
            output.ensure_success(&invocation.display())
        } else {
            Ok(output)
        }
    }

    /// Reinstall `package` under `fr_FR.<encoding>` and classify the output.
    pub fn install_probe(
        &self,
        package: &str,
        encoding: LocaleEncoding,
        timeout: Duration,
    ) -> Result<ProbeOutcome> {
        info!("Checking '{}'...", package);
        self.probe(&AptProbe::install(package, encoding), timeout)
    }

    /// Remove `package` under `fr_FR.ISO-8859-1` and classify the output.
    pub fn remove_probe(&self, package: &str, timeout: Duration) -> Result<ProbeOutcome> {
        info!("Remove '{}'...", package);
        self.probe(&AptProbe::remove(package), timeout)
    }

    fn probe(&self, probe: &AptProbe, timeout: Duration) -> Result<ProbeOutcome> {
        let options = RunOptions::unchecked().timeout(timeout);
        let output = match self.run(&probe.to_argv(), &options) {
            Ok(output) => output,
            Err(ToolsError::Exec(ExecError::Timeout { .. })) => {
                error!("Timeout after {} s for {}", timeout.as_secs_f64(), probe.package);
                return Ok(ProbeOutcome::Inconclusive);
            }
            Err(e) => return Err(e),
        };

        let outcome = ProbeOutcome::classify(output.code, &output.stdout);
        if outcome == ProbeOutcome::Inconclusive {
            error!("{}", probe.failure_report(&output.stdout, &output.stderr));
        }
        Ok(outcome)
    }

    /// Version of the installed `package` according to `dpkg -s`.
    pub fn installed_version(&self, package: &str) -> Result<String> {
        let output = self.run(&["dpkg", "-s", package], &RunOptions::default())?;
        let status = output.stdout_text();
        Regex::new(r"(?m)^Version:\s+(.*)$")?
            .captures(&status)
            .and_then(|captures| captures.get(1))
            .map(|version| version.as_str().trim_end().to_string())
            .ok_or_else(|| {
                ToolsError::command_failed(format!("dpkg -s {} printed no Version field", package))
            })
    }

    pub fn apt_update(&mut self) -> Result<()> {
        self.run(&["apt-get", "update"], &RunOptions::foreground())?;
        self.apt_lists_fresh = true;
        Ok(())
    }

    /// Install packages by name or from local `.deb` files.
    ///
    /// `.deb` files on the host are copied to `/root/` inside the session
    /// first. The package lists are refreshed unless already current.
    pub fn install_packages<S: AsRef<str>>(&mut self, packages: &[S]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        if !self.apt_lists_fresh {
            self.apt_update()?;
        }

        let mut targets = Vec::with_capacity(packages.len());
        for package in packages {
            let package = package.as_ref();
            let path = Path::new(package);
            if package.ends_with(".deb") && path.is_file() {
                targets.push(self.copy_into_session(path)?);
            } else {
                targets.push(package.to_string());
            }
        }

        let mut cmd = vec![
            "apt-get".to_string(),
            "install".to_string(),
            "--no-install-recommends".to_string(),
            "-y".to_string(),
        ];
        cmd.extend(targets);
        self.run(&cmd, &RunOptions::foreground())?;
        Ok(())
    }

    fn copy_into_session(&self, path: &Path) -> Result<String> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| ToolsError::validation(format!("{} has no file name", path.display())))?;
        let target = format!("/root/{}", file_name);
        let options = RunOptions {
            stdin: Some(std::fs::read(path)?),
            ..RunOptions::default()
        };
        self.run(&["tee", target.as_str()], &options)?;
        Ok(target)
    }

    /// Enable the `-proposed` pocket for `suite` and refresh the lists.
    pub fn enable_proposed(&mut self, uri: &str, suite: &str, components: &[String]) -> Result<()> {
        let sources = format!(
            "Types: deb\nURIs: {}\nSuites: {}-proposed\nComponents: {}\n",
            uri,
            suite,
            components.join(" ")
        );
        let script = format!(
            "printf '{}' > /etc/apt/sources.list.d/ubuntu-proposed.sources",
            sources
        );
        self.run(&["sh", "-c", script.as_str()], &RunOptions::default())?;
        self.apt_lists_fresh = false;
        self.apt_update()
    }

    /// Add a Launchpad PPA (`owner/name`). `add-apt-repository` refreshes
    /// the lists itself.
    pub fn add_ppa(&mut self, ppa: &str) -> Result<()> {
        if !self.ppa_tooling_installed {
            self.install_packages(&["software-properties-common", "gpg-agent"])?;
            self.ppa_tooling_installed = true;
        }
        let ppa = format!("ppa:{}", ppa.trim_start_matches("ppa:"));
        self.run(
            &["add-apt-repository", "-y", ppa.as_str()],
            &RunOptions::foreground(),
        )?;
        self.apt_lists_fresh = true;
        Ok(())
    }

    pub fn directory_exists(&self, directory: &str) -> Result<bool> {
        let output = self.run(&["test", "-d", directory], &RunOptions::unchecked())?;
        Ok(output.success())
    }

    /// Home directory of `user` as seen inside the chroot.
    pub fn home_directory(&self, user: &str) -> Result<String> {
        let script = format!("realpath ~{}", user);
        let output = self.run(&["sh", "-c", script.as_str()], &RunOptions::default())?;
        Ok(output.stdout_text().trim().to_string())
    }

    pub fn create_directory(&self, directory: &str, owner: &str) -> Result<()> {
        self.run(&["install", "-d", "-o", owner, directory], &RunOptions::default())?;
        Ok(())
    }

    /// Open an interactive shell and return its exit code.
    pub fn shell(&self, directory: &str, user: &str) -> Result<i32> {
        let options = RunOptions {
            directory: directory.to_string(),
            user: user.to_string(),
            check: false,
            foreground: true,
            ..RunOptions::default()
        };
        let output = self.run::<&str>(&[], &options)?;
        Ok(output.exit_code())
    }

    /// End the session (`schroot -c <session> -e`).
    pub fn end(mut self) -> Result<()> {
        self.end_session()
    }

    fn end_session(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        let result = self
            .runner
            .run(&Invocation::from_argv(["schroot", "-c", session.as_str(), "-e"]))
            .map_err(ToolsError::from)
            .and_then(|output| output.ensure_success(&format!("Ending schroot session {}", session)));
        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.unregister_session(&session);
        }
        result.map(|_| debug!("Ended schroot session {}", session))
    }
}

impl<R: CommandRunner + ?Sized> Drop for SchrootSession<'_, R> {
    fn drop(&mut self) {
        if let Err(e) = self.end_session() {
            error!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_runner::ScriptedRunner;

    const ROOT_CALL: [&str; 9] = ["schroot", "-c", "session-id", "-d", "/", "-u", "root", "-r", "--"];

    fn root_call(cmd: &[&str]) -> Vec<String> {
        ROOT_CALL.iter().chain(cmd).map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_begin_run_end() {
        let runner = ScriptedRunner::new()
            .respond(["schroot", "-c", "noble", "-b"], 0, "session-id\n")
            .respond(root_call(&["true"]), 0, "")
            .respond(["schroot", "-c", "session-id", "-e"], 0, "");

        let session = SchrootSession::begin(&runner, "noble").expect("begin");
        assert_eq!(session.session_id(), "session-id");
        session.run(&["true"], &RunOptions::default()).expect("run");
        session.end().expect("end");

        assert!(runner.uncalled().is_empty());
        assert_eq!(runner.call_count(), 3);
    }

    #[test]
    fn test_drop_ends_session() {
        let runner = ScriptedRunner::new()
            .respond(["schroot", "-c", "noble", "-b"], 0, "session-id\n")
            .respond(["schroot", "-c", "session-id", "-e"], 0, "");

        {
            let _session = SchrootSession::begin(&runner, "noble").expect("begin");
        }
        assert!(runner.uncalled().is_empty());
    }

    #[test]
    fn test_checked_run_fails_on_non_zero_exit() {
        let runner = ScriptedRunner::new()
            .respond(["schroot", "-c", "noble", "-b"], 0, "session-id\n")
            .respond(root_call(&["false"]), 1, "")
            .respond(["schroot", "-c", "session-id", "-e"], 0, "");

        let session = SchrootSession::begin(&runner, "noble").expect("begin");
        let err = session.run(&["false"], &RunOptions::default()).unwrap_err();
        assert!(matches!(err, ToolsError::CommandFailed(_)));
        let output = session.run(&["false"], &RunOptions::unchecked()).expect("unchecked");
        assert_eq!(output.code, Some(1));
    }

    #[test]
    fn test_shell_without_separator() {
        let runner = ScriptedRunner::new()
            .respond(["schroot", "-c", "noble", "-b"], 0, "session-id\n")
            .respond(["schroot", "-c", "session-id", "-d", "/tmp", "-u", "me", "-r"], 42, "")
            .respond(["schroot", "-c", "session-id", "-e"], 0, "");

        let session = SchrootSession::begin(&runner, "noble").expect("begin");
        assert_eq!(session.shell("/tmp", "me").expect("shell"), 42);
    }

    #[test]
    fn test_install_probe_timeout_is_inconclusive() {
        let probe = AptProbe::install("dash", LocaleEncoding::Latin1).to_argv();
        let runner = ScriptedRunner::new()
            .respond(["schroot", "-c", "noble", "-b"], 0, "session-id\n")
            .respond_timeout(root_call(&probe.iter().map(String::as_str).collect::<Vec<_>>()))
            .respond(["schroot", "-c", "session-id", "-e"], 0, "");

        let session = SchrootSession::begin(&runner, "noble").expect("begin");
        let outcome = session
            .install_probe("dash", LocaleEncoding::Latin1, Duration::from_secs(1))
            .expect("probe");
        assert_eq!(outcome, ProbeOutcome::Inconclusive);
        assert_eq!(
            runner.calls()[1].timeout_duration(),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_installed_version() {
        let runner = ScriptedRunner::new()
            .respond(["schroot", "-c", "noble", "-b"], 0, "session-id\n")
            .respond(
                root_call(&["dpkg", "-s", "dash"]),
                0,
                "Package: dash\nStatus: install ok installed\nVersion: 0.5.12-6ubuntu5\n",
            )
            .respond(root_call(&["dpkg", "-s", "nothing"]), 0, "Package: nothing\n")
            .respond(["schroot", "-c", "session-id", "-e"], 0, "");

        let session = SchrootSession::begin(&runner, "noble").expect("begin");
        assert_eq!(session.installed_version("dash").expect("version"), "0.5.12-6ubuntu5");
        assert!(session.installed_version("nothing").is_err());
    }

    #[test]
    fn test_empty_session_id_is_an_error() {
        let runner = ScriptedRunner::new().respond(["schroot", "-c", "noble", "-b"], 0, "\n");
        assert!(SchrootSession::begin(&runner, "noble").is_err());
    }
}
