//! Sequential probe driver.
//!
//! A package is first reinstalled under `fr_FR.ISO-8859-1`. Only if that
//! shows the decode error is it reinstalled under `fr_FR.UTF-8` in a fresh
//! session and then removed under ISO-8859-1, to tell whether the failure
//! comes from the package itself or from one of its dependencies.

use super::db::AffectionDb;
use super::probe::{LocaleEncoding, ProbeOutcome};
use crate::command_runner::CommandRunner;
use crate::error::Result;
use crate::schroot::SchrootSession;
use std::time::{Duration, Instant};
use tracing::info;

fn timed<T>(f: impl FnOnce() -> Result<T>) -> Result<(T, f64)> {
    let start = Instant::now();
    let value = f()?;
    Ok((value, start.elapsed().as_secs_f64()))
}

impl AffectionDb {
    /// Probe `package` inside sessions of `chroot` and store the results.
    pub fn process_package<R: CommandRunner + ?Sized>(
        &self,
        runner: &R,
        package: &str,
        chroot: &str,
        timeout: Duration,
    ) -> Result<()> {
        let session = SchrootSession::begin(runner, chroot)?;
        let (outcome, duration) =
            timed(|| session.install_probe(package, LocaleEncoding::Latin1, timeout))?;
        info!("Installed {} in {:.3} s. Result: {}", package, duration, outcome);
        match outcome {
            ProbeOutcome::Inconclusive => {
                self.set_install(package, None, duration, None)?;
                return session.end();
            }
            ProbeOutcome::Unaffected => {
                let version = session.installed_version(package)?;
                self.set_install(package, Some(false), duration, Some(&version))?;
                return session.end();
            }
            ProbeOutcome::Affected => session.end()?,
        }

        let session = SchrootSession::begin(runner, chroot)?;
        let (outcome, duration) =
            timed(|| session.install_probe(package, LocaleEncoding::Utf8, timeout))?;
        if outcome == ProbeOutcome::Inconclusive {
            // Even the UTF-8 installation failed.
            self.set_install(package, Some(true), duration, None)?;
            return session.end();
        }

        let version = session.installed_version(package)?;
        self.set_install(package, Some(true), duration, Some(&version))?;

        let (outcome, duration) = timed(|| session.remove_probe(package, timeout))?;
        info!("Removed {} in {:.3} s. Result: {}", package, duration, outcome);
        self.set_remove(package, outcome.into(), duration)?;
        session.end()
    }

    /// Process every package that needs it and matches the filters.
    pub fn process_matching<R: CommandRunner + ?Sized>(
        &self,
        runner: &R,
        chroot: &str,
        only: &str,
        section: &str,
        retry: f64,
        timeout: Duration,
    ) -> Result<usize> {
        let packages = self.unprocessed(only, section, retry)?;
        info!("{} packages to process", packages.len());
        for package in &packages {
            self.process_package(runner, package, chroot, timeout)?;
        }
        Ok(packages.len())
    }
}
