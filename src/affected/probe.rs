//! apt-get probes run under a non-UTF-8 locale.

use crate::command_args::CommandArgs;
use strum::{Display, EnumString};

/// Marker printed when a maintainer script chokes on non-UTF-8 output.
pub const UNICODE_DECODE_MARKER: &[u8] = b"UnicodeDecodeError: 'utf-8' codec can't decode byte";

/// Result of one install or removal probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ProbeOutcome {
    /// The decode error showed up in the output
    Affected,
    Unaffected,
    /// Timeout or an unrelated failure
    Inconclusive,
}

impl ProbeOutcome {
    /// Classify a finished apt-get run.
    pub fn classify(code: Option<i32>, stdout: &[u8]) -> Self {
        if contains(stdout, UNICODE_DECODE_MARKER) {
            Self::Affected
        } else if code != Some(0) {
            Self::Inconclusive
        } else {
            Self::Unaffected
        }
    }
}

impl From<ProbeOutcome> for Option<bool> {
    fn from(outcome: ProbeOutcome) -> Self {
        match outcome {
            ProbeOutcome::Affected => Some(true),
            ProbeOutcome::Unaffected => Some(false),
            ProbeOutcome::Inconclusive => None,
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

/// Character encoding of the `fr_FR` locale a probe runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
pub enum LocaleEncoding {
    #[default]
    #[strum(serialize = "ISO-8859-1")]
    Latin1,
    #[strum(serialize = "UTF-8")]
    Utf8,
}

impl LocaleEncoding {
    pub fn locale(&self) -> String {
        format!("fr_FR.{}", self)
    }

    /// Decode process output written in this encoding.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            // Every byte is a valid ISO-8859-1 code point.
            Self::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

/// Which apt-get operation a probe performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ProbeAction {
    #[strum(serialize = "install")]
    Install,
    #[strum(serialize = "remove")]
    Remove,
}

/// `apt-get install --reinstall` / `apt-get remove` under a given locale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AptProbe {
    pub action: ProbeAction,
    pub package: String,
    pub encoding: LocaleEncoding,
}

impl AptProbe {
    pub fn install(package: &str, encoding: LocaleEncoding) -> Self {
        Self {
            action: ProbeAction::Install,
            package: package.to_string(),
            encoding,
        }
    }

    /// Removal always runs under ISO-8859-1.
    pub fn remove(package: &str) -> Self {
        Self {
            action: ProbeAction::Remove,
            package: package.to_string(),
            encoding: LocaleEncoding::Latin1,
        }
    }

    /// Framed apt-get output of a failed run, stderr after stdout.
    pub fn failure_report(&self, stdout: &[u8], stderr: &[u8]) -> String {
        let mut report = format!(
            "Failed to {}:\n{} {} {}\n{}",
            self.action,
            ">".repeat(40),
            self.package,
            ">".repeat(40),
            self.encoding.decode(stdout)
        );
        if !stderr.is_empty() {
            if !report.ends_with('\n') {
                report.push('\n');
            }
            report.push_str(&self.encoding.decode(stderr));
        }
        if !report.ends_with('\n') {
            report.push('\n');
        }
        report.push_str(&format!("{} {} {}", "<".repeat(40), self.package, "<".repeat(40)));
        report
    }
}

impl CommandArgs for AptProbe {
    fn program(&self) -> &'static str {
        "apt-get"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![self.action.to_string()];
        match self.action {
            ProbeAction::Install => {
                args.extend(["--reinstall", "-y", "--no-install-recommends"].map(String::from))
            }
            ProbeAction::Remove => args.push("-y".to_string()),
        }
        args.push(self.package.clone());
        args
    }

    fn env_vars(&self) -> Vec<(String, String)> {
        vec![
            ("LC_ALL".to_string(), self.encoding.locale()),
            ("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_argv() {
        let probe = AptProbe::install("dash", LocaleEncoding::Latin1);
        assert_eq!(
            probe.to_argv(),
            [
                "env",
                "LC_ALL=fr_FR.ISO-8859-1",
                "DEBIAN_FRONTEND=noninteractive",
                "apt-get",
                "install",
                "--reinstall",
                "-y",
                "--no-install-recommends",
                "dash"
            ]
        );
    }

    #[test]
    fn test_remove_argv() {
        assert_eq!(
            AptProbe::remove("dash").to_argv(),
            [
                "env",
                "LC_ALL=fr_FR.ISO-8859-1",
                "DEBIAN_FRONTEND=noninteractive",
                "apt-get",
                "remove",
                "-y",
                "dash"
            ]
        );
    }

    #[test]
    fn test_classify() {
        let affected = b"Setting up python3 ...\nUnicodeDecodeError: 'utf-8' codec can't decode byte 0xe9 in position 3\n";
        assert_eq!(ProbeOutcome::classify(Some(100), affected), ProbeOutcome::Affected);
        assert_eq!(ProbeOutcome::classify(Some(100), b"E: failed"), ProbeOutcome::Inconclusive);
        assert_eq!(ProbeOutcome::classify(None, b""), ProbeOutcome::Inconclusive);
        assert_eq!(ProbeOutcome::classify(Some(0), b"done"), ProbeOutcome::Unaffected);
    }

    #[test]
    fn test_outcome_to_option() {
        assert_eq!(Option::<bool>::from(ProbeOutcome::Affected), Some(true));
        assert_eq!(Option::<bool>::from(ProbeOutcome::Unaffected), Some(false));
        assert_eq!(Option::<bool>::from(ProbeOutcome::Inconclusive), None);
    }

    #[test]
    fn test_failure_report_includes_stderr() {
        let probe = AptProbe::install("broken", LocaleEncoding::Latin1);
        let report = probe.failure_report(
            b"Param\xe8tres de broken\n",
            b"E: Sub-process /usr/bin/dpkg returned an error code (1)\n",
        );
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines[0], "Failed to install:");
        assert_eq!(lines[1], format!("{0} broken {0}", ">".repeat(40)));
        assert_eq!(lines[2], "Paramètres de broken");
        assert_eq!(lines[3], "E: Sub-process /usr/bin/dpkg returned an error code (1)");
        assert_eq!(lines[4], format!("{0} broken {0}", "<".repeat(40)));
    }

    #[test]
    fn test_failure_report_without_output() {
        let report = AptProbe::remove("dash").failure_report(b"", b"");
        assert_eq!(report.lines().count(), 3);
        assert!(report.starts_with("Failed to remove:\n"));
    }

    #[test]
    fn test_latin1_decoding() {
        assert_eq!(LocaleEncoding::Latin1.decode(b"caf\xe9"), "café");
        assert_eq!(LocaleEncoding::Utf8.locale(), "fr_FR.UTF-8");
    }
}
