//! Pre-flight checks for the external programs a tool drives.
//!
//! Run from `main` before a subcommand starts, so a missing `schroot` is
//! reported up front instead of in the middle of a package scan.

use tracing::debug;

/// Result of environment verification
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SanityCheckResult {
    pub missing_binaries: Vec<String>,
}

impl SanityCheckResult {
    /// Returns true if all checks passed
    pub fn is_ok(&self) -> bool {
        self.missing_binaries.is_empty()
    }

    /// Error text naming the Debian packages to install.
    pub fn error_message(&self) -> String {
        let mut message = String::from("Missing required programs:\n");
        for binary in &self.missing_binaries {
            message.push_str(&format!(
                "  {} (install: apt install {})\n",
                binary,
                package_for_binary(binary)
            ));
        }
        let packages: Vec<&str> = self
            .missing_binaries
            .iter()
            .map(|binary| package_for_binary(binary))
            .collect();
        message.push_str(&format!("Install them with: sudo apt install {}", packages.join(" ")));
        message
    }
}

/// Check if a binary is available in PATH
pub fn binary_exists(name: &str) -> bool {
    which::which(name).is_ok()
}

/// Map binary names to the Debian packages shipping them
fn package_for_binary(binary: &str) -> &str {
    match binary {
        "xdg-open" => "xdg-utils",
        "add-apt-repository" => "software-properties-common",
        other => other,
    }
}

/// Check that every program in `required` is in PATH.
pub fn verify_binaries(required: &[&str]) -> SanityCheckResult {
    let missing_binaries = required
        .iter()
        .filter(|binary| !binary_exists(binary))
        .map(|binary| (*binary).to_string())
        .collect::<Vec<_>>();
    debug!(
        "Pre-flight check of {:?}: {} missing",
        required,
        missing_binaries.len()
    );
    SanityCheckResult { missing_binaries }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_exists_sh() {
        assert!(binary_exists("sh"), "sh should be available");
    }

    #[test]
    fn test_binary_exists_nonexistent() {
        assert!(!binary_exists("this_binary_definitely_does_not_exist_12345"));
    }

    #[test]
    fn test_verify_binaries() {
        let result = verify_binaries(&["sh", "this_binary_definitely_does_not_exist_12345"]);
        assert_eq!(
            result.missing_binaries,
            ["this_binary_definitely_does_not_exist_12345"]
        );
        assert!(!result.is_ok());
        assert!(verify_binaries(&["sh"]).is_ok());
    }

    #[test]
    fn test_error_message_names_packages() {
        let result = SanityCheckResult {
            missing_binaries: vec!["schroot".to_string(), "xdg-open".to_string()],
        };
        let message = result.error_message();
        assert!(message.contains("xdg-open (install: apt install xdg-utils)"));
        assert!(message.ends_with("sudo apt install schroot xdg-utils"));
    }
}
