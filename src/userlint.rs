//! Lint commit author and committer identities of a git repository.
//!
//! An identity is valid when the name looks like a real name and the email
//! address has a domain. For invalid identities a `.mailmap` line is
//! suggested when a matching valid identity exists.

use crate::command_runner::{CommandRunner, Invocation};
use crate::error::Result;
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::Path;
use strum::{Display, EnumString};
use tracing::{info, warn};

/// Which side of a commit an identity was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Author,
    Committer,
}

/// A commit identity. Ordered by name, then email, then role.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Person {
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl fmt::Display for Person {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// Exactly one `@` and a dot in the domain. The local part may be empty.
pub fn is_valid_email(email: &str) -> bool {
    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(domain), None) => domain.contains('.'),
        _ => false,
    }
}

/// A real name has at least two words and is not an email address.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('@') && name.contains(' ')
}

impl Person {
    pub fn new(name: &str, email: &str, role: Role) -> Self {
        Self {
            name: name.to_string(),
            email: email.to_string(),
            role,
        }
    }

    pub fn author(name: &str, email: &str) -> Self {
        Self::new(name, email, Role::Author)
    }

    pub fn committer(name: &str, email: &str) -> Self {
        Self::new(name, email, Role::Committer)
    }

    pub fn is_valid(&self) -> bool {
        is_valid_name(&self.name) && is_valid_email(&self.email)
    }

    fn same_identity(&self, other: &Person) -> bool {
        self.name == other.name && self.email == other.email
    }

    /// Email address embedded in the name, e.g. `Jane Doe jane@example.com`.
    fn split_embedded_email(&self) -> Option<(String, String)> {
        let re = Regex::new(r"^(.*?)\s*<?(\S+@[^\s>]+)>?\s*$").ok()?;
        let captures = re.captures(&self.name)?;
        let email = captures[2].to_string();
        is_valid_email(&email).then(|| (captures[1].trim().to_string(), email))
    }

    /// The valid identity this one should map to.
    fn proper_identity(&self, valid: &BTreeSet<Person>) -> Option<Person> {
        let by_email = |email: &str| -> Vec<&Person> {
            valid.iter().filter(|person| person.email == email).collect()
        };

        let mut candidates = Vec::new();
        if is_valid_email(&self.email) {
            candidates = by_email(&self.email);
        }
        if candidates.is_empty() && is_valid_email(&self.name) {
            candidates = by_email(&self.name);
        }
        if candidates.is_empty() {
            if let Some((name, email)) = self.split_embedded_email() {
                candidates = by_email(&email);
                if candidates.is_empty() && is_valid_name(&name) {
                    return Some(Person::new(&name, &email, self.role));
                }
            }
        }
        if candidates.is_empty() {
            candidates = valid.iter().filter(|person| person.name == self.name).collect();
        }

        let mut distinct: Vec<&Person> = Vec::new();
        for candidate in candidates {
            if !distinct.iter().any(|seen| seen.same_identity(candidate)) {
                distinct.push(candidate);
            }
        }
        match distinct.as_slice() {
            [] => None,
            [proper] => Some((*proper).clone()),
            _ => {
                let matches = distinct.iter().map(ToString::to_string).collect::<Vec<_>>();
                warn!(
                    "Found {} matching persons for name '{}': {}",
                    distinct.len(),
                    self.name,
                    matches.join(", ")
                );
                None
            }
        }
    }

    /// `.mailmap` line mapping this identity to its proper one.
    pub fn suggested_mailmap(&self, valid: &BTreeSet<Person>) -> Option<String> {
        self.proper_identity(valid)
            .map(|proper| format!("{} {}", proper, self))
    }
}

/// Identities found in a repository's history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LintReport {
    pub commits: usize,
    pub valid: BTreeSet<Person>,
    pub invalid: BTreeSet<Person>,
}

impl LintReport {
    /// Parse `git log --format=%aN%x00%aE%x00%cN%x00%cE` output.
    ///
    /// Identities are deduplicated by name and email; the first role seen
    /// is kept.
    pub fn from_git_log(log: &str) -> Self {
        let mut report = Self::default();
        let mut seen = HashSet::new();
        for line in log.lines().filter(|line| !line.is_empty()) {
            report.commits += 1;
            let fields: Vec<&str> = line.split('\0').collect();
            let identities = [
                (fields.first(), fields.get(1), Role::Author),
                (fields.get(2), fields.get(3), Role::Committer),
            ];
            for (name, email, role) in identities {
                let (Some(name), Some(email)) = (name, email) else {
                    continue;
                };
                if !seen.insert((name.to_string(), email.to_string())) {
                    continue;
                }
                let person = Person::new(name, email, role);
                if person.is_valid() {
                    report.valid.insert(person);
                } else {
                    report.invalid.insert(person);
                }
            }
        }
        report
    }

    /// Mailmap suggestions for the invalid identities.
    pub fn suggested_mailmap(&self) -> Vec<String> {
        self.invalid
            .iter()
            .filter_map(|person| person.suggested_mailmap(&self.valid))
            .collect()
    }

    /// Log the report; returns the process exit code.
    pub fn log(&self) -> i32 {
        if self.invalid.is_empty() {
            info!(
                "Checked {} commits, found {} valid and no invalid entries.",
                self.commits,
                self.valid.len()
            );
            return 0;
        }

        let invalid = self.invalid.iter().map(ToString::to_string).collect::<Vec<_>>();
        warn!(
            "Checked {} commits, found {} valid and {} invalid entries:\n{}",
            self.commits,
            self.valid.len(),
            self.invalid.len(),
            invalid.join("\n")
        );
        let mailmap = self.suggested_mailmap();
        if !mailmap.is_empty() {
            info!("Suggested mailmap:\n{}", mailmap.join("\n"));
        }
        1
    }
}

/// Read the history of the repository in `directory`.
pub fn read_git_log<R: CommandRunner + ?Sized>(runner: &R, directory: &Path) -> Result<LintReport> {
    let output = runner
        .run(
            &Invocation::from_argv(["git", "log", "--format=%aN%x00%aE%x00%cN%x00%cE"])
                .current_dir(directory),
        )?
        .ensure_success("git log")?;
    Ok(LintReport::from_git_log(&output.stdout_text()))
}

/// Lint the repository in `directory`; returns the process exit code.
pub fn run<R: CommandRunner + ?Sized>(runner: &R, directory: &Path) -> Result<i32> {
    Ok(read_git_log(runner, directory)?.log())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> BTreeSet<Person> {
        BTreeSet::from([Person::author("Benjamin Drung", "bdrung@ubuntu.com")])
    }

    #[test]
    fn test_name_is_email() {
        assert_eq!(
            Person::author("bdrung@ubuntu.com", "").suggested_mailmap(&valid()),
            Some("Benjamin Drung <bdrung@ubuntu.com> bdrung@ubuntu.com <>".to_string())
        );
    }

    #[test]
    fn test_name_contains_email() {
        assert_eq!(
            Person::author("Benjamin Drung bdrung@ubuntu.com", "")
                .suggested_mailmap(&BTreeSet::new()),
            Some(
                "Benjamin Drung <bdrung@ubuntu.com> Benjamin Drung bdrung@ubuntu.com <>"
                    .to_string()
            )
        );
    }

    #[test]
    fn test_empty_email_existing_name() {
        assert_eq!(
            Person::author("Benjamin Drung", "").suggested_mailmap(&valid()),
            Some("Benjamin Drung <bdrung@ubuntu.com> Benjamin Drung <>".to_string())
        );
    }

    #[test]
    fn test_invalid_email() {
        assert_eq!(
            Person::author("bdrung@ubuntu.com", "bdrung@localhost").suggested_mailmap(&valid()),
            Some(
                "Benjamin Drung <bdrung@ubuntu.com> bdrung@ubuntu.com <bdrung@localhost>"
                    .to_string()
            )
        );
    }

    #[test]
    fn test_invalid_name() {
        assert_eq!(
            Person::author("bdrung", "bdrung@ubuntu.com").suggested_mailmap(&valid()),
            Some("Benjamin Drung <bdrung@ubuntu.com> bdrung <bdrung@ubuntu.com>".to_string())
        );
    }

    #[test]
    fn test_multiple_email_addresses() {
        let mut valid = valid();
        valid.insert(Person::author("Benjamin Drung", "bdrung@debian.org"));
        assert_eq!(
            Person::author("Benjamin Drung", "bdrung@localhost").suggested_mailmap(&valid),
            None
        );
    }

    #[test]
    fn test_same_identity_in_both_roles_is_one_match() {
        let mut valid = valid();
        valid.insert(Person::committer("Benjamin Drung", "bdrung@ubuntu.com"));
        assert!(Person::author("Benjamin Drung", "").suggested_mailmap(&valid).is_some());
    }

    #[test]
    fn test_sort() {
        let mut persons = vec![
            Person::author("John Doe", "john.doe@example.com"),
            Person::committer("Benjamin Drung", "bdrung@ubuntu.com"),
        ];
        persons.sort();
        assert_eq!(persons[0].name, "Benjamin Drung");
    }

    #[test]
    fn test_role_names() {
        assert_eq!(Role::Committer.to_string(), "committer");
        assert_eq!("author".parse::<Role>(), Ok(Role::Author));
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("bdrung@ubuntu.com"));
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("iain@intrepid"));
        assert!(!is_valid_email("a@b@c.d"));
        assert!(is_valid_email("@example.com"));
        assert!(!is_valid_email("example.com"));
    }

    #[test]
    fn test_name_validation() {
        assert!(is_valid_name("Benjamin Drung"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("bdrung@ubuntu.com"));
        assert!(!is_valid_name("mathiaz"));
    }

    #[test]
    fn test_report_from_git_log() {
        let log = "Benjamin Drung\0bdrung@ubuntu.com\0Benjamin Drung\0bdrung@ubuntu.com\n\
                   bdrung@ubuntu.com\0\0Benjamin Drung\0bdrung@ubuntu.com\n";
        let report = LintReport::from_git_log(log);
        assert_eq!(report.commits, 2);
        assert_eq!(report.valid.len(), 1);
        assert_eq!(
            report.invalid,
            BTreeSet::from([Person::author("bdrung@ubuntu.com", "")])
        );
        assert_eq!(
            report.suggested_mailmap(),
            ["Benjamin Drung <bdrung@ubuntu.com> bdrung@ubuntu.com <>"]
        );
        assert_eq!(report.log(), 1);
    }
}
