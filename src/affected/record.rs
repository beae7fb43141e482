//! Per-package affectedness record.

use serde::Serialize;
use std::fmt;

/// One row of the `package_affected` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageRecord {
    pub name: String,
    pub source: String,
    pub section: String,
    pub install_affected: Option<bool>,
    /// Seconds spent in the install probe
    pub install_duration: Option<f64>,
    pub install_version: Option<String>,
    pub remove_affected: Option<bool>,
    /// Seconds spent in the removal probe
    pub remove_duration: Option<f64>,
}

impl PackageRecord {
    /// A record that was never probed.
    pub fn new(name: &str, source: &str, section: &str) -> Self {
        Self {
            name: name.to_string(),
            source: source.to_string(),
            section: section.to_string(),
            install_affected: None,
            install_duration: None,
            install_version: None,
            remove_affected: None,
            remove_duration: None,
        }
    }

    /// Install was never measured, or install was affected but removal was
    /// never measured.
    pub fn needs_processing(&self) -> bool {
        self.install_duration.is_none()
            || (self.install_affected == Some(true) && self.remove_duration.is_none())
    }

    /// An inconclusive leg that finished within `limit` seconds.
    pub fn needs_retry(&self, limit: f64) -> bool {
        let leg = |affected: Option<bool>, duration: Option<f64>| {
            affected.is_none() && duration.is_some_and(|duration| duration <= limit)
        };
        leg(self.install_affected, self.install_duration)
            || leg(self.remove_affected, self.remove_duration)
    }
}

/// Counts over all records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    /// Records that still need processing
    pub pending: usize,
    pub install_affected: usize,
    pub remove_affected: usize,
    pub unaffected: usize,
    /// Install probe ran but was inconclusive
    pub inconclusive: usize,
}

impl Summary {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a PackageRecord>) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.total += 1;
            if record.needs_processing() {
                summary.pending += 1;
            }
            match (record.install_affected, record.install_duration) {
                (Some(true), _) => summary.install_affected += 1,
                (Some(false), _) => summary.unaffected += 1,
                (None, Some(_)) => summary.inconclusive += 1,
                (None, None) => {}
            }
            if record.remove_affected == Some(true) {
                summary.remove_affected += 1;
            }
        }
        summary
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Packages:         {}", self.total)?;
        writeln!(f, "Pending:          {}", self.pending)?;
        writeln!(f, "Install affected: {}", self.install_affected)?;
        writeln!(f, "Remove affected:  {}", self.remove_affected)?;
        writeln!(f, "Unaffected:       {}", self.unaffected)?;
        write!(f, "Inconclusive:     {}", self.inconclusive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probed(affected: Option<bool>, duration: f64) -> PackageRecord {
        PackageRecord {
            install_affected: affected,
            install_duration: Some(duration),
            ..PackageRecord::new("python3-keystone", "keystone", "main")
        }
    }

    #[test]
    fn test_new_record_needs_processing() {
        let record = PackageRecord::new("dash", "dash", "main");
        assert!(record.needs_processing());
        assert!(!record.needs_retry(f64::MAX));
    }

    #[test]
    fn test_affected_install_needs_removal() {
        let mut record = probed(Some(true), 12.0);
        assert!(record.needs_processing());
        record.remove_affected = Some(false);
        record.remove_duration = Some(3.0);
        assert!(!record.needs_processing());
    }

    #[test]
    fn test_retry_limit() {
        let record = probed(None, 20.0);
        assert!(!record.needs_processing());
        assert!(!record.needs_retry(0.0));
        assert!(record.needs_retry(20.0));
        assert!(record.needs_retry(60.0));
        assert!(!probed(Some(false), 1.0).needs_retry(60.0));
    }

    #[test]
    fn test_remove_leg_retry() {
        let record = PackageRecord {
            remove_affected: None,
            remove_duration: Some(5.0),
            ..probed(Some(true), 30.0)
        };
        assert!(record.needs_retry(10.0));
        assert!(!record.needs_retry(4.0));
    }

    #[test]
    fn test_summary() {
        let records = [
            PackageRecord::new("cloud-init", "cloud-init", "main"),
            probed(Some(false), 1.0),
            probed(None, 20.0),
            PackageRecord {
                remove_affected: Some(true),
                remove_duration: Some(2.0),
                ..probed(Some(true), 10.0)
            },
        ];
        assert_eq!(
            Summary::from_records(&records),
            Summary {
                total: 4,
                pending: 1,
                install_affected: 1,
                remove_affected: 1,
                unaffected: 1,
                inconclusive: 1,
            }
        );
    }
}
