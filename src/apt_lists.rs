//! Reader for the APT package lists (`/var/lib/apt/lists`).
//!
//! Each `*_Packages` index belongs to the `Release`/`InRelease` file of its
//! suite, which names the archive `Origin`. List file names follow APT's
//! URI mangling: `<host>_<path>_dists_<suite>_<component>_binary-<arch>_Packages`.

use crate::error::Result;
use debian_packaging::binary_package_control::BinaryPackageControlFile;
use debian_packaging::control::ControlParagraphReader;
use debian_packaging::package_version::PackageVersion;
use debian_packaging::repository::release::ReleaseFile;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_LISTS_DIR: &str = "/var/lib/apt/lists";

/// One binary package stanza from a `Packages` index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPackage {
    pub name: String,
    pub architecture: String,
    pub version: PackageVersion,
    /// Source package name (without a version in parentheses)
    pub source: String,
    /// Archive component (`main`, `universe`, …)
    pub component: String,
    /// `Origin` of the archive the index came from
    pub origin: Option<String>,
}

impl BinaryPackage {
    /// Build from a `Packages` stanza. `Package`, `Version` and
    /// `Architecture` are required.
    pub fn from_control(
        control: &BinaryPackageControlFile<'_>,
        list_component: &str,
        origin: Option<&str>,
    ) -> Result<Self> {
        let name = control.package()?.to_string();
        let source = control
            .source()
            .and_then(|source| source.split_whitespace().next())
            .unwrap_or(&name)
            .to_string();
        let component = control
            .field_str("Filename")
            .and_then(|filename| {
                let mut segments = filename.split('/');
                match (segments.next(), segments.next()) {
                    (Some("pool"), Some(component)) => Some(component.to_string()),
                    _ => None,
                }
            })
            .unwrap_or_else(|| list_component.to_string());

        Ok(Self {
            architecture: control.architecture()?.to_string(),
            version: control.version()?,
            source,
            component,
            origin: origin.map(str::to_string),
            name,
        })
    }

    /// Whether this package is installable on `architecture`.
    pub fn matches_architecture(&self, architecture: &str) -> bool {
        self.architecture == architecture || self.architecture == "all"
    }
}

/// Where a `Packages` list sits within its archive.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ListLocation {
    /// File name prefix shared with the suite's Release files
    release_prefix: String,
    component: String,
}

impl ListLocation {
    fn parse(file_name: &str) -> Option<Self> {
        let index = file_name.find("_dists_")?;
        let rest = &file_name[index + "_dists_".len()..];
        let mut segments = rest.split('_');
        let suite = segments.next()?;
        let component = segments.next()?;
        Some(Self {
            release_prefix: format!("{}_dists_{}_", &file_name[..index], suite),
            component: component.to_string(),
        })
    }
}

/// A directory of downloaded APT lists.
#[derive(Debug, Clone)]
pub struct AptLists {
    dir: PathBuf,
}

impl AptLists {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Uncompressed `*_Packages` indices, sorted by file name.
    pub fn package_indices(&self) -> Result<Vec<PathBuf>> {
        let mut indices = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_index = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with("_Packages"));
            if is_index && path.is_file() {
                indices.push(path);
            }
        }
        indices.sort();
        Ok(indices)
    }

    /// `Origin` field of the Release file starting with `prefix`.
    ///
    /// `InRelease` is preferred. One that cannot be read as a signed
    /// release falls back to the plain `Release` file.
    fn origin(&self, prefix: &str) -> Result<Option<String>> {
        let in_release = self.dir.join(format!("{}InRelease", prefix));
        if in_release.is_file() {
            match ReleaseFile::from_armored_reader(BufReader::new(File::open(&in_release)?)) {
                Ok(release) => return Ok(release.origin().map(str::to_string)),
                Err(e) => warn!("Failed to read {}: {}", in_release.display(), e),
            }
        }

        let release = self.dir.join(format!("{}Release", prefix));
        if release.is_file() {
            let release = ReleaseFile::from_reader(BufReader::new(File::open(&release)?))?;
            return Ok(release.origin().map(str::to_string));
        }

        warn!("No Release file found for {}", prefix);
        Ok(None)
    }

    /// All binary package stanzas of all indices.
    ///
    /// Stanzas lacking a package name, version or architecture are skipped
    /// with a warning.
    pub fn packages(&self) -> Result<Vec<BinaryPackage>> {
        let mut origins: HashMap<String, Option<String>> = HashMap::new();
        let mut packages = Vec::new();

        for index in self.package_indices()? {
            let file_name = index
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let (origin, component) = match ListLocation::parse(&file_name) {
                Some(location) => {
                    if !origins.contains_key(&location.release_prefix) {
                        let origin = self.origin(&location.release_prefix)?;
                        origins.insert(location.release_prefix.clone(), origin);
                    }
                    (
                        origins.get(&location.release_prefix).cloned().flatten(),
                        location.component,
                    )
                }
                None => (None, String::new()),
            };

            let before = packages.len();
            for paragraph in ControlParagraphReader::new(BufReader::new(File::open(&index)?)) {
                let control = BinaryPackageControlFile::from(paragraph?);
                match BinaryPackage::from_control(&control, &component, origin.as_deref()) {
                    Ok(package) => packages.push(package),
                    Err(e) => warn!("Skipping stanza in {}: {}", file_name, e),
                }
            }
            debug!(
                "Read {} packages from {} (origin {:?})",
                packages.len() - before,
                file_name,
                origin
            );
        }

        Ok(packages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn control(text: &str) -> BinaryPackageControlFile<'static> {
        let paragraph = ControlParagraphReader::new(text.as_bytes())
            .next()
            .expect("one stanza")
            .expect("valid stanza");
        BinaryPackageControlFile::from(paragraph)
    }

    #[test]
    fn test_list_location() {
        let location = ListLocation::parse(
            "archive.ubuntu.com_ubuntu_dists_noble-updates_universe_binary-amd64_Packages",
        )
        .expect("location");
        assert_eq!(
            location.release_prefix,
            "archive.ubuntu.com_ubuntu_dists_noble-updates_"
        );
        assert_eq!(location.component, "universe");
        assert_eq!(ListLocation::parse("ppa_Packages"), None);
    }

    #[test]
    fn test_source_version_is_stripped() {
        let control = control(
            "Package: libdpkg-perl\nArchitecture: all\nVersion: 1.22.6ubuntu6\nSource: dpkg (1.22.6ubuntu6)\nFilename: pool/main/d/dpkg/libdpkg-perl_1.22.6ubuntu6_all.deb\n",
        );
        let package =
            BinaryPackage::from_control(&control, "universe", Some("Ubuntu")).expect("package");
        assert_eq!(package.source, "dpkg");
        assert_eq!(package.component, "main");
        assert_eq!(package.version.to_string(), "1.22.6ubuntu6");
        assert!(package.matches_architecture("amd64"));
    }

    #[test]
    fn test_source_defaults_to_package() {
        let control = control("Package: dash\nArchitecture: amd64\nVersion: 0.5.12-6ubuntu5\n");
        let package = BinaryPackage::from_control(&control, "main", None).expect("package");
        assert_eq!(package.source, "dash");
        assert_eq!(package.component, "main");
        assert!(!package.matches_architecture("i386"));
    }

    #[test]
    fn test_stanza_without_version_is_rejected() {
        let control = control("Package: dash\nArchitecture: amd64\n");
        assert!(BinaryPackage::from_control(&control, "main", None).is_err());
    }

    #[test]
    fn test_broken_in_release_falls_back_to_release() {
        let dir = TempDir::new().expect("tempdir");
        let prefix = "archive.ubuntu.com_ubuntu_dists_noble_";
        std::fs::write(dir.path().join(format!("{}InRelease", prefix)), "Origin: Ubuntu\n")
            .expect("write");
        std::fs::write(
            dir.path().join(format!("{}Release", prefix)),
            "Origin: Ubuntu\nSuite: noble\nSHA256:\n 0123 42 main/binary-amd64/Packages\n",
        )
        .expect("write");

        let lists = AptLists::new(dir.path());
        assert_eq!(lists.origin(prefix).expect("origin").as_deref(), Some("Ubuntu"));
        assert_eq!(lists.origin("missing_dists_noble_").expect("origin"), None);
    }
}
