//! Optional JSON configuration providing defaults for the tools.
//!
//! Looked up at `--config PATH`, else `$XDG_CONFIG_HOME/maint-tools/config.json`.
//! A missing default file is not an error; command line flags override
//! every value found here.
//!
//! ```json
//! {
//!   "find_affected": { "chroot": "noble-locale", "timeout": 1800 },
//!   "schroot_wrapper": { "proposed_components": ["main", "universe", "restricted"] }
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// `seconds` as a `Duration` if it is positive and representable.
pub fn positive_duration(seconds: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(seconds)
        .ok()
        .filter(|duration| !duration.is_zero())
}

/// Defaults for `find-affected`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FindAffectedConfig {
    pub chroot: Option<String>,
    pub arch: Option<String>,
    pub db: Option<PathBuf>,
    /// Seconds per install or removal probe
    pub timeout: Option<f64>,
    pub apt_lists: Option<PathBuf>,
}

impl FindAffectedConfig {
    /// Configured probe timeout; `None` if unset or invalid.
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.and_then(positive_duration)
    }
}

/// Defaults for `schroot-wrapper`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchrootWrapperConfig {
    pub chroot: Option<String>,
    pub proposed_uri: Option<String>,
    pub proposed_components: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub find_affected: FindAffectedConfig,
    pub schroot_wrapper: SchrootWrapperConfig,
}

impl ToolsConfig {
    /// `$XDG_CONFIG_HOME/maint-tools/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("maint-tools").join("config.json"))
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse configuration JSON {:?}", path.as_ref()))?;

        Ok(config)
    }

    /// Load `explicit` if given, else the default file if it exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => {
                    debug!("No configuration file, using built-in defaults");
                    return Ok(Self::default());
                }
            },
        };
        debug!("Loading configuration from {}", path.display());
        let config = Self::load_from_file(&path)?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let strings = [
            ("find_affected.chroot", self.find_affected.chroot.as_deref()),
            ("find_affected.arch", self.find_affected.arch.as_deref()),
            ("schroot_wrapper.chroot", self.schroot_wrapper.chroot.as_deref()),
            (
                "schroot_wrapper.proposed_uri",
                self.schroot_wrapper.proposed_uri.as_deref(),
            ),
        ];
        for (key, value) in strings {
            if value.is_some_and(|value| value.trim().is_empty()) {
                anyhow::bail!("{} must not be empty", key);
            }
        }

        for (key, value) in [
            ("find_affected.db", self.find_affected.db.as_deref()),
            ("find_affected.apt_lists", self.find_affected.apt_lists.as_deref()),
        ] {
            if value.is_some_and(|path| path.as_os_str().is_empty()) {
                anyhow::bail!("{} must not be empty", key);
            }
        }

        if let Some(timeout) = self.find_affected.timeout {
            if positive_duration(timeout).is_none() {
                anyhow::bail!(
                    "find_affected.timeout must be a positive number of seconds, got {}",
                    timeout
                );
            }
        }

        if let Some(components) = &self.schroot_wrapper.proposed_components {
            if components.is_empty() || components.iter().any(|c| c.trim().is_empty()) {
                anyhow::bail!("schroot_wrapper.proposed_components must not be empty");
            }
        }

        if let Some(uri) = &self.schroot_wrapper.proposed_uri {
            if !uri.starts_with("http://") && !uri.starts_with("https://") && !uri.starts_with("file:")
            {
                anyhow::bail!("schroot_wrapper.proposed_uri must be an http(s) or file URI");
            }
        }

        Ok(())
    }
}
