use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::affected::FindAffectedOptions;
use crate::config::{positive_duration, FindAffectedConfig, SchrootWrapperConfig};
use crate::debdiff::SaveOptions;
use crate::error::Result;
use crate::schroot_wrapper::{self, WrapperOptions};
use crate::timelapse::{existing_directory, Size, TimelapseOptions};

/// maint-tools - Helpers for Debian and Ubuntu package maintenance
#[derive(Parser, Debug)]
#[command(name = "maint-tools")]
#[command(about = "Helpers for Debian and Ubuntu package maintenance")]
#[command(version)]
pub struct Cli {
    /// Log debug messages
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (default: $XDG_CONFIG_HOME/maint-tools/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Find packages affected by the py3clean non-UTF-8 locale bug
    FindAffected(FindAffectedArgs),
    /// Open a shell in a schroot session with extra packages installed
    SchrootWrapper(SchrootWrapperArgs),
    /// Save a debdiff read from stdin as <source>_<version>.debdiff
    SaveDebdiff(SaveDebdiffArgs),
    /// Render a timelapse video from a directory of JPEG images
    Timelapse(TimelapseArgs),
    /// Check commit authors and committers for invalid names and emails
    Userlint(UserlintArgs),
    /// Show the package that ships a command
    DpkgWhich {
        /// Commands to look up in PATH
        #[arg(required = true)]
        commands: Vec<String>,
    },
    /// Copy the modification time of SOURCE to the TARGET files
    CopyMtime {
        source: PathBuf,
        #[arg(required = true)]
        targets: Vec<PathBuf>,
    },
    /// Run shellcheck and report its findings
    Shellcheck {
        /// Shell scripts to check
        #[arg(required = true)]
        files: Vec<String>,
    },
}

/// Accept a positive number of seconds that fits a `Duration`.
fn positive_seconds(value: &str) -> std::result::Result<Duration, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|e| format!("'{}' is not a number: {}", value, e))?;
    positive_duration(seconds)
        .ok_or_else(|| format!("'{}' must be a positive number of seconds", value))
}

fn non_negative_seconds(value: &str) -> std::result::Result<f64, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|e| format!("'{}' is not a number: {}", value, e))?;
    if seconds.is_finite() && seconds >= 0.0 {
        Ok(seconds)
    } else {
        Err(format!("'{}' must not be negative", value))
    }
}

#[derive(Args, Debug)]
pub struct FindAffectedArgs {
    /// Architecture of the packages to check [default: amd64]
    #[arg(long)]
    pub arch: Option<String>,
    /// schroot chroot to probe in [default: noble-locale]
    #[arg(short, long)]
    pub chroot: Option<String>,
    /// Update the list of packages from the APT lists
    #[arg(short, long)]
    pub update: bool,
    /// Only process the packages that match the given regular expression
    #[arg(short, long, default_value = ".*")]
    pub only: String,
    /// Only process packages from sections that match the given regular expression
    #[arg(short, long, default_value = ".*")]
    pub section: String,
    /// Timeout in seconds for each install run [default: 3600]
    #[arg(short, long, value_parser = positive_seconds)]
    pub timeout: Option<Duration>,
    /// Retry failed packages that took less than the given seconds
    #[arg(long, default_value_t = 0.0, value_parser = non_negative_seconds)]
    pub retry: f64,
    /// SQLite database [default: affected.sqlite3]
    #[arg(long)]
    pub db: Option<PathBuf>,
    /// APT lists directory [default: /var/lib/apt/lists]
    #[arg(long)]
    pub apt_lists: Option<PathBuf>,
    /// Print a summary of the database and exit
    #[arg(long, conflicts_with = "export_json")]
    pub summary: bool,
    /// Export all records as JSON to the given file and exit
    #[arg(long, value_name = "PATH")]
    pub export_json: Option<PathBuf>,
}

impl FindAffectedArgs {
    /// Merge with configured defaults; flags win.
    pub fn into_options(self, config: &FindAffectedConfig) -> FindAffectedOptions {
        let defaults = FindAffectedOptions::default();
        FindAffectedOptions {
            architecture: self
                .arch
                .or_else(|| config.arch.clone())
                .unwrap_or(defaults.architecture),
            chroot: self
                .chroot
                .or_else(|| config.chroot.clone())
                .unwrap_or(defaults.chroot),
            update: self.update,
            only: self.only,
            section: self.section,
            timeout: self
                .timeout
                .or_else(|| config.timeout_duration())
                .unwrap_or(defaults.timeout),
            retry: self.retry,
            db: self.db.or_else(|| config.db.clone()).unwrap_or(defaults.db),
            apt_lists: self
                .apt_lists
                .or_else(|| config.apt_lists.clone())
                .unwrap_or(defaults.apt_lists),
            summary: self.summary,
            export_json: self.export_json,
        }
    }
}

#[derive(Args, Debug)]
pub struct SchrootWrapperArgs {
    /// Chroot to use [default: codename of this system]
    #[arg(short, long)]
    pub chroot: Option<String>,
    /// Directory to start the shell in [default: current directory]
    #[arg(short, long)]
    pub directory: Option<String>,
    /// User to run the shell as [default: current user]
    #[arg(short, long)]
    pub user: Option<String>,
    /// Packages or .deb files to install (comma or space separated)
    #[arg(short, long = "packages", value_name = "PACKAGES")]
    pub packages: Vec<String>,
    /// Enable the -proposed pocket
    #[arg(short, long)]
    pub enable_proposed: bool,
    /// Archive URI for -proposed [default: http://archive.ubuntu.com/ubuntu]
    #[arg(long)]
    pub proposed_uri: Option<String>,
    /// Components to enable from -proposed [default: main universe]
    #[arg(long)]
    pub proposed_components: Vec<String>,
    /// Launchpad PPA (owner/name) to add
    #[arg(long)]
    pub ppa: Vec<String>,
}

impl SchrootWrapperArgs {
    /// Merge with configured and system defaults; flags win.
    pub fn into_options(self, config: &SchrootWrapperConfig) -> Result<WrapperOptions> {
        let chroot = match self.chroot.or_else(|| config.chroot.clone()) {
            Some(chroot) => chroot,
            None => schroot_wrapper::default_chroot()?,
        };
        let directory = match self.directory {
            Some(directory) => directory,
            None => std::env::current_dir()?.to_string_lossy().into_owned(),
        };
        let user = match self.user {
            Some(user) => user,
            None => schroot_wrapper::current_user()?,
        };
        let proposed_components = if self.proposed_components.is_empty() {
            config.proposed_components.clone().unwrap_or_else(|| {
                schroot_wrapper::DEFAULT_PROPOSED_COMPONENTS
                    .iter()
                    .map(|c| c.to_string())
                    .collect()
            })
        } else {
            schroot_wrapper::split_list(&self.proposed_components)
        };

        Ok(WrapperOptions {
            chroot,
            directory,
            user,
            packages: schroot_wrapper::split_list(&self.packages),
            enable_proposed: self.enable_proposed,
            proposed_uri: self
                .proposed_uri
                .or_else(|| config.proposed_uri.clone())
                .unwrap_or_else(|| schroot_wrapper::DEFAULT_PROPOSED_URI.to_string()),
            proposed_components,
            ppas: self.ppa,
        })
    }
}

#[derive(Args, Debug)]
pub struct SaveDebdiffArgs {
    /// Directory to save the debdiff in
    #[arg(short, long, default_value = ".")]
    pub directory: PathBuf,
    /// Overwrite an existing debdiff with different content
    #[arg(short, long)]
    pub force: bool,
    /// Open the saved debdiff with xdg-open
    #[arg(long)]
    pub open: bool,
}

impl From<SaveDebdiffArgs> for SaveOptions {
    fn from(args: SaveDebdiffArgs) -> Self {
        Self {
            directory: args.directory,
            force: args.force,
            open: args.open,
        }
    }
}

#[derive(Args, Debug)]
pub struct TimelapseArgs {
    /// Directory containing the *.jpg images
    #[arg(short = 'd', long, default_value = ".", value_parser = existing_directory)]
    pub input_dir: PathBuf,
    /// Directory to write the video to
    #[arg(short, long, default_value = ".", value_parser = existing_directory)]
    pub output_dir: PathBuf,
    /// Base name of the video [default: input directory name]
    #[arg(short, long)]
    pub name: Option<String>,
    /// Frames per second
    #[arg(short = 'r', long, default_value_t = 24)]
    pub framerate: u32,
    /// Output resolution WIDTHxHEIGHT
    #[arg(short, long, default_value = "1920x1080")]
    pub size: Size,
    /// ffmpeg video codec
    #[arg(long, default_value = "libx264")]
    pub codec: String,
    /// Constant rate factor (lower is better quality)
    #[arg(long, default_value_t = 23)]
    pub crf: u32,
}

impl From<TimelapseArgs> for TimelapseOptions {
    fn from(args: TimelapseArgs) -> Self {
        Self {
            input_dir: args.input_dir,
            output_dir: args.output_dir,
            name: args.name,
            framerate: args.framerate,
            size: args.size,
            codec: args.codec,
            crf: args.crf,
        }
    }
}

#[derive(Args, Debug)]
pub struct UserlintArgs {
    /// git repository to check
    #[arg(short, long, default_value = ".")]
    pub directory: PathBuf,
}
