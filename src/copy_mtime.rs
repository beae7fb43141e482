//! Copy the modification time of one file to others.

use crate::error::Result;
use filetime::FileTime;
use std::path::Path;
use tracing::debug;

/// Set access and modification time of each target to the mtime of
/// `source`.
pub fn copy_mtime<P: AsRef<Path>>(source: &Path, targets: &[P]) -> Result<()> {
    let metadata = std::fs::metadata(source)?;
    let mtime = FileTime::from_last_modification_time(&metadata);
    for target in targets {
        let target = target.as_ref();
        debug!("Setting mtime of {} to {:?}", target.display(), mtime);
        filetime::set_file_times(target, mtime, mtime)?;
    }
    Ok(())
}
