use crate::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Copy `src` to `dest` (a file, or a directory to copy into) without
/// silently clobbering a different file.
///
/// An existing destination with identical content is left alone. One with
/// different content is replaced only when `overwrite` is set.
pub fn safe_copy(src: &Path, dest: &Path, overwrite: bool) -> Result<PathBuf, Error> {
    let dest = if dest.is_dir() {
        match src.file_name() {
            Some(name) => dest.join(name),
            None => {
                return Err(Error::Other(format!(
                    "cannot copy {}: no file name",
                    src.display()
                )))
            }
        }
    } else {
        dest.to_path_buf()
    };

    if dest.symlink_metadata().is_ok() {
        if same_content(src, &dest)? {
            debug!("{} is already up to date", dest.display());
            return Ok(dest);
        }
        if !overwrite {
            return Err(Error::Other(format!(
                "was asked to copy {} but destination already exists: {}",
                src.display(),
                dest.display()
            )));
        }
        fs::remove_file(&dest)?;
    }

    fs::copy(src, &dest)?;
    Ok(dest)
}

/// Byte-for-byte comparison of two existing files.
pub fn same_content(a: &Path, b: &Path) -> Result<bool, Error> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }
    Ok(fs::read(a)? == fs::read(b)?)
}
