use crate::error::Error;
use crate::scratch::SCRATCH_DIRS;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Unpacks archive bundles. Extraction itself lives outside this crate; the
/// resolver only needs to know which inputs are bundles and where their
/// members land.
pub trait ArchiveExtractor: Send + Sync {
    fn is_archive(&self, path: &Path) -> bool;

    /// Unpack `archive` into `dest` and return the member files.
    fn extract(&self, archive: &Path, dest: &Path) -> Result<Vec<PathBuf>, Error>;
}

/// Treats every input as a plain file.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoArchives;

impl ArchiveExtractor for NoArchives {
    fn is_archive(&self, _path: &Path) -> bool {
        false
    }

    fn extract(&self, archive: &Path, _dest: &Path) -> Result<Vec<PathBuf>, Error> {
        Err(Error::Other(format!(
            "{} is not an archive",
            archive.display()
        )))
    }
}

/// Files of one bundle. `session` is `None` for plain files.
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    pub session: Option<String>,
    pub files: Vec<PathBuf>,
}

/// Split inputs into per-session bundles.
///
/// Archives are visited in sorted path order and numbered `0, 1, 2, ...`.
/// Plain files share one unnumbered bundle. A single archive is not a
/// multi-session input, so its members join the unnumbered bundle.
pub fn split_bundles(files: &[PathBuf], archives: &dyn ArchiveExtractor) -> Result<Vec<Bundle>, Error> {
    let mut sorted: Vec<&PathBuf> = files.iter().collect();
    sorted.sort();

    let mut plain: Vec<PathBuf> = Vec::new();
    let mut numbered: Vec<Vec<PathBuf>> = Vec::new();
    let mut scratch: Option<PathBuf> = None;

    for file in sorted {
        if !archives.is_archive(file) {
            plain.push(file.clone());
            continue;
        }
        let dest = match &scratch {
            Some(dir) => dir.clone(),
            None => {
                let dir = SCRATCH_DIRS.create("dcmsortdcm")?;
                scratch = Some(dir.clone());
                dir
            }
        };
        let members = archives.extract(file, &dest)?;
        debug!("Extracted {} files from {}", members.len(), file.display());
        numbered.push(members);
    }

    let mut bundles = Vec::new();
    if numbered.len() == 1 {
        plain.extend(numbered.pop().unwrap_or_default());
    }
    if !plain.is_empty() {
        bundles.push(Bundle {
            session: None,
            files: plain,
        });
    }
    bundles.extend(numbered.into_iter().enumerate().map(|(i, files)| Bundle {
        session: Some(i.to_string()),
        files,
    }));
    Ok(bundles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_files_form_one_unnumbered_bundle() {
        let files = vec![PathBuf::from("/raw/b.json"), PathBuf::from("/raw/a.json")];
        let bundles = split_bundles(&files, &NoArchives).unwrap();
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].session, None);
        assert_eq!(
            bundles[0].files,
            vec![PathBuf::from("/raw/a.json"), PathBuf::from("/raw/b.json")]
        );
    }

    #[test]
    fn test_no_inputs_no_bundles() {
        assert!(split_bundles(&[], &NoArchives).unwrap().is_empty());
    }
}
