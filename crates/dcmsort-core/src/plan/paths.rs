use std::path::{Path, PathBuf};

/// Name of the hidden directory holding per-subject plan artifacts.
pub const INFO_ROOT: &str = ".heudiconv";

/// Locations of the plan artifacts for one subject/session:
///
/// ```text
/// <outdir>/.heudiconv/<subject>[/ses-<session>][/info]/
///     <subject>[_ses-<session>].auto.txt
///     <subject>[_ses-<session>].edit.txt
///     filegroup[_ses-<session>].json
///     dicominfo[_ses-<session>].tsv
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PlanPaths {
    info_dir: PathBuf,
    subject: String,
    session: Option<String>,
}

impl PlanPaths {
    /// `bids` adds the `ses-<session>` level; `dedicated_info` adds `info/`
    /// (used when converted output shares the plan's output directory).
    pub fn new(
        outdir: &Path,
        subject: &str,
        session: Option<&str>,
        bids: bool,
        dedicated_info: bool,
    ) -> Self {
        let mut info_dir = outdir.join(INFO_ROOT).join(subject);
        if bids {
            if let Some(ses) = session {
                info_dir = info_dir.join(format!("ses-{}", ses));
            }
        }
        if dedicated_info {
            info_dir = info_dir.join("info");
        }
        Self {
            info_dir,
            subject: subject.to_string(),
            session: session.map(String::from),
        }
    }

    pub fn info_dir(&self) -> &Path {
        &self.info_dir
    }

    fn ses_suffix(&self) -> String {
        match &self.session {
            Some(ses) => format!("_ses-{}", ses),
            None => String::new(),
        }
    }

    pub fn auto_plan(&self) -> PathBuf {
        self.info_dir
            .join(format!("{}{}.auto.txt", self.subject, self.ses_suffix()))
    }

    pub fn edit_plan(&self) -> PathBuf {
        self.info_dir
            .join(format!("{}{}.edit.txt", self.subject, self.ses_suffix()))
    }

    pub fn filegroup(&self) -> PathBuf {
        self.info_dir
            .join(format!("filegroup{}.json", self.ses_suffix()))
    }

    pub fn dicominfo(&self) -> PathBuf {
        self.info_dir
            .join(format!("dicominfo{}.tsv", self.ses_suffix()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_without_session() {
        let paths = PlanPaths::new(Path::new("/out"), "s01", None, false, true);
        assert_eq!(paths.info_dir(), Path::new("/out/.heudiconv/s01/info"));
        assert_eq!(paths.auto_plan(), Path::new("/out/.heudiconv/s01/info/s01.auto.txt"));
        assert_eq!(paths.edit_plan(), Path::new("/out/.heudiconv/s01/info/s01.edit.txt"));
        assert_eq!(paths.filegroup(), Path::new("/out/.heudiconv/s01/info/filegroup.json"));
        assert_eq!(paths.dicominfo(), Path::new("/out/.heudiconv/s01/info/dicominfo.tsv"));
    }

    #[test]
    fn test_layout_with_bids_session() {
        let paths = PlanPaths::new(Path::new("/out"), "s01", Some("2"), true, false);
        assert_eq!(paths.info_dir(), Path::new("/out/.heudiconv/s01/ses-2"));
        assert_eq!(
            paths.edit_plan(),
            Path::new("/out/.heudiconv/s01/ses-2/s01_ses-2.edit.txt")
        );
        assert_eq!(
            paths.filegroup(),
            Path::new("/out/.heudiconv/s01/ses-2/filegroup_ses-2.json")
        );
    }

    #[test]
    fn test_session_suffix_without_bids_directory() {
        let paths = PlanPaths::new(Path::new("/out"), "s01", Some("1"), false, false);
        assert_eq!(paths.info_dir(), Path::new("/out/.heudiconv/s01"));
        assert_eq!(paths.auto_plan(), Path::new("/out/.heudiconv/s01/s01_ses-1.auto.txt"));
    }
}
