use crate::error::Error;
use crate::grouping::GroupingMode;
use crate::template;
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONVERTERS: &[&str] = &["dcm2niix", "none"];

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    /// Root of the plan cache and, unless `conv_outdir` is set, of converted output.
    #[serde(default = "default_outdir")]
    pub outdir: PathBuf,
    #[serde(default)]
    pub conv_outdir: Option<PathBuf>,
    /// Input locator such as `/data/{subject}/*.tar`; requires `subjects`.
    #[serde(default)]
    pub dicom_dir_template: Option<String>,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub session: Option<String>,
    /// Files or directories to scan; excludes `dicom_dir_template`.
    #[serde(default)]
    pub files: Vec<PathBuf>,
    #[serde(default = "default_grouping")]
    pub grouping: String,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    /// Path to a rule heuristic, or `convertall`.
    #[serde(default)]
    pub heuristic: Option<String>,
    #[serde(default = "default_converter")]
    pub converter: String,
    #[serde(default)]
    pub anon_cmd: Option<String>,
    #[serde(default)]
    pub bids: bool,
    #[serde(default)]
    pub overwrite: bool,
}

fn default_outdir() -> PathBuf {
    PathBuf::from(".")
}

fn default_grouping() -> String {
    "studyUID".to_string()
}

fn default_converter() -> String {
    "dcm2niix".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            outdir: default_outdir(),
            conv_outdir: None,
            dicom_dir_template: None,
            subjects: Vec::new(),
            session: None,
            files: Vec::new(),
            grouping: default_grouping(),
            ignore_patterns: Vec::new(),
            heuristic: None,
            converter: default_converter(),
            anon_cmd: None,
            bids: false,
            overwrite: false,
        }
    }
}

/// Load `Config.{toml,json,yaml,...}` from the working directory if present,
/// then `DCMSORT_*` environment variables (`DCMSORT_SUBJECTS=s01,s02`).
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(
            Environment::with_prefix("DCMSORT")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("subjects")
                .with_list_parse_key("files")
                .with_list_parse_key("ignore_patterns"),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

impl AppConfig {
    pub fn grouping_mode(&self) -> Result<GroupingMode, Error> {
        self.grouping.parse()
    }

    /// Where converted output goes.
    pub fn conversion_outdir(&self) -> &Path {
        self.conv_outdir.as_deref().unwrap_or(&self.outdir)
    }

    /// Plan artifacts get their own `info/` dir when they share a tree with
    /// converted output.
    pub fn dedicated_info(&self) -> bool {
        self.conversion_outdir() == self.outdir
    }

    /// Reject inconsistent option combinations before touching any input.
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |msg: String| Err(Error::Config(ConfigError::Message(msg)));

        match (&self.dicom_dir_template, self.files.is_empty()) {
            (Some(_), false) => {
                return invalid(
                    "dicom_dir_template and files are mutually exclusive".to_string(),
                )
            }
            (None, true) => {
                return invalid("either dicom_dir_template or files must be given".to_string())
            }
            _ => {}
        }

        if let Some(tpl) = &self.dicom_dir_template {
            if self.subjects.is_empty() {
                return invalid("dicom_dir_template requires at least one subject".to_string());
            }
            if !template::placeholders(tpl).iter().any(|p| p == "subject") {
                return invalid(format!(
                    "dicom_dir_template must contain {{subject}}, got '{}'",
                    tpl
                ));
            }
        } else if !self.subjects.is_empty() {
            return invalid("subjects can only be given with dicom_dir_template".to_string());
        }

        if !CONVERTERS.contains(&self.converter.as_str()) {
            return invalid(format!(
                "unknown converter '{}', expected one of {:?}",
                self.converter, CONVERTERS
            ));
        }

        self.grouping_mode()?;
        Ok(())
    }
}

/// Drop directories nested inside another directory of the list.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut roots: Vec<String> = Vec::new();

    for dir in dirs {
        let path = Path::new(&dir);
        if roots.iter().any(|r| path.starts_with(r)) {
            continue;
        }
        roots.retain(|r| !Path::new(r).starts_with(path));
        roots.push(dir);
    }

    roots
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_config() -> AppConfig {
        AppConfig {
            files: vec![PathBuf::from("/data/raw")],
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_non_overlapping_no_overlap() {
        let dirs = vec![
            "/data/s01".to_string(),
            "/data/s02".to_string(),
            "/archive/s03".to_string(),
        ];
        assert_eq!(non_overlapping_directories(dirs.clone()), dirs);
    }

    #[test]
    fn test_non_overlapping_parent_listed_after_children() {
        let dirs = vec![
            "/data/s01/anat".to_string(),
            "/data/s01/func".to_string(),
            "/data/s01".to_string(),
            "/data/s01".to_string(),
        ];
        assert_eq!(non_overlapping_directories(dirs), vec!["/data/s01".to_string()]);
    }

    #[test]
    fn test_validate_accepts_scan_mode() {
        scan_config().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_files_with_template() {
        let cfg = AppConfig {
            dicom_dir_template: Some("/data/{subject}/*".to_string()),
            subjects: vec!["s01".to_string()],
            ..scan_config()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_template_rules() {
        let mut cfg = AppConfig {
            dicom_dir_template: Some("/data/{subject}/*".to_string()),
            ..AppConfig::default()
        };
        assert!(cfg.validate().is_err(), "template without subjects");

        cfg.subjects = vec!["s01".to_string()];
        cfg.validate().unwrap();

        cfg.dicom_dir_template = Some("/data/*.tar".to_string());
        assert!(cfg.validate().is_err(), "template without {{subject}}");
    }

    #[test]
    fn test_validate_rejects_subjects_without_template() {
        let cfg = AppConfig {
            subjects: vec!["s01".to_string()],
            ..scan_config()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_grouping() {
        let cfg = AppConfig {
            grouping: "bySeries".to_string(),
            ..scan_config()
        };
        assert!(matches!(cfg.validate(), Err(Error::GroupingConfig(_))));
    }

    #[test]
    fn test_dedicated_info_follows_conv_outdir() {
        let mut cfg = scan_config();
        assert!(cfg.dedicated_info());
        cfg.conv_outdir = Some(PathBuf::from("/elsewhere"));
        assert!(!cfg.dedicated_info());
        assert_eq!(cfg.conversion_outdir(), Path::new("/elsewhere"));
    }
}
