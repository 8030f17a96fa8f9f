use crate::error::Error;
use std::fmt;
use std::str::FromStr;

/// How series are bucketed into studies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupingMode {
    #[default]
    ByStudyUid,
    ByAccessionNumber,
    None,
}

impl FromStr for GroupingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "studyUID" => Ok(GroupingMode::ByStudyUid),
            "accession_number" => Ok(GroupingMode::ByAccessionNumber),
            "none" | "" => Ok(GroupingMode::None),
            other => Err(Error::GroupingConfig(format!(
                "unknown grouping '{}' (expected studyUID, accession_number or none)",
                other
            ))),
        }
    }
}

impl fmt::Display for GroupingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GroupingMode::ByStudyUid => "studyUID",
            GroupingMode::ByAccessionNumber => "accession_number",
            GroupingMode::None => "none",
        };
        f.write_str(s)
    }
}

/// Composite series key. Ordering is the tuple ordering, which sorts series
/// by number first and keeps listings stable across runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesKey {
    pub number: i64,
    pub protocol: String,
    /// Study bucket: the study UID or the accession number, depending on
    /// the grouping mode. Unset when grouping is disabled.
    pub study: Option<String>,
}

impl SeriesKey {
    pub fn new(number: i64, protocol: impl Into<String>) -> Self {
        Self {
            number,
            protocol: protocol.into(),
            study: None,
        }
    }

    /// The synthetic negative key for records that never reach the output.
    pub fn excluded(protocol: impl Into<String>) -> Self {
        Self::new(-1, protocol)
    }

    pub fn is_excluded(&self) -> bool {
        self.number < 0
    }

    pub fn with_study(mut self, study: Option<String>) -> Self {
        self.study = study;
        self
    }

    /// The persisted form, e.g. `2-T1w`. The study component is never rendered.
    pub fn render(&self) -> String {
        format!("{}-{}", self.number, self.protocol)
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grouping_mode_parse() {
        assert_eq!("studyUID".parse::<GroupingMode>().unwrap(), GroupingMode::ByStudyUid);
        assert_eq!(
            "accession_number".parse::<GroupingMode>().unwrap(),
            GroupingMode::ByAccessionNumber
        );
        assert_eq!("none".parse::<GroupingMode>().unwrap(), GroupingMode::None);
        assert!(matches!(
            "by_patient".parse::<GroupingMode>(),
            Err(Error::GroupingConfig(_))
        ));
    }

    #[test]
    fn test_key_order_is_numeric_first() {
        let mut keys = vec![
            SeriesKey::new(10, "a"),
            SeriesKey::new(2, "z"),
            SeriesKey::new(2, "b"),
        ];
        keys.sort();
        let rendered: Vec<String> = keys.iter().map(|k| k.render()).collect();
        assert_eq!(rendered, vec!["2-b", "2-z", "10-a"]);
    }

    #[test]
    fn test_excluded_key() {
        let key = SeriesKey::excluded("none");
        assert!(key.is_excluded());
        assert_eq!(key.render(), "-1-none");
    }

    #[test]
    fn test_study_bucket_is_not_rendered() {
        let key = SeriesKey::new(2, "T1w").with_study(Some("ACC1".to_string()));
        assert_eq!(key.render(), "2-T1w");
        assert_ne!(key, SeriesKey::new(2, "T1w").with_study(Some("ACC2".to_string())));
    }
}
