use crate::record::SeriesRecord;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Column names of the `dicominfo` audit dump, in field order.
pub const SERIES_INFO_COLUMNS: &[&str] = &[
    "total_files_till_now",
    "example_dcm_file",
    "series_id",
    "dcm_dir_name",
    "dim1",
    "dim2",
    "dim3",
    "dim4",
    "TR",
    "TE",
    "protocol_name",
    "is_motion_corrected",
    "is_derived",
    "patient_id",
    "study_description",
    "referring_physician_name",
    "series_description",
    "sequence_name",
    "image_type",
    "accession_number",
    "patient_age",
    "patient_sex",
    "date",
];

/// Per-series summary handed to heuristics and dumped for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesInfo {
    pub total_files_till_now: usize,
    pub example_dcm_file: String,
    pub series_id: String,
    pub dcm_dir_name: String,
    pub dim1: u32,
    pub dim2: u32,
    pub dim3: u32,
    pub dim4: u32,
    /// Repetition time in seconds, `-1.0` when unknown.
    pub tr: f64,
    /// Echo time in milliseconds, `-1.0` when unknown.
    pub te: f64,
    pub protocol_name: String,
    pub is_motion_corrected: bool,
    pub is_derived: bool,
    pub patient_id: Option<String>,
    pub study_description: Option<String>,
    pub referring_physician_name: String,
    pub series_description: Option<String>,
    pub sequence_name: String,
    pub image_type: Vec<String>,
    pub accession_number: Option<String>,
    pub patient_age: Option<String>,
    pub patient_sex: Option<String>,
    pub date: Option<String>,
}

impl SeriesInfo {
    /// Summarize a series from its representative record and member files.
    /// `total_files_till_now` already includes `files`.
    pub fn from_representative(
        rep: &SeriesRecord,
        series_id: String,
        files: &[PathBuf],
        total_files_till_now: usize,
    ) -> Self {
        let first = files.first().cloned().unwrap_or_else(|| rep.path.clone());
        let example_dcm_file = first
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dcm_dir_name = first
            .parent()
            .and_then(|p| p.file_name())
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut size: Vec<u32> = rep.image_shape.clone().unwrap_or_default();
        size.push(files.len() as u32);
        while size.len() < 4 {
            size.push(1);
        }

        let tr = if rep.repetition_time_ms >= 0.0 {
            rep.repetition_time_ms / 1000.0
        } else {
            -1.0
        };

        let is_motion_corrected = rep
            .series_description
            .as_deref()
            .map_or(false, |d| d.contains("MoCo"))
            || rep.image_type.iter().any(|t| t == "MOCO");

        Self {
            total_files_till_now,
            example_dcm_file,
            series_id,
            dcm_dir_name,
            dim1: size[0],
            dim2: size[1],
            dim3: size[2],
            dim4: size[3],
            tr,
            te: rep.echo_time_ms,
            protocol_name: rep.protocol_name.clone().unwrap_or_default(),
            is_motion_corrected,
            is_derived: rep.is_derived,
            patient_id: rep.patient_id.clone(),
            study_description: rep.study_description.clone(),
            referring_physician_name: rep
                .referring_physician_name
                .clone()
                .unwrap_or_else(|| "-".to_string()),
            series_description: rep.series_description.clone(),
            sequence_name: rep
                .sequence_name
                .clone()
                .unwrap_or_else(|| "Not found".to_string()),
            image_type: rep.image_type.clone(),
            accession_number: rep.accession_number.clone(),
            patient_age: rep.patient_age.clone(),
            patient_sex: rep.patient_sex.clone(),
            date: rep.acquisition_date.clone(),
        }
    }

    /// Values in `SERIES_INFO_COLUMNS` order.
    pub fn tsv_row(&self) -> Vec<String> {
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        vec![
            self.total_files_till_now.to_string(),
            self.example_dcm_file.clone(),
            self.series_id.clone(),
            self.dcm_dir_name.clone(),
            self.dim1.to_string(),
            self.dim2.to_string(),
            self.dim3.to_string(),
            self.dim4.to_string(),
            self.tr.to_string(),
            self.te.to_string(),
            self.protocol_name.clone(),
            self.is_motion_corrected.to_string(),
            self.is_derived.to_string(),
            opt(&self.patient_id),
            opt(&self.study_description),
            self.referring_physician_name.clone(),
            opt(&self.series_description),
            self.sequence_name.clone(),
            self.image_type.join("\\"),
            opt(&self.accession_number),
            opt(&self.patient_age),
            opt(&self.patient_sex),
            opt(&self.date),
        ]
    }

    /// Value of a named field as text, for templates over series metadata.
    pub fn field(&self, name: &str) -> Option<String> {
        let idx = SERIES_INFO_COLUMNS.iter().position(|c| *c == name)?;
        let value = self.tsv_row().swap_remove(idx);
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dims_are_padded_with_file_count() {
        let mut rep = SeriesRecord::empty("/s/dir1/f1.json");
        rep.protocol_name = Some("T1w".to_string());
        rep.image_shape = Some(vec![256, 256]);
        rep.repetition_time_ms = 2300.0;
        let files: Vec<PathBuf> = (0..6)
            .map(|i| PathBuf::from(format!("/s/dir1/f{}.json", i)))
            .collect();
        let info = SeriesInfo::from_representative(&rep, "2-T1w".to_string(), &files, 6);
        assert_eq!((info.dim1, info.dim2, info.dim3, info.dim4), (256, 256, 6, 1));
        assert_eq!(info.tr, 2.3);
        assert_eq!(info.te, -1.0);
        assert_eq!(info.example_dcm_file, "f0.json");
        assert_eq!(info.dcm_dir_name, "dir1");
        assert_eq!(info.referring_physician_name, "-");
        assert_eq!(info.sequence_name, "Not found");
        assert_eq!(info.tsv_row().len(), SERIES_INFO_COLUMNS.len());
    }

    #[test]
    fn test_motion_corrected_flag() {
        let mut rep = SeriesRecord::empty("/s/f.json");
        rep.image_type = vec!["ORIGINAL".to_string(), "MOCO".to_string()];
        let info = SeriesInfo::from_representative(&rep, "1-x".to_string(), &[], 0);
        assert!(info.is_motion_corrected);
        assert_eq!(info.field("protocol_name"), None);
        assert_eq!(info.field("series_id").as_deref(), Some("1-x"));
    }
}
