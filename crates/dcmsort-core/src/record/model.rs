use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// SOP classes that carry no image data and are never converted.
const NON_IMAGE_SOP_CLASSES: &[(&str, &str)] = &[
    ("1.2.840.10008.5.1.4.1.1.66", "Raw Data Storage"),
    (
        "1.2.840.10008.5.1.4.1.1.11.1",
        "Grayscale Softcopy Presentation State Storage",
    ),
];

/// Metadata extracted from one raw image file.
///
/// Every descriptive field is optional on its own; a record is still produced
/// when some of them could not be read. Timing fields use `-1.0` when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub path: PathBuf,
    pub series_number: Option<i64>,
    pub protocol_name: Option<String>,
    pub study_instance_uid: Option<String>,
    pub series_instance_uid: Option<String>,
    pub modality: Option<String>,
    pub sop_class_uid: Option<String>,
    /// Rows, columns and (for multi-frame objects) frame count.
    pub image_shape: Option<Vec<u32>>,
    /// Pixel spacing plus slice thickness, in mm.
    pub voxel_sizes: Option<Vec<f64>>,
    pub image_orientation: Option<Vec<f64>>,
    pub image_position: Option<Vec<f64>>,
    pub image_type: Vec<String>,
    pub is_derived: bool,
    pub accession_number: Option<String>,
    pub patient_id: Option<String>,
    pub study_description: Option<String>,
    pub referring_physician_name: Option<String>,
    pub series_description: Option<String>,
    pub sequence_name: Option<String>,
    pub repetition_time_ms: f64,
    pub echo_time_ms: f64,
    pub patient_age: Option<String>,
    pub patient_sex: Option<String>,
    pub acquisition_date: Option<String>,
}

impl SeriesRecord {
    /// An empty record for `path`, every field at its fallback value.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            series_number: None,
            protocol_name: None,
            study_instance_uid: None,
            series_instance_uid: None,
            modality: None,
            sop_class_uid: None,
            image_shape: None,
            voxel_sizes: None,
            image_orientation: None,
            image_position: None,
            image_type: Vec::new(),
            is_derived: false,
            accession_number: None,
            patient_id: None,
            study_description: None,
            referring_physician_name: None,
            series_description: None,
            sequence_name: None,
            repetition_time_ms: -1.0,
            echo_time_ms: -1.0,
            patient_age: None,
            patient_sex: None,
            acquisition_date: None,
        }
    }

    /// The `(series_number, protocol_name)` pair, when both are known.
    pub fn identity(&self) -> Option<(i64, &str)> {
        match (self.series_number, self.protocol_name.as_deref()) {
            (Some(number), Some(protocol)) => Some((number, protocol)),
            _ => None,
        }
    }

    /// True for raw-data and presentation-state objects.
    pub fn is_non_image_storage(&self) -> bool {
        let Some(sop) = self.sop_class_uid.as_deref() else {
            return false;
        };
        let sop = sop.trim();
        NON_IMAGE_SOP_CLASSES
            .iter()
            .any(|(uid, name)| sop == *uid || sop.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_requires_both_fields() {
        let mut record = SeriesRecord::empty("/data/a.json");
        assert!(record.identity().is_none());
        record.series_number = Some(3);
        assert!(record.identity().is_none());
        record.protocol_name = Some("T1w".to_string());
        assert_eq!(record.identity(), Some((3, "T1w")));
    }

    #[test]
    fn test_non_image_storage_by_uid_and_name() {
        let mut record = SeriesRecord::empty("/data/a.json");
        record.sop_class_uid = Some("1.2.840.10008.5.1.4.1.1.66".to_string());
        assert!(record.is_non_image_storage());
        record.sop_class_uid = Some("grayscale softcopy presentation state storage".to_string());
        assert!(record.is_non_image_storage());
        record.sop_class_uid = Some("1.2.840.10008.5.1.4.1.1.4".to_string());
        assert!(!record.is_non_image_storage());
    }
}
