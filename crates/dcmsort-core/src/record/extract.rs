use super::model::SeriesRecord;
use crate::error::Error;
use rayon::prelude::*;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, trace};

/// `(tag, keyword)` pairs. The tag form is used by the DICOM JSON model,
/// the keyword form by flat metadata dumps. Private tags have no keyword.
mod tags {
    pub type Tag = (&'static str, &'static str);

    pub const IMAGE_TYPE: Tag = ("00080008", "ImageType");
    pub const SOP_CLASS_UID: Tag = ("00080016", "SOPClassUID");
    pub const ACQUISITION_DATE: Tag = ("00080022", "AcquisitionDate");
    pub const ACCESSION_NUMBER: Tag = ("00080050", "AccessionNumber");
    pub const MODALITY: Tag = ("00080060", "Modality");
    pub const REFERRING_PHYSICIAN_NAME: Tag = ("00080090", "ReferringPhysicianName");
    pub const STUDY_DESCRIPTION: Tag = ("00081030", "StudyDescription");
    pub const SERIES_DESCRIPTION: Tag = ("0008103E", "SeriesDescription");
    pub const PATIENT_ID: Tag = ("00100020", "PatientID");
    pub const PATIENT_SEX: Tag = ("00100040", "PatientSex");
    pub const PATIENT_AGE: Tag = ("00101010", "PatientAge");
    pub const SEQUENCE_NAME: Tag = ("00180024", "SequenceName");
    pub const SLICE_THICKNESS: Tag = ("00180050", "SliceThickness");
    pub const REPETITION_TIME: Tag = ("00180080", "RepetitionTime");
    pub const ECHO_TIME: Tag = ("00180081", "EchoTime");
    pub const PROTOCOL_NAME: Tag = ("00181030", "ProtocolName");
    pub const SIEMENS_SEQUENCE_NAME: Tag = ("0019109C", "");
    pub const STUDY_INSTANCE_UID: Tag = ("0020000D", "StudyInstanceUID");
    pub const SERIES_INSTANCE_UID: Tag = ("0020000E", "SeriesInstanceUID");
    pub const SERIES_NUMBER: Tag = ("00200011", "SeriesNumber");
    pub const IMAGE_POSITION_PATIENT: Tag = ("00200032", "ImagePositionPatient");
    pub const IMAGE_ORIENTATION_PATIENT: Tag = ("00200037", "ImageOrientationPatient");
    pub const NUMBER_OF_FRAMES: Tag = ("00280008", "NumberOfFrames");
    pub const ROWS: Tag = ("00280010", "Rows");
    pub const COLUMNS: Tag = ("00280011", "Columns");
    pub const PIXEL_SPACING: Tag = ("00280030", "PixelSpacing");
}

/// Reads one metadata record per raw file.
pub trait RecordExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<SeriesRecord, Error>;
}

/// Reads DICOM metadata serialized as JSON, either in the tag-keyed DICOM
/// JSON model or as a flat keyword-keyed object.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRecordExtractor;

impl RecordExtractor for JsonRecordExtractor {
    fn extract(&self, path: &Path) -> Result<SeriesRecord, Error> {
        let unreadable = |reason: String| Error::Extraction {
            path: path.to_path_buf(),
            reason,
        };

        let text = fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
        let value: Value = serde_json::from_str(&text).map_err(|e| unreadable(e.to_string()))?;
        let Value::Object(obj) = value else {
            return Err(unreadable("top-level value is not an object".to_string()));
        };

        Ok(record_from_object(path, &obj))
    }
}

/// Build a record field by field. A field that is missing or has the wrong
/// shape falls back to its default without affecting the others.
pub fn record_from_object(path: &Path, obj: &Map<String, Value>) -> SeriesRecord {
    let fields = Fields { obj };
    let mut record = SeriesRecord::empty(path);

    record.series_number = fields.int(tags::SERIES_NUMBER);
    record.protocol_name = fields.string(tags::PROTOCOL_NAME);
    record.study_instance_uid = fields.string(tags::STUDY_INSTANCE_UID);
    record.series_instance_uid = fields.string(tags::SERIES_INSTANCE_UID);
    record.modality = fields.string(tags::MODALITY);
    record.sop_class_uid = fields.string(tags::SOP_CLASS_UID);
    record.image_type = fields.strings(tags::IMAGE_TYPE).unwrap_or_default();
    record.is_derived = record
        .image_type
        .iter()
        .any(|t| t.eq_ignore_ascii_case("derived"));
    record.accession_number = fields.string(tags::ACCESSION_NUMBER);
    record.patient_id = fields.string(tags::PATIENT_ID);
    record.study_description = fields.string(tags::STUDY_DESCRIPTION);
    record.referring_physician_name = fields.string(tags::REFERRING_PHYSICIAN_NAME);
    record.series_description = fields.string(tags::SERIES_DESCRIPTION);
    record.sequence_name = fields
        .string(tags::SEQUENCE_NAME)
        .or_else(|| fields.string(tags::SIEMENS_SEQUENCE_NAME));
    record.repetition_time_ms = fields.float(tags::REPETITION_TIME).unwrap_or(-1.0);
    record.echo_time_ms = fields.float(tags::ECHO_TIME).unwrap_or(-1.0);
    record.patient_age = fields.string(tags::PATIENT_AGE);
    record.patient_sex = fields.string(tags::PATIENT_SEX);
    record.acquisition_date = fields.string(tags::ACQUISITION_DATE);
    record.image_orientation = fields.floats(tags::IMAGE_ORIENTATION_PATIENT);
    record.image_position = fields.floats(tags::IMAGE_POSITION_PATIENT);

    record.image_shape = match (fields.int(tags::ROWS), fields.int(tags::COLUMNS)) {
        (Some(rows), Some(cols)) if rows > 0 && cols > 0 => {
            let mut shape = vec![rows as u32, cols as u32];
            if let Some(frames) = fields.int(tags::NUMBER_OF_FRAMES).filter(|n| *n > 1) {
                shape.push(frames as u32);
            }
            Some(shape)
        }
        _ => None,
    };

    record.voxel_sizes = fields.floats(tags::PIXEL_SPACING).map(|mut sizes| {
        if let Some(thickness) = fields.float(tags::SLICE_THICKNESS) {
            sizes.push(thickness);
        }
        sizes
    });

    trace!("Extracted record from {}: {:?}", path.display(), record.identity());
    record
}

/// Extract records for every file in parallel, keeping input order.
/// Unreadable files are logged and skipped.
pub fn extract_records(files: &[PathBuf], extractor: &dyn RecordExtractor) -> Vec<SeriesRecord> {
    let results: Vec<Result<SeriesRecord, Error>> =
        files.par_iter().map(|f| extractor.extract(f)).collect();

    let mut records = Vec::with_capacity(results.len());
    let mut skipped = 0usize;
    for result in results {
        match result {
            Ok(record) => records.push(record),
            Err(e) => {
                error!("{}", e);
                skipped += 1;
            }
        }
    }

    debug!(
        "Extracted {} records ({} unreadable files skipped)",
        records.len(),
        skipped
    );
    records
}

struct Fields<'a> {
    obj: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    /// All values of an attribute, whichever form it was stored in.
    fn values(&self, (tag, keyword): tags::Tag) -> Option<Vec<&'a Value>> {
        if let Some(element) = self.obj.get(tag).or_else(|| self.obj.get(&tag.to_lowercase())) {
            return match element.get("Value") {
                Some(Value::Array(values)) if !values.is_empty() => Some(values.iter().collect()),
                _ => None,
            };
        }
        if keyword.is_empty() {
            return None;
        }
        match self.obj.get(keyword)? {
            Value::Null => None,
            Value::Array(values) if values.is_empty() => None,
            Value::Array(values) => Some(values.iter().collect()),
            other => Some(vec![other]),
        }
    }

    fn string(&self, tag: tags::Tag) -> Option<String> {
        let first = *self.values(tag)?.first()?;
        let s = value_to_string(first)?;
        let s = s.trim();
        if s.is_empty() {
            None
        } else {
            Some(s.to_string())
        }
    }

    fn strings(&self, tag: tags::Tag) -> Option<Vec<String>> {
        let values = self.values(tag)?;
        let out: Vec<String> = values
            .into_iter()
            .filter_map(value_to_string)
            .flat_map(|s| {
                s.split('\\')
                    .map(|part| part.trim().to_string())
                    .collect::<Vec<_>>()
            })
            .filter(|s| !s.is_empty())
            .collect();
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }

    fn int(&self, tag: tags::Tag) -> Option<i64> {
        let first = *self.values(tag)?.first()?;
        match first {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    fn float(&self, tag: tags::Tag) -> Option<f64> {
        let first = *self.values(tag)?.first()?;
        value_to_f64(first)
    }

    fn floats(&self, tag: tags::Tag) -> Option<Vec<f64>> {
        let values = self.values(tag)?;
        let mut out = Vec::with_capacity(values.len());
        for value in values {
            match value {
                Value::String(s) if s.contains('\\') => {
                    for part in s.split('\\') {
                        out.push(part.trim().parse::<f64>().ok()?);
                    }
                }
                other => out.push(value_to_f64(other)?),
            }
        }
        Some(out)
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        // Person names are stored as {"Alphabetic": "..."}.
        Value::Object(o) => o.get("Alphabetic").and_then(|v| v.as_str()).map(String::from),
        _ => None,
    }
}

fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
