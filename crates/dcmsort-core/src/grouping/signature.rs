use crate::record::SeriesRecord;
use std::hash::{Hash, Hasher as _};
use twox_hash::XxHash64;

const VOXEL_RTOL: f64 = 1e-5;
const VOXEL_ATOL: f64 = 1e-8;

/// Fields compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ExactFields {
    series_instance_uid: Option<String>,
    series_number: Option<i64>,
    modality: Option<String>,
    sop_class_uid: Option<String>,
    image_type: Vec<String>,
    image_shape: Option<Vec<u32>>,
}

/// The metadata used to decide whether two files belong to one acquisition.
///
/// Per-image geometry (orientation, position) and the sequence name vary
/// within a series and are left out. The protocol name is left out too so
/// that files with inconsistent protocol names still cluster together and
/// get their key normalized.
#[derive(Debug, Clone)]
pub struct SeriesSignature {
    exact: ExactFields,
    voxel_sizes: Option<Vec<f64>>,
}

impl SeriesSignature {
    pub fn of(record: &SeriesRecord) -> Self {
        Self {
            exact: ExactFields {
                series_instance_uid: record.series_instance_uid.clone(),
                series_number: record.series_number,
                modality: record.modality.clone(),
                sop_class_uid: record.sop_class_uid.clone(),
                image_type: record.image_type.clone(),
                image_shape: record.image_shape.clone(),
            },
            voxel_sizes: record.voxel_sizes.clone(),
        }
    }

    /// XxHash64 over the exact fields. Equal signatures always share a
    /// fingerprint, so it can pre-bucket candidates.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        self.exact.hash(&mut hasher);
        hasher.finish()
    }

    /// The same-series predicate.
    pub fn matches(&self, other: &SeriesSignature) -> bool {
        self.exact == other.exact && voxels_close(&self.voxel_sizes, &other.voxel_sizes)
    }
}

fn voxels_close(a: &Option<Vec<f64>>, b: &Option<Vec<f64>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .zip(b)
                    .all(|(x, y)| (x - y).abs() <= VOXEL_ATOL + VOXEL_RTOL * y.abs())
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(number: i64, protocol: &str) -> SeriesRecord {
        let mut r = SeriesRecord::empty(format!("/d/{}-{}.json", number, protocol));
        r.series_number = Some(number);
        r.protocol_name = Some(protocol.to_string());
        r.series_instance_uid = Some(format!("1.2.{}", number));
        r.image_shape = Some(vec![64, 64]);
        r.voxel_sizes = Some(vec![3.0, 3.0, 3.5]);
        r
    }

    #[test]
    fn test_volatile_fields_ignored() {
        let mut a = record(2, "T1w");
        let mut b = record(2, "T1w");
        a.image_position = Some(vec![0.0, 0.0, 1.0]);
        b.image_position = Some(vec![0.0, 0.0, 2.0]);
        a.image_orientation = Some(vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        b.sequence_name = Some("tfl3d1".to_string());
        let (sa, sb) = (SeriesSignature::of(&a), SeriesSignature::of(&b));
        assert!(sa.matches(&sb));
        assert_eq!(sa.fingerprint(), sb.fingerprint());
    }

    #[test]
    fn test_protocol_name_not_part_of_signature() {
        let a = record(2, "T1w");
        let b = record(2, "T1w_repeat");
        assert!(SeriesSignature::of(&a).matches(&SeriesSignature::of(&b)));
    }

    #[test]
    fn test_voxel_tolerance() {
        let a = record(3, "dwi");
        let mut b = record(3, "dwi");
        b.voxel_sizes = Some(vec![3.0 + 1e-9, 3.0, 3.5]);
        assert!(SeriesSignature::of(&a).matches(&SeriesSignature::of(&b)));
        b.voxel_sizes = Some(vec![2.0, 2.0, 2.0]);
        assert!(!SeriesSignature::of(&a).matches(&SeriesSignature::of(&b)));
        b.voxel_sizes = None;
        assert!(!SeriesSignature::of(&a).matches(&SeriesSignature::of(&b)));
    }

    #[test]
    fn test_different_series_differ() {
        let a = record(2, "T1w");
        let b = record(7, "BOLD");
        assert!(!SeriesSignature::of(&a).matches(&SeriesSignature::of(&b)));
    }
}
