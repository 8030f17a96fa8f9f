use super::info::SeriesInfo;
use super::key::{GroupingMode, SeriesKey};
use super::signature::SeriesSignature;
use crate::record::{extract_records, RecordExtractor, SeriesRecord};
use ahash::{AHashMap, AHashSet};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub type FileFilter<'a> = &'a (dyn Fn(&Path) -> bool + Sync);
pub type RecordFilter<'a> = &'a (dyn Fn(&SeriesRecord) -> bool + Sync);

/// Options for a grouping pass.
#[derive(Clone, Copy, Default)]
pub struct GroupingOptions<'a> {
    pub mode: GroupingMode,
    /// Keep a file when this returns true. Applied to the path only.
    pub file_filter: Option<FileFilter<'a>>,
    /// Exclude a record from the output when this returns true.
    pub record_filter: Option<RecordFilter<'a>>,
}

impl<'a> GroupingOptions<'a> {
    pub fn new(mode: GroupingMode) -> Self {
        Self {
            mode,
            file_filter: None,
            record_filter: None,
        }
    }
}

/// One kept series: its key, summary and member files in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesGroup {
    pub key: SeriesKey,
    pub info: SeriesInfo,
    pub files: Vec<PathBuf>,
}

/// All series of one study bucket (study UID, accession number, or none).
#[derive(Debug, Clone, PartialEq)]
pub struct StudyGroup {
    pub study: Option<String>,
    pub series: Vec<SeriesGroup>,
}

#[derive(Debug, Clone)]
pub struct GroupedSeries {
    pub mode: GroupingMode,
    pub studies: Vec<StudyGroup>,
    /// Records that ended up under a negative key.
    pub excluded_records: usize,
}

impl GroupedSeries {
    pub fn series(&self) -> impl Iterator<Item = &SeriesGroup> {
        self.studies.iter().flat_map(|s| s.series.iter())
    }

    pub fn series_count(&self) -> usize {
        self.studies.iter().map(|s| s.series.len()).sum()
    }

    /// All series regardless of study bucket, still in key order per bucket.
    pub fn into_series(self) -> Vec<SeriesGroup> {
        self.studies.into_iter().flat_map(|s| s.series).collect()
    }
}

struct Cluster {
    rep: usize,
    identity: (i64, String),
    signature: SeriesSignature,
}

/// Filter by filename, extract, then group.
pub fn group_files(
    files: &[PathBuf],
    extractor: &dyn RecordExtractor,
    options: &GroupingOptions<'_>,
) -> GroupedSeries {
    let kept: Vec<PathBuf> = match options.file_filter {
        Some(keep) => {
            let kept: Vec<PathBuf> = files.iter().filter(|f| keep(f)).cloned().collect();
            info!(
                "Filtering out {} files based on their filename",
                files.len() - kept.len()
            );
            kept
        }
        None => files.to_vec(),
    };

    info!("Analyzing {} files", kept.len());
    let records = extract_records(&kept, extractor);
    group_records(&records, &GroupingOptions {
        file_filter: None,
        ..*options
    })
}

/// Cluster records into series.
///
/// Algorithm:
/// 1. Records failing the file filter are dropped.
/// 2. Records without a series number or protocol name are isolated under
///    the negative key and never compared.
/// 3. Every other record is compared against the cluster representatives
///    (pre-bucketed by signature fingerprint). A match joins the cluster and
///    takes the representative's `(number, protocol)`; no match starts a new
///    cluster with this record as representative.
/// 4. Filtered and non-image records get the negative key but keep their
///    cluster membership.
/// 5. Non-negative keys are sorted, clusters whose representative has no
///    image shape are dropped, and the rest are bucketed per study.
pub fn group_records(records: &[SeriesRecord], options: &GroupingOptions<'_>) -> GroupedSeries {

    let records: Vec<&SeriesRecord> = match options.file_filter {
        Some(keep) => records.iter().filter(|r| keep(&r.path)).collect(),
        None => records.iter().collect(),
    };

    let mut clusters: Vec<Cluster> = Vec::new();
    let mut buckets: AHashMap<u64, Vec<usize>> = AHashMap::new();
    let mut assigned: Vec<(SeriesKey, Option<usize>)> = Vec::with_capacity(records.len());
    let mut study_uids: AHashSet<&str> = AHashSet::new();

    for (idx, record) in records.iter().enumerate() {
        let Some((number, protocol)) = record.identity() else {
            warn!(
                "Ignoring {} since it has no series number or protocol name",
                record.path.display()
            );
            assigned.push((SeriesKey::excluded("none"), None));
            continue;
        };

        if let Some(uid) = record.study_instance_uid.as_deref() {
            study_uids.insert(uid);
        }

        let excluded = record.is_non_image_storage()
            || options.record_filter.map_or(false, |f| f(record));
        let mut key = if excluded {
            SeriesKey::excluded(protocol)
        } else {
            SeriesKey::new(number, protocol)
        };

        let signature = SeriesSignature::of(record);
        let fingerprint = signature.fingerprint();
        let found = buckets.get(&fingerprint).and_then(|candidates| {
            candidates
                .iter()
                .copied()
                .find(|&c| clusters[c].signature.matches(&signature))
        });

        let cluster_idx = match found {
            Some(c) => {
                let rep = records[clusters[c].rep];
                if rep.study_instance_uid != record.study_instance_uid {
                    warn!(
                        "{} matches series of {} but has a different study UID",
                        record.path.display(),
                        rep.path.display()
                    );
                }
                if !key.is_excluded() {
                    let (rep_number, rep_protocol) = &clusters[c].identity;
                    key = SeriesKey::new(*rep_number, rep_protocol.clone());
                }
                c
            }
            None => {
                clusters.push(Cluster {
                    rep: idx,
                    identity: (number, protocol.to_string()),
                    signature,
                });
                let c = clusters.len() - 1;
                buckets.entry(fingerprint).or_default().push(c);
                c
            }
        };

        key = match options.mode {
            GroupingMode::ByStudyUid => key.with_study(record.study_instance_uid.clone()),
            GroupingMode::ByAccessionNumber => key.with_study(record.accession_number.clone()),
            GroupingMode::None => key,
        };
        assigned.push((key, Some(cluster_idx)));
    }

    if options.mode == GroupingMode::None && study_uids.len() > 1 {
        warn!(
            "Grouping is disabled but records come from {} different studies",
            study_uids.len()
        );
    }

    // key -> (first cluster seen under that key, member record indices)
    let mut by_key: BTreeMap<&SeriesKey, (usize, Vec<usize>)> = BTreeMap::new();
    let mut excluded_records = 0usize;
    for (idx, (key, cluster)) in assigned.iter().enumerate() {
        let Some(cluster) = cluster else {
            excluded_records += 1;
            continue;
        };
        if key.is_excluded() {
            excluded_records += 1;
            continue;
        }
        let entry = by_key.entry(key).or_insert_with(|| (*cluster, Vec::new()));
        if entry.0 != *cluster {
            debug!(
                "Series {} spans more than one signature; keeping the first representative",
                key
            );
        }
        entry.1.push(idx);
    }

    let mut studies: Vec<StudyGroup> = Vec::new();
    let mut study_index: AHashMap<Option<String>, usize> = AHashMap::new();
    let mut total = 0usize;

    for (key, (cluster, members)) in by_key {
        let rep = records[clusters[cluster].rep];
        if rep.image_shape.is_none() {
            debug!("Dropping series {} which has no image data", key);
            continue;
        }

        let files: Vec<PathBuf> = members.iter().map(|&i| records[i].path.clone()).collect();
        total += files.len();
        let info = SeriesInfo::from_representative(rep, key.render(), &files, total);

        let bucket = key.study.clone();
        debug!(
            "{:>30} {:>30} {:>27} {:>27} {:>5} {:?}",
            bucket.as_deref().unwrap_or(""),
            info.series_id,
            info.series_description.as_deref().unwrap_or(""),
            info.protocol_name,
            info.is_derived,
            info.image_type,
        );

        let pos = *study_index.entry(bucket.clone()).or_insert_with(|| {
            studies.push(StudyGroup {
                study: bucket,
                series: Vec::new(),
            });
            studies.len() - 1
        });
        studies[pos].series.push(SeriesGroup {
            key: key.clone(),
            info,
            files,
        });
    }

    let grouped = GroupedSeries {
        mode: options.mode,
        studies,
        excluded_records,
    };
    match options.mode {
        GroupingMode::None => info!(
            "Generated sequence info with {} entries",
            grouped.series_count()
        ),
        mode => info!(
            "Generated sequence info for {} groups ({}) with {} entries total",
            grouped.studies.len(),
            mode,
            grouped.series_count()
        ),
    }
    grouped
}
