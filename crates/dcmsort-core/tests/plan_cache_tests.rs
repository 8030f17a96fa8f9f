use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

use dcmsort_core::heuristic::RuleHeuristic;
use dcmsort_core::plan::{load_file_group, PlanCache, PlanCacheConfig, PlanMapping, PlanSource};
use dcmsort_core::record::JsonRecordExtractor;
use dcmsort_core::session::WorkUnit;
use dcmsort_core::Error;
use serde_json::json;

const RULES: &str = r#"
name = "study"

[[rule]]
template = "anat/sub-{subject}_T1w"
protocol = "(?i)t1w"

[[rule]]
template = "func/sub-{subject}_task-rest_run-{item:02d}_bold"
protocol = "(?i)bold"
"#;

fn write_series(dir: &Path, number: i64, protocol: &str, count: usize) -> Vec<PathBuf> {
    fs::create_dir_all(dir).unwrap();
    (0..count)
        .map(|i| {
            let path = dir.join(format!("{}_{:02}.json", protocol, i));
            let record = json!({
                "SeriesNumber": number,
                "ProtocolName": protocol,
                "SeriesInstanceUID": format!("1.2.3.{}", number),
                "StudyInstanceUID": "1.2.3",
                "SOPClassUID": "1.2.840.10008.5.1.4.1.1.4",
                "Modality": "MR",
                "Rows": 64,
                "Columns": 64,
                "InstanceNumber": i,
            });
            fs::write(&path, serde_json::to_string(&record).unwrap()).unwrap();
            path
        })
        .collect()
}

fn session_files(root: &Path) -> WorkUnit {
    let mut files = write_series(&root.join("raw"), 2, "T1w", 3);
    files.extend(write_series(&root.join("raw"), 5, "BOLD", 2));
    WorkUnit::Files(files)
}

fn heuristic_file(dir: &Path, text: &str) -> RuleHeuristic {
    let path = dir.join("study.toml");
    fs::write(&path, text).unwrap();
    RuleHeuristic::from_file(&path).unwrap()
}

#[test]
fn test_generated_plan_is_written_twice() {
    let tmp = tempdir().unwrap();
    let outdir = tmp.path().join("out");
    let unit = session_files(tmp.path());
    let heuristic = heuristic_file(tmp.path(), RULES);
    let cache = PlanCache::new(PlanCacheConfig::default());

    let plan = cache
        .resolve_plan(&outdir, "s01", None, &unit, &heuristic, &JsonRecordExtractor)
        .unwrap();

    assert_eq!(plan.source, PlanSource::Generated);
    let auto = fs::read_to_string(plan.paths.auto_plan()).unwrap();
    let edit = fs::read_to_string(plan.paths.edit_plan()).unwrap();
    assert_eq!(auto, edit);
    assert_eq!(edit, plan.plan_text);
    assert_eq!(PlanMapping::from_toml(&edit).unwrap(), plan.mapping);

    let ids: Vec<&str> = plan.mapping.series_ids().collect();
    assert_eq!(ids, vec!["2-T1w", "5-BOLD"]);
    assert_eq!(plan.series.len(), 2);

    let filegroup = load_file_group(&plan.paths.filegroup()).unwrap();
    assert_eq!(filegroup, plan.filegroup);
    assert_eq!(filegroup["2-T1w"].len(), 3);
    assert_eq!(filegroup["5-BOLD"].len(), 2);

    let dicominfo = fs::read_to_string(plan.paths.dicominfo()).unwrap();
    let mut lines = dicominfo.lines();
    assert!(lines.next().unwrap().starts_with("total_files_till_now"));
    assert_eq!(lines.count(), 2);

    // The heuristic is copied next to the plan.
    assert!(plan.paths.info_dir().join("study.toml").exists());
}

#[test]
fn test_edited_plan_overrides_heuristic() {
    let tmp = tempdir().unwrap();
    let outdir = tmp.path().join("out");
    let unit = session_files(tmp.path());
    let heuristic = RuleHeuristic::convertall();
    let cache = PlanCache::new(PlanCacheConfig::default());

    let first = cache
        .resolve_plan(&outdir, "s01", None, &unit, &heuristic, &JsonRecordExtractor)
        .unwrap();
    let auto_before = fs::read_to_string(first.paths.auto_plan()).unwrap();

    let edited = "# curated by hand\n\n[[entry]]\ntemplate = \"anat/T1w\"\nouttypes = [\"nii.gz\"]\nitems = [\"2-T1w\"]\n";
    fs::write(first.paths.edit_plan(), edited).unwrap();

    // The inputs change: a new series appears and part of the BOLD run is gone.
    let WorkUnit::Files(mut files) = unit else {
        unreachable!()
    };
    files.extend(write_series(&tmp.path().join("raw"), 9, "DWI", 4));
    for path in files.iter().filter(|p| p.to_string_lossy().contains("BOLD")) {
        fs::remove_file(path).unwrap();
    }
    files.retain(|p| p.exists());
    let changed = WorkUnit::Files(files);

    let second = cache
        .resolve_plan(&outdir, "s01", None, &changed, &heuristic, &JsonRecordExtractor)
        .unwrap();
    assert_eq!(second.source, PlanSource::Edited);
    assert_eq!(second.plan_text, edited);
    assert_eq!(fs::read_to_string(second.paths.edit_plan()).unwrap(), edited);
    assert_eq!(fs::read_to_string(second.paths.auto_plan()).unwrap(), auto_before);
    assert_eq!(second.mapping.series_ids().collect::<Vec<_>>(), vec!["2-T1w"]);
    // The saved file group is reused, not regrouped from the new inputs.
    assert_eq!(second.filegroup, first.filegroup);
    assert!(!second.filegroup.contains_key("9-DWI"));
    assert!(second.series.is_empty());
}

#[test]
fn test_missing_file_group_is_corruption() {
    let tmp = tempdir().unwrap();
    let outdir = tmp.path().join("out");
    let unit = session_files(tmp.path());
    let heuristic = RuleHeuristic::convertall();
    let cache = PlanCache::new(PlanCacheConfig::default());

    let plan = cache
        .resolve_plan(&outdir, "s01", None, &unit, &heuristic, &JsonRecordExtractor)
        .unwrap();
    fs::remove_file(plan.paths.filegroup()).unwrap();

    let err = cache
        .resolve_plan(&outdir, "s01", None, &unit, &heuristic, &JsonRecordExtractor)
        .unwrap_err();
    assert!(matches!(err, Error::CacheCorruption { .. }));
    assert!(!err.is_fatal_for_batch());
}

#[test]
fn test_unparsable_edit_plan_is_corruption() {
    let tmp = tempdir().unwrap();
    let outdir = tmp.path().join("out");
    let unit = session_files(tmp.path());
    let heuristic = RuleHeuristic::convertall();
    let cache = PlanCache::new(PlanCacheConfig::default());

    let plan = cache
        .resolve_plan(&outdir, "s01", None, &unit, &heuristic, &JsonRecordExtractor)
        .unwrap();
    fs::write(plan.paths.edit_plan(), "[[entry]\ntemplate = ").unwrap();

    let err = cache
        .resolve_plan(&outdir, "s01", None, &unit, &heuristic, &JsonRecordExtractor)
        .unwrap_err();
    match err {
        Error::CacheCorruption { path, .. } => assert_eq!(path, plan.paths.edit_plan()),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_changed_heuristic_does_not_block_edited_plan() {
    let tmp = tempdir().unwrap();
    let outdir = tmp.path().join("out");
    let unit = session_files(tmp.path());
    let cache = PlanCache::new(PlanCacheConfig::default());

    let original = heuristic_file(tmp.path(), RULES);
    let first = cache
        .resolve_plan(&outdir, "s01", None, &unit, &original, &JsonRecordExtractor)
        .unwrap();
    let copy = first.paths.info_dir().join("study.toml");

    let changed = heuristic_file(tmp.path(), &format!("{}\n# tweaked\n", RULES));
    let second = cache
        .resolve_plan(&outdir, "s01", None, &unit, &changed, &JsonRecordExtractor)
        .unwrap();
    assert_eq!(second.source, PlanSource::Edited);
    assert_eq!(second.plan_text, first.plan_text);
    // The copy still documents the heuristic that wrote the plan.
    assert_eq!(fs::read_to_string(&copy).unwrap(), RULES);

    let overwrite = PlanCacheConfig {
        overwrite: true,
        ..PlanCacheConfig::default()
    };
    let third = PlanCache::new(overwrite)
        .resolve_plan(&outdir, "s01", None, &unit, &changed, &JsonRecordExtractor)
        .unwrap();
    assert_eq!(third.source, PlanSource::Edited);
    assert!(fs::read_to_string(&copy).unwrap().contains("# tweaked"));
}

#[test]
fn test_new_plan_refreshes_heuristic_copy() {
    let tmp = tempdir().unwrap();
    let outdir = tmp.path().join("out");
    let unit = session_files(tmp.path());
    let cache = PlanCache::new(PlanCacheConfig::default());

    let original = heuristic_file(tmp.path(), RULES);
    let first = cache
        .resolve_plan(&outdir, "s01", None, &unit, &original, &JsonRecordExtractor)
        .unwrap();
    fs::remove_file(first.paths.edit_plan()).unwrap();

    let changed = heuristic_file(tmp.path(), &format!("{}\n# tweaked\n", RULES));
    let second = cache
        .resolve_plan(&outdir, "s01", None, &unit, &changed, &JsonRecordExtractor)
        .unwrap();
    assert_eq!(second.source, PlanSource::Generated);
    let copied = fs::read_to_string(second.paths.info_dir().join("study.toml")).unwrap();
    assert!(copied.contains("# tweaked"));
}

#[test]
fn test_bids_sessions_get_their_own_directory() {
    let tmp = tempdir().unwrap();
    let outdir = tmp.path().join("out");
    let unit = session_files(tmp.path());
    let heuristic = RuleHeuristic::convertall();
    let cache = PlanCache::new(PlanCacheConfig {
        bids: true,
        dedicated_info: true,
        overwrite: false,
    });

    let one = cache
        .resolve_plan(&outdir, "s01", Some("1"), &unit, &heuristic, &JsonRecordExtractor)
        .unwrap();
    let two = cache
        .resolve_plan(&outdir, "s01", Some("2"), &unit, &heuristic, &JsonRecordExtractor)
        .unwrap();

    assert_eq!(
        one.paths.edit_plan(),
        outdir.join(".heudiconv/s01/ses-1/info/s01_ses-1.edit.txt")
    );
    assert!(one.paths.edit_plan().exists());
    assert!(two.paths.edit_plan().exists());
    assert_eq!(two.source, PlanSource::Generated);
}

#[test]
fn test_pre_grouped_series_are_planned_directly() {
    let tmp = tempdir().unwrap();
    let outdir = tmp.path().join("out");
    let WorkUnit::Files(files) = session_files(tmp.path()) else {
        unreachable!()
    };
    let grouped = dcmsort_core::grouping::group_files(
        &files,
        &JsonRecordExtractor,
        &dcmsort_core::grouping::GroupingOptions::new(dcmsort_core::grouping::GroupingMode::None),
    );
    let unit = WorkUnit::Series(grouped.into_series());

    let cache = PlanCache::new(PlanCacheConfig::default());
    let plan = cache
        .resolve_plan(&outdir, "s01", None, &unit, &RuleHeuristic::convertall(), &JsonRecordExtractor)
        .unwrap();
    assert_eq!(plan.filegroup.len(), 2);
    assert_eq!(plan.mapping.entries.len(), 1);
}
