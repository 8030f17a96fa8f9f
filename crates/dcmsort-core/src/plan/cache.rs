use super::dicominfo::write_dicominfo;
use super::filegroup::{file_group_from_series, load_file_group, save_file_group, FileGroup};
use super::model::PlanMapping;
use super::paths::PlanPaths;
use crate::error::Error;
use crate::fsutil::{safe_copy, same_content};
use crate::grouping::{group_files, GroupingMode, GroupingOptions, SeriesGroup, SeriesInfo};
use crate::heuristic::Heuristic;
use crate::record::{RecordExtractor, SeriesRecord};
use crate::session::WorkUnit;
use dashmap::DashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct PlanCacheConfig {
    /// Add a `ses-<session>` directory level to the info dir.
    pub bids: bool,
    /// Keep plan artifacts in an `info/` subdirectory.
    pub dedicated_info: bool,
    /// Replace a differing heuristic copy next to an existing edit plan.
    pub overwrite: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSource {
    /// Produced by the heuristic during this call.
    Generated,
    /// Reloaded from the user-editable plan.
    Edited,
}

#[derive(Debug, Clone)]
pub struct ResolvedPlan {
    pub source: PlanSource,
    pub mapping: PlanMapping,
    pub filegroup: FileGroup,
    /// Series summaries, empty when the plan was reloaded.
    pub series: Vec<SeriesInfo>,
    /// Plan file contents exactly as stored on disk.
    pub plan_text: String,
    pub paths: PlanPaths,
}

type LockKey = (PathBuf, String, Option<String>);

/// Persists the conversion plan of every subject/session and decides
/// whether to regenerate or reuse it.
///
/// The `.edit.txt` copy is authoritative once it exists: it is reloaded
/// verbatim and never rewritten. The `.auto.txt` copy is only a record of
/// what the heuristic last produced.
pub struct PlanCache {
    config: PlanCacheConfig,
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl PlanCache {
    pub fn new(config: PlanCacheConfig) -> Self {
        Self {
            config,
            locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &PlanCacheConfig {
        &self.config
    }

    pub fn paths(&self, outdir: &Path, subject: &str, session: Option<&str>) -> PlanPaths {
        PlanPaths::new(
            outdir,
            subject,
            session,
            self.config.bids,
            self.config.dedicated_info,
        )
    }

    /// Keep a copy of the heuristic file next to the plan it produced.
    ///
    /// A changed heuristic never blocks reuse of an existing edit plan: unless
    /// `overwrite` is set, the older copy is kept as the record of what wrote
    /// that plan. A newly generated plan always gets the current heuristic.
    fn copy_heuristic(&self, source: &Path, paths: &PlanPaths, plan_exists: bool) -> Result<(), Error> {
        let copy = match source.file_name() {
            Some(name) => paths.info_dir().join(name),
            None => return Ok(()),
        };
        if plan_exists && !self.config.overwrite && copy.exists() && !same_content(source, &copy)? {
            warn!(
                "{} changed since {} was written; keeping the existing plan and heuristic copy",
                source.display(),
                paths.edit_plan().display()
            );
            return Ok(());
        }
        safe_copy(source, &copy, true)?;
        Ok(())
    }

    /// Reuse or produce the plan for one subject/session under `outdir`.
    ///
    /// Algorithm:
    /// 1. Take the per-(outdir, subject, session) lock.
    /// 2. Copy the heuristic's source file into the info dir (see `copy_heuristic`).
    /// 3. If the edit plan exists, load it and the saved file group as-is.
    /// 4. Otherwise group the unit's files (no study grouping), save the file
    ///    group and the series dump, ask the heuristic for a plan and write
    ///    it as both the auto and the edit copy.
    pub fn resolve_plan(
        &self,
        outdir: &Path,
        subject: &str,
        session: Option<&str>,
        unit: &WorkUnit,
        heuristic: &dyn Heuristic,
        extractor: &dyn RecordExtractor,
    ) -> Result<ResolvedPlan, Error> {
        let key = (
            outdir.to_path_buf(),
            subject.to_string(),
            session.map(String::from),
        );
        let lock = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock
            .lock()
            .map_err(|e| Error::Other(format!("Failed to lock plan cache: {}", e)))?;

        let paths = self.paths(outdir, subject, session);
        fs::create_dir_all(paths.info_dir())?;

        let plan_exists = paths.edit_plan().exists();
        if let Some(source) = heuristic.source_file() {
            self.copy_heuristic(source, &paths, plan_exists)?;
        }

        if plan_exists {
            info!(
                "Reloading existing filegroup because {} exists",
                paths.edit_plan().display()
            );
            return load_edited(paths);
        }

        let series = match unit {
            WorkUnit::Files(files) => {
                let keep_file = |p: &Path| heuristic.filter_files(p);
                let drop_record = |r: &SeriesRecord| heuristic.filter_dicom(r);
                let options = GroupingOptions {
                    mode: GroupingMode::None,
                    file_filter: Some(&keep_file),
                    record_filter: Some(&drop_record),
                };
                group_files(files, extractor, &options).into_series()
            }
            WorkUnit::Series(series) => series.clone(),
        };
        generate(paths, &series, heuristic)
    }
}

fn load_edited(paths: PlanPaths) -> Result<ResolvedPlan, Error> {
    let edit = paths.edit_plan();
    let plan_text = fs::read_to_string(&edit)?;
    let mapping = PlanMapping::from_toml(&plan_text).map_err(|e| Error::CacheCorruption {
        path: edit.clone(),
        reason: e.to_string(),
    })?;

    let filegroup_path = paths.filegroup();
    if !filegroup_path.exists() {
        return Err(Error::CacheCorruption {
            path: filegroup_path,
            reason: format!("missing file group for {}", edit.display()),
        });
    }
    let filegroup = load_file_group(&filegroup_path).map_err(|e| Error::CacheCorruption {
        path: filegroup_path.clone(),
        reason: e.to_string(),
    })?;

    Ok(ResolvedPlan {
        source: PlanSource::Edited,
        mapping,
        filegroup,
        series: Vec::new(),
        plan_text,
        paths,
    })
}

fn generate(
    paths: PlanPaths,
    series: &[SeriesGroup],
    heuristic: &dyn Heuristic,
) -> Result<ResolvedPlan, Error> {
    let filegroup = file_group_from_series(series);
    save_file_group(&paths.filegroup(), &filegroup)?;

    let infos: Vec<SeriesInfo> = series.iter().map(|s| s.info.clone()).collect();
    write_dicominfo(&paths.dicominfo(), &infos)?;

    debug!("Calling out to {}.infotodict", heuristic.name());
    let mapping = heuristic.infotodict(&infos)?;
    let plan_text = plan_file_text(&mapping, heuristic.name())?;
    fs::write(paths.auto_plan(), &plan_text)?;
    fs::write(paths.edit_plan(), &plan_text)?;
    info!(
        "Wrote conversion plan with {} entries to {}",
        mapping.entries.len(),
        paths.edit_plan().display()
    );

    Ok(ResolvedPlan {
        source: PlanSource::Generated,
        mapping,
        filegroup,
        series: infos,
        plan_text,
        paths,
    })
}

fn plan_file_text(mapping: &PlanMapping, heuristic: &str) -> Result<String, Error> {
    Ok(format!(
        "# Conversion plan produced by heuristic '{}' on {}\n\
         # Edit the .edit.txt copy; it is used instead of the heuristic once present.\n\n{}",
        heuristic,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        mapping.to_toml()?
    ))
}
