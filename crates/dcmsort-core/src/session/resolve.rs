use super::archive::{split_bundles, ArchiveExtractor};
use super::discover::discover_files;
use super::{StudySessionKey, StudySessions, WorkUnit};
use crate::error::Error;
use crate::grouping::{group_files, GroupingMode, GroupingOptions, SeriesInfo};
use crate::heuristic::{require_identifier, Heuristic};
use crate::record::{RecordExtractor, SeriesRecord};
use crate::template::{self, TemplateParams};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Collaborators and settings shared by both resolution strategies.
#[derive(Clone, Copy)]
pub struct ResolveContext<'a> {
    pub outdir: &'a Path,
    /// Session used when neither the inputs nor the heuristic provide one.
    pub session: Option<&'a str>,
    pub grouping: GroupingMode,
    pub ignore_patterns: &'a [String],
    pub heuristic: &'a dyn Heuristic,
    pub extractor: &'a dyn RecordExtractor,
    pub archives: &'a dyn ArchiveExtractor,
}

/// One study session per subject and archive bundle, located through a path
/// template such as `/data/{subject}/*.tar`.
///
/// No records are read here: sessions come from the bundle layout and the
/// locator is always unset.
pub fn resolve_from_template(
    dicom_dir_template: &str,
    subjects: &[String],
    ctx: &ResolveContext<'_>,
) -> Result<StudySessions, Error> {
    if !template::placeholders(dicom_dir_template)
        .iter()
        .any(|p| p == "subject")
    {
        return Err(Error::Config(config::ConfigError::Message(format!(
            "dicom dir template must contain {{subject}}, got '{}'",
            dicom_dir_template
        ))));
    }

    let mut sessions = StudySessions::new();
    for subject in subjects {
        let mut params = TemplateParams::new();
        params.set("subject", subject.as_str());
        if let Some(ses) = ctx.session {
            params.set("session", ses);
        }
        let pattern = absolute(Path::new(&template::render(dicom_dir_template, &params)?))?;
        let pattern = pattern.to_string_lossy();

        let mut matched: Vec<PathBuf> = glob::glob(&pattern)?
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    error!("Error reading {}: {}", e.path().display(), e);
                    None
                }
            })
            .collect();
        matched.sort();
        if matched.is_empty() {
            warn!("No inputs match '{}' for subject {}", pattern, subject);
            continue;
        }

        let files = discover_files(&matched, ctx.ignore_patterns);
        for bundle in split_bundles(&files, ctx.archives)? {
            if let (Some(found), Some(given)) = (&bundle.session, ctx.session) {
                warn!(
                    "Session {} was requested but the inputs define session {}, using it instead",
                    given, found
                );
            }
            let key = StudySessionKey {
                locator: None,
                session: bundle.session.or_else(|| ctx.session.map(String::from)),
                subject: Some(subject.clone()),
            };
            sessions.insert(key, WorkUnit::Files(bundle.files));
        }
    }
    Ok(sessions)
}

/// Group every discovered file and let the heuristic name each study.
///
/// Requires the heuristic's `infotoids` capability; its absence is reported
/// before any input is read.
pub fn resolve_from_scan(files: &[PathBuf], ctx: &ResolveContext<'_>) -> Result<StudySessions, Error> {
    let identifier = require_identifier(ctx.heuristic)?;

    let discovered = discover_files(files, ctx.ignore_patterns);
    let all_files: Vec<PathBuf> = split_bundles(&discovered, ctx.archives)?
        .into_iter()
        .flat_map(|b| b.files)
        .collect();

    let heuristic = ctx.heuristic;
    let keep_file = |p: &Path| heuristic.filter_files(p);
    let drop_record = |r: &SeriesRecord| heuristic.filter_dicom(r);
    let options = GroupingOptions {
        mode: ctx.grouping,
        file_filter: Some(&keep_file),
        record_filter: Some(&drop_record),
    };
    let grouped = group_files(&all_files, ctx.extractor, &options);

    let mut sessions = StudySessions::new();
    for study in grouped.studies {
        let infos: Vec<SeriesInfo> = study.series.iter().map(|s| s.info.clone()).collect();
        let ids = identifier.infotoids(&infos, ctx.outdir)?;
        let key = StudySessionKey {
            locator: ids.locator,
            session: ids.session.or_else(|| ctx.session.map(String::from)),
            subject: ids.subject,
        };
        info!("Study session for {}", key);
        sessions.insert(key, WorkUnit::Series(study.series));
    }
    Ok(sessions)
}

fn absolute(path: &Path) -> Result<PathBuf, Error> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
