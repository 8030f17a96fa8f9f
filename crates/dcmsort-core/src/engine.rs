use crate::config::AppConfig;
use crate::convert::{
    anonymize_subject, clean_bids_subject, converter_by_name, ConvertOptions, Converter,
};
use crate::error::Error;
use crate::grouping::SeriesInfo;
use crate::heuristic::{load_heuristic, Heuristic};
use crate::plan::{conversion_items, PlanCache, PlanCacheConfig, PlanSource};
use crate::progress::ProgressReporter;
use crate::record::{JsonRecordExtractor, RecordExtractor};
use crate::scratch::SCRATCH_DIRS;
use crate::session::{
    resolve_from_scan, resolve_from_template, ArchiveExtractor, NoArchives, ResolveContext,
    StudySessionKey, StudySessions, WorkUnit,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Locator a heuristic returns for studies it does not want converted.
pub const UNKNOWN_LOCATOR: &str = "unknown";

pub struct SortEngine {
    config: AppConfig,
    heuristic: Box<dyn Heuristic>,
    extractor: Box<dyn RecordExtractor>,
    archives: Box<dyn ArchiveExtractor>,
    converter: Box<dyn Converter>,
    cache: PlanCache,
}

#[derive(Debug, Default)]
pub struct RunResult {
    /// Input discovery, record extraction and grouping into study sessions.
    pub grouping_duration: Duration,
    pub plan_duration: Duration,
    pub convert_duration: Duration,
    pub study_sessions: usize,
    pub units_processed: usize,
    pub units_skipped: usize,
    pub units_failed: usize,
    pub plans_generated: usize,
    pub plans_reused: usize,
    pub series_planned: usize,
    pub items_converted: usize,
    pub outputs_written: usize,
}

/// One line of the `ls` listing.
#[derive(Debug, Clone)]
pub struct SessionListing {
    pub key: StudySessionKey,
    /// Series when the inputs were grouped, files otherwise.
    pub count: usize,
    pub suffix: Option<String>,
}

#[derive(Debug, Default)]
struct UnitOutcome {
    generated: bool,
    series: usize,
    items: usize,
    outputs: usize,
    plan_duration: Duration,
    convert_duration: Duration,
}

impl SortEngine {
    /// Validate the configuration and load the configured heuristic and converter.
    pub fn new(config: AppConfig) -> Result<Self, Error> {
        config.validate()?;
        let heuristic = load_heuristic(config.heuristic.as_deref())?;
        let converter = converter_by_name(&config.converter)?;
        let cache = PlanCache::new(PlanCacheConfig {
            bids: config.bids,
            dedicated_info: config.dedicated_info(),
            overwrite: config.overwrite,
        });
        info!("Using heuristic '{}'", heuristic.name());
        Ok(Self {
            config,
            heuristic: Box::new(heuristic),
            extractor: Box::new(JsonRecordExtractor),
            archives: Box::new(NoArchives),
            converter,
            cache,
        })
    }

    pub fn with_heuristic(mut self, heuristic: Box<dyn Heuristic>) -> Self {
        self.heuristic = heuristic;
        self
    }

    pub fn with_extractor(mut self, extractor: Box<dyn RecordExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_archives(mut self, archives: Box<dyn ArchiveExtractor>) -> Self {
        self.archives = archives;
        self
    }

    pub fn with_converter(mut self, converter: Box<dyn Converter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn heuristic(&self) -> &dyn Heuristic {
        self.heuristic.as_ref()
    }

    fn context(&self) -> Result<ResolveContext<'_>, Error> {
        Ok(ResolveContext {
            outdir: &self.config.outdir,
            session: self.config.session.as_deref(),
            grouping: self.config.grouping_mode()?,
            ignore_patterns: &self.config.ignore_patterns,
            heuristic: self.heuristic.as_ref(),
            extractor: self.extractor.as_ref(),
            archives: self.archives.as_ref(),
        })
    }

    /// Split the configured inputs into study sessions.
    pub fn study_sessions(&self) -> Result<StudySessions, Error> {
        let ctx = self.context()?;
        match &self.config.dicom_dir_template {
            Some(tpl) => resolve_from_template(tpl, &self.config.subjects, &ctx),
            None => resolve_from_scan(&self.config.files, &ctx),
        }
    }

    /// Study sessions found under each input, for the `ls` command.
    pub fn list(&self) -> Result<Vec<(String, Vec<SessionListing>)>, Error> {
        let ctx = self.context()?;
        let mut listing = Vec::new();
        match &self.config.dicom_dir_template {
            Some(tpl) => {
                let sessions = resolve_from_template(tpl, &self.config.subjects, &ctx)?;
                listing.push((tpl.clone(), self.describe(sessions)));
            }
            None => {
                for input in &self.config.files {
                    let sessions = resolve_from_scan(std::slice::from_ref(input), &ctx)?;
                    listing.push((input.display().to_string(), self.describe(sessions)));
                }
            }
        }
        Ok(listing)
    }

    fn describe(&self, sessions: StudySessions) -> Vec<SessionListing> {
        sessions
            .into_iter()
            .map(|(key, unit)| match unit {
                WorkUnit::Files(files) => SessionListing {
                    key,
                    count: files.len(),
                    suffix: None,
                },
                WorkUnit::Series(series) => {
                    let infos: Vec<SeriesInfo> = series.iter().map(|s| s.info.clone()).collect();
                    SessionListing {
                        key,
                        count: series.len(),
                        suffix: self.heuristic.ls(&infos),
                    }
                }
            })
            .collect()
    }

    /// Run the full pipeline:
    /// 1. Resolve inputs into study sessions (grouping them when scanning)
    /// 2. Per session: reuse or generate the conversion plan
    /// 3. Per session: expand the plan and hand each item to the converter
    ///
    /// A failing session is logged and the run continues, unless the error
    /// is structural (configuration, missing heuristic capability).
    pub fn run(&self, reporter: &dyn ProgressReporter) -> Result<RunResult, Error> {
        let run_start = Instant::now();
        let result = self.run_sessions(reporter);
        if let Err(e) = SCRATCH_DIRS.cleanup() {
            warn!("Failed to remove scratch directories: {}", e);
        }
        reporter.on_run_complete(run_start.elapsed().as_secs_f64());
        result
    }

    fn run_sessions(&self, reporter: &dyn ProgressReporter) -> Result<RunResult, Error> {
        info!("Discovering study sessions...");
        reporter.on_discover_start();
        let discover_start = Instant::now();
        let sessions = self.study_sessions()?;
        let grouping_duration = discover_start.elapsed();
        reporter.on_discover_complete(sessions.len(), grouping_duration.as_secs_f64());
        info!("Need to process {} study sessions", sessions.len());

        let mut result = RunResult {
            grouping_duration,
            study_sessions: sessions.len(),
            ..RunResult::default()
        };

        let total = sessions.len();
        for (index, (key, unit)) in sessions.into_iter().enumerate() {
            let label = key.to_string();
            if key.locator.as_deref() == Some(UNKNOWN_LOCATOR) {
                warn!("Skipping unknown locator dataset {}", label);
                result.units_skipped += 1;
                continue;
            }
            if unit.is_empty() {
                warn!("Nothing to process for {}", label);
                result.units_skipped += 1;
                continue;
            }

            reporter.on_unit_start(index, total, &label);
            match self.process_unit(&key, &unit, reporter) {
                Ok(outcome) => {
                    result.units_processed += 1;
                    if outcome.generated {
                        result.plans_generated += 1;
                    } else {
                        result.plans_reused += 1;
                    }
                    result.series_planned += outcome.series;
                    result.items_converted += outcome.items;
                    result.outputs_written += outcome.outputs;
                    result.plan_duration += outcome.plan_duration;
                    result.convert_duration += outcome.convert_duration;
                    reporter.on_unit_complete(index, total, outcome.items);
                }
                Err(e) if e.is_fatal_for_batch() => return Err(e),
                Err(e) => {
                    error!("Failed to process {}: {}", label, e);
                    reporter.on_unit_failed(&label, &e.to_string());
                    result.units_failed += 1;
                }
            }
        }

        Ok(result)
    }

    fn process_unit(
        &self,
        key: &StudySessionKey,
        unit: &WorkUnit,
        reporter: &dyn ProgressReporter,
    ) -> Result<UnitOutcome, Error> {
        let subject = key.subject.as_deref().ok_or_else(|| {
            Error::PlanConfig(format!("no subject could be determined for {}", key))
        })?;
        let subject = if self.config.bids && !subject.chars().all(char::is_alphanumeric) {
            clean_bids_subject(subject)
        } else {
            subject.to_string()
        };
        let session = key.session.as_deref();
        let locator = key.locator.as_deref().unwrap_or("");

        let anon_subject = anonymize_subject(&subject, self.config.anon_cmd.as_deref())?;
        let study_outdir = self.config.outdir.join(locator);
        let anon_study_outdir: PathBuf = self.config.conversion_outdir().join(locator);

        info!(
            "PROCESSING STARTS: subject={} outdir={} session={:?}",
            subject,
            study_outdir.display(),
            session
        );

        let plan_start = Instant::now();
        let plan = self.cache.resolve_plan(
            &study_outdir,
            &subject,
            session,
            unit,
            self.heuristic.as_ref(),
            self.extractor.as_ref(),
        )?;
        let mut outcome = UnitOutcome {
            generated: plan.source == PlanSource::Generated,
            series: plan.filegroup.len(),
            plan_duration: plan_start.elapsed(),
            ..UnitOutcome::default()
        };
        debug!(
            "Plan for {} has {} entries ({:?})",
            subject,
            plan.mapping.entries.len(),
            plan.source
        );

        if self.converter.enabled() {
            info!("Doing conversion using {}", self.converter.name());
            let convert_start = Instant::now();
            let target_dir = if self.config.bids {
                anon_study_outdir
            } else {
                anon_study_outdir.join(&anon_subject)
            };
            let items = conversion_items(
                &anon_subject,
                &target_dir,
                &plan.mapping,
                &plan.filegroup,
                session,
            )?;
            let options = ConvertOptions {
                overwrite: self.config.overwrite,
                bids: self.config.bids,
                default_fields: self.heuristic.default_fields(),
            };
            for (done, item) in items.iter().enumerate() {
                let written = self.converter.convert(item, &options)?;
                self.heuristic.custom_callable(item)?;
                outcome.outputs += written.len();
                reporter.on_item_converted(done + 1, items.len());
            }
            outcome.items = items.len();
            outcome.convert_duration = convert_start.elapsed();
        }

        info!(
            "PROCESSING DONE: subject={} outdir={} session={:?}",
            subject,
            study_outdir.display(),
            session
        );
        Ok(outcome)
    }
}
