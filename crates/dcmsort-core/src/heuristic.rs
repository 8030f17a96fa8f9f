use crate::error::Error;
use crate::grouping::{SeriesInfo, SERIES_INFO_COLUMNS};
use crate::plan::{ConversionItem, PlanItem, PlanMapping, PlanSlot};
use crate::record::SeriesRecord;
use crate::template::{self, TemplateParams};
use glob::Pattern;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the built-in heuristic that converts every series.
pub const CONVERTALL: &str = "convertall";

/// Study-session identity as returned by `infotoids`. Each part may be unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIds {
    pub locator: Option<String>,
    pub session: Option<String>,
    pub subject: Option<String>,
}

/// Content-driven classification of a study into a study-session identity.
pub trait SessionIdentifier: Send + Sync {
    fn infotoids(&self, series: &[SeriesInfo], outdir: &Path) -> Result<SessionIds, Error>;
}

/// Policy that decides how series are classified and named.
///
/// Only `infotodict` is required. Every other capability has a default that
/// leaves the pipeline unchanged.
pub trait Heuristic: Send + Sync {
    fn name(&self) -> &str;

    /// File the heuristic was loaded from, copied next to the plan for provenance.
    fn source_file(&self) -> Option<&Path> {
        None
    }

    /// Build the conversion plan for one subject/session.
    fn infotodict(&self, series: &[SeriesInfo]) -> Result<PlanMapping, Error>;

    fn identifier(&self) -> Option<&dyn SessionIdentifier> {
        None
    }

    /// Keep a file when this returns true. Only the path is available.
    fn filter_files(&self, _path: &Path) -> bool {
        true
    }

    /// Exclude a record from conversion when this returns true.
    fn filter_dicom(&self, _record: &SeriesRecord) -> bool {
        false
    }

    /// Extra text printed by the `ls` command for one study.
    fn ls(&self, _series: &[SeriesInfo]) -> Option<String> {
        None
    }

    /// Fields merged into converted sidecars when the converter leaves them unset.
    fn default_fields(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// Hook run after each converted item.
    fn custom_callable(&self, _item: &ConversionItem) -> Result<(), Error> {
        Ok(())
    }
}

/// The `infotoids` capability, or a `MissingCapability` error naming the heuristic.
pub fn require_identifier(heuristic: &dyn Heuristic) -> Result<&dyn SessionIdentifier, Error> {
    heuristic.identifier().ok_or_else(|| Error::MissingCapability {
        heuristic: heuristic.name().to_string(),
        capability: "infotoids",
    })
}

/// Load a heuristic by name or path. `None` and `"convertall"` give the built-in.
pub fn load_heuristic(name: Option<&str>) -> Result<RuleHeuristic, Error> {
    match name {
        None | Some(CONVERTALL) => Ok(RuleHeuristic::convertall()),
        Some(path) => RuleHeuristic::from_file(Path::new(path)),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleFile {
    name: Option<String>,
    #[serde(default)]
    filter: FilterSection,
    ids: Option<IdsSection>,
    ls: Option<String>,
    #[serde(default)]
    default_fields: BTreeMap<String, String>,
    #[serde(default, rename = "rule")]
    rules: Vec<RuleSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FilterSection {
    #[serde(default)]
    exclude_files: Vec<String>,
    #[serde(default)]
    exclude_protocols: Vec<String>,
    #[serde(default)]
    exclude_derived: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct IdsSection {
    locator: Option<String>,
    session: Option<String>,
    subject: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleSection {
    template: String,
    #[serde(default = "default_outtypes")]
    outtypes: Vec<String>,
    protocol: Option<String>,
    description: Option<String>,
    sequence: Option<String>,
    image_type: Option<String>,
    derived: Option<bool>,
    min_dim4: Option<u32>,
    max_dim4: Option<u32>,
    #[serde(default)]
    params: BTreeMap<String, String>,
}

fn default_outtypes() -> Vec<String> {
    vec!["nii.gz".to_string()]
}

/// One compiled classification rule.
#[derive(Debug)]
struct Rule {
    template: String,
    outtypes: Vec<String>,
    protocol: Option<Regex>,
    description: Option<Regex>,
    sequence: Option<Regex>,
    image_type: Option<String>,
    derived: Option<bool>,
    min_dim4: Option<u32>,
    max_dim4: Option<u32>,
    params: BTreeMap<String, String>,
}

impl Rule {
    fn compile(section: RuleSection) -> Result<Self, Error> {
        let compile = |pattern: Option<String>| pattern.map(|p| Regex::new(&p)).transpose();
        Ok(Self {
            protocol: compile(section.protocol)?,
            description: compile(section.description)?,
            sequence: compile(section.sequence)?,
            template: section.template,
            outtypes: section.outtypes,
            image_type: section.image_type,
            derived: section.derived,
            min_dim4: section.min_dim4,
            max_dim4: section.max_dim4,
            params: section.params,
        })
    }

    fn matches(&self, info: &SeriesInfo) -> bool {
        let text_matches = |re: &Option<Regex>, value: &str| re.as_ref().map_or(true, |r| r.is_match(value));
        text_matches(&self.protocol, &info.protocol_name)
            && text_matches(
                &self.description,
                info.series_description.as_deref().unwrap_or(""),
            )
            && text_matches(&self.sequence, &info.sequence_name)
            && self
                .image_type
                .as_ref()
                .map_or(true, |t| info.image_type.iter().any(|it| it == t))
            && self.derived.map_or(true, |d| d == info.is_derived)
            && self.min_dim4.map_or(true, |min| info.dim4 >= min)
            && self.max_dim4.map_or(true, |max| info.dim4 <= max)
    }

    fn slot(&self, series_id: &str) -> PlanSlot {
        if self.params.is_empty() {
            PlanSlot::Single(PlanItem::Series(series_id.to_string()))
        } else {
            PlanSlot::Single(PlanItem::Parameterized {
                item: series_id.to_string(),
                params: self.params.clone(),
            })
        }
    }
}

/// A heuristic described declaratively in TOML:
///
/// ```toml
/// name = "mystudy"
///
/// [filter]
/// exclude_files = ["*.bak"]
/// exclude_protocols = ["^localizer"]
/// exclude_derived = true
///
/// [ids]
/// locator = "{study_description}"
/// subject = "{patient_id}"
///
/// [[rule]]
/// template = "{bids_subject_session_dir}/anat/{bids_subject_session_prefix}_T1w"
/// protocol = "(?i)mprage|t1w"
/// ```
///
/// Each series goes to the first matching rule; unmatched series are not converted.
#[derive(Debug)]
pub struct RuleHeuristic {
    name: String,
    source: Option<PathBuf>,
    exclude_files: Vec<Pattern>,
    exclude_protocols: Vec<Regex>,
    exclude_derived: bool,
    ids: Option<TemplateIdentifier>,
    ls: Option<String>,
    default_fields: BTreeMap<String, String>,
    rules: Vec<Rule>,
}

impl RuleHeuristic {
    /// Every series becomes `run{item:03d}` in NIfTI.
    pub fn convertall() -> Self {
        Self {
            name: CONVERTALL.to_string(),
            source: None,
            exclude_files: Vec::new(),
            exclude_protocols: Vec::new(),
            exclude_derived: false,
            ids: None,
            ls: None,
            default_fields: BTreeMap::new(),
            rules: vec![Rule {
                template: "run{item:03d}".to_string(),
                outtypes: default_outtypes(),
                protocol: None,
                description: None,
                sequence: None,
                image_type: None,
                derived: None,
                min_dim4: None,
                max_dim4: None,
                params: BTreeMap::new(),
            }],
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path).map_err(|e| {
            Error::PlanConfig(format!("cannot read heuristic {}: {}", path.display(), e))
        })?;
        let fallback = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "heuristic".to_string());
        let mut heuristic = Self::from_toml(&text, &fallback)?;
        heuristic.source = Some(path.to_path_buf());
        Ok(heuristic)
    }

    /// Parse a heuristic; `fallback_name` is used when the file sets no `name`.
    pub fn from_toml(text: &str, fallback_name: &str) -> Result<Self, Error> {
        let file: RuleFile = toml::from_str(text)?;

        let exclude_files = file
            .filter
            .exclude_files
            .iter()
            .map(|g| Pattern::new(g))
            .collect::<Result<Vec<_>, _>>()?;
        let exclude_protocols = file
            .filter
            .exclude_protocols
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        let rules = file
            .rules
            .into_iter()
            .map(Rule::compile)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: file.name.unwrap_or_else(|| fallback_name.to_string()),
            source: None,
            exclude_files,
            exclude_protocols,
            exclude_derived: file.filter.exclude_derived,
            ids: file.ids.map(TemplateIdentifier),
            ls: file.ls,
            default_fields: file.default_fields,
            rules,
        })
    }
}

impl Heuristic for RuleHeuristic {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_file(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    fn infotodict(&self, series: &[SeriesInfo]) -> Result<PlanMapping, Error> {
        let mut plan = PlanMapping::new();
        // Declare every entry up front so the plan keeps rule order.
        for rule in &self.rules {
            plan.entry_mut(&rule.template, &rule.outtypes);
        }
        for info in series {
            match self.rules.iter().find(|r| r.matches(info)) {
                Some(rule) => plan.push(&rule.template, &rule.outtypes, rule.slot(&info.series_id)),
                None => debug!("No rule matches series {}", info.series_id),
            }
        }
        Ok(plan)
    }

    fn identifier(&self) -> Option<&dyn SessionIdentifier> {
        self.ids.as_ref().map(|ids| ids as &dyn SessionIdentifier)
    }

    fn filter_files(&self, path: &Path) -> bool {
        !self.exclude_files.iter().any(|p| {
            p.matches_path(path)
                || path
                    .file_name()
                    .map_or(false, |name| p.matches(&name.to_string_lossy()))
        })
    }

    fn filter_dicom(&self, record: &SeriesRecord) -> bool {
        (self.exclude_derived && record.is_derived)
            || record.protocol_name.as_deref().map_or(false, |protocol| {
                self.exclude_protocols.iter().any(|re| re.is_match(protocol))
            })
    }

    fn ls(&self, series: &[SeriesInfo]) -> Option<String> {
        let template = self.ls.as_deref()?;
        let first = series.first()?;
        template::render(template, &series_params(first)).ok()
    }

    fn default_fields(&self) -> BTreeMap<String, String> {
        self.default_fields.clone()
    }
}

/// `infotoids` driven by templates over the first series of a study.
#[derive(Debug, Clone)]
struct TemplateIdentifier(IdsSection);

impl SessionIdentifier for TemplateIdentifier {
    fn infotoids(&self, series: &[SeriesInfo], _outdir: &Path) -> Result<SessionIds, Error> {
        let Some(first) = series.first() else {
            return Ok(SessionIds::default());
        };
        let params = series_params(first);
        let render = |t: &Option<String>| -> Result<Option<String>, Error> {
            t.as_deref()
                .map(|t| template::render(t, &params))
                .transpose()
        };
        Ok(SessionIds {
            locator: render(&self.0.locator)?,
            session: render(&self.0.session)?,
            subject: render(&self.0.subject)?,
        })
    }
}

/// Template parameters for every non-empty field of a series summary.
fn series_params(info: &SeriesInfo) -> TemplateParams {
    let mut params = TemplateParams::new();
    for column in SERIES_INFO_COLUMNS {
        if let Some(value) = info.field(column) {
            params.set(*column, value);
        }
    }
    params
}
