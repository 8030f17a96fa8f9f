pub mod archive;
pub mod discover;
pub mod resolve;

pub use archive::{split_bundles, ArchiveExtractor, Bundle, NoArchives};
pub use discover::discover_files;
pub use resolve::{resolve_from_scan, resolve_from_template, ResolveContext};

use crate::grouping::SeriesGroup;
use ahash::AHashSet;
use std::fmt;
use std::path::PathBuf;
use tracing::warn;

/// Identity of one unit of conversion work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StudySessionKey {
    pub locator: Option<String>,
    pub session: Option<String>,
    pub subject: Option<String>,
}

impl fmt::Display for StudySessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "locator={} session={} subject={}",
            show(&self.locator),
            show(&self.session),
            show(&self.subject)
        )
    }
}

/// What a study session carries into the plan stage: raw files still to be
/// grouped, or series already grouped during the scan.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkUnit {
    Files(Vec<PathBuf>),
    Series(Vec<SeriesGroup>),
}

impl WorkUnit {
    pub fn is_empty(&self) -> bool {
        match self {
            WorkUnit::Files(files) => files.is_empty(),
            WorkUnit::Series(series) => series.is_empty(),
        }
    }

    pub fn file_count(&self) -> usize {
        match self {
            WorkUnit::Files(files) => files.len(),
            WorkUnit::Series(series) => series.iter().map(|s| s.files.len()).sum(),
        }
    }
}

/// Study sessions in discovery order. The first unit registered under a key
/// wins; later ones are dropped with a warning.
#[derive(Debug, Default)]
pub struct StudySessions {
    keys: AHashSet<StudySessionKey>,
    units: Vec<(StudySessionKey, WorkUnit)>,
}

impl StudySessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the key was already taken.
    pub fn insert(&mut self, key: StudySessionKey, unit: WorkUnit) -> bool {
        if self.keys.contains(&key) {
            warn!("Study session {} already registered, skipping", key);
            return false;
        }
        self.keys.insert(key.clone());
        self.units.push((key, unit));
        true
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(StudySessionKey, WorkUnit)> {
        self.units.iter()
    }
}

impl IntoIterator for StudySessions {
    type Item = (StudySessionKey, WorkUnit);
    type IntoIter = std::vec::IntoIter<(StudySessionKey, WorkUnit)>;

    fn into_iter(self) -> Self::IntoIter {
        self.units.into_iter()
    }
}
