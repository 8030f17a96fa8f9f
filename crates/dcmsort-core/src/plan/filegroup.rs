use crate::error::Error;
use crate::grouping::SeriesGroup;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// `series id -> source files`, as persisted next to the plan.
pub type FileGroup = BTreeMap<String, Vec<PathBuf>>;

pub fn file_group_from_series(series: &[SeriesGroup]) -> FileGroup {
    series
        .iter()
        .map(|s| (s.info.series_id.clone(), s.files.clone()))
        .collect()
}

/// Write the file group as sorted, 4-space indented JSON.
pub fn save_file_group(path: &Path, group: &FileGroup) -> Result<(), Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    group.serialize(&mut ser)?;
    buf.push(b'\n');
    fs::write(path, buf)?;
    Ok(())
}

pub fn load_file_group(path: &Path) -> Result<FileGroup, Error> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
