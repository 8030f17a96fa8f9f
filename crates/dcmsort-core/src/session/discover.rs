use crate::config::non_overlapping_directories;
use glob::Pattern;
use std::path::{Path, PathBuf};
use tracing::{error, warn};
use walkdir::{DirEntry, WalkDir};

/// Directory names never descended into.
const SKIPPED_DIRS: &[&str] = &[".git", ".gitattributes", ".svn", ".bzr", ".hg", ".datalad"];

/// Expand input paths into a list of files.
///
/// Directories are walked recursively (nested inputs are visited once),
/// skipping version-control and `.datalad` directories and anything matching
/// `ignore_globs`. Files found under one directory are sorted; plain file
/// inputs keep their position.
pub fn discover_files(inputs: &[PathBuf], ignore_globs: &[String]) -> Vec<PathBuf> {
    let ignore_patterns: Vec<Pattern> = ignore_globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect();

    let dirs: Vec<String> = inputs
        .iter()
        .filter(|p| p.is_dir())
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    let mut roots = non_overlapping_directories(dirs);

    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let root = input.to_string_lossy();
            if let Some(pos) = roots.iter().position(|r| *r == root) {
                roots.swap_remove(pos);
                files.extend(walk_dir(input, &ignore_patterns));
            }
        } else if input.exists() {
            if !is_ignored(input, &ignore_patterns) {
                files.push(input.clone());
            }
        } else {
            warn!("Input {} does not exist, skipping", input.display());
        }
    }
    files
}

fn walk_dir(dir: &Path, ignore_patterns: &[Pattern]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_entry(|entry| !is_skipped_dir(entry) && !is_ignored(entry.path(), ignore_patterns))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                error!("Error walking {}: {}", dir.display(), e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(DirEntry::into_path)
        .collect();
    files.sort();
    files
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry.depth() > 0
        && SKIPPED_DIRS
            .iter()
            .any(|name| entry.file_name() == *name)
}

fn is_ignored(path: &Path, ignore_patterns: &[Pattern]) -> bool {
    ignore_patterns.iter().any(|p| p.matches_path(path))
}
