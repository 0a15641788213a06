//! Entry filtering for snapshot archives.

use std::collections::HashSet;
use std::path::{Component, Path};

/// Directory name whose contents are never archived (the server regenerates them).
const CACHE_SEGMENT: &str = "cache";

/// Decides which entries of the server directory end up in a snapshot.
///
/// Paths handed to [`SnapshotFilter::keep`] are relative to the archived
/// directory. A skipped directory is skipped together with everything below it.
#[derive(Debug, Clone, Default)]
pub struct SnapshotFilter {
    excluded_paths: HashSet<String>,
    excluded_suffixes: Vec<String>,
    executable_names: HashSet<String>,
}

impl SnapshotFilter {
    pub fn new<P, S, E>(excluded_paths: P, excluded_suffixes: S, executable_names: E) -> Self
    where
        P: IntoIterator,
        P::Item: AsRef<str>,
        S: IntoIterator,
        S::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Self {
            excluded_paths: excluded_paths
                .into_iter()
                .map(|p| normalize_relative(p.as_ref()))
                .filter(|p| !p.is_empty())
                .collect(),
            excluded_suffixes: normalize_suffixes(excluded_suffixes),
            executable_names: executable_names
                .into_iter()
                .map(|n| n.as_ref().to_string())
                .collect(),
        }
    }

    pub fn excluded_suffixes(&self) -> &[String] {
        &self.excluded_suffixes
    }

    /// Returns `true` when the entry at `relative` should be archived.
    ///
    /// `is_dir` tells whether the entry itself is a directory; only
    /// directories named `cache` are dropped, not files of that name.
    pub fn keep(&self, relative: &Path, is_dir: bool) -> bool {
        let relative_str = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/");

        if self.excluded_paths.contains(&relative_str) {
            return false;
        }

        let mut components = relative.components().collect::<Vec<_>>();
        if !is_dir {
            components.pop();
        }
        if components.iter().any(|c| c.as_os_str() == CACHE_SEGMENT) {
            return false;
        }

        let file_name = relative
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if self.executable_names.contains(&file_name) {
            return false;
        }

        !self
            .excluded_suffixes
            .iter()
            .any(|suffix| file_name.ends_with(suffix.as_str()))
    }
}

/// Normalise a single extension: wildcards stripped, always starting with `.`.
///
/// Returns `None` for inputs that are empty once cleaned up.
pub fn normalize_suffix(raw: &str) -> Option<String> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != '*').collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." {
        return None;
    }

    if cleaned.starts_with('.') {
        Some(cleaned.to_string())
    } else {
        Some(format!(".{}", cleaned))
    }
}

pub fn normalize_suffixes<I>(raw: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut suffixes: Vec<String> = Vec::new();
    for suffix in raw.into_iter().filter_map(|s| normalize_suffix(s.as_ref())) {
        if !suffixes.contains(&suffix) {
            suffixes.push(suffix);
        }
    }
    suffixes
}

fn normalize_relative(raw: &str) -> String {
    raw.trim()
        .replace('\\', "/")
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}
