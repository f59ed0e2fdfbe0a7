//! Markdown file discovery under the docs root.
//!
//! Include/exclude globs are matched against paths relative to the root.
//! `.git`, `target` and `node_modules` are always excluded.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::config::DocsConfig;

/// Modification time per matching file.
pub type Snapshot = HashMap<PathBuf, SystemTime>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

#[derive(Clone)]
pub struct Scanner {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
}

impl Scanner {
    pub fn new(config: &DocsConfig) -> Result<Self> {
        let mut excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        excludes.extend(config.exclude_globs.iter().cloned());

        Ok(Self {
            root: config.root.clone(),
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&excludes)?,
            follow_symlinks: config.follow_symlinks,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn matches(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let rel_str = relative.to_string_lossy();
        !self.exclude.is_match(rel_str.as_ref()) && self.include.is_match(rel_str.as_ref())
    }

    /// Matching files, sorted for deterministic processing order.
    pub fn scan(&self) -> Result<Vec<PathBuf>> {
        if !self.root.exists() {
            bail!("Docs root does not exist: {}", self.root.display());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(self.follow_symlinks) {
            let entry = entry?;
            if entry.file_type().is_file() && self.matches(entry.path()) {
                files.push(entry.into_path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Modification times of every matching file. Files that vanish
    /// mid-walk are skipped.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new();
        for path in self.scan()? {
            if let Ok(modified) = std::fs::metadata(&path).and_then(|m| m.modified()) {
                snapshot.insert(path, modified);
            }
        }
        Ok(snapshot)
    }
}

/// Files created or modified between two snapshots, sorted by path.
/// Deletions are not reported.
pub fn diff_snapshots(old: &Snapshot, new: &Snapshot) -> Vec<Change> {
    let mut changes: Vec<Change> = new
        .iter()
        .filter_map(|(path, modified)| match old.get(path) {
            None => Some(Change {
                path: path.clone(),
                kind: ChangeKind::Created,
            }),
            Some(prev) if prev != modified => Some(Change {
                path: path.clone(),
                kind: ChangeKind::Modified,
            }),
            Some(_) => None,
        })
        .collect();
    changes.sort_by(|a, b| a.path.cmp(&b.path));
    changes
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
