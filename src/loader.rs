//! Recursive Markdown document loader.
//!
//! Walks every configured knowledge root, keeps files whose extension is in
//! `[knowledge].extensions`, and produces one [`Document`] per file. Missing
//! roots and unreadable files are logged and skipped: a partial result is
//! still a valid result.

use anyhow::Result;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::models::{Document, META_FILENAME, META_SOURCE};

/// Directories never worth indexing.
const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/node_modules/**", "**/target/**"];

/// Load all documents under the roots configured in `[knowledge]`.
pub fn load_from_config(config: &Config) -> Result<Vec<Document>> {
    load_documents(
        &config.knowledge.base_dir,
        &config.knowledge_roots(),
        &config.knowledge.extensions,
    )
}

/// Load documents from `roots`, recording `source` relative to `base_dir`.
///
/// Output is sorted by `source` and contains each file at most once, even
/// when roots overlap.
pub fn load_documents(
    base_dir: &Path,
    roots: &[PathBuf],
    extensions: &[String],
) -> Result<Vec<Document>> {
    let include_set = build_extension_set(extensions)?;
    let exclude_set = build_globset(DEFAULT_EXCLUDES)?;

    let mut by_source: BTreeMap<String, Document> = BTreeMap::new();

    for root in roots {
        if !root.is_dir() {
            warn!(path = %root.display(), "knowledge path missing or not a directory, skipping");
            continue;
        }

        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(root = %root.display(), error = %e, "failed to read directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let rel_to_root = path.strip_prefix(root).unwrap_or(path);
            if exclude_set.is_match(rel_to_root) || !include_set.is_match(rel_to_root) {
                continue;
            }

            let source = relative_source(base_dir, path);
            if by_source.contains_key(&source) {
                debug!(source = %source, "already loaded from an earlier root");
                continue;
            }

            match std::fs::read_to_string(path) {
                Ok(content) => {
                    by_source.insert(source.clone(), make_document(content, &source, path));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read document, skipping");
                }
            }
        }
    }

    debug!(documents = by_source.len(), "documents loaded");
    Ok(by_source.into_values().collect())
}

fn make_document(content: String, source: &str, path: &Path) -> Document {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut metadata = BTreeMap::new();
    metadata.insert(META_SOURCE.to_string(), source.to_string());
    metadata.insert(META_FILENAME.to_string(), filename);
    Document::new(content, metadata)
}

/// Path of `path` relative to `base_dir`, joined with forward slashes.
/// Files outside the base keep their full path so that same-named files
/// under different external roots stay distinct.
fn relative_source(base_dir: &Path, path: &Path) -> String {
    match path.strip_prefix(base_dir) {
        Ok(relative) => join_normal(relative),
        Err(_) if path.has_root() => format!("/{}", join_normal(path)),
        Err(_) => join_normal(path),
    }
}

fn join_normal(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn build_extension_set(extensions: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for ext in extensions {
        let ext = ext.trim_start_matches('.');
        builder.add(
            GlobBuilder::new(&format!("**/*.{}", ext))
                .case_insensitive(true)
                .build()?,
        );
    }
    Ok(builder.build()?)
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(GlobBuilder::new(pattern).build()?);
    }
    Ok(builder.build()?)
}
