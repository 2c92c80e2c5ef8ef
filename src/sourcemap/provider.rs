//! Mapping-table providers.
//!
//! A [`MappingProvider`] answers one question: for a generated file, which
//! original lines correspond to which generated lines? The translator only
//! consumes the answer; the shipped [`SourceMapFileProvider`] reads version 3
//! source maps written next to the generated scripts.

use std::path::{Path, PathBuf};

use sourcemap::SourceMap;
use tracing::debug;

/// Line table for one generated file, as reported by a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingTable {
    /// Original sources referenced by the map, `sourceRoot` applied.
    pub sources: Vec<String>,
    /// Source of the first mapped segment in generated order.
    pub primary_source: Option<String>,
    /// `(original_line, generated_line)` pairs, 1-based, in generated order.
    pub pairs: Vec<(u32, u32)>,
}

/// Supplies mapping tables for generated files.
pub trait MappingProvider: Send + Sync {
    /// Load the table for `generated`, a path relative to the program folder.
    ///
    /// Returns `None` when no mapping exists; the translator then treats the
    /// file as unmapped.
    fn load(&self, generated: &str) -> Option<MappingTable>;
}

/// Provider that never has a mapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMappings;

impl MappingProvider for NoMappings {
    fn load(&self, _generated: &str) -> Option<MappingTable> {
        None
    }
}

/// Reads `<maps folder>/<generated>.map` source map files.
#[derive(Debug, Clone)]
pub struct SourceMapFileProvider {
    maps_folder: PathBuf,
}

impl SourceMapFileProvider {
    /// Create a provider rooted at `maps_folder`.
    #[must_use]
    pub fn new(maps_folder: impl Into<PathBuf>) -> Self {
        Self {
            maps_folder: maps_folder.into(),
        }
    }

    /// Folder the provider reads map files from.
    #[must_use]
    pub fn maps_folder(&self) -> &Path {
        &self.maps_folder
    }
}

impl MappingProvider for SourceMapFileProvider {
    fn load(&self, generated: &str) -> Option<MappingTable> {
        let path = self.maps_folder.join(format!("{generated}.map"));
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                debug!(path = %path.display(), %err, "sourcemap: no map file");
                return None;
            }
        };

        match parse_source_map(&text) {
            Ok(table) => {
                debug!(
                    path = %path.display(),
                    pairs = table.pairs.len(),
                    "sourcemap: map loaded"
                );
                Some(table)
            }
            Err(reason) => {
                debug!(path = %path.display(), %reason, "sourcemap: unreadable map ignored");
                None
            }
        }
    }
}

/// Parse a version 3 source map document into a [`MappingTable`].
///
/// Columns and names are dropped; only line pairs survive.
///
/// # Errors
///
/// Returns a diagnostic string when the document is not a valid source map,
/// for example when `mappings` holds invalid VLQ data.
pub fn parse_source_map(text: &str) -> Result<MappingTable, String> {
    let map = SourceMap::from_slice(text.as_bytes()).map_err(|err| err.to_string())?;

    let root = map
        .get_source_root()
        .map(|root| root.trim_end_matches('/'))
        .filter(|root| !root.is_empty());
    let resolve = |source: &str| match root {
        Some(root) if !source.starts_with(&format!("{root}/")) => format!("{root}/{source}"),
        _ => source.to_owned(),
    };

    let mut table = MappingTable {
        sources: map.sources().map(&resolve).collect(),
        ..MappingTable::default()
    };

    for token in map.tokens() {
        let Some(source) = token.get_source() else {
            continue;
        };
        if table.primary_source.is_none() {
            table.primary_source = Some(resolve(source));
        }
        table
            .pairs
            .push((token.get_src_line() + 1, token.get_dst_line() + 1));
    }

    Ok(table)
}
