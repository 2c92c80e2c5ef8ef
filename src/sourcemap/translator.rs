//! Original ⇄ generated file and line translation.
//!
//! File identifiers are paths relative to the program folder, with forward
//! slashes, exactly as the debuggee reports them. Each distinct file pair gets
//! one [`SourceMapping`], built lazily on first reference and cached under
//! both its original and its generated name.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use super::provider::MappingProvider;

/// Extension of original sources that compile to debuggee scripts.
const ORIGINAL_EXTENSION: &str = ".ts";

/// Extension of the scripts the debuggee executes.
const GENERATED_EXTENSION: &str = ".js";

/// Line tables for one original/generated file pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMapping {
    /// Original (user-authored) file name.
    pub original_file: String,
    /// Generated file name as known to the debuggee.
    pub generated_file: String,
    original_to_generated: HashMap<u32, u32>,
    generated_to_original: HashMap<u32, u32>,
}

impl SourceMapping {
    /// Build a mapping from `(original_line, generated_line)` pairs.
    ///
    /// The first pair seen wins in each direction.
    #[must_use]
    pub fn new(
        original_file: String,
        generated_file: String,
        pairs: impl IntoIterator<Item = (u32, u32)>,
    ) -> Self {
        let mut mapping = Self {
            original_file,
            generated_file,
            ..Self::default()
        };
        for (original, generated) in pairs {
            mapping
                .original_to_generated
                .entry(original)
                .or_insert(generated);
            mapping
                .generated_to_original
                .entry(generated)
                .or_insert(original);
        }
        mapping
    }

    /// Generated line for `line`, or `line` itself if unmapped.
    #[must_use]
    pub fn generated_line(&self, line: u32) -> u32 {
        self.original_to_generated.get(&line).copied().unwrap_or(line)
    }

    /// Original line for `line`, or `line` itself if unmapped.
    #[must_use]
    pub fn original_line(&self, line: u32) -> u32 {
        self.generated_to_original.get(&line).copied().unwrap_or(line)
    }
}

/// Translates file names and line numbers between the front end and the
/// debuggee.
pub struct SourceTranslator {
    enabled: bool,
    provider: Box<dyn MappingProvider>,
    by_original: HashMap<String, Arc<SourceMapping>>,
    by_generated: HashMap<String, Arc<SourceMapping>>,
    /// Directory of the first mapping source ever read.
    discovered_source_dir: Option<String>,
}

impl std::fmt::Debug for SourceTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceTranslator")
            .field("enabled", &self.enabled)
            .field("mappings", &self.by_generated.len())
            .field("discovered_source_dir", &self.discovered_source_dir)
            .finish_non_exhaustive()
    }
}

impl SourceTranslator {
    /// Create a translator consulting `provider`.
    #[must_use]
    pub fn new(provider: impl MappingProvider + 'static) -> Self {
        Self {
            enabled: true,
            provider: Box::new(provider),
            by_original: HashMap::new(),
            by_generated: HashMap::new(),
            discovered_source_dir: None,
        }
    }

    /// Create a translator where every translation is the identity.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(super::provider::NoMappings)
        }
    }

    /// Whether mapping is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Directory (relative to the program folder) of the first original
    /// source named by any map read so far.
    #[must_use]
    pub fn discovered_source_dir(&self) -> Option<&str> {
        self.discovered_source_dir.as_deref()
    }

    /// Generated file name for `original`.
    pub fn to_generated_file(&mut self, original: &str) -> String {
        if !self.enabled {
            return original.to_owned();
        }
        self.mapping_for_original(original).generated_file.clone()
    }

    /// Original file name for `generated`.
    pub fn to_original_file(&mut self, generated: &str) -> String {
        if !self.enabled {
            return generated.to_owned();
        }
        self.mapping_for_generated(generated).original_file.clone()
    }

    /// Generated line for `line` of `original`; unmapped lines pass through.
    pub fn to_generated_line(&mut self, original: &str, line: u32) -> u32 {
        if !self.enabled {
            return line;
        }
        self.mapping_for_original(original).generated_line(line)
    }

    /// Original line for `line` of `generated`; unmapped lines pass through.
    pub fn to_original_line(&mut self, generated: &str, line: u32) -> u32 {
        if !self.enabled {
            return line;
        }
        self.mapping_for_generated(generated).original_line(line)
    }

    /// Cached mapping for an original file, built on first use.
    pub fn mapping_for_original(&mut self, original: &str) -> Arc<SourceMapping> {
        if let Some(mapping) = self.by_original.get(original) {
            return Arc::clone(mapping);
        }
        let generated = generated_name_for(original);
        self.build(Some(original), &generated)
    }

    /// Cached mapping for a generated file, built on first use.
    pub fn mapping_for_generated(&mut self, generated: &str) -> Arc<SourceMapping> {
        if let Some(mapping) = self.by_generated.get(generated) {
            return Arc::clone(mapping);
        }
        self.build(None, generated)
    }

    fn build(&mut self, original: Option<&str>, generated: &str) -> Arc<SourceMapping> {
        let table = self.provider.load(generated).unwrap_or_default();

        if self.discovered_source_dir.is_none() {
            if let Some(source) = &table.primary_source {
                self.discovered_source_dir = Some(dirname(source));
            }
        }

        let original = match original {
            Some(original) => original.to_owned(),
            None => match &table.primary_source {
                Some(source) => sibling_name(generated, source),
                None => generated.to_owned(),
            },
        };

        debug!(
            %original,
            generated,
            pairs = table.pairs.len(),
            "sourcemap: mapping built"
        );

        let mapping = Arc::new(SourceMapping::new(
            original.clone(),
            generated.to_owned(),
            table.pairs,
        ));
        self.by_original.insert(original, Arc::clone(&mapping));
        self.by_generated
            .insert(generated.to_owned(), Arc::clone(&mapping));
        mapping
    }
}

/// Derive the debuggee's script name from an original source name.
///
/// Backslashes become forward slashes and a `.ts` extension (any case)
/// becomes `.js`.
#[must_use]
pub fn generated_name_for(original: &str) -> String {
    let name = original.replace('\\', "/");
    let split = name.len().saturating_sub(ORIGINAL_EXTENSION.len());
    match name.get(split..) {
        Some(ext) if ext.eq_ignore_ascii_case(ORIGINAL_EXTENSION) => {
            format!("{}{GENERATED_EXTENSION}", &name[..split])
        }
        _ => name,
    }
}

/// `<dirname(generated)>/<basename(source)>`.
fn sibling_name(generated: &str, source: &str) -> String {
    let base = Path::new(source)
        .file_name()
        .map_or_else(|| source.to_owned(), |b| b.to_string_lossy().into_owned());
    let dir = dirname(generated);
    if dir.is_empty() {
        base
    } else {
        format!("{dir}/{base}")
    }
}

fn dirname(path: &str) -> String {
    Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default()
}
