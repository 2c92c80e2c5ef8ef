//! Source mapping between user-authored files and debuggee scripts.
//!
//! - `provider`: where line tables come from (source map files).
//! - `translator`: cached, bidirectional file/line translation.

pub mod provider;
pub mod translator;

pub use provider::{MappingProvider, MappingTable, NoMappings, SourceMapFileProvider};
pub use translator::{generated_name_for, SourceMapping, SourceTranslator};
