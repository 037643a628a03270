//! Bulk CSV exchange: streaming import, streaming export, templates

mod export;
mod import;
mod template;

pub use export::{BulkExportPipeline, ExportChunk};
pub use import::{BulkImportPipeline, ImportReport, RowIssue};
pub use template::csv_template;

/// Separator used when joining array columns into a single CSV cell
pub const ARRAY_SEPARATOR: &str = "|";

/// Rows whose key cell starts with this marker are template guidance rows,
/// skipped on import and emitted by the template generator.
pub const GUIDANCE_MARKER: &str = "#";
