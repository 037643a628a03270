//! Import template generation
//!
//! A template is the kind's import header row plus one sentinel guidance
//! row. The guidance row's key cell starts with the marker the import
//! pipeline skips, so a template filled in around the sentinel uploads
//! cleanly without deleting it.

use crate::error::RegistryResult;
use crate::kinds::{descriptor, EntityKind};

use super::GUIDANCE_MARKER;

pub fn csv_template(kind: EntityKind) -> RegistryResult<Vec<u8>> {
    let desc = descriptor(kind);

    let mut headers: Vec<&str> = desc.csv_columns.iter().map(|c| c.header).collect();
    let mut guidance: Vec<String> = desc
        .csv_columns
        .iter()
        .map(|c| {
            if c.field == desc.import_key {
                format!("{GUIDANCE_MARKER} {}", c.guidance)
            } else {
                c.guidance.to_string()
            }
        })
        .collect();
    if let Some(enrichment) = desc.enrichment {
        headers.push(enrichment.header);
        guidance.push("Comma-separated, values from the metadata catalog".to_string());
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&headers)?;
    writer.write_record(&guidance)?;
    writer
        .into_inner()
        .map_err(|e| crate::error::RegistryError::Internal(e.to_string()))
}
