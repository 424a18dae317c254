//! Barcode lookup routine

use super::{text_update, Extraction};
use crate::error::SourceError;
use crate::sources::IdentifierLookup;
use crate::types::{ItemFieldStates, ResearchTask, SourcePayload, ToolId};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Confidence of a barcode database hit
const LOOKUP_CONFIDENCE: f64 = 0.95;

/// Raw barcode lookup payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarcodePayload {
    code: String,
    category: Option<String>,
}

/// Barcode databases are curated for brand and name; descriptions and
/// categories are free text of uneven quality.
fn field_multiplier(field: &str) -> f64 {
    match field {
        "brand" => 1.0,
        "title" => 0.95,
        "description" | "category" => 0.85,
        _ => 0.8,
    }
}

pub(crate) async fn lookup(
    service: &dyn IdentifierLookup,
    task: &ResearchTask,
    states: &ItemFieldStates,
) -> Result<Extraction, SourceError> {
    let code = states
        .identifier()
        .ok_or_else(|| SourceError::MissingInput("upc".to_string()))?;

    let record = service.lookup(&code).await?;
    if !record.found {
        debug!(code = %code, "Identifier not found in barcode database");
        return Ok(Extraction::empty());
    }

    let payload = SourcePayload::BarcodeLookup(BarcodePayload {
        code,
        category: record.category.clone(),
    });

    let updates = task
        .target_fields
        .iter()
        .filter_map(|field| {
            let raw = match field.as_str() {
                "title" => record.name.as_deref(),
                "brand" => record.brand.as_deref(),
                "description" => record.description.as_deref(),
                "category" => record.category.as_deref(),
                _ => None,
            }?;
            text_update(
                states,
                field,
                raw,
                ToolId::UpcLookup,
                LOOKUP_CONFIDENCE * field_multiplier(field),
                &payload,
            )
        })
        .collect();

    Ok(Extraction::with_updates(updates))
}
