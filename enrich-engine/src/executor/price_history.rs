//! Price-history routines
//!
//! Two entry points share one product mapping:
//! - **by_identifier** - exact product match through the known UPC
//! - **by_keyword** - best match for brand/model/title keywords, trusted less

use super::{text_update, Extraction};
use crate::error::SourceError;
use crate::sources::{PriceHistoryProduct, PriceHistoryService};
use crate::types::{ItemFieldStates, ResearchTask, SourcePayload, ToolId};
use serde::{Deserialize, Serialize};
use tracing::debug;

const IDENTIFIER_MATCH_CONFIDENCE: f64 = 0.90;
const KEYWORD_MATCH_CONFIDENCE: f64 = 0.70;

/// Fields whose values make up a keyword query, in query order
const KEYWORD_FIELDS: [&str; 3] = ["brand", "model", "title"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum MatchKind {
    Identifier,
    Keyword,
}

/// Raw price-history payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryPayload {
    product_id: String,
    matched_by: MatchKind,
    sales_rank: Option<u64>,
}

/// Sales rank and price come straight from marketplace data; catalog text
/// on marketplaces is seller-entered.
fn field_multiplier(field: &str) -> f64 {
    match field {
        "sales_rank" => 1.0,
        "price" => 0.95,
        "title" | "brand" => 0.9,
        "category" => 0.85,
        _ => 0.8,
    }
}

pub(crate) async fn by_identifier(
    service: &dyn PriceHistoryService,
    task: &ResearchTask,
    states: &ItemFieldStates,
) -> Result<Extraction, SourceError> {
    let code = states
        .identifier()
        .ok_or_else(|| SourceError::MissingInput("upc".to_string()))?;

    let Some(product_id) = service.search_by_identifier(&code).await? else {
        debug!(code = %code, "No marketplace product for identifier");
        return Ok(Extraction::empty());
    };

    fetch(service, task, states, &product_id, MatchKind::Identifier).await
}

pub(crate) async fn by_keyword(
    service: &dyn PriceHistoryService,
    task: &ResearchTask,
    states: &ItemFieldStates,
) -> Result<Extraction, SourceError> {
    let keywords = keyword_query(states)
        .ok_or_else(|| SourceError::MissingInput("brand, model or title".to_string()))?;

    let Some(product_id) = service.search_by_keyword(&keywords).await? else {
        debug!(keywords = %keywords, "No marketplace product for keywords");
        return Ok(Extraction::empty());
    };

    fetch(service, task, states, &product_id, MatchKind::Keyword).await
}

fn keyword_query(states: &ItemFieldStates) -> Option<String> {
    let parts: Vec<String> = KEYWORD_FIELDS
        .iter()
        .filter_map(|f| states.text_of(f))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

async fn fetch(
    service: &dyn PriceHistoryService,
    task: &ResearchTask,
    states: &ItemFieldStates,
    product_id: &str,
    matched_by: MatchKind,
) -> Result<Extraction, SourceError> {
    let Some(product) = service.get_product(product_id).await? else {
        debug!(product_id, "Marketplace product vanished between search and fetch");
        return Ok(Extraction::empty());
    };

    let (tool, base_confidence) = match matched_by {
        MatchKind::Identifier => (ToolId::PriceHistoryIdentifier, IDENTIFIER_MATCH_CONFIDENCE),
        MatchKind::Keyword => (ToolId::PriceHistoryKeyword, KEYWORD_MATCH_CONFIDENCE),
    };
    let payload = SourcePayload::PriceHistory(PriceHistoryPayload {
        product_id: product.product_id.clone(),
        matched_by,
        sales_rank: product.sales_rank,
    });

    let updates = task
        .target_fields
        .iter()
        .filter_map(|field| {
            let raw = product_value(&product, field)?;
            text_update(
                states,
                field,
                &raw,
                tool,
                base_confidence * field_multiplier(field),
                &payload,
            )
        })
        .collect();

    Ok(Extraction::with_updates(updates))
}

fn product_value(product: &PriceHistoryProduct, field: &str) -> Option<String> {
    match field {
        "title" => product.title.clone(),
        "brand" => product.brand.clone(),
        "category" => product.category.clone(),
        "price" => product
            .price_stats
            .representative()
            .map(|p| format!("{:.2}", p)),
        "sales_rank" => product.sales_rank.map(|r| r.to_string()),
        _ => None,
    }
}
