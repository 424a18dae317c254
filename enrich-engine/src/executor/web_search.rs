//! Web search routine
//!
//! Searches with whatever identifying attributes are already known and maps
//! the synthesized best-guess record onto target fields. Confidence is
//! scaled by how many results backed the synthesis.

use super::{text_update, Extraction};
use crate::error::SourceError;
use crate::sources::{WebSearchQuery, WebSearchService};
use crate::types::{ItemFieldStates, ResearchTask, SourcePayload, ToolId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Attributes used to build the query
const QUERY_FIELDS: [&str; 4] = ["upc", "brand", "model", "title"];

/// URLs kept in the payload
const PAYLOAD_URL_LIMIT: usize = 3;

/// Raw web search payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSearchPayload {
    query: String,
    top_urls: Vec<String>,
    result_count: usize,
}

/// Descriptive text is what web pages agree on most; prices vary by
/// retailer and date.
fn field_multiplier(field: &str) -> f64 {
    match field {
        "title" | "description" => 0.9,
        "brand" => 0.85,
        "model" => 0.8,
        "price" | "msrp" => 0.7,
        _ => 0.85,
    }
}

/// Factor for the number of results behind a synthesis (0.6 with none, 1.0 with four or more)
fn corroboration(result_count: usize) -> f64 {
    (0.6 + 0.1 * result_count as f64).min(1.0)
}

pub(crate) async fn research(
    service: &dyn WebSearchService,
    task: &ResearchTask,
    states: &ItemFieldStates,
) -> Result<Extraction, SourceError> {
    let known: HashMap<String, String> = QUERY_FIELDS
        .iter()
        .filter_map(|f| states.text_of(f).map(|v| (f.to_string(), v)))
        .collect();
    if known.is_empty() {
        return Err(SourceError::MissingInput(
            "upc, brand, model or title".to_string(),
        ));
    }

    let query = WebSearchQuery {
        known,
        target_fields: task.target_fields.clone(),
    };
    let result = service.research(&query).await?;

    let factor = corroboration(result.results.len());
    let payload = SourcePayload::WebSearch(WebSearchPayload {
        query: query.query_string(),
        top_urls: result
            .results
            .iter()
            .take(PAYLOAD_URL_LIMIT)
            .map(|r| r.url.clone())
            .collect(),
        result_count: result.results.len(),
    });

    let updates = task
        .target_fields
        .iter()
        .filter_map(|field| {
            let raw = result.synthesized.get(field)?;
            text_update(
                states,
                field,
                raw,
                ToolId::WebSearch,
                result.confidence * factor * field_multiplier(field),
                &payload,
            )
        })
        .collect();

    Ok(Extraction::with_updates(updates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ConfidenceLedger;
    use crate::sources::{SearchHit, WebSearchResult};
    use crate::types::{FieldDefinition, FieldValue};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct Search {
        result: WebSearchResult,
        queries: Mutex<Vec<WebSearchQuery>>,
    }

    #[async_trait]
    impl WebSearchService for Search {
        async fn research(&self, query: &WebSearchQuery) -> Result<WebSearchResult, SourceError> {
            self.queries.lock().unwrap().push(query.clone());
            Ok(self.result.clone())
        }
    }

    fn hit(n: usize) -> SearchHit {
        SearchHit {
            title: format!("Result {}", n),
            url: format!("https://shop.example/{}", n),
            snippet: None,
        }
    }

    fn states(seed: &[(&str, &str)]) -> ItemFieldStates {
        let seed: HashMap<String, FieldValue> = seed
            .iter()
            .map(|(k, v)| (k.to_string(), FieldValue::Text(v.to_string())))
            .collect();
        ConfidenceLedger::new().initialize(
            &[
                FieldDefinition::known("brand"),
                FieldDefinition::known("title"),
                FieldDefinition::known("msrp"),
            ],
            &[],
            &seed,
            &[],
        )
    }

    fn task() -> ResearchTask {
        ResearchTask {
            id: Uuid::new_v4(),
            target_fields: vec!["title".to_string(), "msrp".to_string()],
            tool: ToolId::WebSearch,
            priority: 0.0,
            estimated_cost: 0.02,
            estimated_time_ms: 6000,
            rationale: String::new(),
        }
    }

    #[test]
    fn test_corroboration_bounds() {
        assert_eq!(corroboration(0), 0.6);
        assert_eq!(corroboration(10), 1.0);
    }

    #[tokio::test]
    async fn test_synthesized_record_mapped() {
        let mut synthesized = HashMap::new();
        synthesized.insert("title".to_string(), "Acme Steel Kettle 2L".to_string());
        synthesized.insert("msrp".to_string(), "$39.99".to_string());
        synthesized.insert("weight".to_string(), "1.2".to_string());
        let service = Search {
            result: WebSearchResult {
                results: (0..5).map(hit).collect(),
                synthesized,
                confidence: 0.8,
            },
            queries: Mutex::new(Vec::new()),
        };

        let extraction = research(&service, &task(), &states(&[("brand", "Acme")]))
            .await
            .unwrap();

        assert_eq!(extraction.updates.len(), 2);
        assert_eq!(extraction.updates[1].value, FieldValue::Currency(39.99));
        assert!((extraction.updates[0].source.confidence - 0.8 * 0.9).abs() < 1e-12);
        let queries = service.queries.lock().unwrap();
        assert_eq!(queries[0].known.get("brand").map(String::as_str), Some("Acme"));
    }

    #[tokio::test]
    async fn test_requires_known_attributes() {
        let service = Search {
            result: WebSearchResult::default(),
            queries: Mutex::new(Vec::new()),
        };
        let result = research(&service, &task(), &states(&[])).await;
        assert!(matches!(result, Err(SourceError::MissingInput(_))));
    }
}
