//! OCR routine
//!
//! Maps labelled text and barcode-like digit strings read from item photos
//! onto target fields.

use super::{text_update, Extraction};
use crate::error::SourceError;
use crate::sources::OcrService;
use crate::types::{ItemFieldStates, ResearchContext, ResearchTask, SourcePayload, ToolId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Raw OCR payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrPayload {
    identifier_count: usize,
    label_count: usize,
}

/// Printed identifiers and model numbers read reliably; brand names are
/// often stylized logos and product titles span several text blocks.
fn field_multiplier(field: &str) -> f64 {
    match field {
        "upc" => 1.0,
        "model" => 0.95,
        "size" => 0.9,
        "brand" => 0.7,
        "title" => 0.6,
        _ => 0.8,
    }
}

pub(crate) async fn extract(
    service: &dyn OcrService,
    task: &ResearchTask,
    context: &ResearchContext,
    states: &ItemFieldStates,
) -> Result<Extraction, SourceError> {
    if !context.has_images() {
        return Err(SourceError::MissingInput("images".to_string()));
    }

    let result = service.extract_text(&context.image_urls).await?;

    // Raw labels that normalize to the same key: first in sorted order wins
    let mut raw_labels: Vec<(&String, &String)> = result.labels.iter().collect();
    raw_labels.sort();
    let mut labels: HashMap<String, &str> = HashMap::new();
    for (k, v) in raw_labels {
        labels.entry(normalize_label(k)).or_insert(v.as_str());
    }
    let identifier = result.identifiers.iter().find_map(|s| barcode_digits(s));

    let payload = SourcePayload::Ocr(OcrPayload {
        identifier_count: result.identifiers.len(),
        label_count: result.labels.len(),
    });

    let updates = task
        .target_fields
        .iter()
        .filter_map(|field| {
            let raw = if field == "upc" {
                identifier.as_deref().or_else(|| labels.get("upc").copied())
            } else {
                labels.get(field.as_str()).copied()
            }?;
            text_update(
                states,
                field,
                raw,
                ToolId::Ocr,
                result.confidence * field_multiplier(field),
                &payload,
            )
        })
        .collect();

    Ok(Extraction::with_updates(updates))
}

fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase().replace(&[' ', '-'][..], "_")
}

/// Digits of a UPC/EAN/GTIN candidate (8 to 14 digits), separators removed
fn barcode_digits(text: &str) -> Option<String> {
    let digits: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    let valid = (8..=14).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit());
    valid.then_some(digits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ConfidenceLedger;
    use crate::sources::OcrResult;
    use crate::types::{FieldDefinition, FieldValue};
    use async_trait::async_trait;
    use uuid::Uuid;

    struct Reader(OcrResult);

    #[async_trait]
    impl OcrService for Reader {
        async fn extract_text(&self, _urls: &[String]) -> Result<OcrResult, SourceError> {
            Ok(self.0.clone())
        }
    }

    fn states() -> ItemFieldStates {
        ConfidenceLedger::new().initialize(
            &[
                FieldDefinition::known("upc"),
                FieldDefinition::known("brand"),
                FieldDefinition::known("model"),
            ],
            &[],
            &HashMap::new(),
            &[],
        )
    }

    fn task() -> ResearchTask {
        ResearchTask {
            id: Uuid::new_v4(),
            target_fields: vec!["upc".to_string(), "model".to_string(), "brand".to_string()],
            tool: ToolId::Ocr,
            priority: 0.0,
            estimated_cost: 0.0015,
            estimated_time_ms: 3000,
            rationale: String::new(),
        }
    }

    #[test]
    fn test_barcode_digits() {
        assert_eq!(barcode_digits("0 12345 67890 5"), Some("012345678905".to_string()));
        assert_eq!(barcode_digits("KX-200"), None);
        assert_eq!(barcode_digits("1234"), None);
    }

    #[tokio::test]
    async fn test_brand_trusted_less_than_model() {
        let mut labels = HashMap::new();
        labels.insert("Model Number".to_string(), "KX-200".to_string());
        labels.insert("Brand".to_string(), "ACME".to_string());
        labels.insert("model".to_string(), "KX-200".to_string());
        let service = Reader(OcrResult {
            identifiers: vec!["not a code".to_string(), "0-12345-67890-5".to_string()],
            labels,
            confidence: 0.9,
        });
        let context = ResearchContext::new("item").with_images(["https://img/1.jpg"]);

        let extraction = extract(&service, &task(), &context, &states()).await.unwrap();

        assert_eq!(extraction.updates.len(), 3);
        let by_field = |name: &str| {
            extraction
                .updates
                .iter()
                .find(|u| u.field_name == name)
                .unwrap()
        };
        assert_eq!(by_field("upc").value, FieldValue::Text("012345678905".to_string()));
        assert!(by_field("brand").source.confidence < by_field("model").source.confidence);
    }

    #[tokio::test]
    async fn test_colliding_labels_resolve_deterministically() {
        let context = ResearchContext::new("item").with_images(["https://img/1.jpg"]);
        for _ in 0..20 {
            let mut labels = HashMap::new();
            labels.insert("brand".to_string(), "Acme Corp".to_string());
            labels.insert("Brand".to_string(), "ACME".to_string());
            let service = Reader(OcrResult {
                identifiers: Vec::new(),
                labels,
                confidence: 0.9,
            });

            let extraction = extract(&service, &task(), &context, &states()).await.unwrap();

            assert_eq!(extraction.updates.len(), 1);
            assert_eq!(extraction.updates[0].value, FieldValue::Text("ACME".to_string()));
        }
    }

    #[tokio::test]
    async fn test_requires_images() {
        let service = Reader(OcrResult::default());
        let result = extract(&service, &task(), &ResearchContext::new("item"), &states()).await;
        assert!(matches!(result, Err(SourceError::MissingInput(_))));
    }
}
