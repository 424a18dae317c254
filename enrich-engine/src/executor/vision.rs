//! Vision routine
//!
//! Builds a field-specific extraction prompt, runs it against the item
//! photos and maps the returned attribute map onto target fields.

use super::{json_update, Extraction};
use crate::error::SourceError;
use crate::sources::VisionService;
use crate::types::{
    FieldDataType, ItemFieldStates, ResearchContext, ResearchTask, SourcePayload, ToolId,
};
use serde::{Deserialize, Serialize};

/// Raw vision payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionPayload {
    prompt_fields: Vec<String>,
}

/// Visual attributes are what vision models see best; text-derived fields
/// such as model numbers are better served by OCR.
fn field_multiplier(field: &str) -> f64 {
    match field {
        "condition" => 1.0,
        "color" => 0.95,
        "material" => 0.85,
        "brand" | "title" => 0.8,
        "model" => 0.7,
        _ => 0.85,
    }
}

pub(crate) async fn analyze(
    service: &dyn VisionService,
    task: &ResearchTask,
    context: &ResearchContext,
    states: &ItemFieldStates,
) -> Result<Extraction, SourceError> {
    if !context.has_images() {
        return Err(SourceError::MissingInput("images".to_string()));
    }

    let prompt = build_prompt(task, states);
    let result = service.analyze(&context.image_urls, &prompt).await?;

    let payload = SourcePayload::Vision(VisionPayload {
        prompt_fields: task.target_fields.clone(),
    });

    let updates = task
        .target_fields
        .iter()
        .filter_map(|field| {
            let attribute = result.attributes.get(field)?;
            let confidence = attribute.confidence.unwrap_or(result.confidence);
            json_update(
                states,
                field,
                &attribute.value,
                ToolId::Vision,
                confidence * field_multiplier(field),
                &payload,
            )
        })
        .collect();

    Ok(Extraction::with_updates(updates))
}

/// Extraction prompt listing each target field with its expected shape
pub fn build_prompt(task: &ResearchTask, states: &ItemFieldStates) -> String {
    let mut prompt = String::from(
        "Examine the product photos and extract the following attributes. \
         Respond with a JSON object keyed by attribute name; each entry has a \
         \"value\" and a \"confidence\" between 0 and 1. Omit attributes you cannot see.\n",
    );

    for name in &task.target_fields {
        let Some(field) = states.get(name) else {
            continue;
        };
        let shape = match field.data_type {
            FieldDataType::Text => "text",
            FieldDataType::Number => "number",
            FieldDataType::Currency => "price in USD",
            FieldDataType::Boolean => "true or false",
            FieldDataType::List => "list of short strings",
        };
        prompt.push_str(&format!("- {} ({}): {}", field.name, field.display_name, shape));
        if let Some(allowed) = &field.allowed_values {
            prompt.push_str(&format!(", one of [{}]", allowed.join(", ")));
        }
        prompt.push('\n');
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ConfidenceLedger;
    use crate::sources::{VisionAttribute, VisionResult};
    use crate::types::{FieldDefinition, FieldValue};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct Model {
        result: VisionResult,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl VisionService for Model {
        async fn analyze(&self, _urls: &[String], prompt: &str) -> Result<VisionResult, SourceError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.result.clone())
        }
    }

    fn states() -> ItemFieldStates {
        ConfidenceLedger::new().initialize(
            &[FieldDefinition::known("condition"), FieldDefinition::known("color")],
            &[FieldDefinition::known("features")],
            &HashMap::new(),
            &[],
        )
    }

    fn task() -> ResearchTask {
        ResearchTask {
            id: Uuid::new_v4(),
            target_fields: vec![
                "condition".to_string(),
                "color".to_string(),
                "features".to_string(),
            ],
            tool: ToolId::Vision,
            priority: 0.0,
            estimated_cost: 0.01,
            estimated_time_ms: 5000,
            rationale: String::new(),
        }
    }

    #[test]
    fn test_prompt_lists_allowed_values() {
        let prompt = build_prompt(&task(), &states());
        assert!(prompt.contains("- condition (Condition): text, one of [new, like_new, good, fair, poor]"));
        assert!(prompt.contains("- features (Features): list of short strings"));
    }

    #[tokio::test]
    async fn test_attribute_confidence_falls_back_to_overall() {
        let mut attributes = HashMap::new();
        attributes.insert(
            "condition".to_string(),
            VisionAttribute {
                value: json!("good"),
                confidence: Some(0.8),
            },
        );
        attributes.insert(
            "features".to_string(),
            VisionAttribute {
                value: json!(["cordless", "auto shut-off"]),
                confidence: None,
            },
        );
        let service = Model {
            result: VisionResult {
                attributes,
                confidence: 0.6,
            },
            prompts: Mutex::new(Vec::new()),
        };
        let context = ResearchContext::new("item").with_images(["https://img/1.jpg"]);

        let extraction = analyze(&service, &task(), &context, &states()).await.unwrap();

        assert_eq!(extraction.updates.len(), 2);
        assert_eq!(extraction.updates[0].field_name, "condition");
        assert!((extraction.updates[0].source.confidence - 0.8).abs() < 1e-12);
        assert_eq!(
            extraction.updates[1].value,
            FieldValue::List(vec!["cordless".to_string(), "auto shut-off".to_string()])
        );
        assert!((extraction.updates[1].source.confidence - 0.6 * 0.85).abs() < 1e-12);
        assert_eq!(service.prompts.lock().unwrap().len(), 1);
    }
}
