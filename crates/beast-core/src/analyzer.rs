//! Application logic behind the `analyze` capability
//!
//! The dispatcher treats analysis as an opaque function from payload to
//! payload. Deployments inject their own [`Analyzer`]; [`DefaultAnalyzer`]
//! produces a fixed-shape report so the service is useful out of the box.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use std::time::Instant;

use crate::error::AnalysisError;
use crate::identity::Platform;
use crate::model::{CorrelationId, Payload};

/// Input handed to an analyzer
#[derive(Debug, Clone, Copy)]
pub struct AnalysisInput<'a> {
    pub payload: &'a Payload,
    pub correlation_id: &'a CorrelationId,
    pub platform: Platform,
}

/// Pluggable analysis backend
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Analyze a payload and return structured output
    async fn analyze(&self, input: AnalysisInput<'_>) -> Result<Value, AnalysisError>;

    /// Handle a custom capability
    ///
    /// Only reached when the dispatcher accepts custom capabilities.
    async fn custom(&self, name: &str, input: AnalysisInput<'_>) -> Result<Value, AnalysisError> {
        let _ = input;
        Err(AnalysisError::Unsupported(name.to_string()))
    }
}

/// Built-in analyzer producing a summary report of the payload
#[derive(Debug, Clone, Default)]
pub struct DefaultAnalyzer;

impl DefaultAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn analysis_id(platform: Platform) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("beast_{}_{}", platform.as_str(), &suffix[..8])
    }

    fn categories(payload: &Payload) -> Vec<&'static str> {
        let mut categories: Vec<&'static str> = Vec::new();
        for value in payload.values() {
            let category = match value {
                Value::String(_) => "text",
                Value::Number(_) => "numeric",
                Value::Bool(_) => "boolean",
                Value::Array(_) => "collection",
                Value::Object(_) => "structured",
                Value::Null => continue,
            };
            if !categories.contains(&category) {
                categories.push(category);
            }
        }
        categories
    }
}

#[async_trait]
impl Analyzer for DefaultAnalyzer {
    async fn analyze(&self, input: AnalysisInput<'_>) -> Result<Value, AnalysisError> {
        let started = Instant::now();
        let data = Value::Object(input.payload.clone());
        let data_size = data.to_string().len();

        let categories = Self::categories(input.payload);
        let insights = vec![format!(
            "Received {} field(s) totalling {} bytes",
            input.payload.len(),
            data_size
        )];

        Ok(json!({
            "analysis_id": Self::analysis_id(input.platform),
            "platform": input.platform.as_str(),
            "timestamp": Utc::now().to_rfc3339(),
            "input_data": data,
            "analysis_result": {
                "status": "analyzed",
                "confidence": 0.95,
                "categories": categories,
                "insights": insights,
            },
            "metadata": {
                "processing_time": started.elapsed().as_secs_f64(),
                "data_size": data_size,
            },
        }))
    }
}
