//! Language-model normalisation: OCR artifacts → JSON records.
//!
//! The pipeline talks to the model through [`CompletionClient`], injected by
//! the caller. [`OllamaClient`] implements it over HTTP against Ollama's
//! `/api/generate`; tests plug in canned clients.
//!
//! There is deliberately no retry loop here. A transport failure, non-2xx
//! status or unparsable model output fails the request as a whole, so a
//! caller never sees partial or stale JSON.

use crate::config::ExtractionConfig;
use crate::error::Table2JsonError;
use crate::output::{OcrArtifacts, Record};
use crate::prompts::build_prompt;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Body of a non-streaming `/api/generate` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub options: GenerateOptions,
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    pub temperature: f32,
}

impl GenerateRequest {
    /// JSON-mode, non-streaming request.
    pub fn json_mode(model: impl Into<String>, prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            stream: false,
            options: GenerateOptions { temperature },
            format: "json".to_string(),
        }
    }
}

/// The part of the endpoint's reply we consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// JSON document produced by the model, encoded as a string.
    pub response: String,
}

/// A completion endpoint.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, Table2JsonError>;
}

/// HTTP client for Ollama's `/api/generate`.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    url: String,
    timeout_secs: u64,
}

impl OllamaClient {
    pub fn new(config: &ExtractionConfig) -> Result<Self, Table2JsonError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| Table2JsonError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            url: config.generate_url(),
            timeout_secs: config.api_timeout_secs,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CompletionClient for OllamaClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, Table2JsonError> {
        let start = Instant::now();
        let resp = self
            .http
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Table2JsonError::LlmStatus {
                status: status.as_u16(),
                body: truncate(&body, 300),
            });
        }

        let body = resp.text().await.map_err(|e| self.transport_error(e))?;
        debug!(
            "{}: HTTP {} with {} bytes in {:?}",
            self.url,
            status,
            body.len(),
            start.elapsed()
        );
        parse_completion(&body)
    }
}

impl OllamaClient {
    fn transport_error(&self, e: reqwest::Error) -> Table2JsonError {
        if e.is_timeout() {
            Table2JsonError::LlmTimeout {
                secs: self.timeout_secs,
            }
        } else {
            Table2JsonError::LlmTransport {
                url: self.url.clone(),
                detail: e.to_string(),
            }
        }
    }
}

/// Decode an `/api/generate` reply body. It must be a JSON object with a
/// string `response` field.
pub fn parse_completion(body: &str) -> Result<GenerateResponse, Table2JsonError> {
    serde_json::from_str(body).map_err(|e| Table2JsonError::LlmFormat {
        detail: format!("endpoint reply has no string `response` field: {e}"),
    })
}

/// Ask the model to normalise the OCR artifacts into records.
pub async fn extract_structured_json(
    client: &dyn CompletionClient,
    model: &str,
    temperature: f32,
    artifacts: &OcrArtifacts,
    title_hint: Option<&str>,
) -> Result<Vec<Record>, Table2JsonError> {
    let prompt = build_prompt(&artifacts.markdown_table, &artifacts.raw_text, title_hint);
    let request = GenerateRequest::json_mode(model, prompt, temperature);

    info!("Requesting JSON normalisation from model '{}'", model);
    let start = Instant::now();
    let reply = client.generate(&request).await?;
    let records = parse_records(&reply.response)?;
    info!(
        "Model returned {} records in {:?}",
        records.len(),
        start.elapsed()
    );
    Ok(records)
}

/// Parse the model's JSON document.
///
/// Accepts a top-level array of objects, or an object whose `output` key
/// holds one. Everything else is [`Table2JsonError::LlmFormat`].
pub fn parse_records(document: &str) -> Result<Vec<Record>, Table2JsonError> {
    let parsed: Value = serde_json::from_str(document).map_err(|e| Table2JsonError::LlmFormat {
        detail: format!("invalid JSON: {e}"),
    })?;

    let items = match parsed {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("output") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(Table2JsonError::LlmFormat {
                    detail: format!("`output` is {}, not an array", kind(&other)),
                })
            }
            None => {
                return Err(Table2JsonError::LlmFormat {
                    detail: "object without an `output` key".into(),
                })
            }
        },
        other => {
            return Err(Table2JsonError::LlmFormat {
                detail: format!("top-level value is {}", kind(&other)),
            })
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(record) => Ok(record),
            other => Err(Table2JsonError::LlmFormat {
                detail: format!("element {i} is {}, not an object", kind(&other)),
            }),
        })
        .collect()
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}\u{2026}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct Canned {
        response: String,
        seen: Mutex<Option<GenerateRequest>>,
    }

    #[async_trait]
    impl CompletionClient for Canned {
        async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, Table2JsonError> {
            *self.seen.lock().unwrap() = Some(request.clone());
            Ok(GenerateResponse {
                response: self.response.clone(),
            })
        }
    }

    #[test]
    fn request_body_shape() {
        let req = GenerateRequest::json_mode("llama3.1:8b", "hi", 0.0);
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "model": "llama3.1:8b",
                "prompt": "hi",
                "stream": false,
                "options": {"temperature": 0.0},
                "format": "json"
            })
        );
    }

    #[test]
    fn parses_bare_array() {
        let records = parse_records(r#"[{"assessment": "ACR20", "PBO_n96": "12 (12.5)"}]"#).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["assessment"], "ACR20");
    }

    #[test]
    fn parses_output_wrapper() {
        let records = parse_records(r#"{"output": [{"a": "1"}, {"a": "2"}]}"#).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn rejects_other_shapes() {
        for doc in [
            "not json",
            r#"{"rows": []}"#,
            r#"{"output": {"a": "1"}}"#,
            r#""just a string""#,
            r#"[1, 2]"#,
        ] {
            let err = parse_records(doc).unwrap_err();
            assert!(
                matches!(err, Table2JsonError::LlmFormat { .. }),
                "{doc}: {err:?}"
            );
        }
    }

    #[test]
    fn completion_body_yields_response_string() {
        let body = r#"{"model": "m", "created_at": "2024-01-01T00:00:00Z", "response": "[]", "done": true}"#;
        assert_eq!(parse_completion(body).unwrap().response, "[]");
    }

    #[test]
    fn completion_body_without_string_response_is_format_error() {
        for body in [
            r#"{"done": true}"#,
            r#"{"response": 42}"#,
            r#"{"response": null}"#,
            "<html>bad gateway</html>",
        ] {
            let err = parse_completion(body).unwrap_err();
            assert!(
                matches!(err, Table2JsonError::LlmFormat { .. }),
                "{body}: {err:?}"
            );
        }
    }

    #[test]
    fn client_targets_generate_endpoint() {
        let config = ExtractionConfig::builder()
            .ollama_host("http://gpu-box:11434/")
            .build()
            .unwrap();
        let client = OllamaClient::new(&config).unwrap();
        assert_eq!(client.url(), "http://gpu-box:11434/api/generate");
    }

    #[test]
    fn empty_array_is_valid() {
        assert!(parse_records("[]").unwrap().is_empty());
    }

    #[tokio::test]
    async fn extract_sends_prompt_with_artifacts() {
        let client = Canned {
            response: r#"{"output": [{"assessment": "ACR50"}]}"#.into(),
            seen: Mutex::new(None),
        };
        let artifacts = OcrArtifacts {
            raw_text: "ACR50 12".into(),
            markdown_table: "| ACR50 | 12 |".into(),
            ..Default::default()
        };
        let records = extract_structured_json(&client, "m", 0.0, &artifacts, Some("Table 3"))
            .await
            .unwrap();
        assert_eq!(records[0]["assessment"], "ACR50");

        let seen = client.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.model, "m");
        assert_eq!(seen.format, "json");
        assert!(!seen.stream);
        assert!(seen.prompt.contains("| ACR50 | 12 |"));
        assert!(seen.prompt.contains("Table title hint: Table 3"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        let config = ExtractionConfig::builder()
            .ollama_host("http://127.0.0.1:9")
            .api_timeout_secs(5)
            .build()
            .unwrap();
        let client = OllamaClient::new(&config).unwrap();
        let err = client
            .generate(&GenerateRequest::json_mode("m", "p", 0.0))
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                Table2JsonError::LlmTransport { .. } | Table2JsonError::LlmTimeout { .. }
            ),
            "got {err:?}"
        );
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("ééé", 2), "éé\u{2026}");
        assert_eq!(truncate("ok", 5), "ok");
    }
}
