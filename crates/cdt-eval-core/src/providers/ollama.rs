use super::ClassificationService;
use crate::errors::ClassifyError;
use crate::model::ClassificationRequest;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT_VALUE: &str = concat!("cdt-eval/", env!("CARGO_PKG_VERSION"));

/// Chat-completion backend speaking the Ollama `/api/chat` protocol.
#[derive(Debug, Clone)]
pub struct OllamaService {
    url: String,
    health_url: String,
    timeout: Duration,
    client: reqwest::Client,
    model: Option<String>,
}

impl OllamaService {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ClassifyError> {
        let url = url.into();
        let parsed = reqwest::Url::parse(&url)
            .map_err(|e| ClassifyError::unavailable(&url, format!("invalid url: {}", e)))?;
        let health_url = parsed
            .join("/api/tags")
            .map(|u| u.to_string())
            .unwrap_or_else(|_| url.clone());

        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(default_headers)
            .build()
            .map_err(|e| {
                ClassifyError::unavailable(&url, format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            url,
            health_url,
            timeout,
            client,
            model: None,
        })
    }

    /// Make the health probe also require `model` in the server's model list.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    fn check_model_listed(&self, model: &str, body: &str) -> Result<(), ClassifyError> {
        let tags: Value = serde_json::from_str(body).map_err(|e| {
            ClassifyError::unavailable(&self.health_url, format!("unexpected model list: {}", e))
        })?;
        let listed = tags
            .get("models")
            .and_then(Value::as_array)
            .map(|models| {
                models.iter().any(|m| {
                    ["name", "model"].iter().any(|key| {
                        m.get(*key)
                            .and_then(Value::as_str)
                            .is_some_and(|n| model_matches(model, n))
                    })
                })
            })
            .unwrap_or(false);
        if listed {
            Ok(())
        } else {
            Err(ClassifyError::ModelNotFound {
                model: model.to_string(),
                endpoint: self.health_url.clone(),
            })
        }
    }

    fn request_body(request: &ClassificationRequest) -> Value {
        let p = &request.params;
        let mut options = json!({
            "temperature": p.temperature,
            "top_p": p.top_p,
            "top_k": p.top_k,
            "repeat_penalty": p.repeat_penalty,
        });
        if let Some(seed) = p.seed {
            options["seed"] = json!(seed);
        }
        if let Some(num_predict) = p.num_predict {
            options["num_predict"] = json!(num_predict);
        }

        json!({
            "model": p.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user_message() },
            ],
            "stream": false,
            "options": options,
        })
    }

    fn map_transport_error(&self, e: reqwest::Error) -> ClassifyError {
        if e.is_timeout() {
            ClassifyError::Timeout {
                timeout: self.timeout,
            }
        } else {
            ClassifyError::unavailable(&self.url, e.to_string())
        }
    }
}

#[async_trait]
impl ClassificationService for OllamaService {
    async fn chat(&self, request: &ClassificationRequest) -> Result<String, ClassifyError> {
        debug!(url = %self.url, model = %request.params.model, "sending classification request");

        let resp = self
            .client
            .post(&self.url)
            .json(&Self::request_body(request))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClassifyError::ServiceUnavailable {
                endpoint: self.url.clone(),
                status: Some(status.as_u16()),
                message: format!("HTTP {}: {}", status.as_u16(), body.trim()),
            });
        }

        let body = resp.text().await.map_err(|e| self.map_transport_error(e))?;

        // A body without message.content is handed on as-is and parsed best-effort.
        match serde_json::from_str::<Value>(&body) {
            Ok(json) => match json.pointer("/message/content").and_then(Value::as_str) {
                Some(content) => Ok(content.to_string()),
                None => {
                    warn!(url = %self.url, "response missing message.content; using raw body");
                    Ok(body)
                }
            },
            Err(e) => {
                warn!(url = %self.url, error = %e, "response body is not JSON; using raw body");
                Ok(body)
            }
        }
    }

    async fn health(&self) -> Result<(), ClassifyError> {
        let resp = self
            .client
            .get(&self.health_url)
            .send()
            .await
            .map_err(|e| ClassifyError::unavailable(&self.health_url, e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ClassifyError::ServiceUnavailable {
                endpoint: self.health_url.clone(),
                status: Some(status.as_u16()),
                message: format!("health probe returned HTTP {}", status.as_u16()),
            });
        }
        let Some(model) = &self.model else {
            return Ok(());
        };
        let body = resp
            .text()
            .await
            .map_err(|e| ClassifyError::unavailable(&self.health_url, e.to_string()))?;
        self.check_model_listed(model, &body)
    }

    fn provider_name(&self) -> &'static str {
        "ollama"
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

/// Ollama lists untagged pulls as `name:latest`.
fn model_matches(wanted: &str, listed: &str) -> bool {
    listed == wanted || (!wanted.contains(':') && listed == format!("{}:latest", wanted))
}
