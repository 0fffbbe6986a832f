//! Caching wrapper around a [`ClassificationService`].

use crate::errors::ClassifyError;
use crate::model::{ClassificationRequest, ClassificationResponse, ParseStatus, SamplingParams};
use crate::parse::parse_content;
use crate::providers::ClassificationService;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Digest over every field that shapes the request. Structurally equal requests share a key.
pub fn cache_key(request: &ClassificationRequest) -> String {
    let p = &request.params;
    let mut h = Sha256::new();
    h.update(p.model.as_bytes());
    h.update(b"\n");
    h.update(request.system.as_bytes());
    h.update(b"\n");
    h.update(request.input.as_bytes());
    h.update(b"\n");
    h.update(
        format!(
            "t={} p={} k={} r={} seed={:?} n={:?}",
            p.temperature.to_bits(),
            p.top_p.to_bits(),
            p.top_k,
            p.repeat_penalty.to_bits(),
            p.seed,
            p.num_predict
        )
        .as_bytes(),
    );
    hex::encode(h.finalize())
}

/// Shared by every worker in a batch: the response cache and the network-call
/// counter are the only mutable state crossing task boundaries.
pub struct ClassificationClient {
    service: Arc<dyn ClassificationService>,
    system: String,
    params: SamplingParams,
    timeout: Duration,
    cache: RwLock<HashMap<String, ClassificationResponse>>,
    network_calls: AtomicU64,
}

impl ClassificationClient {
    pub fn new(
        service: Arc<dyn ClassificationService>,
        system: impl Into<String>,
        params: SamplingParams,
        timeout: Duration,
    ) -> Self {
        Self {
            service,
            system: system.into(),
            params,
            timeout,
            cache: RwLock::new(HashMap::new()),
            network_calls: AtomicU64::new(0),
        }
    }

    /// Request for `input` with this client's system message and sampling parameters.
    pub fn request_for(&self, input: &str) -> ClassificationRequest {
        ClassificationRequest::new(input, self.system.clone(), self.params.clone())
    }

    pub fn params(&self) -> &SamplingParams {
        &self.params
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn endpoint(&self) -> &str {
        self.service.endpoint()
    }

    /// Cached classification. A hit never touches the network or the counter.
    pub async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResponse, ClassifyError> {
        let key = cache_key(request);
        if let Some(hit) = self.cache_get(&key) {
            debug!(key = %&key[..12], "classification cache hit");
            return Ok(hit);
        }
        self.fetch(request, key).await
    }

    /// Always calls the service; the newest response still replaces the cached one.
    pub async fn classify_uncached(
        &self,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResponse, ClassifyError> {
        let key = cache_key(request);
        self.fetch(request, key).await
    }

    /// Drop every cached response.
    pub fn refresh(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    pub fn network_calls(&self) -> u64 {
        self.network_calls.load(Ordering::SeqCst)
    }

    pub fn cached_responses(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    pub async fn health(&self) -> Result<(), ClassifyError> {
        self.service.health().await
    }

    fn cache_get(&self, key: &str) -> Option<ClassificationResponse> {
        self.cache.read().ok().and_then(|c| c.get(key).cloned())
    }

    async fn fetch(
        &self,
        request: &ClassificationRequest,
        key: String,
    ) -> Result<ClassificationResponse, ClassifyError> {
        self.network_calls.fetch_add(1, Ordering::SeqCst);

        let content = tokio::time::timeout(self.timeout, self.service.chat(request))
            .await
            .map_err(|_| ClassifyError::Timeout {
                timeout: self.timeout,
            })??;

        let response = parse_content(&content);
        match response.parse_status() {
            ParseStatus::Structured => {}
            ParseStatus::RawFallback => warn!(
                input = %request.input,
                codes = ?response.codes(),
                "response was not structured JSON; extracted codes from raw text"
            ),
            ParseStatus::Unparseable => warn!(
                input = %request.input,
                "response contained no recognizable codes"
            ),
        }

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(key, response.clone());
        }
        Ok(response)
    }
}
