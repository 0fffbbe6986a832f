use super::ClassificationService;
use crate::errors::ClassifyError;
use crate::model::ClassificationRequest;
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum FakeReply {
    /// Message content returned verbatim.
    Content(String),
    /// Well-formed `cdt_codes` JSON for these codes.
    Codes(Vec<String>),
    /// Sleep before answering; lets tests trip the client timeout.
    Delayed(Duration, Box<FakeReply>),
    Error(ClassifyError),
}

impl FakeReply {
    pub fn codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Codes(codes.into_iter().map(Into::into).collect())
    }

    fn content(codes: &[String]) -> String {
        let entries: Vec<_> = codes
            .iter()
            .map(|c| json!({"code": c, "description": "", "confidence": "high"}))
            .collect();
        json!({"cdt_codes": entries, "explanation": "scripted"}).to_string()
    }
}

/// Deterministic in-process service for tests and dry runs.
///
/// Replies are scripted per input text; each call pops the next reply for that
/// input and the last one repeats once the queue is drained.
#[derive(Debug)]
pub struct FakeService {
    scripts: Mutex<HashMap<String, VecDeque<FakeReply>>>,
    default_reply: FakeReply,
    calls: AtomicU64,
    unreachable: bool,
}

impl Default for FakeService {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeService {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default_reply: FakeReply::Content("no codes".to_string()),
            calls: AtomicU64::new(0),
            unreachable: false,
        }
    }

    /// Every call and health probe fails with `ServiceUnavailable`.
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::new()
        }
    }

    pub fn with_default(mut self, reply: FakeReply) -> Self {
        self.default_reply = reply;
        self
    }

    pub fn with_reply(self, input: impl Into<String>, reply: FakeReply) -> Self {
        self.with_replies(input, vec![reply])
    }

    pub fn with_replies(self, input: impl Into<String>, replies: Vec<FakeReply>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.entry(input.into()).or_default().extend(replies);
        }
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self, input: &str) -> FakeReply {
        let Ok(mut scripts) = self.scripts.lock() else {
            return self.default_reply.clone();
        };
        let next = match scripts.get_mut(input) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        next.unwrap_or_else(|| self.default_reply.clone())
    }
}

#[async_trait]
impl ClassificationService for FakeService {
    async fn chat(&self, request: &ClassificationRequest) -> Result<String, ClassifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable {
            return Err(ClassifyError::unavailable(self.endpoint(), "connection refused"));
        }

        let mut reply = self.next_reply(&request.input);
        loop {
            match reply {
                FakeReply::Content(s) => return Ok(s),
                FakeReply::Codes(codes) => return Ok(FakeReply::content(&codes)),
                FakeReply::Error(e) => return Err(e),
                FakeReply::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }

    async fn health(&self) -> Result<(), ClassifyError> {
        if self.unreachable {
            Err(ClassifyError::unavailable(self.endpoint(), "connection refused"))
        } else {
            Ok(())
        }
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }

    fn endpoint(&self) -> &str {
        "fake://classifier"
    }
}
