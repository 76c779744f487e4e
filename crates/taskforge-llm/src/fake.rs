//! Deterministic scripted provider for tests and local harnesses.

use crate::provider::{LlmError, LlmProvider, LlmResult};
use crate::types::{LlmRequest, LlmResponse, StopReason, ToolCall, Usage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// One scripted turn the fake provider will hand back, in order.
#[derive(Clone, Debug)]
pub enum ScriptedTurn {
    Text(String),
    ToolCall { name: String, arguments: serde_json::Value },
}

/// Returns scripted responses in sequence; repeats the last one once
/// exhausted, so tests don't need to over-provision the script.
pub struct FakeProvider {
    script: Vec<ScriptedTurn>,
    cursor: AtomicUsize,
    calls: Mutex<Vec<LlmRequest>>,
}

impl FakeProvider {
    pub fn new(script: Vec<ScriptedTurn>) -> Self {
        Self {
            script,
            cursor: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<LlmRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl LlmProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    fn models(&self) -> &[&str] {
        &["fake-model"]
    }

    async fn generate(&self, request: LlmRequest, cancel: Option<CancellationToken>) -> LlmResult<LlmResponse> {
        if let Some(token) = &cancel {
            if token.is_cancelled() {
                return Err(LlmError::Cancelled);
            }
        }

        self.calls.lock().unwrap().push(request);

        let idx = self.cursor.fetch_add(1, Ordering::SeqCst).min(self.script.len().saturating_sub(1));
        let Some(turn) = self.script.get(idx) else {
            return Ok(LlmResponse {
                content: String::new(),
                tool_calls: Vec::new(),
                usage: Usage::default(),
                stop_reason: StopReason::EndTurn,
            });
        };

        Ok(match turn {
            ScriptedTurn::Text(text) => LlmResponse {
                content: text.clone(),
                tool_calls: Vec::new(),
                usage: Usage { input_tokens: 10, output_tokens: 10 },
                stop_reason: StopReason::EndTurn,
            },
            ScriptedTurn::ToolCall { name, arguments } => LlmResponse {
                content: String::new(),
                tool_calls: vec![ToolCall {
                    call_id: format!("call_{idx}"),
                    name: name.clone(),
                    arguments: arguments.clone(),
                }],
                usage: Usage { input_tokens: 10, output_tokens: 10 },
                stop_reason: StopReason::ToolUse,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plays_back_script_in_order_then_repeats_last() {
        let provider = FakeProvider::new(vec![
            ScriptedTurn::ToolCall {
                name: "end_task".into(),
                arguments: serde_json::json!({ "result": "done" }),
            },
            ScriptedTurn::Text("all done".into()),
        ]);

        let r1 = provider.generate(LlmRequest::default(), None).await.unwrap();
        assert_eq!(r1.tool_calls[0].name, "end_task");

        let r2 = provider.generate(LlmRequest::default(), None).await.unwrap();
        assert_eq!(r2.content, "all done");

        let r3 = provider.generate(LlmRequest::default(), None).await.unwrap();
        assert_eq!(r3.content, "all done");
    }

    #[tokio::test]
    async fn respects_cancellation() {
        let provider = FakeProvider::new(vec![ScriptedTurn::Text("x".into())]);
        let token = CancellationToken::new();
        token.cancel();
        let result = provider.generate(LlmRequest::default(), Some(token)).await;
        assert!(matches!(result, Err(LlmError::Cancelled)));
    }
}
