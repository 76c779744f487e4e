//! Types and the fake provider's scripted playback behavior.

use taskforge_llm::*;

#[test]
fn llm_request_default() {
    let req = LlmRequest::default();
    assert!(req.model.contains("claude"));
    assert!(req.messages.is_empty());
    assert!(req.tools.is_none());
    assert_eq!(req.max_tokens, Some(8192));
    assert!(req.temperature.is_none());
    assert!(req.system.is_none());
}

#[test]
fn llm_content_from_str() {
    let c: LlmContent = "hello".into();
    match c {
        LlmContent::Text(s) => assert_eq!(s, "hello"),
        _ => panic!("expected Text"),
    }
}

#[test]
fn llm_content_text_serde_is_bare_string() {
    let c = LlmContent::Text("hello".into());
    let json = serde_json::to_string(&c).unwrap();
    assert_eq!(json, r#""hello""#);
}

#[test]
fn content_block_tool_use_round_trips() {
    let block = ContentBlock::ToolUse {
        id: "call_1".into(),
        name: "end_task".into(),
        input: serde_json::json!({ "result": "ok" }),
    };
    let json = serde_json::to_string(&block).unwrap();
    let back: ContentBlock = serde_json::from_str(&json).unwrap();
    match back {
        ContentBlock::ToolUse { id, name, .. } => {
            assert_eq!(id, "call_1");
            assert_eq!(name, "end_task");
        }
        _ => panic!("expected ToolUse"),
    }
}

#[tokio::test]
async fn fake_provider_scripts_tool_calls_then_text() {
    let provider = FakeProvider::new(vec![
        ScriptedTurn::ToolCall {
            name: "break_down_task".into(),
            arguments: serde_json::json!({ "approach": "split work" }),
        },
        ScriptedTurn::Text("task finished".into()),
    ]);

    let first = provider.generate(LlmRequest::default(), None).await.unwrap();
    assert_eq!(first.stop_reason, StopReason::ToolUse);
    assert_eq!(first.tool_calls.len(), 1);
    assert_eq!(first.tool_calls[0].name, "break_down_task");

    let second = provider.generate(LlmRequest::default(), None).await.unwrap();
    assert_eq!(second.stop_reason, StopReason::EndTurn);
    assert_eq!(second.content, "task finished");

    assert_eq!(provider.calls().len(), 2);
}

#[tokio::test]
async fn anthropic_provider_declares_expected_models() {
    let provider = AnthropicProvider::new("test-key");
    assert!(provider.supports_model("claude-opus-4-6-20250929"));
    assert!(!provider.supports_model("gpt-4"));
}
