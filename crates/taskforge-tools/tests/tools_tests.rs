//! ToolResult, ToolRegistry, the local tools, and process-trigger declarations.

use serde_json::json;
use taskforge_tools::*;

#[test]
fn tool_result_text() {
    let r = ToolResult::text("hello");
    assert!(!r.is_error());
    assert_eq!(r.to_content_string(), "hello");
}

#[test]
fn tool_result_error_formats_with_prefix() {
    let r = ToolResult::error("boom");
    assert!(r.is_error());
    assert_eq!(r.to_content_string(), "Error: boom");
}

#[tokio::test]
async fn default_registry_contains_local_tools_only() {
    let registry = create_default_registry();
    assert!(registry.contains("think"));
    assert!(registry.contains("calculator"));
    for process_name in PROCESS_TOOL_NAMES {
        assert!(!registry.contains(process_name), "{process_name} is a process trigger, not a local tool");
    }
}

#[tokio::test]
async fn registry_executes_calculator() {
    let registry = create_default_registry();
    let result = registry.execute("calculator", json!({ "expression": "6 * 7" })).await;
    match result {
        ToolResult::Json(v) => assert_eq!(v["result"], 42.0),
        other => panic!("expected Json, got {other:?}"),
    }
}

#[tokio::test]
async fn registry_reports_missing_tool() {
    let registry = create_default_registry();
    let result = registry.execute("nonexistent", json!({})).await;
    assert!(result.is_error());
}

#[tokio::test]
async fn get_definitions_for_filters_by_name() {
    let registry = create_default_registry();
    let defs = registry.get_definitions_for(&["calculator".to_string()]);
    assert_eq!(defs.len(), 1);
    assert_eq!(defs[0].name, "calculator");
}

#[test]
fn process_tool_declarations_cover_every_built_in_process() {
    let decls = process_tool_declarations();
    assert_eq!(decls.len(), 6);
    assert!(decls.iter().any(|d| d.name == "end_task"));
}
