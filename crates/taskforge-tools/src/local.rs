//! Local, side-effect-free tools available to every agent regardless of
//! which process handles the task's tool-trigger calls.

use crate::registry::{Tool, ToolResult};
use serde_json::Value;

/// Lets an agent record an intermediate thought without it counting as a
/// process trigger or producing any graph mutation. Useful for agents that
/// want to externalize reasoning before deciding on a next action.
pub struct ThinkTool;

#[async_trait::async_trait]
impl Tool for ThinkTool {
    fn name(&self) -> &str {
        "think"
    }

    fn description(&self) -> &str {
        "Record a reasoning note. Has no side effects; use it to think out loud before acting."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "thought": { "type": "string" } },
            "required": ["thought"]
        })
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> ToolResult {
        match args.get("thought").and_then(|v| v.as_str()) {
            Some(t) if !t.trim().is_empty() => ToolResult::text("noted"),
            _ => ToolResult::error("'thought' must be a non-empty string"),
        }
    }
}

/// Basic four-function arithmetic, useful when an agent needs to compute a
/// value mid-conversation without round-tripping through the model.
pub struct CalculatorTool;

#[async_trait::async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate a simple arithmetic expression using +, -, *, / and parentheses."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "expression": { "type": "string" } },
            "required": ["expression"]
        })
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(expr) = args.get("expression").and_then(|v| v.as_str()) else {
            return ToolResult::error("'expression' must be a string");
        };
        match evaluate(expr) {
            Ok(value) => ToolResult::Json(serde_json::json!({ "result": value })),
            Err(e) => ToolResult::error(e),
        }
    }
}

fn evaluate(expr: &str) -> Result<f64, String> {
    let tokens = tokenize(expr)?;
    let mut pos = 0;
    let value = parse_expr(&tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err("trailing input after expression".into());
    }
    Ok(value)
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Num(f64),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let num: String = chars[start..i].iter().collect();
                tokens.push(Token::Num(num.parse().map_err(|_| format!("bad number: {num}"))?));
            }
            other => return Err(format!("unexpected character: {other}")),
        }
    }
    Ok(tokens)
}

fn parse_expr(tokens: &[Token], pos: &mut usize) -> Result<f64, String> {
    let mut value = parse_term(tokens, pos)?;
    loop {
        match tokens.get(*pos) {
            Some(Token::Plus) => {
                *pos += 1;
                value += parse_term(tokens, pos)?;
            }
            Some(Token::Minus) => {
                *pos += 1;
                value -= parse_term(tokens, pos)?;
            }
            _ => break,
        }
    }
    Ok(value)
}

fn parse_term(tokens: &[Token], pos: &mut usize) -> Result<f64, String> {
    let mut value = parse_factor(tokens, pos)?;
    loop {
        match tokens.get(*pos) {
            Some(Token::Star) => {
                *pos += 1;
                value *= parse_factor(tokens, pos)?;
            }
            Some(Token::Slash) => {
                *pos += 1;
                let divisor = parse_factor(tokens, pos)?;
                if divisor == 0.0 {
                    return Err("division by zero".into());
                }
                value /= divisor;
            }
            _ => break,
        }
    }
    Ok(value)
}

fn parse_factor(tokens: &[Token], pos: &mut usize) -> Result<f64, String> {
    match tokens.get(*pos) {
        Some(Token::Num(n)) => {
            *pos += 1;
            Ok(*n)
        }
        Some(Token::Minus) => {
            *pos += 1;
            Ok(-parse_factor(tokens, pos)?)
        }
        Some(Token::LParen) => {
            *pos += 1;
            let value = parse_expr(tokens, pos)?;
            match tokens.get(*pos) {
                Some(Token::RParen) => {
                    *pos += 1;
                    Ok(value)
                }
                _ => Err("missing closing parenthesis".into()),
            }
        }
        _ => Err("expected a number or '('".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn think_tool_requires_nonempty_thought() {
        let tool = ThinkTool;
        assert!(!tool.execute(serde_json::json!({ "thought": "considering approach" })).await.is_error());
        assert!(tool.execute(serde_json::json!({ "thought": "" })).await.is_error());
    }

    #[tokio::test]
    async fn calculator_evaluates_precedence_and_parens() {
        let tool = CalculatorTool;
        let result = tool.execute(serde_json::json!({ "expression": "2 + 3 * (4 - 1)" })).await;
        match result {
            ToolResult::Json(v) => assert_eq!(v["result"], 11.0),
            other => panic!("expected Json result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn calculator_rejects_division_by_zero() {
        let tool = CalculatorTool;
        let result = tool.execute(serde_json::json!({ "expression": "1 / 0" })).await;
        assert!(result.is_error());
    }
}
