//! ToolGateway trait — the abstraction over tool execution.
//!
//! The gateway is the only channel for side-effecting actions. Its contract
//! is deliberately infallible: `execute` never raises. Implementations
//! convert every internal failure into a descriptive output string so a
//! broken tool can never abort a turn.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::provider::ToolSpec;

/// A tool invocation requested by a model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool_call id)
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Structured input
    pub input: serde_json::Value,
}

/// The outcome of one tool invocation, correlated by call ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// The output (or a descriptive error string)
    pub output: String,
}

/// The core ToolGateway trait.
///
/// Every tool family (shell, web search, file I/O) lives behind one gateway
/// implementation outside this core. The session executes calls one at a
/// time and appends each output to history.
#[async_trait]
pub trait ToolGateway: Send + Sync {
    /// The tool definitions to advertise to the model.
    fn specs(&self) -> Vec<ToolSpec>;

    /// Execute a tool by name. Must never raise: failures come back as
    /// descriptive strings in the output.
    async fn execute(&self, name: &str, input: serde_json::Value) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A gateway that echoes its input back, for trait-shape tests.
    struct EchoGateway;

    #[async_trait]
    impl ToolGateway for EchoGateway {
        fn specs(&self) -> Vec<ToolSpec> {
            vec![ToolSpec {
                name: "echo".into(),
                description: "Echoes back the input".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }),
            }]
        }

        async fn execute(&self, name: &str, input: serde_json::Value) -> String {
            match name {
                "echo" => input["text"].as_str().unwrap_or("").to_string(),
                other => format!("Error: unknown tool '{other}'"),
            }
        }
    }

    #[tokio::test]
    async fn gateway_executes_known_tool() {
        let gateway = EchoGateway;
        let output = gateway
            .execute("echo", serde_json::json!({"text": "hello world"}))
            .await;
        assert_eq!(output, "hello world");
    }

    #[tokio::test]
    async fn gateway_converts_unknown_tool_to_string() {
        let gateway = EchoGateway;
        let output = gateway.execute("nonexistent", serde_json::json!({})).await;
        assert!(output.contains("unknown tool"));
    }

    #[test]
    fn tool_result_serialization_keeps_call_id() {
        let result = ToolResult {
            call_id: "call_1".into(),
            output: "done".into(),
        };
        let json = serde_json::to_string(&result).unwrap();
        let back: ToolResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.call_id, "call_1");
    }
}
