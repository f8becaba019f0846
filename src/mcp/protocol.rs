//! MCP protocol response helpers.

use std::time::Instant;

use rmcp::model::{CallToolResult, Content, ErrorData};
use serde::Serialize;

use crate::error::AppError;

/// Tool response that serializes as the raw inner value.
///
/// # Example
///
/// ```ignore
/// Response(SearchNodesResult { nodes, count }).into()
/// ```
pub struct Response<T>(pub T);

impl<T: Serialize> From<Response<T>> for Result<CallToolResult, ErrorData> {
    fn from(response: Response<T>) -> Self {
        Ok(CallToolResult::success(vec![Content::json(response.0)?]))
    }
}

/// Start, success and failure logging around one tool call.
pub struct ToolCall {
    tool: &'static str,
    started: Instant,
}

impl ToolCall {
    pub fn start(tool: &'static str) -> Self {
        tracing::info!(tool, "Running tool");
        Self {
            tool,
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Log the outcome and convert errors to MCP errors.
    pub fn finish<T>(self, result: Result<T, AppError>) -> Result<T, ErrorData> {
        let elapsed_ms = self.elapsed_ms();
        match &result {
            Ok(_) => tracing::info!(tool = self.tool, elapsed_ms, "Tool succeeded"),
            Err(e) => tracing::error!(
                tool = self.tool,
                elapsed_ms,
                code = e.code(),
                error = %e,
                "Tool failed"
            ),
        }
        result.map_err(ErrorData::from)
    }
}

/// First `max` characters of `text`.
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 2), "he");
        assert_eq!(truncate("記憶片段", 2), "記憶");
    }

    #[test]
    fn test_finish_maps_validation() {
        let call = ToolCall::start("test");
        let err = call
            .finish::<()>(Err(AppError::validation("query", "must not be empty")))
            .unwrap_err();
        assert!(err.message.starts_with("[VALIDATION_FAILURE]"));
    }

    #[test]
    fn test_response_is_json_content() {
        let result: Result<CallToolResult, ErrorData> =
            Response(serde_json::json!({"count": 1})).into();
        let result = result.unwrap();
        assert_eq!(result.is_error, Some(false));
    }
}
