//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供编排器决定是重试、回灌观察还是终止本轮。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作（纠正重试 / 回灌 / 终止）
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::MalformedOutput(reason) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous reply looked like a tool call but could not be parsed ({reason}). \
                 To call a tool, output exactly one JSON object of the form \
                 {{\"command\": \"tool_name\", \"parameters\": {{...}}}}, optionally inside a ```json fenced block. \
                 If you did not intend to call a tool, answer in plain text without braces or code fences."
            )),
            AgentError::VerificationRejected(reason) => RecoveryAction::RetryWithPrompt(format!(
                "The requested tool call was rejected before execution: {reason}. \
                 Reconsider the request and either issue a corrected call or answer in plain text."
            )),
            AgentError::HallucinatedTool(name) => {
                RecoveryAction::Observe(format!("Error: unknown tool '{name}'"))
            }
            AgentError::StageViolation(detail) => RecoveryAction::Observe(format!("Error: {detail}")),
            AgentError::ToolExecutionFailed(msg) => RecoveryAction::Observe(format!("Error: {msg}")),
            AgentError::ToolTimeout(name) => {
                RecoveryAction::Observe(format!("Error: tool '{name}' timed out"))
            }
            AgentError::LoopDetected(tool) => RecoveryAction::Abort(format!(
                "Stopped: the assistant kept repeating the same '{tool}' call without making progress."
            )),
            AgentError::InvalidToolCall(msg) => {
                RecoveryAction::Abort(format!("Stopped: invalid tool call ({msg})."))
            }
            AgentError::LlmError(msg) => {
                RecoveryAction::Abort(format!("Generation failed: {msg}"))
            }
            AgentError::GenerationTimeout(secs) => {
                RecoveryAction::Abort(format!("Generation timed out after {secs}s."))
            }
            other => RecoveryAction::Abort(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_malformed_output() {
        let engine = RecoveryEngine::new();
        let err = AgentError::MalformedOutput("unclosed brace".to_string());
        match engine.handle(&err) {
            RecoveryAction::RetryWithPrompt(msg) => {
                assert!(msg.contains("unclosed brace"));
                assert!(msg.contains("\"command\""));
            }
            other => panic!("Expected RetryWithPrompt, got {:?}", other),
        }
    }

    #[test]
    fn test_recovery_verification_rejected() {
        let engine = RecoveryEngine::new();
        let err = AgentError::VerificationRejected("confidence 0.2 below 0.5".to_string());
        assert!(matches!(engine.handle(&err), RecoveryAction::RetryWithPrompt(_)));
    }

    #[test]
    fn test_recovery_tool_failures_observe() {
        let engine = RecoveryEngine::new();
        for err in [
            AgentError::HallucinatedTool("fake_tool".to_string()),
            AgentError::StageViolation("not allowed".to_string()),
            AgentError::ToolExecutionFailed("boom".to_string()),
            AgentError::ToolTimeout("load_data".to_string()),
        ] {
            assert!(err.counts_as_tool_failure());
            assert!(matches!(engine.handle(&err), RecoveryAction::Observe(_)));
        }
    }

    #[test]
    fn test_recovery_loop_aborts() {
        let engine = RecoveryEngine::new();
        let err = AgentError::LoopDetected("load_data".to_string());
        match engine.handle(&err) {
            RecoveryAction::Abort(msg) => assert!(msg.contains("load_data")),
            other => panic!("Expected Abort, got {:?}", other),
        }
        assert!(!err.counts_as_tool_failure());
    }

    #[test]
    fn test_recovery_llm_error_aborts() {
        let engine = RecoveryEngine::new();
        let err = AgentError::LlmError("rate limited".to_string());
        assert!(matches!(engine.handle(&err), RecoveryAction::Abort(_)));
    }
}
