//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 RetryWithPrompt / Observe / Abort。

use thiserror::Error;

/// 编排过程中可能出现的错误（解析、校验、阶段门控、工具、生成）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    /// 上一轮尚未结束时又提交了新输入
    #[error("A turn is already in progress")]
    Busy,

    #[error("No confirmation is pending")]
    NoPendingConfirmation,

    /// 结构性错误（名称为空等），属于调用契约违背，不做软拒绝
    #[error("Invalid tool call: {0}")]
    InvalidToolCall(String),

    /// 输出看起来像工具调用但无法解析
    #[error("Malformed tool call output: {0}")]
    MalformedOutput(String),

    #[error("Verification rejected: {0}")]
    VerificationRejected(String),

    #[error("Hallucinated tool: {0}")]
    HallucinatedTool(String),

    #[error("Stage violation: {0}")]
    StageViolation(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Loop detected: {0}")]
    LoopDetected(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Generation timed out after {0}s")]
    GenerationTimeout(u64),

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),
}

impl AgentError {
    /// 是否计入 tool_failure_count（执行期失败；校验拒绝与解析失败不计入）
    pub fn counts_as_tool_failure(&self) -> bool {
        matches!(
            self,
            AgentError::HallucinatedTool(_)
                | AgentError::StageViolation(_)
                | AgentError::ToolExecutionFailed(_)
                | AgentError::ToolTimeout(_)
        )
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 将纠正提示写入历史，让模型重新生成
    RetryWithPrompt(String),
    /// 作为 Observation 回灌给模型
    Observe(String),
    /// 终止当前轮次，附带展示给用户的说明
    Abort(String),
}

impl RecoveryAction {
    /// 动作携带的文本（提示、观察或终止说明）
    pub fn into_message(self) -> String {
        match self {
            RecoveryAction::RetryWithPrompt(m) | RecoveryAction::Observe(m) | RecoveryAction::Abort(m) => m,
        }
    }
}
