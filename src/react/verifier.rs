//! VerificationLayer：工具调用进入执行前的准入检查
//!
//! 依次检查：
//! 1. 结构：名称非空且不含空白（违反即调用契约错误，直接返回 Err，不做软拒绝）
//! 2. 置信度：提供了置信度且低于下限时拒绝，并给出可读原因
//! 3. 语义钩子：预留的 SemanticCheck 扩展点，默认不安装任何检查

use std::sync::Arc;

use crate::core::AgentError;
use crate::react::ToolCall;

/// 校验结论
#[derive(Clone, Debug, PartialEq)]
pub struct Verification {
    pub is_valid: bool,
    pub error_message: Option<String>,
}

impl Verification {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            error_message: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error_message: Some(reason.into()),
        }
    }
}

/// 语义校验扩展点（如参数脚本校验）
pub trait SemanticCheck: Send + Sync {
    fn check(&self, call: &ToolCall) -> Result<(), String>;
}

pub struct Verifier {
    min_confidence: Option<f64>,
    semantic: Vec<Arc<dyn SemanticCheck>>,
}

impl Verifier {
    pub fn new(min_confidence: Option<f64>) -> Self {
        Self {
            min_confidence,
            semantic: Vec::new(),
        }
    }

    pub fn with_semantic_check(mut self, check: Arc<dyn SemanticCheck>) -> Self {
        self.semantic.push(check);
        self
    }

    pub fn verify(&self, call: &ToolCall, confidence: Option<f64>) -> Result<Verification, AgentError> {
        let name = call.name.as_str();
        if name.trim().is_empty() {
            return Err(AgentError::InvalidToolCall("tool name is empty".to_string()));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(AgentError::InvalidToolCall(format!(
                "tool name '{name}' contains whitespace"
            )));
        }

        if let (Some(score), Some(min)) = (confidence, self.min_confidence) {
            if !score.is_finite() || score < min {
                return Ok(Verification::rejected(format!(
                    "confidence {score:.2} for '{name}' is below the required minimum {min:.2}"
                )));
            }
        }

        for check in &self.semantic {
            if let Err(reason) = check.check(call) {
                return Ok(Verification::rejected(reason));
            }
        }

        Ok(Verification::valid())
    }
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new(Some(0.5))
    }
}
