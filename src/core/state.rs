//! 状态定义：编排器阶段、执行模式、轮次计数与对外投影
//!
//! 内部完整状态由 OrchestrationController 独占维护；UI 只看到轻量的 ControllerStatus 投影。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineStage;

/// 编排器状态机阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerPhase {
    Idle,
    AwaitingGeneration,
    ParsingOutput,
    AwaitingConfirmation,
    Executing,
    Finalizing,
}

impl fmt::Display for ControllerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControllerPhase::Idle => "idle",
            ControllerPhase::AwaitingGeneration => "awaiting_generation",
            ControllerPhase::ParsingOutput => "parsing_output",
            ControllerPhase::AwaitingConfirmation => "awaiting_confirmation",
            ControllerPhase::Executing => "executing",
            ControllerPhase::Finalizing => "finalizing",
        };
        f.write_str(s)
    }
}

/// 执行模式：single 每轮最多自动执行一个成功工具；multi 允许链式调用直到上限
///
/// 只能由外部显式设置，不从模型输出推断。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Single,
    Multi,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "single" => Ok(ExecutionMode::Single),
            "multi" => Ok(ExecutionMode::Multi),
            other => Err(format!("unknown execution mode: {other}")),
        }
    }
}

/// 单轮计数器，每次新的用户输入时归零
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TurnCounters {
    /// 格式错误输出的纠正重试次数（校验拒绝也计入，保证有界）
    pub retry_count: u32,
    /// 连续工具执行失败次数
    pub tool_failure_count: u32,
    /// 循环干预次数
    pub loop_break_count: u32,
    /// multi 模式下已链式成功的工具数
    pub successful_tool_count: u32,
}

impl TurnCounters {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 等待用户确认的工具调用（同一时刻最多一个）
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PendingConfirmation {
    pub tool_name: String,
    pub parameters: serde_json::Map<String, serde_json::Value>,
    pub context: String,
}

/// UI 看到的「投影」状态
#[derive(Clone, Debug, Serialize)]
pub struct ControllerStatus {
    pub phase: ControllerPhase,
    pub is_processing: bool,
    pub execution_mode: ExecutionMode,
    pub stage: PipelineStage,
    pub counters: TurnCounters,
    pub pending_tool: Option<String>,
    pub history_len: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_mode_parse() {
        assert_eq!("single".parse::<ExecutionMode>(), Ok(ExecutionMode::Single));
        assert_eq!(" Multi ".parse::<ExecutionMode>(), Ok(ExecutionMode::Multi));
        assert!("auto".parse::<ExecutionMode>().is_err());
        assert_eq!(ExecutionMode::default(), ExecutionMode::Single);
    }

    #[test]
    fn test_counters_reset() {
        let mut c = TurnCounters {
            retry_count: 2,
            tool_failure_count: 1,
            loop_break_count: 1,
            successful_tool_count: 4,
        };
        c.reset();
        assert_eq!(c, TurnCounters::default());
    }
}
