//! 编排过程事件：推送给界面（流式文本、工具调用、观察、确认请求、最终回复）
//!
//! 通过构造时注入的 mpsc 通道按产生顺序逐个送达，每个事件只投递一次。

use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::ControllerPhase;
use crate::pipeline::PipelineStage;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerEvent {
    /// 状态机阶段变化
    PhaseChanged { phase: ControllerPhase },
    /// 已派发一次生成
    Thinking { generation: u64, stage: PipelineStage },
    /// 可以实时展示的回复片段
    MessageChunk { text: String },
    /// 之前流出的片段作废（格式错误的调用尝试被隐藏并重试）
    MessageDiscarded,
    /// 即将执行的工具调用
    ToolCall {
        tool: String,
        parameters: Map<String, Value>,
    },
    /// 工具结果（预览，避免过长）
    Observation {
        tool: String,
        ok: bool,
        preview: String,
    },
    /// 工具结果中的界面请求（以 "Request:" 开头）
    UiRequest { tool: String, request: String },
    /// 等待用户确认的不可逆操作
    ConfirmationRequest {
        tool: String,
        parameters: Map<String, Value>,
        context: String,
    },
    /// 恢复动作（RetryWithPrompt / Observe / Abort）
    Recovery { action: String, detail: String },
    /// 重复调用被拦截
    LoopDetected { tool: String },
    /// 本轮结束
    Final { text: String },
    Error { text: String },
}
