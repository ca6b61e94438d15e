//! 编排层：解析、校验、循环检测、流式闸门、Prompt 组装、生成 worker 与主控状态机

pub mod controller;
pub mod events;
pub mod loop_guard;
pub mod parser;
pub mod prompt;
pub mod stream_gate;
pub mod verifier;
pub mod worker;

pub use controller::{ControllerConfig, OrchestrationController};
pub use events::ControllerEvent;
pub use loop_guard::{LoopDetector, LoopSignature, DEFAULT_LOOP_THRESHOLD, DEFAULT_LOOP_WINDOW};
pub use parser::{classify_output, has_tool_call_signature, parse_commands, ParsedOutput, ToolCall};
pub use prompt::{PromptAssembler, PromptInputs, DEFAULT_SYSTEM_PROMPT};
pub use stream_gate::StreamGate;
pub use verifier::{SemanticCheck, Verification, Verifier};
pub use worker::{GenerationId, GenerationTimeouts, GenerationWorker, WorkerEvent, WorkerEventKind};
