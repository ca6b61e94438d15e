//! OrchestrationController：驱动一次对话轮次的状态机
//!
//! Idle → AwaitingGeneration → ParsingOutput → {Finalizing | AwaitingConfirmation | Executing}
//! → AwaitingGeneration | Idle。
//!
//! 控制器独占对话历史、轮次计数、待确认调用与循环检测器，只在自身任务内修改（`&mut self`，无锁）。
//! 推理在 GenerationWorker 中进行，完成信号经 mpsc 通道回到这里处理；同一时刻最多一个生成在途。
//! 工具调用在本轮内串行执行。每个轮次以恰好一个 Final 或 Error 事件结束。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use crate::core::{
    AgentError, Command, ControllerPhase, ControllerStatus, ExecutionMode, PendingConfirmation,
    RecoveryEngine, TurnCounters,
};
use crate::llm::LlmClient;
use crate::memory::{ContextRetriever, ConversationState, Message, NoopRetriever, Role};
use crate::pipeline::{compute_stage, AppStateSource, PipelineStage, StageTable};
use crate::react::loop_guard::{LoopDetector, LoopSignature};
use crate::react::parser::{classify_output, ParsedOutput, ToolCall};
use crate::react::prompt::{PromptAssembler, PromptInputs, DEFAULT_SYSTEM_PROMPT};
use crate::react::stream_gate::StreamGate;
use crate::react::verifier::Verifier;
use crate::react::worker::{
    GenerationId, GenerationTimeouts, GenerationWorker, WorkerEvent, WorkerEventKind,
};
use crate::react::ControllerEvent;
use crate::tools::{ToolContext, ToolExecutor, ToolRegistry, UI_REQUEST_PREFIX};

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 控制器参数（由 AgentConfig 转换而来）
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub system_prompt: String,
    pub execution_mode: ExecutionMode,
    pub max_history: usize,
    pub prompt_window: usize,
    /// 格式错误输出 / 校验拒绝的纠正重试上限
    pub max_retries: u32,
    /// 连续工具失败上限，达到即终止本轮
    pub max_tool_failures: u32,
    /// multi 模式下单轮链式成功工具上限
    pub max_chained_tools: u32,
    pub min_confidence: Option<f64>,
    pub stream_prefix_chars: usize,
    pub retrieval_k: usize,
    pub loop_window: usize,
    pub loop_threshold: usize,
    pub tool_timeout_secs: u64,
    /// 打开 LLM 流的超时
    pub request_timeout: Duration,
    /// 整次生成的超时
    pub stream_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            execution_mode: ExecutionMode::Single,
            max_history: 200,
            prompt_window: 40,
            max_retries: 2,
            max_tool_failures: 3,
            max_chained_tools: 5,
            min_confidence: Some(0.5),
            stream_prefix_chars: 10,
            retrieval_k: 3,
            loop_window: 10,
            loop_threshold: 3,
            tool_timeout_secs: 30,
            request_timeout: Duration::from_secs(60),
            stream_timeout: Duration::from_secs(120),
        }
    }
}

/// 单个工具调用处理后的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// 继续处理同批次的下一个调用
    Next,
    /// 本轮已经重新派发生成、挂起或结束
    Stop,
}

pub struct OrchestrationController {
    config: ControllerConfig,
    registry: Arc<ToolRegistry>,
    executor: ToolExecutor,
    stages: Arc<StageTable>,
    app_state: Arc<dyn AppStateSource>,
    retriever: Arc<dyn ContextRetriever>,
    prompt: PromptAssembler,
    verifier: Verifier,
    recovery: RecoveryEngine,
    loop_detector: LoopDetector,
    history: ConversationState,
    worker: GenerationWorker,
    worker_rx: Option<mpsc::UnboundedReceiver<WorkerEvent>>,
    events: mpsc::UnboundedSender<ControllerEvent>,
    gate: StreamGate,

    phase: ControllerPhase,
    is_processing: bool,
    execution_mode: ExecutionMode,
    counters: TurnCounters,
    pending: Option<PendingConfirmation>,
    active_generation: Option<GenerationId>,
    turn_id: Uuid,
    turn_span: tracing::Span,
    last_input: String,
}

impl OrchestrationController {
    pub fn new(
        config: ControllerConfig,
        llm: Arc<dyn LlmClient>,
        registry: Arc<ToolRegistry>,
        stages: Arc<StageTable>,
        app_state: Arc<dyn AppStateSource>,
        events: mpsc::UnboundedSender<ControllerEvent>,
    ) -> Self {
        let (worker, worker_rx) = GenerationWorker::new(
            llm,
            GenerationTimeouts {
                request: config.request_timeout,
                stream: config.stream_timeout,
            },
        );
        Self {
            executor: ToolExecutor::new(registry.clone(), config.tool_timeout_secs),
            registry,
            stages,
            app_state,
            retriever: Arc::new(NoopRetriever),
            prompt: PromptAssembler::new(config.system_prompt.clone(), config.prompt_window),
            verifier: Verifier::new(config.min_confidence),
            recovery: RecoveryEngine::new(),
            loop_detector: LoopDetector::new(config.loop_window, config.loop_threshold),
            history: ConversationState::new(config.max_history),
            worker,
            worker_rx: Some(worker_rx),
            events,
            gate: StreamGate::new(config.stream_prefix_chars),
            phase: ControllerPhase::Idle,
            is_processing: false,
            execution_mode: config.execution_mode,
            counters: TurnCounters::default(),
            pending: None,
            active_generation: None,
            turn_id: Uuid::nil(),
            turn_span: tracing::Span::none(),
            last_input: String::new(),
            config,
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn ContextRetriever>) -> Self {
        self.retriever = retriever;
        self
    }

    /// 替换默认校验器（例如挂上语义校验钩子）
    pub fn with_verifier(mut self, verifier: Verifier) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn phase(&self) -> ControllerPhase {
        self.phase
    }

    pub fn is_processing(&self) -> bool {
        self.is_processing
    }

    pub fn counters(&self) -> TurnCounters {
        self.counters
    }

    pub fn pending_confirmation(&self) -> Option<&PendingConfirmation> {
        self.pending.as_ref()
    }

    /// 对话历史的只读副本
    pub fn history(&self) -> Vec<Message> {
        self.history.snapshot()
    }

    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            phase: self.phase,
            is_processing: self.is_processing,
            execution_mode: self.execution_mode,
            stage: self.current_stage(),
            counters: self.counters,
            pending_tool: self.pending.as_ref().map(|p| p.tool_name.clone()),
            history_len: self.history.len(),
        }
    }

    pub fn set_execution_mode(&mut self, mode: ExecutionMode) {
        if self.execution_mode != mode {
            tracing::info!(from = ?self.execution_mode, to = ?mode, "execution mode changed");
            self.execution_mode = mode;
        }
    }

    /// 开始新的一轮；已有轮次在途时返回 Busy
    pub fn submit(&mut self, input: impl Into<String>) -> Result<(), AgentError> {
        if self.is_processing {
            tracing::warn!(phase = %self.phase, "input rejected, turn in progress");
            return Err(AgentError::Busy);
        }
        let input = input.into();
        self.turn_id = Uuid::new_v4();
        self.turn_span = tracing::info_span!("turn", id = %self.turn_id);
        let span = self.turn_span.clone();
        let _enter = span.enter();

        tracing::info!(mode = ?self.execution_mode, "turn started");
        self.counters.reset();
        self.is_processing = true;
        self.history.append(Role::User, input.clone());
        self.last_input = input;
        self.dispatch();
        Ok(())
    }

    /// 处理 worker 事件；非当前生成的事件视为过期直接丢弃
    pub async fn handle_worker_event(&mut self, event: WorkerEvent) {
        let span = self.turn_span.clone();
        self.on_worker_event(event).instrument(span).await
    }

    /// 用户对待确认调用的答复
    pub async fn resume(&mut self, approved: bool) -> Result<(), AgentError> {
        let Some(pending) = self.pending.take() else {
            tracing::warn!("resume without pending confirmation");
            return Err(AgentError::NoPendingConfirmation);
        };
        let span = self.turn_span.clone();
        self.on_resume(pending, approved).instrument(span).await;
        Ok(())
    }

    /// 停止当前轮：通知 worker 中断（协作式），控制器侧立即回到 Idle
    pub fn stop(&mut self) {
        if !self.is_processing {
            return;
        }
        let _enter = self.turn_span.clone().entered();
        tracing::info!(phase = %self.phase, generation = ?self.active_generation, "turn stopped");
        self.worker.interrupt();
        self.active_generation = None;
        self.pending = None;
        self.is_processing = false;
        self.emit(ControllerEvent::Error {
            text: AgentError::Cancelled.to_string(),
        });
        self.set_phase(ControllerPhase::Idle);
    }

    /// 清空历史与循环检测窗口；轮次在途时返回 Busy
    pub fn clear(&mut self) -> Result<(), AgentError> {
        if self.is_processing {
            return Err(AgentError::Busy);
        }
        self.history.clear();
        self.loop_detector.clear();
        self.counters.reset();
        tracing::info!("conversation cleared");
        Ok(())
    }

    /// 等待 worker 事件直到本轮离开 AwaitingGeneration（结束、挂起确认或被停止）
    pub async fn drive_until_settled(&mut self) {
        while self.phase == ControllerPhase::AwaitingGeneration {
            let Some(rx) = self.worker_rx.as_mut() else {
                return;
            };
            let Some(event) = rx.recv().await else {
                return;
            };
            self.handle_worker_event(event).await;
        }
    }

    /// 主循环：同时等待外部命令与 worker 事件，直到 Quit 或命令通道关闭
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let Some(mut worker_rx) = self.worker_rx.take() else {
            tracing::error!("controller run loop started twice");
            return;
        };
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Quit) | None => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },
                Some(event) = worker_rx.recv() => self.handle_worker_event(event).await,
            }
        }
        self.worker.shutdown();
        tracing::info!("controller stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        let result = match cmd {
            Command::Submit(input) => self.submit(input),
            Command::Resume(approved) => self.resume(approved).await,
            Command::Stop => {
                self.stop();
                Ok(())
            }
            Command::Clear => self.clear(),
            Command::SetMode(mode) => {
                self.set_execution_mode(mode);
                Ok(())
            }
            Command::Quit => Ok(()),
        };
        if let Err(e) = result {
            self.emit(ControllerEvent::Error { text: e.to_string() });
        }
    }

    fn current_stage(&self) -> PipelineStage {
        compute_stage(&self.app_state.snapshot())
    }

    fn emit(&self, event: ControllerEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }

    fn set_phase(&mut self, phase: ControllerPhase) {
        if self.phase != phase {
            tracing::debug!(from = %self.phase, to = %phase, "phase");
            self.phase = phase;
            self.emit(ControllerEvent::PhaseChanged { phase });
        }
    }

    /// 组装 Prompt 并派发一次生成
    fn dispatch(&mut self) {
        let stage = self.current_stage();
        let retrieved = if self.config.retrieval_k > 0 {
            self.retriever.retrieve(&self.last_input, self.config.retrieval_k)
        } else {
            Vec::new()
        };
        let catalog = self.registry.descriptors();
        let history = self.history.snapshot();
        let messages = self.prompt.assemble(&PromptInputs {
            history: &history,
            catalog: &catalog,
            stage,
            stage_config: self.stages.config(stage),
            retrieved: &retrieved,
        });
        self.gate.reset();
        let generation = self.worker.dispatch(messages);
        self.active_generation = Some(generation);
        tracing::debug!(generation, %stage, "generation dispatched");
        self.set_phase(ControllerPhase::AwaitingGeneration);
        self.emit(ControllerEvent::Thinking { generation, stage });
    }

    async fn on_worker_event(&mut self, event: WorkerEvent) {
        if self.active_generation != Some(event.generation) {
            tracing::debug!(generation = event.generation, "discarding stale worker event");
            return;
        }
        match event.kind {
            WorkerEventKind::Chunk(text) => {
                if let Some(visible) = self.gate.push(&text) {
                    self.emit(ControllerEvent::MessageChunk { text: visible });
                }
            }
            WorkerEventKind::Finished => {
                self.active_generation = None;
                let raw = self.gate.text().to_string();
                self.on_generation_complete(raw).await;
            }
            WorkerEventKind::Failed(err) => {
                self.active_generation = None;
                tracing::warn!(error = %err, "generation failed");
                let text = self.recovery.handle(&err).into_message();
                self.emit(ControllerEvent::Recovery {
                    action: "abort".to_string(),
                    detail: text.clone(),
                });
                self.end_turn_with_error(text);
            }
        }
    }

    async fn on_generation_complete(&mut self, raw: String) {
        self.set_phase(ControllerPhase::ParsingOutput);
        match classify_output(&raw) {
            ParsedOutput::Text => {
                if let Some(rest) = self.gate.finish(true) {
                    self.emit(ControllerEvent::MessageChunk { text: rest });
                }
                self.history.append(Role::Assistant, raw.clone());
                self.finalize(raw);
            }
            ParsedOutput::Malformed { reason } => {
                if self.counters.retry_count < self.config.max_retries {
                    tracing::warn!(%reason, retry = self.counters.retry_count + 1, "malformed tool call, retrying");
                    self.gate.finish(false);
                    if self.gate.has_flushed() {
                        self.emit(ControllerEvent::MessageDiscarded);
                    }
                    self.history.append(Role::Assistant, raw);
                    self.retry(&AgentError::MalformedOutput(reason));
                } else {
                    tracing::warn!(%reason, "retry budget exhausted, showing raw output");
                    if let Some(rest) = self.gate.finish(true) {
                        self.emit(ControllerEvent::MessageChunk { text: rest });
                    }
                    self.history.append(Role::Assistant, raw.clone());
                    self.finalize(raw);
                }
            }
            ParsedOutput::ToolCalls(calls) => {
                self.gate.finish(false);
                if self.gate.revealed_payload() {
                    self.emit(ControllerEvent::MessageDiscarded);
                }
                self.history.append(Role::Assistant, raw);
                self.process_calls(calls).await;
            }
        }
    }

    /// 按顺序处理一批调用：循环检测 → 校验 → 注册与阶段门控 → 确认 → 执行
    async fn process_calls(&mut self, calls: Vec<ToolCall>) {
        let total = calls.len();
        for (idx, call) in calls.into_iter().enumerate() {
            if self.loop_detector.record_and_check(LoopSignature::from(&call)) {
                self.counters.loop_break_count += 1;
                tracing::warn!(tool = %call.name, "repeated tool call, aborting turn");
                self.emit(ControllerEvent::LoopDetected {
                    tool: call.name.clone(),
                });
                self.abort(&AgentError::LoopDetected(call.name));
                return;
            }

            match self.verifier.verify(&call, call.confidence) {
                Err(err) => {
                    tracing::error!(error = %err, "tool call violates the call contract");
                    self.abort(&err);
                    return;
                }
                Ok(v) if !v.is_valid => {
                    let reason = v
                        .error_message
                        .unwrap_or_else(|| format!("'{}' was rejected", call.name));
                    tracing::warn!(tool = %call.name, %reason, "tool call rejected by verifier");
                    let err = AgentError::VerificationRejected(reason);
                    if self.counters.retry_count < self.config.max_retries {
                        self.retry(&err);
                    } else {
                        self.exhaust(format!("Max retries exceeded: {err}"));
                    }
                    return;
                }
                Ok(_) => {}
            }

            let stage = self.current_stage();
            if let Err(err) = self.check_admissible(&call.name, stage) {
                self.record_failure(&call.name, err);
                return;
            }

            if self.registry.requires_confirmation(&call.name) {
                if idx + 1 < total {
                    tracing::debug!(dropped = total - idx - 1, "remaining calls dropped while awaiting confirmation");
                }
                self.request_confirmation(call, stage);
                return;
            }

            if self.execute_call(call, stage).await == Flow::Stop {
                if idx + 1 < total {
                    tracing::debug!(
                        dropped = total - idx - 1,
                        mode = ?self.execution_mode,
                        "remaining calls dropped after turn settled"
                    );
                }
                return;
            }
        }
        // multi 模式下整批成功，让模型决定下一步
        self.dispatch();
    }

    async fn on_resume(&mut self, pending: PendingConfirmation, approved: bool) {
        if !approved {
            tracing::info!(tool = %pending.tool_name, "confirmation rejected");
            let note = format!(
                "The user rejected the '{}' call. It was not executed.",
                pending.tool_name
            );
            self.history.append(Role::System, note.clone());
            self.finalize(note);
            return;
        }

        tracing::info!(tool = %pending.tool_name, "confirmation approved");
        // 等待确认期间应用状态可能已变化，重新门控
        let stage = self.current_stage();
        if let Err(err) = self.check_admissible(&pending.tool_name, stage) {
            self.record_failure(&pending.tool_name, err);
            return;
        }
        let call = ToolCall::new(pending.tool_name, pending.parameters);
        if self.execute_call(call, stage).await == Flow::Next {
            self.dispatch();
        }
    }

    /// 未注册的工具与当前阶段不允许的工具都不会被执行
    fn check_admissible(&self, tool: &str, stage: PipelineStage) -> Result<(), AgentError> {
        if !self.registry.contains(tool) {
            tracing::warn!(tool, "unknown tool requested");
            return Err(AgentError::HallucinatedTool(tool.to_string()));
        }
        if !self.stages.allows(stage, tool) {
            tracing::warn!(tool, %stage, "tool not allowed in current stage");
            return Err(AgentError::StageViolation(
                self.stages.describe_violation(stage, tool),
            ));
        }
        Ok(())
    }

    fn request_confirmation(&mut self, call: ToolCall, stage: PipelineStage) {
        let context = match self.registry.get(&call.name) {
            Some(tool) => format!("{} (stage: {stage})", tool.description()),
            None => format!("stage: {stage}"),
        };
        tracing::info!(tool = %call.name, "awaiting user confirmation");
        self.emit(ControllerEvent::ConfirmationRequest {
            tool: call.name.clone(),
            parameters: call.parameters.clone(),
            context: context.clone(),
        });
        self.pending = Some(PendingConfirmation {
            tool_name: call.name,
            parameters: call.parameters,
            context,
        });
        self.set_phase(ControllerPhase::AwaitingConfirmation);
    }

    async fn execute_call(&mut self, call: ToolCall, stage: PipelineStage) -> Flow {
        self.set_phase(ControllerPhase::Executing);
        self.emit(ControllerEvent::ToolCall {
            tool: call.name.clone(),
            parameters: call.parameters.clone(),
        });
        let ctx = ToolContext {
            stage,
            turn_id: self.turn_id,
        };
        let output = match self.executor.execute(&call.name, &ctx, &call.parameters).await {
            Ok(output) => output,
            Err(err) => return self.record_failure(&call.name, err),
        };

        // 界面请求的最终回复用可读文本，不带保留前缀
        let reply = match output.strip_prefix(UI_REQUEST_PREFIX) {
            Some(request) => {
                let request = request.trim().to_string();
                self.emit(ControllerEvent::UiRequest {
                    tool: call.name.clone(),
                    request: request.clone(),
                });
                format!("Sent to the interface: {request}")
            }
            None => output.clone(),
        };
        self.emit(ControllerEvent::Observation {
            tool: call.name.clone(),
            ok: true,
            preview: preview(&output),
        });
        self.history.append(
            Role::User,
            format!("Observation from {}: {}", call.name, output),
        );
        self.counters.tool_failure_count = 0;

        match self.execution_mode {
            ExecutionMode::Single => {
                self.finalize(reply);
                Flow::Stop
            }
            ExecutionMode::Multi => {
                self.counters.successful_tool_count += 1;
                if self.counters.successful_tool_count >= self.config.max_chained_tools {
                    tracing::info!(
                        count = self.counters.successful_tool_count,
                        "chained tool limit reached"
                    );
                    self.finalize(reply);
                    Flow::Stop
                } else {
                    self.set_phase(ControllerPhase::ParsingOutput);
                    Flow::Next
                }
            }
        }
    }

    /// 工具失败：结果作为观察回灌，达到失败上限则终止，否则让模型重新生成
    fn record_failure(&mut self, tool: &str, err: AgentError) -> Flow {
        let text = self.recovery.handle(&err).into_message();
        self.emit(ControllerEvent::Observation {
            tool: tool.to_string(),
            ok: false,
            preview: preview(&text),
        });
        self.history
            .append(Role::User, format!("Observation from {tool}: {text}"));
        if err.counts_as_tool_failure() {
            self.counters.tool_failure_count += 1;
        }
        tracing::warn!(
            tool,
            failures = self.counters.tool_failure_count,
            error = %err,
            "tool call failed"
        );
        if self.counters.tool_failure_count >= self.config.max_tool_failures {
            self.exhaust(format!(
                "Max retries exceeded: {} consecutive tool failures. Last error: {text}",
                self.counters.tool_failure_count
            ));
        } else {
            self.dispatch();
        }
        Flow::Stop
    }

    /// 追加纠正提示并重新生成（调用方已检查预算）
    fn retry(&mut self, err: &AgentError) {
        let prompt = self.recovery.handle(err).into_message();
        self.counters.retry_count += 1;
        self.emit(ControllerEvent::Recovery {
            action: "retry_with_prompt".to_string(),
            detail: err.to_string(),
        });
        self.history.append(Role::System, prompt);
        self.dispatch();
    }

    /// 循环或契约错误：附上说明后结束本轮
    fn abort(&mut self, err: &AgentError) {
        let msg = self.recovery.handle(err).into_message();
        self.emit(ControllerEvent::Recovery {
            action: "abort".to_string(),
            detail: msg.clone(),
        });
        self.history.append(Role::System, msg.clone());
        self.finalize(msg);
    }

    fn exhaust(&mut self, msg: String) {
        tracing::warn!(%msg, "turn budget exhausted");
        self.history.append(Role::System, msg.clone());
        self.finalize(msg);
    }

    fn finalize(&mut self, text: String) {
        self.set_phase(ControllerPhase::Finalizing);
        self.is_processing = false;
        self.active_generation = None;
        let (prompt_tokens, completion_tokens, _) = self.worker.token_usage();
        tracing::info!(
            retries = self.counters.retry_count,
            tool_failures = self.counters.tool_failure_count,
            tools = self.counters.successful_tool_count,
            prompt_tokens,
            completion_tokens,
            "turn finished"
        );
        self.emit(ControllerEvent::Final { text });
        self.set_phase(ControllerPhase::Idle);
    }

    fn end_turn_with_error(&mut self, text: String) {
        self.set_phase(ControllerPhase::Finalizing);
        self.is_processing = false;
        self.active_generation = None;
        self.history.append(Role::System, text.clone());
        tracing::info!("turn ended with error");
        self.emit(ControllerEvent::Error { text });
        self.set_phase(ControllerPhase::Idle);
    }
}

fn preview(s: &str) -> String {
    if s.chars().count() > OBSERVATION_PREVIEW_CHARS {
        format!(
            "{}...",
            s.chars().take(OBSERVATION_PREVIEW_CHARS).collect::<String>()
        )
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let long = "脑".repeat(OBSERVATION_PREVIEW_CHARS + 5);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), OBSERVATION_PREVIEW_CHARS + 3);
        assert_eq!(preview("ok"), "ok");
    }

    #[test]
    fn test_default_config_budgets() {
        let c = ControllerConfig::default();
        assert_eq!(c.max_retries, 2);
        assert_eq!(c.max_tool_failures, 3);
        assert_eq!(c.max_chained_tools, 5);
        assert_eq!(c.execution_mode, ExecutionMode::Single);
    }
}
