//! Agent 编排器：装配与主控任务
//!
//! 负责：加载配置、创建 LLM / 工具注册表 / 阶段表 / 工作台 / 知识检索器，建立命令与事件两条通道，
//! 并在后台任务中运行 OrchestrationController（消费 Submit / Resume / Stop / Clear / SetMode / Quit）。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::{load_config, AppConfig};
use crate::core::{AgentError, ExecutionMode};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::KeywordRetriever;
use crate::pipeline::StageTable;
use crate::react::{ControllerEvent, OrchestrationController};
use crate::tools::{SwitchPanelTool, ToolRegistry, Workbench};

/// 从界面发往编排器的命令
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// 提交用户输入，开始新的一轮
    Submit(String),
    /// 回复待确认的调用（true 批准 / false 拒绝）
    Resume(bool),
    /// 停止当前生成
    Stop,
    /// 清空对话与循环检测窗口
    Clear,
    SetMode(ExecutionMode),
    Quit,
}

/// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let api_key = std::env::var("OPENAI_API_KEY").ok();
    match (provider.as_str(), api_key) {
        ("mock", _) => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient)
        }
        (_, Some(key)) => {
            tracing::info!(model = %cfg.llm.model, "Using OpenAI-compatible LLM");
            Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                Some(&key),
            ))
        }
        (_, None) => {
            tracing::warn!("No API key set, using Mock LLM");
            Arc::new(MockLlmClient)
        }
    }
}

/// 用演示工作台的工具与导航工具构建注册表
pub fn build_registry(workbench: &Workbench) -> Result<ToolRegistry, AgentError> {
    let mut registry = ToolRegistry::new();
    registry.register(SwitchPanelTool)?;
    for tool in workbench.tools() {
        registry.register_arc(tool)?;
    }
    Ok(registry)
}

/// 按配置装配控制器：演示工作台、默认阶段表、知识检索器
pub fn build_controller(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
    events: mpsc::UnboundedSender<ControllerEvent>,
) -> Result<OrchestrationController, AgentError> {
    let workbench = Workbench::new(Duration::from_secs(cfg.tools.training_secs));
    let registry = Arc::new(build_registry(&workbench)?);
    let stages = Arc::new(StageTable::default_table());
    let retriever = KeywordRetriever::with_documents(cfg.app.knowledge.iter().cloned());

    Ok(OrchestrationController::new(
        cfg.controller_config(),
        llm,
        registry,
        stages,
        Arc::new(workbench),
        events,
    )
    .with_retriever(Arc::new(retriever)))
}

/// 创建 Agent 运行时：返回命令发送端与事件接收端；控制器在后台任务中运行
pub async fn create_agent(
    config_path: Option<PathBuf>,
) -> anyhow::Result<(
    mpsc::UnboundedSender<Command>,
    mpsc::UnboundedReceiver<ControllerEvent>,
)> {
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<ControllerEvent>();

    let controller = build_controller(&cfg, create_llm_from_config(&cfg), event_tx)?;
    tracing::info!(
        app = cfg.app.name.as_deref().unwrap_or("eeg-copilot"),
        mode = ?cfg.agent.execution_mode,
        knowledge = cfg.app.knowledge.len(),
        "agent started"
    );
    tokio::spawn(controller.run(cmd_rx));

    Ok((cmd_tx, event_rx))
}
