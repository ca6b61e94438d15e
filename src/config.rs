//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `COPILOT__*` 覆盖（双下划线表示嵌套，如 `COPILOT__AGENT__EXECUTION_MODE=multi`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::ExecutionMode;
use crate::react::{ControllerConfig, DEFAULT_SYSTEM_PROMPT};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub agent: AgentSection,
    pub loop_guard: LoopGuardSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
}

/// [app] 段：应用名、历史上限、Prompt 窗口、系统提示文件、检索用的知识片段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 对话历史最多保留的条数
    pub max_history: usize,
    /// 每次生成携带的最近历史条数
    pub prompt_window: usize,
    pub system_prompt_path: Option<PathBuf>,
    /// 领域知识片段，按关键词检索后注入系统提示
    pub knowledge: Vec<String>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            max_history: 200,
            prompt_window: 40,
            system_prompt_path: None,
            knowledge: Vec::new(),
        }
    }
}

/// [agent] 段：执行模式与各项预算
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub execution_mode: ExecutionMode,
    pub max_retries: u32,
    pub max_tool_failures: u32,
    pub max_chained_tools: u32,
    /// 置信度下限；设为 0 等同于不检查
    pub min_confidence: f64,
    pub stream_prefix_chars: usize,
    pub retrieval_k: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Single,
            max_retries: 2,
            max_tool_failures: 3,
            max_chained_tools: 5,
            min_confidence: 0.5,
            stream_prefix_chars: 10,
            retrieval_k: 3,
        }
    }
}

/// [loop_guard] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoopGuardSection {
    pub window: usize,
    pub threshold: usize,
}

impl Default for LoopGuardSection {
    fn default() -> Self {
        Self {
            window: 10,
            threshold: 3,
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai 或 mock；openai 需要 OPENAI_API_KEY
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

/// [llm.timeouts] 段（秒）：request 约束打开流，stream 约束整次生成
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
    pub stream: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: 60,
            stream: 120,
        }
    }
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 演示工作台中训练任务的模拟时长（秒）
    pub training_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            training_secs: 5,
        }
    }
}

impl AppConfig {
    /// 系统提示：优先读 system_prompt_path，读取失败时回退到内置提示
    pub fn system_prompt(&self) -> String {
        self.app
            .system_prompt_path
            .as_ref()
            .and_then(|p| match std::fs::read_to_string(p) {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::warn!(path = %p.display(), error = %e, "system prompt not readable, using built-in");
                    None
                }
            })
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
    }

    pub fn controller_config(&self) -> ControllerConfig {
        let min_confidence = if self.agent.min_confidence > 0.0 {
            Some(self.agent.min_confidence)
        } else {
            None
        };
        ControllerConfig {
            system_prompt: self.system_prompt(),
            execution_mode: self.agent.execution_mode,
            max_history: self.app.max_history,
            prompt_window: self.app.prompt_window,
            max_retries: self.agent.max_retries,
            max_tool_failures: self.agent.max_tool_failures.max(1),
            max_chained_tools: self.agent.max_chained_tools.max(1),
            min_confidence,
            stream_prefix_chars: self.agent.stream_prefix_chars,
            retrieval_k: self.agent.retrieval_k,
            loop_window: self.loop_guard.window,
            loop_threshold: self.loop_guard.threshold,
            tool_timeout_secs: self.tools.tool_timeout_secs,
            request_timeout: Duration::from_secs(self.llm.timeouts.request.max(1)),
            stream_timeout: Duration::from_secs(self.llm.timeouts.stream.max(1)),
        }
    }
}

/// 从 config 目录加载配置，环境变量 COPILOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 COPILOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, ignored");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("COPILOT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        let cc = cfg.controller_config();
        assert_eq!(cc.max_history, 200);
        assert_eq!(cc.prompt_window, 40);
        assert_eq!(cc.max_retries, 2);
        assert_eq!(cc.loop_threshold, 3);
        assert_eq!(cc.min_confidence, Some(0.5));
        assert_eq!(cc.execution_mode, ExecutionMode::Single);
        assert_eq!(cc.request_timeout, Duration::from_secs(60));
        assert_eq!(cc.stream_timeout, Duration::from_secs(120));
        assert!(cfg.app.knowledge.is_empty());
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("copilot.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "[agent]\nexecution_mode = \"multi\"\nmax_retries = 4\nmin_confidence = 0.0\n\n[loop_guard]\nwindow = 6\n\n[llm]\nprovider = \"mock\"\n\n[llm.timeouts]\nrequest = 7\n\n[app]\nknowledge = [\"Alpha rhythm peaks near 10 Hz.\"]\n"
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.agent.execution_mode, ExecutionMode::Multi);
        assert_eq!(cfg.agent.max_retries, 4);
        assert_eq!(cfg.loop_guard.window, 6);
        assert_eq!(cfg.loop_guard.threshold, 3);
        assert_eq!(cfg.llm.provider, "mock");

        assert!(cfg
            .app
            .knowledge
            .iter()
            .any(|k| k == "Alpha rhythm peaks near 10 Hz."));

        let cc = cfg.controller_config();
        assert_eq!(cc.min_confidence, None);
        assert_eq!(cc.max_retries, 4);
        assert_eq!(cc.request_timeout, Duration::from_secs(7));
    }

    #[test]
    fn test_system_prompt_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system.txt");
        std::fs::write(&path, "You are an EEG lab assistant.").unwrap();
        let mut cfg = AppConfig::default();
        cfg.app.system_prompt_path = Some(path);
        assert_eq!(cfg.system_prompt(), "You are an EEG lab assistant.");

        cfg.app.system_prompt_path = Some(dir.path().join("missing.txt"));
        assert_eq!(cfg.system_prompt(), DEFAULT_SYSTEM_PROMPT);
    }
}
