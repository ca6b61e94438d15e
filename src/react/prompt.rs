//! PromptAssembler：组装发给模型的消息列表
//!
//! system 消息 = 基础提示 + 调用格式 + 工具目录 + 当前阶段引导 + 检索上下文，
//! 其后接对话历史中最近 window 条消息。

use crate::memory::Message;
use crate::pipeline::{PipelineStage, StageConfig};
use crate::tools::{tool_call_schema_json, ToolDescriptor};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an assistant embedded in an EEG analysis application. \
You help the user load recordings, preprocess them, build datasets and train models by calling tools. \
Only call tools that are allowed in the current stage. Reply in plain text when no tool is needed.";

/// 组装所需的全部输入（均为只读快照）
pub struct PromptInputs<'a> {
    pub history: &'a [Message],
    pub catalog: &'a [ToolDescriptor],
    pub stage: PipelineStage,
    pub stage_config: &'a StageConfig,
    pub retrieved: &'a [String],
}

#[derive(Clone, Debug)]
pub struct PromptAssembler {
    base_prompt: String,
    window: usize,
    call_schema: String,
}

impl PromptAssembler {
    pub fn new(base_prompt: impl Into<String>, window: usize) -> Self {
        Self {
            base_prompt: base_prompt.into(),
            window: window.max(1),
            call_schema: tool_call_schema_json(),
        }
    }

    pub fn assemble(&self, inputs: &PromptInputs<'_>) -> Vec<Message> {
        let start = inputs.history.len().saturating_sub(self.window);
        let mut messages = Vec::with_capacity(inputs.history.len() - start + 1);
        messages.push(Message::system(self.system_prompt(inputs)));
        messages.extend(inputs.history[start..].iter().cloned());
        messages
    }

    pub fn system_prompt(&self, inputs: &PromptInputs<'_>) -> String {
        let mut s = String::with_capacity(2048);
        s.push_str(&self.base_prompt);
        s.push_str("\n\n## Tool call format\n");
        s.push_str(
            "To call a tool, reply with a JSON object {\"command\": \"<tool>\", \"parameters\": {...}} \
             (a ```json fenced block is fine). Several calls may be listed in order. Schema:\n",
        );
        s.push_str(&self.call_schema);
        s.push_str("\n\n## Available tools\n");
        for d in inputs.catalog {
            s.push_str(&format!("- {}: {}", d.name, d.description));
            if d.requires_confirmation {
                s.push_str(" [requires user confirmation]");
            }
            s.push('\n');
            s.push_str(&format!("  parameters: {}\n", d.parameter_schema));
        }
        s.push_str(&format!("\n## Current stage: {}\n", inputs.stage));
        s.push_str(&inputs.stage_config.guidance);
        s.push_str(&format!(
            "\nTools allowed now: [{}]\n",
            inputs.stage_config.allowed_list()
        ));
        if !inputs.retrieved.is_empty() {
            s.push_str("\n## Retrieved context\n");
            for r in inputs.retrieved {
                s.push_str(&format!("- {}\n", r));
            }
        }
        s
    }
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT, 40)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Role;
    use crate::pipeline::StageTable;

    fn descriptor(name: &str, confirm: bool) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: format!("{name} description"),
            parameter_schema: serde_json::json!({"type": "object"}),
            requires_confirmation: confirm,
        }
    }

    #[test]
    fn test_system_first_then_recent_window() {
        let history: Vec<Message> = (0..6).map(|i| Message::user(format!("m{i}"))).collect();
        let table = StageTable::default_table();
        let catalog = vec![descriptor("load_data", false), descriptor("clear_data", true)];
        let retrieved = vec!["Notch at 50 Hz for EU recordings".to_string()];
        let inputs = PromptInputs {
            history: &history,
            catalog: &catalog,
            stage: PipelineStage::DataLoaded,
            stage_config: table.config(PipelineStage::DataLoaded),
            retrieved: &retrieved,
        };
        let msgs = PromptAssembler::new("base", 4).assemble(&inputs);
        assert_eq!(msgs.len(), 5);
        assert_eq!(msgs[0].role, Role::System);
        assert_eq!(msgs[1].content, "m2");
        assert_eq!(msgs[4].content, "m5");

        let sys = &msgs[0].content;
        assert!(sys.starts_with("base"));
        assert!(sys.contains("- load_data: load_data description"));
        assert!(sys.contains("clear_data description [requires user confirmation]"));
        assert!(sys.contains("## Current stage: data_loaded"));
        assert!(sys.contains("preprocess"));
        assert!(sys.contains("Notch at 50 Hz"));
    }

    #[test]
    fn test_no_retrieved_section_when_empty() {
        let table = StageTable::default_table();
        let inputs = PromptInputs {
            history: &[],
            catalog: &[],
            stage: PipelineStage::Empty,
            stage_config: table.config(PipelineStage::Empty),
            retrieved: &[],
        };
        let msgs = PromptAssembler::default().assemble(&inputs);
        assert_eq!(msgs.len(), 1);
        assert!(!msgs[0].content.contains("Retrieved context"));
    }
}
