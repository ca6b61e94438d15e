//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / requires_confirmation / execute），
//! 由 ToolRegistry 按唯一名称注册与查找；启动后只读，可在线程间共享。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::core::AgentError;
use crate::pipeline::PipelineStage;

/// 以此前缀开头的工具结果是发给界面的旁路请求（切换视图、确认选择等），而非普通输出
pub const UI_REQUEST_PREFIX: &str = "Request:";

/// 执行上下文：当前阶段与所属轮次
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub stage: PipelineStage,
    pub turn_id: Uuid,
}

/// 工具的静态描述（注册后不可变）
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameter_schema: Value,
    pub requires_confirmation: bool,
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、是否需人工确认、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（JSON 中的 "command" 字段）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 不可逆操作返回 true，执行前必须经用户确认
    fn requires_confirmation(&self) -> bool {
        false
    }

    fn describe(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameter_schema: self.parameters_schema(),
            requires_confirmation: self.requires_confirmation(),
        }
    }

    /// 成功返回可读结果文本，失败返回错误说明
    async fn execute(&self, ctx: &ToolContext, params: &Map<String, Value>) -> Result<String, String>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；名称重复时报错
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), AgentError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), AgentError> {
        let name = tool.name().to_string();
        if name.trim().is_empty() {
            return Err(AgentError::Config("tool name must not be empty".to_string()));
        }
        if self.tools.contains_key(&name) {
            return Err(AgentError::Config(format!("tool '{name}' registered twice")));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn requires_confirmation(&self, name: &str) -> bool {
        self.tools
            .get(name)
            .map(|t| t.requires_confirmation())
            .unwrap_or(false)
    }

    /// 按名称排序，保证 Prompt 中的工具目录稳定
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut d: Vec<ToolDescriptor> = self.tools.values().map(|t| t.describe()).collect();
        d.sort_by(|a, b| a.name.cmp(&b.name));
        d
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, bool);

    #[async_trait]
    impl Tool for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "test tool"
        }

        fn requires_confirmation(&self) -> bool {
            self.1
        }

        async fn execute(&self, _ctx: &ToolContext, _params: &Map<String, Value>) -> Result<String, String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut reg = ToolRegistry::new();
        reg.register(Named("b_tool", false)).unwrap();
        reg.register(Named("a_tool", true)).unwrap();
        assert_eq!(reg.tool_names(), vec!["a_tool", "b_tool"]);
        assert!(reg.requires_confirmation("a_tool"));
        assert!(!reg.requires_confirmation("b_tool"));
        assert!(!reg.requires_confirmation("missing"));
        let d = reg.descriptors();
        assert_eq!(d[0].name, "a_tool");
        assert!(d[0].requires_confirmation);
    }

    #[test]
    fn test_duplicate_and_empty_names_rejected() {
        let mut reg = ToolRegistry::new();
        reg.register(Named("x", false)).unwrap();
        assert!(matches!(reg.register(Named("x", true)), Err(AgentError::Config(_))));
        assert!(matches!(reg.register(Named("  ", false)), Err(AgentError::Config(_))));
        assert_eq!(reg.len(), 1);
    }
}
