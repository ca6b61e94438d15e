//! 导航工具：切换界面面板（所有阶段都允许）
//!
//! 结果以 UI_REQUEST_PREFIX 开头，由编排器转为 UiRequest 事件交给界面处理。

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::pipeline::NAVIGATION_TOOL;
use crate::tools::{Tool, ToolContext, UI_REQUEST_PREFIX};

const PANELS: [&str; 5] = ["data", "preprocessing", "dataset", "training", "evaluation"];

pub struct SwitchPanelTool;

#[async_trait]
impl Tool for SwitchPanelTool {
    fn name(&self) -> &str {
        NAVIGATION_TOOL
    }

    fn description(&self) -> &str {
        "Switch the visible application panel. Args: {\"panel\": \"data|preprocessing|dataset|training|evaluation\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "panel": { "type": "string", "enum": PANELS }
            },
            "required": ["panel"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, params: &Map<String, Value>) -> Result<String, String> {
        let panel = params
            .get("panel")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "missing 'panel'".to_string())?;
        if !PANELS.contains(&panel) {
            return Err(format!("unknown panel '{panel}', expected one of {}", PANELS.join(", ")));
        }
        Ok(format!("{UI_REQUEST_PREFIX} switch_panel {panel}"))
    }
}
