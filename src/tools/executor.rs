//! 工具执行器
//!
//! 持有共享的 ToolRegistry 与超时，execute 在超时内调用工具；
//! 未知工具、工具返回 Err、超时分别转为 HallucinatedTool / ToolExecutionFailed / ToolTimeout；
//! 工具 panic 被捕获并视为一次失败的执行，不会拖垮控制器任务；
//! 每次调用输出结构化审计日志（JSON）。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde_json::{Map, Value};
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::{ToolContext, ToolRegistry};

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    pub async fn execute(
        &self,
        tool_name: &str,
        ctx: &ToolContext,
        params: &Map<String, Value>,
    ) -> Result<String, AgentError> {
        let Some(tool) = self.registry.get(tool_name) else {
            tracing::warn!(tool = tool_name, "unknown tool requested");
            return Err(AgentError::HallucinatedTool(tool_name.to_string()));
        };

        let start = Instant::now();
        let result = timeout(
            self.timeout,
            AssertUnwindSafe(tool.execute(ctx, params)).catch_unwind(),
        )
        .await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(Ok(_))) => (true, "ok"),
            Ok(Ok(Err(_))) => (false, "error"),
            Ok(Err(_)) => (false, "panic"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "stage": ctx.stage.as_str(),
            "turn": ctx.turn_id.to_string(),
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(params),
        });
        tracing::info!(audit = %audit, "tool");

        match result {
            Ok(Ok(Ok(content))) => Ok(content),
            Ok(Ok(Err(e))) => Err(AgentError::ToolExecutionFailed(format!("{tool_name}: {e}"))),
            Ok(Err(_)) => {
                tracing::error!(tool = tool_name, "tool panicked");
                Err(AgentError::ToolExecutionFailed(format!(
                    "{tool_name}: panicked"
                )))
            }
            Err(_) => Err(AgentError::ToolTimeout(tool_name.to_string())),
        }
    }
}

fn args_preview(params: &Map<String, Value>) -> String {
    let s = Value::Object(params.clone()).to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
