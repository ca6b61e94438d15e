//! 工作台：内存中的应用状态与一组演示工具
//!
//! 真实的数据加载、预处理、训练由外部应用提供；这里的实现只维护阶段推导所需的标志位，
//! 供命令行前端与集成测试跑通完整流程。训练在后台任务中运行，工具调用立即返回。

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::pipeline::{AppSnapshot, AppStateSource};
use crate::tools::{Tool, ToolContext};

#[derive(Debug, Default)]
struct WorkbenchState {
    files: Vec<String>,
    filters: Vec<String>,
    has_dataset: bool,
    training_active: bool,
    has_trained_model: bool,
}

/// 可共享的工作台句柄
#[derive(Clone, Default)]
pub struct Workbench {
    inner: Arc<RwLock<WorkbenchState>>,
    training_duration: Duration,
}

impl Workbench {
    pub fn new(training_duration: Duration) -> Self {
        Self {
            inner: Arc::default(),
            training_duration,
        }
    }

    fn update<R>(&self, f: impl FnOnce(&mut WorkbenchState) -> R) -> Result<R, String> {
        let mut guard = self.inner.write().map_err(|_| "workbench state poisoned".to_string())?;
        Ok(f(&mut guard))
    }

    fn read<R>(&self, f: impl FnOnce(&WorkbenchState) -> R) -> Result<R, String> {
        let guard = self.inner.read().map_err(|_| "workbench state poisoned".to_string())?;
        Ok(f(&guard))
    }

    /// 后台训练结束：清除训练中标志并记下已有模型
    fn finish_training(&self, epochs: u64) -> Result<(), String> {
        let done = self.update(|s| {
            s.training_active = false;
            s.has_trained_model = true;
        });
        match &done {
            Ok(()) => tracing::info!(epochs, "training finished"),
            Err(e) => tracing::error!(error = %e, epochs, "failed to record training completion"),
        }
        done
    }

    /// 注册本工作台的全部演示工具
    pub fn tools(&self) -> Vec<Arc<dyn Tool>> {
        vec![
            Arc::new(LoadDataTool(self.clone())),
            Arc::new(InspectDataTool(self.clone())),
            Arc::new(PreprocessTool(self.clone())),
            Arc::new(BuildDatasetTool(self.clone())),
            Arc::new(StartTrainingTool(self.clone())),
            Arc::new(EvaluateModelTool(self.clone())),
            Arc::new(ClearDataTool(self.clone())),
        ]
    }
}

impl AppStateSource for Workbench {
    fn snapshot(&self) -> AppSnapshot {
        self.read(|s| AppSnapshot {
            has_raw_data: !s.files.is_empty(),
            is_preprocessed: !s.filters.is_empty(),
            has_dataset: s.has_dataset,
            training_active: s.training_active,
            has_trained_model: s.has_trained_model,
        })
        .unwrap_or_default()
    }
}

fn str_param<'a>(params: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

pub struct LoadDataTool(Workbench);

#[async_trait]
impl Tool for LoadDataTool {
    fn name(&self) -> &str {
        "load_data"
    }

    fn description(&self) -> &str {
        "Load EEG recordings. Args: {\"paths\": [\"subject01.edf\", ...]}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "paths": { "type": "array", "items": { "type": "string" } } },
            "required": ["paths"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, params: &Map<String, Value>) -> Result<String, String> {
        let paths: Vec<String> = params
            .get("paths")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|p| p.as_str().map(String::from)).collect())
            .unwrap_or_default();
        if paths.is_empty() {
            return Err("no files given in 'paths'".to_string());
        }
        let n = paths.len();
        let total = self.0.update(|s| {
            s.files.extend(paths);
            s.files.len()
        })?;
        Ok(format!("Loaded {n} file(s); {total} file(s) in the workspace."))
    }
}

pub struct InspectDataTool(Workbench);

#[async_trait]
impl Tool for InspectDataTool {
    fn name(&self) -> &str {
        "inspect_data"
    }

    fn description(&self) -> &str {
        "Summarize loaded files, applied filters and dataset/model status. No args."
    }

    async fn execute(&self, ctx: &ToolContext, _params: &Map<String, Value>) -> Result<String, String> {
        self.0.read(|s| {
            format!(
                "stage={}; files=[{}]; filters=[{}]; dataset={}; model={}",
                ctx.stage,
                s.files.join(", "),
                s.filters.join(", "),
                s.has_dataset,
                s.has_trained_model
            )
        })
    }
}

pub struct PreprocessTool(Workbench);

#[async_trait]
impl Tool for PreprocessTool {
    fn name(&self) -> &str {
        "preprocess"
    }

    fn description(&self) -> &str {
        "Apply a preprocessing step. Args: {\"step\": \"bandpass|notch|resample\", \"value\": \"1-40\"}"
    }

    async fn execute(&self, _ctx: &ToolContext, params: &Map<String, Value>) -> Result<String, String> {
        let step = str_param(params, "step").ok_or_else(|| "missing 'step'".to_string())?;
        if !matches!(step, "bandpass" | "notch" | "resample") {
            return Err(format!("unsupported step '{step}'"));
        }
        let label = match str_param(params, "value") {
            Some(v) => format!("{step}({v})"),
            None => step.to_string(),
        };
        self.0.update(|s| s.filters.push(label.clone()))?;
        Ok(format!("Applied {label}."))
    }
}

pub struct BuildDatasetTool(Workbench);

#[async_trait]
impl Tool for BuildDatasetTool {
    fn name(&self) -> &str {
        "build_dataset"
    }

    fn description(&self) -> &str {
        "Cut epochs from the preprocessed data and build a labelled dataset. Args: {\"epoch_secs\": 2.0}"
    }

    async fn execute(&self, _ctx: &ToolContext, params: &Map<String, Value>) -> Result<String, String> {
        let epoch = params.get("epoch_secs").and_then(|v| v.as_f64()).unwrap_or(2.0);
        if epoch <= 0.0 {
            return Err("epoch_secs must be positive".to_string());
        }
        self.0.update(|s| s.has_dataset = true)?;
        Ok(format!("Dataset built with {epoch}s epochs."))
    }
}

pub struct StartTrainingTool(Workbench);

#[async_trait]
impl Tool for StartTrainingTool {
    fn name(&self) -> &str {
        "start_training"
    }

    fn description(&self) -> &str {
        "Start model training in the background. Args: {\"epochs\": 10}"
    }

    async fn execute(&self, _ctx: &ToolContext, params: &Map<String, Value>) -> Result<String, String> {
        let epochs = params.get("epochs").and_then(|v| v.as_u64()).unwrap_or(10);
        let started = self.0.update(|s| {
            if s.training_active {
                false
            } else {
                s.training_active = true;
                true
            }
        })?;
        if !started {
            return Err("training is already running".to_string());
        }
        // 长时间操作自行放到后台，立即把控制权还给编排器
        let wb = self.0.clone();
        tokio::spawn(async move {
            tokio::time::sleep(wb.training_duration).await;
            // 失败已在内部记录日志
            let _ = wb.finish_training(epochs);
        });
        Ok(format!("Training started for {epochs} epochs."))
    }
}

pub struct EvaluateModelTool(Workbench);

#[async_trait]
impl Tool for EvaluateModelTool {
    fn name(&self) -> &str {
        "evaluate_model"
    }

    fn description(&self) -> &str {
        "Evaluate the trained model on held-out epochs. No args."
    }

    async fn execute(&self, _ctx: &ToolContext, _params: &Map<String, Value>) -> Result<String, String> {
        let trained = self.0.read(|s| s.has_trained_model)?;
        if !trained {
            return Err("no trained model".to_string());
        }
        Ok("Evaluation finished; see the evaluation panel for metrics.".to_string())
    }
}

/// 清空工作区：不可逆，执行前必须确认
pub struct ClearDataTool(Workbench);

#[async_trait]
impl Tool for ClearDataTool {
    fn name(&self) -> &str {
        "clear_data"
    }

    fn description(&self) -> &str {
        "Remove all loaded data, preprocessing, datasets and models from the workspace. No args. Irreversible."
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    async fn execute(&self, _ctx: &ToolContext, _params: &Map<String, Value>) -> Result<String, String> {
        self.0.update(|s| {
            if s.training_active {
                return Err("cannot clear while training is running".to_string());
            }
            *s = WorkbenchState::default();
            Ok("Workspace cleared.".to_string())
        })?
    }
}
