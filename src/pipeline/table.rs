//! 阶段配置表：每个阶段的工具白名单与引导文本
//!
//! 构造时校验：每个阶段都有条目、每个白名单都含导航工具、独占阶段只含导航工具。
//! 查询缺失的阶段时失败关闭（空白名单），绝不放行。

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::core::AgentError;
use crate::pipeline::PipelineStage;

/// 所有阶段都必须允许的导航工具
pub const NAVIGATION_TOOL: &str = "switch_panel";

/// 单个阶段的配置
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StageConfig {
    pub allowed_tools: BTreeSet<String>,
    pub guidance: String,
}

impl StageConfig {
    pub fn new<I, S>(tools: I, guidance: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_tools: tools.into_iter().map(Into::into).collect(),
            guidance: guidance.into(),
        }
    }

    /// 最严格配置：不允许任何工具
    pub fn locked() -> Self {
        Self {
            allowed_tools: BTreeSet::new(),
            guidance: "This stage is not configured; no tools are available.".to_string(),
        }
    }

    pub fn allows(&self, tool: &str) -> bool {
        self.allowed_tools.contains(tool)
    }

    pub fn allowed_list(&self) -> String {
        self.allowed_tools.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// 阶段 -> 配置 的只读表，初始化后可跨线程共享
#[derive(Clone, Debug)]
pub struct StageTable {
    entries: HashMap<PipelineStage, StageConfig>,
    locked: StageConfig,
}

impl StageTable {
    pub fn new(entries: HashMap<PipelineStage, StageConfig>) -> Result<Self, AgentError> {
        for stage in PipelineStage::ALL {
            let cfg = entries
                .get(&stage)
                .ok_or_else(|| AgentError::Config(format!("stage '{stage}' has no configuration")))?;
            if !cfg.allows(NAVIGATION_TOOL) {
                return Err(AgentError::Config(format!(
                    "stage '{stage}' must allow '{NAVIGATION_TOOL}'"
                )));
            }
            if stage.is_exclusive() && cfg.allowed_tools.len() != 1 {
                return Err(AgentError::Config(format!(
                    "exclusive stage '{stage}' may only allow '{NAVIGATION_TOOL}'"
                )));
            }
        }
        Ok(Self {
            entries,
            locked: StageConfig::locked(),
        })
    }

    /// 查询；缺失时返回空白名单
    pub fn config(&self, stage: PipelineStage) -> &StageConfig {
        self.entries.get(&stage).unwrap_or(&self.locked)
    }

    pub fn allows(&self, stage: PipelineStage, tool: &str) -> bool {
        self.config(stage).allows(tool)
    }

    /// 阶段违规时合成的失败描述（含当前阶段与允许的工具）
    pub fn describe_violation(&self, stage: PipelineStage, tool: &str) -> String {
        let cfg = self.config(stage);
        format!(
            "tool '{tool}' is not available in the current stage '{stage}'. Allowed tools: [{}]. {}",
            cfg.allowed_list(),
            cfg.guidance
        )
    }

    /// 内置阶段表（EEG 分析流程：加载 -> 预处理 -> 构建数据集 -> 训练 -> 评估）
    pub fn default_table() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            PipelineStage::Empty,
            StageConfig::new(
                [NAVIGATION_TOOL, "load_data"],
                "No recording is loaded. Ask the user which files to load, then call load_data.",
            ),
        );
        entries.insert(
            PipelineStage::DataLoaded,
            StageConfig::new(
                [NAVIGATION_TOOL, "load_data", "inspect_data", "preprocess", "clear_data"],
                "Raw EEG data is loaded. Inspect it or run preprocessing (filtering, resampling).",
            ),
        );
        entries.insert(
            PipelineStage::Preprocessed,
            StageConfig::new(
                [
                    NAVIGATION_TOOL,
                    "load_data",
                    "inspect_data",
                    "preprocess",
                    "build_dataset",
                    "clear_data",
                ],
                "Data is preprocessed. Build a labelled dataset from epochs before training.",
            ),
        );
        entries.insert(
            PipelineStage::DatasetReady,
            StageConfig::new(
                [
                    NAVIGATION_TOOL,
                    "inspect_data",
                    "build_dataset",
                    "start_training",
                    "clear_data",
                ],
                "A dataset is ready. Training can be started.",
            ),
        );
        entries.insert(
            PipelineStage::Training,
            StageConfig::new(
                [NAVIGATION_TOOL],
                "Training is running. Only navigation is possible until it finishes.",
            ),
        );
        entries.insert(
            PipelineStage::Trained,
            StageConfig::new(
                [
                    NAVIGATION_TOOL,
                    "inspect_data",
                    "start_training",
                    "evaluate_model",
                    "clear_data",
                ],
                "A model has been trained. Evaluate it or retrain with different settings.",
            ),
        );
        Self {
            entries,
            locked: StageConfig::locked(),
        }
    }
}

impl Default for StageTable {
    fn default() -> Self {
        Self::default_table()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_is_valid() {
        let table = StageTable::default_table();
        let entries: HashMap<_, _> = PipelineStage::ALL
            .iter()
            .map(|s| (*s, table.config(*s).clone()))
            .collect();
        assert!(StageTable::new(entries).is_ok());
        for stage in PipelineStage::ALL {
            assert!(table.allows(stage, NAVIGATION_TOOL));
        }
    }

    #[test]
    fn test_training_is_full_lock() {
        let table = StageTable::default_table();
        let cfg = table.config(PipelineStage::Training);
        assert_eq!(cfg.allowed_tools.len(), 1);
        assert!(!table.allows(PipelineStage::Training, "start_training"));
    }

    #[test]
    fn test_missing_stage_fails_closed() {
        let table = StageTable {
            entries: HashMap::new(),
            locked: StageConfig::locked(),
        };
        let cfg = table.config(PipelineStage::DataLoaded);
        assert!(cfg.allowed_tools.is_empty());
        assert!(!table.allows(PipelineStage::DataLoaded, NAVIGATION_TOOL));
    }

    #[test]
    fn test_validation_rejects_bad_tables() {
        let mut entries: HashMap<_, _> = PipelineStage::ALL
            .iter()
            .map(|s| (*s, StageConfig::new([NAVIGATION_TOOL], "ok")))
            .collect();
        assert!(StageTable::new(entries.clone()).is_ok());

        entries.insert(PipelineStage::Empty, StageConfig::new(["load_data"], "no nav"));
        assert!(matches!(StageTable::new(entries.clone()), Err(AgentError::Config(_))));

        entries.insert(PipelineStage::Empty, StageConfig::new([NAVIGATION_TOOL], "ok"));
        entries.insert(
            PipelineStage::Training,
            StageConfig::new([NAVIGATION_TOOL, "load_data"], "leaky lock"),
        );
        assert!(matches!(StageTable::new(entries.clone()), Err(AgentError::Config(_))));

        entries.remove(&PipelineStage::Trained);
        assert!(matches!(StageTable::new(entries), Err(AgentError::Config(_))));
    }

    #[test]
    fn test_violation_names_stage_and_tools() {
        let table = StageTable::default_table();
        let msg = table.describe_violation(PipelineStage::Empty, "start_training");
        assert!(msg.contains("start_training"));
        assert!(msg.contains("empty"));
        assert!(msg.contains("load_data"));
        assert!(msg.contains(NAVIGATION_TOOL));
    }
}
