//! 生命周期阶段：从外部应用状态快照推导当前阶段
//!
//! 阶段不存储，每次门控都重新计算；训练进行中时强制为独占的 Training 阶段。

use std::fmt;

use serde::Serialize;

/// 有序的应用生命周期阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Empty,
    DataLoaded,
    Preprocessed,
    DatasetReady,
    Training,
    Trained,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 6] = [
        PipelineStage::Empty,
        PipelineStage::DataLoaded,
        PipelineStage::Preprocessed,
        PipelineStage::DatasetReady,
        PipelineStage::Training,
        PipelineStage::Trained,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Empty => "empty",
            PipelineStage::DataLoaded => "data_loaded",
            PipelineStage::Preprocessed => "preprocessed",
            PipelineStage::DatasetReady => "dataset_ready",
            PipelineStage::Training => "training",
            PipelineStage::Trained => "trained",
        }
    }

    /// 是否为独占阶段（只允许导航）
    pub fn is_exclusive(&self) -> bool {
        matches!(self, PipelineStage::Training)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 外部应用状态的只读快照
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AppSnapshot {
    pub has_raw_data: bool,
    pub is_preprocessed: bool,
    pub has_dataset: bool,
    /// 独占的长时间操作（训练）是否进行中
    pub training_active: bool,
    pub has_trained_model: bool,
}

/// 状态来源：读取快照不得产生副作用
pub trait AppStateSource: Send + Sync {
    fn snapshot(&self) -> AppSnapshot;
}

/// 固定快照（测试与无界面场景）
#[derive(Clone, Copy, Debug, Default)]
pub struct StaticAppState(pub AppSnapshot);

impl AppStateSource for StaticAppState {
    fn snapshot(&self) -> AppSnapshot {
        self.0
    }
}

/// 取前置条件满足的最高阶段；训练进行中时无条件返回 Training
pub fn compute_stage(state: &AppSnapshot) -> PipelineStage {
    if state.training_active {
        return PipelineStage::Training;
    }
    if state.has_trained_model {
        PipelineStage::Trained
    } else if state.has_dataset {
        PipelineStage::DatasetReady
    } else if state.is_preprocessed {
        PipelineStage::Preprocessed
    } else if state.has_raw_data {
        PipelineStage::DataLoaded
    } else {
        PipelineStage::Empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progression() {
        let mut s = AppSnapshot::default();
        assert_eq!(compute_stage(&s), PipelineStage::Empty);
        s.has_raw_data = true;
        assert_eq!(compute_stage(&s), PipelineStage::DataLoaded);
        s.is_preprocessed = true;
        assert_eq!(compute_stage(&s), PipelineStage::Preprocessed);
        s.has_dataset = true;
        assert_eq!(compute_stage(&s), PipelineStage::DatasetReady);
        s.has_trained_model = true;
        assert_eq!(compute_stage(&s), PipelineStage::Trained);
    }

    #[test]
    fn test_highest_satisfied_prerequisite_wins() {
        // 数据集存在但未标记原始数据：仍按最高满足的阶段
        let s = AppSnapshot {
            has_dataset: true,
            ..Default::default()
        };
        assert_eq!(compute_stage(&s), PipelineStage::DatasetReady);
    }

    #[test]
    fn test_training_overrides_everything() {
        let s = AppSnapshot {
            has_raw_data: true,
            is_preprocessed: true,
            has_dataset: true,
            training_active: true,
            has_trained_model: true,
        };
        assert_eq!(compute_stage(&s), PipelineStage::Training);
        assert!(PipelineStage::Training.is_exclusive());
    }

    #[test]
    fn test_stage_order() {
        assert!(PipelineStage::Empty < PipelineStage::DataLoaded);
        assert!(PipelineStage::Training < PipelineStage::Trained);
        assert_eq!(PipelineStage::ALL.len(), 6);
    }
}
