//! 流程阶段：阶段推导与阶段工具白名单

pub mod stage;
pub mod table;

pub use stage::{compute_stage, AppSnapshot, AppStateSource, PipelineStage, StaticAppState};
pub use table::{StageConfig, StageTable, NAVIGATION_TOOL};
