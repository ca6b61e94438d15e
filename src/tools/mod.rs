pub mod executor;
pub mod navigation;
pub mod registry;
pub mod schema;
pub mod workbench;

pub use executor::ToolExecutor;
pub use navigation::SwitchPanelTool;
pub use registry::{Tool, ToolContext, ToolDescriptor, ToolRegistry, UI_REQUEST_PREFIX};
pub use schema::tool_call_schema_json;
pub use workbench::{
    BuildDatasetTool, ClearDataTool, EvaluateModelTool, InspectDataTool, LoadDataTool,
    PreprocessTool, StartTrainingTool, Workbench,
};
