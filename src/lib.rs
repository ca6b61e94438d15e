//! EEG Copilot - 脑电分析助手的智能体编排核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、状态定义、会话监管、装配与主控任务
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock / Scripted）
//! - **memory**: 有界对话历史与检索上下文边界
//! - **observability**: tracing 初始化
//! - **pipeline**: 应用生命周期阶段推导与阶段工具白名单
//! - **react**: 解析、校验、循环检测、流式闸门、Prompt 组装、生成 worker、主控状态机
//! - **tools**: 工具 trait、注册表、执行器与演示工作台

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod pipeline;
pub mod react;
pub mod tools;
