//! 记忆层：短期对话历史与外部检索上下文

pub mod conversation;
pub mod retrieval;

pub use conversation::{ConversationState, Message, Role};
pub use retrieval::{ContextRetriever, KeywordRetriever, NoopRetriever};
