//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock / Scripted）实现 LlmClient：complete_stream 产出流式文本片段，流结束即成功。
//! 后端无需支持原生 tool calling，工具意图只由 CommandParser 解释。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::memory::Message;

/// 流式文本片段
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, String>> + Send>>;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 流式完成，返回文本片段流；流结束即生成成功
    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, String>;

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
