//! Mock 与脚本化 LLM 客户端（无需 API）
//!
//! MockLlmClient 回显最后一条用户消息；ScriptedLlmClient 依次返回预设回复并按固定字符数切片流式输出，
//! 同时记录每次调用收到的消息，便于测试断言派发次数与 Prompt 内容。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{LlmClient, TokenStream};
use crate::memory::{Message, Role};

/// Mock 客户端：以纯文本回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        let content = format!("Echo from Mock: {last_user}");
        Ok(Box::pin(stream::iter(vec![Ok(content)])))
    }
}

/// 单条脚本回复：成功文本、流中途出错、或请求本身失败
#[derive(Clone, Debug)]
pub enum ScriptedReply {
    Text(String),
    StreamError { partial: String, error: String },
    RequestError(String),
}

/// 脚本化客户端：按顺序消费回复；脚本耗尽后返回纯文本 "(script exhausted)"
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<ScriptedReply>>,
    calls: Mutex<Vec<Vec<Message>>>,
    chunk_chars: usize,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_replies(replies.into_iter().map(|r| ScriptedReply::Text(r.into())))
    }

    pub fn with_replies(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
            chunk_chars: 4,
        }
    }

    /// 流式切片大小（字符数）
    pub fn with_chunk_chars(mut self, n: usize) -> Self {
        self.chunk_chars = n.max(1);
        self
    }

    /// 已收到的生成请求数
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// 第 i 次请求的消息列表
    pub fn request(&self, i: usize) -> Option<Vec<Message>> {
        self.calls.lock().ok().and_then(|c| c.get(i).cloned())
    }

    fn next_reply(&self, messages: &[Message]) -> ScriptedReply {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        self.replies
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .unwrap_or_else(|| ScriptedReply::Text("(script exhausted)".to_string()))
    }

    fn chunks(&self, text: &str) -> Vec<Result<String, String>> {
        let chars: Vec<char> = text.chars().collect();
        chars
            .chunks(self.chunk_chars)
            .map(|c| Ok(c.iter().collect()))
            .collect()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, String> {
        match self.next_reply(messages) {
            ScriptedReply::Text(t) => Ok(Box::pin(stream::iter(self.chunks(&t)))),
            ScriptedReply::StreamError { partial, error } => {
                let mut items = self.chunks(&partial);
                items.push(Err(error));
                Ok(Box::pin(stream::iter(items)))
            }
            ScriptedReply::RequestError(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    async fn text_of(client: &dyn LlmClient, messages: &[Message]) -> Result<String, String> {
        let mut s = client.complete_stream(messages).await?;
        let mut out = String::new();
        while let Some(p) = s.next().await {
            out.push_str(&p?);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn test_mock_echoes_last_user() {
        let out = text_of(
            &MockLlmClient,
            &[Message::user("first"), Message::assistant("x"), Message::user("second")],
        )
        .await
        .unwrap();
        assert!(out.ends_with("second"));
    }

    #[tokio::test]
    async fn test_scripted_streams_in_order() {
        let client = ScriptedLlmClient::new(["hello world", "bye"]).with_chunk_chars(3);
        let mut s = client.complete_stream(&[Message::user("hi")]).await.unwrap();
        let mut parts = Vec::new();
        while let Some(p) = s.next().await {
            parts.push(p.unwrap());
        }
        assert_eq!(parts, vec!["hel", "lo ", "wor", "ld"]);
        assert_eq!(text_of(&client, &[]).await.unwrap(), "bye");
        assert_eq!(text_of(&client, &[]).await.unwrap(), "(script exhausted)");
        assert_eq!(client.call_count(), 3);
        assert_eq!(client.request(0).unwrap()[0].content, "hi");
    }
}
