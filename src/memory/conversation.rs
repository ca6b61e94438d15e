//! 短期记忆：对话历史
//!
//! 保留最近 max_size 条消息，超出时从最旧处剪枝；只由编排器写入，
//! 组装 Prompt 时通过 snapshot 取得不可变副本。

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 有界对话日志：任何修改之后都满足 len <= max_size
#[derive(Clone, Debug)]
pub struct ConversationState {
    entries: VecDeque<Message>,
    max_size: usize,
}

impl ConversationState {
    /// max_size 为 0 时按 1 处理
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            entries: VecDeque::with_capacity(max_size.min(256)),
            max_size,
        }
    }

    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.push(Message {
            role,
            content: content.into(),
        });
    }

    pub fn push(&mut self, msg: Message) {
        self.entries.push_back(msg);
        while self.entries.len() > self.max_size {
            self.entries.pop_front();
        }
    }

    /// 不可变副本，供 Prompt 组装使用
    pub fn snapshot(&self) -> Vec<Message> {
        self.entries.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<&Message> {
        self.entries.back()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_holds_after_every_append() {
        let mut conv = ConversationState::new(5);
        for i in 0..23 {
            let role = match i % 3 {
                0 => Role::User,
                1 => Role::Assistant,
                _ => Role::System,
            };
            conv.append(role, format!("msg {i}"));
            assert!(conv.len() <= 5);
        }
        assert_eq!(conv.len(), 5);
    }

    #[test]
    fn test_truncation_is_fifo() {
        let mut conv = ConversationState::new(3);
        for i in 0..5 {
            conv.push(Message::user(format!("{i}")));
        }
        let contents: Vec<String> = conv.snapshot().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["2", "3", "4"]);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut conv = ConversationState::new(10);
        conv.push(Message::user("hello"));
        let mut snap = conv.snapshot();
        snap.push(Message::assistant("not in history"));
        snap[0].content = "changed".to_string();
        assert_eq!(conv.len(), 1);
        assert_eq!(conv.last().map(|m| m.content.as_str()), Some("hello"));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut conv = ConversationState::new(0);
        conv.push(Message::user("a"));
        conv.push(Message::user("b"));
        assert_eq!(conv.max_size(), 1);
        assert_eq!(conv.len(), 1);
        conv.clear();
        assert!(conv.is_empty());
    }
}
