//! 流式输出闸门：决定增量文本是直接推给界面，还是先缓冲
//!
//! 开头不足 prefix_chars 个字符时总是缓冲，用于区分工具调用负载（对用户隐藏）与自然语言（实时流出）。
//! 一旦缓冲内容呈现工具调用特征，本次生成余下部分全部锁定为缓冲。
//! 自然语言之后内联出现的调用对象（`{"command": ...`）同样触发锁定；
//! 尚不能判定的 `{` 及其后内容先扣住，不推送。
//! 早期嗅探对很短的负载并不可靠，所以生成结束后由编排器按解析结果调用 finish 做最终裁决：
//! 纯文本时补发尚未流出的部分，工具调用或待重试的错误输出则丢弃。

use crate::react::parser::{has_tool_call_signature, NAME_KEYS};

/// 某个 `{` 之后的内容能否判定为工具调用对象的开头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BraceStart {
    Call,
    Undecided,
    Plain,
}

fn classify_brace(tail: &str) -> BraceStart {
    let rest = tail.strip_prefix('{').unwrap_or(tail).trim_start();
    let Some(key) = rest.strip_prefix('"') else {
        return if rest.is_empty() {
            BraceStart::Undecided
        } else {
            BraceStart::Plain
        };
    };
    match key.find('"') {
        Some(end) if NAME_KEYS.iter().any(|k| *k == &key[..end]) => BraceStart::Call,
        Some(_) => BraceStart::Plain,
        None if NAME_KEYS.iter().any(|k| k.starts_with(key)) => BraceStart::Undecided,
        None => BraceStart::Plain,
    }
}

#[derive(Debug, Clone)]
pub struct StreamGate {
    prefix_chars: usize,
    buffer: String,
    /// 已推送给界面的字节数
    flushed: usize,
    latched: bool,
}

impl StreamGate {
    pub fn new(prefix_chars: usize) -> Self {
        Self {
            prefix_chars,
            buffer: String::new(),
            flushed: 0,
            latched: false,
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.flushed = 0;
        self.latched = false;
    }

    /// 追加一个片段，返回此刻可以推送给界面的文本
    pub fn push(&mut self, chunk: &str) -> Option<String> {
        self.buffer.push_str(chunk);
        if self.latched {
            return None;
        }
        if has_tool_call_signature(&self.buffer) {
            self.latched = true;
            tracing::debug!("stream gate latched on tool-call signature");
            return None;
        }
        let mut hold = None;
        for (i, _) in self.buffer[self.flushed..].match_indices('{') {
            let start = self.flushed + i;
            match classify_brace(&self.buffer[start..]) {
                BraceStart::Call => {
                    self.latched = true;
                    tracing::debug!("stream gate latched on inline tool call");
                    return None;
                }
                BraceStart::Undecided => {
                    hold.get_or_insert(start);
                }
                BraceStart::Plain => {}
            }
        }
        if self.flushed == 0 && self.buffer.trim_start().chars().count() < self.prefix_chars {
            return None;
        }
        self.take_until(hold.unwrap_or(self.buffer.len()))
    }

    /// 生成结束后的最终裁决：reveal 为 true 时补发剩余文本
    pub fn finish(&mut self, reveal: bool) -> Option<String> {
        if reveal {
            self.take_until(self.buffer.len())
        } else {
            None
        }
    }

    /// 是否已有部分文本推送给了界面
    pub fn has_flushed(&self) -> bool {
        self.flushed > 0
    }

    /// 已推送的文本里是否包含工具调用负载（需要界面撤回）
    pub fn revealed_payload(&self) -> bool {
        let shown = &self.buffer[..self.flushed];
        has_tool_call_signature(shown)
            || shown
                .match_indices('{')
                .any(|(i, _)| classify_brace(&shown[i..]) == BraceStart::Call)
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    fn take_until(&mut self, end: usize) -> Option<String> {
        if self.flushed >= end {
            return None;
        }
        let out = self.buffer[self.flushed..end].to_string();
        self.flushed = end;
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prose_streams_after_prefix() {
        let mut g = StreamGate::new(10);
        assert_eq!(g.push("The "), None);
        assert_eq!(g.push("recording "), Some("The recording ".to_string()));
        assert_eq!(g.push("has 64 channels."), Some("has 64 channels.".to_string()));
        assert_eq!(g.finish(true), None);
        assert!(!g.is_latched());
    }

    #[test]
    fn test_tool_payload_is_hidden() {
        let mut g = StreamGate::new(10);
        assert_eq!(g.push("{\"comm"), None);
        assert!(g.is_latched());
        assert_eq!(g.push("and\": \"load_data\"}"), None);
        assert_eq!(g.finish(false), None);
        assert!(!g.has_flushed());
        assert_eq!(g.text(), "{\"command\": \"load_data\"}");
    }

    #[test]
    fn test_fence_after_prose_latches() {
        let mut g = StreamGate::new(5);
        assert_eq!(g.push("Loading now. "), Some("Loading now. ".to_string()));
        assert_eq!(g.push("```json\n{"), None);
        assert!(g.is_latched());
        assert!(g.has_flushed());
    }

    #[test]
    fn test_short_reply_revealed_at_end() {
        let mut g = StreamGate::new(10);
        assert_eq!(g.push("Yes."), None);
        assert_eq!(g.finish(true), Some("Yes.".to_string()));
        g.reset();
        assert_eq!(g.text(), "");
    }

    #[test]
    fn test_inline_call_after_prose_latches() {
        let mut g = StreamGate::new(10);
        assert_eq!(g.push("I'll load "), Some("I'll load ".to_string()));
        assert_eq!(g.push("them now. {\""), Some("them now. ".to_string()));
        assert_eq!(g.push("comm"), None);
        assert!(!g.is_latched());
        assert_eq!(g.push("and\": \"load_data\"}"), None);
        assert!(g.is_latched());
        assert_eq!(g.finish(false), None);
        assert!(g.has_flushed());
        assert!(!g.revealed_payload());
    }

    #[test]
    fn test_plain_braces_still_stream() {
        let mut g = StreamGate::new(5);
        assert_eq!(g.push("Bands {"), Some("Bands ".to_string()));
        assert_eq!(
            g.push("alpha, beta} look fine."),
            Some("{alpha, beta} look fine.".to_string())
        );
        assert!(!g.is_latched());
        assert!(!g.revealed_payload());
    }

    #[test]
    fn test_brace_key_classification() {
        assert_eq!(classify_brace("{"), BraceStart::Undecided);
        assert_eq!(classify_brace("{ \"tool_na"), BraceStart::Undecided);
        assert_eq!(classify_brace("{\"tool\": 1"), BraceStart::Call);
        assert_eq!(classify_brace("{\"panel\""), BraceStart::Plain);
        assert_eq!(classify_brace("{x"), BraceStart::Plain);
    }
}
