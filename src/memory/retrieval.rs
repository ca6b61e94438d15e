//! 检索上下文边界：为 Prompt 提供与当前问题相关的文本片段
//!
//! 真实的 RAG 子系统在外部实现 ContextRetriever；这里提供空实现与按关键词重叠打分的内存实现。

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

/// 检索 trait：按查询返回最相关的 k 条片段
pub trait ContextRetriever: Send + Sync {
    fn retrieve(&self, query: &str, k: usize) -> Vec<String>;
}

/// 空实现：未接入检索时使用
#[derive(Clone, Debug, Default)]
pub struct NoopRetriever;

impl ContextRetriever for NoopRetriever {
    fn retrieve(&self, _query: &str, _k: usize) -> Vec<String> {
        Vec::new()
    }
}

/// 将文本切分为小写词集合，用于简单相似度（词重叠数）
fn tokenize_lower(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 1)
        .collect()
}

/// 内存知识库：按关键词重叠检索（如 EEG 操作说明、通道命名约定）
#[derive(Clone, Default)]
pub struct KeywordRetriever {
    store: Arc<RwLock<Vec<(String, HashSet<String>)>>>,
}

impl KeywordRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents<I, S>(docs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let r = Self::new();
        for d in docs {
            r.add(&d.into());
        }
        r
    }

    pub fn add(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let tokens = tokenize_lower(text);
        if let Ok(mut store) = self.store.write() {
            store.push((text.to_string(), tokens));
        }
    }
}

impl ContextRetriever for KeywordRetriever {
    fn retrieve(&self, query: &str, k: usize) -> Vec<String> {
        let query_tokens = tokenize_lower(query);
        if query_tokens.is_empty() || k == 0 {
            return Vec::new();
        }
        let Ok(store) = self.store.read() else {
            return Vec::new();
        };
        let mut scored: Vec<(usize, &String)> = store
            .iter()
            .map(|(text, doc_tokens)| (query_tokens.intersection(doc_tokens).count(), text))
            .filter(|(s, _)| *s > 0)
            .collect();
        // 稳定排序：同分保持写入顺序
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().take(k).map(|(_, t)| t.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_returns_nothing() {
        assert!(NoopRetriever.retrieve("anything", 3).is_empty());
    }

    #[test]
    fn test_keyword_ranking() {
        let r = KeywordRetriever::with_documents([
            "Bandpass filter removes drift below 1 Hz",
            "Datasets are built from epochs after preprocessing",
            "A notch filter at 50 Hz removes line noise",
        ]);
        let hits = r.retrieve("which filter removes line noise", 2);
        assert_eq!(hits.len(), 2);
        assert!(hits[0].contains("notch"));
        assert!(r.retrieve("zzz", 3).is_empty());
        assert!(r.retrieve("filter", 0).is_empty());
    }
}
