//! LoopDetector：检测模型反复发出同一调用
//!
//! 维护最近 K 个调用签名（工具名 + 序列化参数）的环形缓冲，记录后统计当前签名出现次数，
//! 达到阈值即判定为循环。签名只用于相等比较，从不执行。

use std::collections::VecDeque;

use serde_json::Value;

use crate::react::ToolCall;

pub const DEFAULT_LOOP_WINDOW: usize = 10;
pub const DEFAULT_LOOP_THRESHOLD: usize = 3;

/// (tool_name, serialized_parameters)；参数按键排序序列化，键顺序不影响相等
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LoopSignature {
    pub tool_name: String,
    pub serialized_parameters: String,
}

impl LoopSignature {
    pub fn new(tool_name: impl Into<String>, serialized_parameters: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            serialized_parameters: serialized_parameters.into(),
        }
    }
}

impl From<&ToolCall> for LoopSignature {
    fn from(call: &ToolCall) -> Self {
        let mut params = String::new();
        write_canonical(&Value::Object(call.parameters.clone()), &mut params);
        Self::new(call.name.clone(), params)
    }
}

/// 键排序的紧凑 JSON，不依赖 Map 的内部顺序
fn write_canonical(v: &Value, out: &mut String) {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*k).clone()).to_string());
                out.push(':');
                write_canonical(&map[k.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct LoopDetector {
    recent: VecDeque<LoopSignature>,
    window: usize,
    threshold: usize,
}

impl LoopDetector {
    pub fn new(window: usize, threshold: usize) -> Self {
        let window = window.max(1);
        Self {
            recent: VecDeque::with_capacity(window),
            window,
            threshold: threshold.max(1),
        }
    }

    /// 追加签名后统计窗口内的出现次数，达到阈值返回 true
    pub fn record_and_check(&mut self, signature: LoopSignature) -> bool {
        self.recent.push_back(signature);
        if self.recent.len() > self.window {
            self.recent.pop_front();
        }
        let Some(latest) = self.recent.back() else {
            return false;
        };
        let count = self.recent.iter().filter(|s| *s == latest).count();
        count >= self.threshold
    }

    pub fn clear(&mut self) {
        self.recent.clear();
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self::new(DEFAULT_LOOP_WINDOW, DEFAULT_LOOP_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn sig(name: &str, v: Value) -> LoopSignature {
        let params: Map<String, Value> = v.as_object().cloned().unwrap_or_default();
        LoopSignature::from(&ToolCall::new(name, params))
    }

    #[test]
    fn test_threshold_boundary() {
        let mut d = LoopDetector::default();
        for _ in 0..DEFAULT_LOOP_THRESHOLD - 1 {
            assert!(!d.record_and_check(sig("load_data", json!({"paths": ["a"]}))));
        }
        assert!(d.record_and_check(sig("load_data", json!({"paths": ["a"]}))));
    }

    #[test]
    fn test_different_params_do_not_count() {
        let mut d = LoopDetector::default();
        assert!(!d.record_and_check(sig("preprocess", json!({"step": "notch"}))));
        assert!(!d.record_and_check(sig("preprocess", json!({"step": "bandpass"}))));
        assert!(!d.record_and_check(sig("preprocess", json!({"step": "resample"}))));
    }

    #[test]
    fn test_key_order_is_irrelevant() {
        let a = sig("preprocess", json!({"step": "notch", "value": "50"}));
        let b = sig("preprocess", json!({"value": "50", "step": "notch"}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_window_eviction() {
        let mut d = LoopDetector::new(3, 2);
        assert!(!d.record_and_check(sig("a", json!({}))));
        assert!(!d.record_and_check(sig("b", json!({}))));
        assert!(!d.record_and_check(sig("c", json!({}))));
        assert!(!d.record_and_check(sig("d", json!({}))));
        // "a" 已被挤出窗口
        assert!(!d.record_and_check(sig("a", json!({}))));
        assert_eq!(d.len(), 3);
        assert!(d.record_and_check(sig("a", json!({}))));
        d.clear();
        assert!(d.is_empty());
    }
}
