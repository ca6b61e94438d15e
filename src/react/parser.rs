//! CommandParser：从模型输出中提取工具调用
//!
//! 模型回复可能是纯文本，也可能在说明文字中夹带一个或多个 JSON 调用（```json 围栏或行内）。
//! 接受 `{"command": ..., "parameters": {...}}` 与 `{"tool_name": ..., "parameters": {...}}`（以及 `tool`/`args` 别名），
//! 围栏内也可以是调用数组。解析失败从不 panic；「看起来想调用工具但解析失败」与普通文本区分开，
//! 由编排器决定是否重试生成。

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

/// 命令名字段（按优先级）
pub(crate) const NAME_KEYS: [&str; 3] = ["command", "tool_name", "tool"];
/// 参数字段
const PARAM_KEYS: [&str; 2] = ["parameters", "args"];

/// 一次结构化工具调用
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolCall {
    pub name: String,
    pub parameters: Map<String, Value>,
    /// 模型自报的置信度（可选）
    pub confidence: Option<f64>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            parameters,
            confidence: None,
        }
    }
}

/// 解析结论
#[derive(Clone, Debug, PartialEq)]
pub enum ParsedOutput {
    ToolCalls(Vec<ToolCall>),
    /// 普通文本回复
    Text,
    /// 像是尝试调用工具，但无法解析
    Malformed { reason: String },
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").expect("fence regex"))
}

/// 提取全部工具调用；没有结构化调用时返回 None（普通文本回复，不是错误）
pub fn parse_commands(raw: &str) -> Option<Vec<ToolCall>> {
    let scan = scan(raw);
    if scan.calls.is_empty() {
        None
    } else {
        Some(scan.calls)
    }
}

/// 完整分类：工具调用 / 文本 / 格式错误的调用尝试
pub fn classify_output(raw: &str) -> ParsedOutput {
    let scan = scan(raw);
    if !scan.calls.is_empty() {
        return ParsedOutput::ToolCalls(scan.calls);
    }
    match scan.problems.into_iter().next() {
        Some(reason) => ParsedOutput::Malformed { reason },
        None => ParsedOutput::Text,
    }
}

/// 流式早期嗅探：文本开头是否像工具调用负载（以花括号或命令关键字开头，或含围栏代码块）
pub fn has_tool_call_signature(text: &str) -> bool {
    let t = text.trim_start();
    if t.starts_with('{') || t.starts_with('[') || t.contains("```") {
        return true;
    }
    let lower = t.trim_start_matches('"').to_lowercase();
    ["command", "tool_name", "json"]
        .iter()
        .any(|k| lower.starts_with(k))
}

#[derive(Default)]
struct Scan {
    calls: Vec<ToolCall>,
    problems: Vec<String>,
}

fn scan(raw: &str) -> Scan {
    let mut out = Scan::default();
    let mut last = 0;
    for caps in fence_re().captures_iter(raw) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        scan_plain(&raw[last..whole.start()], &mut out);
        scan_fenced(body.as_str(), &mut out);
        last = whole.end();
    }
    let tail = &raw[last..];
    if tail.contains("```") {
        out.problems.push("unclosed code fence".to_string());
    }
    scan_plain(tail, &mut out);
    out
}

fn scan_plain(text: &str, out: &mut Scan) {
    let objects = balanced_objects(text);
    for obj in objects.complete {
        interpret_object_text(obj, out);
    }
    if objects.unclosed {
        out.problems.push("unbalanced braces".to_string());
    }
}

fn scan_fenced(body: &str, out: &mut Scan) {
    let trimmed = body.trim();
    if trimmed.starts_with('[') {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
            for item in items {
                if let Value::Object(map) = item {
                    interpret_map(map, out);
                }
            }
            return;
        }
    }
    scan_plain(body, out);
}

fn interpret_object_text(obj: &str, out: &mut Scan) {
    match serde_json::from_str::<Value>(obj) {
        Ok(Value::Object(map)) => interpret_map(map, out),
        Ok(_) => {}
        Err(e) => {
            if mentions_name_key(obj) {
                out.problems.push(format!("invalid JSON: {e}"));
            }
        }
    }
}

fn mentions_name_key(obj: &str) -> bool {
    NAME_KEYS.iter().any(|k| obj.contains(&format!("\"{k}\"")))
}

fn interpret_map(mut map: Map<String, Value>, out: &mut Scan) {
    let Some(key) = NAME_KEYS.iter().find(|k| map.contains_key(**k)) else {
        // 普通 JSON 数据，不是调用
        return;
    };
    let name = match map.remove(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => {
            out.problems.push(format!("'{key}' must be a non-empty string"));
            return;
        }
    };
    let params = PARAM_KEYS.iter().find_map(|k| map.remove(*k));
    let parameters = match params {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(p)) => p,
        Some(_) => {
            out.problems.push(format!("parameters of '{name}' must be an object"));
            return;
        }
    };
    let confidence = map.get("confidence").and_then(|v| v.as_f64());
    out.calls.push(ToolCall {
        name,
        parameters,
        confidence,
    });
}

struct Objects<'a> {
    complete: Vec<&'a str>,
    unclosed: bool,
}

/// 顶层花括号配对（感知字符串与转义）；只在对象内部跟踪引号，正文中的引号不影响配对
fn balanced_objects(text: &str) -> Objects<'_> {
    let mut complete = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_str = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_str {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_str = false;
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_str = true,
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    complete.push(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    Objects {
        complete,
        unclosed: depth > 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_none() {
        assert_eq!(parse_commands("The recording has 64 channels."), None);
        assert_eq!(classify_output("Sure, I can help."), ParsedOutput::Text);
    }

    #[test]
    fn test_inline_command_with_prose() {
        let raw = r#"I'll load them now. {"command": "load_data", "parameters": {"paths": ["a.edf"]}} Done."#;
        let calls = parse_commands(raw).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "load_data");
        assert_eq!(calls[0].parameters["paths"][0], "a.edf");
    }

    #[test]
    fn test_fenced_tool_name_and_confidence() {
        let raw = "Plan:\n```json\n{\"tool_name\": \"preprocess\", \"parameters\": {\"step\": \"notch\"}, \"confidence\": 0.9}\n```\n";
        let calls = parse_commands(raw).unwrap();
        assert_eq!(calls[0].name, "preprocess");
        assert_eq!(calls[0].confidence, Some(0.9));
    }

    #[test]
    fn test_multiple_calls_in_order() {
        let raw = r#"First {"command": "load_data", "parameters": {"paths": ["a"]}}
```json
[{"command": "preprocess", "parameters": {"step": "bandpass"}}, {"command": "build_dataset"}]
```
and then {"tool": "switch_panel", "args": {"panel": "dataset"}}"#;
        let names: Vec<String> = parse_commands(raw).unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["load_data", "preprocess", "build_dataset", "switch_panel"]);
    }

    #[test]
    fn test_braces_inside_strings() {
        let raw = r#"{"command": "preprocess", "parameters": {"step": "notch", "note": "keep } and { literal"}}"#;
        let calls = parse_commands(raw).unwrap();
        assert_eq!(calls[0].parameters["note"], "keep } and { literal");
    }

    #[test]
    fn test_benign_json_is_text() {
        let raw = r#"The header looks like {"channels": 64, "sfreq": 256}."#;
        assert_eq!(classify_output(raw), ParsedOutput::Text);
    }

    #[test]
    fn test_malformed_attempts() {
        let unclosed = r#"{"command": "load_data", "parameters": {"paths": ["a.edf"]"#;
        assert!(matches!(classify_output(unclosed), ParsedOutput::Malformed { .. }));

        let bad_json = r#"{"command": "load_data", "parameters": {paths: a.edf}}"#;
        assert!(matches!(classify_output(bad_json), ParsedOutput::Malformed { .. }));

        let open_fence = "```json\n{\"command\": \"load_data\"";
        match classify_output(open_fence) {
            ParsedOutput::Malformed { reason } => assert!(reason.contains("fence")),
            other => panic!("unexpected {:?}", other),
        }

        let bad_params = r#"{"command": "load_data", "parameters": "a.edf"}"#;
        assert!(matches!(classify_output(bad_params), ParsedOutput::Malformed { .. }));

        let empty_name = r#"{"command": "", "parameters": {}}"#;
        assert!(matches!(classify_output(empty_name), ParsedOutput::Malformed { .. }));
    }

    #[test]
    fn test_parse_is_idempotent() {
        let samples = [
            "plain words",
            r#"x {"command": "a", "parameters": {"k": 1}} y {"command": "b"}"#,
            "```json\n{\"command\": broken\n```",
        ];
        for s in samples {
            assert_eq!(parse_commands(s), parse_commands(s));
            assert_eq!(classify_output(s), classify_output(s));
        }
    }

    #[test]
    fn test_signature_sniffing() {
        assert!(has_tool_call_signature("  {\"comm"));
        assert!(has_tool_call_signature("\"command\": "));
        assert!(has_tool_call_signature("Here:\n```"));
        assert!(has_tool_call_signature("json\n{"));
        assert!(!has_tool_call_signature("The data"));
    }
}
