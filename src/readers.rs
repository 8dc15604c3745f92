//! 会话文件读取器
//!
//! 每种格式是 [`SessionFormat`] 的一个变体，统一产出 [`RawSession`]。
//! 只覆盖常见格式的核心字段，其余格式可先转换为规范 JSON/JSONL。

use crate::error::{Error, Result};
use crate::protocol::ExportLine;
use crate::types::{AgentKind, RawMessage, RawSession};
use serde_json::Value;
use std::path::Path;

/// 会话文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFormat {
    /// 单个 RawSession JSON
    Canonical,
    /// ExportLine JSONL 流（远程导出）
    CanonicalExport,
    /// ~/.claude/projects/**/*.jsonl
    ClaudeCode,
    /// ~/.codex/sessions/**/rollout-*.jsonl
    Codex,
    /// ~/.gemini/tmp/<hash>/chats/session-*.json
    Gemini,
}

impl SessionFormat {
    /// 根据路径识别格式，无法识别返回 None
    pub fn detect(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        let name = path.file_name()?.to_str()?;
        let full = path.to_string_lossy();

        match ext {
            "jsonl" if full.contains("/.claude/") => Some(SessionFormat::ClaudeCode),
            "jsonl" if name.starts_with("rollout-") || full.contains("/.codex/") => {
                Some(SessionFormat::Codex)
            }
            "jsonl" => Some(SessionFormat::CanonicalExport),
            "json" if name.starts_with("session-") && full.contains("/chats/") => {
                Some(SessionFormat::Gemini)
            }
            "json" => Some(SessionFormat::Canonical),
            _ => None,
        }
    }

    pub fn agent(&self) -> Option<AgentKind> {
        match self {
            SessionFormat::ClaudeCode => Some(AgentKind::ClaudeCode),
            SessionFormat::Codex => Some(AgentKind::Codex),
            SessionFormat::Gemini => Some(AgentKind::Gemini),
            SessionFormat::Canonical | SessionFormat::CanonicalExport => None,
        }
    }

    /// 读取并解析文件
    pub fn read(&self, path: &Path) -> Result<Vec<RawSession>> {
        let content = std::fs::read_to_string(path)?;
        let source_path = path.to_string_lossy().into_owned();
        self.parse(&content, &source_path)
    }

    /// 解析已读入的内容
    pub fn parse(&self, content: &str, source_path: &str) -> Result<Vec<RawSession>> {
        match self {
            SessionFormat::Canonical => {
                let mut session: RawSession = serde_json::from_str(content)
                    .map_err(|e| malformed(source_path, e.to_string()))?;
                if session.source_path.is_empty() {
                    session.source_path = source_path.to_string();
                }
                Ok(vec![session])
            }
            SessionFormat::CanonicalExport => parse_export(content, source_path),
            SessionFormat::ClaudeCode => parse_claude(content, source_path).map(|s| vec![s]),
            SessionFormat::Codex => parse_codex(content, source_path).map(|s| vec![s]),
            SessionFormat::Gemini => parse_gemini(content, source_path).map(|s| vec![s]),
        }
    }
}

/// 识别格式并读取
pub fn read_session_file(path: &Path) -> Result<Vec<RawSession>> {
    let format = SessionFormat::detect(path)
        .ok_or_else(|| malformed(&path.to_string_lossy(), "unrecognized session file".into()))?;
    format.read(path)
}

fn malformed(path: &str, reason: String) -> Error {
    Error::Malformed {
        path: path.to_string(),
        reason,
    }
}

/// 时间戳转 Unix 秒：支持秒/毫秒整数、数字字符串、RFC 3339
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            let v = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            Some(if v > 100_000_000_000 { v / 1000 } else { v })
        }
        Value::String(s) => {
            if let Ok(v) = s.trim().parse::<i64>() {
                return parse_timestamp(&Value::from(v));
            }
            chrono::DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| dt.timestamp())
        }
        _ => None,
    }
}

/// 把各家的 content（字符串 / block 数组 / 对象）压平成文本
pub fn flatten_content(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(flatten_content)
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(map) => {
            if let Some(text) = map.get("text").and_then(|t| t.as_str()) {
                return text.to_string();
            }
            if let Some(inner) = map.get("content") {
                return flatten_content(inner);
            }
            // tool_use: 名称 + 输入
            match (map.get("name").and_then(|n| n.as_str()), map.get("input")) {
                (Some(name), Some(input)) => format!("[tool: {}] {}", name, input),
                (Some(name), None) => format!("[tool: {}]", name),
                _ => String::new(),
            }
        }
        _ => String::new(),
    }
}

fn parse_export(content: &str, source_path: &str) -> Result<Vec<RawSession>> {
    let mut sessions = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed: ExportLine = serde_json::from_str(line)
            .map_err(|e| malformed(source_path, format!("line {}: {}", i + 1, e)))?;
        if let ExportLine::Session(session) = parsed {
            sessions.push(*session);
        }
    }
    Ok(sessions)
}

/// 逐行解析 JSONL，跳过坏行；全部坏行视为格式错误
fn json_lines(content: &str, source_path: &str) -> Result<Vec<(i64, Value)>> {
    let mut lines = Vec::new();
    let mut bad = 0usize;
    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(v) => lines.push((i as i64 + 1, v)),
            Err(_) => bad += 1,
        }
    }
    if lines.is_empty() && bad > 0 {
        return Err(malformed(source_path, format!("{} unparseable lines", bad)));
    }
    if bad > 0 {
        tracing::debug!("{}: skipped {} unparseable lines", source_path, bad);
    }
    Ok(lines)
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(|x| x.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn parse_claude(content: &str, source_path: &str) -> Result<RawSession> {
    let mut session = RawSession {
        agent: AgentKind::ClaudeCode.slug().to_string(),
        source_path: source_path.to_string(),
        ..Default::default()
    };

    for (line_number, v) in json_lines(content, source_path)? {
        let kind = v.get("type").and_then(|t| t.as_str()).unwrap_or("");
        if kind == "summary" {
            session.title = session.title.or_else(|| str_field(&v, "summary"));
            continue;
        }
        if kind != "user" && kind != "assistant" {
            continue;
        }

        session.external_id = session.external_id.or_else(|| str_field(&v, "sessionId"));
        session.workspace = session.workspace.or_else(|| str_field(&v, "cwd"));

        let Some(message) = v.get("message") else {
            continue;
        };
        let role = message
            .get("role")
            .and_then(|r| r.as_str())
            .unwrap_or(kind)
            .to_string();
        let text = message.get("content").map(flatten_content).unwrap_or_default();

        session.messages.push(RawMessage {
            role,
            content: text,
            author: message.get("model").and_then(|m| m.as_str()).map(String::from),
            created_at: v.get("timestamp").and_then(parse_timestamp),
            line_number: Some(line_number),
            extra: None,
        });
    }

    if session.messages.is_empty() {
        return Err(malformed(source_path, "no messages".into()));
    }
    Ok(session)
}

fn parse_codex(content: &str, source_path: &str) -> Result<RawSession> {
    let mut session = RawSession {
        agent: AgentKind::Codex.slug().to_string(),
        source_path: source_path.to_string(),
        ..Default::default()
    };

    for (line_number, v) in json_lines(content, source_path)? {
        let kind = v.get("type").and_then(|t| t.as_str()).unwrap_or("");
        let payload = v.get("payload").cloned().unwrap_or(Value::Null);
        let created_at = v.get("timestamp").and_then(parse_timestamp);

        match kind {
            "session_meta" | "turn_context" => {
                session.workspace = session.workspace.or_else(|| str_field(&payload, "cwd"));
                session.external_id = session.external_id.or_else(|| str_field(&payload, "id"));
                if session.started_at.is_none() {
                    session.started_at = payload.get("timestamp").and_then(parse_timestamp);
                }
            }
            // 用户消息取 event_msg，response_item 里的 user 是重复
            "event_msg" => {
                if payload.get("type").and_then(|t| t.as_str()) == Some("user_message") {
                    session.messages.push(RawMessage {
                        role: "user".into(),
                        content: payload.get("message").map(flatten_content).unwrap_or_default(),
                        created_at,
                        line_number: Some(line_number),
                        ..Default::default()
                    });
                }
            }
            "response_item" => {
                if payload.get("role").and_then(|r| r.as_str()) == Some("assistant") {
                    session.messages.push(RawMessage {
                        role: "assistant".into(),
                        content: payload.get("content").map(flatten_content).unwrap_or_default(),
                        created_at,
                        line_number: Some(line_number),
                        ..Default::default()
                    });
                }
            }
            _ => {}
        }
    }

    if session.messages.is_empty() {
        return Err(malformed(source_path, "no messages".into()));
    }
    Ok(session)
}

fn parse_gemini(content: &str, source_path: &str) -> Result<RawSession> {
    let v: Value =
        serde_json::from_str(content).map_err(|e| malformed(source_path, e.to_string()))?;
    let items = v
        .get("messages")
        .and_then(|m| m.as_array())
        .ok_or_else(|| malformed(source_path, "missing messages array".into()))?;

    let messages: Vec<RawMessage> = items
        .iter()
        .map(|item| RawMessage {
            role: item
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("model")
                .to_string(),
            content: item.get("content").map(flatten_content).unwrap_or_default(),
            created_at: item.get("timestamp").and_then(parse_timestamp),
            ..Default::default()
        })
        .collect();

    // 目录名是项目哈希而非路径，不作为 workspace
    Ok(RawSession {
        agent: AgentKind::Gemini.slug().to_string(),
        source_path: source_path.to_string(),
        external_id: str_field(&v, "sessionId"),
        started_at: v.get("startTime").and_then(parse_timestamp),
        ended_at: v.get("lastUpdated").and_then(parse_timestamp),
        metadata: str_field(&v, "projectHash").map(|h| serde_json::json!({ "project_hash": h })),
        messages,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_detect_formats() {
        let cases = [
            ("/home/a/.claude/projects/x/1.jsonl", Some(SessionFormat::ClaudeCode)),
            ("/home/a/.codex/sessions/2024/rollout-1.jsonl", Some(SessionFormat::Codex)),
            ("/home/a/.gemini/tmp/abc/chats/session-1.json", Some(SessionFormat::Gemini)),
            ("/tmp/export.jsonl", Some(SessionFormat::CanonicalExport)),
            ("/tmp/one.json", Some(SessionFormat::Canonical)),
            ("/tmp/notes.txt", None),
        ];
        for (path, expected) in cases {
            assert_eq!(SessionFormat::detect(&PathBuf::from(path)), expected, "{}", path);
        }
    }

    #[test]
    fn test_parse_timestamp_units() {
        assert_eq!(parse_timestamp(&serde_json::json!(1_700_000_000)), Some(1_700_000_000));
        assert_eq!(parse_timestamp(&serde_json::json!(1_700_000_000_123i64)), Some(1_700_000_000));
        assert_eq!(parse_timestamp(&serde_json::json!("1700000000")), Some(1_700_000_000));
        assert_eq!(
            parse_timestamp(&serde_json::json!("2024-01-01T00:00:00Z")),
            Some(1_704_067_200)
        );
        assert_eq!(parse_timestamp(&serde_json::json!(null)), None);
    }

    #[test]
    fn test_parse_claude_jsonl() {
        let content = r#"{"type":"summary","summary":"Fix login"}
{"type":"user","sessionId":"s1","cwd":"/proj/a","timestamp":"2024-01-01T00:00:00Z","message":{"role":"user","content":"login is broken"}}
not json
{"type":"assistant","sessionId":"s1","cwd":"/proj/a","timestamp":"2024-01-01T00:01:00Z","message":{"role":"assistant","model":"opus","content":[{"type":"text","text":"Looking"},{"type":"tool_use","name":"Read","input":{"path":"a.rs"}}]}}
"#;
        let sessions = SessionFormat::ClaudeCode.parse(content, "/c/1.jsonl").unwrap();
        let s = &sessions[0];
        assert_eq!(s.title.as_deref(), Some("Fix login"));
        assert_eq!(s.workspace.as_deref(), Some("/proj/a"));
        assert_eq!(s.external_id.as_deref(), Some("s1"));
        assert_eq!(s.messages.len(), 2);
        assert_eq!(s.messages[1].line_number, Some(4));
        assert!(s.messages[1].content.contains("[tool: Read]"));
        assert_eq!(s.messages[1].author.as_deref(), Some("opus"));
    }

    #[test]
    fn test_parse_codex_jsonl() {
        let content = r#"{"type":"session_meta","payload":{"id":"c1","cwd":"/proj/b","timestamp":"2024-01-01T00:00:00Z"}}
{"type":"event_msg","timestamp":1704067260000,"payload":{"type":"user_message","message":"add tests"}}
{"type":"response_item","timestamp":1704067261000,"payload":{"role":"user","content":"add tests"}}
{"type":"response_item","timestamp":1704067262000,"payload":{"role":"assistant","content":[{"type":"output_text","text":"done"}]}}
"#;
        let s = &SessionFormat::Codex.parse(content, "/x/rollout-1.jsonl").unwrap()[0];
        assert_eq!(s.workspace.as_deref(), Some("/proj/b"));
        assert_eq!(s.started_at, Some(1_704_067_200));
        assert_eq!(s.messages.len(), 2);
        assert_eq!(s.messages[0].role, "user");
        assert_eq!(s.messages[0].created_at, Some(1_704_067_260));
        assert_eq!(s.messages[1].content, "done");
    }

    #[test]
    fn test_parse_gemini_json() {
        let content = r#"{"sessionId":"g1","projectHash":"abc","startTime":"2024-01-01T00:00:00Z",
            "messages":[{"type":"user","content":"hello"},{"type":"model","content":"hi"}]}"#;
        let s = &SessionFormat::Gemini.parse(content, "/g/chats/session-1.json").unwrap()[0];
        assert_eq!(s.workspace, None);
        assert_eq!(s.messages.len(), 2);
        assert_eq!(s.external_id.as_deref(), Some("g1"));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = SessionFormat::ClaudeCode.parse("garbage\n{{", "/c/bad.jsonl").unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));
    }
}
