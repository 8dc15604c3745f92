//! 导出协议
//!
//! 远程主机 `export` 输出、本机 `sync` 拉取时读取：JSONL，每行一个 [`ExportLine`]。
//! 首行为 Header，末行为 Footer；Footer 缺失说明输出被截断。

use crate::types::RawSession;
use serde::{Deserialize, Serialize};

/// 协议版本，主版本不同视为不兼容
pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// 导出流中的一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExportLine {
    /// 流头
    Header {
        format_version: u32,
        /// 导出端程序版本
        agent_version: String,
        host: Option<String>,
        generated_at: i64,
    },

    /// 一个会话
    Session(Box<RawSession>),

    /// 导出端读取某个文件失败
    Error { path: String, message: String },

    /// 流尾
    Footer { sessions: usize, errors: usize },
}

impl ExportLine {
    pub fn header(host: Option<String>) -> Self {
        ExportLine::Header {
            format_version: EXPORT_FORMAT_VERSION,
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            host,
            generated_at: chrono::Utc::now().timestamp(),
        }
    }

    /// 序列化为一行（不含换行）
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// 解析后的导出流
#[derive(Debug, Default)]
pub struct ExportStream {
    pub header_version: Option<u32>,
    /// 导出端时钟下的生成时间，下次增量拉取以它为起点
    pub generated_at: Option<i64>,
    pub sessions: Vec<RawSession>,
    /// 导出端报告的失败
    pub remote_errors: Vec<(String, String)>,
    /// 本端无法解析的行
    pub bad_lines: Vec<String>,
    pub complete: bool,
}

impl ExportStream {
    /// 逐行解析，坏行记录后继续
    pub fn parse(output: &str) -> Self {
        let mut stream = ExportStream::default();
        for (i, line) in output.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ExportLine>(line) {
                Ok(ExportLine::Header {
                    format_version,
                    generated_at,
                    ..
                }) => {
                    stream.header_version = Some(format_version);
                    stream.generated_at = Some(generated_at);
                }
                Ok(ExportLine::Session(session)) => stream.sessions.push(*session),
                Ok(ExportLine::Error { path, message }) => stream.remote_errors.push((path, message)),
                Ok(ExportLine::Footer { .. }) => stream.complete = true,
                Err(e) => stream.bad_lines.push(format!("line {}: {}", i + 1, e)),
            }
        }
        stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_line_shape() {
        let line = ExportLine::Session(Box::new(RawSession {
            agent: "codex".into(),
            source_path: "/r/a.jsonl".into(),
            started_at: Some(5),
            ..Default::default()
        }));
        let json: serde_json::Value = serde_json::from_str(&line.to_line().unwrap()).unwrap();
        assert_eq!(json["type"], "session");
        assert_eq!(json["agent"], "codex");
    }

    #[test]
    fn test_parse_stream_tolerates_bad_lines() {
        let output = [
            ExportLine::header(Some("box".into())).to_line().unwrap(),
            "{not json".to_string(),
            ExportLine::Session(Box::new(RawSession {
                agent: "codex".into(),
                source_path: "/r/a.jsonl".into(),
                ..Default::default()
            }))
            .to_line()
            .unwrap(),
            ExportLine::Error {
                path: "/r/b.jsonl".into(),
                message: "denied".into(),
            }
            .to_line()
            .unwrap(),
            ExportLine::Footer {
                sessions: 1,
                errors: 1,
            }
            .to_line()
            .unwrap(),
        ]
        .join("\n");

        let stream = ExportStream::parse(&output);
        assert_eq!(stream.header_version, Some(EXPORT_FORMAT_VERSION));
        assert!(stream.generated_at.is_some());
        assert_eq!(stream.sessions.len(), 1);
        assert_eq!(stream.remote_errors.len(), 1);
        assert_eq!(stream.bad_lines.len(), 1);
        assert!(stream.complete);
    }

    #[test]
    fn test_truncated_stream_incomplete() {
        let output = ExportLine::header(None).to_line().unwrap();
        assert!(!ExportStream::parse(&output).complete);
    }
}
