//! 数据类型定义

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 已知的编码助手
///
/// 未知 slug 保留为 `Other`，不丢弃数据。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AgentKind {
    ClaudeCode,
    Codex,
    Cursor,
    Gemini,
    OpenCode,
    Amp,
    Cline,
    Aider,
    ChatGpt,
    PiAgent,
    Other(String),
}

impl AgentKind {
    pub fn slug(&self) -> &str {
        match self {
            AgentKind::ClaudeCode => "claude_code",
            AgentKind::Codex => "codex",
            AgentKind::Cursor => "cursor",
            AgentKind::Gemini => "gemini",
            AgentKind::OpenCode => "opencode",
            AgentKind::Amp => "amp",
            AgentKind::Cline => "cline",
            AgentKind::Aider => "aider",
            AgentKind::ChatGpt => "chatgpt",
            AgentKind::PiAgent => "pi_agent",
            AgentKind::Other(slug) => slug,
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            AgentKind::ClaudeCode => "Claude Code".into(),
            AgentKind::Codex => "Codex".into(),
            AgentKind::Cursor => "Cursor".into(),
            AgentKind::Gemini => "Gemini CLI".into(),
            AgentKind::OpenCode => "OpenCode".into(),
            AgentKind::Amp => "Amp".into(),
            AgentKind::Cline => "Cline".into(),
            AgentKind::Aider => "Aider".into(),
            AgentKind::ChatGpt => "ChatGPT".into(),
            AgentKind::PiAgent => "Pi Agent".into(),
            AgentKind::Other(slug) => slug.clone(),
        }
    }

    /// 产品形态：cli / ide / chat
    pub fn category(&self) -> &'static str {
        match self {
            AgentKind::Cursor | AgentKind::Cline => "ide",
            AgentKind::ChatGpt => "chat",
            _ => "cli",
        }
    }
}

impl From<&str> for AgentKind {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "claude_code" | "claude" => AgentKind::ClaudeCode,
            "codex" => AgentKind::Codex,
            "cursor" => AgentKind::Cursor,
            "gemini" => AgentKind::Gemini,
            "opencode" => AgentKind::OpenCode,
            "amp" => AgentKind::Amp,
            "cline" => AgentKind::Cline,
            "aider" => AgentKind::Aider,
            "chatgpt" => AgentKind::ChatGpt,
            "pi_agent" | "pi" => AgentKind::PiAgent,
            other => AgentKind::Other(other.to_string()),
        }
    }
}

impl From<String> for AgentKind {
    fn from(s: String) -> Self {
        AgentKind::from(s.as_str())
    }
}

impl From<AgentKind> for String {
    fn from(kind: AgentKind) -> Self {
        kind.slug().to_string()
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// 数据来源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Local,
    Ssh,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Local => "local",
            SourceKind::Ssh => "ssh",
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(SourceKind::Local),
            "ssh" | "remote" => Ok(SourceKind::Ssh),
            _ => Err(format!("Invalid source kind: {}", s)),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::Tool => "tool",
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" | "human" => Ok(MessageRole::User),
            "assistant" | "model" | "agent" | "gemini" => Ok(MessageRole::Assistant),
            "system" | "developer" => Ok(MessageRole::System),
            "tool" | "tool_result" | "function" => Ok(MessageRole::Tool),
            _ => Err(format!("Invalid message role: {}", s)),
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub kind: String,
}

/// 数据来源
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub host: Option<String>,
    pub last_synced_at: Option<i64>,
}

/// Workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: i64,
    pub path: String,
    pub conversation_count: i64,
}

/// 会话（含 LEFT JOIN 出来的可选关联）
///
/// 可选字段序列化为显式 `null`，不省略。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub agent: String,
    pub title: Option<String>,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub source_path: String,
    pub message_count: i64,
    pub workspace: Option<String>,
    pub source_id: Option<i64>,
    pub source_name: Option<String>,
    pub origin_kind: String,
    pub origin_host: Option<String>,
    pub external_id: Option<String>,
    pub metadata: Option<String>,
}

impl Conversation {
    /// 时长（秒），无结束时间时为 None
    pub fn duration_seconds(&self) -> Option<i64> {
        self.ended_at.map(|end| end - self.started_at)
    }
}

/// 消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub idx: i64,
    pub role: String,
    pub author: Option<String>,
    pub created_at: Option<i64>,
    pub content: String,
    pub line_number: Option<i64>,
}

/// 读取器产出的通用会话记录（归一化之前）
///
/// 时间戳为 Unix 秒。远程导出流也使用这个形状，因此本地归一化前不做任何信任假设。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSession {
    pub agent: String,
    pub source_path: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    /// 声明的项目路径，缺失即无 workspace
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub ended_at: Option<i64>,
    #[serde(default)]
    pub origin_host: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub messages: Vec<RawMessage>,
}

/// 读取器产出的单条消息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub created_at: Option<i64>,
    /// 源文件中的行号（1 起）
    #[serde(default)]
    pub line_number: Option<i64>,
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
}

/// 统计信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    pub agent_count: i64,
    pub source_count: i64,
    pub workspace_count: i64,
    pub conversation_count: i64,
    pub message_count: i64,
}
