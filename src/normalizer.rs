//! 归一化 + 写入
//!
//! 把读取器产出的 [`RawSession`] 转成规范的会话/消息，并在单个事务里落库。

use crate::db::{
    record_indexed_file_tx, replace_messages_tx, source_id_tx, upsert_agent_tx, upsert_conversation_tx,
    workspace_id_tx, AgentInput, ConversationInput, FileStamp, MessageInput, SessionDB,
};
use crate::error::{Error, Result};
use crate::paths::{canonical_path, remap, PathMapping};
use crate::types::{AgentKind, MessageRole, RawSession, SourceKind};
use rusqlite::Transaction;
use serde::Serialize;

/// 标题最大字符数
const TITLE_MAX_CHARS: usize = 100;

/// 本机来源名
pub const LOCAL_SOURCE: &str = "local";

/// 数据来源声明
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub name: String,
    pub kind: SourceKind,
    pub host: Option<String>,
}

/// 归一化上下文：来源 + 路径映射
#[derive(Debug, Clone)]
pub struct IngestContext {
    pub source: SourceRef,
    pub path_mappings: Vec<PathMapping>,
}

impl IngestContext {
    /// 本机索引
    pub fn local() -> Self {
        Self {
            source: SourceRef {
                name: LOCAL_SOURCE.to_string(),
                kind: SourceKind::Local,
                host: None,
            },
            path_mappings: Vec::new(),
        }
    }

    /// 远程主机拉取
    pub fn remote(name: &str, host: &str, path_mappings: Vec<PathMapping>) -> Self {
        Self {
            source: SourceRef {
                name: name.to_string(),
                kind: SourceKind::Ssh,
                host: Some(host.to_string()),
            },
            path_mappings,
        }
    }
}

/// 归一化后的会话，可直接写入
#[derive(Debug, Clone)]
pub struct NormalizedSession {
    pub agent: AgentKind,
    pub source: SourceRef,
    pub workspace: Option<String>,
    pub external_id: Option<String>,
    pub title: Option<String>,
    pub source_path: String,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub origin_host: Option<String>,
    pub metadata: Option<String>,
    pub messages: Vec<MessageInput>,
}

/// 单个会话写入结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub conversation_id: i64,
    pub messages: usize,
}

/// 归一化器
pub struct Normalizer;

impl Normalizer {
    /// 归一化一条原始会话
    ///
    /// 缺少起始时间（且无法从消息推断）视为格式错误；结束时间早于
    /// 起始时间时丢弃结束时间。
    pub fn normalize(raw: RawSession, ctx: &IngestContext) -> Result<NormalizedSession> {
        let malformed = |reason: &str| Error::Malformed {
            path: raw.source_path.clone(),
            reason: reason.to_string(),
        };

        if raw.source_path.trim().is_empty() {
            return Err(malformed("source path is empty"));
        }
        if raw.agent.trim().is_empty() {
            return Err(malformed("agent is empty"));
        }
        let agent = AgentKind::from(raw.agent.as_str());

        // 先映射再规范化，保证跨机器同一项目落到同一个 workspace
        let workspace = raw.workspace.as_deref().and_then(|declared| {
            let mapped = remap(declared, &ctx.path_mappings);
            let canonical = canonical_path(&mapped);
            if canonical.is_none() {
                tracing::debug!("忽略非绝对路径 workspace: {:?} ({})", declared, raw.source_path);
            }
            canonical
        });

        let mut messages = Vec::with_capacity(raw.messages.len());
        for msg in &raw.messages {
            if msg.content.trim().is_empty() {
                continue;
            }
            let role = msg
                .role
                .parse::<MessageRole>()
                .map(|r| r.as_str().to_string())
                .unwrap_or_else(|_| msg.role.trim().to_lowercase());
            let extra = match &msg.extra {
                Some(v) if !v.is_null() => Some(serde_json::to_string(v)?),
                _ => None,
            };
            messages.push(MessageInput {
                idx: messages.len() as i64,
                role,
                author: msg.author.clone(),
                created_at: msg.created_at,
                content: msg.content.clone(),
                // 没有行概念的格式（如 Gemini JSON）保持为空
                line_number: msg.line_number,
                extra,
            });
        }

        let earliest = messages.iter().filter_map(|m| m.created_at).min();
        let latest = messages.iter().filter_map(|m| m.created_at).max();

        let started_at = raw
            .started_at
            .or(earliest)
            .ok_or_else(|| malformed("missing start timestamp"))?;

        let ended_at = match raw.ended_at.or(latest) {
            Some(end) if end < started_at => {
                tracing::warn!(
                    "ended_at {} before started_at {}, dropping ({})",
                    end,
                    started_at,
                    raw.source_path
                );
                None
            }
            other => other,
        };

        let title = raw
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| truncate_title(t))
            .or_else(|| {
                messages
                    .iter()
                    .find(|m| m.role == MessageRole::User.as_str())
                    .or_else(|| messages.first())
                    .map(|m| truncate_title(&m.content))
            });

        let metadata = match &raw.metadata {
            Some(v) if !v.is_null() => Some(serde_json::to_string(v)?),
            _ => None,
        };

        let origin_host = raw.origin_host.clone().or_else(|| ctx.source.host.clone());

        Ok(NormalizedSession {
            agent,
            source: ctx.source.clone(),
            workspace,
            external_id: raw.external_id,
            title,
            source_path: raw.source_path,
            started_at,
            ended_at,
            origin_host,
            metadata,
            messages,
        })
    }
}

/// 首行，最多 100 个字符
fn truncate_title(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .chars()
        .take(TITLE_MAX_CHARS)
        .collect()
}

impl SessionDB {
    /// 写入一个归一化会话
    ///
    /// agent / source / workspace / conversation / messages 在同一事务内完成，
    /// 任一步失败全部回滚。
    pub fn ingest_session(&self, session: &NormalizedSession) -> Result<IngestOutcome> {
        self.write(|tx| ingest_session_tx(tx, session))
    }

    /// 同一文件的全部会话在一个事务内写入，并记录文件指纹
    ///
    /// 任一会话失败时整个文件回滚，不留下部分结果。
    pub fn ingest_file_sessions(
        &self,
        path: &str,
        sessions: &[NormalizedSession],
        stamp: Option<FileStamp>,
    ) -> Result<Vec<IngestOutcome>> {
        self.write(|tx| {
            let outcomes = sessions
                .iter()
                .map(|session| ingest_session_tx(tx, session))
                .collect::<Result<Vec<_>>>()?;
            if let Some(stamp) = stamp {
                record_indexed_file_tx(tx, path, stamp)?;
            }
            Ok(outcomes)
        })
    }

    /// 归一化并写入
    pub fn ingest_raw(&self, raw: RawSession, ctx: &IngestContext) -> Result<IngestOutcome> {
        let normalized = Normalizer::normalize(raw, ctx)?;
        self.ingest_session(&normalized)
    }
}

fn ingest_session_tx(tx: &Transaction<'_>, session: &NormalizedSession) -> Result<IngestOutcome> {
    let agent_id = upsert_agent_tx(tx, &AgentInput::from(&session.agent))?;
    let source_id = source_id_tx(
        tx,
        &session.source.name,
        session.source.kind,
        session.source.host.as_deref(),
    )?;
    let workspace_id = match &session.workspace {
        Some(path) => Some(workspace_id_tx(tx, path)?),
        None => None,
    };

    let conversation_id = upsert_conversation_tx(
        tx,
        &ConversationInput {
            agent_id,
            workspace_id,
            source_id: Some(source_id),
            external_id: session.external_id.clone(),
            title: session.title.clone(),
            source_path: session.source_path.clone(),
            started_at: session.started_at,
            ended_at: session.ended_at,
            origin_host: session.origin_host.clone(),
            metadata: session.metadata.clone(),
        },
    )?;

    let messages = replace_messages_tx(tx, conversation_id, &session.messages)?;

    Ok(IngestOutcome {
        conversation_id,
        messages,
    })
}
