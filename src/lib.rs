//! agent-session-index - 编码助手会话索引库
//!
//! 把多个编码助手（Claude Code、Codex、Gemini 等）在多台机器上产生的会话记录
//! 归一化到一个 SQLite 库，提供时间线、全文搜索和健康检查。
//!
//! # 核心功能
//!
//! - **存储**: Agent/Source/Workspace/Conversation/Message，带版本号的 schema
//! - **归一化**: 各家会话文件 → 规范会话，幂等重建
//! - **时间线**: 按时间范围/agent/来源过滤，按小时或天分桶
//! - **全文搜索**: FTS5，与消息替换同事务
//! - **健康检查**: 只看元数据的快速探测
//! - **多机同步**: ssh 拉取 + 本地归一化，可断点续传
//!
//! # Feature Flags
//!
//! - `writer`: 写入能力（归一化 + 采集）
//! - `search`: 搜索能力 (依赖 `fts`)
//! - `fts`: FTS5 全文搜索
//! - `sync`: 多机同步（依赖 `writer`）

pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod migrations;
pub mod paths;
pub mod protocol;
pub mod schema;
pub mod timeline;
pub mod types;

#[cfg(feature = "writer")]
pub mod normalizer;

#[cfg(feature = "writer")]
pub mod readers;

#[cfg(feature = "writer")]
pub mod collector;

#[cfg(feature = "search")]
pub mod search;

#[cfg(feature = "sync")]
pub mod sync;

// Re-exports
pub use config::DbConfig;
pub use db::{AgentInput, ConversationInput, FileStamp, MessageInput, Row, SessionDB};
pub use error::{Error, ErrorKind, RemoteErrorKind, Result, StatusCode};
pub use health::{check_health, HealthOptions, HealthReport, HealthStatus};
pub use migrations::SCHEMA_VERSION;
pub use paths::PathMapping;
pub use protocol::{ExportLine, ExportStream, EXPORT_FORMAT_VERSION};
pub use timeline::{
    GroupBy, OutputMode, SourceFilter, TimeZonePolicy, TimelineEntry, TimelineQuery, TimelineResult,
};
pub use types::*;

#[cfg(feature = "writer")]
pub use collector::{CollectResult, Collector, FileOutcome, FileStatus};

#[cfg(feature = "writer")]
pub use normalizer::{IngestContext, IngestOutcome, NormalizedSession, Normalizer, SourceRef, LOCAL_SOURCE};

#[cfg(feature = "writer")]
pub use readers::{read_session_file, SessionFormat};

#[cfg(feature = "search")]
pub use search::{escape_fts5_query, SearchFilters, SearchHit, SearchOptions, SearchOutcome};
