//! 错误类型定义

use rusqlite::ErrorCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 库错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 数据库错误
    #[error("数据库错误: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 输入错误（过滤条件、时间范围等）
    #[error("输入错误: {0}")]
    InvalidInput(String),

    /// 会话文件内容无法解析
    #[error("会话文件格式错误 {path}: {reason}")]
    Malformed { path: String, reason: String },

    /// 数据库被占用，重试后仍然失败
    #[error("数据库繁忙，{attempts} 次尝试后放弃")]
    LockBusy { attempts: u32 },

    /// 数据损坏，需要重建
    #[error("数据损坏: {0}")]
    Corrupt(String),

    /// Schema 版本不兼容
    #[error("Schema 版本不兼容: 磁盘版本 {found}, 期望版本 {expected}")]
    IncompatibleSchema { found: i64, expected: i64 },

    /// 远程主机错误
    #[error("远程主机 {host} {kind}: {message}")]
    Remote {
        host: String,
        kind: RemoteErrorKind,
        message: String,
    },

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 远程错误细分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemoteErrorKind {
    Unreachable,
    AuthFailed,
    Timeout,
    CommandFailed,
    Protocol,
}

impl std::fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RemoteErrorKind::Unreachable => "unreachable",
            RemoteErrorKind::AuthFailed => "auth failed",
            RemoteErrorKind::Timeout => "timed out",
            RemoteErrorKind::CommandFailed => "command failed",
            RemoteErrorKind::Protocol => "protocol error",
        };
        f.write_str(s)
    }
}

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// 调用方输入有误，重试无意义
    Usage,
    /// 锁竞争，可退避重试
    Contention,
    /// 损坏或版本不匹配，需要重建
    Integrity,
    /// 同步时的网络/远程错误
    Network,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) | Error::Config(_) | Error::Malformed { .. } => ErrorKind::Usage,
            Error::LockBusy { .. } => ErrorKind::Contention,
            Error::Corrupt(_) | Error::IncompatibleSchema { .. } => ErrorKind::Integrity,
            Error::Remote { .. } => ErrorKind::Network,
            Error::Database(e) if is_busy(e) => ErrorKind::Contention,
            Error::Database(e) if is_corrupt(e) => ErrorKind::Integrity,
            _ => ErrorKind::Internal,
        }
    }

    /// 重试是否可能成功
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Contention | ErrorKind::Network)
    }

    /// 映射到对外状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::IncompatibleSchema { .. } => StatusCode::IncompatibleVersion,
            _ => match self.kind() {
                ErrorKind::Usage => StatusCode::Usage,
                ErrorKind::Contention => StatusCode::LockBusy,
                ErrorKind::Integrity => StatusCode::Corrupt,
                ErrorKind::Network => StatusCode::Network,
                ErrorKind::Internal => StatusCode::Internal,
            },
        }
    }
}

/// SQLite 忙/锁定
pub(crate) fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// SQLite 文件损坏或不是数据库
pub(crate) fn is_corrupt(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(err.code, ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase)
    )
}

/// 对外状态码（CLI 退出码 / 自动化调用方）
///
/// 每个状态码都明确告诉调用方重试是否有意义。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusCode {
    Success,
    Usage,
    /// 需要执行一次全量索引
    NeedsIndex,
    Missing,
    Corrupt,
    IncompatibleVersion,
    LockBusy,
    /// 结果不完整，可以加大超时后重试
    Partial,
    Network,
    Internal,
}

impl StatusCode {
    pub fn code(self) -> i32 {
        match self {
            StatusCode::Success => 0,
            StatusCode::Internal => 1,
            StatusCode::Usage => 2,
            StatusCode::NeedsIndex => 3,
            StatusCode::Missing => 4,
            StatusCode::Corrupt => 5,
            StatusCode::IncompatibleVersion => 6,
            StatusCode::LockBusy => 7,
            StatusCode::Partial => 8,
            StatusCode::Network => 9,
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            StatusCode::LockBusy | StatusCode::Partial | StatusCode::Network
        )
    }
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, Error>;
