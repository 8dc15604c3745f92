//! 健康检查
//!
//! 只读连接 + 短 busy timeout，只看元数据（版本、行数、FTS 文档数、
//! 最近索引时间），不扫描消息内容。

use crate::error::{is_busy, is_corrupt, Error, StatusCode};
use crate::migrations::{self, SCHEMA_VERSION};
use crate::schema::REQUIRED_TABLES;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use std::path::Path;
use std::time::{Duration, Instant};

/// 健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealthStatus {
    Ok,
    /// 索引过旧或 FTS 未跟上消息表
    Stale,
    Missing,
    Corrupt,
    IncompatibleVersion,
    LockBusy,
}

impl HealthStatus {
    pub fn status_code(self) -> StatusCode {
        match self {
            HealthStatus::Ok => StatusCode::Success,
            HealthStatus::Stale => StatusCode::NeedsIndex,
            HealthStatus::Missing => StatusCode::Missing,
            HealthStatus::Corrupt => StatusCode::Corrupt,
            HealthStatus::IncompatibleVersion => StatusCode::IncompatibleVersion,
            HealthStatus::LockBusy => StatusCode::LockBusy,
        }
    }
}

/// 健康检查选项
#[derive(Debug, Clone)]
pub struct HealthOptions {
    pub expected_version: i64,
    /// 超过该时长未索引视为 stale，`None` 不检查
    pub stale_after: Option<Duration>,
    pub busy_timeout: Duration,
}

impl Default for HealthOptions {
    fn default() -> Self {
        Self {
            expected_version: SCHEMA_VERSION,
            stale_after: Some(Duration::from_secs(24 * 3600)),
            busy_timeout: Duration::from_millis(50),
        }
    }
}

/// 健康报告
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub schema_version: Option<i64>,
    pub expected_version: i64,
    pub conversations: Option<i64>,
    pub messages: Option<i64>,
    pub fts_rows: Option<i64>,
    pub last_indexed_at: Option<i64>,
    pub detail: Option<String>,
    pub elapsed_ms: u64,
}

impl HealthReport {
    fn new(expected_version: i64) -> Self {
        Self {
            status: HealthStatus::Ok,
            schema_version: None,
            expected_version,
            conversations: None,
            messages: None,
            fts_rows: None,
            last_indexed_at: None,
            detail: None,
            elapsed_ms: 0,
        }
    }

    fn with_status(mut self, status: HealthStatus, detail: impl Into<String>) -> Self {
        self.status = status;
        self.detail = Some(detail.into());
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.status.status_code()
    }
}

/// 检查数据库健康状态，不会返回错误，所有异常都体现在 status 上
pub fn check_health(db_path: &Path, opts: &HealthOptions) -> HealthReport {
    let started = Instant::now();
    let mut report = if !db_path.exists() {
        HealthReport::new(opts.expected_version)
            .with_status(HealthStatus::Missing, format!("{} does not exist", db_path.display()))
    } else {
        match probe(db_path, opts) {
            Ok(report) => report,
            Err(e) => HealthReport::new(opts.expected_version).with_status(classify(&e), e.to_string()),
        }
    };
    report.elapsed_ms = started.elapsed().as_millis() as u64;

    tracing::debug!(
        "Health {:?} for {:?} in {}ms",
        report.status,
        db_path,
        report.elapsed_ms
    );
    report
}

fn classify(e: &Error) -> HealthStatus {
    match e {
        Error::Database(err) if is_busy(err) => HealthStatus::LockBusy,
        Error::Database(err) if is_corrupt(err) => HealthStatus::Corrupt,
        Error::IncompatibleSchema { .. } => HealthStatus::IncompatibleVersion,
        _ => HealthStatus::Corrupt,
    }
}

fn count(conn: &Connection, table: &str) -> rusqlite::Result<i64> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
}

fn probe(db_path: &Path, opts: &HealthOptions) -> crate::Result<HealthReport> {
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(opts.busy_timeout)?;

    let mut report = HealthReport::new(opts.expected_version);

    let present: usize = REQUIRED_TABLES
        .iter()
        .map(|t| migrations::table_exists(&conn, t))
        .collect::<rusqlite::Result<Vec<bool>>>()?
        .into_iter()
        .filter(|exists| *exists)
        .count();

    let version = migrations::current_version(&conn)?;
    report.schema_version = version;

    if present == 0 && version.is_none() {
        return Ok(report.with_status(HealthStatus::Missing, "database has no index tables"));
    }

    match version {
        None => return Ok(report.with_status(HealthStatus::Corrupt, "schema_migrations table missing")),
        Some(v) if v != opts.expected_version => {
            return Ok(report.with_status(
                HealthStatus::IncompatibleVersion,
                format!("schema version {} (expected {})", v, opts.expected_version),
            ))
        }
        Some(_) => {}
    }

    if present < REQUIRED_TABLES.len() {
        return Ok(report.with_status(HealthStatus::Corrupt, "required tables missing"));
    }

    let messages = count(&conn, "messages")?;
    report.conversations = Some(count(&conn, "conversations")?);
    report.messages = Some(messages);
    report.last_indexed_at = crate::db::read_last_indexed(&conn)?;

    if migrations::table_exists(&conn, "messages_fts_docsize")? {
        let fts_rows = count(&conn, "messages_fts_docsize")?;
        report.fts_rows = Some(fts_rows);
        if fts_rows != messages {
            return Ok(report.with_status(
                HealthStatus::Stale,
                format!("FTS has {} rows for {} messages", fts_rows, messages),
            ));
        }
    }

    match (report.last_indexed_at, opts.stale_after) {
        (None, _) => Ok(report.with_status(HealthStatus::Stale, "never indexed")),
        (Some(at), Some(max_age)) => {
            let age = chrono::Utc::now().timestamp() - at;
            if age > max_age.as_secs() as i64 {
                Ok(report.with_status(HealthStatus::Stale, format!("last indexed {}s ago", age)))
            } else {
                Ok(report)
            }
        }
        (Some(_), None) => Ok(report),
    }
}
