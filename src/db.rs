//! 数据库连接和操作
//!
//! 单写多读：写操作全部经过 [`SessionDB::write`]，以 `BEGIN IMMEDIATE`
//! 事务执行，锁竞争时按 [`DbConfig`] 的退避策略重试。

use crate::config::DbConfig;
use crate::error::{is_busy, Error, Result};
use crate::migrations::{self, SCHEMA_VERSION};
use crate::paths::canonical_path;
use crate::schema;
use crate::types::{Agent, AgentKind, Conversation, Message, Source, SourceKind, Stats, Workspace};
use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// `run_query` 返回的行，列名 → 值
pub type Row = serde_json::Map<String, serde_json::Value>;

const META_LAST_INDEXED: &str = "last_indexed_at";

/// 会话查询的公共列（LEFT JOIN workspace/source，消息数实时聚合）
pub(crate) const CONVERSATION_SELECT: &str = r#"
    SELECT
        c.id,
        a.slug,
        c.title,
        c.started_at,
        c.ended_at,
        c.source_path,
        (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id) AS message_count,
        w.path,
        c.source_id,
        s.name,
        COALESCE(s.kind, 'local') AS origin_kind,
        c.origin_host,
        c.external_id,
        c.metadata
    FROM conversations c
    JOIN agents a ON a.id = c.agent_id
    LEFT JOIN workspaces w ON w.id = c.workspace_id
    LEFT JOIN sources s ON s.id = c.source_id
"#;

pub(crate) fn conversation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        agent: row.get(1)?,
        title: row.get(2)?,
        started_at: row.get(3)?,
        ended_at: row.get(4)?,
        source_path: row.get(5)?,
        message_count: row.get(6)?,
        workspace: row.get(7)?,
        source_id: row.get(8)?,
        source_name: row.get(9)?,
        origin_kind: row.get(10)?,
        origin_host: row.get(11)?,
        external_id: row.get(12)?,
        metadata: row.get(13)?,
    })
}

/// Agent 写入参数
#[derive(Debug, Clone)]
pub struct AgentInput {
    pub slug: String,
    pub name: String,
    pub kind: String,
}

impl From<&AgentKind> for AgentInput {
    fn from(kind: &AgentKind) -> Self {
        Self {
            slug: kind.slug().to_string(),
            name: kind.display_name(),
            kind: kind.category().to_string(),
        }
    }
}

/// 会话写入参数
#[derive(Debug, Clone)]
pub struct ConversationInput {
    pub agent_id: i64,
    pub workspace_id: Option<i64>,
    pub source_id: Option<i64>,
    pub external_id: Option<String>,
    pub title: Option<String>,
    pub source_path: String,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub origin_host: Option<String>,
    pub metadata: Option<String>,
}

/// 消息写入参数
#[derive(Debug, Clone)]
pub struct MessageInput {
    pub idx: i64,
    pub role: String,
    pub author: Option<String>,
    pub created_at: Option<i64>,
    pub content: String,
    pub line_number: Option<i64>,
    pub extra: Option<String>,
}

/// 文件指纹：修改时间 (毫秒) + 大小
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub mtime: i64,
    pub size: i64,
}

impl FileStamp {
    /// 读取文件元数据，失败返回 None
    pub fn of(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        let mtime = meta.modified().ok()?.duration_since(UNIX_EPOCH).ok()?.as_millis();
        Some(Self {
            mtime: i64::try_from(mtime).ok()?,
            size: i64::try_from(meta.len()).ok()?,
        })
    }
}

/// 数据库连接
pub struct SessionDB {
    pub(crate) conn: Arc<Mutex<Connection>>,
    config: DbConfig,
    read_only: bool,
}

impl SessionDB {
    /// 连接数据库（读写），必要时创建并迁移
    pub fn connect(config: DbConfig) -> Result<Self> {
        let path = config.path();

        // 确保目录存在
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(config.busy_timeout)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON; PRAGMA synchronous = NORMAL;",
        )?;

        // 迁移先于 schema，为老数据库补齐列
        migrations::run_migrations(&conn)?;

        let full_schema = schema::full_schema(cfg!(feature = "fts"), cfg!(feature = "sync"));
        conn.execute_batch(&full_schema)?;

        tracing::info!("数据库已连接: {:?}", path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            config,
            read_only: false,
        })
    }

    /// 只读连接，供并发查询使用
    ///
    /// 不做迁移；版本不一致直接返回 `IncompatibleSchema`。
    pub fn connect_readonly(config: DbConfig) -> Result<Self> {
        let conn = Connection::open_with_flags(
            config.path(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(config.busy_timeout)?;

        match migrations::current_version(&conn)? {
            Some(v) if v == SCHEMA_VERSION => {}
            Some(v) => {
                return Err(Error::IncompatibleSchema {
                    found: v,
                    expected: SCHEMA_VERSION,
                })
            }
            None => return Err(Error::Corrupt("schema_migrations table missing".into())),
        }

        tracing::debug!("只读连接: {:?}", config.path());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            config,
            read_only: true,
        })
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// 获取底层连接 (用于测试)
    #[doc(hidden)]
    pub fn connection(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }

    /// 在单个 IMMEDIATE 事务中执行写操作
    ///
    /// 闭包内任一错误都会回滚整个事务。锁竞争按指数退避重试，
    /// 用尽次数后返回可重试的 `Error::LockBusy`。
    pub fn write<T, F>(&self, mut f: F) -> Result<T>
    where
        F: FnMut(&Transaction<'_>) -> Result<T>,
    {
        if self.read_only {
            return Err(Error::InvalidInput("write on a read-only connection".into()));
        }

        let attempts = self.config.write_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = {
                let mut conn = self.conn.lock();
                run_immediate(&mut conn, &mut f)
            };

            match outcome {
                Err(Error::Database(ref e)) if is_busy(e) => {
                    if attempt >= attempts {
                        tracing::warn!("Write gave up after {} busy attempts", attempt);
                        return Err(Error::LockBusy { attempts: attempt });
                    }
                    let delay = self.config.backoff_for(attempt);
                    tracing::debug!("Database busy, retry {} in {:?}", attempt, delay);
                    std::thread::sleep(delay);
                }
                other => return other,
            }
        }
    }

    // ==================== Agent 操作 ====================

    /// 创建 Agent（已存在则保持不变），返回 id
    pub fn upsert_agent(&self, input: &AgentInput) -> Result<i64> {
        self.write(|tx| upsert_agent_tx(tx, input))
    }

    /// 获取所有 Agents
    pub fn list_agents(&self) -> Result<Vec<Agent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, slug, name, kind FROM agents ORDER BY slug")?;
        let rows = stmt.query_map([], |row| {
            Ok(Agent {
                id: row.get(0)?,
                slug: row.get(1)?,
                name: row.get(2)?,
                kind: row.get(3)?,
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    // ==================== Workspace 操作 ====================

    /// 获取或创建 Workspace
    ///
    /// 路径先规范化；相对路径或空路径属于输入错误。
    pub fn get_or_create_workspace(&self, path: &str) -> Result<i64> {
        let canonical = canonical_path(path)
            .ok_or_else(|| Error::InvalidInput(format!("workspace path is not absolute: {:?}", path)))?;
        self.write(|tx| workspace_id_tx(tx, &canonical))
    }

    /// 获取所有 Workspaces（带会话数）
    pub fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT w.id, w.path, COUNT(c.id)
            FROM workspaces w
            LEFT JOIN conversations c ON c.workspace_id = w.id
            GROUP BY w.id
            ORDER BY w.path
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Workspace {
                id: row.get(0)?,
                path: row.get(1)?,
                conversation_count: row.get(2)?,
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    // ==================== Source 操作 ====================

    /// 获取或创建 Source
    pub fn get_or_create_source(&self, name: &str, kind: SourceKind, host: Option<&str>) -> Result<i64> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("source name is empty".into()));
        }
        self.write(|tx| source_id_tx(tx, name, kind, host))
    }

    /// 获取所有 Sources
    pub fn list_sources(&self) -> Result<Vec<Source>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, name, kind, host, last_synced_at FROM sources ORDER BY name")?;
        let rows = stmt.query_map([], source_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// 根据名称获取 Source
    pub fn get_source(&self, name: &str) -> Result<Option<Source>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, name, kind, host, last_synced_at FROM sources WHERE name = ?1",
            params![name],
            source_from_row,
        )
        .optional()
        .map_err(Into::into)
    }

    /// 更新增量拉取检查点
    pub fn set_source_synced_at(&self, source_id: i64, synced_at: i64) -> Result<()> {
        self.write(|tx| {
            tx.execute(
                "UPDATE sources SET last_synced_at = ?1 WHERE id = ?2",
                params![synced_at, source_id],
            )?;
            Ok(())
        })
    }

    // ==================== Conversation 操作 ====================

    /// 创建或更新会话，返回稳定的 id
    pub fn upsert_conversation(&self, input: &ConversationInput) -> Result<i64> {
        self.write(|tx| upsert_conversation_tx(tx, input))
    }

    /// 获取单个会话
    pub fn get_conversation(&self, id: i64) -> Result<Option<Conversation>> {
        let conn = self.conn.lock();
        let sql = format!("{} WHERE c.id = ?1", CONVERSATION_SELECT);
        conn.query_row(&sql, params![id], conversation_from_row)
            .optional()
            .map_err(Into::into)
    }

    /// 按 (agent, source_path) 查找会话
    pub fn find_conversation(&self, agent_slug: &str, source_path: &str) -> Result<Vec<Conversation>> {
        let conn = self.conn.lock();
        let sql = format!(
            "{} WHERE a.slug = ?1 AND c.source_path = ?2 ORDER BY c.id",
            CONVERSATION_SELECT
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![agent_slug, source_path], conversation_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// 列出会话（可按 workspace 过滤，支持分页），最新的在前
    pub fn list_conversations_for_workspace(
        &self,
        workspace: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Conversation>> {
        let conn = self.conn.lock();

        let (sql, params_vec): (String, Vec<Box<dyn rusqlite::ToSql>>) = match workspace {
            Some(path) => {
                let canonical = canonical_path(path)
                    .ok_or_else(|| Error::InvalidInput(format!("workspace path is not absolute: {:?}", path)))?;
                (
                    format!(
                        "{} WHERE w.path = ?1 ORDER BY c.started_at DESC, c.id DESC LIMIT ?2 OFFSET ?3",
                        CONVERSATION_SELECT
                    ),
                    vec![
                        Box::new(canonical) as Box<dyn rusqlite::ToSql>,
                        Box::new(limit as i64),
                        Box::new(offset as i64),
                    ],
                )
            }
            None => (
                format!(
                    "{} ORDER BY c.started_at DESC, c.id DESC LIMIT ?1 OFFSET ?2",
                    CONVERSATION_SELECT
                ),
                vec![
                    Box::new(limit as i64) as Box<dyn rusqlite::ToSql>,
                    Box::new(offset as i64),
                ],
            ),
        };

        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(params_refs.as_slice(), conversation_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// 删除会话（消息级联删除）
    pub fn delete_conversation(&self, id: i64) -> Result<bool> {
        self.write(|tx| {
            // 先显式删除消息，保证 FTS 触发器逐行执行
            tx.execute("DELETE FROM messages WHERE conversation_id = ?1", params![id])?;
            let n = tx.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
            Ok(n > 0)
        })
    }

    // ==================== Message 操作 ====================

    /// 原子替换会话的全部消息
    pub fn replace_messages(&self, conversation_id: i64, messages: &[MessageInput]) -> Result<usize> {
        self.write(|tx| replace_messages_tx(tx, conversation_id, messages))
    }

    /// 获取会话消息（按 idx 排序）
    pub fn get_messages(&self, conversation_id: i64) -> Result<Vec<Message>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, conversation_id, idx, role, author, created_at, content, line_number
            FROM messages
            WHERE conversation_id = ?1
            ORDER BY idx
            "#,
        )?;
        let rows = stmt.query_map(params![conversation_id], |row| {
            Ok(Message {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                idx: row.get(2)?,
                role: row.get(3)?,
                author: row.get(4)?,
                created_at: row.get(5)?,
                content: row.get(6)?,
                line_number: row.get(7)?,
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    // ==================== 通用查询 ====================

    /// 执行只读 SQL，行以 JSON 对象返回
    ///
    /// 写语句会被拒绝，写入必须经过事务化的写接口。
    pub fn run_query(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Row>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        if !stmt.readonly() {
            return Err(Error::InvalidInput("run_query only accepts read-only statements".into()));
        }

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query(params)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut map = Row::new();
            for (i, name) in columns.iter().enumerate() {
                map.insert(name.clone(), value_to_json(row.get_ref(i)?));
            }
            out.push(map);
        }
        Ok(out)
    }

    // ==================== 元信息 / 统计 ====================

    /// 磁盘上的 schema 版本
    pub fn schema_version(&self) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        migrations::current_version(&conn).map_err(Into::into)
    }

    /// 最近一次索引完成时间（Unix 秒）
    pub fn last_indexed_at(&self) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        read_last_indexed(&conn).map_err(Into::into)
    }

    /// 记录索引完成时间
    pub fn mark_indexed(&self, at: i64) -> Result<()> {
        self.write(|tx| {
            tx.execute(
                "INSERT INTO meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![META_LAST_INDEXED, at.to_string()],
            )?;
            Ok(())
        })
    }

    /// 获取统计信息
    pub fn get_stats(&self) -> Result<Stats> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
            SELECT
                (SELECT COUNT(*) FROM agents),
                (SELECT COUNT(*) FROM sources),
                (SELECT COUNT(*) FROM workspaces),
                (SELECT COUNT(*) FROM conversations),
                (SELECT COUNT(*) FROM messages)
            "#,
            [],
            |row| {
                Ok(Stats {
                    agent_count: row.get(0)?,
                    source_count: row.get(1)?,
                    workspace_count: row.get(2)?,
                    conversation_count: row.get(3)?,
                    message_count: row.get(4)?,
                })
            },
        )
        .map_err(Into::into)
    }

    /// 上次成功索引时记录的文件指纹
    pub fn indexed_file_stamp(&self, path: &str) -> Result<Option<FileStamp>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT mtime, size FROM indexed_files WHERE path = ?1",
            params![path],
            |row| {
                Ok(FileStamp {
                    mtime: row.get(0)?,
                    size: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    /// 从 messages 重建 FTS 索引（损坏修复）
    #[cfg(feature = "fts")]
    pub fn rebuild_fts(&self) -> Result<()> {
        self.write(|tx| {
            tx.execute("INSERT INTO messages_fts(messages_fts) VALUES('rebuild')", [])?;
            Ok(())
        })?;
        tracing::info!("FTS 索引已重建");
        Ok(())
    }
}

fn run_immediate<T, F>(conn: &mut Connection, f: &mut F) -> Result<T>
where
    F: FnMut(&Transaction<'_>) -> Result<T>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

pub(crate) fn record_indexed_file_tx(conn: &Connection, path: &str, stamp: FileStamp) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO indexed_files (path, mtime, size, indexed_at) VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(path) DO UPDATE SET
            mtime = excluded.mtime,
            size = excluded.size,
            indexed_at = excluded.indexed_at
        "#,
        params![path, stamp.mtime, stamp.size, chrono::Utc::now().timestamp()],
    )?;
    Ok(())
}

fn source_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Source> {
    Ok(Source {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: row.get(2)?,
        host: row.get(3)?,
        last_synced_at: row.get(4)?,
    })
}

pub(crate) fn read_last_indexed(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1",
            params![META_LAST_INDEXED],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.and_then(|v| v.parse().ok()))
}

fn value_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => i.into(),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned().into(),
        ValueRef::Blob(b) => b.iter().map(|byte| serde_json::Value::from(*byte)).collect(),
    }
}

// ==================== 事务内操作 ====================
//
// 以下函数只在调用方的事务内执行，ingest 会把它们组合进同一个事务。

pub(crate) fn upsert_agent_tx(conn: &Connection, input: &AgentInput) -> Result<i64> {
    conn.execute(
        "INSERT INTO agents (slug, name, kind) VALUES (?1, ?2, ?3) ON CONFLICT(slug) DO NOTHING",
        params![input.slug, input.name, input.kind],
    )?;
    conn.query_row(
        "SELECT id FROM agents WHERE slug = ?1",
        params![input.slug],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

/// `path` 必须已经规范化
pub(crate) fn workspace_id_tx(conn: &Connection, path: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO workspaces (path) VALUES (?1) ON CONFLICT(path) DO NOTHING",
        params![path],
    )?;
    conn.query_row(
        "SELECT id FROM workspaces WHERE path = ?1",
        params![path],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

pub(crate) fn source_id_tx(conn: &Connection, name: &str, kind: SourceKind, host: Option<&str>) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO sources (name, kind, host) VALUES (?1, ?2, ?3)
        ON CONFLICT(name) DO UPDATE SET host = COALESCE(excluded.host, sources.host)
        "#,
        params![name, kind.as_str(), host],
    )?;
    conn.query_row(
        "SELECT id FROM sources WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

pub(crate) fn upsert_conversation_tx(conn: &Connection, input: &ConversationInput) -> Result<i64> {
    if let Some(ended) = input.ended_at {
        if ended < input.started_at {
            return Err(Error::InvalidInput(format!(
                "ended_at {} is before started_at {}",
                ended, input.started_at
            )));
        }
    }

    // 本机来源同时认领 source_id 为空的旧行，精确匹配优先
    let existing: Option<i64> = conn
        .query_row(
            r#"
            SELECT id FROM conversations
            WHERE agent_id = ?1 AND source_path = ?2
              AND (IFNULL(source_id, 0) = IFNULL(?3, 0)
                   OR (source_id IS NULL
                       AND ?3 IN (SELECT id FROM sources WHERE kind = 'local')))
            ORDER BY source_id IS NULL
            LIMIT 1
            "#,
            params![input.agent_id, input.source_path, input.source_id],
            |row| row.get(0),
        )
        .optional()?;

    let now = chrono::Utc::now().timestamp();

    if let Some(id) = existing {
        conn.execute(
            r#"
            UPDATE conversations SET
                workspace_id = ?1,
                external_id = ?2,
                title = ?3,
                started_at = ?4,
                ended_at = ?5,
                origin_host = ?6,
                metadata = ?7,
                indexed_at = ?8,
                source_id = ?9
            WHERE id = ?10
            "#,
            params![
                input.workspace_id,
                input.external_id,
                input.title,
                input.started_at,
                input.ended_at,
                input.origin_host,
                input.metadata,
                now,
                input.source_id,
                id,
            ],
        )?;
        return Ok(id);
    }

    conn.execute(
        r#"
        INSERT INTO conversations
            (agent_id, workspace_id, source_id, external_id, title, source_path,
             started_at, ended_at, origin_host, metadata, indexed_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        params![
            input.agent_id,
            input.workspace_id,
            input.source_id,
            input.external_id,
            input.title,
            input.source_path,
            input.started_at,
            input.ended_at,
            input.origin_host,
            input.metadata,
            now,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

/// 先删后插；FTS 触发器在同一事务内同步删除旧索引
pub(crate) fn replace_messages_tx(conn: &Connection, conversation_id: i64, messages: &[MessageInput]) -> Result<usize> {
    conn.execute(
        "DELETE FROM messages WHERE conversation_id = ?1",
        params![conversation_id],
    )?;

    let mut stmt = conn.prepare_cached(
        r#"
        INSERT INTO messages
            (conversation_id, idx, role, author, created_at, content, line_number, extra)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )?;

    for msg in messages {
        stmt.execute(params![
            conversation_id,
            msg.idx,
            msg.role,
            msg.author,
            msg.created_at,
            msg.content,
            msg.line_number,
            msg.extra,
        ])?;
    }

    Ok(messages.len())
}
