//! 数据库 Schema 定义
//!
//! 时间戳统一为 Unix 秒。

/// 核心 Schema SQL
pub const SCHEMA_SQL: &str = r#"
-- 键值元信息 (last_indexed_at 等)
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Agents 表：slug 创建后不可变
CREATE TABLE IF NOT EXISTS agents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    slug TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'cli',
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

-- Sources 表：数据来源（本机或远程主机）
CREATE TABLE IF NOT EXISTS sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL DEFAULT 'local',   -- local | ssh
    host TEXT,
    last_synced_at INTEGER,               -- 增量拉取检查点
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

-- Workspaces 表：规范化的绝对路径
CREATE TABLE IF NOT EXISTS workspaces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

-- Conversations 表
CREATE TABLE IF NOT EXISTS conversations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id INTEGER NOT NULL REFERENCES agents(id),
    workspace_id INTEGER REFERENCES workspaces(id),
    source_id INTEGER REFERENCES sources(id),
    external_id TEXT,
    title TEXT,
    source_path TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    ended_at INTEGER,
    origin_host TEXT,
    metadata TEXT,
    indexed_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    CHECK (ended_at IS NULL OR ended_at >= started_at)
);

-- Messages 表：随会话级联删除
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    idx INTEGER NOT NULL,
    role TEXT NOT NULL,
    author TEXT,
    created_at INTEGER,
    content TEXT NOT NULL,
    line_number INTEGER,
    extra TEXT,
    UNIQUE(conversation_id, idx)
);

-- 索引
-- 同一来源下 (agent, source_path) 唯一；source 为空视为本机
CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_identity
    ON conversations(agent_id, source_path, IFNULL(source_id, 0));
CREATE INDEX IF NOT EXISTS idx_conversations_started ON conversations(started_at, id);
CREATE INDEX IF NOT EXISTS idx_conversations_workspace ON conversations(workspace_id);
CREATE INDEX IF NOT EXISTS idx_conversations_source ON conversations(source_id);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
"#;

/// FTS5 全文搜索 Schema (索引 messages.content)
pub const FTS_SCHEMA_SQL: &str = r#"
-- 外部内容表，触发器与 messages 写入处于同一事务
CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
    content,
    content='messages',
    content_rowid='id',
    tokenize='unicode61'
);

CREATE TRIGGER IF NOT EXISTS messages_ai AFTER INSERT ON messages BEGIN
    INSERT INTO messages_fts(rowid, content) VALUES (new.id, new.content);
END;

CREATE TRIGGER IF NOT EXISTS messages_ad AFTER DELETE ON messages BEGIN
    INSERT INTO messages_fts(messages_fts, rowid, content) VALUES('delete', old.id, old.content);
END;

CREATE TRIGGER IF NOT EXISTS messages_au AFTER UPDATE ON messages BEGIN
    INSERT INTO messages_fts(messages_fts, rowid, content) VALUES('delete', old.id, old.content);
    INSERT INTO messages_fts(rowid, content) VALUES (new.id, new.content);
END;
"#;

/// 多机同步进度 Schema（断点续传）
pub const SYNC_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sync_runs (
    id TEXT PRIMARY KEY,          -- UUID
    started_at INTEGER NOT NULL,
    finished_at INTEGER
);

CREATE TABLE IF NOT EXISTS sync_hosts (
    run_id TEXT NOT NULL REFERENCES sync_runs(id) ON DELETE CASCADE,
    source_name TEXT NOT NULL,
    state TEXT NOT NULL,
    detail TEXT,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (run_id, source_name)
);
"#;

/// 已索引文件：mtime (毫秒) 与大小都未变时增量采集跳过
pub const INDEXED_FILES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS indexed_files (
    path TEXT PRIMARY KEY,
    mtime INTEGER NOT NULL,
    size INTEGER NOT NULL,
    indexed_at INTEGER NOT NULL
);
"#;

/// 获取完整 Schema (根据 feature flags)
pub fn full_schema(fts: bool, sync: bool) -> String {
    let mut sql = SCHEMA_SQL.to_string();
    sql.push_str(INDEXED_FILES_SQL);

    if fts {
        sql.push_str(FTS_SCHEMA_SQL);
    }

    if sync {
        sql.push_str(SYNC_SCHEMA_SQL);
    }

    sql
}

/// Health 检查必须存在的表
pub const REQUIRED_TABLES: &[&str] = &["agents", "workspaces", "conversations", "messages"];
