//! 数据库迁移模块
//!
//! 版本号记录在 `schema_migrations`，`MAX(version)` 即为 schema 版本。
//! 磁盘版本高于本程序支持的版本时拒绝打开，避免按旧形状读出错误数据。

use crate::error::{Error, Result};
use crate::schema::INDEXED_FILES_SQL;
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};
use tracing::{info, warn};

/// 当前 schema 版本
pub const SCHEMA_VERSION: i64 = 3;

/// 初始化迁移系统
pub fn initialize_migrations(conn: &Connection) -> SqliteResult<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )
        "#,
        [],
    )?;
    Ok(())
}

/// 读取磁盘上的 schema 版本
///
/// 迁移表不存在时返回 `None`（全新或非本程序创建的数据库）。
pub fn current_version(conn: &Connection) -> SqliteResult<Option<i64>> {
    if !table_exists(conn, "schema_migrations")? {
        return Ok(None);
    }
    let version: Option<i64> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .optional()?
        .flatten();
    Ok(Some(version.unwrap_or(0)))
}

/// 记录迁移版本
fn record_migration(conn: &Connection, version: i64) -> SqliteResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        [version, chrono::Utc::now().timestamp()],
    )?;
    Ok(())
}

/// 检查表是否存在
pub(crate) fn table_exists(conn: &Connection, table: &str) -> SqliteResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name=?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// 检查列是否存在
fn column_exists(conn: &Connection, table: &str, column: &str) -> SqliteResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let columns = stmt.query_map([], |row| {
        let col_name: String = row.get(1)?;
        Ok(col_name)
    })?;

    for col_name in columns.flatten() {
        if col_name == column {
            return Ok(true);
        }
    }

    Ok(false)
}

fn add_column_if_missing(conn: &Connection, table: &str, column: &str, ddl: &str) -> SqliteResult<()> {
    if column_exists(conn, table, column)? {
        return Ok(());
    }
    info!("Adding {}.{} column", table, column);
    conn.execute(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, ddl), [])?;
    Ok(())
}

/// 迁移 1: messages 增加行号与附加字段（搜索命中定位到源文件行）
fn migration_001_message_locations(conn: &Connection) -> SqliteResult<()> {
    if !table_exists(conn, "messages")? {
        return Ok(());
    }
    add_column_if_missing(conn, "messages", "line_number", "INTEGER")?;
    add_column_if_missing(conn, "messages", "extra", "TEXT")?;
    Ok(())
}

/// 迁移 2: conversations 增加来源追踪字段
///
/// 旧数据 source_id 为 NULL，查询时 origin_kind 回退为 "local"。
fn migration_002_provenance(conn: &Connection) -> SqliteResult<()> {
    if !table_exists(conn, "conversations")? {
        return Ok(());
    }
    add_column_if_missing(conn, "conversations", "source_id", "INTEGER REFERENCES sources(id)")?;
    add_column_if_missing(conn, "conversations", "origin_host", "TEXT")?;
    Ok(())
}

/// 迁移 3: 记录已索引文件的指纹，供增量采集比对
fn migration_003_indexed_files(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(INDEXED_FILES_SQL)
}

/// 执行所有待应用的迁移
pub fn run_migrations(conn: &Connection) -> Result<()> {
    initialize_migrations(conn)?;

    let current = current_version(conn)?.unwrap_or(0);
    if current > SCHEMA_VERSION {
        warn!(
            "Database schema version {} is newer than supported {}",
            current, SCHEMA_VERSION
        );
        return Err(Error::IncompatibleSchema {
            found: current,
            expected: SCHEMA_VERSION,
        });
    }
    if current == SCHEMA_VERSION {
        return Ok(());
    }

    info!("Migrating database schema {} -> {}", current, SCHEMA_VERSION);

    // 事务保证原子性
    let tx = conn.unchecked_transaction()?;

    let steps: [(i64, fn(&Connection) -> SqliteResult<()>); 3] = [
        (1, migration_001_message_locations),
        (2, migration_002_provenance),
        (3, migration_003_indexed_files),
    ];
    for (version, step) in steps {
        if current < version {
            if let Err(e) = step(&tx) {
                warn!("Migration {} failed: {}", version, e);
                return Err(e.into());
            }
            record_migration(&tx, version)?;
            info!("Migration {} applied", version);
        }
    }

    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_migrates_pre_provenance_store() {
        let conn = Connection::open_in_memory().unwrap();

        // 模拟老版本数据库
        conn.execute_batch(
            r#"
            CREATE TABLE conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id INTEGER NOT NULL,
                source_path TEXT NOT NULL,
                started_at INTEGER NOT NULL
            );
            CREATE TABLE messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL,
                idx INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL
            );
            "#,
        )
        .unwrap();

        run_migrations(&conn).unwrap();

        assert!(column_exists(&conn, "messages", "line_number").unwrap());
        assert!(column_exists(&conn, "messages", "extra").unwrap());
        assert!(column_exists(&conn, "conversations", "source_id").unwrap());
        assert!(column_exists(&conn, "conversations", "origin_host").unwrap());
        assert!(table_exists(&conn, "indexed_files").unwrap());
        assert_eq!(current_version(&conn).unwrap(), Some(SCHEMA_VERSION));

        // 幂等
        run_migrations(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn test_newer_version_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_migrations(&conn).unwrap();
        record_migration(&conn, SCHEMA_VERSION + 1).unwrap();

        match run_migrations(&conn) {
            Err(Error::IncompatibleSchema { found, expected }) => {
                assert_eq!(found, SCHEMA_VERSION + 1);
                assert_eq!(expected, SCHEMA_VERSION);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_version_absent_without_migration_table() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(current_version(&conn).unwrap(), None);
    }
}
