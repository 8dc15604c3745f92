//! 搜索功能

use crate::db::SessionDB;
use crate::error::{Error, Result, StatusCode};
use crate::paths::canonical_path;
use crate::timeline::SourceFilter;
use parking_lot::Mutex;
use rusqlite::ErrorCode;
use serde::Serialize;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 转义 FTS5 查询中的特殊字符
///
/// FTS5 特殊字符包括：
/// - `-` (NOT 操作符)
/// - `.` (列指定符)
/// - `*` (前缀匹配)
/// - `"` (短语分隔符)
/// - `(`, `)` (分组)
/// - `^` (权重提升)
/// - `+` (必需)
/// - `:` (列指定符)
///
/// 对每个词单独用双引号包裹，用 OR 连接，实现"匹配任一关键词"的搜索
pub fn escape_fts5_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| {
            // 内部双引号需要转义（两个双引号表示一个字面双引号）
            format!("\"{}\"", word.replace('"', "\"\""))
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// 搜索过滤条件
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// agent slug，空表示全部
    pub agents: Vec<String>,
    pub workspace: Option<String>,
    pub source: SourceFilter,
    /// 会话开始时间下界（Unix 秒，含）
    pub since: Option<i64>,
    /// 会话开始时间上界（Unix 秒，含）
    pub until: Option<i64>,
}

/// 搜索选项
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub offset: usize,
    /// 超时后返回已得到的结果并标记 partial
    pub time_budget: Option<Duration>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 20,
            offset: 0,
            time_budget: None,
        }
    }
}

/// 搜索命中
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub conversation_id: i64,
    pub message_id: i64,
    pub source_path: String,
    pub line_number: Option<i64>,
    pub agent: String,
    pub workspace: Option<String>,
    pub title: Option<String>,
    pub role: String,
    pub snippet: String,
    pub score: f64,
    pub created_at: Option<i64>,
}

/// 搜索结果
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub hits: Vec<SearchHit>,
    pub limit: usize,
    pub returned: usize,
    /// 时间预算耗尽，结果不完整
    pub partial: bool,
    pub elapsed_ms: u64,
    pub time_budget_ms: Option<u64>,
}

impl SearchOutcome {
    pub fn status(&self) -> StatusCode {
        if self.partial {
            StatusCode::Partial
        } else {
            StatusCode::Success
        }
    }
}

/// 时间预算：到期后中断连接上正在执行的语句
///
/// 中断与结束都在 `state` 锁内完成，Drop 返回后计时线程不会再中断连接。
struct BudgetGuard {
    cancel: mpsc::Sender<()>,
    state: Arc<Mutex<BudgetState>>,
}

#[derive(Debug, Default)]
struct BudgetState {
    done: bool,
    fired: bool,
}

impl BudgetGuard {
    fn arm(handle: rusqlite::InterruptHandle, budget: Duration) -> Self {
        let (cancel, rx) = mpsc::channel::<()>();
        let state = Arc::new(Mutex::new(BudgetState::default()));
        let shared = state.clone();
        std::thread::spawn(move || {
            if let Err(mpsc::RecvTimeoutError::Timeout) = rx.recv_timeout(budget) {
                expire(&shared, &handle);
            }
        });
        Self { cancel, state }
    }

    fn fired(&self) -> bool {
        self.state.lock().fired
    }
}

/// 查询已结束则不中断
fn expire(state: &Mutex<BudgetState>, handle: &rusqlite::InterruptHandle) {
    let mut state = state.lock();
    if !state.done {
        state.fired = true;
        handle.interrupt();
    }
}

impl Drop for BudgetGuard {
    fn drop(&mut self) {
        self.state.lock().done = true;
        let _ = self.cancel.send(());
    }
}

fn is_interrupted(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::OperationInterrupted
    )
}

impl SessionDB {
    /// FTS5 全文搜索
    pub fn search(&self, query: &str, filters: &SearchFilters, options: &SearchOptions) -> Result<SearchOutcome> {
        let escaped_query = escape_fts5_query(query);
        if escaped_query.is_empty() {
            return Err(Error::InvalidInput("empty search query".into()));
        }
        if options.limit == 0 {
            return Err(Error::InvalidInput("limit must be positive".into()));
        }
        if let (Some(since), Some(until)) = (filters.since, filters.until) {
            if since > until {
                return Err(Error::InvalidInput(format!("since {} is after until {}", since, until)));
            }
        }

        let mut clauses = vec!["messages_fts MATCH ?".to_string()];
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(escaped_query)];

        if !filters.agents.is_empty() {
            clauses.push(format!("a.slug IN ({})", vec!["?"; filters.agents.len()].join(", ")));
            for agent in &filters.agents {
                params_vec.push(Box::new(agent.clone()));
            }
        }
        if let Some(ws) = &filters.workspace {
            let canonical = canonical_path(ws)
                .ok_or_else(|| Error::InvalidInput(format!("workspace path is not absolute: {:?}", ws)))?;
            clauses.push("w.path = ?".into());
            params_vec.push(Box::new(canonical));
        }
        if let Some(clause) = filters.source.sql_clause(&mut params_vec) {
            clauses.push(clause);
        }
        if let Some(since) = filters.since {
            clauses.push("c.started_at >= ?".into());
            params_vec.push(Box::new(since));
        }
        if let Some(until) = filters.until {
            clauses.push("c.started_at <= ?".into());
            params_vec.push(Box::new(until));
        }
        params_vec.push(Box::new(options.limit as i64));
        params_vec.push(Box::new(options.offset as i64));

        let sql = format!(
            r#"
            SELECT
                m.conversation_id,
                m.id,
                c.source_path,
                m.line_number,
                a.slug,
                w.path,
                c.title,
                m.role,
                snippet(messages_fts, 0, '<mark>', '</mark>', '...', 64) AS snippet,
                bm25(messages_fts) AS score,
                m.created_at
            FROM messages_fts
            JOIN messages m ON messages_fts.rowid = m.id
            JOIN conversations c ON c.id = m.conversation_id
            JOIN agents a ON a.id = c.agent_id
            LEFT JOIN workspaces w ON w.id = c.workspace_id
            LEFT JOIN sources s ON s.id = c.source_id
            WHERE {}
            ORDER BY score, m.id
            LIMIT ? OFFSET ?
            "#,
            clauses.join(" AND ")
        );

        let started = Instant::now();
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();

        let guard = options
            .time_budget
            .map(|budget| BudgetGuard::arm(conn.get_interrupt_handle(), budget));

        let mut hits = Vec::new();
        let mut partial = false;
        {
            let mut rows = stmt.query(params_refs.as_slice())?;
            loop {
                match rows.next() {
                    Ok(Some(row)) => hits.push(SearchHit {
                        conversation_id: row.get(0)?,
                        message_id: row.get(1)?,
                        source_path: row.get(2)?,
                        line_number: row.get(3)?,
                        agent: row.get(4)?,
                        workspace: row.get(5)?,
                        title: row.get(6)?,
                        role: row.get(7)?,
                        snippet: row.get(8)?,
                        score: row.get(9)?,
                        created_at: row.get(10)?,
                    }),
                    Ok(None) => break,
                    Err(e) if is_interrupted(&e) && guard.as_ref().is_some_and(|g| g.fired()) => {
                        partial = true;
                        break;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        drop(guard);

        let elapsed = started.elapsed();
        if partial {
            tracing::debug!(
                "Search budget exhausted after {:?}, returning {} hits",
                elapsed,
                hits.len()
            );
        }

        Ok(SearchOutcome {
            returned: hits.len(),
            hits,
            limit: options.limit,
            partial,
            elapsed_ms: elapsed.as_millis() as u64,
            time_budget_ms: options.time_budget.map(|b| b.as_millis() as u64),
        })
    }
}
