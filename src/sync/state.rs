//! 每台主机的同步状态机及其持久化
//!
//! ```text
//! discovered → probed → selected → [installed] → indexed → synced
//!                     ↘ skipped
//! 任一步骤失败 → unreachable（探测阶段） / failed（其后）
//! ```
//!
//! 状态写入 `sync_hosts`，中断后 `resume` 只跳过已 `synced` 的主机。

use crate::db::SessionDB;
use crate::error::{Error, Result};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// 主机同步状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    Discovered,
    Probed,
    Selected,
    Skipped,
    Installed,
    Indexed,
    Synced,
    Unreachable,
    Failed,
}

impl HostState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostState::Discovered => "discovered",
            HostState::Probed => "probed",
            HostState::Selected => "selected",
            HostState::Skipped => "skipped",
            HostState::Installed => "installed",
            HostState::Indexed => "indexed",
            HostState::Synced => "synced",
            HostState::Unreachable => "unreachable",
            HostState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HostState::Skipped | HostState::Synced | HostState::Unreachable | HostState::Failed
        )
    }

    /// 终态里的成功态，run 全部成功才算完成
    pub fn is_success(&self) -> bool {
        matches!(self, HostState::Skipped | HostState::Synced)
    }

    pub fn can_transition_to(&self, next: HostState) -> bool {
        use HostState::*;
        match (self, next) {
            (Discovered, Probed | Unreachable | Failed) => true,
            (Probed, Selected | Skipped | Failed) => true,
            (Selected, Installed | Indexed | Unreachable | Failed) => true,
            (Installed, Indexed | Unreachable | Failed) => true,
            (Indexed, Synced | Unreachable | Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "discovered" => HostState::Discovered,
            "probed" => HostState::Probed,
            "selected" => HostState::Selected,
            "skipped" => HostState::Skipped,
            "installed" => HostState::Installed,
            "indexed" => HostState::Indexed,
            "synced" => HostState::Synced,
            "unreachable" => HostState::Unreachable,
            "failed" => HostState::Failed,
            other => return Err(Error::Corrupt(format!("unknown host state {:?}", other))),
        })
    }
}

/// 持久化的主机进度
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostProgress {
    pub source_name: String,
    pub state: HostState,
    pub detail: Option<String>,
    pub updated_at: i64,
}

impl SessionDB {
    /// 新建一次同步
    pub fn begin_sync_run(&self) -> Result<String> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        self.write(|tx| {
            tx.execute(
                "INSERT INTO sync_runs (id, started_at) VALUES (?1, ?2)",
                params![run_id, now],
            )?;
            Ok(())
        })?;
        tracing::debug!("Sync run {} started", run_id);
        Ok(run_id)
    }

    /// 最近一次未完成的同步
    pub fn latest_unfinished_sync_run(&self) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let run_id = conn
            .query_row(
                "SELECT id FROM sync_runs WHERE finished_at IS NULL ORDER BY started_at DESC, rowid DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(run_id)
    }

    pub fn finish_sync_run(&self, run_id: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        self.write(|tx| {
            tx.execute(
                "UPDATE sync_runs SET finished_at = ?1 WHERE id = ?2",
                params![now, run_id],
            )?;
            Ok(())
        })
    }

    /// 记录主机状态（同一 run 内覆盖）
    pub fn record_host_state(
        &self,
        run_id: &str,
        source_name: &str,
        state: HostState,
        detail: Option<&str>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        self.write(|tx| {
            tx.execute(
                r#"
                INSERT INTO sync_hosts (run_id, source_name, state, detail, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(run_id, source_name) DO UPDATE SET
                    state = excluded.state,
                    detail = excluded.detail,
                    updated_at = excluded.updated_at
                "#,
                params![run_id, source_name, state.as_str(), detail, now],
            )?;
            Ok(())
        })
    }

    /// 读取某次同步的全部主机进度
    pub fn host_progress(&self, run_id: &str) -> Result<HashMap<String, HostProgress>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT source_name, state, detail, updated_at FROM sync_hosts WHERE run_id = ?1",
        )?;
        let rows = stmt.query_map([run_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut progress = HashMap::new();
        for row in rows {
            let (source_name, state, detail, updated_at) = row?;
            progress.insert(
                source_name.clone(),
                HostProgress {
                    source_name,
                    state: state.parse()?,
                    detail,
                    updated_at,
                },
            );
        }
        Ok(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use HostState::*;
        let path = [Discovered, Probed, Selected, Installed, Indexed, Synced];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        // install 可选
        assert!(Selected.can_transition_to(Indexed));
    }

    #[test]
    fn test_terminal_states_are_final() {
        use HostState::*;
        for state in [Skipped, Synced, Unreachable, Failed] {
            assert!(state.is_terminal());
            for next in [Discovered, Probed, Selected, Indexed, Synced, Failed] {
                assert!(!state.can_transition_to(next));
            }
        }
        assert!(!Discovered.can_transition_to(Synced));
        assert!(!Probed.can_transition_to(Unreachable));
    }

    #[test]
    fn test_state_roundtrip_str() {
        for state in [HostState::Discovered, HostState::Unreachable, HostState::Synced] {
            assert_eq!(state.as_str().parse::<HostState>().unwrap(), state);
        }
        assert!("bogus".parse::<HostState>().is_err());
    }
}
