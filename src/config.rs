//! 数据库配置

use std::path::PathBuf;
use std::time::Duration;

/// 环境变量：覆盖默认数据库路径
pub const DB_PATH_ENV: &str = "AGENT_SESSION_INDEX_DB";

/// 数据库连接配置
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// SQLite 文件路径
    pub path: PathBuf,

    /// SQLite busy_timeout，单次等待锁的上限
    pub busy_timeout: Duration,

    /// 写事务遇到锁竞争时的最大尝试次数
    pub write_retries: u32,

    /// 退避基数，第 n 次重试等待 base * 2^(n-1)
    pub retry_backoff: Duration,
}

impl DbConfig {
    /// 创建本地 SQLite 配置
    pub fn local<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            busy_timeout: Duration::from_millis(2_000),
            write_retries: 5,
            retry_backoff: Duration::from_millis(50),
        }
    }

    /// 从环境变量或默认路径创建配置
    pub fn from_env() -> Self {
        if let Ok(path) = std::env::var(DB_PATH_ENV) {
            if !path.trim().is_empty() {
                return Self::local(path);
            }
        }

        // 默认路径: ~/.agent-session-index/db/index.db
        let default_path = dirs::home_dir()
            .map(|h| h.join(".agent-session-index").join("db").join("index.db"))
            .unwrap_or_else(|| PathBuf::from("index.db"));

        Self::local(default_path)
    }

    /// 获取数据库文件路径
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, attempts: u32, backoff: Duration) -> Self {
        self.write_retries = attempts.max(1);
        self.retry_backoff = backoff;
        self
    }

    /// 第 `attempt` 次失败后的等待时间（上限 2s）
    pub(crate) fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(6);
        (self.retry_backoff * factor).min(Duration::from_secs(2))
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
