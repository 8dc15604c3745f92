//! 采集服务 - 扫描本机会话文件并写入数据库
//!
//! 解析在有界线程池里并行，写入串行（单写者）。单个文件失败只记录，
//! 不影响同批其他文件。默认增量：mtime 与大小都未变的文件直接跳过。

use crate::db::{FileStamp, SessionDB};
use crate::error::{Error, Result};
use crate::normalizer::{IngestContext, Normalizer};
use crate::readers::{read_session_file, SessionFormat};
use crate::types::RawSession;
use rayon::prelude::*;
use serde::Serialize;
use std::path::PathBuf;
use walkdir::WalkDir;

/// 单个文件的处理结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    Indexed { conversations: usize, messages: usize },
    /// 自上次索引后未变化
    Unchanged,
    Failed { error: String, retryable: bool },
}

#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub path: String,
    #[serde(flatten)]
    pub status: FileStatus,
}

/// 采集结果
#[derive(Debug, Default, Clone, Serialize)]
pub struct CollectResult {
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub conversations_indexed: usize,
    pub messages_indexed: usize,
    pub outcomes: Vec<FileOutcome>,
    pub errors: Vec<String>,
}

impl CollectResult {
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, FileStatus::Failed { .. }))
            .count()
    }

    fn record(&mut self, path: String, status: FileStatus) {
        match &status {
            FileStatus::Indexed {
                conversations,
                messages,
            } => {
                self.conversations_indexed += conversations;
                self.messages_indexed += messages;
            }
            FileStatus::Unchanged => self.files_skipped += 1,
            FileStatus::Failed { error, .. } => {
                self.errors.push(format!("{}: {}", path, error));
            }
        }
        self.outcomes.push(FileOutcome { path, status });
    }
}

/// 采集服务
pub struct Collector<'a> {
    db: &'a SessionDB,
    ctx: IngestContext,
    workers: usize,
    full: bool,
}

impl<'a> Collector<'a> {
    /// 创建本机采集服务
    pub fn new(db: &'a SessionDB) -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .min(8);
        Self {
            db,
            ctx: IngestContext::local(),
            workers,
            full: false,
        }
    }

    pub fn with_context(mut self, ctx: IngestContext) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// 全量模式：不比对文件指纹，全部重新解析
    pub fn full(mut self, full: bool) -> Self {
        self.full = full;
        self
    }

    /// 扫描目录，返回可识别的会话文件（排序后）
    pub fn discover(roots: &[PathBuf]) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = roots
            .iter()
            .flat_map(|root| {
                WalkDir::new(root)
                    .follow_links(false)
                    .into_iter()
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| entry.file_type().is_file())
                    .map(|entry| entry.into_path())
                    .filter(|path| SessionFormat::detect(path).is_some())
            })
            .collect();
        files.sort();
        files.dedup();
        files
    }

    /// 扫描目录并采集，完成后记录索引时间
    pub fn collect_roots(&self, roots: &[PathBuf]) -> Result<CollectResult> {
        let files = Self::discover(roots);
        let result = self.collect_paths(&files)?;
        self.db.mark_indexed(chrono::Utc::now().timestamp())?;
        Ok(result)
    }

    /// 采集指定文件
    ///
    /// 只有线程池创建失败才返回 Err；文件级错误记录在结果里。
    pub fn collect_paths(&self, paths: &[PathBuf]) -> Result<CollectResult> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| Error::Other(anyhow::anyhow!("worker pool: {}", e)))?;

        let mut result = CollectResult::default();

        // 分块：一块并行解析，随后串行写入，内存占用有上限
        for chunk in paths.chunks(self.workers * 4) {
            let mut pending = Vec::with_capacity(chunk.len());
            for path in chunk {
                let path_str = path.to_string_lossy().into_owned();
                let stamp = FileStamp::of(path);
                if stamp.is_some() && self.unchanged(&path_str, stamp) {
                    result.files_scanned += 1;
                    result.record(path_str, FileStatus::Unchanged);
                    continue;
                }
                pending.push((path, path_str, stamp));
            }

            let parsed: Vec<(String, Option<FileStamp>, Result<Vec<RawSession>>)> = pool.install(|| {
                pending
                    .par_iter()
                    .map(|(path, path_str, stamp)| (path_str.clone(), *stamp, read_session_file(path)))
                    .collect()
            });

            for (path, stamp, sessions) in parsed {
                result.files_scanned += 1;
                let status = match sessions {
                    Ok(sessions) => self.ingest_file(&path, sessions, stamp),
                    Err(e) => failed(&e),
                };
                if let FileStatus::Failed { error, .. } = &status {
                    tracing::debug!("Failed to index {}: {}", path, error);
                }
                result.record(path, status);
            }
        }

        if result.conversations_indexed > 0 || result.failed() > 0 {
            tracing::info!(
                "Collect: {} files ({} unchanged), {} conversations, {} messages, {} failed",
                result.files_scanned,
                result.files_skipped,
                result.conversations_indexed,
                result.messages_indexed,
                result.failed()
            );
        }

        Ok(result)
    }

    /// 写入已解析的会话（远程拉取使用），按 source_path 记录结果
    pub fn collect_sessions(&self, sessions: Vec<RawSession>) -> CollectResult {
        let mut result = CollectResult::default();
        for session in sessions {
            result.files_scanned += 1;
            let path = session.source_path.clone();
            let status = self.ingest_file(&path, vec![session], None);
            result.record(path, status);
        }
        result
    }

    fn unchanged(&self, path: &str, stamp: Option<FileStamp>) -> bool {
        if self.full {
            return false;
        }
        match self.db.indexed_file_stamp(path) {
            Ok(previous) => previous == stamp,
            Err(e) => {
                tracing::debug!("Stamp lookup failed for {}: {}", path, e);
                false
            }
        }
    }

    /// 一个文件的会话先全部归一化，再在一个事务内写入
    fn ingest_file(&self, path: &str, sessions: Vec<RawSession>, stamp: Option<FileStamp>) -> FileStatus {
        let normalized = match sessions
            .into_iter()
            .map(|raw| Normalizer::normalize(raw, &self.ctx))
            .collect::<Result<Vec<_>>>()
        {
            Ok(normalized) => normalized,
            Err(e) => return failed(&e),
        };

        match self.db.ingest_file_sessions(path, &normalized, stamp) {
            Ok(outcomes) => FileStatus::Indexed {
                conversations: outcomes.len(),
                messages: outcomes.iter().map(|o| o.messages).sum(),
            },
            Err(e) => failed(&e),
        }
    }
}

fn failed(e: &Error) -> FileStatus {
    FileStatus::Failed {
        error: e.to_string(),
        retryable: e.is_retryable(),
    }
}

