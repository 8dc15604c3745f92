//! 多机同步编排
//!
//! 主机之间有界并发、互不影响；每台主机按状态机推进，每步都落库。
//! 拉回的数据走本地 [`Collector`]，与本机索引使用同一套归一化。

use crate::collector::{CollectResult, Collector};
use crate::db::SessionDB;
use crate::error::{Error, RemoteErrorKind, Result, StatusCode};
use crate::normalizer::IngestContext;
use crate::sync::config::{SourceDefinition, SourcesConfig};
use crate::sync::state::HostState;
use crate::sync::transport::{ProbeInfo, RemoteTransport};
use crate::types::{RawSession, SourceKind};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// 同步选项
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// 同时处理的主机数
    pub max_concurrency: usize,
    /// 每个远程步骤的超时
    pub step_timeout: Duration,
    /// 远程未安装时是否安装
    pub install: bool,
    /// 继续最近一次未完成的同步
    pub resume: bool,
    /// 只拉取上次同步之后变化的会话
    pub incremental: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            step_timeout: Duration::from_secs(300),
            install: false,
            resume: false,
            incremental: true,
        }
    }
}

/// 单台主机的结果
#[derive(Debug, Clone, Serialize)]
pub struct HostOutcome {
    pub source: String,
    pub host: String,
    pub state: HostState,
    pub probe: Option<ProbeInfo>,
    pub conversations: usize,
    pub messages: usize,
    /// 远程导出或本地写入失败的文件
    pub file_errors: Vec<String>,
    pub error: Option<String>,
    pub retryable: bool,
    /// 上次同步已完成，本次跳过
    pub resumed: bool,
}

impl HostOutcome {
    fn new(source: &SourceDefinition) -> Self {
        Self {
            source: source.name.clone(),
            host: source.host.clone(),
            state: HostState::Discovered,
            probe: None,
            conversations: 0,
            messages: 0,
            file_errors: Vec::new(),
            error: None,
            retryable: false,
            resumed: false,
        }
    }
}

/// 同步汇总
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: String,
    pub resumed: bool,
    pub hosts: Vec<HostOutcome>,
}

impl SyncReport {
    pub fn synced(&self) -> usize {
        self.hosts.iter().filter(|h| h.state == HostState::Synced).count()
    }

    pub fn failed(&self) -> usize {
        self.hosts.iter().filter(|h| !h.state.is_success()).count()
    }

    /// 全部成功 Success；全部失败且没有写入任何数据 Network；其余 Partial
    pub fn status(&self) -> StatusCode {
        let failed = self.failed();
        if failed == 0 {
            StatusCode::Success
        } else if failed == self.hosts.len() && self.hosts.iter().all(|h| h.conversations == 0) {
            StatusCode::Network
        } else {
            StatusCode::Partial
        }
    }
}

/// 同步编排器
pub struct SyncOrchestrator<T: RemoteTransport> {
    db: Arc<SessionDB>,
    transport: Arc<T>,
    options: SyncOptions,
}

impl<T: RemoteTransport> SyncOrchestrator<T> {
    pub fn new(db: Arc<SessionDB>, transport: Arc<T>, options: SyncOptions) -> Self {
        Self {
            db,
            transport,
            options,
        }
    }

    /// 同步所有配置的来源
    pub async fn run(&self, config: &SourcesConfig) -> Result<SyncReport> {
        let resumed_run = if self.options.resume {
            self.blocking(|db| db.latest_unfinished_sync_run()).await?
        } else {
            None
        };
        let resumed = resumed_run.is_some();
        let run_id = match resumed_run {
            Some(id) => id,
            None => self.blocking(|db| db.begin_sync_run()).await?,
        };

        let previous = {
            let id = run_id.clone();
            self.blocking(move |db| db.host_progress(&id)).await?
        };

        tracing::info!(
            "Sync run {} ({} sources{})",
            run_id,
            config.sources.len(),
            if resumed { ", resumed" } else { "" }
        );

        let mut hosts: Vec<(usize, HostOutcome)> = stream::iter(config.sources.iter().enumerate())
            .map(|(i, source)| {
                let already_synced = previous
                    .get(&source.name)
                    .is_some_and(|p| p.state == HostState::Synced);
                let run_id = run_id.as_str();
                async move {
                    if already_synced {
                        let mut outcome = HostOutcome::new(source);
                        outcome.state = HostState::Synced;
                        outcome.resumed = true;
                        return (i, outcome);
                    }
                    (i, self.sync_host(run_id, source).await)
                }
            })
            .buffer_unordered(self.options.max_concurrency.max(1))
            .collect()
            .await;
        hosts.sort_by_key(|(i, _)| *i);

        let report = SyncReport {
            run_id: run_id.clone(),
            resumed,
            hosts: hosts.into_iter().map(|(_, h)| h).collect(),
        };

        // 有主机未完成时保留 run，下次 resume 继续
        if report.failed() == 0 {
            let id = run_id.clone();
            self.blocking(move |db| db.finish_sync_run(&id)).await?;
        }

        tracing::info!(
            "Sync run {} done: {} synced, {} failed",
            report.run_id,
            report.synced(),
            report.failed()
        );
        Ok(report)
    }

    async fn sync_host(&self, run_id: &str, source: &SourceDefinition) -> HostOutcome {
        let mut outcome = HostOutcome::new(source);
        self.advance(run_id, &mut outcome, HostState::Discovered, None).await;

        // 探测失败即不可达
        let probe = match self.step(source, self.transport.probe(source)).await {
            Ok(info) => info,
            Err(e) => return self.fail(run_id, outcome, HostState::Unreachable, e).await,
        };
        outcome.probe = Some(probe.clone());
        self.advance(run_id, &mut outcome, HostState::Probed, None).await;

        if !probe.has_data() {
            self.advance(run_id, &mut outcome, HostState::Skipped, Some("no session data")).await;
            return outcome;
        }
        if probe.installed_version.is_none() && !self.options.install {
            self.advance(run_id, &mut outcome, HostState::Skipped, Some("not installed")).await;
            return outcome;
        }
        self.advance(run_id, &mut outcome, HostState::Selected, None).await;

        if probe.installed_version.is_none() {
            if let Err(e) = self.step(source, self.transport.install(source)).await {
                return self.fail(run_id, outcome, HostState::Failed, e).await;
            }
            self.advance(run_id, &mut outcome, HostState::Installed, None).await;
        }

        if let Err(e) = self.step(source, self.transport.trigger_index(source)).await {
            return self.fail(run_id, outcome, HostState::Failed, e).await;
        }
        self.advance(run_id, &mut outcome, HostState::Indexed, None).await;

        match self.pull_and_ingest(source).await {
            Ok(result) => {
                outcome.conversations = result.conversations_indexed;
                outcome.messages = result.messages_indexed;
                outcome.file_errors.extend(result.errors);
            }
            Err(e) => return self.fail(run_id, outcome, HostState::Failed, e).await,
        }

        // 有文件失败时不算同步完成，resume 会重新拉取
        if !outcome.file_errors.is_empty() {
            let message = format!("{} files failed", outcome.file_errors.len());
            tracing::warn!("{} ({}): {}", outcome.source, outcome.host, message);
            outcome.retryable = true;
            outcome.error = Some(message.clone());
            self.advance(run_id, &mut outcome, HostState::Failed, Some(&message)).await;
            return outcome;
        }
        let detail = format!("{} conversations", outcome.conversations);
        self.advance(run_id, &mut outcome, HostState::Synced, Some(&detail)).await;

        outcome
    }

    async fn pull_and_ingest(&self, source: &SourceDefinition) -> Result<CollectResult> {
        let (source_id, last_synced) = {
            let name = source.name.clone();
            let host = source.host.clone();
            self.blocking(move |db| {
                let id = db.get_or_create_source(&name, SourceKind::Ssh, Some(&host))?;
                let last = db.get_source(&name)?.and_then(|s| s.last_synced_at);
                Ok((id, last))
            })
            .await?
        };
        let since = if self.options.incremental { last_synced } else { None };

        let stream = self.step(source, self.transport.pull(source, since)).await?;

        let mut file_errors: Vec<String> = stream
            .remote_errors
            .iter()
            .map(|(path, message)| format!("{}: {}", path, message))
            .collect();
        file_errors.extend(stream.bad_lines.iter().cloned());

        // 增量起点取导出端自己的时钟，与远程文件 mtime 可比
        let checkpoint = stream.generated_at;
        let export_clean = file_errors.is_empty();
        let ctx = IngestContext::remote(&source.name, &source.host, source.path_mappings.clone());
        let sessions: Vec<RawSession> = stream.sessions;
        let mut result = self
            .blocking(move |db| {
                let result = Collector::new(db).with_context(ctx).collect_sessions(sessions);
                // 有失败时保留旧起点，失败的文件下次仍会被导出
                match checkpoint {
                    Some(at) if export_clean && result.errors.is_empty() => {
                        db.set_source_synced_at(source_id, at)?;
                    }
                    _ => tracing::debug!("Keeping previous sync checkpoint for source {}", source_id),
                }
                Ok(result)
            })
            .await?;

        file_errors.append(&mut result.errors);
        result.errors = file_errors;
        Ok(result)
    }

    /// 远程步骤统一加超时
    async fn step<F, R>(&self, source: &SourceDefinition, fut: F) -> Result<R>
    where
        F: Future<Output = Result<R>>,
    {
        match tokio::time::timeout(self.options.step_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Remote {
                host: source.host.clone(),
                kind: RemoteErrorKind::Timeout,
                message: format!("step exceeded {:?}", self.options.step_timeout),
            }),
        }
    }

    /// 数据库操作放到阻塞线程池
    async fn blocking<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&SessionDB) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("blocking task: {}", e)))?
    }

    async fn advance(&self, run_id: &str, outcome: &mut HostOutcome, next: HostState, detail: Option<&str>) {
        if next != HostState::Discovered && !outcome.state.can_transition_to(next) {
            tracing::warn!(
                "{}: invalid transition {} -> {}",
                outcome.source,
                outcome.state,
                next
            );
            return;
        }
        outcome.state = next;
        tracing::debug!("{}: {}", outcome.source, next);

        let (run, name, detail) = (run_id.to_string(), outcome.source.clone(), detail.map(str::to_string));
        if let Err(e) = self
            .blocking(move |db| db.record_host_state(&run, &name, next, detail.as_deref()))
            .await
        {
            // 只影响断点续传，不中断同步
            tracing::warn!("{}: failed to persist state {}: {}", outcome.source, next, e);
        }
    }

    async fn fail(&self, run_id: &str, mut outcome: HostOutcome, state: HostState, e: Error) -> HostOutcome {
        tracing::warn!("{} ({}): {}", outcome.source, outcome.host, e);
        let message = e.to_string();
        outcome.retryable = e.is_retryable();
        outcome.error = Some(message.clone());
        self.advance(run_id, &mut outcome, state, Some(&message)).await;
        outcome
    }
}
