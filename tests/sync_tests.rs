//! 多机同步测试（内存中的假传输层）

use agent_session_index::sync::*;
use agent_session_index::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn setup_db() -> (Arc<SessionDB>, TempDir) {
    let tmp = TempDir::new().unwrap();
    let db = SessionDB::connect(DbConfig::local(tmp.path().join("test.db"))).unwrap();
    (Arc::new(db), tmp)
}

fn remote_session(path: &str, workspace: &str, started: i64) -> RawSession {
    RawSession {
        agent: "codex".into(),
        source_path: path.into(),
        workspace: Some(workspace.into()),
        started_at: Some(started),
        messages: vec![RawMessage {
            role: "user".into(),
            content: format!("work on {}", path),
            created_at: Some(started),
            ..Default::default()
        }],
        ..Default::default()
    }
}

#[derive(Clone, Default)]
struct FakeHost {
    unreachable: bool,
    installed: bool,
    no_data: bool,
    probe_delay: Option<Duration>,
    /// 前 N 次 pull 失败
    failing_pulls: usize,
    sessions: Vec<RawSession>,
    /// 导出端报告的读取失败
    export_errors: Vec<(String, String)>,
    /// 远程主机时钟
    remote_now: Option<i64>,
}

#[derive(Default)]
struct FakeTransport {
    hosts: HashMap<String, FakeHost>,
    calls: Mutex<Vec<(String, &'static str)>>,
    pulls: Mutex<Vec<(String, Option<i64>)>>,
    failures_left: Mutex<HashMap<String, usize>>,
}

impl FakeTransport {
    fn new(hosts: Vec<(&str, FakeHost)>) -> Self {
        let failures_left = hosts
            .iter()
            .map(|(name, h)| (name.to_string(), h.failing_pulls))
            .collect();
        Self {
            hosts: hosts.into_iter().map(|(n, h)| (n.to_string(), h)).collect(),
            failures_left: Mutex::new(failures_left),
            ..Default::default()
        }
    }

    fn host(&self, source: &SourceDefinition) -> FakeHost {
        self.hosts.get(&source.host).cloned().unwrap_or_default()
    }

    fn record(&self, source: &SourceDefinition, step: &'static str) {
        self.calls.lock().unwrap().push((source.host.clone(), step));
    }

    fn called(&self, host: &str, step: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, s)| h == host && *s == step)
            .count()
    }

    fn unreachable(source: &SourceDefinition) -> Error {
        Error::Remote {
            host: source.host.clone(),
            kind: RemoteErrorKind::Unreachable,
            message: "connection refused".into(),
        }
    }
}

impl RemoteTransport for FakeTransport {
    async fn probe(&self, source: &SourceDefinition) -> agent_session_index::Result<ProbeInfo> {
        self.record(source, "probe");
        let host = self.host(source);
        if let Some(delay) = host.probe_delay {
            tokio::time::sleep(delay).await;
        }
        if host.unreachable {
            return Err(Self::unreachable(source));
        }
        Ok(ProbeInfo {
            installed_version: host.installed.then(|| "0.1.0".to_string()),
            data_paths: if host.no_data { Vec::new() } else { source.paths.clone() },
            cpus: Some(4),
            free_disk_kb: Some(1 << 20),
        })
    }

    async fn install(&self, source: &SourceDefinition) -> agent_session_index::Result<()> {
        self.record(source, "install");
        Ok(())
    }

    async fn trigger_index(&self, source: &SourceDefinition) -> agent_session_index::Result<()> {
        self.record(source, "index");
        Ok(())
    }

    async fn pull(&self, source: &SourceDefinition, since: Option<i64>) -> agent_session_index::Result<ExportStream> {
        self.record(source, "pull");
        self.pulls.lock().unwrap().push((source.host.clone(), since));
        {
            let mut left = self.failures_left.lock().unwrap();
            let entry = left.entry(source.host.clone()).or_default();
            if *entry > 0 {
                *entry -= 1;
                return Err(Self::unreachable(source));
            }
        }
        let host = self.host(source);
        Ok(ExportStream {
            header_version: Some(EXPORT_FORMAT_VERSION),
            generated_at: Some(host.remote_now.unwrap_or(1_700_000_000)),
            sessions: host.sessions,
            remote_errors: host.export_errors,
            complete: true,
            ..Default::default()
        })
    }
}

fn source(name: &str, mappings: Vec<PathMapping>) -> SourceDefinition {
    SourceDefinition {
        name: name.into(),
        host: name.into(),
        paths: vec!["~/.codex/sessions".into()],
        path_mappings: mappings,
    }
}

fn config(sources: Vec<SourceDefinition>) -> SourcesConfig {
    SourcesConfig { sources }
}

fn installed(sessions: Vec<RawSession>) -> FakeHost {
    FakeHost {
        installed: true,
        sessions,
        ..Default::default()
    }
}

// ==================== 故障隔离 ====================

mod isolation_tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_host_does_not_block_others() {
        let (db, _tmp) = setup_db();
        let transport = Arc::new(FakeTransport::new(vec![
            ("a", installed(vec![remote_session("/a/1.jsonl", "/proj/a", 1000)])),
            ("b", FakeHost { unreachable: true, ..Default::default() }),
            ("c", installed(vec![remote_session("/c/1.jsonl", "/proj/c", 1000)])),
        ]));
        let cfg = config(vec![source("a", vec![]), source("b", vec![]), source("c", vec![])]);

        let report = SyncOrchestrator::new(db.clone(), transport.clone(), SyncOptions::default())
            .run(&cfg)
            .await
            .unwrap();

        let states: Vec<HostState> = report.hosts.iter().map(|h| h.state).collect();
        assert_eq!(states, vec![HostState::Synced, HostState::Unreachable, HostState::Synced]);
        assert_eq!(report.synced(), 2);
        assert_eq!(report.status(), StatusCode::Partial);
        assert!(report.hosts[1].retryable);
        assert!(report.hosts[1].error.is_some());
        assert_eq!(transport.called("b", "pull"), 0);

        assert_eq!(db.get_stats().unwrap().conversation_count, 2);

        // 有失败主机时 run 保持未完成
        assert_eq!(db.latest_unfinished_sync_run().unwrap(), Some(report.run_id.clone()));
        let progress = db.host_progress(&report.run_id).unwrap();
        assert_eq!(progress["a"].state, HostState::Synced);
        assert_eq!(progress["b"].state, HostState::Unreachable);
    }

    #[tokio::test]
    async fn test_all_hosts_down() {
        let (db, _tmp) = setup_db();
        let transport = Arc::new(FakeTransport::new(vec![(
            "a",
            FakeHost { unreachable: true, ..Default::default() },
        )]));
        let report = SyncOrchestrator::new(db, transport, SyncOptions::default())
            .run(&config(vec![source("a", vec![])]))
            .await
            .unwrap();
        assert_eq!(report.status(), StatusCode::Network);
    }

    #[tokio::test]
    async fn test_step_timeout_marks_host() {
        let (db, _tmp) = setup_db();
        let transport = Arc::new(FakeTransport::new(vec![
            (
                "slow",
                FakeHost {
                    probe_delay: Some(Duration::from_secs(30)),
                    ..installed(vec![])
                },
            ),
            ("fast", installed(vec![remote_session("/f/1.jsonl", "/proj/f", 1000)])),
        ]));
        let options = SyncOptions {
            step_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let report = SyncOrchestrator::new(db, transport, options)
            .run(&config(vec![source("slow", vec![]), source("fast", vec![])]))
            .await
            .unwrap();

        assert_eq!(report.hosts[0].state, HostState::Unreachable);
        assert!(report.hosts[0].error.as_deref().unwrap().contains("timed out"));
        assert_eq!(report.hosts[1].state, HostState::Synced);
    }
}

// ==================== 选择 / 安装 ====================

mod selection_tests {
    use super::*;

    #[tokio::test]
    async fn test_hosts_without_data_or_install_are_skipped() {
        let (db, _tmp) = setup_db();
        let transport = Arc::new(FakeTransport::new(vec![
            ("empty", FakeHost { installed: true, no_data: true, ..Default::default() }),
            ("bare", FakeHost::default()),
        ]));
        let report = SyncOrchestrator::new(db.clone(), transport.clone(), SyncOptions::default())
            .run(&config(vec![source("empty", vec![]), source("bare", vec![])]))
            .await
            .unwrap();

        assert!(report.hosts.iter().all(|h| h.state == HostState::Skipped));
        assert_eq!(report.status(), StatusCode::Success);
        assert_eq!(transport.called("bare", "install"), 0);
        // 全部成功，run 已完成
        assert_eq!(db.latest_unfinished_sync_run().unwrap(), None);
    }

    #[tokio::test]
    async fn test_install_when_enabled() {
        let (db, _tmp) = setup_db();
        let transport = Arc::new(FakeTransport::new(vec![(
            "bare",
            FakeHost {
                sessions: vec![remote_session("/b/1.jsonl", "/proj/b", 1000)],
                ..Default::default()
            },
        )]));
        let options = SyncOptions {
            install: true,
            ..Default::default()
        };
        let report = SyncOrchestrator::new(db, transport.clone(), options)
            .run(&config(vec![source("bare", vec![])]))
            .await
            .unwrap();

        assert_eq!(report.hosts[0].state, HostState::Synced);
        assert_eq!(report.hosts[0].conversations, 1);
        assert_eq!(transport.called("bare", "install"), 1);
        assert_eq!(transport.called("bare", "index"), 1);
    }
}

// ==================== 断点续传 / 增量 ====================

mod resume_tests {
    use super::*;

    #[tokio::test]
    async fn test_resume_skips_synced_hosts() {
        let (db, _tmp) = setup_db();
        let transport = Arc::new(FakeTransport::new(vec![
            ("a", installed(vec![remote_session("/a/1.jsonl", "/proj/a", 1000)])),
            (
                "b",
                FakeHost {
                    failing_pulls: 1,
                    ..installed(vec![remote_session("/b/1.jsonl", "/proj/b", 1000)])
                },
            ),
        ]));
        let cfg = config(vec![source("a", vec![]), source("b", vec![])]);

        let first = SyncOrchestrator::new(db.clone(), transport.clone(), SyncOptions::default())
            .run(&cfg)
            .await
            .unwrap();
        assert_eq!(first.hosts[1].state, HostState::Failed);

        let options = SyncOptions {
            resume: true,
            ..Default::default()
        };
        let second = SyncOrchestrator::new(db.clone(), transport.clone(), options)
            .run(&cfg)
            .await
            .unwrap();

        assert!(second.resumed);
        assert_eq!(second.run_id, first.run_id);
        assert!(second.hosts[0].resumed);
        assert_eq!(second.hosts[0].state, HostState::Synced);
        assert_eq!(second.hosts[1].state, HostState::Synced);
        // a 只被拉取一次
        assert_eq!(transport.called("a", "pull"), 1);
        assert_eq!(transport.called("b", "pull"), 2);

        assert_eq!(db.latest_unfinished_sync_run().unwrap(), None);
        assert_eq!(db.get_stats().unwrap().conversation_count, 2);
    }

    #[tokio::test]
    async fn test_failed_files_keep_checkpoint_and_host_retryable() {
        let (db, _tmp) = setup_db();
        let transport = Arc::new(FakeTransport::new(vec![(
            "a",
            FakeHost {
                export_errors: vec![("/r/busy.jsonl".into(), "resource busy".into())],
                ..installed(vec![remote_session("/a/1.jsonl", "/proj/a", 1000)])
            },
        )]));
        let cfg = config(vec![source("a", vec![])]);

        let first = SyncOrchestrator::new(db.clone(), transport.clone(), SyncOptions::default())
            .run(&cfg)
            .await
            .unwrap();
        let host = &first.hosts[0];
        assert_eq!(host.state, HostState::Failed);
        assert!(host.retryable);
        assert_eq!(host.conversations, 1);
        assert_eq!(host.file_errors.len(), 1);
        assert!(host.file_errors[0].contains("/r/busy.jsonl"));
        assert_eq!(first.status(), StatusCode::Partial);

        // 起点不前移，run 保持未完成
        assert_eq!(db.get_source("a").unwrap().unwrap().last_synced_at, None);
        assert_eq!(db.latest_unfinished_sync_run().unwrap(), Some(first.run_id.clone()));

        let options = SyncOptions {
            resume: true,
            ..Default::default()
        };
        SyncOrchestrator::new(db.clone(), transport.clone(), options)
            .run(&cfg)
            .await
            .unwrap();
        let pulls = transport.pulls.lock().unwrap().clone();
        assert_eq!(pulls, vec![("a".to_string(), None), ("a".to_string(), None)]);
        assert_eq!(db.get_stats().unwrap().conversation_count, 1);
    }

    #[tokio::test]
    async fn test_without_resume_starts_new_run() {
        let (db, _tmp) = setup_db();
        let transport = Arc::new(FakeTransport::new(vec![(
            "a",
            FakeHost { unreachable: true, ..Default::default() },
        )]));
        let cfg = config(vec![source("a", vec![])]);
        let orchestrator = SyncOrchestrator::new(db, transport, SyncOptions::default());
        let first = orchestrator.run(&cfg).await.unwrap();
        let second = orchestrator.run(&cfg).await.unwrap();
        assert_ne!(first.run_id, second.run_id);
        assert!(!second.resumed);
    }

    #[tokio::test]
    async fn test_incremental_pull_uses_last_sync() {
        let (db, _tmp) = setup_db();
        // 远程时钟与本机相差很大，起点仍以远程为准
        let remote_now = 2_000_000_000;
        let transport = Arc::new(FakeTransport::new(vec![(
            "a",
            FakeHost {
                remote_now: Some(remote_now),
                ..installed(vec![remote_session("/a/1.jsonl", "/proj/a", 1000)])
            },
        )]));
        let cfg = config(vec![source("a", vec![])]);
        let orchestrator = SyncOrchestrator::new(db.clone(), transport.clone(), SyncOptions::default());

        orchestrator.run(&cfg).await.unwrap();
        orchestrator.run(&cfg).await.unwrap();

        let pulls = transport.pulls.lock().unwrap().clone();
        assert_eq!(pulls.len(), 2);
        assert_eq!(pulls[0].1, None);
        let synced_at = db.get_source("a").unwrap().unwrap().last_synced_at;
        assert_eq!(synced_at, Some(remote_now));
        assert_eq!(pulls[1].1, Some(remote_now));

        // 重复拉取同一会话不会重复写入
        assert_eq!(db.get_stats().unwrap().conversation_count, 1);
    }
}

// ==================== 路径映射 ====================

mod mapping_tests {
    use super::*;

    #[tokio::test]
    async fn test_workspaces_merge_across_hosts() {
        let (db, _tmp) = setup_db();
        let transport = Arc::new(FakeTransport::new(vec![
            ("linux", installed(vec![remote_session("/l/1.jsonl", "/home/dev/proj", 1000)])),
            ("mac", installed(vec![remote_session("/m/1.jsonl", "/Users/me/proj", 2000)])),
        ]));
        let cfg = config(vec![
            source("linux", vec![PathMapping::new("/home/dev", "/Users/me")]),
            source("mac", vec![]),
        ]);

        SyncOrchestrator::new(db.clone(), transport, SyncOptions::default())
            .run(&cfg)
            .await
            .unwrap();

        let workspaces = db.list_workspaces().unwrap();
        assert_eq!(workspaces.len(), 1);
        assert_eq!(workspaces[0].path, "/Users/me/proj");
        assert_eq!(workspaces[0].conversation_count, 2);

        let remote = db
            .timeline(&TimelineQuery::new(0, 5000).source(SourceFilter::Named("linux".into())))
            .unwrap();
        let entry = remote.entries().next().unwrap();
        assert_eq!(entry.origin_kind, "ssh");
        assert_eq!(entry.origin_host.as_deref(), Some("linux"));
    }
}
