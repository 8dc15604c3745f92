//! agent-session-index - 会话索引命令行
//!
//! 用法：
//! - `health`                                 健康检查
//! - `index [--full] <目录或文件>...`          索引本机会话（默认跳过未变化的文件）
//! - `export [--since TS] <目录或文件>...`     输出 JSONL 导出流（远程同步时在对端执行）
//! - `sync <sources.toml> [--resume] [--install]`  从远程主机同步
//! - `timeline <from> <to> [--group-by none|hour|day] [--source S] [--text]`
//! - `search <关键词>... [--limit N] [--budget-ms N]`
//!
//! 数据库路径取自 `AGENT_SESSION_INDEX_DB`。退出码见 [`StatusCode`]。

use agent_session_index::sync::{SourcesConfig, SshTransport, SyncOptions, SyncOrchestrator};
use agent_session_index::{
    check_health, read_session_file, Collector, DbConfig, Error, ExportLine, GroupBy, HealthOptions,
    OutputMode, SearchFilters, SearchOptions, SessionDB, SourceFilter, StatusCode, TimeZonePolicy,
    TimelineQuery,
};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "用法: agent-session-index <health|index|export|sync|timeline|search> [参数]...";

#[tokio::main]
async fn main() {
    // 日志写 stderr，stdout 留给结构化输出
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("agent_session_index=info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let status = match run(&args).await {
        Ok(status) => status,
        Err(e) => {
            eprintln!("错误: {:#}", e);
            status_of(&e)
        }
    };
    std::process::exit(status.code());
}

/// 库错误保留自身状态码，参数错误归为 Usage
fn status_of(e: &anyhow::Error) -> StatusCode {
    match e.downcast_ref::<Error>() {
        Some(err) => err.status_code(),
        None if e.is::<UsageError>() => StatusCode::Usage,
        None => StatusCode::Internal,
    }
}

#[derive(Debug)]
struct UsageError(String);

impl std::fmt::Display for UsageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n{}", self.0, USAGE)
    }
}

impl std::error::Error for UsageError {}

fn usage(msg: impl Into<String>) -> anyhow::Error {
    UsageError(msg.into()).into()
}

/// 取出 `--name value` 形式的选项，剩余为位置参数
fn take_option(args: &mut Vec<String>, name: &str) -> Result<Option<String>> {
    match args.iter().position(|a| a == name) {
        Some(i) => {
            if i + 1 >= args.len() {
                return Err(usage(format!("{} 需要参数", name)));
            }
            let value = args.remove(i + 1);
            args.remove(i);
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn take_flag(args: &mut Vec<String>, name: &str) -> bool {
    match args.iter().position(|a| a == name) {
        Some(i) => {
            args.remove(i);
            true
        }
        None => false,
    }
}

fn parse_i64(value: &str, what: &str) -> Result<i64> {
    value
        .parse()
        .map_err(|_| usage(format!("{} 不是整数: {}", what, value)))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(args: &[String]) -> Result<StatusCode> {
    let Some((command, rest)) = args.split_first() else {
        return Err(usage("缺少命令"));
    };
    let mut rest = rest.to_vec();

    match command.as_str() {
        "--version" | "-V" => {
            println!("agent-session-index {}", env!("CARGO_PKG_VERSION"));
            Ok(StatusCode::Success)
        }
        "health" => {
            let config = DbConfig::from_env();
            let report = check_health(config.path(), &HealthOptions::default());
            print_json(&report)?;
            Ok(report.status_code())
        }
        "index" => {
            let full = take_flag(&mut rest, "--full");
            if rest.is_empty() {
                return Err(usage("index 需要至少一个路径"));
            }
            let db = SessionDB::connect(DbConfig::from_env())?;
            let roots: Vec<PathBuf> = rest.iter().map(PathBuf::from).collect();
            let result = Collector::new(&db).full(full).collect_roots(&roots)?;
            print_json(&result)?;
            Ok(if result.failed() > 0 {
                StatusCode::Partial
            } else {
                StatusCode::Success
            })
        }
        "export" => {
            let since = take_option(&mut rest, "--since")?
                .map(|s| parse_i64(&s, "--since"))
                .transpose()?;
            export(&rest, since)?;
            Ok(StatusCode::Success)
        }
        "sync" => {
            let resume = take_flag(&mut rest, "--resume");
            let install = take_flag(&mut rest, "--install");
            let [path] = rest.as_slice() else {
                return Err(usage("sync 需要一个 sources.toml 路径"));
            };
            let config = SourcesConfig::load(path)?;
            let db = Arc::new(SessionDB::connect(DbConfig::from_env())?);
            let options = SyncOptions {
                resume,
                install,
                ..Default::default()
            };
            let transport = SshTransport {
                install_command: std::env::var("AGENT_SESSION_INDEX_INSTALL_CMD").ok(),
                ..Default::default()
            };
            let report = SyncOrchestrator::new(db, Arc::new(transport), options)
                .run(&config)
                .await?;
            print_json(&report)?;
            Ok(report.status())
        }
        "timeline" => {
            let group_by = take_option(&mut rest, "--group-by")?
                .map(|g| g.parse::<GroupBy>())
                .transpose()?
                .unwrap_or_default();
            let source = take_option(&mut rest, "--source")?
                .map(|s| s.parse::<SourceFilter>())
                .transpose()?
                .unwrap_or_default();
            let agents: Vec<String> = take_option(&mut rest, "--agent")?.into_iter().collect();
            let mode = if take_flag(&mut rest, "--text") {
                OutputMode::Display
            } else {
                OutputMode::Structured
            };
            let [from, to] = rest.as_slice() else {
                return Err(usage("timeline 需要 <from> <to>"));
            };

            let db = SessionDB::connect_readonly(DbConfig::from_env())?;
            let query = TimelineQuery::new(parse_i64(from, "from")?, parse_i64(to, "to")?)
                .group_by(group_by)
                .source(source)
                .agents(agents);
            let result = db.timeline(&query)?;
            print!("{}", result.render(mode, TimeZonePolicy::Utc)?);
            if mode == OutputMode::Structured {
                println!();
            }
            Ok(StatusCode::Success)
        }
        "search" => {
            let limit = take_option(&mut rest, "--limit")?
                .map(|s| parse_i64(&s, "--limit"))
                .transpose()?
                .unwrap_or(20);
            let budget = take_option(&mut rest, "--budget-ms")?
                .map(|s| parse_i64(&s, "--budget-ms"))
                .transpose()?;
            if rest.is_empty() || limit <= 0 {
                return Err(usage("search 需要关键词和正数 --limit"));
            }

            let db = SessionDB::connect_readonly(DbConfig::from_env())?;
            let options = SearchOptions {
                limit: limit as usize,
                time_budget: budget.map(|ms| Duration::from_millis(ms.max(0) as u64)),
                ..Default::default()
            };
            let outcome = db.search(&rest.join(" "), &SearchFilters::default(), &options)?;
            print_json(&outcome)?;
            Ok(outcome.status())
        }
        other => Err(usage(format!("未知命令: {}", other))),
    }
}

/// 输出导出流：Header、每个会话一行、读取失败一行、Footer
///
/// `since` 是上次导出 Header 的 `generated_at`，按本机文件修改时间过滤。
fn export(paths: &[String], since: Option<i64>) -> Result<()> {
    if paths.is_empty() {
        return Err(usage("export 需要至少一个路径"));
    }
    // 先取 Header 时间，扫描期间改动的文件下次仍会被导出
    let header = ExportLine::header(std::env::var("HOSTNAME").ok());
    let roots: Vec<PathBuf> = paths.iter().map(PathBuf::from).collect();
    let files = Collector::discover(&roots);

    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());
    writeln!(out, "{}", header.to_line()?)?;

    let mut sessions = 0;
    let mut errors = 0;
    for file in files {
        if let Some(since) = since {
            let modified = std::fs::metadata(&file)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64);
            if modified.is_some_and(|m| m < since) {
                continue;
            }
        }

        match read_session_file(&file) {
            Ok(parsed) => {
                for session in parsed {
                    writeln!(out, "{}", ExportLine::Session(Box::new(session)).to_line()?)?;
                    sessions += 1;
                }
            }
            Err(e) => {
                let line = ExportLine::Error {
                    path: file.to_string_lossy().into_owned(),
                    message: e.to_string(),
                };
                writeln!(out, "{}", line.to_line()?)?;
                errors += 1;
            }
        }
    }

    writeln!(out, "{}", ExportLine::Footer { sessions, errors }.to_line()?)?;
    out.flush().context("flush export stream")?;
    tracing::debug!("Exported {} sessions, {} errors", sessions, errors);
    Ok(())
}
