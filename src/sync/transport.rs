//! 远程传输
//!
//! [`RemoteTransport`] 抽象每台主机上的四个步骤，编排器只依赖这个 trait。
//! 默认实现 [`SshTransport`] 直接调用系统 `ssh`，复用用户的 ssh 配置和密钥。

use crate::error::{Error, RemoteErrorKind, Result};
use crate::protocol::{ExportStream, EXPORT_FORMAT_VERSION};
use crate::sync::config::SourceDefinition;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::process::Command;

/// 远程程序名
pub const REMOTE_BINARY: &str = "agent-session-index";

/// 探测结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeInfo {
    /// 远程已安装的版本，未安装为 None
    pub installed_version: Option<String>,
    /// 存在的会话目录
    pub data_paths: Vec<String>,
    pub cpus: Option<u32>,
    pub free_disk_kb: Option<u64>,
}

impl ProbeInfo {
    pub fn has_data(&self) -> bool {
        !self.data_paths.is_empty()
    }
}

/// 远程主机操作
pub trait RemoteTransport: Send + Sync {
    /// 连通性 + 安装情况 + 资源信息
    fn probe(&self, source: &SourceDefinition) -> impl Future<Output = Result<ProbeInfo>> + Send;

    /// 安装或升级远程程序
    fn install(&self, source: &SourceDefinition) -> impl Future<Output = Result<()>> + Send;

    /// 触发远程索引
    fn trigger_index(&self, source: &SourceDefinition) -> impl Future<Output = Result<()>> + Send;

    /// 拉取原始会话（不做归一化），`since` 为增量起点
    fn pull(
        &self,
        source: &SourceDefinition,
        since: Option<i64>,
    ) -> impl Future<Output = Result<ExportStream>> + Send;
}

/// 基于系统 ssh 的实现
#[derive(Debug, Clone)]
pub struct SshTransport {
    pub connect_timeout: Duration,
    pub step_timeout: Duration,
    /// 安装命令，`None` 时 install 报错
    pub install_command: Option<String>,
}

impl Default for SshTransport {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            step_timeout: Duration::from_secs(120),
            install_command: None,
        }
    }
}

/// 单引号转义，拼进远程 shell 命令
fn shell_quote(s: &str) -> String {
    // `~/` 开头保留给远程 shell 展开
    if let Some(rest) = s.strip_prefix("~/") {
        return format!("~/'{}'", rest.replace('\'', "'\\''"));
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn remote_error(host: &str, kind: RemoteErrorKind, message: impl Into<String>) -> Error {
    Error::Remote {
        host: host.to_string(),
        kind,
        message: message.into(),
    }
}

impl SshTransport {
    /// 执行远程命令，返回 stdout
    async fn run(&self, host: &str, remote_cmd: &str) -> Result<String> {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)))
            .arg(host)
            .arg(remote_cmd)
            .kill_on_drop(true);

        tracing::debug!("ssh {}: {}", host, remote_cmd);

        let output = match tokio::time::timeout(self.step_timeout, cmd.output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(remote_error(
                    host,
                    RemoteErrorKind::Timeout,
                    format!("no response within {:?}", self.step_timeout),
                ))
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            // ssh 自身失败固定返回 255
            let kind = match output.status.code() {
                Some(255) if stderr.contains("Permission denied") || stderr.contains("Host key verification") => {
                    RemoteErrorKind::AuthFailed
                }
                Some(255) => RemoteErrorKind::Unreachable,
                _ => RemoteErrorKind::CommandFailed,
            };
            return Err(remote_error(host, kind, stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn probe_script(source: &SourceDefinition) -> String {
        let mut script = format!(
            "echo \"version=$({} --version 2>/dev/null | awk '{{print $NF}}')\"; \
             echo \"cpus=$(nproc 2>/dev/null || sysctl -n hw.ncpu 2>/dev/null)\"; \
             echo \"disk=$(df -Pk ~ 2>/dev/null | awk 'NR==2 {{print $4}}')\"",
            REMOTE_BINARY
        );
        for path in &source.paths {
            let quoted = shell_quote(path);
            script.push_str(&format!("; [ -e {q} ] && echo data={q}", q = quoted));
        }
        script
    }
}

/// 解析探测脚本输出
pub fn parse_probe_output(output: &str, source: &SourceDefinition) -> ProbeInfo {
    let mut info = ProbeInfo::default();
    for line in output.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key {
            "version" if !value.is_empty() => info.installed_version = Some(value.to_string()),
            "cpus" => info.cpus = value.parse().ok(),
            "disk" => info.free_disk_kb = value.parse().ok(),
            "data" if !value.is_empty() => info.data_paths.push(value.to_string()),
            _ => {}
        }
    }
    // 远程 echo 出来的是展开后的路径，无法与配置对应时按配置顺序保留
    if info.data_paths.len() > source.paths.len() {
        info.data_paths.truncate(source.paths.len());
    }
    info
}

impl RemoteTransport for SshTransport {
    async fn probe(&self, source: &SourceDefinition) -> Result<ProbeInfo> {
        let output = self.run(&source.host, &Self::probe_script(source)).await?;
        Ok(parse_probe_output(&output, source))
    }

    async fn install(&self, source: &SourceDefinition) -> Result<()> {
        let Some(command) = &self.install_command else {
            return Err(Error::Config("no install command configured".into()));
        };
        self.run(&source.host, command).await?;
        tracing::info!("Installed {} on {}", REMOTE_BINARY, source.host);
        Ok(())
    }

    async fn trigger_index(&self, source: &SourceDefinition) -> Result<()> {
        let paths: Vec<String> = source.paths.iter().map(|p| shell_quote(p)).collect();
        let cmd = format!("{} index {}", REMOTE_BINARY, paths.join(" "));
        self.run(&source.host, &cmd).await?;
        Ok(())
    }

    async fn pull(&self, source: &SourceDefinition, since: Option<i64>) -> Result<ExportStream> {
        let paths: Vec<String> = source.paths.iter().map(|p| shell_quote(p)).collect();
        let since_arg = since.map(|s| format!(" --since {}", s)).unwrap_or_default();
        let cmd = format!("{} export{} {}", REMOTE_BINARY, since_arg, paths.join(" "));
        let output = self.run(&source.host, &cmd).await?;

        let stream = ExportStream::parse(&output);
        match stream.header_version {
            Some(v) if v == EXPORT_FORMAT_VERSION => {}
            Some(v) => {
                return Err(remote_error(
                    &source.host,
                    RemoteErrorKind::Protocol,
                    format!("export format {} (expected {})", v, EXPORT_FORMAT_VERSION),
                ))
            }
            None => {
                return Err(remote_error(&source.host, RemoteErrorKind::Protocol, "missing export header"))
            }
        }
        if !stream.complete {
            return Err(remote_error(&source.host, RemoteErrorKind::Protocol, "export stream truncated"));
        }
        Ok(stream)
    }
}
