//! 多机同步
//!
//! 通过 ssh 在远程主机上索引并导出原始会话，拉回本机后统一归一化写入。

pub mod config;
pub mod orchestrator;
pub mod state;
pub mod transport;

pub use config::{SourceDefinition, SourcesConfig};
pub use orchestrator::{HostOutcome, SyncOptions, SyncOrchestrator, SyncReport};
pub use state::{HostProgress, HostState};
pub use transport::{ProbeInfo, RemoteTransport, SshTransport, REMOTE_BINARY};
