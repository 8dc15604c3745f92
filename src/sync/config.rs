//! 远程来源配置（sources.toml）
//!
//! ```toml
//! [[sources]]
//! name = "workstation"
//! host = "dev@workstation"
//! paths = ["~/.claude/projects", "~/.codex/sessions"]
//!
//! [[sources.path_mappings]]
//! from = "/home/dev"
//! to = "~"
//! ```

use crate::error::{Error, Result};
use crate::paths::PathMapping;
use crate::timeline::RESERVED_SOURCE_NAMES;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// 单个远程来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDefinition {
    /// 本地唯一名称，对应 sources 表
    pub name: String,
    /// ssh 目标（别名或 user@host）
    pub host: String,
    /// 远程会话目录，`~` 由远程 shell 展开
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub path_mappings: Vec<PathMapping>,
}

/// 所有远程来源
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub sources: Vec<SourceDefinition>,
}

impl SourcesConfig {
    /// 从文件加载，路径支持 `~`
    pub fn load(path: &str) -> Result<Self> {
        let expanded = shellexpand::tilde(path);
        let content = std::fs::read_to_string(Path::new(expanded.as_ref()))?;
        Self::parse(&content)
    }

    /// 解析 TOML 并校验
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: SourcesConfig =
            toml::from_str(content).map_err(|e| Error::Config(format!("sources.toml: {}", e)))?;

        // 映射目标是本机路径，在这里展开 `~`
        for source in &mut config.sources {
            for mapping in &mut source.path_mappings {
                mapping.to = shellexpand::tilde(&mapping.to).into_owned();
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(Error::Config("source name must not be empty".into()));
            }
            // 名字要能原样用作时间线的 --source 过滤值
            if source.name.trim() != source.name || RESERVED_SOURCE_NAMES.contains(&source.name.as_str()) {
                return Err(Error::Config(format!("source name {:?} is reserved", source.name)));
            }
            if source.host.trim().is_empty() {
                return Err(Error::Config(format!("source {:?} has no host", source.name)));
            }
            if !seen.insert(source.name.as_str()) {
                return Err(Error::Config(format!("duplicate source {:?}", source.name)));
            }
            for mapping in &source.path_mappings {
                if !mapping.from.starts_with('/') || !mapping.to.starts_with('/') {
                    return Err(Error::Config(format!(
                        "source {:?}: path mapping {} -> {} must use absolute paths",
                        source.name, mapping.from, mapping.to
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&SourceDefinition> {
        self.sources.iter().find(|s| s.name == name)
    }
}
