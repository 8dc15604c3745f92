//! 路径规范化与跨机器路径映射

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// 路径前缀映射：远程 `from` 前缀 → 本地 `to` 前缀
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapping {
    pub from: String,
    pub to: String,
}

impl PathMapping {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// 按路径组件边界匹配前缀，`/home/u` 不会命中 `/home/user`
    pub fn apply(&self, path: &str) -> Option<String> {
        let from = self.from.trim_end_matches('/');
        if from.is_empty() {
            return None;
        }
        let rest = path.strip_prefix(from)?;
        if !(rest.is_empty() || rest.starts_with('/')) {
            return None;
        }
        let to = self.to.trim_end_matches('/');
        Some(format!("{}{}", to, rest))
    }
}

/// 应用映射表，最长前缀优先；无命中时原样返回
pub fn remap(path: &str, mappings: &[PathMapping]) -> String {
    mappings
        .iter()
        .filter_map(|m| m.apply(path).map(|mapped| (m.from.trim_end_matches('/').len(), mapped)))
        .max_by_key(|(len, _)| *len)
        .map(|(_, mapped)| mapped)
        .unwrap_or_else(|| path.to_string())
}

/// 规范化 workspace 路径
///
/// 只做词法处理（远程路径在本机可能不存在）：去掉 `.`、折叠 `..`、
/// 去掉末尾 `/`。空串或相对路径返回 `None`，调用方不得自行补全。
pub fn canonical_path(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let path = Path::new(trimmed);
    if !path.has_root() {
        return None;
    }

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }

    Some(out.to_string_lossy().into_owned())
}
