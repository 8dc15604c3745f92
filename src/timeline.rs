//! 时间线查询与分桶

use crate::db::{conversation_from_row, SessionDB, CONVERSATION_SELECT};
use crate::error::{Error, Result};
use crate::types::Conversation;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;

/// 分组方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    #[default]
    None,
    Hour,
    Day,
}

impl FromStr for GroupBy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(GroupBy::None),
            "hour" => Ok(GroupBy::Hour),
            "day" => Ok(GroupBy::Day),
            _ => Err(Error::InvalidInput(format!("invalid grouping: {}", s))),
        }
    }
}

/// 分桶时区
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeZonePolicy {
    #[default]
    Utc,
    /// UTC 偏移（秒，东为正）
    FixedOffset(i32),
}

impl TimeZonePolicy {
    fn offset(self) -> Result<FixedOffset> {
        let secs = match self {
            TimeZonePolicy::Utc => 0,
            TimeZonePolicy::FixedOffset(secs) => secs,
        };
        FixedOffset::east_opt(secs)
            .ok_or_else(|| Error::InvalidInput(format!("invalid utc offset: {}s", secs)))
    }
}

/// 来源过滤
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SourceFilter {
    #[default]
    All,
    /// 本机（含未记录来源的旧数据）
    Local,
    /// 所有远程来源
    Remote,
    /// 指定来源名
    Named(String),
}

/// 过滤关键字，不能用作来源名
pub const RESERVED_SOURCE_NAMES: &[&str] = &["all", "local", "remote"];

impl FromStr for SourceFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" => Err(Error::InvalidInput("empty source filter".into())),
            "all" => Ok(SourceFilter::All),
            "local" => Ok(SourceFilter::Local),
            "remote" => Ok(SourceFilter::Remote),
            name => Ok(SourceFilter::Named(name.to_string())),
        }
    }
}

impl SourceFilter {
    /// 生成 WHERE 片段（表别名 c / s），参数追加到 `params`
    pub(crate) fn sql_clause(&self, params: &mut Vec<Box<dyn rusqlite::ToSql>>) -> Option<String> {
        match self {
            SourceFilter::All => None,
            SourceFilter::Local => Some("(c.source_id IS NULL OR s.kind = 'local')".into()),
            SourceFilter::Remote => Some("(s.kind IS NOT NULL AND s.kind != 'local')".into()),
            SourceFilter::Named(name) => {
                params.push(Box::new(name.clone()));
                Some("s.name = ?".into())
            }
        }
    }
}

/// 输出模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// 机器可读 JSON
    #[default]
    Structured,
    /// 每行一个会话的纯文本
    Display,
}

/// 时间线查询参数
#[derive(Debug, Clone)]
pub struct TimelineQuery {
    /// 闭区间起点（Unix 秒）
    pub from: i64,
    /// 闭区间终点（Unix 秒）
    pub to: i64,
    /// agent slug 过滤，空表示全部
    pub agents: Vec<String>,
    pub source: SourceFilter,
    pub group_by: GroupBy,
    pub time_zone: TimeZonePolicy,
}

impl TimelineQuery {
    pub fn new(from: i64, to: i64) -> Self {
        Self {
            from,
            to,
            agents: Vec::new(),
            source: SourceFilter::All,
            group_by: GroupBy::None,
            time_zone: TimeZonePolicy::Utc,
        }
    }

    pub fn group_by(mut self, group_by: GroupBy) -> Self {
        self.group_by = group_by;
        self
    }

    pub fn agents<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.agents = agents.into_iter().map(Into::into).collect();
        self
    }

    pub fn source(mut self, source: SourceFilter) -> Self {
        self.source = source;
        self
    }

    pub fn time_zone(mut self, tz: TimeZonePolicy) -> Self {
        self.time_zone = tz;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.from > self.to {
            return Err(Error::InvalidInput(format!(
                "range start {} is after end {}",
                self.from, self.to
            )));
        }
        if self.agents.iter().any(|a| a.trim().is_empty()) {
            return Err(Error::InvalidInput("empty agent in filter".into()));
        }
        self.time_zone.offset()?;
        Ok(())
    }
}

/// 时间线条目（字段集稳定，可空字段输出显式 null）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub id: i64,
    pub agent: String,
    pub title: Option<String>,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub duration_seconds: Option<i64>,
    pub source_path: String,
    pub message_count: i64,
    pub workspace: Option<String>,
    pub source_id: Option<i64>,
    pub origin_kind: String,
    pub origin_host: Option<String>,
}

impl From<Conversation> for TimelineEntry {
    fn from(c: Conversation) -> Self {
        let duration_seconds = c.duration_seconds();
        Self {
            id: c.id,
            agent: c.agent,
            title: c.title,
            started_at: c.started_at,
            ended_at: c.ended_at,
            duration_seconds,
            source_path: c.source_path,
            message_count: c.message_count,
            workspace: c.workspace,
            source_id: c.source_id,
            origin_kind: c.origin_kind,
            origin_host: c.origin_host,
        }
    }
}

/// 时间线结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TimelineResult {
    Flat(Vec<TimelineEntry>),
    /// 桶键 → 条目；键格式 `YYYY-MM-DD` 或 `YYYY-MM-DD HH:00`，字典序即时间序
    Grouped(BTreeMap<String, Vec<TimelineEntry>>),
}

impl TimelineResult {
    pub fn len(&self) -> usize {
        match self {
            TimelineResult::Flat(entries) => entries.len(),
            TimelineResult::Grouped(buckets) => buckets.values().map(Vec::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按时间顺序遍历所有条目
    pub fn entries(&self) -> Box<dyn Iterator<Item = &TimelineEntry> + '_> {
        match self {
            TimelineResult::Flat(entries) => Box::new(entries.iter()),
            TimelineResult::Grouped(buckets) => Box::new(buckets.values().flatten()),
        }
    }

    /// 渲染输出
    pub fn render(&self, mode: OutputMode, tz: TimeZonePolicy) -> Result<String> {
        match mode {
            OutputMode::Structured => Ok(serde_json::to_string_pretty(self)?),
            OutputMode::Display => {
                let offset = tz.offset()?;
                let mut out = String::new();
                let line = |entry: &TimelineEntry, out: &mut String| {
                    let started = format_ts(entry.started_at, &offset, "%Y-%m-%d %H:%M");
                    let _ = writeln!(
                        out,
                        "{}  {:<12} {} ({} msgs) {}",
                        started,
                        entry.agent,
                        entry.title.as_deref().unwrap_or("(untitled)"),
                        entry.message_count,
                        entry.workspace.as_deref().unwrap_or("-"),
                    );
                };
                match self {
                    TimelineResult::Flat(entries) => entries.iter().for_each(|e| line(e, &mut out)),
                    TimelineResult::Grouped(buckets) => {
                        for (key, entries) in buckets {
                            let _ = writeln!(out, "== {} ==", key);
                            entries.iter().for_each(|e| line(e, &mut out));
                        }
                    }
                }
                Ok(out)
            }
        }
    }
}

fn format_ts(ts: i64, offset: &FixedOffset, fmt: &str) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.with_timezone(offset).format(fmt).to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// 把时间戳截断到小时/天，返回桶键
pub fn bucket_key(ts: i64, group_by: GroupBy, tz: TimeZonePolicy) -> Result<Option<String>> {
    let offset = tz.offset()?;
    let fmt = match group_by {
        GroupBy::None => return Ok(None),
        GroupBy::Hour => "%Y-%m-%d %H:00",
        GroupBy::Day => "%Y-%m-%d",
    };
    Ok(Some(format_ts(ts, &offset, fmt)))
}

impl SessionDB {
    /// 时间线查询
    ///
    /// workspace / source 均为 LEFT JOIN，缺失关联的会话照常返回。
    /// 排序为 started_at 升序，同时间按 id 升序。
    pub fn timeline(&self, query: &TimelineQuery) -> Result<TimelineResult> {
        query.validate()?;

        let mut clauses = vec!["c.started_at >= ?".to_string(), "c.started_at <= ?".to_string()];
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(query.from), Box::new(query.to)];

        if !query.agents.is_empty() {
            let placeholders = vec!["?"; query.agents.len()].join(", ");
            clauses.push(format!("a.slug IN ({})", placeholders));
            for agent in &query.agents {
                params_vec.push(Box::new(agent.trim().to_string()));
            }
        }
        if let Some(clause) = query.source.sql_clause(&mut params_vec) {
            clauses.push(clause);
        }

        let sql = format!(
            "{} WHERE {} ORDER BY c.started_at ASC, c.id ASC",
            CONVERSATION_SELECT,
            clauses.join(" AND ")
        );

        let conversations: Vec<Conversation> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(&sql)?;
            let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
            let rows = stmt.query_map(params_refs.as_slice(), conversation_from_row)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        let entries = conversations.into_iter().map(TimelineEntry::from);

        if query.group_by == GroupBy::None {
            return Ok(TimelineResult::Flat(entries.collect()));
        }

        let mut buckets: BTreeMap<String, Vec<TimelineEntry>> = BTreeMap::new();
        for entry in entries {
            if let Some(key) = bucket_key(entry.started_at, query.group_by, query.time_zone)? {
                buckets.entry(key).or_default().push(entry);
            }
        }
        Ok(TimelineResult::Grouped(buckets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_keys_utc() {
        // 2024-01-01T23:30:00Z
        let ts = 1_704_151_800;
        assert_eq!(bucket_key(ts, GroupBy::Day, TimeZonePolicy::Utc).unwrap().as_deref(), Some("2024-01-01"));
        assert_eq!(
            bucket_key(ts, GroupBy::Hour, TimeZonePolicy::Utc).unwrap().as_deref(),
            Some("2024-01-01 23:00")
        );
        assert_eq!(bucket_key(ts, GroupBy::None, TimeZonePolicy::Utc).unwrap(), None);
    }

    #[test]
    fn test_bucket_keys_with_offset() {
        // UTC 23:30 在 +08:00 已是次日
        let ts = 1_704_151_800;
        let tz = TimeZonePolicy::FixedOffset(8 * 3600);
        assert_eq!(bucket_key(ts, GroupBy::Day, tz).unwrap().as_deref(), Some("2024-01-02"));
    }

    #[test]
    fn test_invalid_offset_rejected() {
        let err = bucket_key(0, GroupBy::Day, TimeZonePolicy::FixedOffset(48 * 3600)).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_parse_filters() {
        assert_eq!("day".parse::<GroupBy>().unwrap(), GroupBy::Day);
        assert!("week".parse::<GroupBy>().is_err());
        assert_eq!("local".parse::<SourceFilter>().unwrap(), SourceFilter::Local);
        assert_eq!(
            "laptop".parse::<SourceFilter>().unwrap(),
            SourceFilter::Named("laptop".into())
        );
    }

    #[test]
    fn test_range_validation() {
        assert!(TimelineQuery::new(10, 5).validate().is_err());
        assert!(TimelineQuery::new(5, 5).validate().is_ok());
        assert!(TimelineQuery::new(0, 5).agents([" "]).validate().is_err());
    }
}
