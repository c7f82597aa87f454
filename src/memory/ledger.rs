//! 交互账本：有界、只追加、FIFO 淘汰
//!
//! 记录每次调用的输入、响应、错误、系统事件与反馈。所有写操作（追加、淘汰、清理）在同一把锁内完成，
//! 因此 id 与时间戳顺序即真实的插入先后；读操作在锁内拷贝快照后立即释放。

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ring::RingBuffer;
use super::{lock_or_recover, Message, Metadata};

/// 默认账本容量
pub const DEFAULT_MAX_ENTRIES: usize = 200;

/// 条目类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    UserInput,
    AgentResponse,
    SystemEvent,
    Error,
    Feedback,
}

impl MemoryType {
    pub const ALL: [MemoryType; 5] = [
        MemoryType::UserInput,
        MemoryType::AgentResponse,
        MemoryType::SystemEvent,
        MemoryType::Error,
        MemoryType::Feedback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::UserInput => "user_input",
            MemoryType::AgentResponse => "agent_response",
            MemoryType::SystemEvent => "system_event",
            MemoryType::Error => "error",
            MemoryType::Feedback => "feedback",
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 非法的条目类型名
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown memory type: {0}")]
pub struct UnknownMemoryType(pub String);

impl FromStr for MemoryType {
    type Err = UnknownMemoryType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MemoryType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownMemoryType(s.to_string()))
    }
}

/// 单条账本记录，创建后不可变
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub entry_type: MemoryType,
    pub content: String,
    pub agent_name: Option<String>,
    pub metadata: Metadata,
}

/// `export()` 的完整快照
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryExport {
    pub exported_at: DateTime<Utc>,
    pub total_entries: usize,
    pub max_entries: usize,
    pub entries: Vec<MemoryEntry>,
}

/// 按类型、按 Agent 的计数
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MemorySummary {
    #[serde(rename = "total_entries")]
    pub total: usize,
    pub by_type: BTreeMap<MemoryType, usize>,
    pub by_agent: BTreeMap<String, usize>,
    #[serde(default)]
    pub context_keys: Vec<String>,
}

struct LedgerState {
    entries: RingBuffer<MemoryEntry>,
    next_id: u64,
    last_timestamp: Option<DateTime<Utc>>,
    context: HashMap<String, Value>,
}

/// 有界交互账本（进程内单例，通过 Arc 共享）
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
    max_entries: usize,
}

impl MemoryLedger {
    pub fn new(max_entries: usize) -> Self {
        let entries = RingBuffer::new(max_entries);
        let max_entries = entries.capacity();
        Self {
            state: Mutex::new(LedgerState {
                entries,
                next_id: 1,
                last_timestamp: None,
                context: HashMap::new(),
            }),
            max_entries,
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 追加一条记录并返回其 id；超出容量时恰好淘汰最旧的一条
    pub fn add(
        &self,
        entry_type: MemoryType,
        content: impl Into<String>,
        agent_name: Option<&str>,
        metadata: Metadata,
    ) -> u64 {
        let mut state = lock_or_recover(&self.state);
        let id = state.next_id;
        state.next_id += 1;

        // 墙钟可能回拨，时间戳不得早于上一条
        let now = Utc::now();
        let timestamp = match state.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        state.last_timestamp = Some(timestamp);

        let entry = MemoryEntry {
            id,
            timestamp,
            entry_type,
            content: content.into(),
            agent_name: agent_name.map(str::to_string),
            metadata,
        };
        if let Some(evicted) = state.entries.push(entry) {
            tracing::debug!(evicted_id = evicted.id, "memory ledger full, evicted oldest entry");
        }
        id
    }

    /// 最近 limit 条（最新在前），可按 Agent 过滤
    pub fn get_recent(&self, limit: usize, agent_name: Option<&str>) -> Vec<MemoryEntry> {
        self.collect_recent(limit, |e| matches_agent(e, agent_name))
    }

    /// 最近 limit 条指定类型的记录（最新在前）
    pub fn get_recent_of_type(
        &self,
        limit: usize,
        entry_type: MemoryType,
        agent_name: Option<&str>,
    ) -> Vec<MemoryEntry> {
        self.collect_recent(limit, |e| {
            e.entry_type == entry_type && matches_agent(e, agent_name)
        })
    }

    /// 对话历史：UserInput → user，AgentResponse → assistant，其它类型丢弃；按时间正序，取最近 limit 条
    pub fn get_conversation_history(&self, limit: usize, agent_name: Option<&str>) -> Vec<Message> {
        let mut history: Vec<Message> = self
            .collect_recent(limit, |e| {
                matches!(e.entry_type, MemoryType::UserInput | MemoryType::AgentResponse)
                    && matches_agent(e, agent_name)
            })
            .into_iter()
            .filter_map(|e| match e.entry_type {
                MemoryType::UserInput => Some(Message::user(e.content)),
                MemoryType::AgentResponse => Some(Message::assistant(e.content)),
                _ => None,
            })
            .collect();
        history.reverse();
        history
    }

    /// 全量导出（插入顺序）
    pub fn export(&self) -> MemoryExport {
        let state = lock_or_recover(&self.state);
        let entries: Vec<MemoryEntry> = state.entries.iter().cloned().collect();
        MemoryExport {
            exported_at: Utc::now(),
            total_entries: entries.len(),
            max_entries: self.max_entries,
            entries,
        }
    }

    pub fn summary(&self) -> MemorySummary {
        let state = lock_or_recover(&self.state);
        let mut by_type: BTreeMap<MemoryType, usize> =
            MemoryType::ALL.into_iter().map(|t| (t, 0)).collect();
        let mut by_agent: BTreeMap<String, usize> = BTreeMap::new();
        for entry in state.entries.iter() {
            *by_type.entry(entry.entry_type).or_default() += 1;
            if let Some(agent) = &entry.agent_name {
                *by_agent.entry(agent.clone()).or_default() += 1;
            }
        }
        let context_keys = sorted_keys(&state.context);
        MemorySummary {
            total: state.entries.len(),
            by_type,
            by_agent,
            context_keys,
        }
    }

    /// 删除某个 Agent 的全部记录，返回删除条数
    pub fn clear_agent(&self, agent_name: &str) -> usize {
        let mut state = lock_or_recover(&self.state);
        state
            .entries
            .retain(|e| e.agent_name.as_deref() != Some(agent_name))
    }

    pub fn set_context(&self, key: impl Into<String>, value: Value) {
        lock_or_recover(&self.state).context.insert(key.into(), value);
    }

    pub fn get_context(&self, key: &str) -> Option<Value> {
        lock_or_recover(&self.state).context.get(key).cloned()
    }

    /// 已设置的上下文键，按字典序
    pub fn context_keys(&self) -> Vec<String> {
        sorted_keys(&lock_or_recover(&self.state).context)
    }

    fn collect_recent(
        &self,
        limit: usize,
        mut keep: impl FnMut(&MemoryEntry) -> bool,
    ) -> Vec<MemoryEntry> {
        let state = lock_or_recover(&self.state);
        state
            .entries
            .iter()
            .rev()
            .filter(|e| keep(e))
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

fn sorted_keys(context: &HashMap<String, Value>) -> Vec<String> {
    let mut keys: Vec<String> = context.keys().cloned().collect();
    keys.sort();
    keys
}

fn matches_agent(entry: &MemoryEntry, agent_name: Option<&str>) -> bool {
    match agent_name {
        Some(name) => entry.agent_name.as_deref() == Some(name),
        None => true,
    }
}
