//! 记忆层：有界交互账本、对话视图、环形缓冲

pub mod conversation;
pub mod ledger;
pub mod ring;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use conversation::{Message, Role};
pub use ledger::{
    MemoryEntry, MemoryExport, MemoryLedger, MemorySummary, MemoryType, UnknownMemoryType,
    DEFAULT_MAX_ENTRIES,
};
pub use ring::RingBuffer;

/// 自由格式的元数据（JSON 对象）
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// 将 `json!({...})` 转为 Metadata；非对象值返回空表
pub fn into_metadata(value: serde_json::Value) -> Metadata {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Metadata::new(),
    }
}

/// 回调中的 panic 不应让账本永久不可用：锁中毒时仍取回数据
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
