//! 定长环形缓冲区
//!
//! 账本与错误/反馈历史共用：容量固定，写满后每次插入覆盖最旧的一条（严格 FIFO）。

/// 固定容量环形缓冲：`slots` 长到 capacity 后不再增长，`head` 指向最旧元素
#[derive(Clone, Debug)]
pub struct RingBuffer<T> {
    slots: Vec<T>,
    head: usize,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// capacity 至少为 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            head: 0,
            capacity,
        }
    }

    /// 追加一条；已满时返回被挤出的最旧元素
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.slots.len() < self.capacity {
            self.slots.push(item);
            return None;
        }
        let evicted = std::mem::replace(&mut self.slots[self.head], item);
        self.head = (self.head + 1) % self.capacity;
        Some(evicted)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 按插入顺序（最旧在前）遍历
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        let (newer, older) = self.slots.split_at(self.head);
        older.iter().chain(newer.iter())
    }

    /// 只保留满足条件的元素，相对顺序不变；返回删除的条数
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) -> usize {
        let before = self.slots.len();
        let mut ordered: Vec<T> = Vec::with_capacity(before);
        let tail = self.slots.split_off(self.head);
        ordered.extend(tail);
        ordered.append(&mut self.slots);
        ordered.retain(|item| keep(item));
        self.slots = ordered;
        self.head = 0;
        before - self.slots.len()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.head = 0;
    }
}
