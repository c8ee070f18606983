// ==========================================
// 水资源风险监测平台 - 内存写入端
// ==========================================
// 用途: 开发/测试环境；可配置拒绝写入以模拟写入失败
// ==========================================

use crate::domain::record::CanonicalRecord;
use crate::domain::types::ModuleName;
use crate::repository::error::{SinkError, SinkResult};
use crate::repository::record_sink::RecordSink;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct MemoryState {
    records: HashMap<ModuleName, Vec<CanonicalRecord>>,
    writes: usize,
}

#[derive(Default)]
pub struct MemoryRecordSink {
    state: Mutex<MemoryState>,
    rejected_modules: HashSet<ModuleName>,
    capacity: Option<usize>, // 总写入上限，超出后拒绝
}

impl MemoryRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 拒绝指定模块的所有写入
    pub fn rejecting(mut self, module: ModuleName) -> Self {
        self.rejected_modules.insert(module);
        self
    }

    /// 写满 N 条后拒绝后续写入
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn records(&self, module: ModuleName) -> Vec<CanonicalRecord> {
        self.lock().records.get(&module).cloned().unwrap_or_default()
    }

    pub fn count(&self, module: ModuleName) -> usize {
        self.lock().records.get(&module).map_or(0, Vec::len)
    }

    pub fn total(&self) -> usize {
        self.lock().writes
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.records.clear();
        state.writes = 0;
    }
}

impl RecordSink for MemoryRecordSink {
    fn write(&self, module: ModuleName, record: &CanonicalRecord) -> SinkResult<()> {
        if self.rejected_modules.contains(&module) {
            return Err(SinkError::Rejected(format!("模块 {} 不接受写入", module)));
        }

        let mut state = self.lock();
        if let Some(cap) = self.capacity {
            if state.writes >= cap {
                return Err(SinkError::Rejected(format!("已达写入上限 {}", cap)));
            }
        }
        state.records.entry(module).or_default().push(record.clone());
        state.writes += 1;
        Ok(())
    }
}
