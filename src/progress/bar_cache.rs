//! # 线程进度条缓存
//!
//! 把匿名、被复用的工作线程映射到固定数量的进度条上。
//!
//! ## 规则
//! - 少于 2 个指示器时缓存为空，所有查询返回 `None`（只显示总量）
//! - 已登记的线程直接返回其进度条
//! - 新线程淘汰最早登记的条目（FIFO），接管它的进度条
//!
//! 查找、淘汰、插入在同一把锁内完成。
//!
//! ## 依赖关系
//! - 被 `batch/strategy.rs` 使用
//! - 使用 `batch/pool.rs` 的 [`WorkerId`]

use super::indicator::ProgressIndicator;
use crate::batch::pool::WorkerId;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// 线程 → 进度条 FIFO 缓存
#[derive(Debug)]
pub struct ThreadBarCache {
    /// 队首为最早登记的条目；`None` 表示尚未被任何线程占用
    entries: Mutex<VecDeque<(Option<WorkerId>, Arc<ProgressIndicator>)>>,
}

impl ThreadBarCache {
    /// 用一组进度条创建缓存；进度条归运行所有，缓存只借用
    pub fn new(indicators: Vec<Arc<ProgressIndicator>>) -> Self {
        let entries = if indicators.len() < 2 {
            VecDeque::new()
        } else {
            indicators.into_iter().map(|ind| (None, ind)).collect()
        };
        Self {
            entries: Mutex::new(entries),
        }
    }

    /// 缓存容量 `N = min(硬件线程数, 分组数)`
    pub fn capacity_for(hardware_threads: usize, groups: usize) -> usize {
        let n = hardware_threads.min(groups);
        if n < 2 {
            0
        } else {
            n
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<(Option<WorkerId>, Arc<ProgressIndicator>)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 为线程分配进度条
    pub fn assign(&self, worker: WorkerId) -> Option<Arc<ProgressIndicator>> {
        let mut entries = self.lock();
        if entries.is_empty() {
            return None;
        }

        if let Some((_, ind)) = entries.iter().find(|(id, _)| *id == Some(worker)) {
            return Some(Arc::clone(ind));
        }

        let (_, ind) = entries.pop_front()?;
        entries.push_back((Some(worker), Arc::clone(&ind)));
        Some(ind)
    }

    /// 当前持有进度条的线程
    #[cfg(test)]
    pub fn holders(&self) -> Vec<WorkerId> {
        self.lock().iter().filter_map(|(id, _)| *id).collect()
    }
}
