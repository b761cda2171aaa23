//! # 进度指示器
//!
//! 工作线程与渲染线程共享的进度状态。
//!
//! ## 功能
//! - 原子递增 `current`，稳态下不超过 `target`
//! - 完成/失败终态
//! - 渲染只读取不可变快照 [`IndicatorSnapshot`]
//!
//! ## 依赖关系
//! - 被 `progress/channel.rs`, `progress/bar_cache.rs`, `batch/strategy.rs` 使用
//! - 快照被 `utils/progress.rs` 渲染

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// 指示器样式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorKind {
    /// 简单进度条（每线程）
    Simple,
    /// 详细进度条（总量 / 文件夹）
    Detailed,
    /// 带终态的 spinner
    Spinner,
}

/// 指示器生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorState {
    Running,
    Finished,
    Failed,
}

impl IndicatorState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => IndicatorState::Finished,
            2 => IndicatorState::Failed,
            _ => IndicatorState::Running,
        }
    }
}

/// 进度指示器
///
/// `target == 0` 表示总量未知，此时只计数。
#[derive(Debug)]
pub struct ProgressIndicator {
    label: String,
    kind: IndicatorKind,
    current: AtomicU64,
    target: AtomicU64,
    state: AtomicU8,
}

/// 渲染线程使用的不可变快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorSnapshot {
    pub label: String,
    pub kind: IndicatorKind,
    pub current: u64,
    pub target: u64,
    pub state: IndicatorState,
}

impl IndicatorSnapshot {
    /// 完成比例 [0, 1]；总量未知时为 None
    pub fn ratio(&self) -> Option<f64> {
        if self.target == 0 {
            return None;
        }
        Some((self.current as f64 / self.target as f64).min(1.0))
    }
}

impl ProgressIndicator {
    /// 创建新的指示器
    pub fn new(kind: IndicatorKind, label: impl Into<String>, target: u64) -> Self {
        Self {
            label: label.into(),
            kind,
            current: AtomicU64::new(0),
            target: AtomicU64::new(target),
            state: AtomicU8::new(0),
        }
    }

    pub fn simple(label: impl Into<String>) -> Self {
        Self::new(IndicatorKind::Simple, label, 0)
    }

    pub fn detailed(label: impl Into<String>, target: u64) -> Self {
        Self::new(IndicatorKind::Detailed, label, target)
    }

    pub fn spinner(label: impl Into<String>) -> Self {
        Self::new(IndicatorKind::Spinner, label, 0)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> IndicatorKind {
        self.kind
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn target(&self) -> u64 {
        self.target.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> IndicatorState {
        IndicatorState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// 递增 `n`；已知总量时截断到 `target`
    pub fn inc(&self, n: u64) {
        let _ = self
            .current
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                let next = cur.saturating_add(n);
                match self.target.load(Ordering::Relaxed) {
                    0 => Some(next),
                    target => Some(next.min(target)),
                }
            });
    }

    /// 在原有总量上追加（只增不减）
    pub fn add_target(&self, extra: u64) {
        self.target.fetch_add(extra, Ordering::Relaxed);
    }

    /// 为下一个文件重新开始计数（每线程进度条复用）
    pub fn restart(&self, target: u64) {
        self.current.store(0, Ordering::Relaxed);
        self.target.store(target, Ordering::Relaxed);
        self.state.store(0, Ordering::Release);
    }

    /// 进入完成终态
    pub fn finish(&self) {
        let _ = self
            .state
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire);
    }

    /// 进入失败终态
    pub fn fail(&self) {
        let _ = self
            .state
            .compare_exchange(0, 2, Ordering::AcqRel, Ordering::Acquire);
    }

    pub fn snapshot(&self) -> IndicatorSnapshot {
        IndicatorSnapshot {
            label: self.label.clone(),
            kind: self.kind,
            current: self.current(),
            target: self.target(),
            state: self.state(),
        }
    }
}
