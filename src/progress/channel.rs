//! # 双缓冲进度通道
//!
//! 写入方（构建指示器的会话）写非活动缓冲，渲染线程每帧 `swap` 后读取活动缓冲。
//!
//! ## 协议
//! - `append` / `insert` 只写非活动缓冲
//! - `swap` 翻转活动索引，并把新的活动缓冲复制到新的非活动缓冲，
//!   之后的写入叠加在已有内容之上
//! - `read_active` 只由渲染线程调用
//! - `clean` 清空两个缓冲
//!
//! 翻转与复制在同一把锁内完成，读者不会看到复制了一半的缓冲。
//!
//! ## 依赖关系
//! - 被 `batch/strategy.rs` 写入
//! - 被 `utils/progress.rs` 渲染

use super::indicator::ProgressIndicator;

use std::sync::{Arc, Mutex, MutexGuard};

/// 通道中的一行
#[derive(Debug, Clone)]
pub enum DisplayLine {
    /// 进度指示器
    Indicator(Arc<ProgressIndicator>),
    /// 自由文本行
    Text(Arc<str>),
}

impl DisplayLine {
    pub fn text(text: impl AsRef<str>) -> Self {
        DisplayLine::Text(Arc::from(text.as_ref()))
    }

    /// 按身份比较（同一个 Arc）
    pub fn same_as(&self, other: &DisplayLine) -> bool {
        match (self, other) {
            (DisplayLine::Indicator(a), DisplayLine::Indicator(b)) => Arc::ptr_eq(a, b),
            (DisplayLine::Text(a), DisplayLine::Text(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// 渲染端用作稳定键
    pub fn key(&self) -> usize {
        match self {
            DisplayLine::Indicator(ind) => Arc::as_ptr(ind) as *const u8 as usize,
            DisplayLine::Text(text) => Arc::as_ptr(text) as *const u8 as usize,
        }
    }
}

impl From<Arc<ProgressIndicator>> for DisplayLine {
    fn from(ind: Arc<ProgressIndicator>) -> Self {
        DisplayLine::Indicator(ind)
    }
}

#[derive(Debug, Default)]
struct Buffers {
    lines: [Vec<DisplayLine>; 2],
    active: usize,
}

impl Buffers {
    fn pending(&mut self) -> &mut Vec<DisplayLine> {
        &mut self.lines[1 - self.active]
    }
}

/// 双缓冲进度通道
#[derive(Debug, Default)]
pub struct ProgressChannel {
    buffers: Mutex<Buffers>,
}

/// 一次写入会话，结束时自动 `swap`
pub struct ChannelWriter<'a> {
    buffers: MutexGuard<'a, Buffers>,
}

impl ChannelWriter<'_> {
    pub fn append(&mut self, line: DisplayLine) {
        self.buffers.pending().push(line);
    }

    pub fn insert(&mut self, line: DisplayLine, after: Option<&DisplayLine>) {
        insert_after(self.buffers.pending(), line, after);
    }
}

impl Drop for ChannelWriter<'_> {
    fn drop(&mut self) {
        flip(&mut self.buffers);
    }
}

fn insert_after(lines: &mut Vec<DisplayLine>, line: DisplayLine, after: Option<&DisplayLine>) {
    let index = match after {
        None => 0,
        Some(anchor) => lines
            .iter()
            .position(|l| l.same_as(anchor))
            .map(|i| i + 1)
            .unwrap_or(lines.len()),
    };
    lines.insert(index, line);
}

fn flip(buffers: &mut Buffers) {
    buffers.active = 1 - buffers.active;
    let active = buffers.lines[buffers.active].clone();
    buffers.lines[1 - buffers.active] = active;
}

impl ProgressChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Buffers> {
        // 缓冲只含 Arc 克隆，中毒后数据仍然一致
        self.buffers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 追加到非活动缓冲
    pub fn append(&self, line: impl Into<DisplayLine>) {
        self.lock().pending().push(line.into());
    }

    /// 插入到 `after` 之后；`None` 插到最前，锚点不存在时追加到末尾
    pub fn insert(&self, line: impl Into<DisplayLine>, after: Option<&DisplayLine>) {
        insert_after(self.lock().pending(), line.into(), after);
    }

    /// 开启写入会话；会话结束时翻转，使修改对渲染端可见
    pub fn modify(&self) -> ChannelWriter<'_> {
        ChannelWriter {
            buffers: self.lock(),
        }
    }

    /// 翻转活动缓冲并向前复制
    pub fn swap(&self) {
        flip(&mut self.lock());
    }

    /// 读取活动缓冲（渲染线程）
    pub fn read_active(&self) -> Vec<DisplayLine> {
        let buffers = self.lock();
        buffers.lines[buffers.active].clone()
    }

    /// 清空两个缓冲
    pub fn clean(&self) {
        let mut buffers = self.lock();
        for lines in buffers.lines.iter_mut() {
            lines.clear();
        }
    }
}
