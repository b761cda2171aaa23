//! # 进度条渲染
//!
//! 渲染线程每帧对 `ProgressChannel` 执行一次 `swap` + `read_active`，
//! 把每个 `DisplayLine` 映射到 `MultiProgress` 中的一个 `indicatif` 进度条：
//! - `Detailed` → 带 ETA 的完整进度条
//! - `Simple` → 紧凑计数条
//! - `Spinner` → spinner，终态显示 ✔ / ✘
//! - `Text` → 纯文本行
//!
//! 通道中消失的行会从终端移除。
//!
//! ## 依赖关系
//! - 被 `commands/` 模块使用
//! - 读取 `progress/` 发布的状态
//! - 使用 `indicatif` crate

use crate::progress::{
    DisplayLine, IndicatorKind, IndicatorSnapshot, IndicatorState, ProgressChannel,
};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// 创建标准进度条
pub fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        style("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .progress_chars("#>-"),
    );
    pb.set_message(message.to_string());
    pb
}

/// 创建 spinner（用于不确定进度的任务）
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        style("{spinner:.green} {msg} {pos}")
            .tick_strings(&["⣾", "⣽", "⣻", "⢿", "⡿", "⣟", "⣯", "⣷", "✔"]),
    );
    pb.set_message(message.to_string());
    pb
}

/// 创建简单的计数进度条
pub fn create_simple_bar(len: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(style("{msg:<12} {bar:40.green/white} {pos}/{len}").progress_chars("█▓░"));
    pb.set_message(message.to_string());
    pb
}

/// 创建文本行
pub fn create_text_line(text: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(style("{msg}"));
    pb.set_message(text.to_string());
    pb
}

/// 把通道内容镜像到终端
pub struct ProgressRenderer {
    channel: Arc<ProgressChannel>,
    multi: MultiProgress,
    /// 保留行的克隆，保证键在移除前不会被复用
    bars: HashMap<usize, (DisplayLine, ProgressBar)>,
}

impl ProgressRenderer {
    /// `visible` 为 false 时使用隐藏绘制目标
    pub fn new(channel: Arc<ProgressChannel>, visible: bool) -> Self {
        let target = if visible {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        Self {
            channel,
            multi: MultiProgress::with_draw_target(target),
            bars: HashMap::new(),
        }
    }

    /// 当前显示的行数
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// 取得某一行对应的进度条
    #[cfg(test)]
    pub fn bar_for(&self, line: &DisplayLine) -> Option<&ProgressBar> {
        self.bars.get(&line.key()).map(|(_, pb)| pb)
    }

    /// 渲染一帧
    pub fn frame(&mut self) {
        self.channel.swap();
        let lines = self.channel.read_active();

        let live: Vec<usize> = lines.iter().map(DisplayLine::key).collect();
        let gone: Vec<usize> = self
            .bars
            .keys()
            .filter(|k| !live.contains(k))
            .copied()
            .collect();
        for key in gone {
            if let Some((_, pb)) = self.bars.remove(&key) {
                self.multi.remove(&pb);
            }
        }

        for (index, line) in lines.into_iter().enumerate() {
            let key = line.key();
            if !self.bars.contains_key(&key) {
                let pb = self.multi.insert(index, new_bar(&line));
                self.bars.insert(key, (line.clone(), pb));
            }
            if let (DisplayLine::Indicator(ind), Some((_, pb))) = (&line, self.bars.get(&key)) {
                sync_bar(pb, &ind.snapshot());
            }
        }
    }

    /// 在后台线程中按固定间隔渲染，直到 [`RenderHandle::stop`]
    pub fn spawn(mut self, interval: Duration) -> RenderHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("spike-render".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    self.frame();
                    std::thread::sleep(interval);
                }
                // 最后一帧，保证终态可见
                self.frame();
                self
            });

        let handle = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                log::warn!("Failed to start render thread: {}", e);
                None
            }
        };
        RenderHandle { stop, handle }
    }
}

/// 渲染线程句柄，drop 时停止
pub struct RenderHandle {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<ProgressRenderer>>,
}

impl RenderHandle {
    /// 停止渲染线程并等待最后一帧
    pub fn stop(mut self) -> Option<ProgressRenderer> {
        self.join()
    }

    fn join(&mut self) -> Option<ProgressRenderer> {
        self.stop.store(true, Ordering::Release);
        let renderer = self.handle.take()?.join().ok()?;
        renderer.multi.clear().ok();
        Some(renderer)
    }
}

impl Drop for RenderHandle {
    fn drop(&mut self) {
        self.join();
    }
}

fn new_bar(line: &DisplayLine) -> ProgressBar {
    match line {
        DisplayLine::Text(text) => create_text_line(text),
        DisplayLine::Indicator(ind) => match ind.kind() {
            IndicatorKind::Detailed => create_progress_bar(ind.target(), ind.label()),
            IndicatorKind::Simple => create_simple_bar(ind.target(), ind.label()),
            IndicatorKind::Spinner => create_spinner(ind.label()),
        },
    }
}

fn sync_bar(pb: &ProgressBar, snap: &IndicatorSnapshot) {
    if pb.is_finished() {
        return;
    }
    if snap.kind != IndicatorKind::Spinner {
        pb.set_length(snap.target);
    }
    pb.set_position(snap.current);

    match snap.state {
        IndicatorState::Running => pb.tick(),
        IndicatorState::Finished if snap.kind == IndicatorKind::Spinner => {
            pb.finish_with_message(format!("{} ✔", snap.label))
        }
        IndicatorState::Finished => pb.finish(),
        IndicatorState::Failed => pb.abandon_with_message(format!("{} ✘", snap.label)),
    }
}
