//! # 进度模块
//!
//! 工作线程发布、渲染线程消费的进度状态。
//!
//! ## 功能
//! - 进度指示器（简单条 / 详细条 / spinner）
//! - 双缓冲进度通道
//! - 线程 → 进度条缓存
//!
//! ## 依赖关系
//! - 被 `batch/` 写入
//! - 被 `utils/progress.rs` 渲染

pub mod bar_cache;
pub mod channel;
pub mod indicator;

pub use bar_cache::ThreadBarCache;
pub use channel::{DisplayLine, ProgressChannel};
pub use indicator::{IndicatorKind, IndicatorSnapshot, IndicatorState, ProgressIndicator};
