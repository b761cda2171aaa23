//! # 文件操作实现
//!
//! 为批处理引擎提供具体的逐文件操作与归档写入器。
//!
//! ## 模块
//! - `checksum`：SHA-256 校验和（直接 / 两阶段策略）
//! - `packer`：文本归档（打包策略）
//!
//! ## 依赖关系
//! - 实现 `batch/strategy.rs` 中的 trait
//! - 被 `commands/` 使用

pub mod checksum;
pub mod packer;

pub use checksum::ChecksumOperation;
pub use packer::TextArchiveFactory;
