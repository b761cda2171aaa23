//! # spikebatch - 批量文件处理工具
//!
//! 在有界工作线程池上批量处理文件与文件夹，实时汇总进度。
//!
//! ## 子命令
//! - `checksum` - 计算 SHA-256（直接处理 / 两阶段）
//! - `pack`     - 把文件夹打包为文本归档
//!
//! Ctrl-C 触发取消：正在运行的任务完成后，剩余条目不再开始。
//!
//! ## 依赖关系
//! ```text
//! main.rs
//!   ├── cli/        (命令行参数定义)
//!   ├── commands/   (命令执行逻辑)
//!   │     ├── batch/     (批处理引擎)
//!   │     ├── ops/       (具体文件操作)
//!   │     └── progress/  (进度状态)
//!   ├── config.rs   (运行配置)
//!   ├── utils/      (输出与进度渲染)
//!   └── error.rs    (错误处理)
//! ```

mod batch;
mod cli;
mod commands;
mod config;
mod error;
mod ops;
mod progress;
mod utils;

use batch::CancelToken;
use clap::Parser;
use cli::Cli;
use error::{Result, SpikeError};
use simplelog::{
    ColorChoice, CombinedLogger, Config, LevelFilter, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 初始化日志：终端 + 可选日志文件
fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];

    if let Some(path) = log_file {
        let file = File::create(path).map_err(|e| SpikeError::FileWriteError {
            path: path.display().to_string(),
            source: e,
        })?;
        loggers.push(WriteLogger::new(LevelFilter::Debug, Config::default(), file));
    }

    CombinedLogger::init(loggers)
        .map_err(|e| SpikeError::Other(format!("Failed to initialise logging: {}", e)))
}

fn main() {
    // Initialize colored output for Windows compatibility
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.log_file.as_deref()) {
        utils::output::print_error(&format!("{}", e));
        std::process::exit(1);
    }

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    let notified = Arc::new(AtomicBool::new(false));
    let installed = ctrlc::set_handler(move || {
        handler_token.cancel();
        if !notified.swap(true, Ordering::Relaxed) {
            utils::output::print_warning("Cancelling: waiting for running tasks to finish");
        }
    });
    if let Err(e) = installed {
        log::warn!("Failed to install Ctrl-C handler: {}", e);
    }

    if let Err(e) = commands::run(cli.command, &cancel) {
        utils::output::print_error_chain(&e);
        std::process::exit(1);
    }
}
