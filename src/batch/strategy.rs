//! # 运行策略
//!
//! 每次运行选择一种策略，策略提供运行循环消费的四个可选钩子：
//! `folder_begin` / `per_file` / `folder_finish` / `count_learned_late`。
//!
//! ## 策略
//! - 直接处理：对每个文件执行注入的操作，递增线程进度条与总进度
//! - 两阶段：先用字节区间读取统计每个文件的条目数，再带着准确的
//!   总量执行直接处理
//! - 打包：每个文件夹打开一个归档写入器，文件按相对路径写入
//!
//! ## 依赖关系
//! - 被 `batch/runner.rs` 安装
//! - 使用 `progress/` 发布进度
//! - 具体操作由 `ops/` 实现

use super::context::{IoContext, RangeReader};
use super::pool::WorkerId;
use super::stats::{ExtractStats, ExtractStatsMaker, ScanStats};
use crate::error::{Result, SpikeError};
use crate::progress::{DisplayLine, ProgressChannel, ProgressIndicator, ThreadBarCache};

use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

/// 注入的每文件操作
pub trait FileOperation: Send + Sync {
    /// 处理文件；每完成一个内部条目调用 `progress(n)`
    fn process(&self, ctx: &mut dyn IoContext, progress: &dyn Fn(u64)) -> Result<()>;

    /// 统计文件内部条目数；`None` 表示文件不属于任何归档分组
    fn stat(&self, _reader: &mut RangeReader<'_>) -> Result<Option<u64>> {
        Ok(None)
    }
}

/// 归档写入器（打包策略）
pub trait ArchiveWriter: Send {
    /// 以根相对、正斜杠分隔的键写入一个文件
    ///
    /// 读取 `data` 失败时返回 `FileReadError`，归档必须保持完整可用，
    /// 只有该文件失败；其它错误视为归档本身损坏。
    fn send_file(&mut self, key: &str, data: &mut dyn Read) -> Result<()>;

    /// 完成归档
    fn finish(&mut self) -> Result<()>;
}

/// 归档写入器工厂
pub trait ArchiveFactory: Send + Sync {
    fn open(&self, folder: &Path, stats: ScanStats) -> Result<Box<dyn ArchiveWriter>>;
}

/// 运行策略
#[derive(Clone)]
pub enum Strategy {
    /// 直接处理
    Direct(Arc<dyn FileOperation>),
    /// 两阶段：先统计再处理
    TwoPhase(Arc<dyn FileOperation>),
    /// 打包
    Pack(Arc<dyn ArchiveFactory>),
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Direct(_) => "direct",
            Strategy::TwoPhase(_) => "two-phase",
            Strategy::Pack(_) => "pack",
        }
    }
}

pub type FileHook = Arc<dyn Fn(&mut dyn IoContext) -> Result<()> + Send + Sync>;
pub type FolderBeginHook = Box<dyn FnMut(&Path, ScanStats) -> Result<()> + Send>;
pub type FolderFinishHook = Box<dyn FnMut() -> Result<()> + Send>;
pub type CountHook = Box<dyn FnMut(usize) + Send>;

/// 运行循环消费的钩子
#[derive(Default)]
pub struct Hooks {
    pub folder_begin: Option<FolderBeginHook>,
    pub per_file: Option<FileHook>,
    pub folder_finish: Option<FolderFinishHook>,
    pub count_learned_late: Option<CountHook>,
}

/// 策略构建指示器所需的环境
#[derive(Clone)]
pub struct StrategyEnv {
    pub channel: Arc<ProgressChannel>,
    pub hardware_threads: usize,
    pub pool_threads: usize,
    pub queue_len: usize,
}

/// 运行结束时需要收尾的指示器
#[derive(Default)]
pub struct RunLines {
    /// 总进度
    pub aggregate: Option<Arc<ProgressIndicator>>,
    /// 运行结束时一并进入终态的指示器
    pub finish_on_done: Vec<Arc<ProgressIndicator>>,
}

impl RunLines {
    pub fn close(&self, ok: bool) {
        for ind in self.aggregate.iter().chain(self.finish_on_done.iter()) {
            if ok {
                ind.finish();
            } else {
                ind.fail();
            }
        }
    }
}

fn thread_bars(count: usize) -> Vec<Arc<ProgressIndicator>> {
    (0..count)
        .map(|i| Arc::new(ProgressIndicator::simple(format!("Thread {}:", i))))
        .collect()
}

// ─────────────────────────────────────────────────────────────
// 直接处理
// ─────────────────────────────────────────────────────────────

/// 直接处理策略
pub fn direct(op: Arc<dyn FileOperation>, env: &StrategyEnv) -> (Hooks, RunLines) {
    let bars = thread_bars(ThreadBarCache::capacity_for(
        env.hardware_threads,
        env.pool_threads,
    ));
    let counter = Arc::new(ProgressIndicator::spinner("Processed files:"));
    let total = Arc::new(ProgressIndicator::detailed("Total: ", env.queue_len as u64));

    {
        let mut w = env.channel.modify();
        for bar in &bars {
            w.append(DisplayLine::from(Arc::clone(bar)));
        }
        w.append(DisplayLine::from(Arc::clone(&counter)));
        w.append(DisplayLine::from(Arc::clone(&total)));
    }

    let cache = Arc::new(ThreadBarCache::new(bars));

    let per_file: FileHook = {
        let counter = Arc::clone(&counter);
        let total = Arc::clone(&total);
        Arc::new(move |ctx: &mut dyn IoContext| {
            log::info!("Processing: {}", ctx.full_path().display());
            op.process(ctx, &|_: u64| {})?;
            if let Some(bar) = cache.assign(WorkerId::current()) {
                bar.inc(1);
            }
            total.inc(1);
            counter.inc(1);
            Ok(())
        })
    };

    // 文件夹条目在队列中已计为 1，扫描后用真实文件数替换该占位
    let count_learned_late: CountHook = {
        let total = Arc::clone(&total);
        Box::new(move |num_files: usize| {
            total.add_target(num_files.saturating_sub(1) as u64);
        })
    };

    let hooks = Hooks {
        per_file: Some(per_file),
        count_learned_late: Some(count_learned_late),
        ..Hooks::default()
    };
    let lines = RunLines {
        aggregate: Some(total),
        finish_on_done: vec![counter],
    };
    (hooks, lines)
}

// ─────────────────────────────────────────────────────────────
// 两阶段：统计
// ─────────────────────────────────────────────────────────────

/// 两阶段策略的统计阶段
pub struct StatPhase {
    pub hooks: Hooks,
    maker: Arc<ExtractStatsMaker>,
    spinner: Arc<ProgressIndicator>,
}

impl StatPhase {
    /// 结束统计阶段，取出统计结果
    pub fn finish(self, ok: bool) -> ExtractStats {
        // 钩子持有累积器的另一份引用，先释放
        drop(self.hooks);
        if ok {
            self.spinner.finish();
        } else {
            self.spinner.fail();
        }
        match Arc::try_unwrap(self.maker) {
            Ok(maker) => maker.into_stats(),
            Err(shared) => shared.snapshot(),
        }
    }
}

/// 两阶段策略第一阶段：统计每个文件的条目数
pub fn extract_stat(op: Arc<dyn FileOperation>, env: &StrategyEnv) -> StatPhase {
    let maker = Arc::new(ExtractStatsMaker::new());
    let spinner = Arc::new(ProgressIndicator::spinner("Processing extract stats."));
    env.channel.modify().append(DisplayLine::from(Arc::clone(&spinner)));

    let per_file: FileHook = {
        let maker = Arc::clone(&maker);
        let spinner = Arc::clone(&spinner);
        Arc::new(move |ctx: &mut dyn IoContext| {
            let key = ctx.key();
            let stat = op.stat(&mut RangeReader::new(ctx));
            spinner.inc(1);
            match stat {
                Ok(items) => {
                    maker.push(key, items);
                    Ok(())
                }
                Err(e) => {
                    // 失败文件计 0，保证总量一致
                    maker.push(key, Some(0));
                    Err(SpikeError::StatCollectionFailure {
                        path: ctx.full_path().display().to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        })
    };

    StatPhase {
        hooks: Hooks {
            per_file: Some(per_file),
            ..Hooks::default()
        },
        maker,
        spinner,
    }
}

// ─────────────────────────────────────────────────────────────
// 两阶段：处理
// ─────────────────────────────────────────────────────────────

/// 两阶段策略第二阶段：进度条总量由统计结果预置
pub fn process_with_stats(
    op: Arc<dyn FileOperation>,
    stats: ExtractStats,
    env: &StrategyEnv,
) -> (Hooks, RunLines) {
    let bars = thread_bars(ThreadBarCache::capacity_for(
        env.hardware_threads,
        stats.per_archive.len(),
    ));
    let total = Arc::new(ProgressIndicator::detailed("Total: ", stats.total_files));

    {
        let mut w = env.channel.modify();
        for bar in &bars {
            w.append(DisplayLine::from(Arc::clone(bar)));
        }
        w.append(DisplayLine::from(Arc::clone(&total)));
    }

    let cache = Arc::new(ThreadBarCache::new(bars));
    let stats = Arc::new(stats);

    let per_file: FileHook = {
        let total = Arc::clone(&total);
        Arc::new(move |ctx: &mut dyn IoContext| {
            let items = stats.items_for(&ctx.key());
            let bar = cache.assign(WorkerId::current());
            if let Some(bar) = &bar {
                bar.restart(items.unwrap_or(1));
            }

            log::info!("Processing: {}", ctx.full_path().display());
            let progress = |n: u64| {
                if let Some(bar) = &bar {
                    bar.inc(n);
                }
                if matches!(items, Some(k) if k > 0) {
                    total.inc(n);
                }
            };
            op.process(ctx, &progress)?;

            if items.is_none() {
                if let Some(bar) = &bar {
                    bar.inc(1);
                }
                total.inc(1);
            }
            Ok(())
        })
    };

    let hooks = Hooks {
        per_file: Some(per_file),
        ..Hooks::default()
    };
    let lines = RunLines {
        aggregate: Some(total),
        finish_on_done: Vec::new(),
    };
    (hooks, lines)
}

// ─────────────────────────────────────────────────────────────
// 打包
// ─────────────────────────────────────────────────────────────

/// 当前正在打包的文件夹
struct PackFolder {
    root: PathBuf,
    writer: Mutex<Box<dyn ArchiveWriter>>,
    bar: Arc<ProgressIndicator>,
    failure: Mutex<Option<String>>,
}

impl PackFolder {
    fn failure(&self) -> Option<String> {
        self.failure.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_failure(&self, reason: String) {
        let mut failure = self.failure.lock().unwrap_or_else(|e| e.into_inner());
        failure.get_or_insert(reason);
    }

    fn archive_error(&self, reason: String) -> SpikeError {
        SpikeError::ArchiveFailure {
            path: self.root.display().to_string(),
            reason,
        }
    }
}

/// 文件相对于文件夹根的归档键，统一为正斜杠
pub fn archive_key(root: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// 打包策略
pub fn pack(factory: Arc<dyn ArchiveFactory>, env: &StrategyEnv) -> Hooks {
    let current: Arc<Mutex<Option<Arc<PackFolder>>>> = Arc::new(Mutex::new(None));

    let folder_begin: FolderBeginHook = {
        let current = Arc::clone(&current);
        let channel = Arc::clone(&env.channel);
        let mut index = 0usize;
        let mut previous: Option<DisplayLine> = None;
        Box::new(move |path: &Path, stats: ScanStats| {
            let writer = factory.open(path, stats).map_err(|e| SpikeError::ArchiveFailure {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

            let bar = Arc::new(ProgressIndicator::detailed(
                format!("Folder id {}", index),
                stats.num_files as u64,
            ));
            index += 1;
            let line = DisplayLine::from(Arc::clone(&bar));
            {
                // 文件夹进度条保持相邻
                let mut w = channel.modify();
                match &previous {
                    Some(prev) => w.insert(line.clone(), Some(prev)),
                    None => w.append(line.clone()),
                }
            }
            previous = Some(line);
            log::info!(
                "Processing: {} ({} files, {} name bytes)",
                path.display(),
                stats.num_files,
                stats.total_name_bytes
            );

            let folder = PackFolder {
                root: path.to_path_buf(),
                writer: Mutex::new(writer),
                bar,
                failure: Mutex::new(None),
            };
            *current.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(folder));
            Ok(())
        })
    };

    let per_file: FileHook = {
        let current = Arc::clone(&current);
        Arc::new(move |ctx: &mut dyn IoContext| {
            let folder = current
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
                .ok_or_else(|| SpikeError::Skipped("pack mode only accepts folders".to_string()))?;

            if let Some(reason) = folder.failure() {
                return Err(SpikeError::Skipped(format!("archive failed: {}", reason)));
            }

            let path = ctx.full_path().to_path_buf();
            let key = archive_key(&folder.root, &path).ok_or_else(|| {
                folder.archive_error(format!("{} is outside the folder", path.display()))
            })?;

            let stream = ctx.stream()?;
            let sent = folder
                .writer
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .send_file(&key, stream);
            match sent {
                Ok(()) => {}
                Err(e @ SpikeError::FileReadError { .. }) => return Err(e),
                Err(e) => {
                    folder.set_failure(e.to_string());
                    return Err(folder.archive_error(e.to_string()));
                }
            }

            folder.bar.inc(1);
            Ok(())
        })
    };

    let folder_finish: FolderFinishHook = {
        let current = Arc::clone(&current);
        Box::new(move || {
            let Some(folder) = current.lock().unwrap_or_else(|e| e.into_inner()).take() else {
                return Ok(());
            };

            let finished = folder
                .writer
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .finish();
            let failure = match finished {
                Err(e) => Some(e.to_string()),
                Ok(()) => folder.failure(),
            };

            match failure {
                Some(reason) => {
                    folder.bar.fail();
                    Err(folder.archive_error(reason))
                }
                None => {
                    folder.bar.finish();
                    Ok(())
                }
            }
        })
    };

    Hooks {
        folder_begin: Some(folder_begin),
        per_file: Some(per_file),
        folder_finish: Some(folder_finish),
        count_learned_late: None,
    }
}
