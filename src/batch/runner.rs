//! # 批量执行器
//!
//! 持有条目队列、扫描器与线程池，按所选策略驱动扫描、任务提交与阶段顺序。
//!
//! ## 状态机
//! `Idle → Scanning → Dispatching → Waiting → FolderFinishing → (下一条目 | Done)`
//!
//! ## 顺序保证
//! - 同一条目内的文件任务完全并行、无相对顺序
//! - 每个条目提交后都 `wait`，下一个条目的任务不会早于上一个条目排空
//! - 两阶段策略的第二阶段在第一阶段排空后才开始
//!
//! ## 失败语义
//! - 文件任务失败：在任务边界捕获、记录，运行继续
//! - 扫描或文件夹钩子失败（含 panic）：中止剩余条目，以 `RunAborted` 返回
//! - 两阶段策略中同一文件在两遍中只记一条；任一遍失败即记为失败
//!
//! ## 依赖关系
//! - 使用 `batch/pool.rs` 执行任务
//! - 使用 `batch/collector.rs` 扫描文件夹
//! - 使用 `batch/strategy.rs` 安装钩子
//! - 被 `commands/` 调用

use super::collector::{FileCollector, Scanner};
use super::context::{FsContextFactory, IoContextFactory};
use super::pool::{panic_message, WorkerPool};
use super::stats::ScanStats;
use super::strategy::{self, FileHook, Hooks, RunLines, Strategy, StrategyEnv};
use crate::error::{Result, SpikeError};
use crate::progress::{IndicatorSnapshot, ProgressChannel};

use serde::Serialize;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// 队列条目，提交后不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub root: PathBuf,
    pub relative: PathBuf,
    pub is_folder: bool,
}

impl QueueEntry {
    pub fn new(root: impl Into<PathBuf>, relative: impl Into<PathBuf>, is_folder: bool) -> Self {
        Self {
            root: root.into(),
            relative: relative.into(),
            is_folder,
        }
    }

    /// 由命令行路径构造：根为父目录，相对部分为文件名
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SpikeError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let relative = path.file_name().map(PathBuf::from).ok_or_else(|| {
            SpikeError::InvalidArgument(format!("'{}' has no file name", path.display()))
        })?;
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(Self::new(root, relative, path.is_dir()))
    }

    pub fn full_path(&self) -> PathBuf {
        self.root.join(&self.relative)
    }

    pub fn label(&self) -> String {
        self.relative.display().to_string()
    }
}

/// 单个文件处理结果
#[derive(Debug, Clone)]
pub enum ProcessResult {
    /// 处理成功
    Success(String),
    /// 跳过（取消或所属归档已失败）
    Skipped(String),
    /// 处理失败
    Failed(String, String), // (文件路径, 错误信息)
}

/// 批量处理结果统计
#[derive(Debug, Default, Clone)]
pub struct BatchResult {
    /// 成功数量
    pub success: usize,
    /// 跳过数量
    pub skipped: usize,
    /// 失败数量
    pub failed: usize,
    /// 失败详情
    pub failures: Vec<(String, String)>,
    /// 逐文件记录（报告用）
    pub records: Vec<FileRecord>,
}

/// 报告中的一行
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub path: String,
    pub status: &'static str,
    pub error: String,
}

impl BatchResult {
    /// 合并处理结果
    pub fn merge(&mut self, result: ProcessResult) {
        let record = match result {
            ProcessResult::Success(path) => {
                self.success += 1;
                FileRecord {
                    path,
                    status: "ok",
                    error: String::new(),
                }
            }
            ProcessResult::Skipped(path) => {
                self.skipped += 1;
                FileRecord {
                    path,
                    status: "skipped",
                    error: String::new(),
                }
            }
            ProcessResult::Failed(path, err) => {
                self.failed += 1;
                self.failures.push((path.clone(), err.clone()));
                FileRecord {
                    path,
                    status: "failed",
                    error: err,
                }
            }
        };
        self.records.push(record);
    }

    /// 并入较早一遍的失败记录，同一路径只保留一条
    ///
    /// 本遍已失败的路径保持不变；本遍成功或跳过的路径改记为较早的失败。
    pub fn absorb_failures(&mut self, earlier: BatchResult) {
        let mut index: HashMap<String, usize> = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.path.clone(), i))
            .collect();

        for record in earlier.records.into_iter().filter(|r| r.status == "failed") {
            match index.get(&record.path) {
                Some(&i) if self.records[i].status == "failed" => {}
                Some(&i) => self.records[i] = record,
                None => {
                    index.insert(record.path.clone(), self.records.len());
                    self.records.push(record);
                }
            }
        }
        self.recount();
    }

    /// 由逐文件记录重算计数与失败详情
    fn recount(&mut self) {
        self.success = 0;
        self.skipped = 0;
        self.failed = 0;
        self.failures.clear();
        for record in &self.records {
            match record.status {
                "ok" => self.success += 1,
                "skipped" => self.skipped += 1,
                _ => {
                    self.failed += 1;
                    self.failures.push((record.path.clone(), record.error.clone()));
                }
            }
        }
    }

    /// 总处理数量
    pub fn total(&self) -> usize {
        self.success + self.skipped + self.failed
    }
}

/// 一次运行的汇总
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub strategy: &'static str,
    pub result: BatchResult,
    pub entries: usize,
    pub passes: usize,
    pub elapsed: Duration,
    /// 总进度的最终状态
    pub aggregate: Option<IndicatorSnapshot>,
    /// 两阶段策略统计出的总条目数
    pub stat_total: Option<u64>,
}

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Scanning(usize),
    Dispatching(usize),
    Waiting(usize),
    FolderFinishing(usize),
    Done,
}

/// 取消令牌
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// 批量执行器
pub struct BatchRunner<S: Scanner = FileCollector> {
    queue: Vec<QueueEntry>,
    scanner: S,
    pool: WorkerPool,
    contexts: Arc<dyn IoContextFactory>,
    channel: Arc<ProgressChannel>,
    cancel: CancelToken,
    /// 每次屏障返回后递增
    generation: Arc<AtomicU64>,
    results: Arc<Mutex<BatchResult>>,
    hooks: Hooks,
    state: RunState,
    grace_delay: Duration,
    hardware_threads: usize,
}

impl<S: Scanner> BatchRunner<S> {
    /// 创建新的批量执行器
    pub fn new(queue: Vec<QueueEntry>, scanner: S, pool: WorkerPool) -> Self {
        Self {
            queue,
            scanner,
            pool,
            contexts: Arc::new(FsContextFactory),
            channel: Arc::new(ProgressChannel::new()),
            cancel: CancelToken::new(),
            generation: Arc::new(AtomicU64::new(0)),
            results: Arc::new(Mutex::new(BatchResult::default())),
            hooks: Hooks::default(),
            state: RunState::Idle,
            grace_delay: Duration::from_millis(100),
            hardware_threads: num_cpus::get(),
        }
    }

    #[cfg(test)]
    pub fn with_contexts(mut self, contexts: Arc<dyn IoContextFactory>) -> Self {
        self.contexts = contexts;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_grace_delay(mut self, delay: Duration) -> Self {
        self.grace_delay = delay;
        self
    }

    #[cfg(test)]
    pub fn with_hardware_threads(mut self, threads: usize) -> Self {
        self.hardware_threads = threads;
        self
    }

    pub fn channel(&self) -> Arc<ProgressChannel> {
        Arc::clone(&self.channel)
    }

    #[cfg(test)]
    pub fn generation(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.generation)
    }

    #[cfg(test)]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// 关闭线程池，返回在任务边界捕获的失败次数
    pub fn close(self) -> usize {
        let failures = self.pool.failures();
        self.pool.close();
        failures
    }

    fn strategy_env(&self) -> StrategyEnv {
        StrategyEnv {
            channel: Arc::clone(&self.channel),
            hardware_threads: self.hardware_threads,
            pool_threads: self.pool.threads(),
            queue_len: self.queue.len(),
        }
    }

    /// 按策略处理整个队列
    pub fn process_queue(&mut self, strategy: Strategy) -> Result<RunSummary> {
        let start = Instant::now();
        *self.lock_results() = BatchResult::default();
        let env = self.strategy_env();
        log::info!(
            "Starting {} run over {} entries ({} threads)",
            strategy.name(),
            self.queue.len(),
            self.pool.threads()
        );
        if self.pool.is_inline() {
            log::debug!("worker pool is inline; tasks run on the driver thread");
        } else {
            log::debug!("worker queue capacity: {}", self.pool.queue_capacity());
        }

        let mut stat_total = None;
        let (outcome, lines, passes) = match &strategy {
            Strategy::Direct(op) => {
                let (hooks, lines) = strategy::direct(Arc::clone(op), &env);
                self.hooks = hooks;
                (self.run_pass(), lines, 1)
            }
            Strategy::TwoPhase(op) => {
                let mut phase = strategy::extract_stat(Arc::clone(op), &env);
                self.hooks = std::mem::take(&mut phase.hooks);
                let first = self.run_pass();
                let stats = phase.finish(first.is_ok());
                let stat_results = std::mem::take(&mut *self.lock_results());
                stat_total = Some(stats.total_files);
                log::info!(
                    "Extract stats: {} archives, {} loose files, {} total",
                    stats.per_archive.len(),
                    stats.loose_files,
                    stats.total_files
                );

                let second = match first {
                    Ok(()) => {
                        let (hooks, lines) = strategy::process_with_stats(Arc::clone(op), stats, &env);
                        self.hooks = hooks;
                        (self.run_pass(), lines, 2)
                    }
                    Err(e) => (Err(e), RunLines::default(), 1),
                };
                self.lock_results().absorb_failures(stat_results);
                second
            }
            Strategy::Pack(factory) => {
                self.hooks = strategy::pack(Arc::clone(factory), &env);
                (self.run_pass(), RunLines::default(), 1)
            }
        };

        self.teardown(&lines, outcome.is_ok());
        outcome?;

        let result = self.lock_results().clone();
        log::info!(
            "Run finished: {} ok, {} skipped, {} failed",
            result.success,
            result.skipped,
            result.failed
        );

        Ok(RunSummary {
            strategy: strategy.name(),
            result,
            entries: self.queue.len(),
            passes,
            elapsed: start.elapsed(),
            aggregate: lines.aggregate.as_ref().map(|a| a.snapshot()),
            stat_total,
        })
    }

    fn lock_results(&self) -> std::sync::MutexGuard<'_, BatchResult> {
        self.results.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 当前记录的结果
    pub fn results(&self) -> BatchResult {
        self.lock_results().clone()
    }

    /// 对整个队列执行一遍
    fn run_pass(&mut self) -> Result<()> {
        let mut outcome = Ok(());
        for index in 0..self.queue.len() {
            let entry = self.queue[index].clone();
            if let Err(e) = self.process_entry(index, &entry) {
                outcome = Err(e);
                break;
            }
        }
        self.clean();
        outcome
    }

    fn process_entry(&mut self, index: usize, entry: &QueueEntry) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SpikeError::Cancelled);
        }

        let full_path = entry.full_path();

        if entry.is_folder {
            self.state = RunState::Scanning(index);
            let scanner = &mut self.scanner;
            guarded(entry, || scanner.scan(&full_path))?;
            let files = self.scanner.files().to_vec();

            if let Some(learn) = self.hooks.count_learned_late.as_mut() {
                let count = self.scanner.approximate_count();
                guarded(entry, || {
                    learn(count);
                    Ok(())
                })?;
            }

            if let Some(begin) = self.hooks.folder_begin.as_mut() {
                let stats = ScanStats::from_files(&files);
                guarded(entry, || begin(&full_path, stats))?;
            }

            self.state = RunState::Dispatching(index);
            for file in files {
                self.submit_file(file);
            }
            self.barrier(index);

            self.state = RunState::FolderFinishing(index);
            if let Some(finish) = self.hooks.folder_finish.as_mut() {
                guarded(entry, || finish())?;
            }
        } else {
            self.state = RunState::Dispatching(index);
            self.submit_file(full_path);
            self.barrier(index);
        }

        Ok(())
    }

    fn barrier(&mut self, index: usize) {
        self.state = RunState::Waiting(index);
        self.pool.wait();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        log::debug!("{:?} drained (generation {})", self.state, generation);
    }

    fn submit_file(&self, path: PathBuf) {
        let Some(per_file) = self.hooks.per_file.clone() else {
            return;
        };
        let contexts = Arc::clone(&self.contexts);
        let cancel = self.cancel.clone();
        let results = Arc::clone(&self.results);

        self.pool
            .submit(move || run_file_task(&path, contexts.as_ref(), &per_file, &cancel, &results));
    }

    /// 排空任务、清空扫描状态、释放钩子
    fn clean(&mut self) {
        self.pool.wait();
        self.scanner.clear();
        self.hooks = Hooks::default();
        self.state = RunState::Idle;
    }

    /// 运行结束：等待在途进度刷新，再让总进度进入终态
    fn teardown(&mut self, lines: &RunLines, ok: bool) {
        if !self.grace_delay.is_zero() {
            std::thread::sleep(self.grace_delay);
        }
        lines.close(ok);
        self.state = RunState::Done;
    }
}

/// 在驱动线程上执行扫描或文件夹钩子；错误与 panic 都中止于该条目
fn guarded<T>(entry: &QueueEntry, step: impl FnOnce() -> Result<T>) -> Result<T> {
    catch_unwind(AssertUnwindSafe(step))
        .unwrap_or_else(|p| Err(SpikeError::TaskPanicked(panic_message(p.as_ref()))))
        .map_err(|e| e.abort_at(entry.label()))
}

/// 单个文件任务：打开上下文、执行钩子、`finish`、记录结果
fn run_file_task(
    path: &Path,
    contexts: &dyn IoContextFactory,
    per_file: &FileHook,
    cancel: &CancelToken,
    results: &Mutex<BatchResult>,
) -> Result<()> {
    let display = path.display().to_string();

    let outcome = if cancel.is_cancelled() {
        Err(SpikeError::Skipped("run cancelled".to_string()))
    } else {
        contexts.open(path).and_then(|mut ctx| {
            let res = catch_unwind(AssertUnwindSafe(|| per_file(ctx.as_mut())))
                .unwrap_or_else(|p| Err(SpikeError::TaskPanicked(panic_message(p.as_ref()))));
            ctx.finish();
            res
        })
    };

    let (record, error) = match outcome {
        Ok(()) => (ProcessResult::Success(display), None),
        Err(SpikeError::Skipped(reason)) => {
            log::debug!("Skipped {}: {}", display, reason);
            (ProcessResult::Skipped(display), None)
        }
        Err(e) => {
            let reason = e.to_string();
            let error = match e {
                SpikeError::StatCollectionFailure { .. } | SpikeError::FileTaskFailure { .. } => e,
                other => SpikeError::FileTaskFailure {
                    path: display.clone(),
                    reason: other.to_string(),
                },
            };
            (ProcessResult::Failed(display, reason), Some(error))
        }
    };

    results.lock().unwrap_or_else(|e| e.into_inner()).merge(record);
    error.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::context::{IoContext, RangeReader};
    use crate::batch::strategy::{ArchiveFactory, ArchiveWriter, FileOperation};
    use crate::progress::DisplayLine;
    use std::collections::HashMap;
    use std::fs;
    use std::io::Read;
    use std::sync::atomic::AtomicUsize;

    /// 只计数的操作
    #[derive(Default)]
    struct CountingOp {
        calls: AtomicUsize,
    }

    impl FileOperation for CountingOp {
        fn process(&self, _ctx: &mut dyn IoContext, _progress: &dyn Fn(u64)) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// 固定文件列表的扫描器
    #[derive(Default)]
    struct FixedScanner {
        tree: HashMap<PathBuf, Vec<PathBuf>>,
        files: Vec<PathBuf>,
    }

    impl FixedScanner {
        fn folder(mut self, dir: &str, files: &[&str]) -> Self {
            let root = PathBuf::from(dir);
            let files = files.iter().map(|f| root.join(f)).collect();
            self.tree.insert(root, files);
            self
        }
    }

    impl Scanner for FixedScanner {
        fn scan(&mut self, folder: &Path) -> Result<()> {
            if folder.ends_with("explodes") {
                panic!("scanner exploded");
            }
            self.files = self.tree.get(folder).cloned().ok_or_else(|| SpikeError::ScanFailure {
                path: folder.display().to_string(),
                reason: "unknown folder".to_string(),
            })?;
            Ok(())
        }

        fn files(&self) -> &[PathBuf] {
            &self.files
        }

        fn clear(&mut self) {
            self.files.clear();
        }
    }

    /// 每次读取都报错的流
    struct BrokenStream;

    impl Read for BrokenStream {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "EIO"))
        }
    }

    /// 不触碰磁盘的上下文
    struct MemContext {
        path: PathBuf,
        data: std::io::Cursor<Vec<u8>>,
        finishes: Arc<AtomicUsize>,
        /// 为 true 时长度可得，但任何读取都失败
        broken: bool,
        broken_stream: BrokenStream,
    }

    impl IoContext for MemContext {
        fn full_path(&self) -> &Path {
            &self.path
        }

        fn len(&mut self) -> Result<u64> {
            Ok(self.data.get_ref().len() as u64)
        }

        fn read_range(&mut self, offset: u64, size: usize) -> Result<Vec<u8>> {
            if self.broken {
                return Err(SpikeError::FileReadError {
                    path: self.path.display().to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "EIO"),
                });
            }
            let data = self.data.get_ref();
            let start = (offset as usize).min(data.len());
            let end = (start + size).min(data.len());
            Ok(data[start..end].to_vec())
        }

        fn stream(&mut self) -> Result<&mut dyn Read> {
            if self.broken {
                return Ok(&mut self.broken_stream);
            }
            self.data.set_position(0);
            Ok(&mut self.data)
        }

        fn finish(&mut self) {
            self.finishes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct MemFactory {
        finishes: Arc<AtomicUsize>,
        /// 打开即失败的文件名
        unopenable: Vec<&'static str>,
        /// 打开成功但读取失败的文件名
        unreadable: Vec<&'static str>,
    }

    impl IoContextFactory for MemFactory {
        fn open(&self, path: &Path) -> Result<Box<dyn IoContext>> {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            if self.unopenable.contains(&name.as_str()) {
                return Err(SpikeError::FileNotFound {
                    path: path.display().to_string(),
                });
            }
            Ok(Box::new(MemContext {
                path: path.to_path_buf(),
                data: std::io::Cursor::new(path.to_string_lossy().as_bytes().to_vec()),
                finishes: Arc::clone(&self.finishes),
                broken: self.unreadable.contains(&name.as_str()),
                broken_stream: BrokenStream,
            }))
        }
    }

    fn runner_with(
        queue: Vec<QueueEntry>,
        scanner: FixedScanner,
        threads: usize,
        contexts: MemFactory,
    ) -> BatchRunner<FixedScanner> {
        BatchRunner::new(queue, scanner, WorkerPool::new(threads, threads * 50).unwrap())
            .with_contexts(Arc::new(contexts))
            .with_grace_delay(Duration::ZERO)
            .with_hardware_threads(8)
    }

    fn runner(
        queue: Vec<QueueEntry>,
        scanner: FixedScanner,
        threads: usize,
    ) -> BatchRunner<FixedScanner> {
        runner_with(queue, scanner, threads, MemFactory::default())
    }

    fn folder_bar(runner: &BatchRunner<FixedScanner>, label: &str) -> Arc<crate::progress::ProgressIndicator> {
        let channel = runner.channel();
        channel.swap();
        channel
            .read_active()
            .into_iter()
            .find_map(|l| match l {
                DisplayLine::Indicator(ind) if ind.label() == label => Some(ind),
                _ => None,
            })
            .unwrap()
    }

    fn folder(rel: &str) -> QueueEntry {
        QueueEntry::new("/d", rel, true)
    }

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{i}.bin")).collect()
    }

    #[test]
    fn test_concrete_direct_scenario() {
        let scanner = FixedScanner::default().folder("/d/photos", &["a.jpg", "b.jpg"]);
        let mut runner = runner(vec![folder("photos")], scanner, 4);
        let op = Arc::new(CountingOp::default());

        let summary = runner.process_queue(Strategy::Direct(op.clone())).unwrap();
        let total = summary.aggregate.unwrap();
        assert_eq!((total.current, total.target), (2, 2));
        assert_eq!(op.calls.load(Ordering::SeqCst), 2);
        assert_eq!(summary.result.success, 2);
        assert_eq!(runner.state(), RunState::Done);
    }

    #[test]
    fn test_direct_total_independent_of_pool_size() {
        let many = names(37);
        let many: Vec<&str> = many.iter().map(String::as_str).collect();
        for threads in [1, 2, 4, 8] {
            let scanner = FixedScanner::default()
                .folder("/d/a", &many[..20])
                .folder("/d/b", &many[20..]);
            let queue = vec![folder("a"), QueueEntry::new("/d", "single.bin", false), folder("b")];
            let mut runner = runner(queue, scanner, threads);
            let summary = runner
                .process_queue(Strategy::Direct(Arc::new(CountingOp::default())))
                .unwrap();
            let total = summary.aggregate.unwrap();
            assert_eq!(total.current, 38, "threads = {threads}");
            assert_eq!(total.target, 38);
        }
    }

    #[test]
    fn test_entries_are_barrier_ordered() {
        struct GenOp {
            generation: Arc<AtomicU64>,
            seen: Mutex<Vec<(String, u64)>>,
        }
        impl FileOperation for GenOp {
            fn process(&self, ctx: &mut dyn IoContext, _: &dyn Fn(u64)) -> Result<()> {
                let folder = ctx.full_path().parent().unwrap().display().to_string();
                let g = self.generation.load(Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(1));
                self.seen.lock().unwrap().push((folder, g));
                Ok(())
            }
        }

        let files = names(10);
        let files: Vec<&str> = files.iter().map(String::as_str).collect();
        let scanner = FixedScanner::default()
            .folder("/d/A", &files)
            .folder("/d/B", &files[..5]);
        let mut runner = runner(vec![folder("A"), folder("B")], scanner, 4);
        let op = Arc::new(GenOp {
            generation: runner.generation(),
            seen: Mutex::new(Vec::new()),
        });

        runner.process_queue(Strategy::Direct(op.clone())).unwrap();

        let seen = op.seen.lock().unwrap();
        assert_eq!(seen.len(), 15);
        for (folder, g) in seen.iter() {
            let expected = if folder.ends_with('A') { 0 } else { 1 };
            assert_eq!(*g, expected, "{folder}");
        }
    }

    #[test]
    fn test_failures_are_recorded_and_run_continues() {
        struct Flaky;
        impl FileOperation for Flaky {
            fn process(&self, ctx: &mut dyn IoContext, _: &dyn Fn(u64)) -> Result<()> {
                let name = ctx.full_path().file_name().unwrap().to_string_lossy().to_string();
                match name.as_str() {
                    "bad.bin" => Err(SpikeError::Other("corrupt".into())),
                    "boom.bin" => panic!("exploded"),
                    _ => Ok(()),
                }
            }
        }

        let scanner = FixedScanner::default().folder("/d/x", &["ok1.bin", "bad.bin", "boom.bin", "ok2.bin"]);
        let mut runner = runner(vec![folder("x")], scanner, 2);
        let summary = runner.process_queue(Strategy::Direct(Arc::new(Flaky))).unwrap();

        assert_eq!(summary.result.success, 2);
        assert_eq!(summary.result.failed, 2);
        assert!(summary
            .result
            .failures
            .iter()
            .any(|(p, e)| p.ends_with("boom.bin") && e.contains("exploded")));
    }

    #[test]
    fn test_scan_failure_aborts_run() {
        let scanner = FixedScanner::default()
            .folder("/d/a", &["1.bin"])
            .folder("/d/c", &["2.bin"]);
        let op = Arc::new(CountingOp::default());
        let mut runner = runner(vec![folder("a"), folder("missing"), folder("c")], scanner, 2);

        let err = runner.process_queue(Strategy::Direct(op.clone())).unwrap_err();
        assert!(matches!(err, SpikeError::RunAborted { ref entry, .. } if entry == "missing"));
        // 第一个条目已完成，第三个条目未开始
        assert_eq!(op.calls.load(Ordering::SeqCst), 1);
        assert_eq!(runner.state(), RunState::Done);
    }

    #[test]
    fn test_cancelled_run_skips_tasks() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let scanner = FixedScanner::default().folder("/d/a", &["1.bin"]);
        let mut runner = runner(vec![folder("a")], scanner, 2).with_cancel(cancel);
        let err = runner
            .process_queue(Strategy::Direct(Arc::new(CountingOp::default())))
            .unwrap_err();
        assert!(matches!(err, SpikeError::Cancelled));
    }

    #[test]
    fn test_cancel_mid_entry_skips_remaining() {
        struct CancelOnFirst {
            cancel: CancelToken,
        }
        impl FileOperation for CancelOnFirst {
            fn process(&self, _: &mut dyn IoContext, _: &dyn Fn(u64)) -> Result<()> {
                self.cancel.cancel();
                Ok(())
            }
        }

        let cancel = CancelToken::new();
        let files = names(6);
        let files: Vec<&str> = files.iter().map(String::as_str).collect();
        let scanner = FixedScanner::default()
            .folder("/d/a", &files)
            .folder("/d/b", &files);
        let mut runner = runner(vec![folder("a"), folder("b")], scanner, 0).with_cancel(cancel.clone());
        let err = runner
            .process_queue(Strategy::Direct(Arc::new(CancelOnFirst { cancel })))
            .unwrap_err();
        assert!(matches!(err, SpikeError::Cancelled));

        let result = runner.results();
        assert_eq!(result.success, 1);
        assert_eq!(result.skipped, 5);
    }

    /// 每个文件的条目数 = 数据长度，处理时逐字节回报
    struct ByteItems;

    impl FileOperation for ByteItems {
        fn process(&self, ctx: &mut dyn IoContext, progress: &dyn Fn(u64)) -> Result<()> {
            let len = ctx.len()?;
            for _ in 0..len {
                progress(1);
            }
            Ok(())
        }

        fn stat(&self, reader: &mut RangeReader<'_>) -> Result<Option<u64>> {
            let head = reader.read(0, 3)?;
            if head.starts_with(b"/d/") {
                Ok(Some(reader.len()?))
            } else {
                Ok(None)
            }
        }
    }

    #[test]
    fn test_two_phase_totals() {
        let scanner = FixedScanner::default()
            .folder("/d/a", &["x.pak", "yy.pak"])
            .folder("/d/b", &["z.pak"]);
        let mut runner = runner(vec![folder("a"), folder("b")], scanner, 3);
        let summary = runner.process_queue(Strategy::TwoPhase(Arc::new(ByteItems))).unwrap();

        // 每个文件的数据就是它的路径
        let expected: u64 = ["/d/a/x.pak", "/d/a/yy.pak", "/d/b/z.pak"]
            .iter()
            .map(|p| p.len() as u64)
            .sum();
        assert_eq!(summary.passes, 2);
        assert_eq!(summary.stat_total, Some(expected));
        let total = summary.aggregate.unwrap();
        assert_eq!((total.current, total.target), (expected, expected));
    }

    #[test]
    fn test_two_phase_loose_total_matches_direct_count() {
        let files = names(9);
        let files: Vec<&str> = files.iter().map(String::as_str).collect();
        let scanner = FixedScanner::default()
            .folder("/d/a", &files[..4])
            .folder("/d/b", &files[4..]);
        let mut runner = runner(vec![folder("a"), folder("b")], scanner, 4);
        let summary = runner
            .process_queue(Strategy::TwoPhase(Arc::new(CountingOp::default())))
            .unwrap();

        assert_eq!(summary.stat_total, Some(9));
        let total = summary.aggregate.unwrap();
        assert_eq!((total.current, total.target), (9, 9));
        assert_eq!(summary.result.success, 9);
    }

    /// 记录写入调用的归档
    #[derive(Default)]
    struct RecordingArchive {
        log: Arc<Mutex<Vec<String>>>,
        fail_open: bool,
        panic_open: bool,
        /// 写入该键时归档本身出错
        fail_key: Option<&'static str>,
        fail_finish: bool,
    }

    struct RecordingWriter {
        log: Arc<Mutex<Vec<String>>>,
        fail_key: Option<&'static str>,
        fail_finish: bool,
    }

    impl ArchiveWriter for RecordingWriter {
        fn send_file(&mut self, key: &str, data: &mut dyn Read) -> Result<()> {
            if self.fail_key == Some(key) {
                return Err(SpikeError::Other("sink broke".into()));
            }
            let mut buf = Vec::new();
            data.read_to_end(&mut buf)
                .map_err(|source| SpikeError::FileReadError {
                    path: key.to_string(),
                    source,
                })?;
            self.log.lock().unwrap().push(format!("send:{key}"));
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.log.lock().unwrap().push("finish".to_string());
            if self.fail_finish {
                return Err(SpikeError::Other("flush failed".into()));
            }
            Ok(())
        }
    }

    impl ArchiveFactory for RecordingArchive {
        fn open(&self, folder: &Path, stats: ScanStats) -> Result<Box<dyn ArchiveWriter>> {
            if self.fail_open {
                return Err(SpikeError::Other("disk full".into()));
            }
            if self.panic_open {
                panic!("archive backend exploded");
            }
            self.log
                .lock()
                .unwrap()
                .push(format!("open:{}:{}", folder.display(), stats.num_files));
            Ok(Box::new(RecordingWriter {
                log: Arc::clone(&self.log),
                fail_key: self.fail_key,
                fail_finish: self.fail_finish,
            }))
        }
    }

    fn aborted_source(err: SpikeError) -> SpikeError {
        match err {
            SpikeError::RunAborted { source, .. } => *source,
            other => panic!("expected RunAborted, got {other:?}"),
        }
    }

    #[test]
    fn test_pack_sends_relative_keys_then_finishes() {
        let scanner = FixedScanner::default().folder("/d/docs", &["a.txt", "sub/b.txt"]);
        let mut runner = runner(vec![folder("docs")], scanner, 4);
        let archive = Arc::new(RecordingArchive::default());

        let summary = runner.process_queue(Strategy::Pack(archive.clone())).unwrap();
        assert_eq!(summary.result.success, 2);

        let log = archive.log.lock().unwrap().clone();
        assert_eq!(log.first().map(String::as_str), Some("open:/d/docs:2"));
        assert_eq!(log.last().map(String::as_str), Some("finish"));
        let mut sends: Vec<_> = log.iter().filter(|l| l.starts_with("send:")).cloned().collect();
        sends.sort();
        assert_eq!(sends, vec!["send:a.txt", "send:sub/b.txt"]);
        assert_eq!(log.iter().filter(|l| *l == "finish").count(), 1);

        // 文件夹进度条已完成
        let bar = folder_bar(&runner, "Folder id 0");
        assert_eq!(bar.current(), 2);
        assert_eq!(bar.state(), crate::progress::IndicatorState::Finished);
    }

    #[test]
    fn test_pack_open_failure_aborts() {
        let scanner = FixedScanner::default().folder("/d/docs", &["a.txt"]);
        let mut runner = runner(vec![folder("docs")], scanner, 2);
        let archive = Arc::new(RecordingArchive {
            fail_open: true,
            ..Default::default()
        });
        let err = runner.process_queue(Strategy::Pack(archive)).unwrap_err();
        let SpikeError::RunAborted { source, .. } = err else {
            panic!("expected RunAborted");
        };
        assert!(matches!(*source, SpikeError::ArchiveFailure { .. }));
    }

    #[test]
    fn test_every_context_finished_once() {
        let files = names(12);
        let files: Vec<&str> = files.iter().map(String::as_str).collect();
        let scanner = FixedScanner::default().folder("/d/a", &files);
        let factory = Arc::new(MemFactory::default());
        let finishes = Arc::clone(&factory.finishes);
        let mut runner = BatchRunner::new(vec![folder("a")], scanner, WorkerPool::new(3, 6).unwrap())
            .with_contexts(factory)
            .with_grace_delay(Duration::ZERO);
        runner
            .process_queue(Strategy::Direct(Arc::new(CountingOp::default())))
            .unwrap();
        assert_eq!(finishes.load(Ordering::SeqCst), 12);
    }

    #[test]
    fn test_real_filesystem_run() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("photos/sub")).unwrap();
        fs::write(dir.path().join("photos/a.jpg"), b"aa").unwrap();
        fs::write(dir.path().join("photos/sub/b.jpg"), b"bbb").unwrap();
        fs::write(dir.path().join("loose.txt"), b"x").unwrap();

        let queue = vec![
            QueueEntry::from_path(&dir.path().join("photos")).unwrap(),
            QueueEntry::from_path(&dir.path().join("loose.txt")).unwrap(),
        ];
        assert!(queue[0].is_folder && !queue[1].is_folder);

        let mut runner = BatchRunner::new(queue, FileCollector::new(), WorkerPool::new(2, 100).unwrap())
            .with_grace_delay(Duration::ZERO);
        let summary = runner
            .process_queue(Strategy::Direct(Arc::new(CountingOp::default())))
            .unwrap();
        let total = summary.aggregate.unwrap();
        assert_eq!((total.current, total.target), (3, 3));
    }

    #[test]
    fn test_two_phase_unopenable_file_counted_once() {
        let scanner = FixedScanner::default().folder("/d/a", &["ok.pak", "gone.pak"]);
        let contexts = MemFactory {
            unopenable: vec!["gone.pak"],
            ..Default::default()
        };
        let mut runner = runner_with(vec![folder("a")], scanner, 2, contexts);
        let summary = runner.process_queue(Strategy::TwoPhase(Arc::new(ByteItems))).unwrap();

        let result = summary.result;
        assert_eq!((result.success, result.failed, result.skipped), (1, 1, 0));
        assert_eq!(result.total(), 2);
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.failures.len(), 1);
        assert!(result.failures[0].0.ends_with("gone.pak"));
    }

    #[test]
    fn test_two_phase_stat_failure_keeps_totals_consistent() {
        let scanner = FixedScanner::default().folder("/d/a", &["x.pak", "bad.pak", "z.pak"]);
        let contexts = MemFactory {
            unreadable: vec!["bad.pak"],
            ..Default::default()
        };
        let mut runner = runner_with(vec![folder("a")], scanner, 0, contexts);
        let summary = runner.process_queue(Strategy::TwoPhase(Arc::new(ByteItems))).unwrap();

        // 统计失败的文件计 0 条目，第二阶段不推进总进度
        let expected = ("/d/a/x.pak".len() + "/d/a/z.pak".len()) as u64;
        assert_eq!(summary.stat_total, Some(expected));
        let total = summary.aggregate.unwrap();
        assert_eq!((total.current, total.target), (expected, expected));

        let result = summary.result;
        assert_eq!((result.success, result.failed), (2, 1));
        assert_eq!(result.records.len(), 3);
        let (path, reason) = &result.failures[0];
        assert!(path.ends_with("bad.pak"));
        assert!(reason.contains("Failed to collect stats"), "{reason}");
    }

    #[test]
    fn test_pack_sink_failure_skips_rest_of_folder() {
        let scanner = FixedScanner::default().folder("/d/docs", &["a.txt", "b.txt", "c.txt"]);
        let mut runner = runner(vec![folder("docs")], scanner, 0);
        let archive = Arc::new(RecordingArchive {
            fail_key: Some("b.txt"),
            ..Default::default()
        });

        let err = runner.process_queue(Strategy::Pack(archive.clone())).unwrap_err();
        assert!(matches!(aborted_source(err), SpikeError::ArchiveFailure { .. }));

        let result = runner.results();
        assert_eq!((result.success, result.failed, result.skipped), (1, 1, 1));
        let log = archive.log.lock().unwrap().clone();
        assert_eq!(log, vec!["open:/d/docs:3", "send:a.txt", "finish"]);
        let bar = folder_bar(&runner, "Folder id 0");
        assert_eq!(bar.state(), crate::progress::IndicatorState::Failed);
    }

    #[test]
    fn test_pack_finish_failure_aborts() {
        let scanner = FixedScanner::default()
            .folder("/d/docs", &["a.txt", "b.txt"])
            .folder("/d/more", &["c.txt"]);
        let mut runner = runner(vec![folder("docs"), folder("more")], scanner, 2);
        let archive = Arc::new(RecordingArchive {
            fail_finish: true,
            ..Default::default()
        });

        let err = runner.process_queue(Strategy::Pack(archive.clone())).unwrap_err();
        match aborted_source(err) {
            SpikeError::ArchiveFailure { reason, .. } => assert!(reason.contains("flush failed")),
            other => panic!("expected ArchiveFailure, got {other:?}"),
        }
        assert_eq!(runner.results().success, 2);
        // 第二个文件夹未打开
        let log = archive.log.lock().unwrap().clone();
        assert!(!log.iter().any(|l| l.starts_with("open:/d/more")));
        let bar = folder_bar(&runner, "Folder id 0");
        assert_eq!(bar.state(), crate::progress::IndicatorState::Failed);
    }

    #[test]
    fn test_pack_unreadable_file_fails_alone() {
        let scanner = FixedScanner::default().folder("/d/docs", &["a.txt", "bad.txt", "c.txt"]);
        let contexts = MemFactory {
            unreadable: vec!["bad.txt"],
            ..Default::default()
        };
        let mut runner = runner_with(vec![folder("docs")], scanner, 2, contexts);
        let archive = Arc::new(RecordingArchive::default());

        let summary = runner.process_queue(Strategy::Pack(archive.clone())).unwrap();
        assert_eq!((summary.result.success, summary.result.failed), (2, 1));
        assert!(summary.result.failures[0].0.ends_with("bad.txt"));

        let log = archive.log.lock().unwrap().clone();
        assert_eq!(log.iter().filter(|l| *l == "finish").count(), 1);
        let bar = folder_bar(&runner, "Folder id 0");
        assert_eq!(bar.state(), crate::progress::IndicatorState::Finished);
    }

    #[test]
    fn test_panicking_folder_hook_aborts_run() {
        let scanner = FixedScanner::default()
            .folder("/d/docs", &["a.txt"])
            .folder("/d/more", &["b.txt"]);
        let mut runner = runner(vec![folder("docs"), folder("more")], scanner, 2);
        let archive = Arc::new(RecordingArchive {
            panic_open: true,
            ..Default::default()
        });

        let err = runner.process_queue(Strategy::Pack(archive)).unwrap_err();
        assert!(matches!(err, SpikeError::RunAborted { ref entry, .. } if entry == "docs"));
        match aborted_source(err) {
            SpikeError::TaskPanicked(msg) => assert!(msg.contains("archive backend exploded")),
            other => panic!("expected TaskPanicked, got {other:?}"),
        }
        assert_eq!(runner.results().total(), 0);
        assert_eq!(runner.state(), RunState::Done);
    }

    #[test]
    fn test_panicking_scanner_aborts_run() {
        let scanner = FixedScanner::default().folder("/d/a", &["1.bin"]);
        let op = Arc::new(CountingOp::default());
        let mut runner = runner(vec![folder("a"), folder("explodes")], scanner, 2);

        let err = runner.process_queue(Strategy::Direct(op.clone())).unwrap_err();
        assert!(matches!(
            aborted_source(err),
            SpikeError::TaskPanicked(ref msg) if msg.contains("scanner exploded")
        ));
        assert_eq!(op.calls.load(Ordering::SeqCst), 1);
        assert_eq!(runner.state(), RunState::Done);
    }

    #[test]
    fn test_absorb_failures_keeps_one_record_per_path() {
        let mut earlier = BatchResult::default();
        earlier.merge(ProcessResult::Failed("/d/a".into(), "stat".into()));
        earlier.merge(ProcessResult::Failed("/d/b".into(), "stat".into()));
        earlier.merge(ProcessResult::Failed("/d/c".into(), "stat".into()));
        earlier.merge(ProcessResult::Success("/d/d".into()));

        let mut later = BatchResult::default();
        later.merge(ProcessResult::Failed("/d/a".into(), "open".into()));
        later.merge(ProcessResult::Success("/d/b".into()));
        later.merge(ProcessResult::Success("/d/d".into()));

        later.absorb_failures(earlier);
        assert_eq!((later.success, later.failed, later.skipped), (1, 3, 0));
        assert_eq!(later.records.len(), 4);
        let reasons: HashMap<_, _> = later.failures.iter().cloned().collect();
        assert_eq!(reasons["/d/a"], "open");
        assert_eq!(reasons["/d/b"], "stat");
        assert_eq!(reasons["/d/c"], "stat");
    }
}
