//! # 工作线程池
//!
//! 固定容量的线程池，接收闭包任务并提供屏障式 `wait`。
//!
//! ## 功能
//! - 基于 rayon 线程池，线程在启动时获取不透明的 [`WorkerId`]
//! - 容量为 0 时退化为同步内联执行
//! - 排队任务数受 `queue_capacity` 限制，超过时 `submit` 阻塞（不丢弃）
//! - `wait` 是屏障而非关闭，返回后线程池仍可继续使用
//! - 任务失败或 panic 在任务边界捕获、记录，不会阻塞 `wait`
//!
//! ## 依赖关系
//! - 被 `batch/runner.rs` 使用
//! - 使用 `rayon` 管理线程

use crate::error::{Result, SpikeError};

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

static NEXT_WORKER: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static WORKER_ID: WorkerId = WorkerId(NEXT_WORKER.fetch_add(1, Ordering::Relaxed));
}

/// 线程身份令牌，每个线程首次访问时分配一次
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(usize);

impl WorkerId {
    /// 当前线程的令牌
    pub fn current() -> Self {
        WORKER_ID.with(|id| *id)
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: usize) -> Self {
        WorkerId(usize::MAX / 2 + raw)
    }
}

/// 计数 + 条件变量
#[derive(Debug, Default)]
struct Gauge {
    count: Mutex<usize>,
    changed: Condvar,
}

impl Gauge {
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn decrement(&self) {
        let mut count = self.lock();
        *count = count.saturating_sub(1);
        self.changed.notify_all();
    }

    /// 阻塞直到 `pred(count)` 不成立
    fn wait_while(&self, pred: impl Fn(usize) -> bool) -> MutexGuard<'_, usize> {
        let guard = self.lock();
        self.changed
            .wait_while(guard, |count| pred(*count))
            .unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Default)]
struct Shared {
    /// 已提交未完成的任务
    pending: Gauge,
    /// 存活的工作线程
    live: Gauge,
    failures: AtomicUsize,
}

impl Shared {
    fn run_guarded<F>(&self, task: F)
    where
        F: FnOnce() -> Result<()>,
    {
        match catch_unwind(AssertUnwindSafe(task)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                log::error!("{}", e);
            }
            Err(payload) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                log::error!("Task panicked: {}", panic_message(payload.as_ref()));
            }
        }
    }
}

/// 提取 panic 负载中的文本
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// 工作线程池
pub struct WorkerPool {
    /// None 表示内联模式
    pool: Option<rayon::ThreadPool>,
    shared: Arc<Shared>,
    threads: usize,
    queue_capacity: usize,
}

impl WorkerPool {
    /// 创建线程池；`threads == 0` 时内联执行
    pub fn new(threads: usize, queue_capacity: usize) -> Result<Self> {
        let shared = Arc::new(Shared::default());

        if threads == 0 {
            return Ok(Self {
                pool: None,
                shared,
                threads,
                queue_capacity,
            });
        }

        *shared.live.lock() = threads;
        let exit_shared = Arc::clone(&shared);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("spike-worker-{}", i))
            .start_handler(|i| {
                let id = WorkerId::current();
                log::debug!("worker {} started as {:?}", i, id);
            })
            .exit_handler(move |_| exit_shared.live.decrement())
            .panic_handler(|payload| {
                log::error!("Worker panicked: {}", panic_message(payload.as_ref()));
            })
            .build()
            .map_err(|e| SpikeError::Other(format!("Failed to build worker pool: {}", e)))?;

        Ok(Self {
            pool: Some(pool),
            shared,
            threads,
            queue_capacity: queue_capacity.max(1),
        })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn is_inline(&self) -> bool {
        self.pool.is_none()
    }

    /// 排队上限
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// 在任务边界捕获的失败次数
    pub fn failures(&self) -> usize {
        self.shared.failures.load(Ordering::Relaxed)
    }

    /// 提交任务；排队已满时阻塞
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let Some(pool) = &self.pool else {
            self.shared.run_guarded(task);
            return;
        };

        {
            let capacity = self.queue_capacity;
            let mut pending = self.shared.pending.wait_while(|count| count >= capacity);
            *pending += 1;
        }

        let shared = Arc::clone(&self.shared);
        pool.spawn(move || {
            shared.run_guarded(task);
            shared.pending.decrement();
        });
    }

    /// 屏障：阻塞直到之前提交的任务全部完成
    pub fn wait(&self) {
        if self.pool.is_none() {
            return;
        }
        drop(self.shared.pending.wait_while(|count| count > 0));
    }

    /// 排空并回收全部工作线程
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(pool) = self.pool.take() {
            drop(self.shared.pending.wait_while(|count| count > 0));
            drop(pool);
            drop(self.shared.live.wait_while(|count| count > 0));
            log::debug!("worker pool closed ({} threads)", self.threads);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
