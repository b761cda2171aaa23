//! # 批处理公共流程
//!
//! `checksum` 与 `pack` 共用：构建配置、队列与线程池，
//! 启动渲染线程，在当前线程驱动 `BatchRunner`，结束后输出汇总与报告。
//! 取消令牌由 `main.rs` 的 Ctrl-C 处理器触发。
//!
//! ## 依赖关系
//! - 使用 `config.rs` 构建运行配置
//! - 使用 `batch/` 执行队列
//! - 使用 `utils/progress.rs` 渲染进度
//! - 使用 `tabled` 输出汇总表，`csv` 写出报告

use crate::batch::{BatchResult, BatchRunner, CancelToken, RunSummary, Strategy};
use crate::cli::batch::BatchArgs;
use crate::config::{build_queue, RunConfig};
use crate::error::{Result, SpikeError};
use crate::progress::DisplayLine;
use crate::utils::output;
use crate::utils::progress::ProgressRenderer;

use std::path::Path;
use std::sync::Arc;
use tabled::{Table, Tabled};

/// 汇总中显示的失败条数
pub const MAX_LISTED_FAILURES: usize = 10;

#[derive(Debug, Clone, Tabled)]
struct SummaryRow {
    #[tabled(rename = "Item")]
    item: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

/// 执行一次批处理运行
pub fn execute_batch(
    args: &BatchArgs,
    strategy: Strategy,
    cancel: &CancelToken,
) -> Result<RunSummary> {
    let config = RunConfig::from_args(args)?;
    let queue = build_queue(args)?;
    let strategy_name = strategy.name();

    output::print_info(&format!(
        "Queued {} entries for {} ({} threads, queue capacity {})",
        queue.len(),
        strategy_name,
        config.threads,
        config.queue_capacity()
    ));

    let entries = queue.len();
    let mut runner = BatchRunner::new(queue, config.build_scanner()?, config.build_pool()?)
        .with_cancel(cancel.clone())
        .with_grace_delay(config.grace_delay);
    let channel = runner.channel();
    let title = DisplayLine::text(format!("spikebatch {}: {} entries", strategy_name, entries));
    channel.append(title.clone());
    channel.insert(
        DisplayLine::text("Ctrl-C stops after running tasks finish"),
        Some(&title),
    );
    // 非终端（重定向、管道）时不绘制进度条
    let visible = config.show_progress && console::Term::stderr().is_term();
    let render = ProgressRenderer::new(Arc::clone(&channel), visible).spawn(config.frame_interval);

    let outcome = runner.process_queue(strategy);

    render.stop();
    channel.clean();

    let result = match &outcome {
        Ok(summary) => summary.result.clone(),
        Err(_) => runner.results(),
    };
    let task_failures = runner.close();
    log::debug!("{} task failure(s) caught at the pool boundary", task_failures);
    if let Err(e) = &outcome {
        log::error!("{} run stopped: {}", strategy_name, e);
        print_failures(&result);
    }

    let report = args
        .report
        .as_deref()
        .map(|path| write_report(path, &result).map(|_| path));
    let summary = outcome?;

    if let Some(report) = report {
        let path = report?;
        output::print_success(&format!("Report written to '{}'", path.display()));
    }
    Ok(summary)
}

/// 打印汇总表与前几条失败
pub fn print_summary(summary: &RunSummary) {
    let result = &summary.result;
    let mut rows = vec![
        SummaryRow {
            item: "Strategy",
            value: summary.strategy.to_string(),
        },
        SummaryRow {
            item: "Entries",
            value: summary.entries.to_string(),
        },
        SummaryRow {
            item: "Passes",
            value: summary.passes.to_string(),
        },
        SummaryRow {
            item: "Files",
            value: result.total().to_string(),
        },
        SummaryRow {
            item: "Succeeded",
            value: result.success.to_string(),
        },
        SummaryRow {
            item: "Skipped",
            value: result.skipped.to_string(),
        },
        SummaryRow {
            item: "Failed",
            value: result.failed.to_string(),
        },
    ];
    if let Some(total) = &summary.aggregate {
        rows.push(SummaryRow {
            item: "Progress",
            value: match total.ratio() {
                Some(ratio) => format!("{}/{} ({:.0}%)", total.current, total.target, ratio * 100.0),
                None => format!("{}/{}", total.current, total.target),
            },
        });
    }
    if let Some(stat_total) = summary.stat_total {
        rows.push(SummaryRow {
            item: "Stat items",
            value: stat_total.to_string(),
        });
    }
    rows.push(SummaryRow {
        item: "Elapsed",
        value: format!("{:.2?}", summary.elapsed),
    });

    output::print_header("Run summary");
    eprintln!("{}", Table::new(&rows));
    print_failures(result);
}

fn print_failures(result: &BatchResult) {
    if result.failures.is_empty() {
        return;
    }
    output::print_warning(&format!(
        "{} file(s) failed (showing {})",
        result.failed,
        result.failures.len().min(MAX_LISTED_FAILURES)
    ));
    for (path, reason) in result.failures.iter().take(MAX_LISTED_FAILURES) {
        output::print_error(&format!("{}: {}", path, reason.replace('\n', " ")));
    }
}

/// 写出逐文件 CSV 报告（path,status,error）
pub fn write_report(path: &Path, result: &BatchResult) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    for record in &result.records {
        wtr.serialize(record)?;
    }
    wtr.flush().map_err(|e| SpikeError::FileWriteError {
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::runner::ProcessResult;
    use crate::cli::batch::BatchArgs;
    use crate::ops::ChecksumOperation;
    use clap::Parser;
    use std::fs;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        batch: BatchArgs,
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        let mut result = BatchResult::default();
        result.merge(ProcessResult::Success("a.txt".into()));
        result.merge(ProcessResult::Failed("b.txt".into(), "corrupt".into()));

        write_report(&path, &result).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "path,status,error\na.txt,ok,\nb.txt,failed,corrupt\n");
    }

    #[test]
    fn test_execute_batch_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        fs::create_dir_all(data.join("nested")).unwrap();
        fs::write(data.join("one.txt"), b"1").unwrap();
        fs::write(data.join("nested/two.txt"), b"2").unwrap();
        fs::write(data.join("skip.log"), b"x").unwrap();
        let report = dir.path().join("report.csv");

        let args = Harness::parse_from([
            "spikebatch",
            "--no-progress",
            "-j",
            "2",
            "-p",
            "*.txt",
            "--report",
            report.to_str().unwrap(),
            data.to_str().unwrap(),
        ])
        .batch;

        let op = Arc::new(ChecksumOperation::new());
        let summary = execute_batch(&args, Strategy::Direct(op.clone()), &CancelToken::new()).unwrap();
        assert_eq!(summary.result.success, 2);
        assert_eq!(summary.result.total(), 2);
        assert_eq!(op.take_sorted().len(), 2);

        let text = fs::read_to_string(&report).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(!text.contains("skip.log"));
    }

    #[test]
    fn test_cancelled_token_stops_run() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("one.txt"), b"1").unwrap();

        let args = Harness::parse_from(["spikebatch", "--no-progress", data.to_str().unwrap()]).batch;
        let cancel = CancelToken::new();
        cancel.cancel();

        let op = Arc::new(ChecksumOperation::new());
        let err = execute_batch(&args, Strategy::Direct(op.clone()), &cancel).unwrap_err();
        assert!(matches!(err, SpikeError::Cancelled));
        assert!(op.take_sorted().is_empty());
    }
}
