// 上传进度聚合
//
// 从分片终态事件流中派生整体进度：完成百分比、吞吐量、预计剩余时间。
// 全部是派生值，随算随丢，不持久化。
//
// on_outcome 在每个分片终态后的热路径上同步调用，只做加法和除法，
// 锁内不做任何 I/O，不会阻塞也不会 panic。

use crate::uploader::outcome::TransferOutcome;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// 进度回调
pub type ProgressCallback = Arc<dyn Fn(JobProgress) + Send + Sync>;

/// 任务进度快照
///
/// - `uploaded` 为成功分片数
/// - `completed` 为终态分片数（成功 + 失败），百分比按它计算，
///   保证整个任务期间单调不减
#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    /// 总分片数
    pub total_chunks: usize,
    /// 成功的分片数
    pub uploaded: usize,
    /// 正在传输的分片数
    pub in_flight: usize,
    /// 到达终态的分片数（成功 + 失败）
    pub completed: usize,
    /// 失败的分片数
    pub failed: usize,
    /// 最近到达终态的分片索引
    pub current_chunk_index: Option<usize>,
    /// 整体完成百分比 [0, 100]
    pub overall_percent: f64,
    /// 预计剩余时间（秒），无法估算时为 0
    pub eta_seconds: f64,
    /// 吞吐量 (MB/s)，按成功上传的字节数计算
    pub throughput_mbps: f64,
}

struct AggregatorInner {
    total_chunks: usize,
    uploaded: usize,
    failed: usize,
    in_flight: usize,
    succeeded_bytes: u64,
    current_chunk_index: Option<usize>,
    started_at: Instant,
}

/// 进度聚合器
pub struct ProgressAggregator {
    inner: Mutex<AggregatorInner>,
}

impl ProgressAggregator {
    /// 创建新的聚合器
    ///
    /// # 参数
    /// * `total_chunks` - 规划的总分片数
    pub fn new(total_chunks: usize) -> Self {
        Self {
            inner: Mutex::new(AggregatorInner {
                total_chunks,
                uploaded: 0,
                failed: 0,
                in_flight: 0,
                succeeded_bytes: 0,
                current_chunk_index: None,
                started_at: Instant::now(),
            }),
        }
    }

    /// 记录分片开始传输
    pub fn chunk_dispatched(&self) {
        let mut inner = self.inner.lock();
        inner.in_flight += 1;
    }

    /// 记录分片终态并返回最新进度
    ///
    /// # 参数
    /// * `outcome` - 分片终态
    /// * `chunk_bytes` - 该分片的大小（字节）
    pub fn on_outcome(&self, outcome: &TransferOutcome, chunk_bytes: u64) -> JobProgress {
        let mut inner = self.inner.lock();

        inner.in_flight = inner.in_flight.saturating_sub(1);
        if outcome.success {
            inner.uploaded += 1;
            inner.succeeded_bytes += chunk_bytes;
        } else {
            inner.failed += 1;
        }
        inner.current_chunk_index = Some(outcome.chunk_index);

        Self::derive(&inner)
    }

    /// 当前进度快照
    pub fn snapshot(&self) -> JobProgress {
        let inner = self.inner.lock();
        Self::derive(&inner)
    }

    fn derive(inner: &AggregatorInner) -> JobProgress {
        let completed = inner.uploaded + inner.failed;
        let elapsed_secs = inner.started_at.elapsed().as_secs_f64().max(1e-6);

        let overall_percent = if inner.total_chunks == 0 {
            0.0
        } else {
            100.0 * completed as f64 / inner.total_chunks as f64
        };

        let throughput_mbps = inner.succeeded_bytes as f64 / elapsed_secs / 1_000_000.0;

        // 完成数为 0 时速率未知，不做估算
        let eta_seconds = if completed == 0 {
            0.0
        } else {
            let completed_per_sec = (completed as f64 / elapsed_secs).max(1e-6);
            (inner.total_chunks - completed.min(inner.total_chunks)) as f64 / completed_per_sec
        };

        JobProgress {
            total_chunks: inner.total_chunks,
            uploaded: inner.uploaded,
            in_flight: inner.in_flight,
            completed,
            failed: inner.failed,
            current_chunk_index: inner.current_chunk_index,
            overall_percent,
            eta_seconds,
            throughput_mbps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::UploadErrorKind;

    fn ok(index: usize) -> TransferOutcome {
        TransferOutcome::success(index, 200, 10, None)
    }

    fn fail(index: usize) -> TransferOutcome {
        TransferOutcome::failure(index, UploadErrorKind::Http, "HTTP 500", Some(500), None)
    }

    #[test]
    fn test_initial_snapshot() {
        let agg = ProgressAggregator::new(5);
        let p = agg.snapshot();
        assert_eq!(p.total_chunks, 5);
        assert_eq!(p.completed, 0);
        assert_eq!(p.overall_percent, 0.0);
        assert_eq!(p.eta_seconds, 0.0);
        assert!(p.current_chunk_index.is_none());
    }

    #[test]
    fn test_percent_monotonic_under_mixed_outcomes() {
        let agg = ProgressAggregator::new(6);
        let outcomes = [ok(0), fail(1), ok(2), ok(3), fail(4), ok(5)];

        let mut last_percent = 0.0;
        for o in &outcomes {
            let p = agg.on_outcome(o, 1024);
            assert!(
                p.overall_percent >= last_percent,
                "百分比必须单调不减: {} -> {}",
                last_percent,
                p.overall_percent
            );
            last_percent = p.overall_percent;
        }
        assert_eq!(last_percent, 100.0);
    }

    #[test]
    fn test_counters_split_success_and_failure() {
        let agg = ProgressAggregator::new(4);
        agg.on_outcome(&ok(0), 100);
        agg.on_outcome(&fail(1), 100);
        let p = agg.on_outcome(&ok(2), 100);

        assert_eq!(p.uploaded, 2);
        assert_eq!(p.failed, 1);
        assert_eq!(p.completed, 3);
        assert_eq!(p.overall_percent, 75.0);
        assert_eq!(p.current_chunk_index, Some(2));
    }

    #[test]
    fn test_in_flight_tracking() {
        let agg = ProgressAggregator::new(3);
        agg.chunk_dispatched();
        agg.chunk_dispatched();
        assert_eq!(agg.snapshot().in_flight, 2);

        let p = agg.on_outcome(&ok(0), 100);
        assert_eq!(p.in_flight, 1);

        let p = agg.on_outcome(&ok(1), 100);
        assert_eq!(p.in_flight, 0);

        // 下溢保护
        let p = agg.on_outcome(&ok(2), 100);
        assert_eq!(p.in_flight, 0);
    }

    #[test]
    fn test_throughput_counts_succeeded_bytes_only() {
        let agg = ProgressAggregator::new(2);
        let p = agg.on_outcome(&ok(0), 5 * 1024 * 1024);
        assert!(p.throughput_mbps > 0.0);

        // 失败分片不产生吞吐
        let agg = ProgressAggregator::new(2);
        let p = agg.on_outcome(&fail(0), 5 * 1024 * 1024);
        assert_eq!(p.throughput_mbps, 0.0);
    }

    #[test]
    fn test_eta_decreases_to_zero() {
        let agg = ProgressAggregator::new(3);
        let p1 = agg.on_outcome(&ok(0), 100);
        assert!(p1.eta_seconds >= 0.0);

        agg.on_outcome(&ok(1), 100);
        let p3 = agg.on_outcome(&ok(2), 100);
        // 全部完成后剩余时间为 0
        assert_eq!(p3.eta_seconds, 0.0);
    }

    #[test]
    fn test_zero_total_chunks_no_panic() {
        let agg = ProgressAggregator::new(0);
        let p = agg.snapshot();
        assert_eq!(p.overall_percent, 0.0);
    }
}
