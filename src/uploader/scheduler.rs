// 上传调度器
//
// 一个调度器、两种派发纪律：
// - 顺序纪律：按索引严格逐个派发，首个重试耗尽的分片立即中止任务
//   （快速失败：对顺序通道而言不完整的前缀没有价值）
// - 并发纪律：按 max_concurrency 分批，批内并发、批间串行，
//   单个分片失败不中止任务（分片在服务端是独立可处理单元，
//   部分成功仍有可用产出）
//
// 分片状态机：Pending -> InFlight -> {Succeeded | Retrying -> InFlight | Failed}
//
// 并发纪律只保证批次顺序，批内完成顺序不做任何承诺。
// max_concurrency 是唯一的背压旋钮：分片之间不共享可变状态，
// 除进度聚合器的短临界区锁外不需要其他同步。

use crate::processor::{ChunkRequest, ChunkTransport, UploadErrorKind, UploadMetadata, WireFormat};
use crate::uploader::chunk::{UploadChunk, UploadSource, DEFAULT_CHUNK_SIZE};
use crate::uploader::outcome::{combine, JobResult, TransferOutcome};
use crate::uploader::progress::{ProgressAggregator, ProgressCallback};
use crate::uploader::retry::{RetryPolicy, DEFAULT_BASE_BACKOFF_MS, DEFAULT_MAX_RETRIES};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 默认最大并发分片数
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// 调度纪律
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discipline {
    /// 顺序派发，快速失败
    Sequential,
    /// 分批并发派发，容忍部分失败
    Parallel {
        /// 批内最大并发分片数
        max_concurrency: usize,
    },
}

/// 分片超时策略
///
/// 大分片按比例获得更多时间（并设下限），避免单个超大分片
/// 吃掉整个任务的时钟预算。
#[derive(Debug, Clone)]
pub enum TimeoutPolicy {
    /// 固定超时（毫秒）
    Fixed(u64),
    /// 按分片大小缩放
    Scaled {
        /// 每 MB 分配的毫秒数
        ms_per_mb: u64,
        /// 超时下限（毫秒）
        floor_ms: u64,
    },
}

impl TimeoutPolicy {
    /// 计算指定大小分片的超时时间
    pub fn timeout_for(&self, chunk_bytes: u64) -> Duration {
        let ms = match self {
            TimeoutPolicy::Fixed(ms) => *ms,
            TimeoutPolicy::Scaled { ms_per_mb, floor_ms } => {
                let mb = chunk_bytes.div_ceil(1024 * 1024);
                (mb * ms_per_mb).max(*floor_ms)
            }
        };
        Duration::from_millis(ms)
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        // 5MB 分片约 60s，下限 30s
        TimeoutPolicy::Scaled {
            ms_per_mb: 12_000,
            floor_ms: 30_000,
        }
    }
}

/// 任务配置
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// 分片大小（字节）
    pub chunk_size_bytes: u64,
    /// 并发纪律下批内最大并发分片数
    pub max_concurrency: usize,
    /// 每个分片的最大重试次数
    pub max_retries: u32,
    /// 初始退避延迟（毫秒）
    pub base_backoff_ms: u64,
    /// 分片超时策略
    pub chunk_timeout: TimeoutPolicy,
    /// 调度纪律；None 时按载荷大小自动选择
    pub discipline: Option<Discipline>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff_ms: DEFAULT_BASE_BACKOFF_MS,
            chunk_timeout: TimeoutPolicy::default(),
            discipline: None,
        }
    }
}

impl JobConfig {
    /// 校验配置
    ///
    /// 配置错误是致命的：在任何 I/O 之前抛出，永不重试。
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size_bytes == 0 {
            anyhow::bail!("配置错误: 分片大小必须大于 0");
        }
        if self.max_concurrency == 0 {
            anyhow::bail!("配置错误: 最大并发数必须不小于 1");
        }
        Ok(())
    }
}

/// 上传调度器
///
/// 只依赖 ChunkTransport 接口（依赖注入），自身不持有跨任务状态：
/// 每次 run 创建独立的进度聚合器，结束即丢弃。
pub struct UploadScheduler {
    /// 传输实现
    transport: Arc<dyn ChunkTransport>,
    /// 重试策略
    retry: RetryPolicy,
    /// 分片超时策略
    timeout: TimeoutPolicy,
    /// 取消令牌
    cancel: CancellationToken,
    /// 进度回调（每个分片终态后调用一次）
    on_progress: Option<ProgressCallback>,
}

impl UploadScheduler {
    /// 创建新的调度器
    pub fn new(transport: Arc<dyn ChunkTransport>, config: &JobConfig) -> Self {
        Self {
            transport,
            retry: RetryPolicy::new(config.max_retries, config.base_backoff_ms),
            timeout: config.chunk_timeout.clone(),
            cancel: CancellationToken::new(),
            on_progress: None,
        }
    }

    /// 使用外部取消令牌
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// 注册进度回调
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// 执行整个分片序列的上传
    ///
    /// # 参数
    /// * `source` - 上传数据源
    /// * `metadata` - 任务元数据
    /// * `chunks` - 规划好的分片序列
    /// * `discipline` - 调度纪律
    pub async fn run(
        &self,
        source: &UploadSource,
        metadata: Arc<UploadMetadata>,
        chunks: Vec<UploadChunk>,
        discipline: Discipline,
    ) -> JobResult {
        let planned = chunks.len();
        let aggregator = ProgressAggregator::new(planned);

        info!(
            "开始调度上传: 分片数={}, 纪律={:?}",
            planned, discipline
        );

        let outcomes = match &discipline {
            Discipline::Sequential => {
                self.run_sequential(source, &metadata, chunks, &aggregator)
                    .await
            }
            Discipline::Parallel { max_concurrency } => {
                self.run_parallel(source, &metadata, chunks, *max_concurrency, &aggregator)
                    .await
            }
        };

        let result = combine(outcomes, &discipline, planned);

        info!(
            "调度结束: success={}, {}/{} 成功, {} 失败",
            result.success, result.chunks_succeeded, planned, result.chunks_failed
        );

        result
    }

    /// 顺序纪律：严格按索引逐个派发，快速失败
    ///
    /// 分片 k+1 绝不会在分片 k 到达终态前派发。
    async fn run_sequential(
        &self,
        source: &UploadSource,
        metadata: &Arc<UploadMetadata>,
        chunks: Vec<UploadChunk>,
        aggregator: &ProgressAggregator,
    ) -> Vec<TransferOutcome> {
        let mut outcomes = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            if self.cancel.is_cancelled() {
                info!("任务已取消，停止派发 (分片 #{} 之前)", chunk.index);
                break;
            }

            let outcome = self
                .dispatch_chunk(source, &chunk, metadata, WireFormat::Form, aggregator)
                .await;
            let failed = !outcome.success;
            outcomes.push(outcome);

            if failed {
                // 快速失败：顺序通道的不完整前缀没有价值
                warn!("分片失败，顺序任务立即中止");
                break;
            }
        }

        outcomes
    }

    /// 并发纪律：按 max_concurrency 分批，批内并发，批间串行
    ///
    /// 整批到达终态后才推进下一批，因此任意时刻在途分片数
    /// 不超过 max_concurrency。
    async fn run_parallel(
        &self,
        source: &UploadSource,
        metadata: &Arc<UploadMetadata>,
        chunks: Vec<UploadChunk>,
        max_concurrency: usize,
        aggregator: &ProgressAggregator,
    ) -> Vec<TransferOutcome> {
        let mut outcomes = Vec::with_capacity(chunks.len());
        let batch_size = max_concurrency.max(1);

        for (batch_no, batch) in chunks.chunks(batch_size).enumerate() {
            if self.cancel.is_cancelled() {
                info!("任务已取消，停止派发 (批次 {} 之前)", batch_no);
                break;
            }

            debug!(
                "派发批次 {}: 分片 #{}..#{}",
                batch_no,
                batch[0].index,
                batch[batch.len() - 1].index
            );

            let dispatches = batch.iter().map(|chunk| {
                self.dispatch_chunk(source, chunk, metadata, WireFormat::Parallel, aggregator)
            });
            let batch_outcomes = futures::future::join_all(dispatches).await;
            outcomes.extend(batch_outcomes);
        }

        outcomes
    }

    /// 派发单个分片：读取数据、带重试传输、记录进度
    ///
    /// 重试策略把超时视为本次调用的终态；这里在超时后把整个派发
    /// 重发恰好一次（Retrying -> InFlight），第二次超时即为最终失败。
    async fn dispatch_chunk(
        &self,
        source: &UploadSource,
        chunk: &UploadChunk,
        metadata: &Arc<UploadMetadata>,
        wire: WireFormat,
        aggregator: &ProgressAggregator,
    ) -> TransferOutcome {
        aggregator.chunk_dispatched();

        let outcome = match source.read_chunk(chunk).await {
            Ok(data) => {
                let deadline = self.timeout.timeout_for(chunk.size());
                let mut outcome = self
                    .transfer_with_retry(chunk, data.clone(), metadata, wire, deadline)
                    .await;

                if outcome.is_timeout() && !self.cancel.is_cancelled() {
                    warn!("[分片#{}] 派发超时，整体重发一次", chunk.index);
                    outcome = self
                        .transfer_with_retry(chunk, data, metadata, wire, deadline)
                        .await;
                }

                outcome
            }
            Err(e) => TransferOutcome::failure(
                chunk.index,
                UploadErrorKind::Unknown,
                format!("读取分片数据失败: {}", e),
                None,
                None,
            ),
        };

        if outcome.success {
            debug!("[分片#{}] ✓ 上传成功", chunk.index);
        } else {
            warn!(
                "[分片#{}] 上传失败 (终态): {:?}",
                chunk.index, outcome.error
            );
        }

        let progress = aggregator.on_outcome(&outcome, chunk.size());
        if let Some(callback) = &self.on_progress {
            callback(progress);
        }

        outcome
    }

    /// 带重试的单次完整传输
    async fn transfer_with_retry(
        &self,
        chunk: &UploadChunk,
        data: Vec<u8>,
        metadata: &Arc<UploadMetadata>,
        wire: WireFormat,
        deadline: Duration,
    ) -> TransferOutcome {
        let chunk_id = Uuid::new_v4().to_string();

        self.retry
            .execute(|_attempt| {
                let request = ChunkRequest {
                    chunk: chunk.clone(),
                    data: data.clone(),
                    chunk_id: chunk_id.clone(),
                    metadata: metadata.clone(),
                    wire,
                };
                self.transport.send(request, deadline, &self.cancel)
            })
            .await
    }
}
