// 上传服务
//
// 进程启动时显式构造一次、按引用传递给调用方的服务值，
// 不存在模块级可变单例。持有传输实现与默认配置，管理活跃任务的
// 取消令牌。任务到达终态后注册项即移除，流水线不跨任务保留状态。

use crate::processor::{ChunkTransport, ProcessorClient, UploadMetadata};
use crate::uploader::chunk::{ChunkPlan, UploadSource};
use crate::uploader::outcome::JobResult;
use crate::uploader::progress::{JobProgress, ProgressCallback};
use crate::uploader::scheduler::{JobConfig, UploadScheduler};
use crate::uploader::task::UploadJob;
use crate::uploader::pick_discipline;
use anyhow::{Context, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 活跃任务注册项
struct ActiveJob {
    /// 任务记录
    job: Arc<Mutex<UploadJob>>,
    /// 取消令牌
    cancel: CancellationToken,
}

/// 上传服务
///
/// 调度器通过注入的 ChunkTransport 接口工作，默认注入 HTTP 实现。
#[derive(Clone)]
pub struct UploadManager {
    /// 传输实现
    transport: Arc<dyn ChunkTransport>,
    /// 默认任务配置
    default_config: JobConfig,
    /// 活跃任务列表（job_id -> ActiveJob）
    jobs: Arc<DashMap<String, Arc<ActiveJob>>>,
    /// 外部进度回调
    on_progress: Option<ProgressCallback>,
}

impl UploadManager {
    /// 创建新的上传服务
    ///
    /// # 参数
    /// * `transport` - 传输实现（注入接口，便于测试替换）
    /// * `default_config` - 默认任务配置
    pub fn new(transport: Arc<dyn ChunkTransport>, default_config: JobConfig) -> Result<Self> {
        default_config.validate()?;

        info!(
            "创建上传服务: 分片大小={} bytes, 并发数={}, 重试次数={}",
            default_config.chunk_size_bytes,
            default_config.max_concurrency,
            default_config.max_retries
        );

        Ok(Self {
            transport,
            default_config,
            jobs: Arc::new(DashMap::new()),
            on_progress: None,
        })
    }

    /// 创建带 HTTP 传输的上传服务
    ///
    /// # 参数
    /// * `base_url` - 处理服务根地址
    /// * `default_config` - 默认任务配置
    pub fn with_http_transport(
        base_url: impl Into<String>,
        default_config: JobConfig,
    ) -> Result<Self> {
        let client = ProcessorClient::new(base_url).context("创建处理服务客户端失败")?;
        Self::new(Arc::new(client), default_config)
    }

    /// 注册外部进度回调（每个分片终态后调用一次）
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// 执行一次完整上传
    ///
    /// 规划分片 -> 调度派发 -> 合并结果。配置错误在任何 I/O 之前
    /// 返回 Err；传输层的一切失败都编码在 JobResult 里。
    ///
    /// # 参数
    /// * `source` - 上传数据源
    /// * `metadata` - 任务元数据
    /// * `config` - 本次任务的配置（None 时使用服务默认配置）
    pub async fn upload(
        &self,
        source: UploadSource,
        metadata: UploadMetadata,
        config: Option<JobConfig>,
    ) -> Result<JobResult> {
        let config = config.unwrap_or_else(|| self.default_config.clone());
        config.validate()?;

        let total_size = source.size().await?;
        let mut plan = ChunkPlan::new(total_size, config.chunk_size_bytes)?;
        let chunks = plan.chunks();
        let total_chunks = plan.chunk_count();

        let discipline = config
            .discipline
            .clone()
            .unwrap_or_else(|| pick_discipline(total_size, config.max_concurrency));

        // 注册任务
        let mut job = UploadJob::new(metadata.file_name.clone(), total_size);
        job.total_chunks = total_chunks;
        job.mark_uploading();
        let job_id = job.id.clone();

        let cancel = CancellationToken::new();
        let active = Arc::new(ActiveJob {
            job: Arc::new(Mutex::new(job)),
            cancel: cancel.clone(),
        });
        self.jobs.insert(job_id.clone(), active.clone());

        info!(
            "上传任务 {} 开始: file={}, size={} bytes, 分片数={}, 纪律={:?}",
            job_id, metadata.file_name, total_size, total_chunks, discipline
        );

        // 进度回调：刷新任务记录，再透传给外部回调
        let chunk_size = config.chunk_size_bytes;
        let job_ref = active.job.clone();
        let external = self.on_progress.clone();
        let callback: ProgressCallback = Arc::new(move |progress: JobProgress| {
            {
                let mut j = job_ref.lock();
                j.completed_chunks = progress.completed;
                // 按整分片折算，最后一个分片的尾差在终态时校正
                j.uploaded_size =
                    (progress.uploaded as u64 * chunk_size).min(j.total_size);
                j.speed = (progress.throughput_mbps * 1_000_000.0) as u64;
            }
            if let Some(cb) = &external {
                cb(progress);
            }
        });

        let scheduler = UploadScheduler::new(self.transport.clone(), &config)
            .with_cancel_token(cancel.clone())
            .with_progress_callback(callback);

        let result = scheduler
            .run(&source, Arc::new(metadata), chunks, discipline)
            .await;

        // 把分片终态记回计划，得到精确的成功字节数
        for outcome in &result.per_chunk_results {
            if outcome.success {
                plan.mark_completed(outcome.chunk_index);
            } else {
                plan.mark_failed(outcome.chunk_index);
            }
        }

        // 记录终态并注销任务
        {
            let mut j = active.job.lock();
            j.uploaded_size = plan.uploaded_bytes();
            if cancel.is_cancelled() {
                j.mark_cancelled();
                warn!("上传任务 {} 已取消", job_id);
            } else if result.success {
                j.mark_completed();
                info!("上传任务 {} 完成: {}", job_id, result.message);
            } else {
                j.mark_failed(result.message.clone());
                warn!("上传任务 {} 失败: {}", job_id, result.message);
            }
        }
        self.jobs.remove(&job_id);

        Ok(result)
    }

    /// 取消任务
    ///
    /// 取消是协作式的：在途请求观察到令牌后尽快退出，
    /// 已完成的分片不回滚。
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.jobs.get(job_id) {
            Some(active) => {
                active.cancel.cancel();
                info!("上传任务 {} 取消信号已发送", job_id);
                true
            }
            None => false,
        }
    }

    /// 查询活跃任务
    pub fn get_job(&self, job_id: &str) -> Option<UploadJob> {
        self.jobs.get(job_id).map(|active| active.job.lock().clone())
    }

    /// 活跃任务数量
    pub fn active_job_count(&self) -> usize {
        self.jobs.len()
    }

    /// 活跃任务 ID 列表
    pub fn active_job_ids(&self) -> Vec<String> {
        self.jobs.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{ChunkRequest, UploadErrorKind};
    use crate::uploader::outcome::TransferOutcome;
    use crate::uploader::scheduler::Discipline;
    use std::time::Duration;

    /// 模拟传输：可配置固定失败的分片索引，并在取消时尽快退出
    struct MockTransport {
        fail_indices: Vec<usize>,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl ChunkTransport for MockTransport {
        async fn send(
            &self,
            req: ChunkRequest,
            _deadline: Duration,
            cancel: &CancellationToken,
        ) -> TransferOutcome {
            let index = req.chunk.index;

            tokio::select! {
                _ = cancel.cancelled() => {
                    return TransferOutcome::failure(
                        index,
                        UploadErrorKind::Cancelled,
                        "上传已取消",
                        None,
                        None,
                    );
                }
                _ = tokio::time::sleep(self.delay) => {}
            }

            if self.fail_indices.contains(&index) {
                TransferOutcome::failure(index, UploadErrorKind::Http, "HTTP 500", Some(500), None)
            } else {
                TransferOutcome::success(index, 200, 5, None)
            }
        }
    }

    fn manager(fail_indices: Vec<usize>, delay: Duration) -> UploadManager {
        let transport = Arc::new(MockTransport {
            fail_indices,
            delay,
        });
        let config = JobConfig {
            chunk_size_bytes: 100,
            max_retries: 0,
            base_backoff_ms: 10,
            ..JobConfig::default()
        };
        UploadManager::new(transport, config).unwrap()
    }

    fn sample_metadata() -> UploadMetadata {
        UploadMetadata {
            project_id: "proj-1".to_string(),
            project_name: "demo".to_string(),
            file_name: "clip.mp4".to_string(),
            description: String::new(),
            source_type: "upload".to_string(),
            target_platforms: vec![],
            ai_prompt: String::new(),
            processing_options: serde_json::json!({}),
            num_clips: 3,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_success_and_registry_cleanup() {
        let mgr = manager(vec![], Duration::from_millis(5));
        let source = UploadSource::Memory(Arc::new(vec![0u8; 450]));

        let result = mgr.upload(source, sample_metadata(), None).await.unwrap();

        assert!(result.success);
        assert_eq!(result.chunks_succeeded, 5);
        // 任务结束后注册表清空
        assert_eq!(mgr.active_job_count(), 0);
    }

    #[tokio::test]
    async fn test_upload_rejects_invalid_config() {
        let mgr = manager(vec![], Duration::from_millis(1));
        let source = UploadSource::Memory(Arc::new(vec![0u8; 100]));

        let bad = JobConfig {
            chunk_size_bytes: 0,
            ..JobConfig::default()
        };
        // 配置错误在任何 I/O 之前返回 Err
        let err = mgr
            .upload(source, sample_metadata(), Some(bad))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("配置错误"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_partial_failure_surfaced() {
        let mgr = manager(vec![1], Duration::from_millis(5));
        let source = UploadSource::Memory(Arc::new(vec![0u8; 500]));

        let config = JobConfig {
            chunk_size_bytes: 100,
            max_retries: 0,
            discipline: Some(Discipline::Parallel { max_concurrency: 4 }),
            ..JobConfig::default()
        };
        let result = mgr
            .upload(source, sample_metadata(), Some(config))
            .await
            .unwrap();

        // 少数分片失败：任务降级成功，失败明细保留
        assert!(result.success);
        assert_eq!(result.chunks_failed, 1);
        assert!(!result.per_chunk_results[1].success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_active_job() {
        // 慢传输给取消留出窗口
        let mgr = manager(vec![], Duration::from_secs(3600));
        let source = UploadSource::Memory(Arc::new(vec![0u8; 300]));

        let mgr2 = mgr.clone();
        let handle =
            tokio::spawn(async move { mgr2.upload(source, sample_metadata(), None).await });

        // 等待任务注册
        loop {
            tokio::task::yield_now().await;
            if mgr.active_job_count() > 0 {
                break;
            }
        }

        let ids = mgr.active_job_ids();
        assert_eq!(ids.len(), 1);

        // 运行中可以查询任务记录
        let job = mgr.get_job(&ids[0]).unwrap();
        assert_eq!(job.status, crate::uploader::task::UploadJobStatus::Uploading);
        assert_eq!(job.total_chunks, 3);

        assert!(mgr.cancel(&ids[0]));

        let result = handle.await.unwrap().unwrap();
        assert!(!result.success);
        assert_eq!(mgr.active_job_count(), 0);

        // 未注册的任务取消返回 false
        assert!(!mgr.cancel("nonexistent"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_callback_forwarded() {
        let seen = Arc::new(Mutex::new(Vec::<JobProgress>::new()));
        let s = seen.clone();

        let transport = Arc::new(MockTransport {
            fail_indices: vec![],
            delay: Duration::from_millis(5),
        });
        let config = JobConfig {
            chunk_size_bytes: 100,
            ..JobConfig::default()
        };
        let mgr = UploadManager::new(transport, config)
            .unwrap()
            .with_progress_callback(Arc::new(move |p| s.lock().push(p)));

        let source = UploadSource::Memory(Arc::new(vec![0u8; 300]));
        let result = mgr.upload(source, sample_metadata(), None).await.unwrap();

        assert!(result.success);
        let snapshots = seen.lock();
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots.last().unwrap().overall_percent, 100.0);
    }

    #[tokio::test]
    async fn test_with_http_transport_construction() {
        let config = JobConfig::default();
        let mgr = UploadManager::with_http_transport("http://localhost:3000", config).unwrap();
        assert_eq!(mgr.active_job_count(), 0);
    }
}
