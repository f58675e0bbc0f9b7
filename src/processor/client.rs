// 处理服务客户端
//
// 调度器只依赖 ChunkTransport 接口，不依赖具体 HTTP 实现，
// 重试策略和调度纪律因此与传输层解耦。
//
// 每次 send 恰好发出一个带分片二进制数据的 multipart 请求，
// 携带调用方提供的项目元数据。两种线格式对应两条上传通道：
// - Form: 顺序通道，逐字段平铺元数据
// - Parallel: 并发通道，元数据整体编码为 projectData JSON
//
// 取消与超时都是协作式的：send 永不超过 deadline 挂起，
// 到期后放弃在途请求并返回 Timeout 终态，绝不静默吞掉。

use crate::processor::types::{FormUploadResponse, UploadErrorKind, UploadMetadata};
use crate::uploader::chunk::UploadChunk;
use crate::uploader::outcome::TransferOutcome;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 线格式：分片与元数据在 multipart 体中的编码方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// 顺序通道：元数据逐字段平铺（chunkIndex/totalChunks/chunkData/...）
    Form,
    /// 并发通道：元数据整体编码为 projectData（chunk/chunkId/isLastChunk/...）
    Parallel,
}

/// 单个分片的传输请求
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    /// 分片信息
    pub chunk: UploadChunk,
    /// 分片数据
    pub data: Vec<u8>,
    /// 分片唯一 ID（并发通道要求）
    pub chunk_id: String,
    /// 任务元数据
    pub metadata: Arc<UploadMetadata>,
    /// 线格式
    pub wire: WireFormat,
}

/// 可取消的分片传输接口
///
/// 实现者必须把所有失败编码进 TransferOutcome 返回，
/// 不通过 Err 传播，每个分片必然产生一个终态结果。
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    /// 发送一个分片
    ///
    /// # 参数
    /// * `req` - 传输请求
    /// * `deadline` - 本次请求的超时时间
    /// * `cancel` - 任务级取消令牌（协作式观察）
    async fn send(
        &self,
        req: ChunkRequest,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> TransferOutcome;
}

/// 处理服务 HTTP 客户端
#[derive(Debug, Clone)]
pub struct ProcessorClient {
    client: reqwest::Client,
    base_url: String,
}

impl ProcessorClient {
    /// 创建新的处理服务客户端
    ///
    /// # 参数
    /// * `base_url` - 处理服务根地址（如 "https://api.example.com"）
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        info!("初始化处理服务客户端: base_url={}", base_url);

        // 整体超时由每次请求的 deadline 控制，这里只限制建连时间
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, base_url })
    }

    /// 顺序通道上传地址
    pub fn form_endpoint(&self) -> String {
        format!("{}/api/upload/chunk", self.base_url)
    }

    /// 并发通道上传地址
    pub fn parallel_endpoint(&self) -> String {
        format!("{}/api/upload/chunk-parallel", self.base_url)
    }

    /// 构建 multipart 请求体
    fn build_form(req: &ChunkRequest) -> Result<multipart::Form> {
        let meta = &req.metadata;
        let chunk = &req.chunk;

        let part = multipart::Part::bytes(req.data.clone())
            .file_name(meta.file_name.clone())
            .mime_str("application/octet-stream")?;

        let form = match req.wire {
            WireFormat::Form => multipart::Form::new()
                .text("chunkIndex", chunk.index.to_string())
                .text("totalChunks", chunk.total_chunks.to_string())
                .part("chunkData", part)
                .text("fileName", meta.file_name.clone())
                .text("projectId", meta.project_id.clone())
                .text("projectName", meta.project_name.clone())
                .text("description", meta.description.clone())
                .text("sourceType", meta.source_type.clone())
                .text(
                    "targetPlatforms",
                    serde_json::to_string(&meta.target_platforms)?,
                )
                .text("aiPrompt", meta.ai_prompt.clone())
                .text(
                    "processingOptions",
                    serde_json::to_string(&meta.processing_options)?,
                )
                .text("numClips", meta.num_clips.to_string()),
            WireFormat::Parallel => multipart::Form::new()
                .part("chunk", part)
                .text("chunkId", req.chunk_id.clone())
                .text("chunkIndex", chunk.index.to_string())
                .text("totalChunks", chunk.total_chunks.to_string())
                .text("isLastChunk", chunk.is_last.to_string())
                .text("projectData", serde_json::to_string(meta.as_ref())?),
        };

        Ok(form)
    }

    /// 发出请求并解析响应（不含超时/取消控制）
    async fn send_once(&self, req: &ChunkRequest, started: Instant) -> TransferOutcome {
        let index = req.chunk.index;
        let url = match req.wire {
            WireFormat::Form => self.form_endpoint(),
            WireFormat::Parallel => self.parallel_endpoint(),
        };

        debug!(
            "上传分片: index={}/{}, size={} bytes, wire={:?}, url={}",
            index,
            req.chunk.total_chunks,
            req.data.len(),
            req.wire,
            url
        );

        let form = match Self::build_form(req) {
            Ok(f) => f,
            Err(e) => {
                error!("[分片#{}] 构建请求体失败: {}", index, e);
                return TransferOutcome::failure(
                    index,
                    UploadErrorKind::Unknown,
                    format!("构建请求体失败: {}", e),
                    None,
                    Some(started.elapsed().as_millis() as u64),
                );
            }
        };

        let response = match self.client.post(&url).multipart(form).send().await {
            Ok(r) => r,
            Err(e) => {
                let kind = classify_transport_error(&e);
                warn!("[分片#{}] 请求发送失败 ({}): {}", index, kind, e);
                return TransferOutcome::failure(
                    index,
                    kind,
                    format!("请求发送失败: {}", e),
                    None,
                    Some(started.elapsed().as_millis() as u64),
                );
            }
        };

        let status = response.status();
        let latency_ms = started.elapsed().as_millis() as u64;
        let body = response.text().await.unwrap_or_default();

        debug!(
            "分片响应: index={}, status={}, latency={}ms",
            index, status, latency_ms
        );

        // HTTP 层失败：尽量从响应体提取错误消息
        if !status.is_success() {
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| {
                    v.get("error")
                        .or_else(|| v.get("message"))
                        .and_then(|s| s.as_str().map(String::from))
                })
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

            warn!("[分片#{}] HTTP 错误: status={}, {}", index, status, message);
            return TransferOutcome::failure(
                index,
                UploadErrorKind::from_status(status.as_u16()),
                message,
                Some(status.as_u16()),
                Some(latency_ms),
            );
        }

        match req.wire {
            WireFormat::Form => {
                // 顺序通道响应有固定结构，HTTP 200 但 success=false 是应用层失败
                let payload: serde_json::Value = match serde_json::from_str(&body) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("[分片#{}] 解析响应失败: {}", index, e);
                        return TransferOutcome::failure(
                            index,
                            UploadErrorKind::Application,
                            format!("解析响应失败: {}", e),
                            Some(status.as_u16()),
                            Some(latency_ms),
                        );
                    }
                };

                let parsed: FormUploadResponse =
                    serde_json::from_value(payload.clone()).unwrap_or_default();

                if !parsed.is_success() {
                    warn!(
                        "[分片#{}] 应用层失败: {}",
                        index,
                        parsed.error_message()
                    );
                    return TransferOutcome::failure(
                        index,
                        UploadErrorKind::Application,
                        parsed.error_message(),
                        Some(status.as_u16()),
                        Some(latency_ms),
                    );
                }

                TransferOutcome::success(index, status.as_u16(), latency_ms, Some(payload))
            }
            WireFormat::Parallel => {
                // 并发通道响应是任意处理结果对象，原样保留；2xx 即成功
                let payload = serde_json::from_str::<serde_json::Value>(&body).ok();
                TransferOutcome::success(index, status.as_u16(), latency_ms, payload)
            }
        }
    }
}

#[async_trait]
impl ChunkTransport for ProcessorClient {
    async fn send(
        &self,
        req: ChunkRequest,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> TransferOutcome {
        let index = req.chunk.index;

        // 已取消的任务不再发起请求
        if cancel.is_cancelled() {
            return TransferOutcome::failure(
                index,
                UploadErrorKind::Cancelled,
                "上传已取消",
                None,
                None,
            );
        }

        let started = Instant::now();

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("[分片#{}] 在途请求被取消", index);
                TransferOutcome::failure(
                    index,
                    UploadErrorKind::Cancelled,
                    "上传已取消",
                    None,
                    Some(started.elapsed().as_millis() as u64),
                )
            }
            result = tokio::time::timeout(deadline, self.send_once(&req, started)) => {
                match result {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        // 超时：在途请求随 future 丢弃而中止，定时器一并清理
                        warn!(
                            "[分片#{}] 请求超时 ({}ms)，放弃在途请求",
                            index,
                            deadline.as_millis()
                        );
                        TransferOutcome::failure(
                            index,
                            UploadErrorKind::Timeout,
                            format!("请求超时 ({}ms)", deadline.as_millis()),
                            None,
                            Some(deadline.as_millis() as u64),
                        )
                    }
                }
            }
        }
    }
}

/// 传输层错误分类
///
/// 无法归类的传输失败一律按网络错误处理（可重试）。
fn classify_transport_error(error: &reqwest::Error) -> UploadErrorKind {
    if error.is_timeout() {
        UploadErrorKind::Timeout
    } else {
        UploadErrorKind::Network
    }
}
