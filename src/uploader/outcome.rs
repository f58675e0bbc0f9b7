// 分片上传结果与任务级汇总
//
// 每个分片到达终态后产生一条 TransferOutcome；ResultCombiner 把
// 全部终态合并成 JobResult。合并是纯函数，与调度纪律产生结果的
// 先后顺序无关。

use crate::processor::UploadErrorKind;
use crate::uploader::scheduler::Discipline;
use serde::{Deserialize, Serialize};

/// 单个分片的终态结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferOutcome {
    /// 分片索引
    pub chunk_index: usize,
    /// 是否成功
    pub success: bool,
    /// HTTP 状态码（请求未发出时为 None）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    /// 请求耗时（毫秒）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// 错误信息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 错误分类（重试策略据此判断是否可重试）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<UploadErrorKind>,
    /// 服务端返回的处理结果（原样保留，供调用方诊断）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_payload: Option<serde_json::Value>,
}

impl TransferOutcome {
    /// 成功结果
    pub fn success(
        chunk_index: usize,
        http_status: u16,
        latency_ms: u64,
        server_payload: Option<serde_json::Value>,
    ) -> Self {
        Self {
            chunk_index,
            success: true,
            http_status: Some(http_status),
            latency_ms: Some(latency_ms),
            error: None,
            error_kind: None,
            server_payload,
        }
    }

    /// 失败结果
    pub fn failure(
        chunk_index: usize,
        kind: UploadErrorKind,
        error: impl Into<String>,
        http_status: Option<u16>,
        latency_ms: Option<u64>,
    ) -> Self {
        Self {
            chunk_index,
            success: false,
            http_status,
            latency_ms,
            error: Some(error.into()),
            error_kind: Some(kind),
            server_payload: None,
        }
    }

    /// 是否超时结果
    pub fn is_timeout(&self) -> bool {
        self.error_kind == Some(UploadErrorKind::Timeout)
    }

    /// 是否取消结果
    pub fn is_cancelled(&self) -> bool {
        self.error_kind == Some(UploadErrorKind::Cancelled)
    }
}

/// 任务级汇总结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    /// 任务整体是否成功
    pub success: bool,
    /// 人类可读的汇总信息
    pub message: String,
    /// 实际派发过的分片数
    pub chunks_attempted: usize,
    /// 成功的分片数
    pub chunks_succeeded: usize,
    /// 失败的分片数
    pub chunks_failed: usize,
    /// 各分片终态，按索引升序
    pub per_chunk_results: Vec<TransferOutcome>,
}

/// 合并分片终态为任务级结果
///
/// 纯函数。无论并发纪律以什么顺序产出结果，`per_chunk_results`
/// 都按分片索引升序排列。
///
/// 任务级成败判定：
/// - 顺序纪律：所有规划分片都被派发且全部成功才算成功
///   （快速失败产生的前缀结果必然判定为失败）
/// - 并发纪律：失败分片数 * 2 > 规划分片数（即严格超过半数失败）
///   才判定为失败；恰好半数失败仍算（降级的）成功，部分结果
///   保留给调用方而不是丢弃
pub fn combine(
    mut outcomes: Vec<TransferOutcome>,
    discipline: &Discipline,
    planned_chunks: usize,
) -> JobResult {
    outcomes.sort_by_key(|o| o.chunk_index);

    let chunks_attempted = outcomes.len();
    let chunks_succeeded = outcomes.iter().filter(|o| o.success).count();
    let chunks_failed = chunks_attempted - chunks_succeeded;

    let (success, message) = match discipline {
        Discipline::Sequential => {
            if chunks_failed == 0 && chunks_attempted == planned_chunks {
                (
                    true,
                    format!("{}/{} 个分片上传成功", chunks_succeeded, planned_chunks),
                )
            } else {
                let first_failed = outcomes.iter().find(|o| !o.success);
                let detail = first_failed
                    .and_then(|o| o.error.clone())
                    .unwrap_or_else(|| "任务未完成".to_string());
                let index = first_failed.map(|o| o.chunk_index).unwrap_or(0);
                (false, format!("分片 #{} 上传失败，任务中止: {}", index, detail))
            }
        }
        Discipline::Parallel { .. } => {
            if chunks_failed * 2 > planned_chunks {
                (
                    false,
                    format!(
                        "{}/{} 个分片上传失败，超过半数，任务判定失败",
                        chunks_failed, planned_chunks
                    ),
                )
            } else {
                (
                    true,
                    format!("{}/{} 个分片上传成功", chunks_succeeded, planned_chunks),
                )
            }
        }
    };

    JobResult {
        success,
        message,
        chunks_attempted,
        chunks_succeeded,
        chunks_failed,
        per_chunk_results: outcomes,
    }
}
