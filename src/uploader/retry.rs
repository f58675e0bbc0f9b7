// 重试策略
//
// 只对可重试的失败（网络错误、HTTP 非 2xx、应用层失败）做有界重试；
// 超时与取消对本次调用是终态：超时重试只会叠加已经很昂贵的等待，
// 是否整体重发一次由调度器决定。

use crate::processor::UploadErrorKind;
use crate::uploader::outcome::TransferOutcome;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// 默认最大重试次数
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// 默认初始退避延迟（毫秒）
pub const DEFAULT_BASE_BACKOFF_MS: u64 = 500;

/// 最大退避延迟（毫秒）
const MAX_BACKOFF_MS: u64 = 30_000;

/// 计算指数退避延迟
///
/// 第 k 次尝试（从 1 计数，k >= 2）前等待 `base * 2^(k-2)` 毫秒：
/// 第一次重试等 base，第二次等 2×base，以此类推，封顶 30s。
///
/// # 延迟序列（base=500）
/// - 尝试 2: 500ms
/// - 尝试 3: 1000ms
/// - 尝试 4: 2000ms
pub fn calculate_backoff_delay(base_backoff_ms: u64, attempt: u32) -> u64 {
    debug_assert!(attempt >= 2);
    let exp = attempt.saturating_sub(2).min(16);
    let delay = base_backoff_ms.saturating_mul(1u64 << exp);
    delay.min(MAX_BACKOFF_MS)
}

/// 重试策略
///
/// 包装单个分片的一次完整派发：最多 `max_retries + 1` 次尝试，
/// 尝试之间插入指数退避。耗尽重试后原样返回最后一次的失败结果，
/// 绝不吞掉错误。
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 最大重试次数（0 表示只尝试一次）
    pub max_retries: u32,
    /// 初始退避延迟（毫秒）
    pub base_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            base_backoff_ms,
        }
    }

    /// 执行一次带重试的派发
    ///
    /// # 参数
    /// * `attempt` - 产生单次尝试的闭包，入参为尝试序号（从 1 开始）
    ///
    /// # 返回
    /// 第一次成功的结果，或不可重试/重试耗尽时的最后一次失败结果
    pub async fn execute<F, Fut>(&self, mut attempt: F) -> TransferOutcome
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = TransferOutcome>,
    {
        let mut attempt_no = 1u32;

        loop {
            let outcome = attempt(attempt_no).await;

            if outcome.success {
                if attempt_no > 1 {
                    debug!(
                        "[分片#{}] 第 {} 次尝试成功",
                        outcome.chunk_index, attempt_no
                    );
                }
                return outcome;
            }

            let kind = outcome
                .error_kind
                .clone()
                .unwrap_or(UploadErrorKind::Unknown);

            // 不可重试的失败立即返回（超时/取消/配置错误/未知）
            if !kind.is_retriable() {
                debug!(
                    "[分片#{}] 失败不可重试 ({}): {:?}",
                    outcome.chunk_index, kind, outcome.error
                );
                return outcome;
            }

            // 重试耗尽，原样返回最后一次失败
            if attempt_no > self.max_retries {
                warn!(
                    "[分片#{}] 已达最大重试次数 ({}), 放弃: {:?}",
                    outcome.chunk_index, self.max_retries, outcome.error
                );
                return outcome;
            }

            let backoff_ms = calculate_backoff_delay(self.base_backoff_ms, attempt_no + 1);
            warn!(
                "[分片#{}] 上传失败，等待 {}ms 后重试 ({}/{}): {:?}",
                outcome.chunk_index, backoff_ms, attempt_no, self.max_retries, outcome.error
            );
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;

            attempt_no += 1;
        }
    }
}
