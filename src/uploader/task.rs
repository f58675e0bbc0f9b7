// 上传任务定义

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 上传任务状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadJobStatus {
    /// 等待中
    Pending,
    /// 上传中
    Uploading,
    /// 已完成
    Completed,
    /// 失败
    Failed,
    /// 已取消
    Cancelled,
}

/// 上传任务
///
/// 记录单个任务从创建到终态的生命周期。任务结束后由服务层丢弃，
/// 不跨任务保留状态。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadJob {
    /// 任务ID
    pub id: String,
    /// 源文件名
    pub file_name: String,
    /// 源数据总大小
    pub total_size: u64,
    /// 已成功上传大小
    pub uploaded_size: u64,
    /// 任务状态
    pub status: UploadJobStatus,
    /// 上传速度 (bytes/s)
    pub speed: u64,
    /// 创建时间 (Unix timestamp)
    pub created_at: i64,
    /// 开始时间 (Unix timestamp)
    pub started_at: Option<i64>,
    /// 完成时间 (Unix timestamp)
    pub completed_at: Option<i64>,
    /// 错误信息
    pub error: Option<String>,

    // === 分片信息字段 ===
    /// 总分片数
    #[serde(default)]
    pub total_chunks: usize,
    /// 已到达终态的分片数
    #[serde(default)]
    pub completed_chunks: usize,
}

impl UploadJob {
    /// 创建新的上传任务
    pub fn new(file_name: String, total_size: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            file_name,
            total_size,
            uploaded_size: 0,
            status: UploadJobStatus::Pending,
            speed: 0,
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
            completed_at: None,
            error: None,
            total_chunks: 0,
            completed_chunks: 0,
        }
    }

    /// 计算进度百分比
    pub fn progress(&self) -> f64 {
        if self.total_size == 0 {
            return 0.0;
        }
        (self.uploaded_size as f64 / self.total_size as f64) * 100.0
    }

    /// 估算剩余时间 (秒)
    pub fn eta(&self) -> Option<u64> {
        if self.speed == 0 || self.uploaded_size >= self.total_size {
            return None;
        }
        let remaining = self.total_size - self.uploaded_size;
        Some(remaining / self.speed)
    }

    /// 标记为上传中
    pub fn mark_uploading(&mut self) {
        self.status = UploadJobStatus::Uploading;
        if self.started_at.is_none() {
            self.started_at = Some(chrono::Utc::now().timestamp());
        }
    }

    /// 标记为已完成
    pub fn mark_completed(&mut self) {
        self.status = UploadJobStatus::Completed;
        self.completed_at = Some(chrono::Utc::now().timestamp());
    }

    /// 标记为失败
    pub fn mark_failed(&mut self, error: String) {
        self.status = UploadJobStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(chrono::Utc::now().timestamp());
    }

    /// 标记为已取消
    pub fn mark_cancelled(&mut self) {
        self.status = UploadJobStatus::Cancelled;
        self.completed_at = Some(chrono::Utc::now().timestamp());
    }

    /// 是否到达终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            UploadJobStatus::Completed | UploadJobStatus::Failed | UploadJobStatus::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_creation() {
        let job = UploadJob::new("clip.mp4".to_string(), 1024 * 1024);

        assert_eq!(job.status, UploadJobStatus::Pending);
        assert_eq!(job.uploaded_size, 0);
        assert_eq!(job.progress(), 0.0);
        assert!(!job.is_terminal());
        assert!(!job.id.is_empty());
    }

    #[test]
    fn test_progress_calculation() {
        let mut job = UploadJob::new("clip.mp4".to_string(), 1000);

        job.uploaded_size = 250;
        assert_eq!(job.progress(), 25.0);

        job.uploaded_size = 1000;
        assert_eq!(job.progress(), 100.0);
    }

    #[test]
    fn test_eta_calculation() {
        let mut job = UploadJob::new("clip.mp4".to_string(), 1000);

        job.uploaded_size = 200;
        job.speed = 100; // 100 bytes/s
        assert_eq!(job.eta(), Some(8)); // (1000 - 200) / 100 = 8s

        job.speed = 0;
        assert_eq!(job.eta(), None); // 速度为0，无法估算
    }

    #[test]
    fn test_status_transitions() {
        let mut job = UploadJob::new("clip.mp4".to_string(), 1000);

        job.mark_uploading();
        assert_eq!(job.status, UploadJobStatus::Uploading);
        assert!(job.started_at.is_some());
        assert!(!job.is_terminal());

        job.mark_failed("网络错误".to_string());
        assert_eq!(job.status, UploadJobStatus::Failed);
        assert_eq!(job.error, Some("网络错误".to_string()));
        assert!(job.is_terminal());

        job.mark_completed();
        assert_eq!(job.status, UploadJobStatus::Completed);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_cancelled_is_terminal() {
        let mut job = UploadJob::new("clip.mp4".to_string(), 1000);
        job.mark_uploading();
        job.mark_cancelled();
        assert_eq!(job.status, UploadJobStatus::Cancelled);
        assert!(job.is_terminal());
    }
}
