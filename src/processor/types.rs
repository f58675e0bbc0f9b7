// 处理服务API数据类型

use serde::{Deserialize, Serialize};

/// 表单上传接口响应（顺序通道，一次一个分片）
///
/// 响应示例:
/// ```json
/// {
///   "success": true,
///   "processingStarted": true,
///   "nextStep": "analysis",
///   "message": "chunk accepted"
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormUploadResponse {
    /// 应用层是否成功（HTTP 200 但 success=false 视为失败）
    #[serde(default)]
    pub success: bool,

    /// 服务端是否已启动处理流水线
    #[serde(default)]
    pub processing_started: bool,

    /// 下一步骤提示（服务端状态机）
    #[serde(default)]
    pub next_step: String,

    /// 人类可读消息
    #[serde(default)]
    pub message: String,

    /// 错误信息（仅失败时存在）
    #[serde(default)]
    pub error: Option<String>,
}

impl FormUploadResponse {
    /// 是否成功
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// 提取错误消息（优先 error 字段，其次 message）
    pub fn error_message(&self) -> String {
        match &self.error {
            Some(e) if !e.is_empty() => e.clone(),
            _ => self.message.clone(),
        }
    }
}

/// 上传任务元数据
///
/// 随每个分片一同提交给处理服务，服务端用它初始化处理项目。
/// 两种通道的字段编码方式不同（见 client 模块），内容一致。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    /// 项目 ID
    pub project_id: String,
    /// 项目名称
    pub project_name: String,
    /// 源文件名
    pub file_name: String,
    /// 项目描述
    #[serde(default)]
    pub description: String,
    /// 素材来源类型（如 "upload" / "recording"）
    pub source_type: String,
    /// 目标平台列表（JSON 数组编码后提交）
    #[serde(default)]
    pub target_platforms: Vec<String>,
    /// AI 处理提示词
    #[serde(default)]
    pub ai_prompt: String,
    /// 处理选项（透传给服务端的 JSON 对象）
    #[serde(default)]
    pub processing_options: serde_json::Value,
    /// 期望生成的切片数量
    #[serde(default = "default_num_clips")]
    pub num_clips: u32,
}

fn default_num_clips() -> u32 {
    3
}

/// 上传错误类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadErrorKind {
    /// 网络错误（可重试）
    Network,
    /// 超时（本次调用内不再重试，由调度器决定是否整体重发一次）
    Timeout,
    /// HTTP 非 2xx 响应（可重试）
    Http,
    /// 应用层失败：HTTP 2xx 但响应体声明失败（可重试）
    Application,
    /// 已取消（不可重试）
    Cancelled,
    /// 配置错误（致命，提交前抛出，永不重试）
    InvalidConfig,
    /// 未知错误
    Unknown,
}

impl UploadErrorKind {
    /// 是否可在重试循环内重试
    ///
    /// 超时被视为本次调用的终态：重试只会叠加已经很昂贵的等待，
    /// 是否整体重发由调度器单独决定。
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            UploadErrorKind::Network | UploadErrorKind::Http | UploadErrorKind::Application
        )
    }

    /// 从 HTTP 状态码转换
    pub fn from_status(status: u16) -> Self {
        if (200..300).contains(&status) {
            UploadErrorKind::Unknown // 2xx 不是错误
        } else {
            UploadErrorKind::Http
        }
    }
}

impl std::fmt::Display for UploadErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadErrorKind::Network => write!(f, "网络错误"),
            UploadErrorKind::Timeout => write!(f, "请求超时"),
            UploadErrorKind::Http => write!(f, "HTTP错误"),
            UploadErrorKind::Application => write!(f, "应用层失败"),
            UploadErrorKind::Cancelled => write!(f, "已取消"),
            UploadErrorKind::InvalidConfig => write!(f, "配置错误"),
            UploadErrorKind::Unknown => write!(f, "未知错误"),
        }
    }
}
