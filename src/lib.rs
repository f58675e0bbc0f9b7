// Media Upload Pipeline Rust Library
// 大体积媒体素材分片上传流水线核心库

// 配置管理模块
pub mod config;

// 日志系统模块
pub mod logging;

// 处理服务接口模块
pub mod processor;

// 上传流水线模块
pub mod uploader;

// 导出常用类型
pub use config::{AppConfig, LogConfig, ServiceConfig, UploadConfig};
pub use logging::init_logging;
pub use processor::{
    ChunkRequest, ChunkTransport, ProcessorClient, UploadErrorKind, UploadMetadata, WireFormat,
};
pub use uploader::{
    combine, pick_discipline, plan_chunks, ChunkPlan, Discipline, JobConfig, JobProgress,
    JobResult, ProgressAggregator, ProgressCallback, RetryPolicy, TimeoutPolicy, TransferOutcome,
    UploadChunk, UploadJob, UploadJobStatus, UploadManager, UploadScheduler, UploadSource,
};
