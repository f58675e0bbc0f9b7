// 处理服务接口模块

pub mod client;
pub mod types;

pub use client::{ChunkRequest, ChunkTransport, ProcessorClient, WireFormat};
pub use types::{FormUploadResponse, UploadErrorKind, UploadMetadata};
