// 配置管理模块

use crate::uploader::scheduler::{JobConfig, TimeoutPolicy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 处理服务配置
    #[serde(default)]
    pub service: ServiceConfig,
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 处理服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// 处理服务根地址
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 分片大小 (MB)
    #[serde(default = "default_chunk_size_mb")]
    pub chunk_size_mb: u64,
    /// 并发纪律下批内最大并发分片数
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// 每个分片的最大重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 初始退避延迟（毫秒）
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// 每 MB 分片分配的超时毫秒数
    #[serde(default = "default_timeout_ms_per_mb")]
    pub timeout_ms_per_mb: u64,
    /// 分片超时下限（毫秒）
    #[serde(default = "default_timeout_floor_ms")]
    pub timeout_floor_ms: u64,
}

fn default_chunk_size_mb() -> u64 {
    5
}

fn default_max_concurrency() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_timeout_ms_per_mb() -> u64 {
    12_000
}

fn default_timeout_floor_ms() -> u64 {
    30_000
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size_mb: default_chunk_size_mb(),
            max_concurrency: default_max_concurrency(),
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            timeout_ms_per_mb: default_timeout_ms_per_mb(),
            timeout_floor_ms: default_timeout_floor_ms(),
        }
    }
}

impl UploadConfig {
    /// 转换为任务配置
    pub fn to_job_config(&self) -> JobConfig {
        JobConfig {
            chunk_size_bytes: self.chunk_size_mb * 1024 * 1024,
            max_concurrency: self.max_concurrency,
            max_retries: self.max_retries,
            base_backoff_ms: self.base_backoff_ms,
            chunk_timeout: TimeoutPolicy::Scaled {
                ms_per_mb: self.timeout_ms_per_mb,
                floor_ms: self.timeout_floor_ms,
            },
            discipline: None,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    false
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// 从 TOML 文件加载配置
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("读取配置文件失败: {:?}", path))?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        Ok(config)
    }

    /// 加载配置，文件不存在时使用默认值
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path).await
        } else {
            Ok(Self::default())
        }
    }

    /// 保存配置到 TOML 文件
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("创建配置目录失败: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .await
            .with_context(|| format!("写入配置文件失败: {:?}", path))?;

        Ok(())
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.upload.chunk_size_mb == 0 {
            anyhow::bail!("配置错误: 分片大小必须大于 0");
        }
        if self.upload.max_concurrency == 0 {
            anyhow::bail!("配置错误: 最大并发数必须不小于 1");
        }
        if self.service.base_url.is_empty() {
            anyhow::bail!("配置错误: 处理服务地址不能为空");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = AppConfig::default();
        assert_eq!(config.upload.chunk_size_mb, 5);
        assert_eq!(config.upload.max_concurrency, 4);
        assert_eq!(config.upload.max_retries, 3);
        assert_eq!(config.log.retention_days, 7);
        assert!(!config.log.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        // 缺失的字段全部走默认值
        let config: AppConfig = toml::from_str(
            r#"
            [upload]
            chunk_size_mb = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.upload.chunk_size_mb, 8);
        assert_eq!(config.upload.max_concurrency, 4);
        assert_eq!(config.service.base_url, "http://localhost:3000");
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.upload.chunk_size_mb, config.upload.chunk_size_mb);
        assert_eq!(parsed.log.level, config.log.level);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.upload.chunk_size_mb = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.upload.max_concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.service.base_url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_to_job_config_conversion() {
        let upload = UploadConfig {
            chunk_size_mb: 8,
            max_concurrency: 6,
            ..UploadConfig::default()
        };
        let job = upload.to_job_config();
        assert_eq!(job.chunk_size_bytes, 8 * 1024 * 1024);
        assert_eq!(job.max_concurrency, 6);
        assert!(job.validate().is_ok());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.upload.chunk_size_mb = 16;
        config.save(&path).await.unwrap();

        let loaded = AppConfig::load(&path).await.unwrap();
        assert_eq!(loaded.upload.chunk_size_mb, 16);
    }

    #[tokio::test]
    async fn test_load_or_default_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = AppConfig::load_or_default(dir.path().join("nope.toml"))
            .await
            .unwrap();
        assert_eq!(config.upload.chunk_size_mb, 5);
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "[upload]\nchunk_size_mb = 0\n")
            .await
            .unwrap();

        assert!(AppConfig::load(&path).await.is_err());
    }
}
