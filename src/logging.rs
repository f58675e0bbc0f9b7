//! 日志系统配置
//!
//! 支持控制台输出和文件持久化，按天滚动，自动清理过期日志

use crate::config::LogConfig;
use anyhow::{Context, Result};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// 日志文件名前缀
const LOG_FILE_PREFIX: &str = "media-upload.log";

/// 初始化日志系统
///
/// 控制台输出始终开启；启用文件持久化时额外挂载按天滚动的文件层，
/// 并清理超过保留天数的旧日志。
///
/// # 返回
/// 文件日志的 WorkerGuard（持有它保证进程退出前日志落盘），
/// 未启用文件持久化时为 None
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    // RUST_LOG 优先于配置文件中的级别
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::layer()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .with_target(true);

    if config.enabled {
        std::fs::create_dir_all(&config.log_dir)
            .with_context(|| format!("创建日志目录失败: {:?}", config.log_dir))?;

        // 清理失败不阻塞启动
        if let Err(e) = cleanup_old_logs(&config.log_dir, config.retention_days) {
            warn!("清理过期日志失败: {}", e);
        }

        let appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("初始化日志系统失败: {}", e))?;

        Ok(Some(guard))
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("初始化日志系统失败: {}", e))?;

        Ok(None)
    }
}

/// 清理超过保留天数的日志文件
fn cleanup_old_logs(log_dir: &Path, retention_days: u32) -> Result<()> {
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(retention_days as u64 * 24 * 3600))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if !name.starts_with(LOG_FILE_PREFIX) {
            continue;
        }

        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => continue,
        };

        if modified < cutoff {
            if let Err(e) = std::fs::remove_file(entry.path()) {
                warn!("删除过期日志失败 {:?}: {}", entry.path(), e);
            }
        }
    }

    Ok(())
}
