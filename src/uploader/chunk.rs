// 上传分片规划
//
// 分片规则：
// - 分片是对 [0, S) 的连续、不重叠、无空洞的切分
// - 除最后一个分片外，每个分片大小等于配置的分片大小
// - 最后一个分片大小在 (0, C] 之间
// - 文件 <= 单个分片大小时，整体作为一个分片上传

use anyhow::{Context, Result};
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// 默认分片大小: 5MB
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// 规划分片序列
///
/// 纯函数，无 I/O。对每个源大小和分片大小的组合产生确定的切分结果。
///
/// # 参数
/// * `source_size` - 源数据总大小（字节）
/// * `chunk_size` - 分片大小（字节）
///
/// # 返回
/// 按索引升序排列的分片序列
pub fn plan_chunks(source_size: u64, chunk_size: u64) -> Result<Vec<UploadChunk>> {
    if chunk_size == 0 {
        anyhow::bail!("配置错误: 分片大小必须大于 0");
    }
    if source_size == 0 {
        anyhow::bail!("配置错误: 源数据为空，无可上传内容");
    }

    let total_chunks = source_size.div_ceil(chunk_size) as usize;
    let mut chunks = Vec::with_capacity(total_chunks);
    let mut offset = 0u64;
    let mut index = 0;

    while offset < source_size {
        let end = std::cmp::min(offset + chunk_size, source_size);
        chunks.push(UploadChunk {
            index,
            total_chunks,
            range: offset..end,
            is_last: end == source_size,
        });
        offset = end;
        index += 1;
    }

    debug!(
        "分片规划完成: 源大小={} bytes, 分片大小={} bytes, 分片数量={}",
        source_size,
        chunk_size,
        chunks.len()
    );

    Ok(chunks)
}

/// 上传分片信息
#[derive(Debug, Clone)]
pub struct UploadChunk {
    /// 分片索引（从 0 开始）
    pub index: usize,
    /// 总分片数
    pub total_chunks: usize,
    /// 字节范围
    pub range: Range<u64>,
    /// 是否最后一个分片
    pub is_last: bool,
}

impl UploadChunk {
    /// 分片大小
    pub fn size(&self) -> u64 {
        self.range.end - self.range.start
    }

    /// 起始偏移
    pub fn start_offset(&self) -> u64 {
        self.range.start
    }

    /// 结束偏移（不含）
    pub fn end_offset(&self) -> u64 {
        self.range.end
    }
}

/// 上传数据源
///
/// 分片数据按需读取，不在规划阶段驻留内存：
/// 内存源直接切片，文件源在阻塞线程池中 seek + read_exact。
#[derive(Debug, Clone)]
pub enum UploadSource {
    /// 内存数据（调用方已持有完整载荷）
    Memory(Arc<Vec<u8>>),
    /// 本地文件
    File(PathBuf),
}

impl UploadSource {
    /// 源数据总大小
    pub async fn size(&self) -> Result<u64> {
        match self {
            UploadSource::Memory(data) => Ok(data.len() as u64),
            UploadSource::File(path) => {
                let meta = tokio::fs::metadata(path)
                    .await
                    .with_context(|| format!("读取文件元数据失败: {:?}", path))?;
                Ok(meta.len())
            }
        }
    }

    /// 读取单个分片的数据
    pub async fn read_chunk(&self, chunk: &UploadChunk) -> Result<Vec<u8>> {
        let start = chunk.range.start;
        let size = chunk.size() as usize;

        match self {
            UploadSource::Memory(data) => {
                let end = chunk.range.end as usize;
                if end > data.len() {
                    anyhow::bail!("分片范围越界: {}-{} 超出源大小 {}", start, end, data.len());
                }
                Ok(data[start as usize..end].to_vec())
            }
            UploadSource::File(path) => {
                use std::io::{Read, Seek, SeekFrom};

                let path = path.clone();
                tokio::task::spawn_blocking(move || {
                    let mut file = std::fs::File::open(&path)
                        .with_context(|| format!("无法打开文件: {:?}", path))?;
                    file.seek(SeekFrom::Start(start))?;

                    let mut buffer = vec![0u8; size];
                    file.read_exact(&mut buffer).context("读取分片数据失败")?;

                    Ok(buffer)
                })
                .await?
            }
        }
    }
}

/// 分片状态记录（内部）
#[derive(Debug, Clone)]
struct ChunkState {
    chunk: UploadChunk,
    completed: bool,
    failed: bool,
}

/// 分片计划
///
/// 持有规划出的分片序列及其终态记录，供调度器查询整体进度。
#[derive(Debug)]
pub struct ChunkPlan {
    /// 所有分片及状态
    states: Vec<ChunkState>,
    /// 源数据总大小
    total_size: u64,
}

impl ChunkPlan {
    /// 创建新的分片计划
    ///
    /// # 参数
    /// * `total_size` - 源数据总大小
    /// * `chunk_size` - 分片大小
    pub fn new(total_size: u64, chunk_size: u64) -> Result<Self> {
        let chunks = plan_chunks(total_size, chunk_size)?;

        info!(
            "创建分片计划: 源大小={} bytes, 分片大小={} bytes, 分片数量={}",
            total_size,
            chunk_size,
            chunks.len()
        );

        Ok(Self {
            states: chunks
                .into_iter()
                .map(|chunk| ChunkState {
                    chunk,
                    completed: false,
                    failed: false,
                })
                .collect(),
            total_size,
        })
    }

    /// 获取所有分片
    pub fn chunks(&self) -> Vec<UploadChunk> {
        self.states.iter().map(|s| s.chunk.clone()).collect()
    }

    /// 获取分片数量
    pub fn chunk_count(&self) -> usize {
        self.states.len()
    }

    /// 源数据总大小
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// 已成功的分片数量
    pub fn completed_count(&self) -> usize {
        self.states.iter().filter(|s| s.completed).count()
    }

    /// 已失败的分片数量
    pub fn failed_count(&self) -> usize {
        self.states.iter().filter(|s| s.failed).count()
    }

    /// 已成功上传的字节数
    pub fn uploaded_bytes(&self) -> u64 {
        self.states
            .iter()
            .filter(|s| s.completed)
            .map(|s| s.chunk.size())
            .sum()
    }

    /// 计算上传进度（按成功字节数）
    pub fn progress(&self) -> f64 {
        if self.total_size == 0 {
            return 0.0;
        }
        (self.uploaded_bytes() as f64 / self.total_size as f64) * 100.0
    }

    /// 是否所有分片都到达终态（成功或失败）
    pub fn is_terminal(&self) -> bool {
        self.states.iter().all(|s| s.completed || s.failed)
    }

    /// 标记分片成功
    pub fn mark_completed(&mut self, index: usize) {
        if let Some(state) = self.states.get_mut(index) {
            state.completed = true;
            state.failed = false;
        }
    }

    /// 标记分片失败（重试耗尽后的终态）
    pub fn mark_failed(&mut self, index: usize) {
        if let Some(state) = self.states.get_mut(index) {
            state.failed = true;
        }
    }
}
