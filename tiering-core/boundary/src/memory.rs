//! 内存分层存储服务
//!
//! 进程内的参考实现，行为与 REST 服务约定一致:
//! - 新上传文件进入 HOT 层
//! - 分层任务按空闲天数迁移文件 (30 天 WARM, 90 天 COLD)
//! - 下载会刷新最后访问时间

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use tiering_common::{
    FileMetadata, SystemStats, Tier, TierStats, TieringSummary, UploadReceipt,
};

use crate::error::{BoundaryError, Result};
use crate::{with_timeout, TieringService, UploadRequest};

/// 内存服务配置
#[derive(Debug, Clone)]
pub struct MemoryServiceConfig {
    /// 允许的最小文件大小 (字节)
    pub min_file_size: u64,

    /// 允许的最大文件大小 (字节)
    pub max_file_size: u64,

    /// 每次调用的模拟延迟
    pub latency: Duration,
}

impl Default for MemoryServiceConfig {
    fn default() -> Self {
        Self {
            min_file_size: 0,
            max_file_size: 10 * 1024 * 1024 * 1024,
            latency: Duration::ZERO,
        }
    }
}

struct StoredFile {
    metadata: FileMetadata,
    content: Vec<u8>,
}

/// 内存分层存储服务
pub struct MemoryTieringService {
    files: RwLock<HashMap<String, StoredFile>>,
    config: MemoryServiceConfig,
}

impl MemoryTieringService {
    /// 使用默认配置创建服务
    pub fn new() -> Self {
        Self::with_config(MemoryServiceConfig::default())
    }

    /// 使用指定配置创建服务
    pub fn with_config(config: MemoryServiceConfig) -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// 当前文件数量
    pub async fn file_count(&self) -> usize {
        self.files.read().await.len()
    }

    /// 清空所有文件
    pub async fn clear(&self) {
        self.files.write().await.clear();
    }

    async fn simulate_latency(&self) {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
    }

    fn validate_upload(&self, request: &UploadRequest) -> Result<()> {
        let content = request
            .content
            .as_ref()
            .ok_or_else(|| BoundaryError::InvalidInput {
                status: 422,
                detail: "Missing file in request".to_string(),
            })?;

        if request.filename.trim().is_empty() {
            return Err(BoundaryError::invalid("Filename is required"));
        }

        match request.content_type.as_deref() {
            Some(ct) if ct.contains('/') && !ct.trim().is_empty() => {}
            _ => return Err(BoundaryError::invalid("Invalid or missing content type")),
        }

        let size = content.len() as u64;
        if size < self.config.min_file_size {
            return Err(BoundaryError::invalid(format!(
                "File size must be at least {} bytes",
                self.config.min_file_size
            )));
        }
        if size > self.config.max_file_size {
            return Err(BoundaryError::InvalidInput {
                status: 413,
                detail: format!(
                    "File size exceeds maximum of {} bytes",
                    self.config.max_file_size
                ),
            });
        }

        Ok(())
    }

    async fn do_upload(&self, request: UploadRequest) -> Result<UploadReceipt> {
        self.simulate_latency().await;
        self.validate_upload(&request)?;

        let content = request.content.unwrap_or_default();
        let content_type = request.content_type.unwrap_or_default();
        let now = Utc::now();
        let file_id = Uuid::new_v4().to_string();

        let metadata = FileMetadata {
            file_id: file_id.clone(),
            filename: request.filename.clone(),
            size: content.len() as u64,
            content_type: content_type.clone(),
            tier: Tier::Hot,
            created_at: now,
            last_accessed: now,
        };

        let receipt = UploadReceipt {
            file_id: file_id.clone(),
            filename: request.filename,
            size: metadata.size,
            content_type,
            tier: Tier::Hot,
            created_at: now,
        };

        self.files
            .write()
            .await
            .insert(file_id.clone(), StoredFile { metadata, content });

        debug!("内存服务: 上传文件 {} ({} 字节)", file_id, receipt.size);
        Ok(receipt)
    }

    async fn do_metadata(&self, file_id: &str) -> Result<FileMetadata> {
        self.simulate_latency().await;
        self.files
            .read()
            .await
            .get(file_id)
            .map(|f| f.metadata.clone())
            .ok_or_else(|| not_found(file_id))
    }

    async fn do_download(&self, file_id: &str) -> Result<Vec<u8>> {
        self.simulate_latency().await;
        let mut files = self.files.write().await;
        let file = files.get_mut(file_id).ok_or_else(|| not_found(file_id))?;

        // 保证最后访问时间严格递增
        let now = Utc::now();
        let previous = file.metadata.last_accessed;
        file.metadata.last_accessed = if now > previous {
            now
        } else {
            previous + ChronoDuration::microseconds(1)
        };

        Ok(file.content.clone())
    }

    async fn do_delete(&self, file_id: &str) -> Result<()> {
        self.simulate_latency().await;
        self.files
            .write()
            .await
            .remove(file_id)
            .map(|_| ())
            .ok_or_else(|| not_found(file_id))
    }

    async fn do_update_last_accessed(&self, file_id: &str, days_ago: i64) -> Result<FileMetadata> {
        self.simulate_latency().await;
        if days_ago < 0 {
            return Err(BoundaryError::invalid("days_ago must not be negative"));
        }

        let last_accessed = ChronoDuration::try_days(days_ago)
            .and_then(|delta| Utc::now().checked_sub_signed(delta))
            .ok_or_else(|| {
                BoundaryError::invalid(format!("days_ago out of range: {}", days_ago))
            })?;

        let mut files = self.files.write().await;
        let file = files.get_mut(file_id).ok_or_else(|| not_found(file_id))?;
        file.metadata.last_accessed = last_accessed;
        Ok(file.metadata.clone())
    }

    async fn do_run_tiering(&self) -> Result<TieringSummary> {
        self.simulate_latency().await;
        let now = Utc::now();
        let mut files = self.files.write().await;
        let mut summary = TieringSummary {
            files_evaluated: files.len() as u64,
            ..Default::default()
        };

        for file in files.values_mut() {
            let idle_days = (now - file.metadata.last_accessed).num_days();
            let target = Tier::for_idle_days(idle_days);
            if target != file.metadata.tier {
                file.metadata.tier = target;
                summary.files_moved += 1;
                *summary
                    .moved_to
                    .entry(target.as_str().to_string())
                    .or_insert(0) += 1;
            }
        }

        info!(
            "内存服务: 分层任务完成, 检查 {} 个文件, 迁移 {} 个",
            summary.files_evaluated, summary.files_moved
        );
        Ok(summary)
    }

    async fn do_stats(&self) -> Result<SystemStats> {
        self.simulate_latency().await;
        let files = self.files.read().await;

        let mut tiers: BTreeMap<String, TierStats> = Tier::ALL
            .iter()
            .map(|t| (t.as_str().to_string(), TierStats::default()))
            .collect();

        let mut stats = SystemStats::default();
        for file in files.values() {
            stats.total_files += 1;
            stats.total_size += file.metadata.size;
            let entry = tiers
                .entry(file.metadata.tier.as_str().to_string())
                .or_default();
            entry.count += 1;
            entry.size += file.metadata.size;
        }
        stats.tiers = tiers;

        Ok(stats)
    }
}

impl Default for MemoryTieringService {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(file_id: &str) -> BoundaryError {
    BoundaryError::NotFound(format!("File {} not found", file_id))
}

#[async_trait]
impl TieringService for MemoryTieringService {
    async fn upload(&self, request: UploadRequest, timeout: Duration) -> Result<UploadReceipt> {
        with_timeout(timeout, "上传文件", self.do_upload(request)).await
    }

    async fn metadata(&self, file_id: &str, timeout: Duration) -> Result<FileMetadata> {
        with_timeout(timeout, "查询元数据", self.do_metadata(file_id)).await
    }

    async fn download(&self, file_id: &str, timeout: Duration) -> Result<Vec<u8>> {
        with_timeout(timeout, "下载文件", self.do_download(file_id)).await
    }

    async fn delete(&self, file_id: &str, timeout: Duration) -> Result<()> {
        with_timeout(timeout, "删除文件", self.do_delete(file_id)).await
    }

    async fn update_last_accessed(
        &self,
        file_id: &str,
        days_ago: i64,
        timeout: Duration,
    ) -> Result<FileMetadata> {
        with_timeout(
            timeout,
            "修改最后访问时间",
            self.do_update_last_accessed(file_id, days_ago),
        )
        .await
    }

    async fn run_tiering(&self, timeout: Duration) -> Result<TieringSummary> {
        with_timeout(timeout, "执行分层任务", self.do_run_tiering()).await
    }

    async fn stats(&self, timeout: Duration) -> Result<SystemStats> {
        with_timeout(timeout, "查询统计", self.do_stats()).await
    }

    fn name(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(5);

    fn sample(size: usize) -> UploadRequest {
        UploadRequest::new("a.bin", vec![b'x'; size], Some("application/octet-stream"))
    }

    #[tokio::test]
    async fn test_upload_assigns_hot_tier() {
        let service = MemoryTieringService::new();
        let receipt = service.upload(sample(16), T).await.unwrap();
        assert_eq!(receipt.tier, Tier::Hot);
        assert!(!receipt.file_id.is_empty());
        assert_eq!(service.file_count().await, 1);
    }

    #[tokio::test]
    async fn test_upload_rejects_missing_content_type() {
        let service = MemoryTieringService::new();
        let req = UploadRequest::new("a.bin", vec![1, 2, 3], None);
        let err = service.upload(req, T).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.detail().contains("content type"));
    }

    #[tokio::test]
    async fn test_upload_without_file_is_rejected() {
        let service = MemoryTieringService::new();
        let err = service
            .upload(UploadRequest::without_file(), T)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 422);
    }

    #[tokio::test]
    async fn test_size_limits() {
        let service = MemoryTieringService::with_config(MemoryServiceConfig {
            min_file_size: 10,
            max_file_size: 20,
            ..Default::default()
        });
        assert_eq!(service.upload(sample(5), T).await.unwrap_err().status_code(), 400);
        assert_eq!(service.upload(sample(25), T).await.unwrap_err().status_code(), 413);
        assert!(service.upload(sample(15), T).await.is_ok());
    }

    #[tokio::test]
    async fn test_tiering_moves_idle_files() {
        let service = MemoryTieringService::new();
        let warm = service.upload(sample(4), T).await.unwrap().file_id;
        let cold = service.upload(sample(4), T).await.unwrap().file_id;
        let hot = service.upload(sample(4), T).await.unwrap().file_id;

        service.update_last_accessed(&warm, 35, T).await.unwrap();
        service.update_last_accessed(&cold, 95, T).await.unwrap();

        let summary = service.run_tiering(T).await.unwrap();
        assert_eq!(summary.files_evaluated, 3);
        assert_eq!(summary.files_moved, 2);

        assert_eq!(service.metadata(&warm, T).await.unwrap().tier, Tier::Warm);
        assert_eq!(service.metadata(&cold, T).await.unwrap().tier, Tier::Cold);
        assert_eq!(service.metadata(&hot, T).await.unwrap().tier, Tier::Hot);

        let stats = service.stats(T).await.unwrap();
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.tier(Tier::Warm).count, 1);
        assert_eq!(stats.tier_count_sum(), stats.total_files);
        assert_eq!(stats.tier_size_sum(), stats.total_size);
    }

    #[tokio::test]
    async fn test_update_last_accessed_out_of_range() {
        let service = MemoryTieringService::new();
        let id = service.upload(sample(8), T).await.unwrap().file_id;
        let before = service.metadata(&id, T).await.unwrap().last_accessed;

        let err = service
            .update_last_accessed(&id, i64::MAX, T)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.detail().contains("out of range"));

        assert!(service.update_last_accessed(&id, 1_000_000_000, T).await.is_err());
        assert_eq!(service.metadata(&id, T).await.unwrap().last_accessed, before);
    }

    #[tokio::test]
    async fn test_download_refreshes_last_accessed() {
        let service = MemoryTieringService::new();
        let id = service.upload(sample(8), T).await.unwrap().file_id;
        let before = service.metadata(&id, T).await.unwrap().last_accessed;

        let content = service.download(&id, T).await.unwrap();
        assert_eq!(content, vec![b'x'; 8]);

        let after = service.metadata(&id, T).await.unwrap().last_accessed;
        assert!(after > before);
    }

    #[tokio::test]
    async fn test_delete_then_not_found() {
        let service = MemoryTieringService::new();
        let id = service.upload(sample(8), T).await.unwrap().file_id;
        service.delete(&id, T).await.unwrap();

        assert!(matches!(
            service.download(&id, T).await,
            Err(BoundaryError::NotFound(_))
        ));
        assert!(matches!(
            service.delete(&id, T).await,
            Err(BoundaryError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_hits_timeout() {
        let service = MemoryTieringService::with_config(MemoryServiceConfig {
            latency: Duration::from_secs(10),
            ..Default::default()
        });
        let err = service.stats(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, BoundaryError::Timeout(_)));
    }
}
