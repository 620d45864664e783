//! 被测分层存储服务边界
//!
//! 执行引擎只通过 [`TieringService`] 与被测系统交互。
//!
//! # 实现
//!
//! - **HTTP 客户端** (`HttpTieringClient`): 访问真实部署的 REST 服务
//! - **内存参考实现** (`MemoryTieringService`): 进程内服务，用于测试和演示
//!
//! 所有调用都由调用方提供超时时间，超时后返回 [`BoundaryError::Timeout`]，
//! 不会无限期挂起。

pub mod client;
pub mod config;
pub mod error;
pub mod memory;

pub use client::HttpTieringClient;
pub use config::BoundaryConfig;
pub use error::{BoundaryError, Result};
pub use memory::{MemoryServiceConfig, MemoryTieringService};

pub use tiering_common::{
    FileMetadata, SystemStats, Tier, TierStats, TieringSummary, UploadReceipt,
};

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// 上传请求
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    /// 文件名
    pub filename: String,

    /// 文件内容 (None 表示请求中不携带文件)
    pub content: Option<Vec<u8>>,

    /// 内容类型 (None 表示未设置)
    pub content_type: Option<String>,
}

impl UploadRequest {
    /// 创建携带文件内容的上传请求
    pub fn new(filename: &str, content: Vec<u8>, content_type: Option<&str>) -> Self {
        Self {
            filename: filename.to_string(),
            content: Some(content),
            content_type: content_type.map(str::to_string),
        }
    }

    /// 创建不携带文件的上传请求
    pub fn without_file() -> Self {
        Self::default()
    }
}

/// 分层存储服务 trait
///
/// 所有服务实现必须实现此 trait
#[async_trait]
pub trait TieringService: Send + Sync {
    /// 上传文件 (成功状态 201)
    async fn upload(&self, request: UploadRequest, timeout: Duration) -> Result<UploadReceipt>;

    /// 查询文件元数据 (成功状态 200)
    async fn metadata(&self, file_id: &str, timeout: Duration) -> Result<FileMetadata>;

    /// 下载文件内容 (成功状态 200)
    async fn download(&self, file_id: &str, timeout: Duration) -> Result<Vec<u8>>;

    /// 删除文件 (成功状态 204)
    async fn delete(&self, file_id: &str, timeout: Duration) -> Result<()>;

    /// 修改文件最后访问时间为 `days_ago` 天前 (管理接口)
    async fn update_last_accessed(
        &self,
        file_id: &str,
        days_ago: i64,
        timeout: Duration,
    ) -> Result<FileMetadata>;

    /// 触发一次分层任务 (成功状态 200)
    async fn run_tiering(&self, timeout: Duration) -> Result<TieringSummary>;

    /// 查询系统统计 (成功状态 200)
    async fn stats(&self, timeout: Duration) -> Result<SystemStats>;

    /// 服务名称 (用于日志)
    fn name(&self) -> String {
        "tiering-service".to_string()
    }
}

/// 为边界调用施加超时
///
/// 超时后返回 [`BoundaryError::Timeout`]，`operation` 用于错误详情。
pub async fn with_timeout<T, F>(timeout: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(BoundaryError::Timeout(format!(
            "{} 超过 {} ms 未完成",
            operation,
            timeout.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_elapsed() {
        let result: Result<()> = with_timeout(Duration::from_millis(10), "慢调用", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(BoundaryError::Timeout(detail)) => assert!(detail.contains("慢调用")),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_with_timeout_passthrough() {
        let result = with_timeout(Duration::from_secs(1), "快调用", async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[test]
    fn test_upload_request_without_file() {
        let req = UploadRequest::without_file();
        assert!(req.content.is_none());
        assert!(req.content_type.is_none());
    }
}
