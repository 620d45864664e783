//! 分层存储服务 HTTP 客户端

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use tiering_common::{ErrorBody, FileMetadata, SystemStats, TieringSummary, UploadReceipt};

use crate::config::BoundaryConfig;
use crate::error::{BoundaryError, Result};
use crate::{TieringService, UploadRequest};

/// 分层存储服务 HTTP 客户端
pub struct HttpTieringClient {
    /// API 基础 URL
    base_url: String,

    /// HTTP 客户端
    http_client: Client,

    /// 配置
    config: BoundaryConfig,
}

impl HttpTieringClient {
    /// 创建新的 HTTP 客户端
    pub fn new(config: BoundaryConfig) -> Result<Self> {
        let http_client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| BoundaryError::Unavailable(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http_client,
            config,
        })
    }

    /// 获取基础 URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// 单次调用的有效超时 (调用方超时与配置上限中较小者)
    fn effective_timeout(&self, timeout: Duration) -> Duration {
        timeout.min(self.config.request_timeout())
    }

    /// 发送请求并检查状态码
    async fn send(
        &self,
        request: RequestBuilder,
        timeout: Duration,
        operation: &str,
    ) -> Result<Response> {
        let timeout = self.effective_timeout(timeout);
        debug!("分层服务请求: {} (超时 {} ms)", operation, timeout.as_millis());

        let response = request.timeout(timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                BoundaryError::Timeout(format!("{} 超过 {} ms 未完成", operation, timeout.as_millis()))
            } else {
                BoundaryError::Unavailable(format!("{} 请求失败: {}", operation, e))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "无法读取错误响应".to_string());
        let detail = ErrorBody::detail_from_text(&error_text);
        warn!("分层服务请求失败: {} - {} {}", operation, status, detail);

        Err(BoundaryError::from_status(status.as_u16(), detail))
    }

    async fn parse_json<R: DeserializeOwned>(response: Response, operation: &str) -> Result<R> {
        response
            .json::<R>()
            .await
            .map_err(|e| BoundaryError::Unavailable(format!("{} 响应解析失败: {}", operation, e)))
    }
}

#[async_trait]
impl TieringService for HttpTieringClient {
    async fn upload(&self, request: UploadRequest, timeout: Duration) -> Result<UploadReceipt> {
        let mut builder = self.http_client.post(self.url("/files"));

        if let Some(content) = request.content {
            let mut part = Part::bytes(content).file_name(request.filename.clone());
            if let Some(content_type) = &request.content_type {
                part = part
                    .mime_str(content_type)
                    .map_err(|e| BoundaryError::invalid(format!("无效的内容类型: {}", e)))?;
            }
            builder = builder.multipart(Form::new().part("file", part));
        }

        let response = self.send(builder, timeout, "上传文件").await?;
        Self::parse_json(response, "上传文件").await
    }

    async fn metadata(&self, file_id: &str, timeout: Duration) -> Result<FileMetadata> {
        let builder = self
            .http_client
            .get(self.url(&format!("/files/{}/metadata", file_id)));
        let response = self.send(builder, timeout, "查询元数据").await?;
        Self::parse_json(response, "查询元数据").await
    }

    async fn download(&self, file_id: &str, timeout: Duration) -> Result<Vec<u8>> {
        let builder = self.http_client.get(self.url(&format!("/files/{}", file_id)));
        let response = self.send(builder, timeout, "下载文件").await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| BoundaryError::Unavailable(format!("读取下载内容失败: {}", e)))?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, file_id: &str, timeout: Duration) -> Result<()> {
        let builder = self
            .http_client
            .delete(self.url(&format!("/files/{}", file_id)));
        self.send(builder, timeout, "删除文件").await?;
        Ok(())
    }

    async fn update_last_accessed(
        &self,
        file_id: &str,
        days_ago: i64,
        timeout: Duration,
    ) -> Result<FileMetadata> {
        let builder = self
            .http_client
            .post(self.url(&format!("/admin/files/{}/update-last-accessed", file_id)))
            .json(&serde_json::json!({ "days_ago": days_ago }));
        self.send(builder, timeout, "修改最后访问时间").await?;

        // 管理接口只返回确认信息，元数据需要重新查询
        self.metadata(file_id, timeout).await
    }

    async fn run_tiering(&self, timeout: Duration) -> Result<TieringSummary> {
        let builder = self.http_client.post(self.url("/admin/tiering/run"));
        let response = self.send(builder, timeout, "执行分层任务").await?;
        Self::parse_json(response, "执行分层任务").await
    }

    async fn stats(&self, timeout: Duration) -> Result<SystemStats> {
        let builder = self.http_client.get(self.url("/admin/stats"));
        let response = self.send(builder, timeout, "查询统计").await?;
        Self::parse_json(response, "查询统计").await
    }

    fn name(&self) -> String {
        format!("http({})", self.base_url)
    }
}
