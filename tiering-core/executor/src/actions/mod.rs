//! 内置动作
//!
//! 按行为分组:
//! - **文件传输** (`transfer`): 生成文件、上传、下载、删除
//! - **元数据** (`metadata`): 查询元数据、修改最后访问时间
//! - **管理** (`admin`): 分层任务、系统统计
//! - **校验** (`verification`): 只做比较，比较策略委托给校验引擎
//! - **工具** (`utility`): 等待、生成 UUID、计算校验和
//! - **并发** (`concurrent`): 把基础动作扇出到多个 worker

/// 为异步函数实现 [`ActionHandler`](crate::registry::ActionHandler)
macro_rules! action_handler {
    ($handler:ident, $func:path, $desc:expr) => {
        pub struct $handler;

        #[async_trait::async_trait]
        impl crate::registry::ActionHandler for $handler {
            async fn execute(
                &self,
                step: &crate::suite::Step,
                ctx: &mut crate::context::ExecutionContext,
                env: &crate::actions::ActionEnv,
            ) -> crate::Result<crate::report::StepResult> {
                $func(step, ctx, env).await
            }

            fn description(&self) -> &'static str {
                $desc
            }
        }
    };
}

pub(crate) use action_handler;

pub mod admin;
pub mod concurrent;
pub mod metadata;
pub mod transfer;
pub mod utility;
pub mod verification;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use tiering_boundary::{BoundaryError, TieringService};

use crate::context::ExecutionContext;
use crate::registry::ActionRegistry;
use crate::report::StepResult;
use crate::settings::ExecutorSettings;
use crate::suite::{Step, TestData};
use crate::{ExecutorError, Result};

/// 上传成功状态码
pub const STATUS_CREATED: u16 = 201;
/// 查询、下载、管理接口成功状态码
pub const STATUS_OK: u16 = 200;
/// 删除成功状态码
pub const STATUS_NO_CONTENT: u16 = 204;

/// 动作执行环境
#[derive(Clone)]
pub struct ActionEnv {
    /// 被测服务
    pub service: Arc<dyn TieringService>,

    /// 动作注册表 (并发动作按名称查找基础动作)
    pub registry: Arc<ActionRegistry>,

    /// 执行设置
    pub settings: Arc<ExecutorSettings>,

    /// 套件的全局测试数据
    pub test_data: Arc<TestData>,
}

impl ActionEnv {
    /// 单次服务调用超时
    pub fn call_timeout(&self) -> Duration {
        self.settings.call_timeout()
    }

    /// 步骤超时 (步骤声明优先)
    pub fn step_timeout(&self, step: &Step) -> Duration {
        step.timeout
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.settings.step_timeout())
    }

    /// 解析步骤声明的文件大小，并检查生成内容的上限
    pub fn payload_size(&self, step: &Step, key: &str) -> Result<usize> {
        let size = match step.param(key) {
            Some(declared) if !declared.is_null() => self.test_data.resolve_size(declared)?,
            _ => self.test_data.resolve_size(&Value::from("sample"))?,
        };
        self.check_payload(size)
    }

    /// 检查生成内容的大小上限
    pub(crate) fn check_payload(&self, size: u64) -> Result<usize> {
        if size > self.settings.max_payload_bytes {
            return Err(ExecutorError::InvalidParameter(format!(
                "文件大小 {} 超过生成上限 {} 字节",
                size, self.settings.max_payload_bytes
            )));
        }
        usize::try_from(size)
            .map_err(|_| ExecutorError::InvalidParameter(format!("文件大小超出范围: {}", size)))
    }

    /// 解析步骤的 `count` 参数 (未声明时取 `default`)，并检查上限
    pub fn count_param(&self, step: &Step, default: usize) -> Result<usize> {
        let count = match step.u64_param("count")? {
            Some(count) => usize::try_from(count).map_err(|_| {
                ExecutorError::InvalidParameter(format!("count 超出范围: {}", count))
            })?,
            None => default,
        };
        self.check_count(count)
    }

    /// 检查数量上限
    pub(crate) fn check_count(&self, count: usize) -> Result<usize> {
        if count > self.settings.max_count {
            return Err(ExecutorError::InvalidParameter(format!(
                "count {} 超过上限 {}",
                count, self.settings.max_count
            )));
        }
        Ok(count)
    }

    /// 调用服务，服务不可用时按重试策略重试
    ///
    /// 只用于不改变服务状态的调用。
    pub async fn call_with_retry<T, F, Fut>(
        &self,
        operation: &str,
        mut call: F,
    ) -> std::result::Result<T, BoundaryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoundaryError>>,
    {
        let max_attempts = self.settings.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(
                        "{} 失败 (第 {}/{} 次): {}, 稍后重试",
                        operation, attempt, max_attempts, e
                    );
                    tokio::time::sleep(self.settings.retry.delay()).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// 服务调用结果与期望状态码对照后的结果
pub(crate) enum Settled<T> {
    /// 调用成功且符合期望
    Success(T),
    /// 调用失败但状态码符合期望，步骤通过
    ExpectedFailure(StepResult),
}

/// 将服务调用结果与步骤的期望状态码对照
///
/// - 成功且期望状态码接受成功状态: `Success`
/// - 成功但期望的是失败状态: 断言失败
/// - 失败且状态码符合期望: 记录 `last_error_response`，步骤通过
/// - 失败且不符合期望: 服务错误
pub(crate) fn settle<T>(
    step: &Step,
    ctx: &mut ExecutionContext,
    result: std::result::Result<T, BoundaryError>,
    success_status: u16,
) -> Result<Settled<T>> {
    match result {
        Ok(value) => match &step.expected_status {
            Some(expected) if !expected.accepts(success_status) => {
                Err(ExecutorError::AssertionFailed(format!(
                    "期望状态 {}, 实际 {}",
                    expected, success_status
                )))
            }
            _ => Ok(Settled::Success(value)),
        },
        Err(err) => {
            let status = err.status_code();
            match &step.expected_status {
                Some(expected) if expected.accepts(status) => {
                    ctx.set(
                        "last_error_response",
                        json!({ "status": status, "detail": err.detail() }),
                    );
                    Ok(Settled::ExpectedFailure(StepResult::passed(format!(
                        "返回预期状态 {}: {}",
                        status,
                        err.detail()
                    ))))
                }
                _ => Err(ExecutorError::Boundary(err)),
            }
        }
    }
}

/// 步骤指定的文件 ID，未指定时使用上一次上传的文件
pub(crate) fn target_file_id(step: &Step, ctx: &ExecutionContext) -> Result<String> {
    match step.str_param("file_id")? {
        Some(id) => Ok(id.to_string()),
        None => ctx.text("last_file_id").map(str::to_string),
    }
}

/// 第一个存在的上下文键 (步骤参数 `source` 优先)
pub(crate) fn source_key<'a>(
    step: &'a Step,
    ctx: &ExecutionContext,
    defaults: &[&'a str],
) -> Result<&'a str> {
    if let Some(source) = step.str_param("source")? {
        return Ok(source);
    }
    defaults
        .iter()
        .copied()
        .find(|key| ctx.contains(key))
        .ok_or_else(|| ExecutorError::MissingContextKey(defaults.join(" | ")))
}

/// 生成指定大小的文件内容
pub(crate) fn generate_content(size: usize) -> Vec<u8> {
    vec![b'x'; size]
}

/// SHA-256 校验和 (小写十六进制)
pub fn sha256_hex(content: &[u8]) -> String {
    Sha256::digest(content)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// 将 `capture` 参数指定的键写入值
pub(crate) fn capture_keys(step: &Step, ctx: &mut ExecutionContext, value: &str) -> Result<()> {
    for key in step.str_list_param("capture")? {
        ctx.set(key, value);
    }
    Ok(())
}

/// 注册全部内置动作
pub fn register_builtin(registry: &mut ActionRegistry) -> Result<()> {
    // 文件传输
    registry.register("create_file", Arc::new(transfer::CreateFile))?;
    registry.register("upload", Arc::new(transfer::Upload))?;
    registry.register("upload_file", Arc::new(transfer::UploadFile))?;
    registry.register("upload_multiple", Arc::new(transfer::UploadMultiple))?;
    registry.register("bulk_upload", Arc::new(transfer::BulkUpload))?;
    registry.register("download", Arc::new(transfer::Download))?;
    registry.register("delete", Arc::new(transfer::Delete))?;

    // 元数据
    registry.register("get_metadata", Arc::new(metadata::GetMetadata))?;
    registry.register("update_last_accessed", Arc::new(metadata::UpdateLastAccessed))?;
    registry.register("move_to_cold", Arc::new(metadata::MoveToCold))?;

    // 管理
    registry.register("run_tiering", Arc::new(admin::RunTiering))?;
    registry.register("get_stats", Arc::new(admin::GetStats))?;

    // 校验
    registry.register("verify_response", Arc::new(verification::VerifyResponse))?;
    registry.register("verify_error", Arc::new(verification::VerifyError))?;
    registry.register("verify_tier", Arc::new(verification::VerifyTier))?;
    registry.register("verify_content_match", Arc::new(verification::VerifyContentMatch))?;
    registry.register("verify_checksum_match", Arc::new(verification::VerifyChecksumMatch))?;
    registry.register(
        "verify_last_accessed_updated",
        Arc::new(verification::VerifyLastAccessedUpdated),
    )?;
    registry.register(
        "verify_timestamp_increased",
        Arc::new(verification::VerifyTimestampIncreased),
    )?;
    registry.register("verify_stats", Arc::new(verification::VerifyStats))?;
    registry.register("verify_stats_decreased", Arc::new(verification::VerifyStatsDecreased))?;
    registry.register("verify_increment", Arc::new(verification::VerifyIncrement))?;
    registry.register("verify_decrement", Arc::new(verification::VerifyDecrement))?;
    registry.register("verify_content_types", Arc::new(verification::VerifyContentTypes))?;
    registry.register("verify_unique_ids", Arc::new(verification::VerifyUniqueIds))?;
    registry.register("verify_ids_different", Arc::new(verification::VerifyIdsDifferent))?;
    registry.register("verify_all_deleted", Arc::new(verification::VerifyAllDeleted))?;
    registry.register("verify_tier_stats", Arc::new(verification::VerifyTierStats))?;
    registry.register(
        "verify_tier_distribution",
        Arc::new(verification::VerifyTierDistribution),
    )?;
    registry.register(
        "verify_consistent_state",
        Arc::new(verification::VerifyConsistentState),
    )?;
    registry.register(
        "verify_tiering_results",
        Arc::new(verification::VerifyTieringResults),
    )?;
    registry.register("verify_all_success", Arc::new(verification::VerifyAllSuccess))?;

    // 工具
    registry.register("wait", Arc::new(utility::Wait))?;
    registry.register("generate_random_uuid", Arc::new(utility::GenerateRandomUuid))?;
    registry.register("calculate_checksum", Arc::new(utility::CalculateChecksum))?;

    // 并发
    registry.register("concurrent", Arc::new(concurrent::Concurrent::generic()))?;
    registry.register("concurrent_upload", Arc::new(concurrent::Concurrent::upload()))?;
    registry.register("concurrent_download", Arc::new(concurrent::Concurrent::download()))?;
    registry.register("concurrent_delete", Arc::new(concurrent::Concurrent::delete()))?;
    registry.register("concurrent_tiering", Arc::new(concurrent::Concurrent::tiering()))?;

    Ok(())
}
