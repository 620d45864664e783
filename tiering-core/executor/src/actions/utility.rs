//! 工具动作

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{action_handler, sha256_hex, source_key, ActionEnv};
use crate::context::ExecutionContext;
use crate::registry::ActionHandler;
use crate::report::StepResult;
use crate::suite::Step;
use crate::{ExecutorError, Result};

/// 等待动作
///
/// 等待时长由步骤自己声明，不受默认步骤超时限制。
pub struct Wait;

#[async_trait]
impl ActionHandler for Wait {
    async fn execute(
        &self,
        step: &Step,
        ctx: &mut ExecutionContext,
        env: &ActionEnv,
    ) -> Result<StepResult> {
        wait(step, ctx, env).await
    }

    fn description(&self) -> &'static str {
        "等待指定时间 (seconds | milliseconds)"
    }

    fn manages_timeout(&self) -> bool {
        true
    }
}

action_handler!(
    GenerateRandomUuid,
    generate_random_uuid,
    "生成随机 UUID 写入 last_file_id (capture)"
);
action_handler!(
    CalculateChecksum,
    calculate_checksum,
    "计算内容的 SHA-256 校验和 (source)"
);

async fn wait(step: &Step, _ctx: &mut ExecutionContext, _env: &ActionEnv) -> Result<StepResult> {
    let duration = match step.u64_param("milliseconds")? {
        Some(ms) => Duration::from_millis(ms),
        None => {
            let seconds = step.f64_param("seconds")?.unwrap_or(1.0);
            Duration::try_from_secs_f64(seconds).map_err(|e| {
                ExecutorError::InvalidParameter(format!("无效的等待时间 {}: {}", seconds, e))
            })?
        }
    };

    debug!("等待 {} ms", duration.as_millis());
    tokio::time::sleep(duration).await;
    Ok(StepResult::passed(format!("等待 {} ms", duration.as_millis())))
}

async fn generate_random_uuid(
    step: &Step,
    ctx: &mut ExecutionContext,
    _env: &ActionEnv,
) -> Result<StepResult> {
    let id = Uuid::new_v4().to_string();

    let keys = step.str_list_param("capture")?;
    if keys.is_empty() {
        ctx.set("last_file_id", id.as_str());
    }
    for key in keys {
        ctx.set(key, id.as_str());
    }

    Ok(StepResult::passed(format!("生成 UUID {}", id)))
}

async fn calculate_checksum(
    step: &Step,
    ctx: &mut ExecutionContext,
    _env: &ActionEnv,
) -> Result<StepResult> {
    let source = source_key(step, ctx, &["current_file_content", "last_download_content"])?;
    let checksum = sha256_hex(ctx.bytes(source)?);

    for key in step.str_list_param("capture")? {
        ctx.set(key, checksum.as_str());
    }
    ctx.set("last_checksum", checksum.as_str());

    Ok(StepResult::passed(format!("{} 的校验和 {}", source, checksum)))
}
