//! 元数据动作

use serde_json::Value;
use tracing::{debug, info};

use tiering_common::{COLD_AFTER_DAYS, WARM_AFTER_DAYS};

use super::{action_handler, settle, target_file_id, ActionEnv, Settled, STATUS_OK};
use crate::context::{ContextValue, ExecutionContext};
use crate::report::StepResult;
use crate::suite::Step;
use crate::verify::{self, CheckMode};
use crate::{ExecutorError, Result};

action_handler!(GetMetadata, get_metadata, "查询文件元数据 (file_id, capture, verify)");
action_handler!(
    UpdateLastAccessed,
    update_last_accessed,
    "修改最后访问时间为 days_ago 天前 (file_id, days_ago)"
);
action_handler!(MoveToCold, move_to_cold, "经 WARM 把文件迁移到 COLD 层 (file_id)");

/// 捕获键对应的元数据字段 (去掉 `_t0` / `_t1` 后缀)
fn captured_field(key: &str) -> &str {
    key.strip_suffix("_t0")
        .or_else(|| key.strip_suffix("_t1"))
        .unwrap_or(key)
}

fn capture_metadata(step: &Step, ctx: &mut ExecutionContext, record: &Value) -> Result<()> {
    match step.param("capture") {
        None | Some(Value::Null) => Ok(()),
        Some(Value::String(key)) => {
            ctx.set(key.as_str(), ContextValue::Record(record.clone()));
            Ok(())
        }
        Some(Value::Array(_)) => {
            for key in step.str_list_param("capture")? {
                let field = captured_field(&key);
                let value = verify::lookup(record, field).ok_or_else(|| {
                    ExecutorError::InvalidParameter(format!("元数据中没有字段 {}", field))
                })?;
                ctx.set(key.as_str(), ContextValue::from_json(value.clone()));
            }
            Ok(())
        }
        Some(other) => Err(ExecutorError::InvalidParameter(format!(
            "capture 应为字符串或列表, 实际为 {}",
            other
        ))),
    }
}

/// 按 `verify` 参数检查元数据字段
///
/// 字段名列表只检查存在性；映射按值精确比较。
fn verify_metadata(step: &Step, record: &Value) -> Result<Option<String>> {
    let checks = match step.param("verify") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Array(_)) => step
            .str_list_param("verify")?
            .iter()
            .map(|field| {
                let actual = verify::lookup(record, field).unwrap_or(&Value::Null);
                verify::check(field, &Value::Null, actual, CheckMode::FieldPresence)
            })
            .collect::<Vec<_>>(),
        Some(Value::Object(fields)) => fields
            .iter()
            .map(|(field, expected)| {
                let actual = verify::lookup(record, field).unwrap_or(&Value::Null);
                verify::check(field, expected, actual, CheckMode::Exact)
            })
            .collect(),
        Some(other) => {
            return Err(ExecutorError::InvalidParameter(format!(
                "verify 应为字段列表或映射, 实际为 {}",
                other
            )))
        }
    };
    verify::all(checks).map(Some)
}

async fn get_metadata(step: &Step, ctx: &mut ExecutionContext, env: &ActionEnv) -> Result<StepResult> {
    let file_id = target_file_id(step, ctx)?;
    let timeout = env.call_timeout();

    let result = env
        .call_with_retry("查询元数据", || env.service.metadata(&file_id, timeout))
        .await;

    let metadata = match settle(step, ctx, result, STATUS_OK)? {
        Settled::Success(metadata) => metadata,
        Settled::ExpectedFailure(r) => return Ok(r),
    };

    let record = serde_json::to_value(&metadata)
        .map_err(|e| ExecutorError::SerdeError(e.to_string()))?;
    ctx.set("last_metadata", ContextValue::Record(record.clone()));
    capture_metadata(step, ctx, &record)?;

    let mut detail = format!("{}: {} ({} 字节)", file_id, metadata.tier, metadata.size);
    if let Some(verified) = verify_metadata(step, &record)? {
        detail = format!("{}; {}", detail, verified);
    }
    Ok(StepResult::passed(detail))
}

async fn update_last_accessed(
    step: &Step,
    ctx: &mut ExecutionContext,
    env: &ActionEnv,
) -> Result<StepResult> {
    let file_id = target_file_id(step, ctx)?;
    let days_ago = step.i64_param("days_ago")?.unwrap_or(0);

    let result = env
        .service
        .update_last_accessed(&file_id, days_ago, env.call_timeout())
        .await;

    let metadata = match settle(step, ctx, result, STATUS_OK)? {
        Settled::Success(metadata) => metadata,
        Settled::ExpectedFailure(r) => return Ok(r),
    };

    let record = serde_json::to_value(&metadata)
        .map_err(|e| ExecutorError::SerdeError(e.to_string()))?;
    ctx.set("last_metadata", ContextValue::Record(record.clone()));
    capture_metadata(step, ctx, &record)?;

    debug!("{} 最后访问时间改为 {} 天前", file_id, days_ago);
    Ok(StepResult::passed(format!(
        "{} 最后访问时间改为 {} 天前",
        file_id, days_ago
    )))
}

async fn move_to_cold(step: &Step, ctx: &mut ExecutionContext, env: &ActionEnv) -> Result<StepResult> {
    let file_id = target_file_id(step, ctx)?;
    let timeout = env.call_timeout();

    // 先进入 WARM，再进入 COLD
    for days_ago in [WARM_AFTER_DAYS + 5, COLD_AFTER_DAYS + 5] {
        env.service
            .update_last_accessed(&file_id, days_ago, timeout)
            .await?;
        let summary = env.service.run_tiering(timeout).await?;
        ctx.set("last_tiering_response", ContextValue::record(&summary)?);
    }

    let metadata = env
        .call_with_retry("查询元数据", || env.service.metadata(&file_id, timeout))
        .await?;
    ctx.set("last_metadata", ContextValue::record(&metadata)?);

    info!("{} 已迁移到 {}", file_id, metadata.tier);
    Ok(StepResult::passed(format!("{} 当前层级 {}", file_id, metadata.tier)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_captured_field() {
        assert_eq!(captured_field("last_accessed_t0"), "last_accessed");
        assert_eq!(captured_field("last_accessed_t1"), "last_accessed");
        assert_eq!(captured_field("tier"), "tier");
    }

    #[test]
    fn test_capture_list() {
        let step = Step::new("get_metadata").with_param("capture", json!(["tier", "size_t0"]));
        let mut ctx = ExecutionContext::new();
        capture_metadata(&step, &mut ctx, &json!({"tier": "HOT", "size": 5})).unwrap();
        assert_eq!(ctx.text("tier").unwrap(), "HOT");
        assert_eq!(ctx.integer("size_t0").unwrap(), 5);

        let missing = Step::new("get_metadata").with_param("capture", json!(["owner"]));
        assert!(capture_metadata(&missing, &mut ctx, &json!({})).is_err());
    }

    #[test]
    fn test_verify_metadata() {
        let record = json!({"file_id": "a", "tier": "HOT"});

        let presence = Step::new("get_metadata").with_param("verify", json!(["file_id", "tier"]));
        assert!(verify_metadata(&presence, &record).unwrap().is_some());

        let missing = Step::new("get_metadata").with_param("verify", json!(["checksum"]));
        assert!(matches!(
            verify_metadata(&missing, &record),
            Err(ExecutorError::AssertionFailed(_))
        ));

        let exact = Step::new("get_metadata").with_param("verify", json!({"tier": "COLD"}));
        assert!(verify_metadata(&exact, &record).is_err());
        assert!(verify_metadata(&Step::new("get_metadata"), &record).unwrap().is_none());
    }
}
