//! 校验动作
//!
//! 校验动作不修改被测服务中的资源。比较全部委托给 [`crate::verify`]，
//! 每个动作固定使用一种比较模式。

use serde_json::{json, Value};

use tiering_boundary::{BoundaryError, SystemStats, Tier};

use super::{action_handler, sha256_hex, source_key, target_file_id, ActionEnv};
use crate::context::ExecutionContext;
use crate::report::StepResult;
use crate::suite::Step;
use crate::verify::{self, check, check_bytes, CheckMode};
use crate::{ExecutorError, Result};

action_handler!(VerifyResponse, verify_response, "检查最近一次响应的字段 (fields, source)");
action_handler!(VerifyError, verify_error, "检查最近一次错误响应 (message_contains, status)");
action_handler!(VerifyTier, verify_tier, "检查文件所在层级 (tier, file_id)");
action_handler!(
    VerifyContentMatch,
    verify_content_match,
    "检查下载内容与上传内容逐字节一致"
);
action_handler!(
    VerifyChecksumMatch,
    verify_checksum_match,
    "检查下载内容的校验和与上传时一致"
);
action_handler!(
    VerifyLastAccessedUpdated,
    verify_last_accessed_updated,
    "下载文件并检查最后访问时间增加 (file_id)"
);
action_handler!(
    VerifyTimestampIncreased,
    verify_timestamp_increased,
    "检查两个捕获的时间戳递增 (before, after)"
);
action_handler!(VerifyStats, verify_stats, "检查系统统计 (expected_files, expected_size)");
action_handler!(
    VerifyStatsDecreased,
    verify_stats_decreased,
    "检查文件数减少 files 个 (before, after, files)"
);
action_handler!(
    VerifyIncrement,
    verify_increment,
    "检查文件数增加 files 个 (before, after, files)"
);
action_handler!(
    VerifyDecrement,
    verify_decrement,
    "检查文件数减少 files 个, 默认比较上传后与删除后 (before, after, files)"
);
action_handler!(
    VerifyContentTypes,
    verify_content_types,
    "检查 upload_multiple 上传文件的内容类型"
);
action_handler!(VerifyUniqueIds, verify_unique_ids, "检查文件 ID 互不相同 (source, count)");
action_handler!(
    VerifyIdsDifferent,
    verify_ids_different,
    "检查两个文件 ID 不同 (first, second)"
);
action_handler!(VerifyAllDeleted, verify_all_deleted, "检查文件均已删除 (source)");
action_handler!(
    VerifyTierStats,
    verify_tier_stats,
    "检查各层级统计 (all_zero, hot/warm/cold: {count, size})"
);
action_handler!(
    VerifyTierDistribution,
    verify_tier_distribution,
    "检查各层级数量与大小之和等于总数"
);
action_handler!(
    VerifyConsistentState,
    verify_consistent_state,
    "检查实时统计一致且跟踪的文件均可访问"
);
action_handler!(
    VerifyTieringResults,
    verify_tiering_results,
    "检查跟踪的文件都处于有效层级 (tier)"
);
action_handler!(
    VerifyAllSuccess,
    verify_all_success,
    "检查上一个并发步骤的 worker 全部通过"
);

fn field<'a>(value: &'a Value, path: &str) -> &'a Value {
    verify::lookup(value, path).unwrap_or(&Value::Null)
}

fn stats_from(ctx: &ExecutionContext, key: &str) -> Result<SystemStats> {
    serde_json::from_value(ctx.record(key)?.clone())
        .map_err(|e| ExecutorError::SerdeError(format!("{} 不是系统统计: {}", key, e)))
}

/// 跟踪的文件 ID：批量上传的文件，没有时为最近一次上传的文件
fn tracked_file_ids(ctx: &ExecutionContext) -> Result<Vec<String>> {
    if ctx.contains("bulk_file_ids") {
        ctx.text_list("bulk_file_ids")
    } else {
        Ok(vec![ctx.text("last_file_id")?.to_string()])
    }
}

fn distribution_checks(stats: &SystemStats) -> Vec<verify::Check> {
    vec![
        check(
            "tiers.count 之和",
            &json!(stats.total_files),
            &json!(stats.tier_count_sum()),
            CheckMode::Exact,
        ),
        check(
            "tiers.size 之和",
            &json!(stats.total_size),
            &json!(stats.tier_size_sum()),
            CheckMode::Exact,
        ),
    ]
}

async fn verify_response(step: &Step, ctx: &mut ExecutionContext, _env: &ActionEnv) -> Result<StepResult> {
    let source = source_key(
        step,
        ctx,
        &["last_upload_response", "last_tiering_response", "last_stats"],
    )?;
    let response = ctx.get(source)?.to_json();

    let Some(Value::Object(fields)) = step.param("fields") else {
        return Err(ExecutorError::InvalidParameter(
            "verify_response 需要 fields 映射".to_string(),
        ));
    };

    let detail = verify::all(
        fields
            .iter()
            .map(|(name, expected)| check(name, expected, field(&response, name), CheckMode::Exact)),
    )?;
    Ok(StepResult::passed(detail))
}

async fn verify_error(step: &Step, ctx: &mut ExecutionContext, _env: &ActionEnv) -> Result<StepResult> {
    let response = ctx.record("last_error_response")?;

    let mut checks = Vec::new();
    if let Some(status) = step.u64_param("status")? {
        checks.push(check("status", &json!(status), field(response, "status"), CheckMode::Exact));
    }
    if let Some(message) = step.str_param("message_contains")? {
        checks.push(check(
            "detail",
            &json!(message),
            field(response, "detail"),
            CheckMode::SubsetContainment,
        ));
    }
    if checks.is_empty() {
        checks.push(check("detail", &Value::Null, field(response, "detail"), CheckMode::FieldPresence));
    }

    Ok(StepResult::passed(verify::all(checks)?))
}

async fn verify_tier(step: &Step, ctx: &mut ExecutionContext, env: &ActionEnv) -> Result<StepResult> {
    let file_id = target_file_id(step, ctx)?;
    let expected: Tier = step
        .str_param("tier")?
        .unwrap_or("HOT")
        .parse()
        .map_err(ExecutorError::InvalidParameter)?;

    let timeout = env.call_timeout();
    let metadata = env
        .call_with_retry("查询元数据", || env.service.metadata(&file_id, timeout))
        .await?;

    let detail = check(
        "tier",
        &json!(expected.as_str()),
        &json!(metadata.tier.as_str()),
        CheckMode::Exact,
    )
    .into_result()?;
    Ok(StepResult::passed(format!("{}: {}", file_id, detail)))
}

async fn verify_content_match(
    _step: &Step,
    ctx: &mut ExecutionContext,
    _env: &ActionEnv,
) -> Result<StepResult> {
    let uploaded = ctx.bytes("current_file_content")?;
    let downloaded = ctx.bytes("last_download_content")?;
    let detail = check_bytes("content", uploaded, downloaded).into_result()?;
    Ok(StepResult::passed(detail))
}

async fn verify_checksum_match(
    _step: &Step,
    ctx: &mut ExecutionContext,
    _env: &ActionEnv,
) -> Result<StepResult> {
    let expected = ctx.text("last_checksum")?;
    let actual = sha256_hex(ctx.bytes("last_download_content")?);
    let detail = check("checksum", &json!(expected), &json!(actual), CheckMode::Exact).into_result()?;
    Ok(StepResult::passed(detail))
}

/// 下载前后各查一次元数据，比较 `last_accessed`
///
/// 与其他校验动作不同，这里的下载会刷新被测文件的最后访问时间，
/// 即改变服务端状态。之后依赖访问时间的步骤 (例如分层) 需要考虑这一点。
async fn verify_last_accessed_updated(
    step: &Step,
    ctx: &mut ExecutionContext,
    env: &ActionEnv,
) -> Result<StepResult> {
    let file_id = target_file_id(step, ctx)?;
    let timeout = env.call_timeout();

    let before = env
        .call_with_retry("查询元数据", || env.service.metadata(&file_id, timeout))
        .await?;
    env.call_with_retry("下载文件", || env.service.download(&file_id, timeout))
        .await?;
    let after = env
        .call_with_retry("查询元数据", || env.service.metadata(&file_id, timeout))
        .await?;

    let detail = check(
        "last_accessed",
        &json!(before.last_accessed),
        &json!(after.last_accessed),
        CheckMode::NumericIncrease { by: None },
    )
    .into_result()?;
    Ok(StepResult::passed(detail))
}

async fn verify_timestamp_increased(
    step: &Step,
    ctx: &mut ExecutionContext,
    _env: &ActionEnv,
) -> Result<StepResult> {
    let before_key = step.str_param("before")?.unwrap_or("last_accessed_t0");
    let after_key = step.str_param("after")?.unwrap_or("last_accessed_t1");

    let before = ctx.get(before_key)?.to_json();
    let after = ctx.get(after_key)?.to_json();

    let detail = check(
        after_key,
        &before,
        &after,
        CheckMode::NumericIncrease { by: None },
    )
    .into_result()?;
    Ok(StepResult::passed(detail))
}

async fn verify_stats(step: &Step, ctx: &mut ExecutionContext, _env: &ActionEnv) -> Result<StepResult> {
    let source = step.str_param("source")?.unwrap_or("last_stats");
    let stats = ctx.record(source)?;

    let mut checks = Vec::new();
    if let Some(files) = step.u64_param("expected_files")? {
        checks.push(check("total_files", &json!(files), field(stats, "total_files"), CheckMode::Exact));
    }
    if let Some(size) = step.u64_param("expected_size")? {
        checks.push(check("total_size", &json!(size), field(stats, "total_size"), CheckMode::Exact));
    }
    if checks.is_empty() {
        checks.push(check("total_files", &Value::Null, field(stats, "total_files"), CheckMode::FieldPresence));
    }

    Ok(StepResult::passed(verify::all(checks)?))
}

/// 比较两份统计快照的文件数
fn compare_file_counts(
    step: &Step,
    ctx: &ExecutionContext,
    default_before: &str,
    default_after: &str,
    increase: bool,
) -> Result<StepResult> {
    let before_key = step.str_param("before")?.unwrap_or(default_before);
    let after_key = step.str_param("after")?.unwrap_or(default_after);
    let files = step.i64_param("files")?.unwrap_or(1);

    let before = ctx.record(before_key)?;
    let after = ctx.record(after_key)?;

    let mode = if increase {
        CheckMode::NumericIncrease { by: Some(files) }
    } else {
        CheckMode::NumericDecrease { by: Some(files) }
    };

    let detail = check(
        "total_files",
        field(before, "total_files"),
        field(after, "total_files"),
        mode,
    )
    .into_result()?;
    Ok(StepResult::passed(format!("{} -> {}: {}", before_key, after_key, detail)))
}

async fn verify_stats_decreased(
    step: &Step,
    ctx: &mut ExecutionContext,
    _env: &ActionEnv,
) -> Result<StepResult> {
    compare_file_counts(step, ctx, "stats_before", "stats_after", false)
}

async fn verify_increment(step: &Step, ctx: &mut ExecutionContext, _env: &ActionEnv) -> Result<StepResult> {
    compare_file_counts(step, ctx, "baseline", "after_upload", true)
}

async fn verify_decrement(step: &Step, ctx: &mut ExecutionContext, _env: &ActionEnv) -> Result<StepResult> {
    compare_file_counts(step, ctx, "after_upload", "after_delete", false)
}

async fn verify_content_types(
    _step: &Step,
    ctx: &mut ExecutionContext,
    env: &ActionEnv,
) -> Result<StepResult> {
    let uploaded: Vec<Value> = ctx
        .list("uploaded_files")?
        .iter()
        .map(|item| item.to_json())
        .collect();
    let timeout = env.call_timeout();

    let mut checks = Vec::with_capacity(uploaded.len());
    for file in &uploaded {
        let file_id = field(file, "file_id").as_str().unwrap_or_default().to_string();
        let metadata = env
            .call_with_retry("查询元数据", || env.service.metadata(&file_id, timeout))
            .await?;
        checks.push(check(
            &format!("{}.content_type", file_id),
            &json!([field(file, "content_type")]),
            &json!([metadata.content_type]),
            CheckMode::SubsetContainment,
        ));
    }

    verify::all(checks)?;
    Ok(StepResult::passed(format!("{} 个文件的内容类型正确", uploaded.len())))
}

async fn verify_unique_ids(step: &Step, ctx: &mut ExecutionContext, _env: &ActionEnv) -> Result<StepResult> {
    let source = source_key(step, ctx, &["concurrent_file_ids", "bulk_file_ids"])?;
    let ids = ctx.get(source)?.to_json();
    let expected = step
        .u64_param("count")?
        .map(Value::from)
        .unwrap_or(Value::Null);

    let detail = check(source, &expected, &ids, CheckMode::AllDistinct).into_result()?;
    Ok(StepResult::passed(detail))
}

async fn verify_ids_different(
    step: &Step,
    ctx: &mut ExecutionContext,
    _env: &ActionEnv,
) -> Result<StepResult> {
    let first = step.str_param("first")?.unwrap_or("file_id_a");
    let second = step.str_param("second")?.unwrap_or("file_id_b");

    let ids = json!([ctx.text(first)?, ctx.text(second)?]);
    let detail = check(
        &format!("{}, {}", first, second),
        &json!(2),
        &ids,
        CheckMode::AllDistinct,
    )
    .into_result()?;
    Ok(StepResult::passed(detail))
}

async fn verify_all_deleted(step: &Step, ctx: &mut ExecutionContext, env: &ActionEnv) -> Result<StepResult> {
    let source = step.str_param("source")?.unwrap_or("bulk_file_ids");
    let ids = ctx.text_list(source)?;
    let timeout = env.call_timeout();

    let mut checks = Vec::with_capacity(ids.len());
    for file_id in &ids {
        let status = match env
            .call_with_retry("查询元数据", || env.service.metadata(file_id, timeout))
            .await
        {
            Ok(_) => 200,
            Err(BoundaryError::NotFound(_)) => 404,
            Err(e) => return Err(e.into()),
        };
        checks.push(check(
            &format!("{} 状态", file_id),
            &json!(404),
            &json!(status),
            CheckMode::Exact,
        ));
    }

    verify::all(checks)?;
    Ok(StepResult::passed(format!("{} 个文件均已删除", ids.len())))
}

async fn verify_tier_stats(step: &Step, ctx: &mut ExecutionContext, _env: &ActionEnv) -> Result<StepResult> {
    let source = step.str_param("source")?.unwrap_or("last_stats");
    let stats = stats_from(ctx, source)?;

    let mut checks = Vec::new();
    if step.bool_param("all_zero")? {
        for tier in Tier::ALL {
            let t = stats.tier(tier);
            checks.push(check(&format!("tiers.{}.count", tier), &json!(0), &json!(t.count), CheckMode::Exact));
            checks.push(check(&format!("tiers.{}.size", tier), &json!(0), &json!(t.size), CheckMode::Exact));
        }
    }

    for tier in Tier::ALL {
        let key = tier.as_str().to_lowercase();
        let Some(expected) = step.param(&key) else {
            continue;
        };
        let actual = stats.tier(tier);
        for (name, value) in [("count", actual.count), ("size", actual.size)] {
            if let Some(want) = expected.get(name) {
                checks.push(check(
                    &format!("tiers.{}.{}", tier, name),
                    want,
                    &json!(value),
                    CheckMode::Exact,
                ));
            }
        }
    }

    Ok(StepResult::passed(verify::all(checks)?))
}

async fn verify_tier_distribution(
    step: &Step,
    ctx: &mut ExecutionContext,
    _env: &ActionEnv,
) -> Result<StepResult> {
    let source = step.str_param("source")?.unwrap_or("last_stats");
    let stats = stats_from(ctx, source)?;
    Ok(StepResult::passed(verify::all(distribution_checks(&stats))?))
}

async fn verify_consistent_state(
    _step: &Step,
    ctx: &mut ExecutionContext,
    env: &ActionEnv,
) -> Result<StepResult> {
    let timeout = env.call_timeout();
    let stats = env
        .call_with_retry("查询统计", || env.service.stats(timeout))
        .await?;
    let mut checks = distribution_checks(&stats);

    let ids = if ctx.contains("bulk_file_ids") {
        ctx.text_list("bulk_file_ids")?
    } else {
        Vec::new()
    };
    for file_id in &ids {
        let resolved = match env
            .call_with_retry("查询元数据", || env.service.metadata(file_id, timeout))
            .await
        {
            Ok(metadata) => json!(metadata.file_id),
            Err(BoundaryError::NotFound(_)) => Value::Null,
            Err(e) => return Err(e.into()),
        };
        checks.push(check(file_id, &Value::Null, &resolved, CheckMode::FieldPresence));
    }

    verify::all(checks)?;
    Ok(StepResult::passed(format!(
        "统计一致, {} 个跟踪文件均可访问",
        ids.len()
    )))
}

async fn verify_tiering_results(
    step: &Step,
    ctx: &mut ExecutionContext,
    env: &ActionEnv,
) -> Result<StepResult> {
    let expected = match step.str_param("tier")? {
        Some(tier) => Some(tier.parse::<Tier>().map_err(ExecutorError::InvalidParameter)?),
        None => None,
    };
    let ids = tracked_file_ids(ctx)?;
    let known: Vec<&str> = Tier::ALL.iter().map(|t| t.as_str()).collect();
    let timeout = env.call_timeout();

    let mut checks = Vec::with_capacity(ids.len());
    for file_id in &ids {
        let metadata = env
            .call_with_retry("查询元数据", || env.service.metadata(file_id, timeout))
            .await?;
        let name = format!("{}.tier", file_id);
        checks.push(match expected {
            Some(tier) => check(&name, &json!(tier.as_str()), &json!(metadata.tier.as_str()), CheckMode::Exact),
            None => check(&name, &json!(metadata.tier.as_str()), &json!(known), CheckMode::SubsetContainment),
        });
    }

    verify::all(checks)?;
    Ok(StepResult::passed(format!("{} 个文件层级有效", ids.len())))
}

async fn verify_all_success(_step: &Step, ctx: &mut ExecutionContext, _env: &ActionEnv) -> Result<StepResult> {
    let results = ctx.record("last_concurrent_results")?;
    let detail = check(
        "passed",
        field(results, "total"),
        field(results, "passed"),
        CheckMode::Exact,
    )
    .into_result()?;
    Ok(StepResult::passed(detail))
}
