//! 管理动作

use tracing::info;

use super::{action_handler, settle, ActionEnv, Settled, STATUS_OK};
use crate::context::{ContextValue, ExecutionContext};
use crate::report::StepResult;
use crate::suite::Step;
use crate::Result;

action_handler!(RunTiering, run_tiering, "触发一次分层任务 (capture)");
action_handler!(GetStats, get_stats, "查询系统统计 (capture)");

async fn run_tiering(step: &Step, ctx: &mut ExecutionContext, env: &ActionEnv) -> Result<StepResult> {
    let result = env.service.run_tiering(env.call_timeout()).await;

    let summary = match settle(step, ctx, result, STATUS_OK)? {
        Settled::Success(summary) => summary,
        Settled::ExpectedFailure(r) => return Ok(r),
    };

    let record = ContextValue::record(&summary)?;
    for key in step.str_list_param("capture")? {
        ctx.set(key, record.clone());
    }
    ctx.set("last_tiering_response", record);

    info!(
        "分层任务完成: 检查 {} 个文件, 迁移 {} 个",
        summary.files_evaluated, summary.files_moved
    );
    Ok(StepResult::passed(format!(
        "检查 {} 个文件, 迁移 {} 个",
        summary.files_evaluated, summary.files_moved
    )))
}

async fn get_stats(step: &Step, ctx: &mut ExecutionContext, env: &ActionEnv) -> Result<StepResult> {
    let timeout = env.call_timeout();
    let result = env
        .call_with_retry("查询统计", || env.service.stats(timeout))
        .await;

    let stats = match settle(step, ctx, result, STATUS_OK)? {
        Settled::Success(stats) => stats,
        Settled::ExpectedFailure(r) => return Ok(r),
    };

    let record = ContextValue::record(&stats)?;
    for key in step.str_list_param("capture")? {
        ctx.set(key, record.clone());
    }
    ctx.set("last_stats", record);

    Ok(StepResult::passed(format!(
        "共 {} 个文件, {} 字节",
        stats.total_files, stats.total_size
    )))
}
