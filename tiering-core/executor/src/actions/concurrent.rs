//! 并发动作
//!
//! 把一个基础动作扇出到 N 个 worker。每个 worker 拿到父上下文的副本，
//! 互不可见；全部结束后按 worker 编号顺序把写入合并回父上下文。
//! 同时运行的 worker 数不超过 `max_workers`。

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use super::ActionEnv;
use crate::context::{summarize, ContextValue, ExecutionContext};
use crate::registry::ActionHandler;
use crate::report::{Outcome, StepResult};
use crate::suite::Step;
use crate::{ExecutorError, Result};

/// 只由并发动作自身解释、不下发给 worker 的参数
const CONTROL_PARAMS: [&str; 4] = ["base_action", "count", "collect", "collect_into"];

/// worker 编号占位符
const WORKER_PLACEHOLDER: &str = "{worker}";

/// 从 worker 写入中收集的值
struct Collect {
    /// worker 写入的键
    key: &'static str,
    /// 父上下文中的列表键
    into: &'static str,
}

/// 并发动作
pub struct Concurrent {
    /// 基础动作 (None 时读取 `base_action` 参数)
    base: Option<&'static str>,

    /// 默认 worker 数 (None 时等于种子列表长度)
    default_count: Option<usize>,

    collect: Option<Collect>,

    /// 种子列表：第 i 个 worker 的 `file_id` 取列表第 i 项
    seed: Option<&'static str>,

    description: &'static str,
}

impl Concurrent {
    /// 通用并发动作 (base_action, count, collect, collect_into)
    pub fn generic() -> Self {
        Self {
            base: None,
            default_count: Some(1),
            collect: None,
            seed: None,
            description: "并发执行 base_action (count, collect, collect_into)",
        }
    }

    /// 并发上传，文件 ID 收集到 `concurrent_file_ids`
    pub fn upload() -> Self {
        Self {
            base: Some("upload_file"),
            default_count: Some(10),
            collect: Some(Collect {
                key: "last_file_id",
                into: "concurrent_file_ids",
            }),
            seed: None,
            description: "并发上传 count 个文件 (count, size), ID 写入 concurrent_file_ids",
        }
    }

    /// 并发下载同一个文件
    pub fn download() -> Self {
        Self {
            base: Some("download"),
            default_count: Some(10),
            collect: None,
            seed: None,
            description: "并发下载 count 次 (count, file_id)",
        }
    }

    /// 并发删除 `bulk_file_ids` 中的文件
    pub fn delete() -> Self {
        Self {
            base: Some("delete"),
            default_count: None,
            collect: Some(Collect {
                key: "deleted_file_ids",
                into: "deleted_file_ids",
            }),
            seed: Some("bulk_file_ids"),
            description: "并发删除 bulk_file_ids 中的文件 (count)",
        }
    }

    /// 并发触发分层任务
    pub fn tiering() -> Self {
        Self {
            base: Some("run_tiering"),
            default_count: Some(5),
            collect: None,
            seed: None,
            description: "并发触发 count 次分层任务 (count)",
        }
    }

    fn base_action<'a>(&self, step: &'a Step) -> Result<&'a str> {
        let base = match self.base {
            Some(base) => base,
            None => step.str_param("base_action")?.ok_or_else(|| {
                ExecutorError::InvalidParameter("concurrent 需要 base_action 参数".to_string())
            })?,
        };
        if base.starts_with("concurrent") {
            return Err(ExecutorError::InvalidParameter(format!(
                "不支持嵌套并发动作: {}",
                base
            )));
        }
        Ok(base)
    }

    /// 收集规则 (通用动作由参数声明)
    fn collect_rule(&self, step: &Step) -> Result<Option<(String, String)>> {
        if let Some(rule) = &self.collect {
            return Ok(Some((rule.key.to_string(), rule.into.to_string())));
        }
        let Some(key) = step.str_param("collect")? else {
            return Ok(None);
        };
        let into = step
            .str_param("collect_into")?
            .map(str::to_string)
            .unwrap_or_else(|| format!("concurrent_{}", key));
        Ok(Some((key.to_string(), into)))
    }
}

/// 替换参数中的 `{worker}` 占位符
fn substitute(value: &Value, worker: usize) -> Value {
    match value {
        Value::String(s) if s.contains(WORKER_PLACEHOLDER) => {
            Value::String(s.replace(WORKER_PLACEHOLDER, &worker.to_string()))
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, worker)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, worker)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// 构造第 `worker` 个 worker 执行的步骤
fn worker_step(step: &Step, base: &str, worker: usize, seed: Option<&String>) -> Step {
    let mut ws = Step::new(base);
    ws.expected_status = step.expected_status.clone();
    for (key, value) in &step.params {
        if CONTROL_PARAMS.contains(&key.as_str()) {
            continue;
        }
        ws.params.insert(key.clone(), substitute(value, worker));
    }
    if let Some(file_id) = seed {
        ws.params.insert("file_id".to_string(), Value::String(file_id.clone()));
    }
    ws
}

#[async_trait]
impl ActionHandler for Concurrent {
    async fn execute(
        &self,
        step: &Step,
        ctx: &mut ExecutionContext,
        env: &ActionEnv,
    ) -> Result<StepResult> {
        let base = self.base_action(step)?.to_string();
        let handler = env.registry.resolve(&base)?;

        let seeds = match self.seed {
            Some(key) => Some(ctx.text_list(key)?),
            None => None,
        };
        let default_count = self
            .default_count
            .or_else(|| seeds.as_ref().map(Vec::len))
            .unwrap_or(1);
        let count = env.count_param(step, default_count)?;
        if count == 0 {
            return Err(ExecutorError::InvalidParameter(format!(
                "{} 的 worker 数为 0",
                step.action
            )));
        }
        if let (Some(key), Some(seeds)) = (self.seed, &seeds) {
            if count > seeds.len() {
                return Err(ExecutorError::InvalidParameter(format!(
                    "需要 {} 个 worker, {} 只有 {} 项",
                    count,
                    key,
                    seeds.len()
                )));
            }
        }
        let collect = self.collect_rule(step)?;

        let limit = count.min(env.settings.max_workers.max(1));
        let semaphore = Arc::new(Semaphore::new(limit));
        let timeout = env.step_timeout(step);
        info!("{} 启动 {} 个 worker (并发上限 {})", base, count, limit);

        // worker 拿到许可后才从共享快照复制上下文
        let parent = Arc::new(ctx.child());
        let mut handles = Vec::new();
        for worker in 0..count {
            let ws = worker_step(step, &base, worker, seeds.as_ref().map(|s| &s[worker]));
            let parent = parent.clone();
            let env = env.clone();
            let handler = handler.clone();
            let semaphore = semaphore.clone();

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return (StepResult::error(format!("获取 worker 许可失败: {}", e)), Vec::new()),
                };
                let mut worker_ctx = parent.child();

                let started = Instant::now();
                let mut result =
                    match tokio::time::timeout(timeout, handler.execute(&ws, &mut worker_ctx, &env)).await {
                        Ok(Ok(result)) => result,
                        Ok(Err(e)) => StepResult::from_error(&e),
                        Err(_) => StepResult::from_error(&ExecutorError::Timeout(format!(
                            "worker {} 超过 {} 秒未完成",
                            worker,
                            timeout.as_secs()
                        ))),
                    };

                let writes = worker_ctx.take_writes();
                result.duration_ms = started.elapsed().as_millis() as u64;
                result.captured = summarize(writes.iter().map(|(k, v)| (k, v)));
                (result, writes)
            }));
        }

        drop(parent);
        let mut workers = Vec::new();
        let mut collected = Vec::new();
        for (worker, joined) in join_all(handles).await.into_iter().enumerate() {
            let (mut result, writes) = match joined {
                Ok(output) => output,
                Err(e) => {
                    warn!("worker {} 异常退出: {}", worker, e);
                    (StepResult::error(format!("worker 异常退出: {}", e)), Vec::new())
                }
            };
            result.index = worker;
            result.action = base.clone();

            if let Some((key, _)) = &collect {
                for (written, value) in &writes {
                    if written != key {
                        continue;
                    }
                    match value {
                        ContextValue::List(items) => collected.extend(items.iter().cloned()),
                        other => collected.push(other.clone()),
                    }
                }
            }
            ctx.merge(writes);
            workers.push(result);
        }

        if let Some((_, into)) = collect {
            ctx.set(into, ContextValue::List(collected));
        }

        let failed = workers.iter().filter(|w| w.outcome == Outcome::Failed).count();
        let errored = workers.iter().filter(|w| w.outcome == Outcome::Error).count();
        ctx.set(
            "last_concurrent_results",
            json!({
                "total": count,
                "passed": count - failed - errored,
                "failed": failed,
                "errored": errored,
            }),
        );

        let mut result = if failed + errored > 0 {
            let err = ExecutorError::WorkerFailure {
                total: count,
                failed,
                errored,
            };
            warn!("{}: {}", base, err);
            StepResult::from_error(&err)
        } else {
            StepResult::passed(format!("{} 个 {} worker 全部通过", count, base))
        };
        result.workers = workers;
        Ok(result)
    }

    fn description(&self) -> &'static str {
        self.description
    }

    fn manages_timeout(&self) -> bool {
        true
    }
}
