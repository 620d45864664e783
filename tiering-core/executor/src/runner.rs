//! 用例执行器

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use tiering_boundary::TieringService;

use crate::actions::ActionEnv;
use crate::context::{summarize, ExecutionContext};
use crate::registry::ActionRegistry;
use crate::report::{CaseReport, StepResult, SuiteReport};
use crate::settings::ExecutorSettings;
use crate::suite::{Step, Suite, TestCase, TestData};
use crate::ExecutorError;

/// 用例执行器
///
/// 用例之间、步骤之间都严格顺序执行。每个用例拥有独立的执行上下文，
/// 第一个未通过的步骤终止该用例，后续用例照常执行。
pub struct TestRunner {
    /// 被测服务
    service: Arc<dyn TieringService>,

    /// 动作注册表
    registry: Arc<ActionRegistry>,

    /// 执行设置
    settings: Arc<ExecutorSettings>,
}

impl TestRunner {
    /// 创建新的用例执行器 (使用默认设置)
    pub fn new(service: Arc<dyn TieringService>, registry: Arc<ActionRegistry>) -> Self {
        Self {
            service,
            registry,
            settings: Arc::new(ExecutorSettings::default()),
        }
    }

    /// 设置执行设置
    pub fn with_settings(mut self, settings: ExecutorSettings) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    /// 设置默认步骤超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let mut settings = (*self.settings).clone();
        settings.step_timeout = timeout.as_secs().max(1);
        self.settings = Arc::new(settings);
        self
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// 执行整个套件
    pub async fn run_suite(&self, suite: &Suite) -> SuiteReport {
        self.run_suite_with(suite, |_| {}).await
    }

    /// 执行整个套件，每个用例结束后回调 (用于进度显示)
    pub async fn run_suite_with<F>(&self, suite: &Suite, mut on_case: F) -> SuiteReport
    where
        F: FnMut(&CaseReport),
    {
        let start_time = Instant::now();
        let test_data = Arc::new(suite.test_data.clone());
        let mut report = SuiteReport::new();

        info!(
            "开始执行套件: {} 个用例, 服务 {}",
            suite.len(),
            self.service.name()
        );

        for case in &suite.cases {
            let case_report = self.run_case(case, test_data.clone()).await;
            on_case(&case_report);
            report.add_case(case_report);
        }

        report.duration_ms = start_time.elapsed().as_millis() as u64;
        info!(
            "套件执行完成: 通过 {}, 失败 {}, 错误 {} (耗时 {} ms)",
            report.passed, report.failed, report.errored, report.duration_ms
        );
        report
    }

    /// 执行单个用例
    pub async fn run_case(&self, case: &TestCase, test_data: Arc<TestData>) -> CaseReport {
        let start_time = Instant::now();
        let mut report = CaseReport::new(case);
        let mut ctx = ExecutionContext::new();
        let env = ActionEnv {
            service: self.service.clone(),
            registry: self.registry.clone(),
            settings: self.settings.clone(),
            test_data,
        };

        info!("开始执行用例: {} {}", case.id, case.name);

        for (index, step) in case.steps.iter().enumerate() {
            debug!("[{}] 步骤 {}: {}", case.id, index + 1, step.display_name());

            let result = self.execute_step(step, index, &mut ctx, &env).await;
            let passed = result.is_passed();

            if !passed {
                error!(
                    "[{}] 步骤 {} ({}) {}: {}",
                    case.id,
                    index + 1,
                    step.action,
                    result.outcome,
                    result.detail
                );
            }
            report.add_step(result);

            if !passed {
                let skipped = case.steps.len() - index - 1;
                if skipped > 0 {
                    warn!("[{}] 跳过剩余 {} 个步骤", case.id, skipped);
                }
                break;
            }
        }

        report.context = summarize(&ctx.snapshot());
        report.duration_ms = start_time.elapsed().as_millis() as u64;

        info!(
            "用例 {} 结束: {} (耗时 {} ms)",
            case.id, report.verdict, report.duration_ms
        );
        report
    }

    /// 执行单个步骤
    ///
    /// 错误不会向外传播，全部转换为 Failed / Error 结果。
    async fn execute_step(
        &self,
        step: &Step,
        index: usize,
        ctx: &mut ExecutionContext,
        env: &ActionEnv,
    ) -> StepResult {
        let start_time = Instant::now();

        let outcome = match self.registry.resolve(&step.action) {
            Err(e) => Err(e),
            Ok(handler) if handler.manages_timeout() => handler.execute(step, ctx, env).await,
            Ok(handler) => {
                let step_timeout = env.step_timeout(step);
                match timeout(step_timeout, handler.execute(step, ctx, env)).await {
                    Ok(result) => result,
                    Err(_) => Err(ExecutorError::Timeout(format!(
                        "步骤 {} 超过 {} 秒未完成",
                        step.display_name(),
                        step_timeout.as_secs()
                    ))),
                }
            }
        };

        let mut result = match outcome {
            Ok(result) => result,
            Err(e) => StepResult::from_error(&e),
        };

        let writes = ctx.take_writes();
        result.index = index;
        result.action = step.action.clone();
        result.duration_ms = start_time.elapsed().as_millis() as u64;
        result.captured = summarize(writes.iter().map(|(k, v)| (k, v)));
        result
    }
}
