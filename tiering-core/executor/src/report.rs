//! 执行报告

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::suite::{Priority, TestCase};
use crate::ExecutorError;

/// 步骤 / 用例结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
    Error,
}

impl Outcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, Outcome::Passed)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Passed => "PASSED",
            Outcome::Failed => "FAILED",
            Outcome::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// 步骤结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// 步骤索引 (并发 worker 为 worker 编号)
    pub index: usize,

    /// 动作名称
    pub action: String,

    /// 结果
    pub outcome: Outcome,

    /// 描述 (失败时包含字段、期望值与实际值)
    pub detail: String,

    /// 耗时（毫秒）
    pub duration_ms: u64,

    /// 本步骤写入上下文的值
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub captured: BTreeMap<String, Value>,

    /// 并发步骤的各 worker 结果 (按 worker 编号排序)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workers: Vec<StepResult>,
}

impl StepResult {
    fn with_outcome(outcome: Outcome, detail: impl Into<String>) -> Self {
        Self {
            index: 0,
            action: String::new(),
            outcome,
            detail: detail.into(),
            duration_ms: 0,
            captured: BTreeMap::new(),
            workers: Vec::new(),
        }
    }

    pub fn passed(detail: impl Into<String>) -> Self {
        Self::with_outcome(Outcome::Passed, detail)
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self::with_outcome(Outcome::Failed, detail)
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self::with_outcome(Outcome::Error, detail)
    }

    /// 由错误生成结果
    pub fn from_error(err: &ExecutorError) -> Self {
        Self::with_outcome(err.outcome(), err.to_string())
    }

    pub fn is_passed(&self) -> bool {
        self.outcome.is_passed()
    }
}

/// 用例报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseReport {
    /// 用例 ID
    pub id: String,

    /// 用例名称
    pub name: String,

    /// 优先级
    pub priority: Priority,

    /// 分类
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// 结论
    pub verdict: Outcome,

    /// 声明的步骤数
    pub steps_total: usize,

    /// 已执行步骤的结果 (按声明顺序)
    pub steps: Vec<StepResult>,

    /// 第一个未通过步骤的索引
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<usize>,

    /// 总耗时（毫秒）
    pub duration_ms: u64,

    /// 用例结束时的上下文快照
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

impl CaseReport {
    pub fn new(case: &TestCase) -> Self {
        Self {
            id: case.id.clone(),
            name: case.name.clone(),
            priority: case.priority,
            category: case.category.clone(),
            verdict: Outcome::Passed,
            steps_total: case.steps.len(),
            steps: Vec::new(),
            failed_step: None,
            duration_ms: 0,
            context: BTreeMap::new(),
        }
    }

    /// 添加步骤结果，第一个未通过的步骤决定用例结论
    pub fn add_step(&mut self, step: StepResult) {
        if !step.is_passed() && self.failed_step.is_none() {
            self.failed_step = Some(step.index);
            self.verdict = step.outcome;
        }
        self.steps.push(step);
    }

    /// 第一个未通过的步骤
    pub fn failure(&self) -> Option<&StepResult> {
        self.failed_step
            .and_then(|index| self.steps.iter().find(|s| s.index == index))
    }

    pub fn passed(&self) -> bool {
        self.verdict.is_passed()
    }
}

/// 套件报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    /// 开始时间
    pub started_at: DateTime<Utc>,

    /// 用例总数
    pub total: usize,

    /// 通过数
    pub passed: usize,

    /// 失败数
    pub failed: usize,

    /// 错误数
    pub errored: usize,

    /// 总耗时（毫秒）
    pub duration_ms: u64,

    /// 各用例报告
    pub cases: Vec<CaseReport>,
}

impl SuiteReport {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            total: 0,
            passed: 0,
            failed: 0,
            errored: 0,
            duration_ms: 0,
            cases: Vec::new(),
        }
    }

    pub fn add_case(&mut self, case: CaseReport) {
        self.total += 1;

        match case.verdict {
            Outcome::Passed => self.passed += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Error => self.errored += 1,
        }

        self.cases.push(case);
    }

    /// 是否全部通过
    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.errored == 0
    }

    /// 进程退出码 (全部通过为 0)
    pub fn exit_code(&self) -> i32 {
        if self.all_passed() {
            0
        } else {
            1
        }
    }

    /// 导出为 JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// 导出为 YAML
    pub fn to_yaml(&self) -> serde_yaml::Result<String> {
        serde_yaml::to_string(self)
    }
}

impl Default for SuiteReport {
    fn default() -> Self {
        Self::new()
    }
}
