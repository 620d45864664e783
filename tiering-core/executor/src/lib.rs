//! 分层存储测试执行引擎
//!
//! 读取声明式测试用例，按顺序把每个步骤分派给已注册的动作处理器，
//! 在步骤之间通过执行上下文传递捕获的值，并汇总用例结论。

pub mod actions;
pub mod context;
pub mod registry;
pub mod report;
pub mod runner;
pub mod settings;
pub mod suite;
pub mod verify;

pub use actions::{register_builtin, ActionEnv};
pub use context::{ContextSnapshot, ContextValue, ExecutionContext};
pub use registry::{ActionHandler, ActionRegistry};
pub use report::{CaseReport, Outcome, StepResult, SuiteReport};
pub use runner::TestRunner;
pub use settings::{ExecutorSettings, RetryPolicy};
pub use suite::{ExpectedStatus, Priority, Step, Suite, SuiteFilter, TestCase, TestData};
pub use verify::{check, check_bytes, Check, CheckMode};

use thiserror::Error;
use tiering_boundary::BoundaryError;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("未注册的动作: {0}")]
    UnknownAction(String),

    #[error("动作已注册: {0}")]
    ActionAlreadyRegistered(String),

    #[error("上下文中不存在键: {0}")]
    MissingContextKey(String),

    #[error("上下文键 {key} 类型不匹配: 期望 {expected}, 实际 {actual}")]
    ContextTypeMismatch {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("参数无效: {0}")]
    InvalidParameter(String),

    #[error("服务调用失败 [{}]: {}", .0.status_code(), .0.detail())]
    Boundary(#[from] BoundaryError),

    #[error("断言失败: {0}")]
    AssertionFailed(String),

    #[error("并发执行失败: {total} 个 worker 中 {failed} 个失败, {errored} 个错误")]
    WorkerFailure {
        total: usize,
        failed: usize,
        errored: usize,
    },

    #[error("超时: {0}")]
    Timeout(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    SerdeError(String),
}

impl ExecutorError {
    /// 错误对应的步骤结果
    ///
    /// 断言不匹配记为 Failed，其余均为 Error。
    pub fn outcome(&self) -> Outcome {
        match self {
            ExecutorError::AssertionFailed(_) => Outcome::Failed,
            ExecutorError::WorkerFailure { errored: 0, .. } => Outcome::Failed,
            _ => Outcome::Error,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
