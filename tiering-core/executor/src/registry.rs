//! 动作注册表

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::actions::ActionEnv;
use crate::context::ExecutionContext;
use crate::report::StepResult;
use crate::suite::Step;
use crate::{ExecutorError, Result};

/// 动作处理器
///
/// 所有动作必须实现此 trait。处理器通过 `ctx` 读写执行上下文，
/// 通过 `env` 访问被测服务、注册表和执行设置。
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// 执行动作
    ///
    /// 返回 `Err` 时由执行器按错误类型转换为 Failed / Error 结果。
    async fn execute(
        &self,
        step: &Step,
        ctx: &mut ExecutionContext,
        env: &ActionEnv,
    ) -> Result<StepResult>;

    /// 动作说明
    fn description(&self) -> &'static str {
        ""
    }

    /// 是否自行管理超时 (并发动作按 worker 施加超时)
    fn manages_timeout(&self) -> bool {
        false
    }
}

/// 动作注册表
///
/// 动作名 -> 处理器。构建完成后以 `Arc` 共享，不再修改。
#[derive(Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建包含全部内置动作的注册表
    pub fn with_builtin() -> Result<Self> {
        let mut registry = Self::new();
        crate::actions::register_builtin(&mut registry)?;
        info!("已注册 {} 个内置动作", registry.len());
        Ok(registry)
    }

    /// 注册动作
    pub fn register(&mut self, name: &str, handler: Arc<dyn ActionHandler>) -> Result<()> {
        debug!("注册动作: {}", name);

        if self.handlers.contains_key(name) {
            return Err(ExecutorError::ActionAlreadyRegistered(name.to_string()));
        }

        self.handlers.insert(name.to_string(), handler);
        Ok(())
    }

    /// 注销动作
    pub fn unregister(&mut self, name: &str) -> Result<()> {
        self.handlers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ExecutorError::UnknownAction(name.to_string()))
    }

    /// 查找动作处理器
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ActionHandler>> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| ExecutorError::UnknownAction(name.to_string()))
    }

    /// 列出所有已注册的动作 (按名称排序)
    pub fn list(&self) -> Vec<(&str, &'static str)> {
        let mut names: Vec<(&str, &'static str)> = self
            .handlers
            .iter()
            .map(|(name, handler)| (name.as_str(), handler.description()))
            .collect();
        names.sort_by_key(|(name, _)| *name);
        names
    }

    /// 检查动作是否已注册
    pub fn is_registered(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
