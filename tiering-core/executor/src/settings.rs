//! 执行器设置
//!
//! 支持从多个源加载:
//! - 环境变量 (优先级最高)
//! - 配置文件 (TOML/YAML/JSON)
//! - 默认值 (优先级最低)
//!
//! 配置文件搜索路径 (按优先级):
//! 1. `TIERTEST_CONFIG` 环境变量指定的路径
//! 2. `./tiertest.toml` / `./tiertest.yaml` (当前目录)
//! 3. `~/.config/tiertest/config.toml` (用户配置目录)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tiering_boundary::BoundaryConfig;

/// 执行器设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSettings {
    /// 被测服务连接配置
    #[serde(default)]
    pub service: BoundaryConfig,

    /// 默认步骤超时 (秒)
    #[serde(default = "default_step_timeout")]
    pub step_timeout: u64,

    /// 单次服务调用超时 (秒)
    #[serde(default = "default_call_timeout")]
    pub call_timeout: u64,

    /// 瞬时故障重试策略
    #[serde(default)]
    pub retry: RetryPolicy,

    /// 并发动作的最大 worker 数
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// 生成文件内容的最大字节数
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: u64,

    /// 批量与并发动作 `count` 参数的上限
    #[serde(default = "default_max_count")]
    pub max_count: usize,

    /// 日志级别 (debug/info/warn/error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// 重试策略 (只针对服务不可用)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 最大尝试次数 (含首次)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// 重试间隔 (毫秒)
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

// ============================================
// 默认值函数
// ============================================

fn default_step_timeout() -> u64 {
    300
}

fn default_call_timeout() -> u64 {
    30
}

fn default_max_workers() -> usize {
    16
}

fn default_max_payload_bytes() -> u64 {
    256 * 1024 * 1024
}

fn default_max_count() -> usize {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    200
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_retry_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// 不重试
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            delay_ms: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            service: BoundaryConfig::default(),
            step_timeout: default_step_timeout(),
            call_timeout: default_call_timeout(),
            retry: RetryPolicy::default(),
            max_workers: default_max_workers(),
            max_payload_bytes: default_max_payload_bytes(),
            max_count: default_max_count(),
            log_level: default_log_level(),
        }
    }
}

impl ExecutorSettings {
    /// 加载设置 (默认值 -> 配置文件 -> 环境变量)
    pub fn load() -> Result<Self> {
        let mut settings = match Self::find_config_file() {
            Some(path) => {
                tracing::debug!("加载执行器配置: {:?}", path);
                Self::load_from_file(&path)?
            }
            None => {
                tracing::debug!("未找到配置文件，使用默认配置");
                Self::default()
            }
        };

        settings.apply_env_vars()?;
        settings.validate()?;
        Ok(settings)
    }

    /// 从指定文件加载 (再应用环境变量覆盖)
    pub fn load_with_file(path: &Path) -> Result<Self> {
        let mut settings = Self::load_from_file(path)?;
        settings.apply_env_vars()?;
        settings.validate()?;
        Ok(settings)
    }

    /// 从指定文件加载，根据扩展名选择解析器
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {:?}", path))?;

        let settings = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::from_str(&content)
                .with_context(|| format!("解析 TOML 配置失败: {:?}", path))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("解析 YAML 配置失败: {:?}", path))?,
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("解析 JSON 配置失败: {:?}", path))?,
            _ => anyhow::bail!("不支持的配置文件格式: {:?}", path),
        };

        Ok(settings)
    }

    /// 查找配置文件 (按优先级搜索)
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(path) = env::var("TIERTEST_CONFIG") {
            let p = PathBuf::from(path);
            if p.exists() {
                return Some(p);
            }
        }

        let local = [
            PathBuf::from("./tiertest.toml"),
            PathBuf::from("./tiertest.yaml"),
        ];
        if let Some(path) = local.iter().find(|p| p.exists()) {
            return Some(path.clone());
        }

        dirs::home_dir()
            .map(|home| home.join(".config/tiertest/config.toml"))
            .filter(|p| p.exists())
    }

    /// 应用环境变量覆盖
    fn apply_env_vars(&mut self) -> Result<()> {
        if let Ok(url) = env::var("TIERTEST_BASE_URL") {
            self.service.base_url = url;
        }
        if let Ok(timeout) = env::var("TIERTEST_TIMEOUT") {
            self.step_timeout = timeout
                .parse()
                .context("TIERTEST_TIMEOUT 取值无效")?;
        }
        if let Ok(timeout) = env::var("TIERTEST_CALL_TIMEOUT") {
            self.call_timeout = timeout
                .parse()
                .context("TIERTEST_CALL_TIMEOUT 取值无效")?;
        }
        if let Ok(workers) = env::var("TIERTEST_MAX_WORKERS") {
            self.max_workers = workers
                .parse()
                .context("TIERTEST_MAX_WORKERS 取值无效")?;
        }
        if let Ok(level) = env::var("TIERTEST_LOG_LEVEL") {
            self.log_level = level;
        }
        Ok(())
    }

    /// 校验设置
    pub fn validate(&self) -> Result<()> {
        if self.step_timeout == 0 {
            anyhow::bail!("step_timeout 不能为 0");
        }
        if self.call_timeout == 0 {
            anyhow::bail!("call_timeout 不能为 0");
        }
        if self.max_workers == 0 {
            anyhow::bail!("max_workers 不能为 0");
        }
        if self.max_count == 0 {
            anyhow::bail!("max_count 不能为 0");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts 不能为 0");
        }
        if self.service.base_url.is_empty() {
            anyhow::bail!("service.base_url 不能为空");
        }
        Ok(())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout)
    }
}
