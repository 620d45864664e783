//! CLI 配置加载
//!
//! 执行器设置来自 `--config` 指定的文件，未指定时按默认搜索路径查找
//! (见 [`ExecutorSettings::load`])。

use anyhow::{Context, Result};
use std::path::PathBuf;

use tiering_executor::ExecutorSettings;

/// 展开路径中的 `~` 和环境变量
pub fn expand_path(path: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(path).with_context(|| format!("无法展开路径: {}", path))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

/// 加载执行器设置，`base_url` 覆盖配置文件和环境变量
pub fn load_settings(config: Option<&str>, base_url: Option<&str>) -> Result<ExecutorSettings> {
    let mut settings = match config {
        Some(path) => {
            let path = expand_path(path)?;
            ExecutorSettings::load_with_file(&path)
                .with_context(|| format!("加载配置文件失败: {:?}", path))?
        }
        None => ExecutorSettings::load().context("加载执行器配置失败")?,
    };

    if let Some(url) = base_url {
        settings.service.base_url = url.to_string();
    }
    settings.validate()?;
    Ok(settings)
}
