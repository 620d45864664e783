//! CLI 命令处理模块

pub mod actions;
pub mod list;
pub mod output;
pub mod run;

use anyhow::{Context, Result};
use std::str::FromStr;

use tiering_executor::{Priority, Suite, SuiteFilter};

use crate::config::expand_path;
use crate::FilterArgs;

/// 加载套件并按命令行条件筛选
pub fn load_suite(path: &str, filter: &FilterArgs) -> Result<Suite> {
    let path = expand_path(path)?;
    let suite = Suite::from_file(&path).with_context(|| format!("加载套件失败: {:?}", path))?;

    let priority = filter
        .priority
        .as_deref()
        .map(Priority::from_str)
        .transpose()?;

    Ok(suite.filter(&SuiteFilter {
        category: filter.category.clone(),
        priority,
        ids: filter.ids.clone(),
    }))
}
