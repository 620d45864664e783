//! 测试用例定义
//!
//! 用例文档格式:
//!
//! ```yaml
//! test_data:
//!   file_sizes: { minimum: 1048576, sample: 2097152 }
//! test_cases:            # 列表，或 分类 -> 列表 的映射
//!   file_upload:
//!     - id: TC-UP-001
//!       priority: P0
//!       name: Upload minimum size file
//!       endpoint: POST /files
//!       steps:
//!         - action: create_file
//!           size: minimum
//!         - action: upload
//!           expected_status: 201
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::{ExecutorError, Result};

/// 动作名称格式
const ACTION_NAME_PATTERN: &str = "^[a-z][a-z0-9_]*$";

/// 未在 `test_data.file_sizes` 中声明时使用的符号大小
const DEFAULT_FILE_SIZES: &[(&str, u64)] = &[
    ("minimum", 1024 * 1024),
    ("sample", 2 * 1024 * 1024),
    ("small", 512 * 1024),
    ("large", 5 * 1024 * 1024 * 1024),
    ("maximum", 10 * 1024 * 1024 * 1024),
    ("very_large", 11 * 1024 * 1024 * 1024),
];

/// 用例优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    #[default]
    P2,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::P0 => "P0",
            Priority::P1 => "P1",
            Priority::P2 => "P2",
        };
        f.write_str(s)
    }
}

impl FromStr for Priority {
    type Err = ExecutorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "P0" => Ok(Priority::P0),
            "P1" => Ok(Priority::P1),
            "P2" => Ok(Priority::P2),
            other => Err(ExecutorError::InvalidParameter(format!(
                "未知的优先级: {}",
                other
            ))),
        }
    }
}

/// 期望状态码 (单个或列表)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpectedStatus {
    One(u16),
    Any(Vec<u16>),
}

impl ExpectedStatus {
    pub fn accepts(&self, status: u16) -> bool {
        match self {
            ExpectedStatus::One(code) => *code == status,
            ExpectedStatus::Any(codes) => codes.contains(&status),
        }
    }
}

impl fmt::Display for ExpectedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedStatus::One(code) => write!(f, "{}", code),
            ExpectedStatus::Any(codes) => write!(f, "{:?}", codes),
        }
    }
}

/// 测试步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// 动作名称
    pub action: String,

    /// 步骤名称
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// 超时时间 (秒)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// 期望状态码
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_status: Option<ExpectedStatus>,

    /// 动作参数
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl Step {
    pub fn new(action: &str) -> Self {
        Self {
            action: action.to_string(),
            name: None,
            timeout: None,
            expected_status: None,
            params: Map::new(),
        }
    }

    /// 添加参数
    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// 设置期望状态码
    pub fn expecting(mut self, status: u16) -> Self {
        self.expected_status = Some(ExpectedStatus::One(status));
        self
    }

    /// 步骤显示名称
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.action)
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn has_param(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    /// 字符串参数 (null 视为未设置)
    pub fn str_param(&self, key: &str) -> Result<Option<&str>> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(invalid_type(&self.action, key, "字符串", other)),
        }
    }

    pub fn u64_param(&self, key: &str) -> Result<Option<u64>> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_u64()
                .map(Some)
                .ok_or_else(|| invalid_type(&self.action, key, "非负整数", v)),
        }
    }

    pub fn i64_param(&self, key: &str) -> Result<Option<i64>> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_i64()
                .map(Some)
                .ok_or_else(|| invalid_type(&self.action, key, "整数", v)),
        }
    }

    pub fn f64_param(&self, key: &str) -> Result<Option<f64>> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| invalid_type(&self.action, key, "数字", v)),
        }
    }

    pub fn bool_param(&self, key: &str) -> Result<bool> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(invalid_type(&self.action, key, "布尔值", other)),
        }
    }

    /// 字符串或字符串列表参数
    pub fn str_list_param(&self, key: &str) -> Result<Vec<String>> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::String(s)) => Ok(vec![s.clone()]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| invalid_type(&self.action, key, "字符串列表", item))
                })
                .collect(),
            Some(other) => Err(invalid_type(&self.action, key, "字符串列表", other)),
        }
    }
}

fn invalid_type(action: &str, key: &str, expected: &str, actual: &Value) -> ExecutorError {
    ExecutorError::InvalidParameter(format!(
        "动作 {} 的参数 {} 应为{}, 实际为 {}",
        action, key, expected, actual
    ))
}

/// 测试用例
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// 用例 ID (在套件内唯一)
    pub id: String,

    /// 优先级
    #[serde(default)]
    pub priority: Priority,

    /// 用例名称
    #[serde(default)]
    pub name: String,

    /// 目标接口描述 (例如 "POST /files")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// 分类 (分组文档中的分组名)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// 步骤列表
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// 全局测试数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestData {
    /// 符号大小 -> 字节数
    #[serde(default)]
    pub file_sizes: BTreeMap<String, u64>,
}

impl TestData {
    /// 解析文件大小：整数原样使用，字符串按符号名查表
    pub fn resolve_size(&self, size: &Value) -> Result<u64> {
        match size {
            Value::Number(n) => n.as_u64().ok_or_else(|| {
                ExecutorError::InvalidParameter(format!("文件大小必须为非负整数: {}", n))
            }),
            Value::String(name) => {
                if let Ok(bytes) = name.trim().parse::<u64>() {
                    return Ok(bytes);
                }
                self.file_sizes
                    .get(name)
                    .copied()
                    .or_else(|| {
                        DEFAULT_FILE_SIZES
                            .iter()
                            .find(|(symbol, _)| symbol == name)
                            .map(|(_, bytes)| *bytes)
                    })
                    .ok_or_else(|| {
                        ExecutorError::InvalidParameter(format!("未知的文件大小: {}", name))
                    })
            }
            other => Err(ExecutorError::InvalidParameter(format!(
                "无效的文件大小: {}",
                other
            ))),
        }
    }
}

/// 用例筛选条件
#[derive(Debug, Clone, Default)]
pub struct SuiteFilter {
    pub category: Option<String>,
    pub priority: Option<Priority>,
    pub ids: Vec<String>,
}

impl SuiteFilter {
    pub fn matches(&self, case: &TestCase) -> bool {
        if let Some(category) = &self.category {
            if case.category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if case.priority != priority {
                return false;
            }
        }
        self.ids.is_empty() || self.ids.iter().any(|id| id == &case.id)
    }
}

/// 测试套件
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Suite {
    /// 全局测试数据
    pub test_data: TestData,

    /// 用例 (按文档顺序)
    pub cases: Vec<TestCase>,
}

impl Suite {
    /// 从 YAML 文件加载套件
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// 从 YAML 字符串加载套件
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let doc: serde_yaml::Value = serde_yaml::from_str(yaml)
            .map_err(|e| ExecutorError::ConfigError(format!("用例文档解析失败: {}", e)))?;
        Self::from_document(doc)
    }

    /// 从 JSON 文件加载套件
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// 从 JSON 字符串加载套件
    pub fn from_json_str(json: &str) -> Result<Self> {
        // 经由 YAML 值解析，保持分组的文档顺序
        let doc: serde_yaml::Value = serde_json::from_str(json)
            .map_err(|e| ExecutorError::ConfigError(format!("用例文档解析失败: {}", e)))?;
        Self::from_document(doc)
    }

    /// 按扩展名加载 (.json 为 JSON，其余按 YAML)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => Self::from_json_file(path),
            _ => Self::from_yaml_file(path),
        }
    }

    fn from_document(doc: serde_yaml::Value) -> Result<Self> {
        let serde_yaml::Value::Mapping(mut root) = doc else {
            return Err(ExecutorError::ConfigError(
                "用例文档顶层必须是映射".to_string(),
            ));
        };

        let test_data = match root.remove("test_data") {
            Some(value) => serde_yaml::from_value::<TestData>(value)
                .map_err(|e| ExecutorError::ConfigError(format!("test_data 无效: {}", e)))?,
            None => TestData::default(),
        };

        let mut cases = Vec::new();
        match root.remove("test_cases") {
            None | Some(serde_yaml::Value::Null) => {}
            Some(serde_yaml::Value::Sequence(items)) => {
                for item in items {
                    cases.push(parse_case(item, None)?);
                }
            }
            Some(serde_yaml::Value::Mapping(groups)) => {
                for (category, items) in groups {
                    let category = category.as_str().map(str::to_string).ok_or_else(|| {
                        ExecutorError::ConfigError("用例分组名必须是字符串".to_string())
                    })?;
                    let serde_yaml::Value::Sequence(items) = items else {
                        return Err(ExecutorError::ConfigError(format!(
                            "用例分组 {} 必须是列表",
                            category
                        )));
                    };
                    for item in items {
                        cases.push(parse_case(item, Some(&category))?);
                    }
                }
            }
            Some(_) => {
                return Err(ExecutorError::ConfigError(
                    "test_cases 必须是列表或分组映射".to_string(),
                ))
            }
        }

        let suite = Suite { test_data, cases };
        suite.validate()?;
        Ok(suite)
    }

    /// 校验用例 ID 唯一且非空、动作名格式正确
    ///
    /// 不检查动作是否已注册，未注册的动作在执行时报错。
    pub fn validate(&self) -> Result<()> {
        let pattern = Regex::new(ACTION_NAME_PATTERN)
            .map_err(|e| ExecutorError::ConfigError(e.to_string()))?;
        let mut seen = HashSet::new();

        for case in &self.cases {
            if case.id.trim().is_empty() {
                return Err(ExecutorError::ConfigError(format!(
                    "用例 ID 不能为空 (名称: {})",
                    case.name
                )));
            }
            if !seen.insert(case.id.as_str()) {
                return Err(ExecutorError::ConfigError(format!(
                    "用例 ID 重复: {}",
                    case.id
                )));
            }
            for (index, step) in case.steps.iter().enumerate() {
                if !pattern.is_match(&step.action) {
                    return Err(ExecutorError::ConfigError(format!(
                        "用例 {} 第 {} 步的动作名无效: {:?}",
                        case.id,
                        index + 1,
                        step.action
                    )));
                }
            }
        }

        Ok(())
    }

    /// 导出为 YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| ExecutorError::SerdeError(e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// 按 ID 查找用例
    pub fn case(&self, id: &str) -> Option<&TestCase> {
        self.cases.iter().find(|c| c.id == id)
    }

    /// 所有分类 (按首次出现顺序)
    pub fn categories(&self) -> Vec<&str> {
        let mut categories: Vec<&str> = Vec::new();
        for category in self.cases.iter().filter_map(|c| c.category.as_deref()) {
            if !categories.contains(&category) {
                categories.push(category);
            }
        }
        categories
    }

    /// 筛选用例
    pub fn filter(&self, filter: &SuiteFilter) -> Suite {
        Suite {
            test_data: self.test_data.clone(),
            cases: self
                .cases
                .iter()
                .filter(|c| filter.matches(c))
                .cloned()
                .collect(),
        }
    }
}

fn parse_case(item: serde_yaml::Value, category: Option<&str>) -> Result<TestCase> {
    let id_hint = item
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or("<unknown>")
        .to_string();

    let mut case: TestCase = serde_yaml::from_value(item)
        .map_err(|e| ExecutorError::ConfigError(format!("用例 {} 解析失败: {}", id_hint, e)))?;

    if let Some(category) = category {
        case.category = Some(category.to_string());
    }
    Ok(case)
}
