//! 执行上下文
//!
//! 每个测试用例独享一个上下文：用例开始时为空，用例结束时丢弃。
//! 步骤把捕获的值写入上下文，后续步骤按键读取。
//!
//! 上下文记录自上次 [`ExecutionContext::take_writes`] 以来写入的键，
//! 这份写入日志既是步骤报告里的捕获内容，也是并发 worker 合并回父上下文的单位。

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::{ExecutorError, Result};

/// 上下文中的值
#[derive(Debug, Clone, PartialEq)]
pub enum ContextValue {
    Text(String),
    Integer(i64),
    Bytes(Vec<u8>),
    List(Vec<ContextValue>),
    Record(Value),
}

impl ContextValue {
    /// 值的类型名称 (用于类型不匹配错误)
    pub fn kind(&self) -> &'static str {
        match self {
            ContextValue::Text(_) => "text",
            ContextValue::Integer(_) => "integer",
            ContextValue::Bytes(_) => "bytes",
            ContextValue::List(_) => "list",
            ContextValue::Record(_) => "record",
        }
    }

    /// 将可序列化的结构保存为记录
    pub fn record<T: Serialize>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(ContextValue::Record)
            .map_err(|e| ExecutorError::SerdeError(e.to_string()))
    }

    /// 从 JSON 值转换：字符串与整数保持原类型，其余保存为记录
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::String(s) => ContextValue::Text(s),
            Value::Number(n) if n.is_i64() => ContextValue::Integer(n.as_i64().unwrap_or_default()),
            other => ContextValue::Record(other),
        }
    }

    /// 转换为 JSON 值，字节内容只保留长度摘要
    pub fn to_json(&self) -> Value {
        match self {
            ContextValue::Text(s) => Value::String(s.clone()),
            ContextValue::Integer(i) => Value::from(*i),
            ContextValue::Bytes(b) => Value::String(format!("<{} bytes>", b.len())),
            ContextValue::List(items) => Value::Array(items.iter().map(|v| v.to_json()).collect()),
            ContextValue::Record(v) => v.clone(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContextValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::Text(value)
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::Text(value.to_string())
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        ContextValue::Integer(value)
    }
}

impl From<Vec<u8>> for ContextValue {
    fn from(value: Vec<u8>) -> Self {
        ContextValue::Bytes(value)
    }
}

impl From<Vec<ContextValue>> for ContextValue {
    fn from(value: Vec<ContextValue>) -> Self {
        ContextValue::List(value)
    }
}

impl From<Vec<String>> for ContextValue {
    fn from(value: Vec<String>) -> Self {
        ContextValue::List(value.into_iter().map(ContextValue::Text).collect())
    }
}

impl From<Value> for ContextValue {
    fn from(value: Value) -> Self {
        ContextValue::Record(value)
    }
}

/// 上下文快照 (只读副本)
pub type ContextSnapshot = BTreeMap<String, ContextValue>;

/// 将快照或捕获内容转换为可报告的 JSON
pub fn summarize<'a, I>(entries: I) -> BTreeMap<String, Value>
where
    I: IntoIterator<Item = (&'a String, &'a ContextValue)>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect()
}

/// 执行上下文
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    values: HashMap<String, ContextValue>,

    /// 写入日志 (按写入顺序，同一个键只保留最后一次)
    writes: Vec<String>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 基于当前内容创建子上下文，子上下文的写入日志为空
    pub fn child(&self) -> Self {
        Self {
            values: self.values.clone(),
            writes: Vec::new(),
        }
    }

    /// 写入值，已存在的键被覆盖
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) {
        let key = key.into();
        self.writes.retain(|k| k != &key);
        self.writes.push(key.clone());
        self.values.insert(key, value.into());
    }

    /// 读取值
    pub fn get(&self, key: &str) -> Result<&ContextValue> {
        self.values
            .get(key)
            .ok_or_else(|| ExecutorError::MissingContextKey(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn text(&self, key: &str) -> Result<&str> {
        match self.get(key)? {
            ContextValue::Text(s) => Ok(s),
            other => Err(mismatch(key, "text", other)),
        }
    }

    pub fn integer(&self, key: &str) -> Result<i64> {
        match self.get(key)? {
            ContextValue::Integer(i) => Ok(*i),
            other => Err(mismatch(key, "integer", other)),
        }
    }

    pub fn bytes(&self, key: &str) -> Result<&[u8]> {
        match self.get(key)? {
            ContextValue::Bytes(b) => Ok(b),
            other => Err(mismatch(key, "bytes", other)),
        }
    }

    pub fn list(&self, key: &str) -> Result<&[ContextValue]> {
        match self.get(key)? {
            ContextValue::List(items) => Ok(items),
            other => Err(mismatch(key, "list", other)),
        }
    }

    pub fn record(&self, key: &str) -> Result<&Value> {
        match self.get(key)? {
            ContextValue::Record(v) => Ok(v),
            other => Err(mismatch(key, "record", other)),
        }
    }

    /// 读取字符串列表 (例如批量上传得到的文件 ID)
    pub fn text_list(&self, key: &str) -> Result<Vec<String>> {
        self.list(key)?
            .iter()
            .map(|item| {
                item.as_text()
                    .map(str::to_string)
                    .ok_or_else(|| mismatch(key, "list of text", item))
            })
            .collect()
    }

    /// 只读快照
    pub fn snapshot(&self) -> ContextSnapshot {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// 取出并清空写入日志
    pub fn take_writes(&mut self) -> Vec<(String, ContextValue)> {
        std::mem::take(&mut self.writes)
            .into_iter()
            .filter_map(|key| self.values.get(&key).cloned().map(|v| (key, v)))
            .collect()
    }

    /// 合并其他上下文的写入 (按给定顺序，后写入者覆盖)
    pub fn merge(&mut self, updates: Vec<(String, ContextValue)>) {
        for (key, value) in updates {
            self.set(key, value);
        }
    }
}

fn mismatch(key: &str, expected: &'static str, actual: &ContextValue) -> ExecutorError {
    ExecutorError::ContextTypeMismatch {
        key: key.to_string(),
        expected,
        actual: actual.kind(),
    }
}
