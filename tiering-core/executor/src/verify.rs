//! 校验引擎
//!
//! 所有比较策略集中在这里，校验类动作只负责取值并选择比较模式。
//! 引擎不会根据值的形状猜测比较方式：每次调用都显式给出 [`CheckMode`]。

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::HashSet;

use crate::{ExecutorError, Result};

/// 比较模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    /// 完全相等 (数字按数值比较)
    Exact,
    /// 字段存在且非 null
    FieldPresence,
    /// 实际值大于基线，`by` 指定时差值必须恰好相等
    NumericIncrease { by: Option<i64> },
    /// 实际值小于基线，`by` 指定时差值必须恰好相等
    NumericDecrease { by: Option<i64> },
    /// 实际值列表中没有重复元素，期望值为数字时同时校验元素个数
    AllDistinct,
    /// 期望值包含于实际值 (子串或子集)
    SubsetContainment,
}

/// 单次比较结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub passed: bool,
    pub detail: String,
}

impl Check {
    fn pass(detail: String) -> Self {
        Self {
            passed: true,
            detail,
        }
    }

    fn fail(detail: String) -> Self {
        Self {
            passed: false,
            detail,
        }
    }

    /// 失败时转换为断言错误
    pub fn into_result(self) -> Result<String> {
        if self.passed {
            Ok(self.detail)
        } else {
            Err(ExecutorError::AssertionFailed(self.detail))
        }
    }
}

/// 依次检查，返回第一个失败；全部通过时合并描述
pub fn all(checks: impl IntoIterator<Item = Check>) -> Result<String> {
    let mut details = Vec::new();
    for check in checks {
        details.push(check.into_result()?);
    }
    Ok(details.join("; "))
}

/// 比较期望值与实际值
pub fn check(field: &str, expected: &Value, actual: &Value, mode: CheckMode) -> Check {
    match mode {
        CheckMode::Exact => {
            if values_equal(expected, actual) {
                Check::pass(format!("{} = {}", field, actual))
            } else {
                Check::fail(format!(
                    "字段 {}: 期望 {}, 实际 {}",
                    field, expected, actual
                ))
            }
        }
        CheckMode::FieldPresence => {
            if actual.is_null() {
                Check::fail(format!("字段 {}: 期望存在, 实际缺失", field))
            } else {
                Check::pass(format!("{} 存在", field))
            }
        }
        CheckMode::NumericIncrease { by } => numeric(field, expected, actual, by, true),
        CheckMode::NumericDecrease { by } => numeric(field, expected, actual, by, false),
        CheckMode::AllDistinct => distinct(field, expected, actual),
        CheckMode::SubsetContainment => {
            if contains(actual, expected) {
                Check::pass(format!("{} 包含 {}", field, expected))
            } else {
                Check::fail(format!(
                    "字段 {}: 期望包含 {}, 实际 {}",
                    field, expected, actual
                ))
            }
        }
    }
}

/// 逐字节比较
pub fn check_bytes(field: &str, expected: &[u8], actual: &[u8]) -> Check {
    if expected == actual {
        return Check::pass(format!("{}: {} 字节一致", field, actual.len()));
    }
    if expected.len() != actual.len() {
        return Check::fail(format!(
            "字段 {}: 期望 {} 字节, 实际 {} 字节",
            field,
            expected.len(),
            actual.len()
        ));
    }
    let offset = expected
        .iter()
        .zip(actual)
        .position(|(a, b)| a != b)
        .unwrap_or_default();
    Check::fail(format!(
        "字段 {}: 第 {} 字节不同, 期望 {:#04x}, 实际 {:#04x}",
        field, offset, expected[offset], actual[offset]
    ))
}

/// 按点分路径取值，例如 `tiers.HOT.count`
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// 解析时间戳 (RFC 3339，或不带时区的 ISO 8601 按 UTC 处理)
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// 数值或时间戳 (时间戳按微秒)
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .or_else(|| parse_timestamp(s).map(|t| t.timestamp_micros() as f64)),
        _ => None,
    }
}

fn values_equal(expected: &Value, actual: &Value) -> bool {
    if expected == actual {
        return true;
    }
    match (expected, actual) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::String(s), other @ (Value::Number(_) | Value::Bool(_)))
        | (other @ (Value::Number(_) | Value::Bool(_)), Value::String(s)) => {
            other.to_string() == *s
        }
        _ => false,
    }
}

fn numeric(field: &str, baseline: &Value, actual: &Value, by: Option<i64>, increase: bool) -> Check {
    let (Some(base), Some(now)) = (as_number(baseline), as_number(actual)) else {
        return Check::fail(format!(
            "字段 {}: 无法按数值比较, 基线 {}, 实际 {}",
            field, baseline, actual
        ));
    };

    let delta = if increase { now - base } else { base - now };
    let direction = if increase { "增加" } else { "减少" };

    if delta <= 0.0 {
        return Check::fail(format!(
            "字段 {}: 期望{}, 基线 {}, 实际 {}",
            field, direction, baseline, actual
        ));
    }
    if let Some(by) = by {
        if delta != by as f64 {
            return Check::fail(format!(
                "字段 {}: 期望{} {}, 实际{} {} (基线 {}, 实际 {})",
                field, direction, by, direction, delta, baseline, actual
            ));
        }
    }
    Check::pass(format!("{} {} {}", field, direction, delta))
}

fn distinct(field: &str, expected: &Value, actual: &Value) -> Check {
    let Value::Array(items) = actual else {
        return Check::fail(format!("字段 {}: 期望列表, 实际 {}", field, actual));
    };

    if let Some(count) = expected.as_u64() {
        if items.len() as u64 != count {
            return Check::fail(format!(
                "字段 {}: 期望 {} 个元素, 实际 {} 个",
                field,
                count,
                items.len()
            ));
        }
    }

    let mut seen = HashSet::new();
    for item in items {
        if !seen.insert(item.to_string()) {
            return Check::fail(format!(
                "字段 {}: 存在重复值 {} (共 {} 个元素)",
                field,
                item,
                items.len()
            ));
        }
    }
    Check::pass(format!("{}: {} 个值互不相同", field, items.len()))
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match (expected, actual) {
        (Value::String(needle), Value::String(haystack)) => haystack
            .to_lowercase()
            .contains(&needle.to_lowercase()),
        (Value::Array(needles), Value::Array(haystack)) => needles
            .iter()
            .all(|n| haystack.iter().any(|h| values_equal(n, h))),
        (needle, Value::Array(haystack)) => haystack.iter().any(|h| values_equal(needle, h)),
        (needle, other) => values_equal(needle, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exact() {
        assert!(check("tier", &json!("HOT"), &json!("HOT"), CheckMode::Exact).passed);
        assert!(check("size", &json!(1048576), &json!(1048576.0), CheckMode::Exact).passed);
        assert!(check("size", &json!("10"), &json!(10), CheckMode::Exact).passed);

        let failed = check("tier", &json!("HOT"), &json!("WARM"), CheckMode::Exact);
        assert!(!failed.passed);
        assert!(failed.detail.contains("tier"));
        assert!(failed.detail.contains("HOT"));
        assert!(failed.detail.contains("WARM"));
    }

    #[test]
    fn test_presence() {
        assert!(check("file_id", &Value::Null, &json!("x"), CheckMode::FieldPresence).passed);
        assert!(!check("file_id", &Value::Null, &Value::Null, CheckMode::FieldPresence).passed);
    }

    #[test]
    fn test_numeric_decrease_exact_delta() {
        let mode = CheckMode::NumericDecrease { by: Some(3) };
        assert!(check("total_files", &json!(10), &json!(7), mode).passed);
        assert!(!check("total_files", &json!(10), &json!(8), mode).passed);
        assert!(!check("total_files", &json!(10), &json!(10), mode).passed);
        assert!(check("total_files", &json!(10), &json!(8), CheckMode::NumericDecrease { by: None }).passed);
    }

    #[test]
    fn test_numeric_increase_timestamps() {
        let mode = CheckMode::NumericIncrease { by: None };
        let t0 = json!("2024-01-01T00:00:00.000001Z");
        let t1 = json!("2024-01-01T00:00:00.000002+00:00");
        assert!(check("last_accessed", &t0, &t1, mode).passed);
        assert!(!check("last_accessed", &t1, &t0, mode).passed);

        let naive = json!("2024-01-01T00:00:01.5");
        assert!(check("last_accessed", &t0, &naive, mode).passed);
        assert!(!check("x", &json!("abc"), &json!(1), mode).passed);
    }

    #[test]
    fn test_all_distinct_names_duplicate() {
        let ok = check("ids", &json!(3), &json!(["a", "b", "c"]), CheckMode::AllDistinct);
        assert!(ok.passed);

        let dup = check("ids", &Value::Null, &json!(["a", "b", "a"]), CheckMode::AllDistinct);
        assert!(!dup.passed);
        assert!(dup.detail.contains("\"a\""));

        let short = check("ids", &json!(4), &json!(["a", "b"]), CheckMode::AllDistinct);
        assert!(!short.passed);
    }

    #[test]
    fn test_subset_containment() {
        let mode = CheckMode::SubsetContainment;
        assert!(check("detail", &json!("content type"), &json!("Invalid or missing Content Type"), mode).passed);
        assert!(check("types", &json!(["a/b"]), &json!(["a/b", "c/d"]), mode).passed);
        assert!(!check("types", &json!(["x/y"]), &json!(["a/b"]), mode).passed);
        assert!(check("tier", &json!("COLD"), &json!(["HOT", "WARM", "COLD"]), mode).passed);
    }

    #[test]
    fn test_check_bytes() {
        assert!(check_bytes("content", b"abc", b"abc").passed);
        let diff = check_bytes("content", b"abc", b"abd");
        assert!(!diff.passed);
        assert!(diff.detail.contains("第 2 字节"));
        assert!(!check_bytes("content", b"abc", b"ab").passed);
    }

    #[test]
    fn test_lookup_and_all() {
        let stats = json!({"tiers": {"HOT": {"count": 2}}, "ids": ["a"]});
        assert_eq!(lookup(&stats, "tiers.HOT.count"), Some(&json!(2)));
        assert_eq!(lookup(&stats, "ids.0"), Some(&json!("a")));
        assert_eq!(lookup(&stats, "tiers.COLD.count"), None);

        let result = all([
            check("a", &json!(1), &json!(1), CheckMode::Exact),
            check("b", &json!(1), &json!(2), CheckMode::Exact),
        ]);
        assert!(matches!(result, Err(ExecutorError::AssertionFailed(d)) if d.contains("字段 b")));
    }
}
