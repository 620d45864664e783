//! 分层存储通用类型定义
//!
//! 此 crate 包含被测分层存储服务 (boundary) 与执行引擎 (executor) 之间共享的类型。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// 进入 WARM 层的空闲天数阈值
pub const WARM_AFTER_DAYS: i64 = 30;

/// 进入 COLD 层的空闲天数阈值
pub const COLD_AFTER_DAYS: i64 = 90;

/// 存储层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    /// 热数据层 (新上传或近期访问)
    Hot,
    /// 温数据层
    Warm,
    /// 冷数据层
    Cold,
}

impl Tier {
    /// 所有层级 (按温度从高到低)
    pub const ALL: [Tier; 3] = [Tier::Hot, Tier::Warm, Tier::Cold];

    /// 层级名称 (与服务端返回的字符串一致)
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Hot => "HOT",
            Tier::Warm => "WARM",
            Tier::Cold => "COLD",
        }
    }

    /// 根据空闲天数计算应处的层级
    pub fn for_idle_days(days: i64) -> Self {
        if days >= COLD_AFTER_DAYS {
            Tier::Cold
        } else if days >= WARM_AFTER_DAYS {
            Tier::Warm
        } else {
            Tier::Hot
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HOT" => Ok(Tier::Hot),
            "WARM" => Ok(Tier::Warm),
            "COLD" => Ok(Tier::Cold),
            other => Err(format!("未知的存储层级: {}", other)),
        }
    }
}

/// 文件元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// 文件 ID
    pub file_id: String,

    /// 文件名
    pub filename: String,

    /// 文件大小 (字节)
    pub size: u64,

    /// 内容类型
    pub content_type: String,

    /// 当前所在层级
    pub tier: Tier,

    /// 创建时间
    pub created_at: DateTime<Utc>,

    /// 最后访问时间
    pub last_accessed: DateTime<Utc>,
}

/// 上传回执 (POST /files 的 201 响应)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadReceipt {
    /// 新文件 ID
    pub file_id: String,

    /// 文件名
    pub filename: String,

    /// 文件大小 (字节)
    pub size: u64,

    /// 内容类型
    pub content_type: String,

    /// 分配的层级
    pub tier: Tier,

    /// 创建时间
    pub created_at: DateTime<Utc>,
}

/// 单个层级的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierStats {
    /// 文件数量
    pub count: u64,

    /// 总大小 (字节)
    pub size: u64,
}

/// 系统统计 (GET /admin/stats)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    /// 文件总数
    pub total_files: u64,

    /// 总大小 (字节)
    pub total_size: u64,

    /// 各层级统计 (键为层级名称)
    #[serde(default)]
    pub tiers: BTreeMap<String, TierStats>,
}

impl SystemStats {
    /// 各层级文件数之和
    pub fn tier_count_sum(&self) -> u64 {
        self.tiers.values().map(|t| t.count).sum()
    }

    /// 各层级大小之和
    pub fn tier_size_sum(&self) -> u64 {
        self.tiers.values().map(|t| t.size).sum()
    }

    /// 获取某个层级的统计 (不存在时为零)
    pub fn tier(&self, tier: Tier) -> TierStats {
        self.tiers.get(tier.as_str()).copied().unwrap_or_default()
    }
}

/// 分层任务执行结果 (POST /admin/tiering/run)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TieringSummary {
    /// 检查的文件数
    pub files_evaluated: u64,

    /// 发生层级迁移的文件数
    pub files_moved: u64,

    /// 迁移到各层级的文件数 (键为目标层级名称)
    #[serde(default)]
    pub moved_to: BTreeMap<String, u64>,
}

/// 错误响应体 (服务端 4xx/5xx 返回的 `{"detail": ...}`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// 错误详情
    #[serde(default)]
    pub detail: String,
}

impl ErrorBody {
    /// 从响应文本中提取错误详情，非 JSON 时原样返回
    pub fn detail_from_text(text: &str) -> String {
        serde_json::from_str::<ErrorBody>(text)
            .map(|body| body.detail)
            .unwrap_or_else(|_| text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_for_idle_days() {
        assert_eq!(Tier::for_idle_days(0), Tier::Hot);
        assert_eq!(Tier::for_idle_days(29), Tier::Hot);
        assert_eq!(Tier::for_idle_days(30), Tier::Warm);
        assert_eq!(Tier::for_idle_days(35), Tier::Warm);
        assert_eq!(Tier::for_idle_days(90), Tier::Cold);
        assert_eq!(Tier::for_idle_days(95), Tier::Cold);
    }

    #[test]
    fn test_tier_serde_uppercase() {
        let json = serde_json::to_string(&Tier::Warm).unwrap();
        assert_eq!(json, "\"WARM\"");
        let tier: Tier = serde_json::from_str("\"COLD\"").unwrap();
        assert_eq!(tier, Tier::Cold);
        assert_eq!("hot".parse::<Tier>().unwrap(), Tier::Hot);
        assert!("LUKEWARM".parse::<Tier>().is_err());
    }

    #[test]
    fn test_stats_sums() {
        let mut stats = SystemStats::default();
        stats.tiers.insert("HOT".into(), TierStats { count: 2, size: 20 });
        stats.tiers.insert("COLD".into(), TierStats { count: 1, size: 5 });
        assert_eq!(stats.tier_count_sum(), 3);
        assert_eq!(stats.tier_size_sum(), 25);
        assert_eq!(stats.tier(Tier::Warm), TierStats::default());
    }

    #[test]
    fn test_error_detail_from_text() {
        assert_eq!(
            ErrorBody::detail_from_text(r#"{"detail":"File too small"}"#),
            "File too small"
        );
        assert_eq!(ErrorBody::detail_from_text("plain"), "plain");
    }
}
