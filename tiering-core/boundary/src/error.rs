//! 服务边界错误定义

use thiserror::Error;

/// 服务边界错误类型
///
/// 每个变体对应一个约定的 HTTP 状态码，见 [`BoundaryError::status_code`]。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoundaryError {
    #[error("资源不存在: {0}")]
    NotFound(String),

    #[error("请求无效 [{status}]: {detail}")]
    InvalidInput { status: u16, detail: String },

    #[error("调用超时: {0}")]
    Timeout(String),

    #[error("服务不可用: {0}")]
    Unavailable(String),
}

impl BoundaryError {
    /// 构造 400 请求无效错误
    pub fn invalid(detail: impl Into<String>) -> Self {
        BoundaryError::InvalidInput {
            status: 400,
            detail: detail.into(),
        }
    }

    /// 对应的 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            BoundaryError::NotFound(_) => 404,
            BoundaryError::InvalidInput { status, .. } => *status,
            BoundaryError::Timeout(_) => 408,
            BoundaryError::Unavailable(_) => 503,
        }
    }

    /// 错误详情 (服务端返回的 detail)
    pub fn detail(&self) -> &str {
        match self {
            BoundaryError::NotFound(d)
            | BoundaryError::Timeout(d)
            | BoundaryError::Unavailable(d) => d,
            BoundaryError::InvalidInput { detail, .. } => detail,
        }
    }

    /// 是否为可重试的瞬时错误
    pub fn is_transient(&self) -> bool {
        matches!(self, BoundaryError::Unavailable(_))
    }

    /// 根据 HTTP 状态码和响应详情构造错误
    pub fn from_status(status: u16, detail: String) -> Self {
        match status {
            404 => BoundaryError::NotFound(detail),
            408 | 504 => BoundaryError::Timeout(detail),
            400..=499 => BoundaryError::InvalidInput { status, detail },
            _ => BoundaryError::Unavailable(detail),
        }
    }
}

/// 服务边界结果类型
pub type Result<T> = std::result::Result<T, BoundaryError>;
