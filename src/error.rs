//! 失效通知错误类型定义
//!
//! - 查找类错误（分类、记录、集合缺失）在 Hook 内降级为空值，不会中断写入
//! - 传输类错误按重试策略处理，最终记录为 `Unreachable`
//! - 配置错误在启动阶段直接返回，宿主进程应拒绝启动

use thiserror::Error;

/// 失效通知错误类型
#[derive(Debug, Error)]
pub enum RevalidateError {
    /// 分类未找到
    #[error("Category not found: {0}")]
    CategoryNotFound(String),

    /// 记录未找到
    #[error("Record not found: {collection}/{id}")]
    RecordNotFound { collection: String, id: String },

    /// 集合未找到
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// 网络层发送失败（连接拒绝、超时、DNS 失败）
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// 下游返回非 2xx 状态码
    #[error("Remote rejected revalidation with status {status}")]
    RemoteRejection { status: u16 },

    /// 重试耗尽后路由仍不可达
    #[error("Route unreachable: {route}: {reason}")]
    Unreachable { route: String, reason: String },

    /// 配置错误
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 存储引擎错误
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl RevalidateError {
    pub fn configuration<T: Into<String>>(message: T) -> Self {
        RevalidateError::Configuration(message.into())
    }

    /// 是否为查找类错误（可降级为空值）
    pub fn is_lookup_failure(&self) -> bool {
        matches!(
            self,
            RevalidateError::CategoryNotFound(_)
                | RevalidateError::RecordNotFound { .. }
                | RevalidateError::CollectionNotFound(_)
                | RevalidateError::Store(_)
        )
    }
}

/// 失效通知结果类型
pub type Result<T> = std::result::Result<T, RevalidateError>;
