//! 变更捕获 Hook 模块
//!
//! - 存储引擎回调桥接（before/after 两阶段）与变更状态缓存
//! - 分类永久链接解析
//! - 失效通知载荷构建

mod bridge;
mod payload;
mod resolver;
mod state;
mod types;

pub use bridge::{EventHookBridge, MutationHooks};
pub use payload::{
    CATEGORY_SEPARATOR, EMPTY_CATEGORY_TOKEN, FIELD_API_KEY, FIELD_CATEGORY_NEW_PERMALINK,
    FIELD_CATEGORY_OLD_PERMALINK, FIELD_CATEGORY_PERMALINK, FIELD_PRODUCT_CATEGORIES,
    FIELD_PRODUCT_NEW_CATEGORIES, FIELD_PRODUCT_NEW_PERMALINK, FIELD_PRODUCT_OLD_CATEGORIES,
    FIELD_PRODUCT_OLD_PERMALINK, FIELD_PRODUCT_PERMALINK, FIELD_TYPE, NotificationBuilder,
    NotificationPayload, decode_category_list, encode_category_list,
};
pub use resolver::CategoryResolver;
pub use state::{MutationContext, MutationStateCache};
pub use types::{MutationKey, MutationType, Record, RecordKind, ResolvedState};
