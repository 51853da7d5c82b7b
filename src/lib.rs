//! ISR 缓存失效通知库
//!
//! 在存储引擎写入商品或分类记录的前后捕获状态，构建失效通知载荷，
//! 并以表单 POST 扇出到所有下游渲染服务的 `/api/revalidate` 接口。
//!
//! 典型接入方式：
//! 1. `RevalidateConfig::load` 读取配置（失败时宿主进程应拒绝启动）
//! 2. `EventHookBridge::new` 绑定存储引擎的 `RecordStore` 实现
//! 3. 在引擎的生命周期回调中调用 `MutationHooks` 的对应方法

pub mod config;
pub mod delivery;
pub mod error;
pub mod hooks;
pub mod metrics;
pub mod store;
pub mod tracing;

pub use config::{
    CollectionConfig, ConfigManager, DispatchConfig, DispatchMode, FanOutMode, FieldConfig,
    HttpClientConfig, LoggingConfig, RetryConfig, RevalidateConfig,
};
pub use delivery::{DeliveryOutcome, DeliveryReport, FanOutSender, RetryPolicy, SubscriberRoute};
pub use error::{Result, RevalidateError};
pub use hooks::*;
pub use store::{DynamicRecord, InMemoryRecordStore, RecordHandle, RecordStore};
