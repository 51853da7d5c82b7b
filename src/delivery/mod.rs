//! 失效通知投递
//!
//! 以表单 POST 将载荷扇出到全部订阅路由，每个路由独立重试与记录结果。

pub mod retry;
mod sender;

pub use retry::{RetryPolicy, RetryableError, execute_with_retry};
pub use sender::{DeliveryOutcome, DeliveryReport, FanOutSender, SubscriberRoute};
