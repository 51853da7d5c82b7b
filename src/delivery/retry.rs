//! 投递重试机制（指数退避策略）

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::RevalidateError;

/// 重试策略配置
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 初始延迟
    pub initial_delay: Duration,
    /// 单次最大延迟
    pub max_delay: Duration,
    /// 退避倍数
    pub backoff_multiplier: f64,
    /// 累计等待上限
    pub max_total_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
            max_total_wait: Duration::from_millis(config.max_total_wait_ms),
        }
    }
}

impl RetryPolicy {
    /// 不重试
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// 计算第 `attempt` 次失败后的等待时间（从 0 开始，指数退避）
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = (self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(exponent))
        .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

/// 判断错误是否可重试
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
}

impl RetryableError for RevalidateError {
    /// 仅传输层失败（连接拒绝、超时、DNS 失败）可重试
    fn is_retryable(&self) -> bool {
        matches!(self, RevalidateError::Transport(_))
    }
}

/// 带重试的执行结果
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    /// 实际尝试次数
    pub attempts: u32,
}

/// 带指数退避重试的执行函数
///
/// - 可重试错误：等待退避时间后重试，直到达到最大次数或累计等待上限
/// - 不可重试错误与成功结果：立即返回
pub async fn execute_with_retry<F, Fut, T, E>(policy: &RetryPolicy, mut f: F) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut waited = Duration::ZERO;
    let mut attempt = 0;

    loop {
        let result = f(attempt).await;
        attempt += 1;

        let err = match result {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(err) => err,
        };

        if !err.is_retryable() || attempt >= max_attempts {
            return RetryOutcome {
                result: Err(err),
                attempts: attempt,
            };
        }

        let delay = policy.calculate_delay(attempt - 1);
        if waited + delay > policy.max_total_wait {
            tracing::debug!(
                attempt,
                waited_ms = waited.as_millis() as u64,
                "retry budget exhausted"
            );
            return RetryOutcome {
                result: Err(err),
                attempts: attempt,
            };
        }

        tracing::debug!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying after transport error"
        );
        tokio::time::sleep(delay).await;
        waited += delay;
    }
}
