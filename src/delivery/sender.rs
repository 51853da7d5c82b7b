use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use reqwest::Client;
use reqwest::redirect::Policy;
use url::Url;

use crate::config::{FanOutMode, HttpClientConfig, RevalidateConfig};
use crate::error::{Result, RevalidateError};
use crate::hooks::NotificationPayload;
use crate::metrics::METRICS;

use super::retry::{RetryPolicy, execute_with_retry};

/// 失败日志中保留的响应体长度上限
const MAX_LOGGED_BODY: usize = 512;

/// 订阅路由：下游渲染服务的基础地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberRoute {
    base: String,
    endpoint: Url,
}

impl SubscriberRoute {
    /// 解析路由并拼接失效接口路径（基础地址末尾的 `/` 可有可无）
    pub fn parse(base: &str, endpoint_path: &str) -> Result<Self> {
        let joined = format!(
            "{}/{}",
            base.trim_end_matches('/'),
            endpoint_path.trim_start_matches('/')
        );
        let endpoint = Url::parse(&joined).map_err(|err| {
            RevalidateError::configuration(format!("invalid route {base}: {err}"))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(RevalidateError::configuration(format!(
                "route {base} must use http or https"
            )));
        }
        Ok(Self {
            base: base.to_string(),
            endpoint,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.base
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl fmt::Display for SubscriberRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base)
    }
}

/// 单个路由的投递结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// 2xx
    Delivered(u16),
    /// 404：下游未提供失效接口
    NotFound(u16),
    /// 5xx
    ServerError(u16),
    /// 其他状态码
    Unexpected(u16),
    /// 重试耗尽后仍无法建立请求
    Unreachable(String),
}

impl DeliveryOutcome {
    /// 按 HTTP 状态码分类
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => DeliveryOutcome::Delivered(status),
            404 => DeliveryOutcome::NotFound(status),
            500..=599 => DeliveryOutcome::ServerError(status),
            other => DeliveryOutcome::Unexpected(other),
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryOutcome::Delivered(status)
            | DeliveryOutcome::NotFound(status)
            | DeliveryOutcome::ServerError(status)
            | DeliveryOutcome::Unexpected(status) => Some(*status),
            DeliveryOutcome::Unreachable(_) => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered(_) => "delivered",
            DeliveryOutcome::NotFound(_) => "not_found",
            DeliveryOutcome::ServerError(_) => "server_error",
            DeliveryOutcome::Unexpected(_) => "unexpected",
            DeliveryOutcome::Unreachable(_) => "unreachable",
        }
    }

    /// 将失败结果转换为错误类型，成功时返回 `None`
    pub fn to_error(&self, route: &str) -> Option<RevalidateError> {
        match self {
            DeliveryOutcome::Delivered(_) => None,
            DeliveryOutcome::Unreachable(reason) => Some(RevalidateError::Unreachable {
                route: route.to_string(),
                reason: reason.clone(),
            }),
            other => other
                .status()
                .map(|status| RevalidateError::RemoteRejection { status }),
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryOutcome::Unreachable(reason) => write!(f, "unreachable: {reason}"),
            other => match other.status() {
                Some(status) => write!(f, "{} ({status})", other.label()),
                None => f.write_str(other.label()),
            },
        }
    }
}

/// 单个路由的投递报告
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub route: String,
    pub outcome: DeliveryOutcome,
    /// HTTP 尝试次数（含重试）
    pub attempts: u32,
}

impl DeliveryReport {
    pub fn is_delivered(&self) -> bool {
        self.outcome.is_delivered()
    }

    pub fn error(&self) -> Option<RevalidateError> {
        self.outcome.to_error(&self.route)
    }
}

/// 单次 HTTP 尝试的响应摘要
#[derive(Debug)]
struct ResponseSummary {
    status: u16,
    body: String,
}

/// 扇出发送器：把同一载荷投递给全部订阅路由
///
/// 每个路由独立重试、独立记录结果，一个路由失败不会影响其他路由。
#[derive(Clone)]
pub struct FanOutSender {
    client: Client,
    routes: Arc<[SubscriberRoute]>,
    retry: RetryPolicy,
    fan_out: FanOutMode,
}

impl FanOutSender {
    pub fn new(
        routes: Vec<SubscriberRoute>,
        retry: RetryPolicy,
        http: &HttpClientConfig,
        fan_out: FanOutMode,
    ) -> Result<Self> {
        // 不跟随重定向：3xx 原样归类为 Unexpected，避免 POST 被改写为丢失表单的 GET
        let client = Client::builder()
            .use_rustls_tls()
            .redirect(Policy::none())
            .timeout(http.timeout())
            .connect_timeout(http.connect_timeout())
            .user_agent(http.user_agent.as_str())
            .build()
            .map_err(|err| {
                RevalidateError::configuration(format!("failed to build http client: {err}"))
            })?;
        Ok(Self {
            client,
            routes: routes.into(),
            retry,
            fan_out,
        })
    }

    pub fn from_config(config: &RevalidateConfig) -> Result<Self> {
        let routes = config
            .routes
            .iter()
            .map(|route| SubscriberRoute::parse(route, &config.endpoint_path))
            .collect::<Result<Vec<_>>>()?;
        Self::new(
            routes,
            RetryPolicy::from(&config.retry),
            &config.http,
            config.dispatch.fan_out,
        )
    }

    pub fn routes(&self) -> &[SubscriberRoute] {
        &self.routes
    }

    /// 投递载荷到全部路由，返回按路由顺序排列的报告
    pub async fn deliver(&self, payload: &NotificationPayload) -> Vec<DeliveryReport> {
        match self.fan_out {
            FanOutMode::Sequential => {
                let mut reports = Vec::with_capacity(self.routes.len());
                for route in self.routes.iter() {
                    reports.push(self.deliver_route(route, payload).await);
                }
                reports
            }
            FanOutMode::Concurrent => {
                join_all(
                    self.routes
                        .iter()
                        .map(|route| self.deliver_route(route, payload)),
                )
                .await
            }
        }
    }

    /// 投递到单个路由：传输层失败按策略重试，HTTP 状态不重试
    pub async fn deliver_route(
        &self,
        route: &SubscriberRoute,
        payload: &NotificationPayload,
    ) -> DeliveryReport {
        let started = Instant::now();
        let retried = execute_with_retry(&self.retry, |_| self.post_once(route, payload)).await;

        let outcome = match retried.result {
            Ok(summary) => {
                let outcome = DeliveryOutcome::from_status(summary.status);
                log_response(route, &outcome, &summary.body);
                outcome
            }
            Err(err) => {
                tracing::error!(
                    route = %route,
                    attempts = retried.attempts,
                    error = %err,
                    "error posting revalidation, route unreachable"
                );
                DeliveryOutcome::Unreachable(err.to_string())
            }
        };

        METRICS.record_outcome(route.as_str(), outcome.label());
        METRICS.observe_duration(route.as_str(), started.elapsed().as_secs_f64());

        DeliveryReport {
            route: route.as_str().to_string(),
            outcome,
            attempts: retried.attempts,
        }
    }

    /// 单次 POST；响应体在返回前读完并释放
    async fn post_once(
        &self,
        route: &SubscriberRoute,
        payload: &NotificationPayload,
    ) -> Result<ResponseSummary> {
        METRICS.record_attempt(route.as_str());
        let response = self
            .client
            .post(route.endpoint().clone())
            .form(payload)
            .send()
            .await?;

        let status = response.status();
        let body = if status.is_success() {
            // 读完响应体以便连接回到连接池
            let _ = response.bytes().await;
            String::new()
        } else {
            response
                .text()
                .await
                .map(|text| truncate(text, MAX_LOGGED_BODY))
                .unwrap_or_default()
        };

        Ok(ResponseSummary {
            status: status.as_u16(),
            body,
        })
    }
}

fn truncate(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

fn log_response(route: &SubscriberRoute, outcome: &DeliveryOutcome, body: &str) {
    match outcome {
        DeliveryOutcome::Delivered(status) => {
            tracing::info!(route = %route, status, "successful revalidation");
        }
        DeliveryOutcome::NotFound(status) => {
            tracing::warn!(route = %route, status, body, "could not reach revalidation API");
        }
        DeliveryOutcome::ServerError(status) => {
            tracing::warn!(route = %route, status, body, "revalidation API returned a server error");
        }
        DeliveryOutcome::Unexpected(status) => {
            tracing::warn!(route = %route, status, body, "revalidation API returned an unexpected status");
        }
        DeliveryOutcome::Unreachable(_) => {}
    }
}
