//! 失效通知配置模块
//!
//! 该模块提供了进程级配置的加载与校验，包括：
//! - 配置文件（单文件或目录）加载和合并
//! - 环境变量覆盖（API 密钥、订阅路由）
//! - 集合/字段命名、HTTP 客户端、重试与分发策略
//!
//! 缺少订阅路由或 API 密钥属于致命错误，宿主进程应拒绝启动。

use std::ffi::OsStr;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, anyhow};
use serde::Deserialize;
use toml::Value;
use url::Url;

use crate::error::{Result, RevalidateError};

mod manager;
pub use manager::ConfigManager;

/// 默认的失效接口路径
pub const DEFAULT_ENDPOINT_PATH: &str = "/api/revalidate";

/// 被追踪的集合名称
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// 商品集合
    pub products: String,
    /// 分类集合
    pub categories: String,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            products: "products".to_string(),
            categories: "categories".to_string(),
        }
    }
}

/// 记录字段名称
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    /// 永久链接字段
    pub permalink: String,
    /// 商品上的分类引用字段
    pub category: String,
    /// 分类解析时按此字段匹配
    pub category_name: String,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            permalink: "permalink".to_string(),
            category: "category".to_string(),
            category_name: "name".to_string(),
        }
    }
}

/// HTTP 客户端配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// 单次请求超时（毫秒）
    pub timeout_ms: u64,
    /// 建连超时（毫秒）
    pub connect_timeout_ms: u64,
    /// User-Agent
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            connect_timeout_ms: 3_000,
            user_agent: concat!("isr-revalidate/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// 重试配置（仅作用于传输层失败）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 初始延迟（毫秒）
    pub initial_delay_ms: u64,
    /// 最大延迟（毫秒）
    pub max_delay_ms: u64,
    /// 退避倍数
    pub backoff_multiplier: f64,
    /// 累计等待上限（毫秒）
    pub max_total_wait_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 100,
            max_delay_ms: 2_000,
            backoff_multiplier: 2.0,
            max_total_wait_ms: 5_000,
        }
    }
}

/// 通知分发模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// 在 after 阶段 Hook 内同步等待投递完成
    #[default]
    Inline,
    /// 构建载荷后交给后台任务投递，Hook 立即返回；
    /// 宿主退出前应调用 `EventHookBridge::shutdown` 等待未完成的投递
    Background,
}

/// 路由扇出模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FanOutMode {
    /// 按配置顺序逐个投递
    #[default]
    Sequential,
    /// 所有路由并发投递
    Concurrent,
}

/// 分发配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub mode: DispatchMode,
    pub fan_out: FanOutMode,
    /// before 阶段状态的最长保留时间（秒）
    pub pending_ttl_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::Inline,
            fan_out: FanOutMode::Sequential,
            pending_ttl_secs: 300,
        }
    }
}

impl DispatchConfig {
    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别（RUST_LOG 优先）
    pub level: String,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_file: bool,
    pub with_line_number: bool,
    /// 以 JSON 格式输出
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: true,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
            json: false,
        }
    }
}

/// 失效通知配置主结构体
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RevalidateConfig {
    /// 随每次通知下发的 API 密钥
    pub api_key: String,
    /// 订阅路由（有序）
    pub routes: Vec<String>,
    /// 失效接口路径
    pub endpoint_path: String,
    pub collections: CollectionConfig,
    pub fields: FieldConfig,
    pub http: HttpClientConfig,
    pub retry: RetryConfig,
    pub dispatch: DispatchConfig,
    pub logging: LoggingConfig,
}

impl Default for RevalidateConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            routes: Vec::new(),
            endpoint_path: DEFAULT_ENDPOINT_PATH.to_string(),
            collections: CollectionConfig::default(),
            fields: FieldConfig::default(),
            http: HttpClientConfig::default(),
            retry: RetryConfig::default(),
            dispatch: DispatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RevalidateConfig {
    pub fn new<K: Into<String>>(api_key: K, routes: Vec<String>) -> Self {
        Self {
            api_key: api_key.into(),
            routes,
            ..Default::default()
        }
    }

    /// 使用命令行等外部来源给出的路由覆盖配置
    pub fn with_routes(mut self, routes: Vec<String>) -> Self {
        self.routes = routes;
        self
    }

    pub fn with_api_key<K: Into<String>>(mut self, api_key: K) -> Self {
        self.api_key = api_key.into();
        self
    }

    /// 加载配置：文件/目录 → 环境变量覆盖 → 校验
    ///
    /// `path` 为 `None` 时依次尝试 `config/revalidate.toml`、`revalidate.toml`，
    /// 都不存在则从默认值开始（仍需环境变量补齐路由与密钥）。
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// 同 `load`，但环境变量通过 `lookup` 读取
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = match path {
            Some(path) => load_config_from_source(path).map_err(config_error)?,
            None => load_with_fallback(&[
                Path::new("config/revalidate.toml"),
                Path::new("revalidate.toml"),
            ])?,
        };
        ConfigManager::apply_overrides_from(&mut cfg, lookup);
        cfg.validate()?;
        Ok(cfg)
    }

    /// 从 TOML 文本解析（不做环境变量覆盖）
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|err| RevalidateError::configuration(format!("invalid config format: {err}")))
    }

    /// 校验启动必需项
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(RevalidateError::configuration("api_key is required"));
        }
        if self.routes.is_empty() {
            return Err(RevalidateError::configuration(
                "at least one subscriber route is required",
            ));
        }
        for route in &self.routes {
            let parsed = Url::parse(route).map_err(|err| {
                RevalidateError::configuration(format!("invalid route {route}: {err}"))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(RevalidateError::configuration(format!(
                    "route {route} must use http or https"
                )));
            }
        }
        if !self.endpoint_path.starts_with('/') {
            return Err(RevalidateError::configuration(
                "endpoint_path must start with '/'",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(RevalidateError::configuration(
                "retry.max_attempts must be at least 1",
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(RevalidateError::configuration(
                "retry.backoff_multiplier must be >= 1.0",
            ));
        }
        Ok(())
    }
}

fn config_error(err: anyhow::Error) -> RevalidateError {
    RevalidateError::configuration(format!("{err:#}"))
}

/// 使用备选路径加载配置，全部缺失时返回默认值
fn load_with_fallback(candidates: &[&Path]) -> Result<RevalidateConfig> {
    for path in candidates {
        if path.exists() {
            return load_config_from_source(path).map_err(config_error);
        }
    }
    tracing::debug!("no configuration file found, starting from defaults");
    Ok(RevalidateConfig::default())
}

/// 从源加载配置
fn load_config_from_source(path: &Path) -> anyhow::Result<RevalidateConfig> {
    if !path.exists() {
        return Err(anyhow!(
            "configuration path {} does not exist",
            path.display()
        ));
    }

    let metadata = path
        .metadata()
        .with_context(|| format!("unable to read metadata for {}", path.display()))?;

    let merged = if metadata.is_dir() {
        let mut root = Value::Table(toml::Table::new());
        merge_directory(&mut root, path)?;
        root
    } else {
        load_toml_value(path)?
    };

    let cfg: RevalidateConfig = merged
        .try_into()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    Ok(cfg)
}

/// 合并目录中的配置（按文件名排序，后者覆盖前者）
fn merge_directory(root: &mut Value, dir: &Path) -> anyhow::Result<()> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("unable to read config directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(OsStr::to_str)
                .map(|ext| ext.eq_ignore_ascii_case("toml"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();

    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let value = load_toml_value(&entry.path())?;
        merge_value(root, value);
    }

    Ok(())
}

/// 加载 TOML 值
fn load_toml_value(path: &Path) -> anyhow::Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config file {}", path.display()))?;
    let table: toml::Table = toml::from_str(&content)
        .with_context(|| format!("invalid TOML content in {}", path.display()))?;
    Ok(Value::Table(table))
}

/// 合并值
fn merge_value(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Table(overlay_table) => {
            if let Value::Table(base_table) = base {
                for (key, overlay_value) in overlay_table.into_iter() {
                    match base_table.get_mut(&key) {
                        Some(base_value) => merge_value(base_value, overlay_value),
                        None => {
                            base_table.insert(key, overlay_value);
                        }
                    }
                }
            } else {
                *base = Value::Table(overlay_table);
            }
        }
        other => {
            *base = other;
        }
    }
}
