//! 配置管理器 - 负责环境变量覆盖
//!
//! 密钥来自外部的密钥存储（通常以环境变量注入），路由可由部署脚本通过
//! 环境变量给出。优先级：环境变量 > 配置文件 > 默认值。

use std::env;

use super::RevalidateConfig;

/// API 密钥环境变量
pub const ENV_API_KEY: &str = "REVALIDATE_API_KEY";
/// 兼容旧部署使用的 `.env` 键名
pub const ENV_API_KEY_LEGACY: &str = "API_KEY";
/// 订阅路由环境变量（逗号分隔）
pub const ENV_ROUTES: &str = "REVALIDATE_ROUTES";
/// 日志级别环境变量
pub const ENV_LOG_LEVEL: &str = "REVALIDATE_LOG_LEVEL";

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 从进程环境变量覆盖配置
    pub fn apply_env_overrides(config: &mut RevalidateConfig) {
        Self::apply_overrides_from(config, |key| env::var(key).ok());
    }

    /// 使用给定的查找函数覆盖配置
    ///
    /// 空字符串视为未设置。
    pub fn apply_overrides_from<F>(config: &mut RevalidateConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(api_key) = lookup(ENV_API_KEY).or_else(|| lookup(ENV_API_KEY_LEGACY)) {
            config.api_key = api_key;
        }

        if let Some(routes) = lookup(ENV_ROUTES) {
            config.routes = Self::parse_routes(&routes);
        }

        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            config.logging.level = level;
        }
    }

    /// 解析逗号分隔的路由列表，保持顺序并去掉空项
    pub fn parse_routes(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|route| !route.is_empty())
            .map(ToString::to_string)
            .collect()
    }
}
