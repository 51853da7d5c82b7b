use std::sync::Arc;

use crate::config::{CollectionConfig, FieldConfig};
use crate::error::{Result, RevalidateError};
use crate::metrics::METRICS;
use crate::store::{RecordHandle, RecordStore};

/// 分类解析器：按分类名称（非主键）查找分类并返回其永久链接
///
/// 每次调用都直接查询存储，结果反映调用时刻的数据库视图。
#[derive(Clone)]
pub struct CategoryResolver {
    store: Arc<dyn RecordStore>,
    collection: String,
    name_field: String,
    permalink_field: String,
}

impl CategoryResolver {
    pub fn new(
        store: Arc<dyn RecordStore>,
        collections: &CollectionConfig,
        fields: &FieldConfig,
    ) -> Self {
        Self {
            store,
            collection: collections.categories.clone(),
            name_field: fields.category_name.clone(),
            permalink_field: fields.permalink.clone(),
        }
    }

    /// 解析单个分类
    pub async fn resolve(&self, name: &str) -> Result<String> {
        if !self.store.has_collection(&self.collection).await? {
            return Err(RevalidateError::CollectionNotFound(self.collection.clone()));
        }

        let record = self
            .store
            .find_first_by_field(&self.collection, &self.name_field, name)
            .await?
            .ok_or_else(|| RevalidateError::CategoryNotFound(name.to_string()))?;

        Ok(record.string_value(&self.permalink_field))
    }

    /// 解析单个分类，失败时记录日志并返回空串
    pub async fn resolve_or_empty(&self, name: &str) -> String {
        match self.resolve(name).await {
            Ok(permalink) => permalink,
            Err(err) => {
                METRICS.record_lookup_failure("category");
                tracing::warn!(category = %name, error = %err, "category lookup failed, using empty permalink");
                String::new()
            }
        }
    }

    /// 按引用顺序解析全部分类；失败项以空串占位，保持位置不变
    pub async fn resolve_all(&self, names: &[String]) -> Vec<String> {
        let mut permalinks = Vec::with_capacity(names.len());
        for name in names {
            permalinks.push(self.resolve_or_empty(name).await);
        }
        permalinks
    }
}
