//! 存储引擎接入层
//!
//! - `RecordHandle`：存储引擎传入 Hook 的记录句柄（只读）
//! - `RecordStore`：按 id / 字段值查询已持久化记录的接口
//! - `DynamicRecord`：通用的引擎记录表示（集合名 + id + JSON 字段）
//! - `InMemoryRecordStore`：基于 DashMap 的内存实现，供测试和内存镜像宿主使用

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// 存储引擎记录句柄
pub trait RecordHandle: Send + Sync {
    /// 集合名称
    fn collection(&self) -> &str;

    /// 稳定 id
    fn id(&self) -> &str;

    /// 读取字符串字段，缺失或类型不符时返回空串
    fn string_value(&self, field: &str) -> String;

    /// 读取字符串列表字段；单个字符串视为单元素列表
    fn string_list(&self, field: &str) -> Vec<String>;
}

/// 通用引擎记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicRecord {
    pub collection: String,
    pub id: String,
    #[serde(default)]
    pub data: Map<String, JsonValue>,
}

impl DynamicRecord {
    pub fn new<C: Into<String>, I: Into<String>>(collection: C, id: I) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            data: Map::new(),
        }
    }

    pub fn with_field<K: Into<String>, V: Into<JsonValue>>(mut self, key: K, value: V) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn set_field<K: Into<String>, V: Into<JsonValue>>(&mut self, key: K, value: V) {
        self.data.insert(key.into(), value.into());
    }
}

impl RecordHandle for DynamicRecord {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn string_value(&self, field: &str) -> String {
        match self.data.get(field) {
            Some(JsonValue::String(value)) => value.clone(),
            Some(JsonValue::Number(value)) => value.to_string(),
            Some(JsonValue::Bool(value)) => value.to_string(),
            _ => String::new(),
        }
    }

    fn string_list(&self, field: &str) -> Vec<String> {
        match self.data.get(field) {
            Some(JsonValue::Array(values)) => values
                .iter()
                .filter_map(|value| match value {
                    JsonValue::String(value) => Some(value.clone()),
                    JsonValue::Number(value) => Some(value.to_string()),
                    _ => None,
                })
                .filter(|value| !value.is_empty())
                .collect(),
            Some(JsonValue::String(value)) if !value.is_empty() => vec![value.clone()],
            _ => Vec::new(),
        }
    }
}

impl<T: RecordHandle + ?Sized> RecordHandle for Arc<T> {
    fn collection(&self) -> &str {
        (**self).collection()
    }

    fn id(&self) -> &str {
        (**self).id()
    }

    fn string_value(&self, field: &str) -> String {
        (**self).string_value(field)
    }

    fn string_list(&self, field: &str) -> Vec<String> {
        (**self).string_list(field)
    }
}

/// 记录查询接口
///
/// 实现方返回引擎自身的错误，由核心层统一降级处理。
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// 集合是否存在
    async fn has_collection(&self, collection: &str) -> anyhow::Result<bool>;

    /// 按主键查询已持久化记录
    async fn find_record(&self, collection: &str, id: &str)
    -> anyhow::Result<Option<DynamicRecord>>;

    /// 查询集合中第一条字段值匹配的记录
    async fn find_first_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> anyhow::Result<Option<DynamicRecord>>;
}

#[async_trait]
impl<T> RecordStore for Arc<T>
where
    T: RecordStore + ?Sized,
{
    async fn has_collection(&self, collection: &str) -> anyhow::Result<bool> {
        (**self).has_collection(collection).await
    }

    async fn find_record(
        &self,
        collection: &str,
        id: &str,
    ) -> anyhow::Result<Option<DynamicRecord>> {
        (**self).find_record(collection, id).await
    }

    async fn find_first_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> anyhow::Result<Option<DynamicRecord>> {
        (**self).find_first_by_field(collection, field, value).await
    }
}

/// 内存记录存储
///
/// 集合内按插入顺序保存，`find_first_by_field` 返回最早插入的匹配记录。
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    collections: DashMap<String, Vec<DynamicRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 创建空集合
    pub fn create_collection<C: Into<String>>(&self, collection: C) {
        self.collections.entry(collection.into()).or_default();
    }

    /// 写入或替换记录（按 id），集合不存在时自动创建
    pub fn upsert(&self, record: DynamicRecord) {
        let mut records = self.collections.entry(record.collection.clone()).or_default();
        match records.iter_mut().find(|existing| existing.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    /// 删除记录，返回被删除的记录
    pub fn remove(&self, collection: &str, id: &str) -> Option<DynamicRecord> {
        let mut records = self.collections.get_mut(collection)?;
        let index = records.iter().position(|record| record.id == id)?;
        Some(records.remove(index))
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map(|records| records.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn has_collection(&self, collection: &str) -> anyhow::Result<bool> {
        Ok(self.collections.contains_key(collection))
    }

    async fn find_record(
        &self,
        collection: &str,
        id: &str,
    ) -> anyhow::Result<Option<DynamicRecord>> {
        Ok(self.collections.get(collection).and_then(|records| {
            records.iter().find(|record| record.id == id).cloned()
        }))
    }

    async fn find_first_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> anyhow::Result<Option<DynamicRecord>> {
        Ok(self.collections.get(collection).and_then(|records| {
            records
                .iter()
                .find(|record| record.string_value(field) == value)
                .cloned()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_list_accepts_single_string() {
        let record = DynamicRecord::new("products", "p1")
            .with_field("category", "shoes")
            .with_field("tags", json!(["a", "", "b"]));
        assert_eq!(record.string_list("category"), vec!["shoes".to_string()]);
        assert_eq!(record.string_list("tags"), vec!["a".to_string(), "b".to_string()]);
        assert!(record.string_list("missing").is_empty());
        assert_eq!(record.string_value("missing"), "");
    }

    #[tokio::test]
    async fn upsert_replaces_by_id_and_keeps_order() {
        let store = InMemoryRecordStore::new();
        store.upsert(DynamicRecord::new("categories", "c1").with_field("name", "shoes"));
        store.upsert(DynamicRecord::new("categories", "c2").with_field("name", "shoes"));
        store.upsert(
            DynamicRecord::new("categories", "c1")
                .with_field("name", "shoes")
                .with_field("permalink", "/c/shoes"),
        );

        assert_eq!(store.len("categories"), 2);
        let first = store
            .find_first_by_field("categories", "name", "shoes")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.id, "c1");
        assert_eq!(first.string_value("permalink"), "/c/shoes");
    }

    #[tokio::test]
    async fn remove_and_lookup_missing() {
        let store = InMemoryRecordStore::new();
        store.create_collection("products");
        assert!(store.has_collection("products").await.unwrap());
        assert!(!store.has_collection("categories").await.unwrap());
        assert!(store.remove("products", "p1").is_none());

        store.upsert(DynamicRecord::new("products", "p1"));
        assert!(store.remove("products", "p1").is_some());
        assert!(store.find_record("products", "p1").await.unwrap().is_none());
    }
}
