use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{CollectionConfig, FieldConfig};
use crate::store::RecordHandle;

/// 被追踪的记录类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Product,
    Category,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Product => "product",
            RecordKind::Category => "category",
        }
    }

    /// 根据集合名识别记录类型，未追踪的集合返回 `None`
    pub fn from_collection(collection: &str, collections: &CollectionConfig) -> Option<Self> {
        if collection == collections.products {
            Some(RecordKind::Product)
        } else if collection == collections.categories {
            Some(RecordKind::Category)
        } else {
            None
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationType {
    Create,
    Update,
    Delete,
}

impl MutationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationType::Create => "create",
            MutationType::Update => "update",
            MutationType::Delete => "delete",
        }
    }

    /// 是否存在变更前状态
    pub fn has_before(&self) -> bool {
        !matches!(self, MutationType::Create)
    }

    /// 是否存在变更后状态
    pub fn has_after(&self) -> bool {
        !matches!(self, MutationType::Delete)
    }
}

impl fmt::Display for MutationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 记录身份（类型 + id），用作待完成变更的键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MutationKey {
    pub kind: RecordKind,
    pub id: String,
}

impl MutationKey {
    pub fn new<I: Into<String>>(kind: RecordKind, id: I) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for MutationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// 核心数据模型中的记录快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub kind: RecordKind,
    pub id: String,
    pub permalink: String,
    /// 分类引用，仅商品有值
    #[serde(default)]
    pub category_refs: Vec<String>,
}

impl Record {
    pub fn product<I: Into<String>, P: Into<String>>(
        id: I,
        permalink: P,
        category_refs: Vec<String>,
    ) -> Self {
        Self {
            kind: RecordKind::Product,
            id: id.into(),
            permalink: permalink.into(),
            category_refs,
        }
    }

    pub fn category<I: Into<String>, P: Into<String>>(id: I, permalink: P) -> Self {
        Self {
            kind: RecordKind::Category,
            id: id.into(),
            permalink: permalink.into(),
            category_refs: Vec::new(),
        }
    }

    /// 将引擎记录句柄转换为核心记录；非追踪集合返回 `None`
    pub fn from_handle(
        handle: &dyn RecordHandle,
        collections: &CollectionConfig,
        fields: &FieldConfig,
    ) -> Option<Self> {
        let kind = RecordKind::from_collection(handle.collection(), collections)?;
        let category_refs = match kind {
            RecordKind::Product => handle.string_list(&fields.category),
            RecordKind::Category => Vec::new(),
        };
        Some(Self {
            kind,
            id: handle.id().to_string(),
            permalink: handle.string_value(&fields.permalink),
            category_refs,
        })
    }

    pub fn key(&self) -> MutationKey {
        MutationKey::new(self.kind, self.id.clone())
    }
}

/// 已解析的记录状态（永久链接 + 分类永久链接）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedState {
    pub permalink: String,
    /// 按引用顺序排列的分类永久链接；分类记录恒为空
    #[serde(default)]
    pub categories: Vec<String>,
}

impl ResolvedState {
    pub fn new<P: Into<String>>(permalink: P, categories: Vec<String>) -> Self {
        Self {
            permalink: permalink.into(),
            categories,
        }
    }

    /// 查找失败时的“无先前状态”
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.permalink.is_empty() && self.categories.is_empty()
    }
}
