//! 失效通知载荷构建
//!
//! 载荷是有序的表单字段列表，以 `application/x-www-form-urlencoded` 发送。
//! 构建过程是纯函数，不做任何 I/O。

use serde::Serialize;

use super::types::{MutationType, RecordKind, ResolvedState};

pub const FIELD_API_KEY: &str = "api_key";
pub const FIELD_TYPE: &str = "type";
pub const FIELD_PRODUCT_OLD_PERMALINK: &str = "product_old_permalink";
pub const FIELD_PRODUCT_OLD_CATEGORIES: &str = "product_old_categories";
pub const FIELD_PRODUCT_NEW_PERMALINK: &str = "product_new_permalink";
pub const FIELD_PRODUCT_NEW_CATEGORIES: &str = "product_new_categories";
pub const FIELD_CATEGORY_OLD_PERMALINK: &str = "category_old_permalink";
pub const FIELD_CATEGORY_NEW_PERMALINK: &str = "category_new_permalink";
/// 创建事件只有一个状态，额外携带不区分新旧的别名字段
pub const FIELD_PRODUCT_PERMALINK: &str = "product_permalink";
pub const FIELD_PRODUCT_CATEGORIES: &str = "product_categories";
pub const FIELD_CATEGORY_PERMALINK: &str = "category_permalink";

/// 分类列表分隔符
pub const CATEGORY_SEPARATOR: char = ',';

/// 失效通知载荷
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct NotificationPayload {
    fields: Vec<(String, String)>,
}

impl NotificationPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加字段；同名字段覆盖原值并保持原位置
    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == key) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// 变更类型字段
    pub fn mutation_type(&self) -> Option<&str> {
        self.get(FIELD_TYPE)
    }
}

/// 空列表项（解析失败的分类）的占位写法
///
/// 原始 `%` 总会写作 `%25`，因此 `%00` 不会与任何真实永久链接冲突。
pub const EMPTY_CATEGORY_TOKEN: &str = "%00";

/// 编码分类列表
///
/// 以逗号连接并保持顺序；单个永久链接内的 `%` 写作 `%25`、`,` 写作 `%2C`，
/// 空项写作 `%00`。空列表编码为空串，`[""]` 编码为 `%00`，两者可区分。
pub fn encode_category_list(categories: &[String]) -> String {
    categories
        .iter()
        .map(|category| escape_category(category))
        .collect::<Vec<_>>()
        .join(",")
}

/// 解码 `encode_category_list` 的结果
pub fn decode_category_list(encoded: &str) -> Vec<String> {
    if encoded.is_empty() {
        return Vec::new();
    }
    encoded
        .split(CATEGORY_SEPARATOR)
        .map(|item| {
            if item == EMPTY_CATEGORY_TOKEN {
                String::new()
            } else {
                unescape_category(item)
            }
        })
        .collect()
}

fn escape_category(category: &str) -> String {
    if category.is_empty() {
        return EMPTY_CATEGORY_TOKEN.to_string();
    }
    if !category.contains(['%', CATEGORY_SEPARATOR]) {
        return category.to_string();
    }
    let mut escaped = String::with_capacity(category.len() + 4);
    for ch in category.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            CATEGORY_SEPARATOR => escaped.push_str("%2C"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn unescape_category(category: &str) -> String {
    let mut unescaped = String::with_capacity(category.len());
    let mut rest = category;
    while let Some(pos) = rest.find('%') {
        unescaped.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with("%25") {
            unescaped.push('%');
            rest = &tail[3..];
        } else if tail.starts_with("%2C") || tail.starts_with("%2c") {
            unescaped.push(CATEGORY_SEPARATOR);
            rest = &tail[3..];
        } else {
            unescaped.push('%');
            rest = &tail[1..];
        }
    }
    unescaped.push_str(rest);
    unescaped
}

/// 通知载荷构建器
#[derive(Debug, Clone)]
pub struct NotificationBuilder {
    api_key: String,
}

impl NotificationBuilder {
    pub fn new<K: Into<String>>(api_key: K) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    /// 构建载荷
    ///
    /// `before` 为空时省略 old 字段，`after` 为空时省略 new 字段。
    pub fn build(
        &self,
        mutation_type: MutationType,
        kind: RecordKind,
        before: Option<&ResolvedState>,
        after: Option<&ResolvedState>,
    ) -> NotificationPayload {
        let mut payload = NotificationPayload::new();
        payload.insert(FIELD_API_KEY, self.api_key.as_str());
        payload.insert(FIELD_TYPE, mutation_type.as_str());

        match kind {
            RecordKind::Product => {
                if let Some(before) = before {
                    payload.insert(FIELD_PRODUCT_OLD_PERMALINK, before.permalink.as_str());
                    payload.insert(
                        FIELD_PRODUCT_OLD_CATEGORIES,
                        encode_category_list(&before.categories),
                    );
                }
                if let Some(after) = after {
                    let categories = encode_category_list(&after.categories);
                    payload.insert(FIELD_PRODUCT_NEW_PERMALINK, after.permalink.as_str());
                    payload.insert(FIELD_PRODUCT_NEW_CATEGORIES, categories.as_str());
                    if mutation_type == MutationType::Create {
                        payload.insert(FIELD_PRODUCT_PERMALINK, after.permalink.as_str());
                        payload.insert(FIELD_PRODUCT_CATEGORIES, categories);
                    }
                }
            }
            RecordKind::Category => {
                if let Some(before) = before {
                    payload.insert(FIELD_CATEGORY_OLD_PERMALINK, before.permalink.as_str());
                }
                if let Some(after) = after {
                    payload.insert(FIELD_CATEGORY_NEW_PERMALINK, after.permalink.as_str());
                    if mutation_type == MutationType::Create {
                        payload.insert(FIELD_CATEGORY_PERMALINK, after.permalink.as_str());
                    }
                }
            }
        }

        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> NotificationBuilder {
        NotificationBuilder::new("secret")
    }

    fn product(permalink: &str, categories: &[&str]) -> ResolvedState {
        ResolvedState::new(
            permalink,
            categories.iter().map(|c| c.to_string()).collect(),
        )
    }

    #[test]
    fn create_product_carries_new_state_only() {
        let after = product("p1-slug", &["/c/shoes"]);
        let payload = builder().build(
            MutationType::Create,
            RecordKind::Product,
            None,
            Some(&after),
        );

        assert_eq!(payload.get(FIELD_API_KEY), Some("secret"));
        assert_eq!(payload.get(FIELD_TYPE), Some("create"));
        assert_eq!(payload.get(FIELD_PRODUCT_PERMALINK), Some("p1-slug"));
        assert_eq!(payload.get(FIELD_PRODUCT_CATEGORIES), Some("/c/shoes"));
        assert_eq!(payload.get(FIELD_PRODUCT_NEW_PERMALINK), Some("p1-slug"));
        assert!(payload.keys().all(|key| !key.contains("_old_")));
    }

    #[test]
    fn update_product_carries_both_states() {
        let before = product("old-slug", &["/c/a", "/c/b"]);
        let after = product("new-slug", &["/c/b"]);
        let payload = builder().build(
            MutationType::Update,
            RecordKind::Product,
            Some(&before),
            Some(&after),
        );

        assert_eq!(payload.get(FIELD_TYPE), Some("update"));
        assert_eq!(payload.get(FIELD_PRODUCT_OLD_PERMALINK), Some("old-slug"));
        assert_eq!(payload.get(FIELD_PRODUCT_OLD_CATEGORIES), Some("/c/a,/c/b"));
        assert_eq!(payload.get(FIELD_PRODUCT_NEW_PERMALINK), Some("new-slug"));
        assert_eq!(payload.get(FIELD_PRODUCT_NEW_CATEGORIES), Some("/c/b"));
        assert!(!payload.contains(FIELD_PRODUCT_PERMALINK));
    }

    #[test]
    fn delete_category_carries_old_state_only() {
        let before = ResolvedState::new("/c/old", vec![]);
        let payload = builder().build(
            MutationType::Delete,
            RecordKind::Category,
            Some(&before),
            None,
        );

        assert_eq!(payload.get(FIELD_TYPE), Some("delete"));
        assert_eq!(payload.get(FIELD_CATEGORY_OLD_PERMALINK), Some("/c/old"));
        assert!(payload.keys().all(|key| !key.contains("_new_")));
        assert_eq!(payload.len(), 3);
    }

    #[test]
    fn category_payload_has_no_product_fields() {
        let before = ResolvedState::new("/c/a", vec![]);
        let after = ResolvedState::new("/c/b", vec![]);
        let payload = builder().build(
            MutationType::Update,
            RecordKind::Category,
            Some(&before),
            Some(&after),
        );
        assert!(payload.keys().all(|key| !key.starts_with("product_")));
        assert_eq!(payload.get(FIELD_CATEGORY_NEW_PERMALINK), Some("/c/b"));
    }

    #[test]
    fn category_list_keeps_order_and_escapes_commas() {
        let plain = vec!["permalinkA".to_string(), "permalinkB".to_string()];
        assert_eq!(encode_category_list(&plain), "permalinkA,permalinkB");

        let tricky = vec!["/c/a,b".to_string(), "/c/100%".to_string(), String::new()];
        let encoded = encode_category_list(&tricky);
        assert_eq!(encoded, "/c/a%2Cb,/c/100%25,%00");
        assert_eq!(decode_category_list(&encoded), tricky);
        assert!(decode_category_list("").is_empty());
    }

    #[test]
    fn single_unresolved_category_differs_from_no_categories() {
        let unresolved = vec![String::new()];
        let none: Vec<String> = Vec::new();

        assert_eq!(encode_category_list(&unresolved), "%00");
        assert_eq!(encode_category_list(&none), "");
        assert_eq!(decode_category_list("%00"), unresolved);
        assert_eq!(decode_category_list(""), none);

        // 字面量 "%00" 会被转义，不会被误读为空项
        let literal = vec!["%00".to_string()];
        let encoded = encode_category_list(&literal);
        assert_eq!(encoded, "%2500");
        assert_eq!(decode_category_list(&encoded), literal);
    }

    #[test]
    fn payload_serializes_as_form_pairs() {
        let mut payload = NotificationPayload::new();
        payload.insert("type", "update");
        payload.insert("api_key", "k");
        payload.insert("type", "delete");
        assert_eq!(
            payload.fields(),
            &[
                ("type".to_string(), "delete".to_string()),
                ("api_key".to_string(), "k".to_string()),
            ]
        );
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, serde_json::json!([["type", "delete"], ["api_key", "k"]]));
    }
}
