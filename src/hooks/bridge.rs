//! 存储引擎事件桥接
//!
//! 把存储引擎的生命周期回调（before/after update、after create、before/after delete）
//! 转换为核心数据模型，捕获变更前后状态并交给扇出发送器投递。
//! 任何通知侧失败都只记录日志，不会影响引擎本身的写入结果。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::config::{CollectionConfig, DispatchMode, FieldConfig, RevalidateConfig};
use crate::delivery::{DeliveryReport, FanOutSender};
use crate::error::{Result, RevalidateError};
use crate::metrics::METRICS;
use crate::store::{RecordHandle, RecordStore};

use super::payload::{NotificationBuilder, NotificationPayload};
use super::resolver::CategoryResolver;
use super::state::{MutationContext, MutationStateCache};
use super::types::{MutationKey, MutationType, Record, RecordKind, ResolvedState};

/// 存储引擎回调接口
///
/// before 阶段与 after 阶段通过记录身份在内部缓存中配对，
/// 不同记录的并发变更互不干扰。after 阶段返回各路由的投递报告
/// （后台分发模式下为空）。
#[async_trait]
pub trait MutationHooks: Send + Sync {
    async fn before_update(&self, record: &dyn RecordHandle);

    async fn after_update(&self, record: &dyn RecordHandle) -> Vec<DeliveryReport>;

    async fn after_create(&self, record: &dyn RecordHandle) -> Vec<DeliveryReport>;

    async fn before_delete(&self, record: &dyn RecordHandle);

    async fn after_delete(&self, record: &dyn RecordHandle) -> Vec<DeliveryReport>;
}

/// 事件桥接器
pub struct EventHookBridge {
    store: Arc<dyn RecordStore>,
    resolver: CategoryResolver,
    cache: MutationStateCache,
    builder: NotificationBuilder,
    sender: FanOutSender,
    collections: CollectionConfig,
    fields: FieldConfig,
    mode: DispatchMode,
    /// 后台模式下尚未完成的投递任务
    background: Mutex<JoinSet<()>>,
}

impl EventHookBridge {
    /// 按配置构建桥接器，配置无效时返回 `Configuration` 错误
    pub fn new(config: &RevalidateConfig, store: Arc<dyn RecordStore>) -> Result<Self> {
        config.validate()?;
        let sender = FanOutSender::from_config(config)?;
        Ok(Self::with_sender(config, store, sender))
    }

    pub fn with_sender(
        config: &RevalidateConfig,
        store: Arc<dyn RecordStore>,
        sender: FanOutSender,
    ) -> Self {
        Self {
            resolver: CategoryResolver::new(store.clone(), &config.collections, &config.fields),
            store,
            cache: MutationStateCache::new(config.dispatch.pending_ttl()),
            builder: NotificationBuilder::new(config.api_key.as_str()),
            sender,
            collections: config.collections.clone(),
            fields: config.fields.clone(),
            mode: config.dispatch.mode,
            background: Mutex::new(JoinSet::new()),
        }
    }

    pub fn sender(&self) -> &FanOutSender {
        &self.sender
    }

    pub fn resolver(&self) -> &CategoryResolver {
        &self.resolver
    }

    /// 尚未被 after 阶段取走的变更数
    pub fn pending_mutations(&self) -> usize {
        self.cache.len()
    }

    /// 后台模式下仍在进行的投递数
    pub async fn in_flight_deliveries(&self) -> usize {
        let mut tasks = self.background.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// 等待全部后台投递完成，返回等待的任务数
    ///
    /// 宿主进程退出前调用；之后新的后台投递仍可继续提交。
    pub async fn shutdown(&self) -> usize {
        let mut tasks = std::mem::take(&mut *self.background.lock().await);
        let mut drained = 0;
        while let Some(joined) = tasks.join_next().await {
            drained += 1;
            if let Err(err) = joined {
                tracing::error!(error = %err, "background delivery task failed");
            }
        }
        if drained > 0 {
            tracing::info!(drained, "background deliveries drained");
        }
        drained
    }

    /// before 阶段：创建上下文并读取持久化的变更前状态
    ///
    /// 非追踪集合返回 `None`。调用方自行保存上下文并在 after 阶段交给 `complete`。
    pub async fn capture_before(
        &self,
        handle: &dyn RecordHandle,
        mutation_type: MutationType,
    ) -> Option<MutationContext> {
        let kind = self.tracked_kind(handle)?;
        let mut context = MutationContext::new(MutationKey::new(kind, handle.id()), mutation_type);
        if mutation_type.has_before() {
            context.capture_before(self.read_persisted(kind, handle.id()).await);
        }
        Some(context)
    }

    /// after 阶段：组合变更前后状态、构建载荷并投递
    ///
    /// `context` 缺失或与本次回调不匹配时视为没有先前状态。
    pub async fn complete(
        &self,
        handle: &dyn RecordHandle,
        mutation_type: MutationType,
        context: Option<MutationContext>,
    ) -> Vec<DeliveryReport> {
        let Some(record) = Record::from_handle(handle, &self.collections, &self.fields) else {
            tracing::debug!(
                collection = handle.collection(),
                "ignoring mutation on untracked collection"
            );
            return Vec::new();
        };

        let context = context.filter(|ctx| {
            let matches = *ctx.key() == record.key() && ctx.mutation_type() == mutation_type;
            if !matches {
                tracing::warn!(
                    record = %record.key(),
                    context = %ctx.key(),
                    mutation_type = %mutation_type,
                    "mutation context does not match after phase, treating as no prior state"
                );
            }
            matches
        });

        let payload = self.prepare(&record, mutation_type, context).await;
        self.dispatch(&record, mutation_type, payload).await
    }

    /// 计算载荷；所有存储读取都在此完成，分发阶段不再回读
    async fn prepare(
        &self,
        record: &Record,
        mutation_type: MutationType,
        context: Option<MutationContext>,
    ) -> NotificationPayload {
        let before = if mutation_type.has_before() {
            Some(
                context
                    .map(|mut ctx| ctx.take_before())
                    .unwrap_or_default(),
            )
        } else {
            None
        };

        let after = if mutation_type.has_after() {
            Some(self.resolve_state(record).await)
        } else {
            None
        };

        self.builder
            .build(mutation_type, record.kind, before.as_ref(), after.as_ref())
    }

    async fn dispatch(
        &self,
        record: &Record,
        mutation_type: MutationType,
        payload: NotificationPayload,
    ) -> Vec<DeliveryReport> {
        tracing::debug!(
            kind = %record.kind,
            record_id = %record.id,
            mutation_type = %mutation_type,
            routes = self.sender.routes().len(),
            "dispatching revalidation"
        );

        match self.mode {
            DispatchMode::Inline => self.sender.deliver(&payload).await,
            DispatchMode::Background => {
                let sender = self.sender.clone();
                let mut tasks = self.background.lock().await;
                // 回收已完成的任务
                while tasks.try_join_next().is_some() {}
                tasks.spawn(async move {
                    sender.deliver(&payload).await;
                });
                Vec::new()
            }
        }
    }

    /// 读取已持久化记录并解析其状态；任何失败都降级为空状态
    async fn read_persisted(&self, kind: RecordKind, id: &str) -> ResolvedState {
        match self.find_persisted(kind, id).await {
            Ok(record) => self.resolve_state(&record).await,
            Err(err) => {
                if err.is_lookup_failure() {
                    METRICS.record_lookup_failure("record");
                }
                tracing::warn!(
                    kind = %kind,
                    record_id = %id,
                    error = %err,
                    "failed to read persisted record, no prior state captured"
                );
                ResolvedState::empty()
            }
        }
    }

    async fn find_persisted(&self, kind: RecordKind, id: &str) -> Result<Record> {
        let collection = self.collection_of(kind);
        let persisted = self
            .store
            .find_record(collection, id)
            .await?
            .ok_or_else(|| RevalidateError::RecordNotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        Record::from_handle(&persisted, &self.collections, &self.fields).ok_or_else(|| {
            RevalidateError::CollectionNotFound(persisted.collection.clone())
        })
    }

    /// 商品额外解析全部分类引用
    async fn resolve_state(&self, record: &Record) -> ResolvedState {
        let categories = match record.kind {
            RecordKind::Product => self.resolver.resolve_all(&record.category_refs).await,
            RecordKind::Category => Vec::new(),
        };
        ResolvedState::new(record.permalink.as_str(), categories)
    }

    fn tracked_kind(&self, handle: &dyn RecordHandle) -> Option<RecordKind> {
        let kind = RecordKind::from_collection(handle.collection(), &self.collections);
        if kind.is_none() {
            tracing::debug!(
                collection = handle.collection(),
                "ignoring mutation on untracked collection"
            );
        }
        kind
    }

    fn collection_of(&self, kind: RecordKind) -> &str {
        match kind {
            RecordKind::Product => &self.collections.products,
            RecordKind::Category => &self.collections.categories,
        }
    }

    /// 经由缓存的 before 阶段
    async fn begin(&self, handle: &dyn RecordHandle, mutation_type: MutationType) {
        let Some(kind) = self.tracked_kind(handle) else {
            return;
        };
        let context = self.cache.begin_mutation(kind, handle.id(), mutation_type);
        let state = self.read_persisted(kind, handle.id()).await;
        self.cache.capture_before(&context, state);
    }

    /// 经由缓存的 after 阶段
    async fn finish(
        &self,
        handle: &dyn RecordHandle,
        mutation_type: MutationType,
    ) -> Vec<DeliveryReport> {
        let context = RecordKind::from_collection(handle.collection(), &self.collections)
            .and_then(|kind| {
                self.cache
                    .take(&MutationKey::new(kind, handle.id()), mutation_type)
            });
        self.complete(handle, mutation_type, context).await
    }
}

#[async_trait]
impl MutationHooks for EventHookBridge {
    async fn before_update(&self, record: &dyn RecordHandle) {
        self.begin(record, MutationType::Update).await;
    }

    async fn after_update(&self, record: &dyn RecordHandle) -> Vec<DeliveryReport> {
        self.finish(record, MutationType::Update).await
    }

    async fn after_create(&self, record: &dyn RecordHandle) -> Vec<DeliveryReport> {
        self.complete(record, MutationType::Create, None).await
    }

    async fn before_delete(&self, record: &dyn RecordHandle) {
        self.begin(record, MutationType::Delete).await;
    }

    async fn after_delete(&self, record: &dyn RecordHandle) -> Vec<DeliveryReport> {
        self.finish(record, MutationType::Delete).await
    }
}
