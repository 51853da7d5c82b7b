use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

use super::types::{MutationKey, MutationType, RecordKind, ResolvedState};

/// 单次变更的上下文
///
/// before 阶段创建并写入变更前状态，after 阶段消费。既可以直接在调用链中
/// 传递（`EventHookBridge::capture_before` / `complete`），也可以经由
/// `MutationStateCache` 按记录身份中转。
#[derive(Debug, Clone)]
pub struct MutationContext {
    mutation_id: Uuid,
    key: MutationKey,
    mutation_type: MutationType,
    before: Option<ResolvedState>,
}

impl MutationContext {
    pub fn new(key: MutationKey, mutation_type: MutationType) -> Self {
        Self {
            mutation_id: Uuid::new_v4(),
            key,
            mutation_type,
            before: None,
        }
    }

    pub fn mutation_id(&self) -> Uuid {
        self.mutation_id
    }

    pub fn key(&self) -> &MutationKey {
        &self.key
    }

    pub fn kind(&self) -> RecordKind {
        self.key.kind
    }

    pub fn mutation_type(&self) -> MutationType {
        self.mutation_type
    }

    pub fn before(&self) -> Option<&ResolvedState> {
        self.before.as_ref()
    }

    pub fn capture_before(&mut self, state: ResolvedState) {
        self.before = Some(state);
    }

    /// 取出变更前状态；未捕获时返回空状态
    pub fn take_before(&mut self) -> ResolvedState {
        self.before.take().unwrap_or_default()
    }
}

#[derive(Debug)]
struct PendingMutation {
    context: MutationContext,
    started_at: Instant,
}

/// 变更状态缓存
///
/// 以记录身份（类型 + id）为键保存进行中的变更，不同记录的并发变更互不覆盖。
/// 同一记录上重叠的变更按 before 阶段的先后排队，after 阶段按先进先出取走，
/// 每次变更都保留自己的变更前状态。超过 `ttl` 仍未被取走的条目在下一次
/// `begin_mutation` 时清理。
#[derive(Debug)]
pub struct MutationStateCache {
    pending: DashMap<MutationKey, VecDeque<PendingMutation>>,
    ttl: Duration,
}

impl MutationStateCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            ttl,
        }
    }

    /// 开始一次变更，排在同一记录未完成的变更之后
    pub fn begin_mutation(
        &self,
        kind: RecordKind,
        id: &str,
        mutation_type: MutationType,
    ) -> MutationContext {
        self.purge_stale();

        let context = MutationContext::new(MutationKey::new(kind, id), mutation_type);
        let mut queue = self.pending.entry(context.key().clone()).or_default();
        if !queue.is_empty() {
            tracing::debug!(
                record = %context.key(),
                mutation_id = %context.mutation_id(),
                queued = queue.len(),
                "overlapping mutation on the same record"
            );
        }
        queue.push_back(PendingMutation {
            context: context.clone(),
            started_at: Instant::now(),
        });
        context
    }

    /// 写入变更前状态；上下文已被取走或清理时忽略
    pub fn capture_before(&self, context: &MutationContext, state: ResolvedState) -> bool {
        let captured = self
            .pending
            .get_mut(context.key())
            .and_then(|mut queue| {
                queue
                    .iter_mut()
                    .find(|pending| pending.context.mutation_id() == context.mutation_id())
                    .map(|pending| pending.context.capture_before(state))
            })
            .is_some();
        if !captured {
            tracing::debug!(
                record = %context.key(),
                mutation_id = %context.mutation_id(),
                "mutation state no longer pending, before-state discarded"
            );
        }
        captured
    }

    /// 取出并移除某记录最早的待完成上下文
    ///
    /// 类型不一致（例如 before-update 之后收到 after-delete）视为没有先前状态。
    pub fn take(&self, key: &MutationKey, mutation_type: MutationType) -> Option<MutationContext> {
        let pending = {
            let mut queue = self.pending.get_mut(key)?;
            let pending = queue.pop_front();
            let drained = queue.is_empty();
            drop(queue);
            if drained {
                self.pending.remove_if(key, |_, queue| queue.is_empty());
            }
            pending?
        };
        if pending.context.mutation_type() != mutation_type {
            tracing::warn!(
                record = %key,
                cached = %pending.context.mutation_type(),
                requested = %mutation_type,
                "mutation type mismatch between before and after phase"
            );
            return None;
        }
        Some(pending.context)
    }

    /// 取出变更前状态，不存在时返回空状态
    pub fn take_before(&self, key: &MutationKey, mutation_type: MutationType) -> ResolvedState {
        self.take(key, mutation_type)
            .map(|mut context| context.take_before())
            .unwrap_or_default()
    }

    /// 清理过期条目，返回清理数量
    pub fn purge_stale(&self) -> usize {
        let before = self.len();
        let ttl = self.ttl;
        self.pending.retain(|_, queue| {
            queue.retain(|pending| pending.started_at.elapsed() < ttl);
            !queue.is_empty()
        });
        let purged = before.saturating_sub(self.len());
        if purged > 0 {
            tracing::warn!(purged, "purged stale mutation states without after phase");
        }
        purged
    }

    /// 待完成的变更总数
    pub fn len(&self) -> usize {
        self.pending.iter().map(|queue| queue.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for MutationStateCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}
