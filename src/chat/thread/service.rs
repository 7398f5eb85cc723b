//! 报价单线程确权服务
//!
//! 实现"查找或创建"状态机：范围查询 → 回退查询 → 复用对账 / 新建 →
//! 冲突恢复 → 参与者播种。跨进程并发安全完全依赖幂等键（存储唯一约束 +
//! 服务商重名冲突），不做任何客户端加锁。

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::chat::error::{ChatError, ChatResult};
use crate::chat::naming::build_quote_conversation_name;
use crate::chat::participant::{EnsureParticipantInput, ParticipantResolver};
use crate::chat::provider::{ConversationProvider, CreateConversationParams};
use crate::chat::scope::{
    resolve_scope, ConversationScope, EnsureThreadInput, ResolvedScope, ScopeFilters,
};
use crate::chat::store::models::{
    ChatThread, NewThread, ParticipantRole, QuoteContext, ThreadConversationType,
};
use crate::chat::store::{DirectoryDao, ThreadDao};
use crate::chat::thread::metadata::ThreadMetadata;

/// 报价单线程确权服务
pub struct ThreadOrchestrator {
    threads: ThreadDao,
    directory: DirectoryDao,
    provider: Arc<dyn ConversationProvider>,
    participants: Arc<ParticipantResolver>,
}

impl ThreadOrchestrator {
    pub fn new(
        threads: ThreadDao,
        directory: DirectoryDao,
        provider: Arc<dyn ConversationProvider>,
        participants: Arc<ParticipantResolver>,
    ) -> Self {
        Self {
            threads,
            directory,
            provider,
            participants,
        }
    }

    /// 确保报价单对应的协商线程存在并返回
    ///
    /// 相同（报价单、范围）入参重复调用返回同一线程，且第二次调用不再产生
    /// 任何创建类副作用。
    pub async fn ensure_thread_for_quote(
        &self,
        input: EnsureThreadInput,
    ) -> ChatResult<ChatThread> {
        let quote = self
            .directory
            .get_quote_context(&input.quote_id)
            .await?
            .ok_or_else(|| ChatError::not_found(format!("报价单 {}", input.quote_id)))?;

        let resolved = resolve_scope(&quote, &input);
        debug!(
            "[ThreadOrch] 报价单 {} 范围解析: scoped={}, scope={:?}",
            quote.id, resolved.scoped, resolved.scope
        );

        if let Some(existing) = self.lookup_thread(&input.quote_id, &resolved).await? {
            info!(
                "[ThreadOrch] 复用已有线程 {}（报价单 {}）",
                existing.id, quote.id
            );
            return self.reuse_thread(existing, &quote, &resolved, &input).await;
        }

        self.create_thread(&quote, &resolved, &input).await
    }

    /// 范围查询 + 回退查询
    async fn lookup_thread(
        &self,
        quote_id: &str,
        resolved: &ResolvedScope,
    ) -> ChatResult<Option<ChatThread>> {
        if resolved.scoped {
            let scope = &resolved.scope;
            if let Some(thread) = self
                .threads
                .get_thread_by_quote_scope(
                    quote_id,
                    scope.shipper_branch_org_id.as_deref(),
                    scope.gallery_branch_org_id.as_deref(),
                )
                .await?
            {
                return Ok(Some(thread));
            }
            if let Some(shipment_id) = scope.shipment_id.as_deref() {
                if let Some(thread) = self
                    .threads
                    .get_thread_by_shipment_scope(
                        shipment_id,
                        scope.shipper_branch_org_id.as_deref(),
                        scope.gallery_branch_org_id.as_deref(),
                    )
                    .await?
                {
                    return Ok(Some(thread));
                }
            }
        }

        // 回退：按报价单查。无范围时任意命中即复用；有范围时要求所有
        // 调用方提供过的过滤字段与存量列完全一致（未提供的字段自动匹配）
        let candidates = self.threads.get_threads_by_quote_id(quote_id).await?;
        if resolved.scoped {
            Ok(candidates
                .into_iter()
                .find(|t| Self::matches_filters(t, &resolved.filters)))
        } else {
            Ok(candidates.into_iter().next())
        }
    }

    fn matches_filters(thread: &ChatThread, filters: &ScopeFilters) -> bool {
        if let Some(expected) = &filters.shipment_id {
            if thread.shipment_id != *expected {
                return false;
            }
        }
        if let Some(expected) = &filters.shipper_branch_org_id {
            if thread.shipper_branch_org_id != *expected {
                return false;
            }
        }
        if let Some(expected) = &filters.gallery_branch_org_id {
            if thread.gallery_branch_org_id != *expected {
                return false;
            }
        }
        true
    }

    /// 复用路径：范围对账 + 元数据合并 + 参与者播种
    async fn reuse_thread(
        &self,
        thread: ChatThread,
        quote: &QuoteContext,
        resolved: &ResolvedScope,
        input: &EnsureThreadInput,
    ) -> ChatResult<ChatThread> {
        if resolved.scoped {
            // 范围只拓宽不收窄：解析出的维度覆盖存量，解析为空的维度保留存量
            let merged = ConversationScope {
                shipment_id: resolved
                    .scope
                    .shipment_id
                    .clone()
                    .or_else(|| thread.shipment_id.clone()),
                shipper_branch_org_id: resolved
                    .scope
                    .shipper_branch_org_id
                    .clone()
                    .or_else(|| thread.shipper_branch_org_id.clone()),
                gallery_branch_org_id: resolved
                    .scope
                    .gallery_branch_org_id
                    .clone()
                    .or_else(|| thread.gallery_branch_org_id.clone()),
            };

            let mut metadata = ThreadMetadata::parse(&thread.metadata);
            metadata.merge_scope(&merged);
            let metadata_json = metadata.to_json()?;

            // 只有存量的货运方/画廊组织列与新解析结果不一致时才动范围列
            let drifted = thread.shipper_branch_org_id != merged.shipper_branch_org_id
                || thread.gallery_branch_org_id != merged.gallery_branch_org_id;
            if drifted {
                warn!(
                    "[ThreadOrch] 线程 {} 范围漂移，按新解析结果对账: {:?}",
                    thread.id, merged
                );
                self.threads
                    .update_thread_scope(&thread.id, &merged, &metadata_json)
                    .await?;
            } else {
                self.threads
                    .update_thread_metadata(&thread.id, &metadata_json)
                    .await?;
            }
        }

        let resolved_for_seed = self.refreshed(&thread.id).await?;
        self.seed_default_participants(&resolved_for_seed, quote, &resolved.scope, input)
            .await;
        self.refreshed(&thread.id).await
    }

    /// 新建路径：服务商会话 → 线程记录，两级冲突恢复
    async fn create_thread(
        &self,
        quote: &QuoteContext,
        resolved: &ResolvedScope,
        input: &EnsureThreadInput,
    ) -> ChatResult<ChatThread> {
        let unique_name =
            build_quote_conversation_name(&quote.id, &resolved.scope, resolved.scoped);
        let organization_id = resolved
            .scope
            .gallery_branch_org_id
            .clone()
            .unwrap_or_else(|| quote.owner_org_id.clone());

        let mut metadata = ThreadMetadata {
            conversation_type: Some(ThreadConversationType::Gallery.as_str().to_string()),
            ..Default::default()
        };
        if resolved.scoped {
            metadata.merge_scope(&resolved.scope);
        }
        let metadata_json = metadata.to_json()?;

        let friendly_name = if quote.title.is_empty() {
            format!("报价单 {}", quote.id)
        } else {
            quote.title.clone()
        };

        // 服务商重名会话是并发信号：按唯一名回查接管既有会话
        let conversation = match self
            .provider
            .create_conversation(CreateConversationParams {
                unique_name: unique_name.clone(),
                friendly_name,
                attributes: metadata_json.clone(),
            })
            .await
        {
            Ok(conversation) => conversation,
            Err(e) if e.is_conflict() => {
                info!(
                    "[ThreadOrch] 会话 {} 已存在于服务商侧，回查接管",
                    unique_name
                );
                self.provider.fetch_conversation(&unique_name).await?
            }
            Err(e) => return Err(e),
        };

        let created = self
            .threads
            .create_thread(NewThread {
                quote_id: Some(quote.id.clone()),
                shipment_id: resolved.scope.shipment_id.clone(),
                organization_id,
                shipper_branch_org_id: resolved.scope.shipper_branch_org_id.clone(),
                gallery_branch_org_id: resolved.scope.gallery_branch_org_id.clone(),
                conversation_sid: conversation.sid,
                conversation_unique_name: unique_name,
                metadata: metadata_json,
                created_by: input.initiator_user_id.clone(),
                conversation_type: ThreadConversationType::Gallery,
                initiator_shipper_org_id: None,
            })
            .await;

        let thread = match created {
            Ok(thread) => thread,
            Err(e) if e.is_conflict() => {
                // 并发创建竞争失败：对方已落库，重查并复用
                info!(
                    "[ThreadOrch] 线程创建命中唯一约束（并发竞争），重查复用（报价单 {}）",
                    quote.id
                );
                match self.lookup_thread(&quote.id, resolved).await? {
                    Some(thread) => thread,
                    // 冲突但重查不到属于逻辑错误而非竞争，原样上抛
                    None => return Err(e),
                }
            }
            Err(e) => return Err(e),
        };

        info!(
            "[ThreadOrch] ✅ 线程就绪 {}（报价单 {}）",
            thread.id, quote.id
        );
        self.seed_default_participants(&thread, quote, &resolved.scope, input)
            .await;
        self.refreshed(&thread.id).await
    }

    /// 播种默认参与者：提交人（client）、画廊组织成员（client）、
    /// 货运方组织成员（shipper）。逐个隔离失败，单个成员出错不影响其余。
    async fn seed_default_participants(
        &self,
        thread: &ChatThread,
        quote: &QuoteContext,
        scope: &ConversationScope,
        input: &EnsureThreadInput,
    ) {
        let gallery_org_id = scope
            .gallery_branch_org_id
            .clone()
            .unwrap_or_else(|| quote.owner_org_id.clone());

        self.seed_one(
            &thread.id,
            &quote.submitted_by,
            &gallery_org_id,
            ParticipantRole::Client,
        )
        .await;

        match self
            .directory
            .get_members_for_organization(&gallery_org_id)
            .await
        {
            Ok(members) => {
                for member in members {
                    if member.user_id == input.initiator_user_id {
                        continue;
                    }
                    self.seed_one(
                        &thread.id,
                        &member.user_id,
                        &gallery_org_id,
                        ParticipantRole::Client,
                    )
                    .await;
                }
            }
            Err(e) => warn!(
                "[ThreadOrch] ⚠️ 拉取画廊组织 {} 成员失败（忽略）: {}",
                gallery_org_id, e
            ),
        }

        if let Some(shipper_org_id) = scope.shipper_branch_org_id.as_deref() {
            match self
                .directory
                .get_members_for_organization(shipper_org_id)
                .await
            {
                Ok(members) => {
                    for member in members {
                        if member.user_id == input.initiator_user_id {
                            continue;
                        }
                        self.seed_one(
                            &thread.id,
                            &member.user_id,
                            shipper_org_id,
                            ParticipantRole::Shipper,
                        )
                        .await;
                    }
                }
                Err(e) => warn!(
                    "[ThreadOrch] ⚠️ 拉取货运组织 {} 成员失败（忽略）: {}",
                    shipper_org_id, e
                ),
            }
        }
    }

    async fn seed_one(&self, thread_id: &str, user_id: &str, org_id: &str, role: ParticipantRole) {
        let result = self
            .participants
            .ensure_participant_in_thread(EnsureParticipantInput {
                thread_id: thread_id.to_string(),
                user_id: user_id.to_string(),
                organization_id: Some(org_id.to_string()),
                role: Some(role),
            })
            .await;
        if let Err(e) = result {
            warn!(
                "[ThreadOrch] ⚠️ 播种参与者 {} 到线程 {} 失败（忽略）: {}",
                user_id, thread_id, e
            );
        }
    }

    async fn refreshed(&self, thread_id: &str) -> ChatResult<ChatThread> {
        self.threads
            .get_thread_by_id(thread_id)
            .await?
            .ok_or_else(|| ChatError::not_found(format!("线程 {}", thread_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::participant::RoleTokenConfig;
    use crate::chat::provider::testing::RecordingProvider;
    use crate::chat::provider::ConversationRef;
    use crate::chat::scope::ScopeField;
    use crate::chat::store::{self, ParticipantDao};
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::{Pool, Sqlite};

    async fn memory_pool() -> Pool<Sqlite> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("连接内存数据库失败");
        store::init_db_with_connection(&pool)
            .await
            .expect("初始化表失败");
        pool
    }

    /// 场景数据：画廊 G1（成员 U1）、货运方 S1（成员 U2、U3）、报价单 Q1
    async fn seed_directory(pool: &Pool<Sqlite>, quote_shipment: Option<&str>) {
        for (id, name, org_type) in [
            ("G1", "星河画廊", "gallery"),
            ("G2", "星河画廊·巴黎分部", "gallery"),
            ("S1", "环球艺术货运", "partner"),
        ] {
            sqlx::query("INSERT INTO organizations (id, name, org_type) VALUES (?,?,?)")
                .bind(id)
                .bind(name)
                .bind(org_type)
                .execute(pool)
                .await
                .unwrap();
        }
        for (user, org) in [("U1", "G1"), ("U2", "S1"), ("U3", "S1")] {
            sqlx::query("INSERT INTO org_memberships (user_id, organization_id) VALUES (?,?)")
                .bind(user)
                .bind(org)
                .execute(pool)
                .await
                .unwrap();
        }
        for (user, name) in [("U1", "张明"), ("U2", "王芳"), ("U3", "刘伟")] {
            sqlx::query("INSERT INTO profiles (user_id, full_name) VALUES (?,?)")
                .bind(user)
                .bind(name)
                .execute(pool)
                .await
                .unwrap();
        }
        sqlx::query(
            "INSERT INTO quotes (id, title, owner_org_id, shipment_id, submitted_by) VALUES ('Q1', '双年展回运', 'G1', ?, 'U1')",
        )
        .bind(quote_shipment)
        .execute(pool)
        .await
        .unwrap();
    }

    fn orchestrator(
        pool: &Pool<Sqlite>,
        provider: Arc<dyn ConversationProvider>,
    ) -> ThreadOrchestrator {
        let participants = Arc::new(ParticipantResolver::new(
            ThreadDao::new(pool.clone()),
            ParticipantDao::new(pool.clone()),
            DirectoryDao::new(pool.clone()),
            provider.clone(),
            RoleTokenConfig::new("RL_client", "RL_shipper").unwrap(),
        ));
        ThreadOrchestrator::new(
            ThreadDao::new(pool.clone()),
            DirectoryDao::new(pool.clone()),
            provider,
            participants,
        )
    }

    fn scoped_input() -> EnsureThreadInput {
        EnsureThreadInput {
            quote_id: "Q1".to_string(),
            initiator_user_id: "U1".to_string(),
            shipper_branch_org_id: ScopeField::Value("S1".to_string()),
            ..Default::default()
        }
    }

    async fn thread_count(pool: &Pool<Sqlite>) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM chat_threads")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_scenario_seeds_expected_participants() {
        let pool = memory_pool().await;
        seed_directory(&pool, None).await;
        let provider = Arc::new(RecordingProvider::default());
        let orch = orchestrator(&pool, provider.clone());

        let thread = orch.ensure_thread_for_quote(scoped_input()).await.unwrap();

        // 画廊组织解析为报价单属主 G1
        assert_eq!(thread.gallery_branch_org_id.as_deref(), Some("G1"));
        assert_eq!(thread.shipper_branch_org_id.as_deref(), Some("S1"));

        let participants = ParticipantDao::new(pool.clone());
        let u1 = participants
            .get_participant_record(&thread.id, "U1")
            .await
            .unwrap()
            .expect("提交人应在场");
        let u2 = participants
            .get_participant_record(&thread.id, "U2")
            .await
            .unwrap()
            .expect("货运成员 U2 应在场");
        let u3 = participants
            .get_participant_record(&thread.id, "U3")
            .await
            .unwrap()
            .expect("货运成员 U3 应在场");
        assert_eq!(u1.role, ParticipantRole::Client);
        assert_eq!(u2.role, ParticipantRole::Shipper);
        assert_eq!(u3.role, ParticipantRole::Shipper);
    }

    #[tokio::test]
    async fn test_ensure_thread_is_idempotent() {
        let pool = memory_pool().await;
        seed_directory(&pool, None).await;
        let provider = Arc::new(RecordingProvider::default());
        let orch = orchestrator(&pool, provider.clone());

        let first = orch.ensure_thread_for_quote(scoped_input()).await.unwrap();
        let second = orch.ensure_thread_for_quote(scoped_input()).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(thread_count(&pool).await, 1);
        // 第二次调用不产生任何创建类副作用
        assert_eq!(provider.create_count(), 1);
        assert_eq!(provider.added_participants().len(), 3);
    }

    #[tokio::test]
    async fn test_unscoped_and_scoped_requests_yield_distinct_threads() {
        let pool = memory_pool().await;
        seed_directory(&pool, None).await;
        let provider = Arc::new(RecordingProvider::default());
        let orch = orchestrator(&pool, provider.clone());

        let unscoped = orch
            .ensure_thread_for_quote(EnsureThreadInput {
                quote_id: "Q1".to_string(),
                initiator_user_id: "U1".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(unscoped.conversation_unique_name, "quote::Q1");

        // 带范围的请求与存量无范围线程的过滤器不匹配，会另起线程
        let scoped = orch.ensure_thread_for_quote(scoped_input()).await.unwrap();
        assert_ne!(unscoped.id, scoped.id);
        assert!(scoped
            .conversation_unique_name
            .starts_with("quote::Q1::scope::"));
        assert_eq!(thread_count(&pool).await, 2);
    }

    #[tokio::test]
    async fn test_provider_duplicate_conversation_recovered_by_fetch() {
        let pool = memory_pool().await;
        seed_directory(&pool, None).await;
        let provider = Arc::new(RecordingProvider::default());
        // 服务商侧已有同名会话（例如上一次进程在落库前崩溃）
        let input = scoped_input();
        let quote = DirectoryDao::new(pool.clone())
            .get_quote_context("Q1")
            .await
            .unwrap()
            .unwrap();
        let resolved = resolve_scope(&quote, &input);
        let unique_name = build_quote_conversation_name("Q1", &resolved.scope, true);
        provider.preload_conversation(&unique_name, "CH900");

        let orch = orchestrator(&pool, provider.clone());
        let thread = orch.ensure_thread_for_quote(input).await.unwrap();

        // 未新建服务商会话，直接接管既有 sid
        assert_eq!(provider.create_count(), 0);
        assert_eq!(thread.conversation_sid, "CH900");
    }

    /// 在 create_conversation 期间抢先落库同名线程，模拟另一进程赢得竞争
    struct RacingProvider {
        inner: RecordingProvider,
        threads: ThreadDao,
        winner_thread_id: std::sync::Mutex<Option<String>>,
    }

    #[async_trait]
    impl ConversationProvider for RacingProvider {
        async fn create_conversation(
            &self,
            params: crate::chat::provider::CreateConversationParams,
        ) -> ChatResult<ConversationRef> {
            let winner = self
                .threads
                .create_thread(NewThread {
                    quote_id: Some("Q1".to_string()),
                    shipment_id: None,
                    organization_id: "G1".to_string(),
                    shipper_branch_org_id: Some("S1".to_string()),
                    gallery_branch_org_id: Some("G1".to_string()),
                    conversation_sid: "CH777".to_string(),
                    conversation_unique_name: params.unique_name.clone(),
                    metadata: "{}".to_string(),
                    created_by: "U9".to_string(),
                    conversation_type: ThreadConversationType::Gallery,
                    initiator_shipper_org_id: None,
                })
                .await?;
            *self.winner_thread_id.lock().unwrap() = Some(winner.id);
            self.inner.create_conversation(params).await
        }

        async fn fetch_conversation(&self, unique_name: &str) -> ChatResult<ConversationRef> {
            self.inner.fetch_conversation(unique_name).await
        }

        async fn add_participant(
            &self,
            conversation_sid: &str,
            identity: &str,
            role_sid: &str,
        ) -> ChatResult<()> {
            self.inner
                .add_participant(conversation_sid, identity, role_sid)
                .await
        }

        async fn update_conversation_attributes(
            &self,
            conversation_sid: &str,
            attributes: &str,
        ) -> ChatResult<()> {
            self.inner
                .update_conversation_attributes(conversation_sid, attributes)
                .await
        }
    }

    #[tokio::test]
    async fn test_store_uniqueness_race_recovered_by_relookup() {
        let pool = memory_pool().await;
        seed_directory(&pool, None).await;
        let provider = Arc::new(RacingProvider {
            inner: RecordingProvider::default(),
            threads: ThreadDao::new(pool.clone()),
            winner_thread_id: std::sync::Mutex::new(None),
        });
        let orch = orchestrator(&pool, provider.clone());

        let thread = orch.ensure_thread_for_quote(scoped_input()).await.unwrap();

        let winner_id = provider.winner_thread_id.lock().unwrap().clone().unwrap();
        // 竞争失败方复用赢家落库的线程，不报错也不重复建线程
        assert_eq!(thread.id, winner_id);
        assert_eq!(thread_count(&pool).await, 1);
    }

    #[tokio::test]
    async fn test_lenient_fallback_match_then_scope_reconcile() {
        let pool = memory_pool().await;
        seed_directory(&pool, None).await;
        let provider = Arc::new(RecordingProvider::default());
        let orch = orchestrator(&pool, provider.clone());

        // 先以显式画廊分部 G2 建线程
        let first = orch
            .ensure_thread_for_quote(EnsureThreadInput {
                quote_id: "Q1".to_string(),
                initiator_user_id: "U1".to_string(),
                shipper_branch_org_id: ScopeField::Value("S1".to_string()),
                gallery_branch_org_id: ScopeField::Value("G2".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(first.gallery_branch_org_id.as_deref(), Some("G2"));

        // 再次请求：只提供货运方过滤器，画廊走默认解析（属主 G1）。
        // 范围查询（G1）未命中，回退查询按"提供过的过滤器全部一致"宽松接受，
        // 随后范围列按新解析结果对账更新。
        let second = orch.ensure_thread_for_quote(scoped_input()).await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.gallery_branch_org_id.as_deref(), Some("G1"));
        assert_eq!(thread_count(&pool).await, 1);

        let metadata = ThreadMetadata::parse(&second.metadata);
        assert_eq!(
            metadata
                .scope
                .unwrap()
                .gallery_branch_org_id
                .as_deref(),
            Some("G1")
        );
    }
}
