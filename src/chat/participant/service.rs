//! 参与者确权服务
//!
//! 把用户解析进线程：校验组织成员资格、派生角色与稳定外部身份、落参与者
//! 记录、挂载到服务商会话、回写展示元数据。重复调用是严格幂等空操作。

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::chat::error::{ChatError, ChatResult, SyncOutcome};
use crate::chat::provider::ConversationProvider;
use crate::chat::store::models::{
    ChatThread, ChatThreadParticipant, NewParticipant, ParticipantRole,
};
use crate::chat::store::{DirectoryDao, ParticipantDao, ThreadDao};
use crate::chat::thread::metadata::{ParticipantSummary, ThreadMetadata};

/// 角色 token 配置
///
/// 服务商侧每个角色对应一个 role SID，缺失属于启动级配置错误，在构造时
/// 即失败，不进入重试路径。
#[derive(Clone, Debug)]
pub struct RoleTokenConfig {
    client_role_sid: String,
    shipper_role_sid: String,
}

impl RoleTokenConfig {
    pub fn new(
        client_role_sid: impl Into<String>,
        shipper_role_sid: impl Into<String>,
    ) -> ChatResult<Self> {
        let client_role_sid = client_role_sid.into();
        let shipper_role_sid = shipper_role_sid.into();
        if client_role_sid.is_empty() {
            return Err(ChatError::Config {
                message: "client 角色 token 未配置".to_string(),
            });
        }
        if shipper_role_sid.is_empty() {
            return Err(ChatError::Config {
                message: "shipper 角色 token 未配置".to_string(),
            });
        }
        Ok(Self {
            client_role_sid,
            shipper_role_sid,
        })
    }

    pub fn role_sid(&self, role: ParticipantRole) -> &str {
        match role {
            ParticipantRole::Client => &self.client_role_sid,
            ParticipantRole::Shipper => &self.shipper_role_sid,
        }
    }
}

/// 参与者确权入参
#[derive(Debug, Clone)]
pub struct EnsureParticipantInput {
    pub thread_id: String,
    pub user_id: String,
    /// 显式组织覆盖，缺省取线程主组织
    pub organization_id: Option<String>,
    /// 显式角色覆盖，缺省按组织类型派生
    pub role: Option<ParticipantRole>,
}

/// 参与者确权服务
pub struct ParticipantResolver {
    threads: ThreadDao,
    participants: ParticipantDao,
    directory: DirectoryDao,
    provider: Arc<dyn ConversationProvider>,
    roles: RoleTokenConfig,
}

impl ParticipantResolver {
    pub fn new(
        threads: ThreadDao,
        participants: ParticipantDao,
        directory: DirectoryDao,
        provider: Arc<dyn ConversationProvider>,
        roles: RoleTokenConfig,
    ) -> Self {
        Self {
            threads,
            participants,
            directory,
            provider,
            roles,
        }
    }

    /// 确保用户在线程中
    ///
    /// 已在场的参与者只刷新展示元数据，不再产生服务商调用。
    pub async fn ensure_participant_in_thread(
        &self,
        input: EnsureParticipantInput,
    ) -> ChatResult<(ChatThreadParticipant, SyncOutcome)> {
        let thread = self
            .threads
            .get_thread_by_id(&input.thread_id)
            .await?
            .ok_or_else(|| ChatError::not_found(format!("线程 {}", input.thread_id)))?;

        if let Some(existing) = self
            .participants
            .get_participant_record(&thread.id, &input.user_id)
            .await?
        {
            debug!(
                "[Participant] 用户 {} 已在线程 {} 中，仅刷新展示元数据",
                input.user_id, thread.id
            );
            self.sync_display_metadata(&thread, &input.user_id, existing.role)
                .await?;
            return Ok((existing, SyncOutcome::Synced));
        }

        let organization_id = input
            .organization_id
            .clone()
            .unwrap_or_else(|| thread.organization_id.clone());

        // 成员资格校验：不具备目标组织成员资格直接拒绝
        if self
            .directory
            .get_membership_for_org(&input.user_id, &organization_id)
            .await?
            .is_none()
        {
            return Err(ChatError::Unauthorized {
                message: format!("用户 {} 不是组织 {} 的成员", input.user_id, organization_id),
            });
        }

        let role = match input.role {
            Some(role) => role,
            None => {
                let org = self
                    .directory
                    .get_organization_by_id(&organization_id)
                    .await?
                    .ok_or_else(|| ChatError::not_found(format!("组织 {}", organization_id)))?;
                if org.org_type == "partner" {
                    ParticipantRole::Shipper
                } else {
                    ParticipantRole::Client
                }
            }
        };

        let identity = role.identity_for(&input.user_id);
        let role_sid = self.roles.role_sid(role).to_string();

        let participant = self
            .participants
            .upsert_participant(NewParticipant {
                thread_id: thread.id.clone(),
                user_id: input.user_id.clone(),
                organization_id,
                role,
                identity: identity.clone(),
                role_sid: role_sid.clone(),
            })
            .await?;
        info!(
            "[Participant] 用户 {} 以 {} 角色加入线程 {}",
            input.user_id,
            role.as_str(),
            thread.id
        );

        // 服务商挂载失败不致命：本地记录为准，后续幂等调用补齐
        let outcome = match self
            .provider
            .add_participant(&thread.conversation_sid, &identity, &role_sid)
            .await
        {
            Ok(()) => SyncOutcome::Synced,
            Err(e) if e.is_conflict() => {
                debug!("[Participant] 身份 {} 已挂载在会话上", identity);
                SyncOutcome::Synced
            }
            Err(e) => {
                warn!("[Participant] ⚠️ 服务商挂载参与者失败（已记录）: {}", e);
                SyncOutcome::Deferred
            }
        };

        self.sync_display_metadata(&thread, &input.user_id, role)
            .await?;

        Ok((participant, outcome))
    }

    /// 把参与者展示信息写入线程元数据（槽位先写者保留）
    async fn sync_display_metadata(
        &self,
        thread: &ChatThread,
        user_id: &str,
        role: ParticipantRole,
    ) -> ChatResult<()> {
        let full_name = self
            .directory
            .get_profile_by_user_id(user_id)
            .await?
            .map(|p| p.full_name)
            .unwrap_or_else(|| user_id.to_string());

        // 重新读线程行，避免覆盖其他参与者刚写入的元数据
        let current = self
            .threads
            .get_thread_by_id(&thread.id)
            .await?
            .map(|t| t.metadata)
            .unwrap_or_else(|| thread.metadata.clone());

        let mut metadata = ThreadMetadata::parse(&current);
        metadata.apply_participant(ParticipantSummary {
            user_id: user_id.to_string(),
            full_name,
            role,
        });
        self.threads
            .update_thread_metadata(&thread.id, &metadata.to_json()?)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::provider::testing::RecordingProvider;
    use crate::chat::store::models::{NewThread, ThreadConversationType};
    use crate::chat::store::{self};
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

    async fn seed_directory(pool: &Pool<Sqlite>) {
        for (id, name, org_type) in [
            ("G1", "星河画廊", "gallery"),
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
        for (user, org) in [("U1", "G1"), ("U2", "S1")] {
            sqlx::query("INSERT INTO org_memberships (user_id, organization_id) VALUES (?,?)")
                .bind(user)
                .bind(org)
                .execute(pool)
                .await
                .unwrap();
        }
        sqlx::query("INSERT INTO profiles (user_id, full_name) VALUES ('U1', '张明')")
            .execute(pool)
            .await
            .unwrap();
    }

    async fn seed_thread(pool: &Pool<Sqlite>) -> ChatThread {
        ThreadDao::new(pool.clone())
            .create_thread(NewThread {
                quote_id: Some("Q1".to_string()),
                shipment_id: None,
                organization_id: "G1".to_string(),
                shipper_branch_org_id: Some("S1".to_string()),
                gallery_branch_org_id: Some("G1".to_string()),
                conversation_sid: "CH001".to_string(),
                conversation_unique_name: "quote::Q1".to_string(),
                metadata: "{}".to_string(),
                created_by: "U1".to_string(),
                conversation_type: ThreadConversationType::Gallery,
                initiator_shipper_org_id: None,
            })
            .await
            .unwrap()
    }

    fn resolver(pool: &Pool<Sqlite>, provider: Arc<RecordingProvider>) -> ParticipantResolver {
        ParticipantResolver::new(
            ThreadDao::new(pool.clone()),
            ParticipantDao::new(pool.clone()),
            DirectoryDao::new(pool.clone()),
            provider,
            RoleTokenConfig::new("RL_client", "RL_shipper").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_repeat_call_is_idempotent_noop() {
        let pool = memory_pool().await;
        seed_directory(&pool).await;
        let thread = seed_thread(&pool).await;
        let provider = Arc::new(RecordingProvider::default());
        let resolver = resolver(&pool, provider.clone());

        let input = EnsureParticipantInput {
            thread_id: thread.id.clone(),
            user_id: "U1".to_string(),
            organization_id: None,
            role: None,
        };
        let (first, _) = resolver
            .ensure_participant_in_thread(input.clone())
            .await
            .unwrap();
        let (second, outcome) = resolver.ensure_participant_in_thread(input).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(outcome, SyncOutcome::Synced);
        // 服务商只收到一次挂载调用
        assert_eq!(provider.added_participants().len(), 1);
    }

    #[tokio::test]
    async fn test_membership_required() {
        let pool = memory_pool().await;
        seed_directory(&pool).await;
        let thread = seed_thread(&pool).await;
        let provider = Arc::new(RecordingProvider::default());
        let resolver = resolver(&pool, provider);

        let err = resolver
            .ensure_participant_in_thread(EnsureParticipantInput {
                thread_id: thread.id,
                user_id: "U9".to_string(),
                organization_id: None,
                role: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn test_role_derived_from_org_type_and_identity_format() {
        let pool = memory_pool().await;
        seed_directory(&pool).await;
        let thread = seed_thread(&pool).await;
        let provider = Arc::new(RecordingProvider::default());
        let resolver = resolver(&pool, provider.clone());

        // partner 组织派生 shipper 角色
        let (participant, _) = resolver
            .ensure_participant_in_thread(EnsureParticipantInput {
                thread_id: thread.id.clone(),
                user_id: "U2".to_string(),
                organization_id: Some("S1".to_string()),
                role: None,
            })
            .await
            .unwrap();
        assert_eq!(participant.role, ParticipantRole::Shipper);
        assert_eq!(participant.identity, "shipper:U2");
        assert_eq!(participant.role_sid, "RL_shipper");

        let added = provider.added_participants();
        assert_eq!(added[0].1, "shipper:U2");
    }

    #[tokio::test]
    async fn test_provider_failure_is_deferred_not_fatal() {
        let pool = memory_pool().await;
        seed_directory(&pool).await;
        let thread = seed_thread(&pool).await;
        let provider = Arc::new(RecordingProvider::default());
        provider.fail_add_participant();
        let resolver = resolver(&pool, provider.clone());

        let (participant, outcome) = resolver
            .ensure_participant_in_thread(EnsureParticipantInput {
                thread_id: thread.id.clone(),
                user_id: "U1".to_string(),
                organization_id: None,
                role: None,
            })
            .await
            .unwrap();
        // 本地记录已落，服务商副作用延期
        assert_eq!(outcome, SyncOutcome::Deferred);
        assert_eq!(participant.role, ParticipantRole::Client);

        // 元数据槽位已回写展示名
        let stored = ThreadDao::new(pool.clone())
            .get_thread_by_id(&thread.id)
            .await
            .unwrap()
            .unwrap();
        let metadata = ThreadMetadata::parse(&stored.metadata);
        assert_eq!(metadata.partner_name.as_deref(), Some("张明"));
    }

    #[tokio::test]
    async fn test_missing_role_token_is_config_error() {
        let err = RoleTokenConfig::new("", "RL_shipper").unwrap_err();
        assert!(matches!(err, ChatError::Config { .. }));
    }
}
