//! 货运方点对点线程确权服务
//!
//! 两个货运组织之间的直连线程：唯一名按组织对规范排序构造，
//! `ensure(A,B)` 与 `ensure(B,A)` 收敛到同一线程。发起方角色在创建时
//! 落定且不再变更；组织角色与聚合元数据在每次调用时按当前成员全量重建。

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::chat::error::{ChatError, ChatResult, SyncOutcome};
use crate::chat::naming::{build_peer_conversation_name, org_id_cmp};
use crate::chat::participant::{EnsureParticipantInput, ParticipantResolver};
use crate::chat::provider::{ConversationProvider, CreateConversationParams};
use crate::chat::store::models::{
    ChatThread, NewThread, ParticipantRole, ShipperThreadRole, ThreadConversationType,
};
use crate::chat::store::{DirectoryDao, ThreadDao};
use crate::chat::thread::metadata::{ShipperSummary, ThreadMetadata};

/// 点对点线程确权入参
#[derive(Debug, Clone)]
pub struct PeerThreadInput {
    pub initiator_org_id: String,
    pub target_org_id: String,
    pub initiator_user_id: String,
    pub quote_id: Option<String>,
    pub shipment_id: Option<String>,
}

/// 点对点线程确权结果
#[derive(Debug)]
pub struct PeerThreadResult {
    pub thread: ChatThread,
    /// 服务商属性同步结果（尽力而为）
    pub attributes_sync: SyncOutcome,
}

/// 点对点线程确权服务
pub struct PeerThreadOrchestrator {
    threads: ThreadDao,
    directory: DirectoryDao,
    provider: Arc<dyn ConversationProvider>,
    participants: Arc<ParticipantResolver>,
}

impl PeerThreadOrchestrator {
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

    /// 确保两个货运组织之间的点对点线程存在并返回
    pub async fn ensure_peer_thread(&self, input: PeerThreadInput) -> ChatResult<PeerThreadResult> {
        if input.initiator_org_id.is_empty() || input.target_org_id.is_empty() {
            return Err(ChatError::InvalidArgument {
                message: "点对点线程需要两个非空组织 ID".to_string(),
            });
        }
        if input.initiator_org_id == input.target_org_id {
            return Err(ChatError::InvalidArgument {
                message: "点对点线程的两个组织必须不同".to_string(),
            });
        }

        let unique_name = build_peer_conversation_name(
            &input.initiator_org_id,
            &input.target_org_id,
            input.quote_id.as_deref(),
            input.shipment_id.as_deref(),
        );

        let thread = match self.threads.get_thread_by_unique_name(&unique_name).await? {
            Some(thread) => {
                debug!("[PeerOrch] 复用点对点线程 {} ({})", thread.id, unique_name);
                thread
            }
            None => self.create_peer_thread(&input, &unique_name).await?,
        };

        // 组织角色每次调用重算：发起方身份以线程落库值为准，不会被旧写入卡住
        let recorded_initiator = thread
            .initiator_shipper_org_id
            .clone()
            .unwrap_or_else(|| input.initiator_org_id.clone());
        for org_id in [&input.initiator_org_id, &input.target_org_id] {
            let role = if *org_id == recorded_initiator {
                ShipperThreadRole::Initiator
            } else {
                ShipperThreadRole::Peer
            };
            self.threads
                .ensure_thread_shipper(&thread.id, org_id, role)
                .await?;
        }

        let attributes_sync = self.rebuild_metadata(&thread).await?;
        self.seed_participants(&thread, &input).await;

        let thread = self
            .threads
            .get_thread_by_id(&thread.id)
            .await?
            .ok_or_else(|| ChatError::not_found(format!("线程 {}", thread.id)))?;
        Ok(PeerThreadResult {
            thread,
            attributes_sync,
        })
    }

    async fn create_peer_thread(
        &self,
        input: &PeerThreadInput,
        unique_name: &str,
    ) -> ChatResult<ChatThread> {
        let metadata = ThreadMetadata {
            conversation_type: Some(ThreadConversationType::ShipperPeer.as_str().to_string()),
            ..Default::default()
        };
        let metadata_json = metadata.to_json()?;

        let conversation = match self
            .provider
            .create_conversation(CreateConversationParams {
                unique_name: unique_name.to_string(),
                friendly_name: format!(
                    "货运直连 {} ↔ {}",
                    input.initiator_org_id, input.target_org_id
                ),
                attributes: metadata_json.clone(),
            })
            .await
        {
            Ok(conversation) => conversation,
            Err(e) if e.is_conflict() => {
                info!("[PeerOrch] 会话 {} 已存在于服务商侧，回查接管", unique_name);
                self.provider.fetch_conversation(unique_name).await?
            }
            Err(e) => return Err(e),
        };

        let created = self
            .threads
            .create_thread(NewThread {
                quote_id: input.quote_id.clone(),
                shipment_id: input.shipment_id.clone(),
                organization_id: input.initiator_org_id.clone(),
                shipper_branch_org_id: None,
                gallery_branch_org_id: None,
                conversation_sid: conversation.sid,
                conversation_unique_name: unique_name.to_string(),
                metadata: metadata_json,
                created_by: input.initiator_user_id.clone(),
                conversation_type: ThreadConversationType::ShipperPeer,
                initiator_shipper_org_id: Some(input.initiator_org_id.clone()),
            })
            .await;

        match created {
            Ok(thread) => {
                info!("[PeerOrch] ✅ 点对点线程就绪 {} ({})", thread.id, unique_name);
                Ok(thread)
            }
            Err(e) if e.is_conflict() => {
                info!(
                    "[PeerOrch] 线程创建命中唯一约束（并发竞争），重查复用 ({})",
                    unique_name
                );
                match self.threads.get_thread_by_unique_name(unique_name).await? {
                    Some(thread) => Ok(thread),
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// 按当前全量组织成员关系重建聚合元数据，并尽力推送到服务商属性
    async fn rebuild_metadata(&self, thread: &ChatThread) -> ChatResult<SyncOutcome> {
        let mut shippers = self.threads.get_thread_shippers(&thread.id).await?;
        shippers.sort_by(|a, b| org_id_cmp(&a.shipper_org_id, &b.shipper_org_id));

        let mut summaries = Vec::with_capacity(shippers.len());
        for shipper in &shippers {
            let org = self
                .directory
                .get_organization_by_id(&shipper.shipper_org_id)
                .await?;
            summaries.push(ShipperSummary {
                org_id: shipper.shipper_org_id.clone(),
                name: org
                    .as_ref()
                    .map(|o| o.name.clone())
                    .unwrap_or_else(|| shipper.shipper_org_id.clone()),
                role: shipper.role.as_str().to_string(),
                logo_url: org.and_then(|o| o.logo_url),
            });
        }

        let mut metadata = ThreadMetadata::parse(&thread.metadata);
        metadata.conversation_type =
            Some(ThreadConversationType::ShipperPeer.as_str().to_string());
        metadata.shippers = summaries;
        let metadata_json = metadata.to_json()?;

        self.threads
            .update_thread_metadata(&thread.id, &metadata_json)
            .await?;

        // 属性推送失败不致命：存储侧元数据为准
        let outcome = match self
            .provider
            .update_conversation_attributes(&thread.conversation_sid, &metadata_json)
            .await
        {
            Ok(()) => SyncOutcome::Synced,
            Err(e) => {
                warn!("[PeerOrch] ⚠️ 服务商属性同步失败（已记录）: {}", e);
                SyncOutcome::Deferred
            }
        };
        Ok(outcome)
    }

    /// 播种发起人与双方组织全部成员，角色一律为 shipper
    async fn seed_participants(&self, thread: &ChatThread, input: &PeerThreadInput) {
        self.seed_one(&thread.id, &input.initiator_user_id, &input.initiator_org_id)
            .await;

        for org_id in [&input.initiator_org_id, &input.target_org_id] {
            match self.directory.get_members_for_organization(org_id).await {
                Ok(members) => {
                    for member in members {
                        self.seed_one(&thread.id, &member.user_id, org_id).await;
                    }
                }
                Err(e) => warn!(
                    "[PeerOrch] ⚠️ 拉取组织 {} 成员失败（忽略）: {}",
                    org_id, e
                ),
            }
        }
    }

    async fn seed_one(&self, thread_id: &str, user_id: &str, org_id: &str) {
        // 点对点线程是纯货运空间，角色强制为 shipper
        let result = self
            .participants
            .ensure_participant_in_thread(EnsureParticipantInput {
                thread_id: thread_id.to_string(),
                user_id: user_id.to_string(),
                organization_id: Some(org_id.to_string()),
                role: Some(ParticipantRole::Shipper),
            })
            .await;
        if let Err(e) = result {
            warn!(
                "[PeerOrch] ⚠️ 播种参与者 {} 到线程 {} 失败（忽略）: {}",
                user_id, thread_id, e
            );
        }
    }
}
