//! 聊天存储数据访问层（DAO）
//!
//! 所有线程/参与者相关的数据库操作集中在这里，数据访问与业务逻辑分离。
//! 唯一约束冲突统一映射为 [`ChatError::Conflict`]，上层按幂等语义重查恢复。

use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info};
use uuid::Uuid;

use crate::chat::error::{ChatError, ChatResult};
use crate::chat::scope::ConversationScope;
use crate::chat::store::models::{
    ChatThread, ChatThreadParticipant, NewParticipant, NewThread, OrgMembership, Organization,
    ParticipantRole, Profile, QuoteContext, ShipperThreadRole, ThreadConversationType,
    ThreadShipper,
};

/// 把 sqlx 错误映射为领域错误，唯一约束冲突单独归类
fn map_store_err(err: sqlx::Error, what: &str) -> ChatError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_unique_violation() {
            return ChatError::conflict(format!("{} 唯一键冲突", what));
        }
    }
    ChatError::Store(err)
}

fn map_thread_row(row: &sqlx::sqlite::SqliteRow) -> ChatThread {
    let conversation_type: String = row.get("conversation_type");
    ChatThread {
        id: row.get("id"),
        quote_id: row.get("quote_id"),
        shipment_id: row.get("shipment_id"),
        organization_id: row.get("organization_id"),
        shipper_branch_org_id: row.get("shipper_branch_org_id"),
        gallery_branch_org_id: row.get("gallery_branch_org_id"),
        conversation_sid: row.get("conversation_sid"),
        conversation_unique_name: row.get("conversation_unique_name"),
        status: row.get("status"),
        metadata: row.get("metadata"),
        created_by: row.get("created_by"),
        conversation_type: ThreadConversationType::parse(&conversation_type),
        initiator_shipper_org_id: row.get("initiator_shipper_org_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn map_participant_row(row: &sqlx::sqlite::SqliteRow) -> ChatThreadParticipant {
    let role: String = row.get("role");
    ChatThreadParticipant {
        id: row.get("id"),
        thread_id: row.get("thread_id"),
        user_id: row.get("user_id"),
        organization_id: row.get("organization_id"),
        role: ParticipantRole::parse(&role),
        identity: row.get("identity"),
        role_sid: row.get("role_sid"),
        left_at: row.get("left_at"),
    }
}

const THREAD_COLUMNS: &str = r#"
    id, quote_id, shipment_id, organization_id,
    shipper_branch_org_id, gallery_branch_org_id,
    conversation_sid, conversation_unique_name,
    status, metadata, created_by, conversation_type,
    initiator_shipper_org_id, created_at, updated_at
"#;

/// 线程 DAO
#[derive(Clone)]
pub struct ThreadDao {
    db: Pool<Sqlite>,
}

impl ThreadDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 初始化线程相关表结构
    pub async fn init_db_with_connection(db: &Pool<Sqlite>) -> ChatResult<()> {
        info!("[ThreadDAO/DB] 初始化线程数据库表结构");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_threads (
                id TEXT PRIMARY KEY,
                quote_id TEXT,
                shipment_id TEXT,
                organization_id TEXT NOT NULL,
                shipper_branch_org_id TEXT,
                gallery_branch_org_id TEXT,
                conversation_sid TEXT NOT NULL DEFAULT '',
                conversation_unique_name TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'active',
                metadata TEXT NOT NULL DEFAULT '{}',
                created_by TEXT NOT NULL DEFAULT '',
                conversation_type TEXT NOT NULL DEFAULT 'gallery',
                initiator_shipper_org_id TEXT,
                created_at INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_thread_participants (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                organization_id TEXT NOT NULL,
                role TEXT NOT NULL,
                identity TEXT NOT NULL,
                role_sid TEXT NOT NULL DEFAULT '',
                left_at INTEGER,
                UNIQUE (thread_id, user_id)
            )
            "#,
        )
        .execute(db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_thread_shippers (
                thread_id TEXT NOT NULL,
                shipper_org_id TEXT NOT NULL,
                role TEXT NOT NULL,
                PRIMARY KEY (thread_id, shipper_org_id)
            )
            "#,
        )
        .execute(db)
        .await?;

        info!("[ThreadDAO/DB] 线程表初始化完成");
        Ok(())
    }

    /// 按（报价单、货运方分支、画廊分支）范围查线程，空值精确匹配
    pub async fn get_thread_by_quote_scope(
        &self,
        quote_id: &str,
        shipper_branch_org_id: Option<&str>,
        gallery_branch_org_id: Option<&str>,
    ) -> ChatResult<Option<ChatThread>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {THREAD_COLUMNS} FROM chat_threads
            WHERE quote_id = ?
              AND conversation_type = 'gallery'
              AND shipper_branch_org_id IS ?
              AND gallery_branch_org_id IS ?
            ORDER BY created_at ASC
            LIMIT 1
            "#
        ))
        .bind(quote_id)
        .bind(shipper_branch_org_id)
        .bind(gallery_branch_org_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.as_ref().map(map_thread_row))
    }

    /// 按（运单、货运方分支、画廊分支）范围查线程
    pub async fn get_thread_by_shipment_scope(
        &self,
        shipment_id: &str,
        shipper_branch_org_id: Option<&str>,
        gallery_branch_org_id: Option<&str>,
    ) -> ChatResult<Option<ChatThread>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {THREAD_COLUMNS} FROM chat_threads
            WHERE shipment_id = ?
              AND conversation_type = 'gallery'
              AND shipper_branch_org_id IS ?
              AND gallery_branch_org_id IS ?
            ORDER BY created_at ASC
            LIMIT 1
            "#
        ))
        .bind(shipment_id)
        .bind(shipper_branch_org_id)
        .bind(gallery_branch_org_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.as_ref().map(map_thread_row))
    }

    /// 按报价单 ID 查全部画廊线程（回退查询，调用方再按过滤器筛选）
    pub async fn get_threads_by_quote_id(&self, quote_id: &str) -> ChatResult<Vec<ChatThread>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {THREAD_COLUMNS} FROM chat_threads
            WHERE quote_id = ? AND conversation_type = 'gallery'
            ORDER BY created_at ASC
            "#
        ))
        .bind(quote_id)
        .fetch_all(&self.db)
        .await?;
        debug!(
            "[ThreadDAO] 报价单 {} 回退查询命中 {} 条线程",
            quote_id,
            rows.len()
        );
        Ok(rows.iter().map(map_thread_row).collect())
    }

    /// 按会话唯一名查线程
    pub async fn get_thread_by_unique_name(
        &self,
        unique_name: &str,
    ) -> ChatResult<Option<ChatThread>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {THREAD_COLUMNS} FROM chat_threads
            WHERE conversation_unique_name = ?
            "#
        ))
        .bind(unique_name)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.as_ref().map(map_thread_row))
    }

    /// 按主键查线程
    pub async fn get_thread_by_id(&self, id: &str) -> ChatResult<Option<ChatThread>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {THREAD_COLUMNS} FROM chat_threads WHERE id = ?
            "#
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.as_ref().map(map_thread_row))
    }

    /// 创建线程记录，唯一名冲突返回 [`ChatError::Conflict`]
    pub async fn create_thread(&self, fields: NewThread) -> ChatResult<ChatThread> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp_millis();

        sqlx::query(
            r#"
            INSERT INTO chat_threads (
                id, quote_id, shipment_id, organization_id,
                shipper_branch_org_id, gallery_branch_org_id,
                conversation_sid, conversation_unique_name,
                status, metadata, created_by, conversation_type,
                initiator_shipper_org_id, created_at, updated_at
            ) VALUES (?,?,?,?,?,?,?,?,'active',?,?,?,?,?,?)
            "#,
        )
        .bind(&id)
        .bind(&fields.quote_id)
        .bind(&fields.shipment_id)
        .bind(&fields.organization_id)
        .bind(&fields.shipper_branch_org_id)
        .bind(&fields.gallery_branch_org_id)
        .bind(&fields.conversation_sid)
        .bind(&fields.conversation_unique_name)
        .bind(&fields.metadata)
        .bind(&fields.created_by)
        .bind(fields.conversation_type.as_str())
        .bind(&fields.initiator_shipper_org_id)
        .bind(now)
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(|e| map_store_err(e, "chat_threads"))?;

        info!(
            "[ThreadDAO] 新建线程 {} uniqueName={}",
            id, fields.conversation_unique_name
        );
        self.get_thread_by_id(&id)
            .await?
            .ok_or_else(|| ChatError::not_found(format!("线程 {}", id)))
    }

    /// 更新线程元数据缓存
    pub async fn update_thread_metadata(&self, id: &str, metadata: &str) -> ChatResult<()> {
        let now = chrono::Utc::now().timestamp_millis();
        sqlx::query(
            r#"
            UPDATE chat_threads SET metadata = ?, updated_at = ? WHERE id = ?
            "#,
        )
        .bind(metadata)
        .bind(now)
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// 更新线程范围列（仅范围漂移对账路径使用）
    pub async fn update_thread_scope(
        &self,
        id: &str,
        scope: &ConversationScope,
        metadata: &str,
    ) -> ChatResult<()> {
        let now = chrono::Utc::now().timestamp_millis();
        sqlx::query(
            r#"
            UPDATE chat_threads SET
                shipment_id = ?,
                shipper_branch_org_id = ?,
                gallery_branch_org_id = ?,
                metadata = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&scope.shipment_id)
        .bind(&scope.shipper_branch_org_id)
        .bind(&scope.gallery_branch_org_id)
        .bind(metadata)
        .bind(now)
        .bind(id)
        .execute(&self.db)
        .await?;
        info!("[ThreadDAO] 线程 {} 范围列已对账更新", id);
        Ok(())
    }

    /// 幂等登记点对点线程的组织角色，重复调用以最新角色为准
    pub async fn ensure_thread_shipper(
        &self,
        thread_id: &str,
        shipper_org_id: &str,
        role: ShipperThreadRole,
    ) -> ChatResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_thread_shippers (thread_id, shipper_org_id, role)
            VALUES (?, ?, ?)
            ON CONFLICT(thread_id, shipper_org_id) DO UPDATE SET
                role = excluded.role
            "#,
        )
        .bind(thread_id)
        .bind(shipper_org_id)
        .bind(role.as_str())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// 取线程当前全部组织成员关系
    pub async fn get_thread_shippers(&self, thread_id: &str) -> ChatResult<Vec<ThreadShipper>> {
        let rows = sqlx::query(
            r#"
            SELECT thread_id, shipper_org_id, role
            FROM chat_thread_shippers
            WHERE thread_id = ?
            "#,
        )
        .bind(thread_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let role: String = row.get("role");
                ThreadShipper {
                    thread_id: row.get("thread_id"),
                    shipper_org_id: row.get("shipper_org_id"),
                    role: ShipperThreadRole::parse(&role),
                }
            })
            .collect())
    }
}

/// 参与者 DAO
#[derive(Clone)]
pub struct ParticipantDao {
    db: Pool<Sqlite>,
}

impl ParticipantDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 取在场参与者记录（已退出的不算）
    pub async fn get_participant_record(
        &self,
        thread_id: &str,
        user_id: &str,
    ) -> ChatResult<Option<ChatThreadParticipant>> {
        let row = sqlx::query(
            r#"
            SELECT id, thread_id, user_id, organization_id, role, identity, role_sid, left_at
            FROM chat_thread_participants
            WHERE thread_id = ? AND user_id = ? AND left_at IS NULL
            "#,
        )
        .bind(thread_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.as_ref().map(map_participant_row))
    }

    /// 插入或更新参与者记录，(thread, user) 至多一条在场记录
    pub async fn upsert_participant(
        &self,
        fields: NewParticipant,
    ) -> ChatResult<ChatThreadParticipant> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO chat_thread_participants (
                id, thread_id, user_id, organization_id, role, identity, role_sid, left_at
            ) VALUES (?,?,?,?,?,?,?,NULL)
            ON CONFLICT(thread_id, user_id) DO UPDATE SET
                organization_id = excluded.organization_id,
                role = excluded.role,
                identity = excluded.identity,
                role_sid = excluded.role_sid,
                left_at = NULL
            "#,
        )
        .bind(&id)
        .bind(&fields.thread_id)
        .bind(&fields.user_id)
        .bind(&fields.organization_id)
        .bind(fields.role.as_str())
        .bind(&fields.identity)
        .bind(&fields.role_sid)
        .execute(&self.db)
        .await?;

        self.get_participant_record(&fields.thread_id, &fields.user_id)
            .await?
            .ok_or_else(|| {
                ChatError::not_found(format!(
                    "参与者 thread={} user={}",
                    fields.thread_id, fields.user_id
                ))
            })
    }
}

/// 目录 DAO：组织、成员、档案、报价单的只读访问
#[derive(Clone)]
pub struct DirectoryDao {
    db: Pool<Sqlite>,
}

impl DirectoryDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 初始化目录表结构（市场侧拥有，这里建表仅为本地/测试环境）
    pub async fn init_db_with_connection(db: &Pool<Sqlite>) -> ChatResult<()> {
        info!("[DirDAO/DB] 初始化目录数据库表结构");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS organizations (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                org_type TEXT NOT NULL DEFAULT '',
                logo_url TEXT
            )
            "#,
        )
        .execute(db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS org_memberships (
                user_id TEXT NOT NULL,
                organization_id TEXT NOT NULL,
                PRIMARY KEY (user_id, organization_id)
            )
            "#,
        )
        .execute(db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
                user_id TEXT PRIMARY KEY,
                full_name TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quotes (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL DEFAULT '',
                owner_org_id TEXT NOT NULL,
                shipment_id TEXT,
                submitted_by TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(db)
        .await?;

        info!("[DirDAO/DB] 目录表初始化完成");
        Ok(())
    }

    /// 查用户在指定组织的成员资格
    pub async fn get_membership_for_org(
        &self,
        user_id: &str,
        organization_id: &str,
    ) -> ChatResult<Option<OrgMembership>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, organization_id FROM org_memberships
            WHERE user_id = ? AND organization_id = ?
            "#,
        )
        .bind(user_id)
        .bind(organization_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(|row| OrgMembership {
            user_id: row.get("user_id"),
            organization_id: row.get("organization_id"),
        }))
    }

    /// 查组织全部成员
    pub async fn get_members_for_organization(
        &self,
        organization_id: &str,
    ) -> ChatResult<Vec<OrgMembership>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, organization_id FROM org_memberships
            WHERE organization_id = ?
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| OrgMembership {
                user_id: row.get("user_id"),
                organization_id: row.get("organization_id"),
            })
            .collect())
    }

    /// 查组织展示信息
    pub async fn get_organization_by_id(&self, id: &str) -> ChatResult<Option<Organization>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, org_type, logo_url FROM organizations WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(|row| Organization {
            id: row.get("id"),
            name: row.get("name"),
            org_type: row.get("org_type"),
            logo_url: row.get("logo_url"),
        }))
    }

    /// 查用户档案
    pub async fn get_profile_by_user_id(&self, user_id: &str) -> ChatResult<Option<Profile>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, full_name FROM profiles WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(|row| Profile {
            user_id: row.get("user_id"),
            full_name: row.get("full_name"),
        }))
    }

    /// 查报价单上下文
    pub async fn get_quote_context(&self, id: &str) -> ChatResult<Option<QuoteContext>> {
        let row = sqlx::query(
            r#"
            SELECT id, title, owner_org_id, shipment_id, submitted_by FROM quotes WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(|row| QuoteContext {
            id: row.get("id"),
            title: row.get("title"),
            owner_org_id: row.get("owner_org_id"),
            shipment_id: row.get("shipment_id"),
            submitted_by: row.get("submitted_by"),
        }))
    }
}

/// 初始化全部表结构（共享连接）
pub async fn init_db_with_connection(db: &Pool<Sqlite>) -> ChatResult<()> {
    ThreadDao::init_db_with_connection(db).await?;
    DirectoryDao::init_db_with_connection(db).await?;
    Ok(())
}
