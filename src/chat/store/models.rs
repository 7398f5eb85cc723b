//! 存储层数据模型
//!
//! 线程/参与者为本子系统拥有的表；组织、成员、档案、报价单为市场侧 CRUD
//! 拥有的目录数据，这里只读。

use serde::{Deserialize, Serialize};

/// 线程会话类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadConversationType {
    /// 画廊与货运方围绕报价单的协商线程
    Gallery,
    /// 货运方之间的点对点线程
    ShipperPeer,
}

impl ThreadConversationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadConversationType::Gallery => "gallery",
            ThreadConversationType::ShipperPeer => "shipper_peer",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "shipper_peer" => ThreadConversationType::ShipperPeer,
            _ => ThreadConversationType::Gallery,
        }
    }
}

/// 参与者角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    /// 画廊侧（客户）
    Client,
    /// 货运方侧
    Shipper,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Client => "client",
            ParticipantRole::Shipper => "shipper",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "shipper" => ParticipantRole::Shipper,
            _ => ParticipantRole::Client,
        }
    }

    /// 稳定外部身份串：角色 + 用户 ID 的纯函数，无需存储即可重建
    pub fn identity_for(&self, user_id: &str) -> String {
        format!("{}:{}", self.as_str(), user_id)
    }
}

/// 点对点线程中组织的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipperThreadRole {
    /// 发起方，创建时确定且不再变更
    Initiator,
    /// 对端
    Peer,
}

impl ShipperThreadRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShipperThreadRole::Initiator => "initiator",
            ShipperThreadRole::Peer => "peer",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "initiator" => ShipperThreadRole::Initiator,
            _ => ShipperThreadRole::Peer,
        }
    }
}

/// 聊天线程：把一个协商范围与一个外部会话资源绑定的持久记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatThread {
    pub id: String,
    /// 所属报价单 ID（点对点线程可为空）
    pub quote_id: Option<String>,
    pub shipment_id: Option<String>,
    /// 线程的主组织 ID
    pub organization_id: String,
    pub shipper_branch_org_id: Option<String>,
    pub gallery_branch_org_id: Option<String>,
    /// 外部会话资源 SID
    pub conversation_sid: String,
    /// 外部会话唯一名（幂等键）
    pub conversation_unique_name: String,
    pub status: String,
    /// 反规范化元数据缓存（JSON 文本）
    pub metadata: String,
    pub created_by: String,
    pub conversation_type: ThreadConversationType,
    /// 点对点线程的发起组织 ID
    pub initiator_shipper_org_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// 线程参与者记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatThreadParticipant {
    pub id: String,
    pub thread_id: String,
    pub user_id: String,
    pub organization_id: String,
    pub role: ParticipantRole,
    /// 外部身份串（role:userId）
    pub identity: String,
    /// 外部角色 token
    pub role_sid: String,
    /// 退出时间戳，NULL 表示在场
    pub left_at: Option<i64>,
}

/// 点对点线程的组织成员关系
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadShipper {
    pub thread_id: String,
    pub shipper_org_id: String,
    pub role: ShipperThreadRole,
}

/// 组织目录记录（只读）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: String,
    pub name: String,
    /// 组织类型："partner" 为货运方，其余为画廊/客户侧
    pub org_type: String,
    #[serde(default)]
    pub logo_url: Option<String>,
}

/// 组织成员资格（只读）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgMembership {
    pub user_id: String,
    pub organization_id: String,
}

/// 用户档案（只读）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user_id: String,
    pub full_name: String,
}

/// 报价单上下文（只读）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteContext {
    pub id: String,
    pub title: String,
    pub owner_org_id: String,
    pub shipment_id: Option<String>,
    pub submitted_by: String,
}

/// 新建线程的字段集合
#[derive(Debug, Clone)]
pub struct NewThread {
    pub quote_id: Option<String>,
    pub shipment_id: Option<String>,
    pub organization_id: String,
    pub shipper_branch_org_id: Option<String>,
    pub gallery_branch_org_id: Option<String>,
    pub conversation_sid: String,
    pub conversation_unique_name: String,
    pub metadata: String,
    pub created_by: String,
    pub conversation_type: ThreadConversationType,
    pub initiator_shipper_org_id: Option<String>,
}

/// 参与者 upsert 的字段集合
#[derive(Debug, Clone)]
pub struct NewParticipant {
    pub thread_id: String,
    pub user_id: String,
    pub organization_id: String,
    pub role: ParticipantRole,
    pub identity: String,
    pub role_sid: String,
}
