//! 线程元数据缓存
//!
//! 线程行上冗余一份 JSON 元数据（参与者摘要、范围回显、会话类型），供列表页
//! 免 join 渲染。存储侧线程表是事实来源，这份缓存在每次参与者变动和范围对账
//! 时重写，同时尽力同步到服务商会话属性。

use serde::{Deserialize, Serialize};

use crate::chat::error::ChatResult;
use crate::chat::scope::ConversationScope;
use crate::chat::store::models::ParticipantRole;

/// 参与者摘要
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSummary {
    pub user_id: String,
    pub full_name: String,
    pub role: ParticipantRole,
}

/// 点对点线程中组织的摘要
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShipperSummary {
    pub org_id: String,
    pub name: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
}

/// 线程元数据
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadMetadata {
    /// 会话类型回显
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_type: Option<String>,
    /// 范围回显
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ConversationScope>,
    /// 参与者摘要（按用户去重）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<ParticipantSummary>,
    /// 画廊侧展示名槽位，先写者保留
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_name: Option<String>,
    /// 货运方展示名槽位，先写者保留
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipper_name: Option<String>,
    /// 点对点线程的组织列表（规范序）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shippers: Vec<ShipperSummary>,
}

impl ThreadMetadata {
    /// 从线程行的 JSON 文本解析，解析失败回退为空元数据
    pub fn parse(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_default()
    }

    pub fn to_json(&self) -> ChatResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// 合并解析后的范围回显（收窄保护由上层的列对账逻辑负责）
    pub fn merge_scope(&mut self, scope: &ConversationScope) {
        self.scope = Some(scope.clone());
    }

    /// 记入参与者摘要并按角色占展示名槽位
    ///
    /// 槽位先写者保留：已有非空值不会被覆盖。
    pub fn apply_participant(&mut self, summary: ParticipantSummary) {
        match summary.role {
            ParticipantRole::Client => {
                if self.partner_name.as_deref().unwrap_or("").is_empty() {
                    self.partner_name = Some(summary.full_name.clone());
                }
            }
            ParticipantRole::Shipper => {
                if self.shipper_name.as_deref().unwrap_or("").is_empty() {
                    self.shipper_name = Some(summary.full_name.clone());
                }
            }
        }

        if let Some(existing) = self
            .participants
            .iter_mut()
            .find(|p| p.user_id == summary.user_id)
        {
            *existing = summary;
        } else {
            self.participants.push(summary);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(user: &str, name: &str, role: ParticipantRole) -> ParticipantSummary {
        ParticipantSummary {
            user_id: user.to_string(),
            full_name: name.to_string(),
            role,
        }
    }

    #[test]
    fn test_parse_garbage_falls_back_to_default() {
        let meta = ThreadMetadata::parse("not-json");
        assert!(meta.participants.is_empty());
        assert!(meta.scope.is_none());
    }

    #[test]
    fn test_slots_are_first_writer_wins() {
        let mut meta = ThreadMetadata::default();
        meta.apply_participant(summary("U1", "张明", ParticipantRole::Client));
        meta.apply_participant(summary("U2", "李华", ParticipantRole::Client));
        meta.apply_participant(summary("U3", "Crate & Freight", ParticipantRole::Shipper));
        meta.apply_participant(summary("U4", "另一家货运", ParticipantRole::Shipper));

        assert_eq!(meta.partner_name.as_deref(), Some("张明"));
        assert_eq!(meta.shipper_name.as_deref(), Some("Crate & Freight"));
        assert_eq!(meta.participants.len(), 4);
    }

    #[test]
    fn test_participants_dedup_by_user() {
        let mut meta = ThreadMetadata::default();
        meta.apply_participant(summary("U1", "张明", ParticipantRole::Client));
        meta.apply_participant(summary("U1", "张明（更新）", ParticipantRole::Client));

        assert_eq!(meta.participants.len(), 1);
        assert_eq!(meta.participants[0].full_name, "张明（更新）");
    }

    #[test]
    fn test_roundtrip_preserves_scope_echo() {
        let mut meta = ThreadMetadata::default();
        meta.merge_scope(&ConversationScope {
            shipment_id: Some("SH1".to_string()),
            shipper_branch_org_id: Some("S1".to_string()),
            gallery_branch_org_id: None,
        });
        let json = meta.to_json().unwrap();
        let parsed = ThreadMetadata::parse(&json);
        assert_eq!(
            parsed.scope.unwrap().shipment_id.as_deref(),
            Some("SH1")
        );
    }
}
