//! 会话范围（Scope）解析
//!
//! 一个线程的范围由（运单、货运方分支组织、画廊分支组织）三元组标识。
//! 调用方"显式传 null"与"完全不传"是两种不同的信号：前者表示"明确不要该维度"，
//! 后者表示"不关心，按默认值解析"。这里用 [`ScopeField`] 把三态建成一等类型。

use serde::{Deserialize, Serialize};

use crate::chat::store::models::QuoteContext;

/// 三态范围字段：未提供 / 显式置空 / 显式取值
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ScopeField<T> {
    /// 调用方未携带该字段，解析时走默认值
    #[default]
    NotProvided,
    /// 调用方显式置空，解析为"无"
    Null,
    /// 调用方显式给值
    Value(T),
}

impl<T: Clone> ScopeField<T> {
    /// 是否由调用方提供（显式置空也算提供）
    pub fn is_provided(&self) -> bool {
        !matches!(self, ScopeField::NotProvided)
    }

    /// 按"未提供时取默认值"规则解析
    pub fn resolve_or(&self, default: Option<T>) -> Option<T> {
        match self {
            ScopeField::NotProvided => default,
            ScopeField::Null => None,
            ScopeField::Value(v) => Some(v.clone()),
        }
    }

    /// 作为回退查询过滤器：未提供 = 自动匹配（None），提供 = 必须与存量值相等
    pub fn as_filter(&self) -> Option<Option<T>> {
        match self {
            ScopeField::NotProvided => None,
            ScopeField::Null => Some(None),
            ScopeField::Value(v) => Some(Some(v.clone())),
        }
    }
}

impl<T> From<Option<T>> for ScopeField<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => ScopeField::Value(v),
            None => ScopeField::Null,
        }
    }
}

/// 线程确权入参
#[derive(Debug, Clone, Default)]
pub struct EnsureThreadInput {
    /// 报价单 ID
    pub quote_id: String,
    /// 发起人用户 ID（参与者播种时跳过）
    pub initiator_user_id: String,
    /// 运单 ID（三态）
    pub shipment_id: ScopeField<String>,
    /// 货运方分支组织 ID（三态）
    pub shipper_branch_org_id: ScopeField<String>,
    /// 画廊分支组织 ID（三态）
    pub gallery_branch_org_id: ScopeField<String>,
}

/// 已解析的会话范围三元组
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationScope {
    pub shipment_id: Option<String>,
    pub shipper_branch_org_id: Option<String>,
    pub gallery_branch_org_id: Option<String>,
}

impl ConversationScope {
    /// 至少有一个维度非空
    pub fn has_any(&self) -> bool {
        self.shipment_id.is_some()
            || self.shipper_branch_org_id.is_some()
            || self.gallery_branch_org_id.is_some()
    }
}

/// 回退查询用的范围过滤器（仅回显调用方提供过的字段）
#[derive(Debug, Clone, Default)]
pub struct ScopeFilters {
    pub shipment_id: Option<Option<String>>,
    pub shipper_branch_org_id: Option<Option<String>>,
    pub gallery_branch_org_id: Option<Option<String>>,
}

/// 范围解析结果
#[derive(Debug, Clone)]
pub struct ResolvedScope {
    /// 解析后的范围三元组
    pub scope: ConversationScope,
    /// 是否构成有效范围（调用方请求过范围且至少一个维度解析非空）
    pub scoped: bool,
    /// 回退查询过滤器
    pub filters: ScopeFilters,
}

/// 从报价单上下文与入参解析会话范围
///
/// 规则：只要三个范围字段有任意一个被提供即视为"请求了范围"；此时画廊组织
/// 默认取报价单属主组织、运单默认取报价单自身运单，显式置空则保持为空。
pub fn resolve_scope(quote: &QuoteContext, input: &EnsureThreadInput) -> ResolvedScope {
    let scope_requested = input.shipment_id.is_provided()
        || input.shipper_branch_org_id.is_provided()
        || input.gallery_branch_org_id.is_provided();

    let scope = if scope_requested {
        ConversationScope {
            shipment_id: input.shipment_id.resolve_or(quote.shipment_id.clone()),
            shipper_branch_org_id: input.shipper_branch_org_id.resolve_or(None),
            gallery_branch_org_id: input
                .gallery_branch_org_id
                .resolve_or(Some(quote.owner_org_id.clone())),
        }
    } else {
        ConversationScope::default()
    };

    let scoped = scope_requested && scope.has_any();

    ResolvedScope {
        filters: ScopeFilters {
            shipment_id: input.shipment_id.as_filter(),
            shipper_branch_org_id: input.shipper_branch_org_id.as_filter(),
            gallery_branch_org_id: input.gallery_branch_org_id.as_filter(),
        },
        scope,
        scoped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote() -> QuoteContext {
        QuoteContext {
            id: "Q1".to_string(),
            title: "威尼斯双年展回运".to_string(),
            owner_org_id: "G1".to_string(),
            shipment_id: Some("SH1".to_string()),
            submitted_by: "U1".to_string(),
        }
    }

    #[test]
    fn test_unrequested_scope_is_unscoped() {
        let resolved = resolve_scope(&quote(), &EnsureThreadInput::default());
        assert!(!resolved.scoped);
        assert!(!resolved.scope.has_any());
        assert!(resolved.filters.shipper_branch_org_id.is_none());
    }

    #[test]
    fn test_provided_shipper_pulls_in_defaults() {
        let input = EnsureThreadInput {
            shipper_branch_org_id: ScopeField::Value("S1".to_string()),
            ..Default::default()
        };
        let resolved = resolve_scope(&quote(), &input);
        assert!(resolved.scoped);
        // 画廊默认取报价单属主，运单默认取报价单运单
        assert_eq!(resolved.scope.gallery_branch_org_id.as_deref(), Some("G1"));
        assert_eq!(resolved.scope.shipment_id.as_deref(), Some("SH1"));
        assert_eq!(
            resolved.scope.shipper_branch_org_id.as_deref(),
            Some("S1")
        );
        // 未提供的字段不进过滤器
        assert!(resolved.filters.gallery_branch_org_id.is_none());
        assert_eq!(
            resolved.filters.shipper_branch_org_id,
            Some(Some("S1".to_string()))
        );
    }

    #[test]
    fn test_explicit_null_differs_from_absent() {
        // 显式 shipmentId: null 时不取默认运单
        let input = EnsureThreadInput {
            shipment_id: ScopeField::Null,
            shipper_branch_org_id: ScopeField::Value("S1".to_string()),
            ..Default::default()
        };
        let resolved = resolve_scope(&quote(), &input);
        assert_eq!(resolved.scope.shipment_id, None);
        assert_eq!(resolved.filters.shipment_id, Some(None));
    }

    #[test]
    fn test_all_null_scope_request_is_not_scoped() {
        let input = EnsureThreadInput {
            shipment_id: ScopeField::Null,
            shipper_branch_org_id: ScopeField::Null,
            gallery_branch_org_id: ScopeField::Null,
            ..Default::default()
        };
        let resolved = resolve_scope(&quote(), &input);
        // 请求了范围但全部解析为空，不构成有效范围
        assert!(!resolved.scoped);
    }

    #[test]
    fn test_quote_without_shipment_has_no_default() {
        let mut q = quote();
        q.shipment_id = None;
        let input = EnsureThreadInput {
            gallery_branch_org_id: ScopeField::Value("G2".to_string()),
            ..Default::default()
        };
        let resolved = resolve_scope(&q, &input);
        assert!(resolved.scoped);
        assert_eq!(resolved.scope.shipment_id, None);
        assert_eq!(resolved.scope.gallery_branch_org_id.as_deref(), Some("G2"));
    }
}
