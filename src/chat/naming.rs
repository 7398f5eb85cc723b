//! 会话唯一名构造
//!
//! 唯一名是幂等键：同一（实体、范围）组合永远得到同一个名字，存储层和
//! 服务商侧的唯一约束据此拦截并发重复创建。范围哈希不可逆，仅作身份标识。

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::chat::scope::ConversationScope;

/// 范围哈希截断长度（SHA-256 十六进制前 24 位）
const SCOPE_HASH_LEN: usize = 24;

/// 范围哈希的规范化载荷，字段顺序固定
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScopeHashPayload<'a> {
    shipment_id: Option<&'a str>,
    shipper_branch_org_id: Option<&'a str>,
    gallery_branch_org_id: Option<&'a str>,
}

/// 计算范围三元组的截断内容哈希
pub fn scope_hash(scope: &ConversationScope) -> String {
    let payload = ScopeHashPayload {
        shipment_id: scope.shipment_id.as_deref(),
        shipper_branch_org_id: scope.shipper_branch_org_id.as_deref(),
        gallery_branch_org_id: scope.gallery_branch_org_id.as_deref(),
    };
    // 结构体字段序固定，serde_json 输出即为规范 JSON
    let canonical = serde_json::to_string(&payload).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(SCOPE_HASH_LEN);
    hash
}

/// 构造报价单线程的会话唯一名
///
/// 无范围：`quote::{id}`；有范围：`quote::{id}::scope::{hash}`
pub fn build_quote_conversation_name(
    quote_id: &str,
    scope: &ConversationScope,
    scoped: bool,
) -> String {
    if scoped {
        format!("quote::{}::scope::{}", quote_id, scope_hash(scope))
    } else {
        format!("quote::{}", quote_id)
    }
}

/// 大小写不敏感的组织 ID 规范序比较，同小写时按原文兜底保证全序
pub fn org_id_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// 构造货运方点对点线程的规范唯一名
///
/// 对两个组织 ID 做规范排序，保证 `build(A,B) == build(B,A)`。
pub fn build_peer_conversation_name(
    org_a: &str,
    org_b: &str,
    quote_id: Option<&str>,
    shipment_id: Option<&str>,
) -> String {
    let (first, second) = match org_id_cmp(org_a, org_b) {
        std::cmp::Ordering::Greater => (org_b, org_a),
        _ => (org_a, org_b),
    };
    format!(
        "shipper-peer::{}::{}::quote:{}::shipment:{}",
        first,
        second,
        quote_id.unwrap_or("none"),
        shipment_id.unwrap_or("none"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scope(
        shipment: Option<&str>,
        shipper: Option<&str>,
        gallery: Option<&str>,
    ) -> ConversationScope {
        ConversationScope {
            shipment_id: shipment.map(str::to_string),
            shipper_branch_org_id: shipper.map(str::to_string),
            gallery_branch_org_id: gallery.map(str::to_string),
        }
    }

    #[test]
    fn test_scope_hash_deterministic() {
        let a = scope(Some("SH1"), Some("S1"), Some("G1"));
        let b = scope(Some("SH1"), Some("S1"), Some("G1"));
        assert_eq!(scope_hash(&a), scope_hash(&b));
        assert_eq!(scope_hash(&a).len(), 24);
    }

    #[test]
    fn test_scope_hash_sensitive_to_each_field() {
        let base = scope(Some("SH1"), Some("S1"), Some("G1"));
        let h = scope_hash(&base);
        assert_ne!(h, scope_hash(&scope(Some("SH2"), Some("S1"), Some("G1"))));
        assert_ne!(h, scope_hash(&scope(Some("SH1"), Some("S2"), Some("G1"))));
        assert_ne!(h, scope_hash(&scope(Some("SH1"), Some("S1"), Some("G2"))));
        assert_ne!(h, scope_hash(&scope(None, Some("S1"), Some("G1"))));
    }

    #[test]
    fn test_quote_name_format() {
        let s = scope(None, Some("S1"), Some("G1"));
        assert_eq!(build_quote_conversation_name("Q1", &s, false), "quote::Q1");
        let scoped = build_quote_conversation_name("Q1", &s, true);
        assert!(scoped.starts_with("quote::Q1::scope::"));
        assert_eq!(scoped.len(), "quote::Q1::scope::".len() + 24);
    }

    #[test]
    fn test_peer_name_symmetric_and_case_insensitive() {
        let ab = build_peer_conversation_name("OrgA", "orgB", Some("Q1"), None);
        let ba = build_peer_conversation_name("orgB", "OrgA", Some("Q1"), None);
        assert_eq!(ab, ba);
        assert_eq!(ab, "shipper-peer::OrgA::orgB::quote:Q1::shipment:none");
    }

    #[test]
    fn test_peer_name_encodes_context() {
        let plain = build_peer_conversation_name("a", "b", None, None);
        assert_eq!(plain, "shipper-peer::a::b::quote:none::shipment:none");
        let with_ctx = build_peer_conversation_name("a", "b", Some("Q1"), Some("SH1"));
        assert_eq!(with_ctx, "shipper-peer::a::b::quote:Q1::shipment:SH1");
        assert_ne!(plain, with_ctx);
    }

    proptest! {
        // 对任意组织 ID 对，规范名与参数顺序无关
        #[test]
        fn prop_peer_name_symmetric(a in "[a-zA-Z0-9_-]{1,16}", b in "[a-zA-Z0-9_-]{1,16}") {
            prop_assume!(a != b);
            let ab = build_peer_conversation_name(&a, &b, None, None);
            let ba = build_peer_conversation_name(&b, &a, None, None);
            prop_assert_eq!(ab, ba);
        }
    }
}
