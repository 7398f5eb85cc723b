//! 测试用服务商假实现
//!
//! 记录所有调用并模拟重名冲突/瞬时失败，单测据此断言副作用次数。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::chat::error::{ChatError, ChatResult};
use crate::chat::provider::types::{ConversationRef, CreateConversationParams};
use crate::chat::provider::ConversationProvider;

/// 记录式服务商假实现
#[derive(Default)]
pub struct RecordingProvider {
    created: Mutex<Vec<CreateConversationParams>>,
    added: Mutex<Vec<(String, String, String)>>,
    attribute_updates: Mutex<Vec<(String, String)>>,
    known: Mutex<HashMap<String, String>>,
    sid_counter: AtomicU32,
    fail_add: AtomicBool,
    fail_attributes: AtomicBool,
}

impl RecordingProvider {
    /// 预置一个服务商侧已存在的会话（测试重名冲突恢复路径）
    pub fn preload_conversation(&self, unique_name: &str, sid: &str) {
        self.known
            .lock()
            .unwrap()
            .insert(unique_name.to_string(), sid.to_string());
    }

    /// 让后续挂载参与者调用全部失败
    pub fn fail_add_participant(&self) {
        self.fail_add.store(true, Ordering::SeqCst);
    }

    /// 让后续属性更新调用全部失败
    pub fn fail_update_attributes(&self) {
        self.fail_attributes.store(true, Ordering::SeqCst);
    }

    /// 成功创建的会话次数
    pub fn create_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    /// 全部挂载调用 (sid, identity, roleSid)
    pub fn added_participants(&self) -> Vec<(String, String, String)> {
        self.added.lock().unwrap().clone()
    }

    /// 全部属性更新调用 (sid, attributes)
    pub fn attribute_updates(&self) -> Vec<(String, String)> {
        self.attribute_updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversationProvider for RecordingProvider {
    async fn create_conversation(
        &self,
        params: CreateConversationParams,
    ) -> ChatResult<ConversationRef> {
        let mut known = self.known.lock().unwrap();
        if known.contains_key(&params.unique_name) {
            return Err(ChatError::conflict(format!(
                "会话 {} 已存在",
                params.unique_name
            )));
        }
        let sid = format!("CH{:03}", self.sid_counter.fetch_add(1, Ordering::SeqCst) + 1);
        known.insert(params.unique_name.clone(), sid.clone());
        drop(known);
        self.created.lock().unwrap().push(params);
        Ok(ConversationRef { sid })
    }

    async fn fetch_conversation(&self, unique_name: &str) -> ChatResult<ConversationRef> {
        self.known
            .lock()
            .unwrap()
            .get(unique_name)
            .map(|sid| ConversationRef { sid: sid.clone() })
            .ok_or_else(|| ChatError::not_found(format!("服务商会话 {}", unique_name)))
    }

    async fn add_participant(
        &self,
        conversation_sid: &str,
        identity: &str,
        role_sid: &str,
    ) -> ChatResult<()> {
        if self.fail_add.load(Ordering::SeqCst) {
            return Err(ChatError::provider("模拟挂载失败"));
        }
        self.added.lock().unwrap().push((
            conversation_sid.to_string(),
            identity.to_string(),
            role_sid.to_string(),
        ));
        Ok(())
    }

    async fn update_conversation_attributes(
        &self,
        conversation_sid: &str,
        attributes: &str,
    ) -> ChatResult<()> {
        if self.fail_attributes.load(Ordering::SeqCst) {
            return Err(ChatError::provider("模拟属性更新失败"));
        }
        self.attribute_updates
            .lock()
            .unwrap()
            .push((conversation_sid.to_string(), attributes.to_string()));
        Ok(())
    }
}
