use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use companion_entity::companion_message;
use dashmap::DashMap;
use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, warn};

use crate::completion::{ChatMessage, CompletionClient};
use crate::config::Config;
use crate::store::{MessageStore, NewTurn};

/// 陪伴回复的系统指令
pub const COMPANION_SYSTEM_PROMPT: &str = "You are a warm, empathetic AI companion embedded in a public-interest \
platform that helps people affected by online harm. Tone: always caring, calm and emotionally supportive. \
Listen first, acknowledge feelings, and offer gentle, practical next steps when appropriate. \
You are not a lawyer: never give legal advice, and suggest consulting a qualified professional when legal \
questions come up.";

/// 情绪分类的系统指令，标签集合与 [`Mood`] 保持一致
pub const MOOD_SYSTEM_PROMPT: &str = "Classify the emotional tone of the following assistant reply as exactly one \
of: neutral, happy, sad, caring. Return only the label, in lowercase, with no other text.";

/// 助手回复的情绪标签
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Mood {
    #[default]
    Neutral,
    Happy,
    Sad,
    Caring,
}

impl Mood {
    /// 解析模型返回的标签，容忍大小写、空白、引号和结尾标点
    pub fn parse_label(raw: &str) -> Option<Mood> {
        let label = raw
            .trim()
            .trim_matches(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '`' | '.' | '!' | '。'));
        Mood::from_str(label).ok()
    }
}

#[derive(Debug, Error)]
pub enum CompanionError {
    #[error("{0}")]
    InvalidRequest(&'static str),
    #[error("情绪分类失败: {0:#}")]
    Classification(anyhow::Error),
    #[error("模型调用失败: {0:#}")]
    Completion(anyhow::Error),
    #[error("数据库错误: {0}")]
    Storage(#[from] DbErr),
}

/// POST 请求体
#[derive(Clone, Debug, Default, utoipa::ToSchema)]
#[schema(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub session_id: Option<String>,
    pub messages: Option<Vec<ChatMessage>>,
}

impl SubmitRequest {
    /// 逐字段读取请求体；类型不对的字段视为缺失，由校验给出对应的错误
    pub fn from_json(value: &serde_json::Value) -> Self {
        Self {
            session_id: value.get("sessionId").and_then(|v| v.as_str()).map(str::to_string),
            messages: value
                .get("messages")
                .and_then(|v| serde_json::from_value::<Vec<ChatMessage>>(v.clone()).ok()),
        }
    }

    fn validate(self) -> Result<(String, Vec<ChatMessage>), CompanionError> {
        let session_id = require_session_id(self.session_id.as_deref())?.to_string();
        match self.messages {
            Some(messages) if !messages.is_empty() => Ok((session_id, messages)),
            _ => Err(CompanionError::InvalidRequest("Empty or invalid messages.")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct SubmitReply {
    pub reply: String,
    pub mood: Mood,
}

fn require_session_id(session_id: Option<&str>) -> Result<&str, CompanionError> {
    session_id
        .filter(|s| !s.trim().is_empty())
        .ok_or(CompanionError::InvalidRequest("sessionId is required."))
}

/// 最后一条内容非空的用户消息（已去除首尾空白）
pub fn last_user_prompt(messages: &[ChatMessage]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .filter(|m| m.role == "user")
        .map(|m| m.content.trim())
        .find(|c| !c.is_empty())
}

/// 会话级互斥锁，同一会话的请求依次执行，空闲的锁会被回收
#[derive(Default)]
pub struct SessionLocks {
    locks: DashMap<String, SessionSlot>,
}

#[derive(Default)]
struct SessionSlot {
    lock: Arc<Mutex<()>>,
    /// 持有者与等待者的总数
    users: usize,
}

/// 登记一次对会话锁的使用，释放时计数归零即移除表项
///
/// 在等待锁之前创建，等待中的请求被取消时同样会释放。
struct SessionLease<'a> {
    owner: &'a SessionLocks,
    session_id: String,
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        self.owner.locks.remove_if_mut(&self.session_id, |_, slot| {
            slot.users -= 1;
            slot.users == 0
        });
    }
}

pub struct SessionGuard<'a> {
    // 先释放锁，再注销
    _guard: OwnedMutexGuard<()>,
    _lease: SessionLease<'a>,
}

impl SessionLocks {
    pub async fn acquire(&self, session_id: &str) -> SessionGuard<'_> {
        let lock = {
            let mut slot = self.locks.entry(session_id.to_string()).or_default();
            slot.users += 1;
            slot.lock.clone()
        };
        let lease = SessionLease {
            owner: self,
            session_id: session_id.to_string(),
        };
        let guard = lock.lock_owned().await;
        SessionGuard {
            _guard: guard,
            _lease: lease,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelSettings {
    pub reply_model: String,
    pub mood_model: String,
}

impl From<&Config> for ModelSettings {
    fn from(config: &Config) -> Self {
        Self {
            reply_model: config.reply_model.clone(),
            mood_model: config.mood_model.clone(),
        }
    }
}

/// 陪伴聊天的请求处理逻辑
pub struct CompanionService {
    store: MessageStore,
    client: Arc<dyn CompletionClient>,
    models: ModelSettings,
    locks: Option<SessionLocks>,
}

impl CompanionService {
    pub fn new(
        store: MessageStore,
        client: Arc<dyn CompletionClient>,
        models: ModelSettings,
        serialize_sessions: bool,
    ) -> Self {
        Self {
            store,
            client,
            models,
            locks: serialize_sessions.then(SessionLocks::default),
        }
    }

    /// 保存用户消息、生成回复并分类情绪、保存助手回复
    pub async fn submit_turn(&self, request: SubmitRequest) -> Result<SubmitReply, CompanionError> {
        let (session_id, messages) = request.validate()?;

        let _guard = match &self.locks {
            Some(locks) => Some(locks.acquire(&session_id).await),
            None => None,
        };

        if let Some(prompt) = last_user_prompt(&messages) {
            self.store.create(NewTurn::user(&session_id, prompt)).await?;
        }

        let reply = self
            .client
            .complete(&self.models.reply_model, COMPANION_SYSTEM_PROMPT, &messages)
            .await
            .map_err(CompanionError::Completion)?;

        let mood = self.classify(&reply).await;

        if !reply.is_empty() {
            // 回复已经生成，写入失败只记录日志，仍然返回给调用方
            if let Err(e) = self.store.create(NewTurn::assistant(&session_id, &reply, mood)).await {
                error!("保存助手回复失败: session_id={}, 错误: {}", session_id, e);
            }
        }

        debug!("会话 {} 完成一轮对话，mood={}", session_id, mood);
        Ok(SubmitReply { reply, mood })
    }

    /// 返回会话的全部记录，按创建时间升序
    pub async fn fetch_session(&self, session_id: Option<&str>) -> Result<Vec<companion_message::Model>, CompanionError> {
        let session_id = require_session_id(session_id)?;
        Ok(self.store.find_all(session_id).await?)
    }

    /// 情绪分类，失败时回落到 neutral，不影响回复
    pub async fn classify(&self, text: &str) -> Mood {
        match self.try_classify(text).await {
            Ok(mood) => mood,
            Err(e) => {
                warn!("{}，使用默认值 neutral", e);
                Mood::Neutral
            }
        }
    }

    async fn try_classify(&self, text: &str) -> Result<Mood, CompanionError> {
        let raw = self
            .client
            .complete(&self.models.mood_model, MOOD_SYSTEM_PROMPT, &[ChatMessage::new("user", text)])
            .await
            .map_err(CompanionError::Classification)?;
        Mood::parse_label(&raw).ok_or_else(|| CompanionError::Classification(anyhow!("无法识别的情绪标签: {:?}", raw)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use companion_entity::companion_message::Role;
    use strum::IntoEnumIterator;

    use super::*;
    use crate::database::memory_database;
    use sea_orm::{ConnectionTrait, DatabaseConnection};

    /// 按模型名返回预设结果的假客户端
    pub(crate) struct StubClient {
        reply: Result<String, String>,
        mood: Result<String, String>,
        pub(crate) calls: StdMutex<Vec<(String, String, Vec<ChatMessage>)>>,
    }

    impl StubClient {
        pub(crate) fn new(reply: Result<&str, &str>, mood: Result<&str, &str>) -> Self {
            Self {
                reply: reply.map(str::to_string).map_err(str::to_string),
                mood: mood.map(str::to_string).map_err(str::to_string),
                calls: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl CompletionClient for StubClient {
        async fn complete(&self, model: &str, system_prompt: &str, history: &[ChatMessage]) -> anyhow::Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((model.to_string(), system_prompt.to_string(), history.to_vec()));
            let result = if model == "mood-model" { &self.mood } else { &self.reply };
            result.clone().map_err(|e| anyhow!(e))
        }
    }

    pub(crate) fn test_models() -> ModelSettings {
        ModelSettings {
            reply_model: "reply-model".to_string(),
            mood_model: "mood-model".to_string(),
        }
    }

    pub(crate) async fn service_with(client: Arc<StubClient>) -> (CompanionService, MessageStore) {
        let store = MessageStore::new(memory_database().await.unwrap());
        let service = CompanionService::new(store.clone(), client, test_models(), false);
        (service, store)
    }

    fn request(session_id: Option<&str>, messages: Vec<ChatMessage>) -> SubmitRequest {
        SubmitRequest {
            session_id: session_id.map(str::to_string),
            messages: Some(messages),
        }
    }

    #[test]
    fn test_parse_label_normalizes_output() {
        assert_eq!(Mood::parse_label("caring"), Some(Mood::Caring));
        assert_eq!(Mood::parse_label("  Happy.\n"), Some(Mood::Happy));
        assert_eq!(Mood::parse_label("\"sad\""), Some(Mood::Sad));
        assert_eq!(Mood::parse_label("NEUTRAL"), Some(Mood::Neutral));
        assert_eq!(Mood::parse_label("furious"), None);
        assert_eq!(Mood::parse_label("The reply is caring"), None);
    }

    #[test]
    fn test_request_from_json_treats_wrong_types_as_missing() {
        let req = SubmitRequest::from_json(&serde_json::json!({
            "sessionId": "s1",
            "messages": [{"role": "user", "content": "hello"}, {"role": "assistant", "content": "hi", "mood": "happy"}]
        }));
        assert_eq!(req.session_id.as_deref(), Some("s1"));
        assert_eq!(req.messages.as_ref().map(Vec::len), Some(2));

        let req = SubmitRequest::from_json(&serde_json::json!({ "sessionId": 42, "messages": "hello" }));
        assert!(req.session_id.is_none());
        assert!(req.messages.is_none());

        let req = SubmitRequest::from_json(&serde_json::json!(["not", "an", "object"]));
        assert!(req.session_id.is_none());
        assert!(req.messages.is_none());
    }

    #[test]
    fn test_mood_prompt_lists_every_label() {
        for mood in Mood::iter() {
            assert!(MOOD_SYSTEM_PROMPT.contains(&mood.to_string()));
        }
    }

    #[test]
    fn test_last_user_prompt_picks_last_non_empty_user_message() {
        let messages = vec![
            ChatMessage::new("user", "first"),
            ChatMessage::new("assistant", "reply"),
            ChatMessage::new("user", "  second  "),
            ChatMessage::new("user", "   "),
            ChatMessage::new("assistant", "later"),
        ];
        assert_eq!(last_user_prompt(&messages), Some("second"));
        assert_eq!(last_user_prompt(&[ChatMessage::new("assistant", "hi")]), None);
    }

    #[tokio::test]
    async fn test_submit_persists_user_and_assistant_turns() {
        let client = Arc::new(StubClient::new(Ok("hi there"), Ok("caring")));
        let (service, store) = service_with(client.clone()).await;

        let reply = service
            .submit_turn(request(Some("s1"), vec![ChatMessage::new("user", "hello")]))
            .await
            .unwrap();
        assert_eq!(
            reply,
            SubmitReply {
                reply: "hi there".to_string(),
                mood: Mood::Caring
            }
        );

        let turns = store.find_all("s1").await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[0].content, "hello");
        assert_eq!(turns[0].mood, None);
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].content, "hi there");
        assert_eq!(turns[1].mood.as_deref(), Some("caring"));

        let calls = client.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "reply-model");
        assert_eq!(calls[0].1, COMPANION_SYSTEM_PROMPT);
        assert_eq!(calls[0].2, vec![ChatMessage::new("user", "hello")]);
        assert_eq!(calls[1].0, "mood-model");
        assert_eq!(calls[1].1, MOOD_SYSTEM_PROMPT);
        assert_eq!(calls[1].2, vec![ChatMessage::new("user", "hi there")]);
    }

    #[tokio::test]
    async fn test_mood_failure_defaults_to_neutral() {
        let client = Arc::new(StubClient::new(Ok("hi there"), Err("mood provider down")));
        let (service, store) = service_with(client).await;

        let reply = service
            .submit_turn(request(Some("s1"), vec![ChatMessage::new("user", "hello")]))
            .await
            .unwrap();
        assert_eq!(reply.reply, "hi there");
        assert_eq!(reply.mood, Mood::Neutral);

        let turns = store.find_all("s1").await.unwrap();
        assert_eq!(turns[1].mood.as_deref(), Some("neutral"));
    }

    #[tokio::test]
    async fn test_unknown_mood_label_defaults_to_neutral() {
        let client = Arc::new(StubClient::new(Ok("hi there"), Ok("Overjoyed!!")));
        let (service, _store) = service_with(client).await;

        let reply = service
            .submit_turn(request(Some("s1"), vec![ChatMessage::new("user", "hello")]))
            .await
            .unwrap();
        assert_eq!(reply.mood, Mood::Neutral);
    }

    #[tokio::test]
    async fn test_only_last_qualifying_user_message_is_saved() {
        let client = Arc::new(StubClient::new(Ok("ok"), Ok("happy")));
        let (service, store) = service_with(client).await;

        let messages = vec![
            ChatMessage::new("assistant", "Hi, I'm your AI Companion."),
            ChatMessage::new("user", "first"),
            ChatMessage::new("assistant", "reply"),
            ChatMessage::new("user", "  latest  "),
            ChatMessage::new("user", ""),
        ];
        service.submit_turn(request(Some("s1"), messages)).await.unwrap();

        let user_turns: Vec<_> = store
            .find_all("s1")
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.role == Role::User)
            .collect();
        assert_eq!(user_turns.len(), 1);
        assert_eq!(user_turns[0].content, "latest");
    }

    #[tokio::test]
    async fn test_no_user_message_still_replies() {
        let client = Arc::new(StubClient::new(Ok("still here"), Ok("caring")));
        let (service, store) = service_with(client).await;

        service
            .submit_turn(request(Some("s1"), vec![ChatMessage::new("user", "   ")]))
            .await
            .unwrap();

        let turns = store.find_all("s1").await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_empty_reply_is_not_persisted() {
        let client = Arc::new(StubClient::new(Ok(""), Ok("neutral")));
        let (service, store) = service_with(client).await;

        let reply = service
            .submit_turn(request(Some("s1"), vec![ChatMessage::new("user", "hello")]))
            .await
            .unwrap();
        assert_eq!(reply.reply, "");

        let turns = store.find_all("s1").await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_invalid_requests_write_nothing() {
        let client = Arc::new(StubClient::new(Ok("hi"), Ok("happy")));
        let (service, store) = service_with(client.clone()).await;

        let err = service
            .submit_turn(request(None, vec![ChatMessage::new("user", "hello")]))
            .await
            .unwrap_err();
        assert_matches!(err, CompanionError::InvalidRequest("sessionId is required."));

        let err = service
            .submit_turn(request(Some("  "), vec![ChatMessage::new("user", "hello")]))
            .await
            .unwrap_err();
        assert_matches!(err, CompanionError::InvalidRequest(_));

        let err = service.submit_turn(request(Some("s1"), vec![])).await.unwrap_err();
        assert_matches!(err, CompanionError::InvalidRequest("Empty or invalid messages."));

        let err = service
            .submit_turn(SubmitRequest {
                session_id: Some("s1".to_string()),
                messages: None,
            })
            .await
            .unwrap_err();
        assert_matches!(err, CompanionError::InvalidRequest(_));

        assert!(store.find_all("s1").await.unwrap().is_empty());
        assert!(client.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reply_failure_keeps_user_turn_only() {
        let client = Arc::new(StubClient::new(Err("provider down"), Ok("happy")));
        let (service, store) = service_with(client.clone()).await;

        let err = service
            .submit_turn(request(Some("s1"), vec![ChatMessage::new("user", "hello")]))
            .await
            .unwrap_err();
        assert_matches!(err, CompanionError::Completion(_));

        let turns = store.find_all("s1").await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, Role::User);
        // 回复失败后不再请求情绪分类
        assert_eq!(client.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_session_requires_id() {
        let client = Arc::new(StubClient::new(Ok("hi"), Ok("happy")));
        let (service, _store) = service_with(client).await;

        assert_matches!(
            service.fetch_session(None).await,
            Err(CompanionError::InvalidRequest(_))
        );
        assert!(service.fetch_session(Some("s1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_session_locks_serialize_same_session() {
        let locks = SessionLocks::default();
        let first = locks.acquire("s1").await;

        // 不同会话互不影响
        let other = tokio::time::timeout(Duration::from_millis(50), locks.acquire("s2")).await;
        assert!(other.is_ok());
        drop(other);

        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.acquire("s1")).await;
        assert!(blocked.is_err());

        drop(first);
        let second = tokio::time::timeout(Duration::from_millis(50), locks.acquire("s1")).await;
        assert!(second.is_ok());
        drop(second);

        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_releases_session_entry() {
        let locks = SessionLocks::default();
        let first = locks.acquire("s1").await;

        let mut waiter = Box::pin(locks.acquire("s1"));
        assert!(tokio::time::timeout(Duration::from_millis(20), &mut waiter).await.is_err());

        // 持有者先释放，等待者随后被取消（例如客户端断开）
        drop(first);
        drop(waiter);

        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_serialized_service_releases_session_entries() {
        let client = Arc::new(StubClient::new(Ok("hi"), Ok("happy")));
        let store = MessageStore::new(memory_database().await.unwrap());
        let service = CompanionService::new(store.clone(), client, test_models(), true);

        let (a, b) = tokio::join!(
            service.submit_turn(request(Some("s1"), vec![ChatMessage::new("user", "one")])),
            service.submit_turn(request(Some("s1"), vec![ChatMessage::new("user", "two")])),
        );
        assert!(a.is_ok() && b.is_ok());

        // 串行执行时两轮对话不会交错
        let roles: Vec<_> = store.find_all("s1").await.unwrap().into_iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
        assert_eq!(service.locks.as_ref().map(SessionLocks::len), Some(0));
    }

    /// 生成回复时删掉消息表，让随后的写入失败
    struct TableDroppingClient {
        db: DatabaseConnection,
    }

    #[async_trait::async_trait]
    impl CompletionClient for TableDroppingClient {
        async fn complete(&self, model: &str, _system_prompt: &str, _history: &[ChatMessage]) -> anyhow::Result<String> {
            if model == "mood-model" {
                return Ok("caring".to_string());
            }
            self.db.execute_unprepared(r#"DROP TABLE "CompanionMessages""#).await?;
            Ok("hi there".to_string())
        }
    }

    #[tokio::test]
    async fn test_assistant_write_failure_still_returns_reply() {
        let db = memory_database().await.unwrap();
        let client = Arc::new(TableDroppingClient { db: db.clone() });
        let service = CompanionService::new(MessageStore::new(db), client, test_models(), false);

        let reply = service
            .submit_turn(request(Some("s1"), vec![ChatMessage::new("user", "hello")]))
            .await
            .unwrap();
        assert_eq!(
            reply,
            SubmitReply {
                reply: "hi there".to_string(),
                mood: Mood::Caring,
            }
        );
    }

    #[tokio::test]
    async fn test_user_write_failure_skips_provider() {
        let db = memory_database().await.unwrap();
        let client = Arc::new(StubClient::new(Ok("hi"), Ok("happy")));
        let service = CompanionService::new(MessageStore::new(db.clone()), client.clone(), test_models(), false);
        db.close().await.unwrap();

        let err = service
            .submit_turn(request(Some("s1"), vec![ChatMessage::new("user", "hello")]))
            .await
            .unwrap_err();
        assert_matches!(err, CompanionError::Storage(_));
        assert!(client.calls.lock().unwrap().is_empty());
    }
}
