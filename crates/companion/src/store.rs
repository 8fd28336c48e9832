use companion_entity::companion_message::{self, Role};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, Set};
use tracing::debug;

use crate::companion::Mood;

/// 待写入的对话轮次
///
/// 只能通过 [`NewTurn::user`] 与 [`NewTurn::assistant`] 构造，保证 mood 只出现在助手回复上。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTurn {
    session_id: String,
    role: Role,
    content: String,
    mood: Option<Mood>,
}

impl NewTurn {
    pub fn user(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            role: Role::User,
            content: content.into(),
            mood: None,
        }
    }

    pub fn assistant(session_id: impl Into<String>, content: impl Into<String>, mood: Mood) -> Self {
        Self {
            session_id: session_id.into(),
            role: Role::Assistant,
            content: content.into(),
            mood: Some(mood),
        }
    }
}

/// 对话记录的持久化，只提供追加与按会话读取
#[derive(Clone)]
pub struct MessageStore {
    db: DatabaseConnection,
}

impl MessageStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn create(&self, turn: NewTurn) -> Result<companion_message::Model, DbErr> {
        let now = chrono::Utc::now();
        let model = companion_message::ActiveModel {
            session_id: Set(turn.session_id),
            user_id: Set(None),
            role: Set(turn.role),
            content: Set(turn.content),
            mood: Set(turn.mood.map(|m| m.to_string())),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;
        debug!(
            "保存对话消息: session_id={}, role={}, id={}",
            model.session_id,
            model.role.as_str(),
            model.id
        );
        Ok(model)
    }

    /// 按创建时间升序返回会话内的全部记录，时间相同时按 id 排序
    pub async fn find_all(&self, session_id: &str) -> Result<Vec<companion_message::Model>, DbErr> {
        companion_message::Entity::find()
            .filter(companion_message::Column::SessionId.eq(session_id))
            .order_by_asc(companion_message::Column::CreatedAt)
            .order_by_asc(companion_message::Column::Id)
            .all(&self.db)
            .await
    }
}
