use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 对话轮次的发送方
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, utoipa::ToSchema)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[sea_orm(string_value = "user")]
    User,
    #[sea_orm(string_value = "assistant")]
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// 陪伴聊天的单条对话记录
///
/// 记录一经写入不再修改；同一会话内按 `createdAt` 升序排列。
/// `mood` 只在助手回复上填写，用户消息保持为空。
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, utoipa::ToSchema)]
#[sea_orm(table_name = "CompanionMessages")]
#[serde(rename_all = "camelCase")]
#[schema(as = ChatTurn)]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(column_name = "sessionId")]
    pub session_id: String,
    /// 预留给多用户支持，目前始终为空
    #[sea_orm(column_name = "userId")]
    pub user_id: Option<i32>,
    pub role: Role,
    #[sea_orm(column_type = "custom(\"longtext\")")]
    pub content: String,
    pub mood: Option<String>,
    #[sea_orm(column_name = "createdAt")]
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[sea_orm(column_name = "updatedAt")]
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
