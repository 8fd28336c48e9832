use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 创建陪伴聊天消息表
        manager
            .create_table(
                Table::create()
                    .table(CompanionMessages::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CompanionMessages::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CompanionMessages::SessionId).string().not_null())
                    .col(ColumnDef::new(CompanionMessages::UserId).integer().null())
                    .col(ColumnDef::new(CompanionMessages::Role).string_len(16).not_null())
                    // MySQL 的 TEXT 只有 64 KiB
                    .col(
                        ColumnDef::new(CompanionMessages::Content)
                            .custom(Alias::new("longtext"))
                            .not_null(),
                    )
                    .col(ColumnDef::new(CompanionMessages::Mood).string().null())
                    .col(
                        ColumnDef::new(CompanionMessages::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CompanionMessages::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 按会话读取时按创建时间排序
        manager
            .create_index(
                Index::create()
                    .name("idx_companion_messages_session_created")
                    .table(CompanionMessages::Table)
                    .col(CompanionMessages::SessionId)
                    .col(CompanionMessages::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CompanionMessages::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum CompanionMessages {
    #[sea_orm(iden = "CompanionMessages")]
    Table,
    #[sea_orm(iden = "id")]
    Id,
    #[sea_orm(iden = "sessionId")]
    SessionId,
    #[sea_orm(iden = "userId")]
    UserId,
    #[sea_orm(iden = "role")]
    Role,
    #[sea_orm(iden = "content")]
    Content,
    #[sea_orm(iden = "mood")]
    Mood,
    #[sea_orm(iden = "createdAt")]
    CreatedAt,
    #[sea_orm(iden = "updatedAt")]
    UpdatedAt,
}
