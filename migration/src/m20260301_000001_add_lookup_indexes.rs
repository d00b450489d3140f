use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Rules are always fetched per role in position order; each position
        // holds exactly one rule, so concurrent appends cannot tie
        manager
            .create_index(
                Index::create()
                    .name("idx-role_rules-role_id-position")
                    .table(RoleRules::Table)
                    .col(RoleRules::RoleId)
                    .col(RoleRules::Position)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Role assignments are always fetched per user
        manager
            .create_index(
                Index::create()
                    .name("idx-user_roles-user_subject")
                    .table(UserRoles::Table)
                    .col(UserRoles::UserSubject)
                    .to_owned(),
            )
            .await?;

        // Expired-session cleanup scans by expiry
        manager
            .create_index(
                Index::create()
                    .name("idx-sessions-expires_at")
                    .table(Sessions::Table)
                    .col(Sessions::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx-sessions-expires_at")
                    .table(Sessions::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx-user_roles-user_subject")
                    .table(UserRoles::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx-role_rules-role_id-position")
                    .table(RoleRules::Table)
                    .to_owned(),
            )
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum RoleRules {
    Table,
    RoleId,
    Position,
}

#[derive(DeriveIden)]
enum UserRoles {
    Table,
    UserSubject,
}

#[derive(DeriveIden)]
enum Sessions {
    Table,
    ExpiresAt,
}
