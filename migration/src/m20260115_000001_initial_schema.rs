use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Enable foreign keys for SQLite
        if manager.get_database_backend() == sea_orm::DatabaseBackend::Sqlite {
            manager
                .get_connection()
                .execute_unprepared("PRAGMA foreign_keys = ON")
                .await?;
        }

        // Create users table
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Users::Subject)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Users::Username)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(string(Users::PasswordHash))
                    .col(string_null(Users::Email))
                    .col(big_integer(Users::CreatedAt))
                    .col(
                        ColumnDef::new(Users::Enabled)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .to_owned(),
            )
            .await?;

        // Create roles table
        manager
            .create_table(
                Table::create()
                    .table(Roles::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Roles::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Roles::Name)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(string_null(Roles::Description))
                    .col(
                        ColumnDef::new(Roles::Priority)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(big_integer(Roles::CreatedAt))
                    .to_owned(),
            )
            .await?;

        // Create role_rules table
        manager
            .create_table(
                Table::create()
                    .table(RoleRules::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RoleRules::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(RoleRules::RoleId))
                    .col(string(RoleRules::Action))
                    .col(string(RoleRules::Subject))
                    .col(string_null(RoleRules::Conditions))
                    .col(
                        ColumnDef::new(RoleRules::Inverted)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(big_integer(RoleRules::Position))
                    .col(big_integer(RoleRules::CreatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-role_rules-role_id")
                            .from(RoleRules::Table, RoleRules::RoleId)
                            .to(Roles::Table, Roles::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Create user_roles table
        manager
            .create_table(
                Table::create()
                    .table(UserRoles::Table)
                    .if_not_exists()
                    .col(string(UserRoles::UserSubject))
                    .col(string(UserRoles::RoleId))
                    .col(big_integer(UserRoles::AssignedAt))
                    .primary_key(
                        Index::create()
                            .col(UserRoles::UserSubject)
                            .col(UserRoles::RoleId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-user_roles-user_subject")
                            .from(UserRoles::Table, UserRoles::UserSubject)
                            .to(Users::Table, Users::Subject)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-user_roles-role_id")
                            .from(UserRoles::Table, UserRoles::RoleId)
                            .to(Roles::Table, Roles::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Create sessions table
        manager
            .create_table(
                Table::create()
                    .table(Sessions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Sessions::SessionId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(Sessions::Subject))
                    .col(big_integer(Sessions::CreatedAt))
                    .col(big_integer(Sessions::ExpiresAt))
                    .col(string_null(Sessions::UserAgent))
                    .col(string_null(Sessions::IpAddress))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Sessions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(UserRoles::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RoleRules::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Roles::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Subject,
    Username,
    PasswordHash,
    Email,
    CreatedAt,
    Enabled,
}

#[derive(DeriveIden)]
enum Roles {
    Table,
    Id,
    Name,
    Description,
    Priority,
    CreatedAt,
}

#[derive(DeriveIden)]
enum RoleRules {
    Table,
    Id,
    RoleId,
    Action,
    Subject,
    Conditions,
    Inverted,
    Position,
    CreatedAt,
}

#[derive(DeriveIden)]
enum UserRoles {
    Table,
    UserSubject,
    RoleId,
    AssignedAt,
}

#[derive(DeriveIden)]
enum Sessions {
    Table,
    SessionId,
    Subject,
    CreatedAt,
    ExpiresAt,
    UserAgent,
    IpAddress,
}
