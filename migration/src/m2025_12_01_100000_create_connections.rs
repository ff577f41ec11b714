//! Migration to create the connections table.
//!
//! A connection stores one encrypted OAuth credential set for a
//! (user, tenant, provider, provider_user) tuple, together with lifecycle
//! status, refresh bookkeeping and health-check results.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Connections::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Connections::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Connections::UserId).uuid().not_null())
                    .col(ColumnDef::new(Connections::TenantId).uuid().not_null())
                    .col(ColumnDef::new(Connections::ProviderSlug).text().not_null())
                    .col(
                        ColumnDef::new(Connections::ProviderUserId)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Connections::ProviderTeamId).text().null())
                    .col(ColumnDef::new(Connections::Email).text().not_null())
                    .col(
                        ColumnDef::new(Connections::Status)
                            .text()
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(Connections::AccessTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Connections::RefreshTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Connections::TokenType)
                            .text()
                            .not_null()
                            .default("Bearer"),
                    )
                    .col(
                        ColumnDef::new(Connections::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Connections::Scopes).json_binary().null())
                    .col(
                        ColumnDef::new(Connections::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Connections::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Connections::LastRefreshedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Connections::RevokedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Connections::RevokedBy).text().null())
                    .col(ColumnDef::new(Connections::RevokeReason).text().null())
                    .col(
                        ColumnDef::new(Connections::LastHealthCheckAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Connections::HealthCheckStatus)
                            .text()
                            .null(),
                    )
                    .col(ColumnDef::new(Connections::HealthCheckError).text().null())
                    .to_owned(),
            )
            .await?;

        // One live connection per (user, tenant, provider, provider user)
        manager
            .create_index(
                Index::create()
                    .name("idx_connections_user_tenant_provider_identity")
                    .table(Connections::Table)
                    .col(Connections::UserId)
                    .col(Connections::TenantId)
                    .col(Connections::ProviderSlug)
                    .col(Connections::ProviderUserId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Tenant isolation queries
        manager
            .create_index(
                Index::create()
                    .name("idx_connections_tenant_id")
                    .table(Connections::Table)
                    .col(Connections::TenantId)
                    .to_owned(),
            )
            .await?;

        // Refresh sweep queries filter by status + expires_at
        manager
            .create_index(
                Index::create()
                    .name("idx_connections_status_expires_at")
                    .table(Connections::Table)
                    .col(Connections::Status)
                    .col(Connections::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_connections_user_tenant_provider_identity")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("idx_connections_tenant_id").to_owned())
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_connections_status_expires_at")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Connections::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Connections {
    Table,
    Id,
    UserId,
    TenantId,
    ProviderSlug,
    ProviderUserId,
    ProviderTeamId,
    Email,
    Status,
    AccessTokenCiphertext,
    RefreshTokenCiphertext,
    TokenType,
    ExpiresAt,
    Scopes,
    CreatedAt,
    UpdatedAt,
    LastRefreshedAt,
    RevokedAt,
    RevokedBy,
    RevokeReason,
    LastHealthCheckAt,
    HealthCheckStatus,
    HealthCheckError,
}
