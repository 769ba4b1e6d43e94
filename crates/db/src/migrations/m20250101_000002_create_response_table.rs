//! Create response table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Response::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Response::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Response::FormId).string_len(32).not_null())
                    .col(ColumnDef::new(Response::Answers).json_binary().not_null())
                    .col(ColumnDef::new(Response::SubmitterIp).string_len(64))
                    .col(ColumnDef::new(Response::UserAgent).string_len(512))
                    .col(
                        ColumnDef::new(Response::SubmittedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Response::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_response_form")
                            .from(Response::Table, Response::FormId)
                            .to(Form::Table, Form::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: (form_id, submitted_at) for newest-first listing
        manager
            .create_index(
                Index::create()
                    .name("idx_response_form_id_submitted_at")
                    .table(Response::Table)
                    .col(Response::FormId)
                    .col(Response::SubmittedAt)
                    .to_owned(),
            )
            .await?;

        // Index: (form_id, submitter_ip) for the single-response check
        manager
            .create_index(
                Index::create()
                    .name("idx_response_form_id_submitter_ip")
                    .table(Response::Table)
                    .col(Response::FormId)
                    .col(Response::SubmitterIp)
                    .to_owned(),
            )
            .await?;

        // Index: expires_at (for reclamation sweeps)
        manager
            .create_index(
                Index::create()
                    .name("idx_response_expires_at")
                    .table(Response::Table)
                    .col(Response::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Response::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Response {
    Table,
    Id,
    FormId,
    Answers,
    SubmitterIp,
    UserAgent,
    SubmittedAt,
    ExpiresAt,
}

#[derive(Iden)]
enum Form {
    Table,
    Id,
}
