//! Create form table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Form::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Form::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Form::Title).string_len(100).not_null())
                    .col(ColumnDef::new(Form::Description).text())
                    .col(ColumnDef::new(Form::Fields).json_binary().not_null())
                    .col(
                        ColumnDef::new(Form::FillLink)
                            .string_len(12)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Form::ResponseLink)
                            .string_len(24)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Form::ResponseSecret).string_len(256))
                    .col(
                        ColumnDef::new(Form::ExpirationChoice)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Form::CustomExpirationMinutes).integer())
                    .col(
                        ColumnDef::new(Form::AllowMultipleResponses)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Form::ShowResponseCount)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Form::RequireAllFields)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Form::ResponseCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Form::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Form::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: expires_at (for reclamation sweeps)
        manager
            .create_index(
                Index::create()
                    .name("idx_form_expires_at")
                    .table(Form::Table)
                    .col(Form::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Form::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Form {
    Table,
    Id,
    Title,
    Description,
    Fields,
    FillLink,
    ResponseLink,
    ResponseSecret,
    ExpirationChoice,
    CustomExpirationMinutes,
    AllowMultipleResponses,
    ShowResponseCount,
    RequireAllFields,
    ResponseCount,
    CreatedAt,
    ExpiresAt,
}
