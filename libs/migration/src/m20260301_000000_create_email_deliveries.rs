use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("CREATE SCHEMA IF NOT EXISTS email")
            .await?;

        manager
            .create_table(
                Table::create()
                    .table((Email::Schema, Deliveries::Table))
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Deliveries::DeliveryId)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(text(Deliveries::Workflow))
                    .col(text(Deliveries::Recipient))
                    .col(text(Deliveries::Status).default("queued"))
                    .col(integer(Deliveries::Attempts).default(0))
                    .col(text_null(Deliveries::LastErrorCode))
                    .col(text_null(Deliveries::LastErrorMessage))
                    .col(timestamp_with_time_zone_null(Deliveries::QueuedAt))
                    .col(timestamp_with_time_zone_null(Deliveries::LastAttemptedAt))
                    .col(timestamp_with_time_zone_null(Deliveries::SentAt))
                    .col(
                        timestamp_with_time_zone(Deliveries::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(Deliveries::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(json_binary_null(Deliveries::Metadata))
                    .to_owned(),
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                r#"
                DO $$
                BEGIN
                    IF NOT EXISTS (
                        SELECT 1 FROM pg_constraint
                        WHERE conname = 'deliveries_status_check'
                          AND conrelid = 'email.deliveries'::regclass
                    ) THEN
                        ALTER TABLE email.deliveries
                            ADD CONSTRAINT deliveries_status_check
                            CHECK (status IN ('queued', 'in_progress', 'retrying', 'sent', 'failed', 'dead_letter'));
                    END IF;
                END
                $$
                "#,
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_deliveries_recipient_updated_at")
                    .table((Email::Schema, Deliveries::Table))
                    .col(Deliveries::Recipient)
                    .col(Deliveries::UpdatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_deliveries_updated_at")
                    .table((Email::Schema, Deliveries::Table))
                    .col(Deliveries::UpdatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table((Email::Schema, Deliveries::Table))
                    .if_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared("DROP SCHEMA IF EXISTS email")
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Email {
    #[sea_orm(iden = "email")]
    Schema,
}

#[derive(DeriveIden)]
enum Deliveries {
    Table,
    DeliveryId,
    Workflow,
    Recipient,
    Status,
    Attempts,
    LastErrorCode,
    LastErrorMessage,
    QueuedAt,
    LastAttemptedAt,
    SentAt,
    CreatedAt,
    UpdatedAt,
    Metadata,
}
