use sea_orm_migration::sea_query::extension::postgres::Type;
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_type(
                Type::create()
                    .as_enum(IngestionStatusEnum::Enum)
                    .values([
                        IngestionStatusEnum::Pending,
                        IngestionStatusEnum::Running,
                        IngestionStatusEnum::Succeeded,
                        IngestionStatusEnum::Failed,
                    ])
                    .to_owned(),
            )
            .await?;

        // cloud_provider enum is created by the catalog migration
        manager
            .create_table(
                Table::create()
                    .table(IngestionJobs::Table)
                    .if_not_exists()
                    .col(pk_uuid(IngestionJobs::Id))
                    .col(
                        ColumnDef::new(IngestionJobs::Provider)
                            .enumeration(
                                CloudProviderEnum::Enum,
                                [
                                    CloudProviderEnum::Aws,
                                    CloudProviderEnum::Azure,
                                    CloudProviderEnum::Gcp,
                                ],
                            )
                            .not_null(),
                    )
                    .col(string_len(IngestionJobs::Location, 100).not_null())
                    .col(string_len(IngestionJobs::Service, 255).not_null())
                    .col(
                        ColumnDef::new(IngestionJobs::Status)
                            .enumeration(
                                IngestionStatusEnum::Enum,
                                [
                                    IngestionStatusEnum::Pending,
                                    IngestionStatusEnum::Running,
                                    IngestionStatusEnum::Succeeded,
                                    IngestionStatusEnum::Failed,
                                ],
                            )
                            .not_null()
                            .default("pending"),
                    )
                    .col(text_null(IngestionJobs::ErrorMsg))
                    .col(
                        timestamp_with_time_zone(IngestionJobs::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(IngestionJobs::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Active-job lookup per scope
        manager
            .create_index(
                Index::create()
                    .name("idx_ingestion_jobs_scope_status")
                    .table(IngestionJobs::Table)
                    .col(IngestionJobs::Provider)
                    .col(IngestionJobs::Location)
                    .col(IngestionJobs::Service)
                    .col(IngestionJobs::Status)
                    .to_owned(),
            )
            .await?;

        // Reaper scan
        manager
            .create_index(
                Index::create()
                    .name("idx_ingestion_jobs_status_updated_at")
                    .table(IngestionJobs::Table)
                    .col(IngestionJobs::Status)
                    .col(IngestionJobs::UpdatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_ingestion_jobs_created_at")
                    .table(IngestionJobs::Table)
                    .col(IngestionJobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(IngestionJobs::Table).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(IngestionStatusEnum::Enum).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum IngestionJobs {
    Table,
    Id,
    Provider,
    Location,
    Service,
    Status,
    ErrorMsg,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum IngestionStatusEnum {
    #[sea_orm(iden = "ingestion_status")]
    Enum,
    #[sea_orm(iden = "pending")]
    Pending,
    #[sea_orm(iden = "running")]
    Running,
    #[sea_orm(iden = "succeeded")]
    Succeeded,
    #[sea_orm(iden = "failed")]
    Failed,
}

#[derive(DeriveIden)]
enum CloudProviderEnum {
    #[sea_orm(iden = "cloud_provider")]
    Enum,
    #[sea_orm(iden = "aws")]
    Aws,
    #[sea_orm(iden = "azure")]
    Azure,
    #[sea_orm(iden = "gcp")]
    Gcp,
}
